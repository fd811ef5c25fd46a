//! Facade tests against a stand-in guest with the TagLib export surface.
//!
//! These run without the real TagLib binary; see `integration.rs` for tests
//! against actual audio files.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use taglib_sandbox::{Access, Arg, Artifact, Mount, SandboxConfig, SandboxError, Session};
use taglib_wasm::{Taglib, TaglibError, Tags, WriteOptions, exports, tags};

const STUB: &str = include_str!("fixtures/taglib_stub.wat");

fn taglib() -> &'static Taglib {
    static TAGLIB: OnceLock<Taglib> = OnceLock::new();
    TAGLIB.get_or_init(|| {
        let config = SandboxConfig::new().with_cache_enabled(false);
        let artifact = Artifact::from_bytes(&config, STUB.as_bytes()).expect("stub compiles");
        Taglib::new(artifact)
    })
}

/// A path in a fresh directory.  The stub stores tags in the file itself and
/// reads a missing file as [`stub_tags`].
fn path_in(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

fn tag_map(pairs: &[(&str, &[&str])]) -> Tags {
    pairs
        .iter()
        .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
        .collect()
}

fn stub_tags() -> Tags {
    tag_map(&[(tags::ARTIST, &["A", "B", "C"]), (tags::TITLE, &["Song"])])
}

// ═══════════════════════════════════════════════════════════════════════
//  Stateless reads
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn read_tags_decodes_rows() {
    let dir = tempfile::tempdir().unwrap();
    let tags = taglib().read_tags(path_in(&dir, "song.flac")).unwrap();
    assert_eq!(tags, stub_tags());
}

#[test]
fn read_tags_rejects_non_audio() {
    let dir = tempfile::tempdir().unwrap();
    let err = taglib().read_tags(path_in(&dir, "notes.txt")).unwrap_err();
    assert!(matches!(err, TaglibError::InvalidFile), "got {err:?}");
}

#[test]
fn read_tags_missing_directory_is_session_error() {
    let err = taglib()
        .read_tags("/definitely/not/a/dir/song.flac")
        .unwrap_err();
    assert!(
        matches!(err, TaglibError::Sandbox(SandboxError::SessionOpen { .. })),
        "got {err:?}"
    );
}

#[test]
fn read_properties_decodes_words() {
    let dir = tempfile::tempdir().unwrap();
    let props = taglib().read_properties(path_in(&dir, "song.flac")).unwrap();
    assert_eq!(props.length, Duration::from_secs(1));
    assert_eq!(props.channels, 2);
    assert_eq!(props.sample_rate, 48000);
    assert_eq!(props.bitrate, 1460);

    let err = taglib().read_properties(path_in(&dir, "song.txt")).unwrap_err();
    assert!(matches!(err, TaglibError::InvalidFile));
}

#[test]
fn read_image_distinguishes_absent_from_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let t = taglib();

    assert_eq!(t.read_image(path_in(&dir, "song.flac")).unwrap(), Some(vec![1, 2, 3]));
    assert_eq!(t.read_image(path_in(&dir, "song.lock")).unwrap(), None);

    let err = t.read_image(path_in(&dir, "song.txt")).unwrap_err();
    assert!(matches!(err, TaglibError::InvalidFile));
}

// ═══════════════════════════════════════════════════════════════════════
//  Stateless writes
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn write_tags_succeeds_on_writable_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = path_in(&dir, "song.flac");
    let wanted = tag_map(&[(tags::ALBUM, &["Record"]), (tags::GENRE, &[])]);
    taglib().write_tags(&path, &wanted, WriteOptions::CLEAR).unwrap();

    assert!(path.is_file());
    assert_eq!(
        taglib().read_tags(&path).unwrap(),
        tag_map(&[(tags::ALBUM, &["Record"])])
    );
}

#[test]
fn written_tags_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = path_in(&dir, "song.flac");
    let wanted = tag_map(&[
        (tags::ARTIST, &["Hello, 世界", "界世"]),
        (tags::TITLE, &["Song"]),
        ("CUSTOM", &["a", "b", "c"]),
    ]);

    taglib().write_tags(&path, &wanted, WriteOptions::CLEAR).unwrap();
    assert_eq!(taglib().read_tags(&path).unwrap(), wanted);
}

#[test]
fn clear_with_no_tags_empties_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = path_in(&dir, "song.flac");

    taglib()
        .write_tags(&path, &tag_map(&[(tags::ARTIST, &["Someone"])]), WriteOptions::CLEAR)
        .unwrap();
    assert_eq!(
        taglib().read_tags(&path).unwrap(),
        tag_map(&[(tags::ARTIST, &["Someone"])])
    );

    taglib().write_tags(&path, &Tags::new(), WriteOptions::CLEAR).unwrap();
    assert!(taglib().read_tags(&path).unwrap().is_empty());
}

#[test]
fn writes_without_clear_merge() {
    let dir = tempfile::tempdir().unwrap();
    let path = path_in(&dir, "song.flac");
    let t = taglib();

    t.write_tags(&path, &Tags::new(), WriteOptions::CLEAR).unwrap();

    t.write_tags(&path, &tag_map(&[("ONE", &["one"])]), WriteOptions::NONE)
        .unwrap();
    assert_eq!(t.read_tags(&path).unwrap(), tag_map(&[("ONE", &["one"])]));

    t.write_tags(&path, &tag_map(&[("TWO", &["two", "two!"])]), WriteOptions::NONE)
        .unwrap();
    assert_eq!(
        t.read_tags(&path).unwrap(),
        tag_map(&[("ONE", &["one"]), ("TWO", &["two", "two!"])])
    );

    t.write_tags(&path, &tag_map(&[("THREE", &["three"])]), WriteOptions::NONE)
        .unwrap();
    assert_eq!(
        t.read_tags(&path).unwrap(),
        tag_map(&[("ONE", &["one"]), ("TWO", &["two", "two!"]), ("THREE", &["three"])])
    );

    // Replacing one key leaves the others alone.
    t.write_tags(&path, &tag_map(&[("ONE", &["one new"])]), WriteOptions::NONE)
        .unwrap();
    assert_eq!(
        t.read_tags(&path).unwrap(),
        tag_map(&[("ONE", &["one new"]), ("TWO", &["two", "two!"]), ("THREE", &["three"])])
    );

    // An empty value list removes the key.
    t.write_tags(&path, &tag_map(&[("ONE", &[])]), WriteOptions::NONE)
        .unwrap();
    assert_eq!(
        t.read_tags(&path).unwrap(),
        tag_map(&[("TWO", &["two", "two!"]), ("THREE", &["three"])])
    );
}

#[test]
fn clear_removes_keys_merge_keeps_them() {
    let dir = tempfile::tempdir().unwrap();
    let merged = path_in(&dir, "merged.flac");
    let cleared = path_in(&dir, "cleared.flac");
    let album = tag_map(&[(tags::ALBUM, &["Record"])]);

    taglib().write_tags(&merged, &album, WriteOptions::NONE).unwrap();
    let mut expected = stub_tags();
    expected.insert(tags::ALBUM.to_string(), vec!["Record".to_string()]);
    assert_eq!(taglib().read_tags(&merged).unwrap(), expected);

    taglib().write_tags(&cleared, &album, WriteOptions::CLEAR).unwrap();
    assert_eq!(taglib().read_tags(&cleared).unwrap(), album);
}

#[test]
fn failed_write_reports_invalid_or_save_failed() {
    let dir = tempfile::tempdir().unwrap();
    let wanted = tag_map(&[(tags::ALBUM, &["Record"])]);

    let err = taglib()
        .write_tags(path_in(&dir, "song.txt"), &wanted, WriteOptions::NONE)
        .unwrap_err();
    assert!(matches!(err, TaglibError::InvalidFile), "got {err:?}");

    let err = taglib()
        .write_tags(path_in(&dir, "song.lock"), &wanted, WriteOptions::NONE)
        .unwrap_err();
    assert!(matches!(err, TaglibError::SaveFailed), "got {err:?}");
}

#[test]
fn diff_before_write_skips_unchanged_tags() {
    let dir = tempfile::tempdir().unwrap();
    let locked = path_in(&dir, "song.lock");

    // Writes to .lock always fail, so success means the write was skipped.
    let same = tag_map(&[(tags::TITLE, &["Song"])]);
    taglib()
        .write_tags(&locked, &same, WriteOptions::DIFF_BEFORE_WRITE)
        .unwrap();

    let different = tag_map(&[(tags::TITLE, &["Other"])]);
    let err = taglib()
        .write_tags(&locked, &different, WriteOptions::DIFF_BEFORE_WRITE)
        .unwrap_err();
    assert!(matches!(err, TaglibError::SaveFailed));
}

#[test]
fn diff_with_clear_writes_when_keys_would_be_removed() {
    let dir = tempfile::tempdir().unwrap();
    let locked = path_in(&dir, "song.lock");
    let subset = tag_map(&[(tags::TITLE, &["Song"])]);

    let err = taglib()
        .write_tags(
            &locked,
            &subset,
            WriteOptions::DIFF_BEFORE_WRITE | WriteOptions::CLEAR,
        )
        .unwrap_err();
    assert!(matches!(err, TaglibError::SaveFailed));

    taglib()
        .write_tags(
            &locked,
            &stub_tags(),
            WriteOptions::DIFF_BEFORE_WRITE | WriteOptions::CLEAR,
        )
        .unwrap();
}

#[test]
fn write_and_clear_images() {
    let dir = tempfile::tempdir().unwrap();
    let t = taglib();
    t.write_image(path_in(&dir, "song.flac"), &[0xFF, 0xD8, 0xFF]).unwrap();
    t.clear_images(path_in(&dir, "song.flac")).unwrap();

    assert!(matches!(
        t.write_image(path_in(&dir, "song.lock"), &[1]).unwrap_err(),
        TaglibError::SaveFailed
    ));
    assert!(matches!(
        t.clear_images(path_in(&dir, "song.txt")).unwrap_err(),
        TaglibError::InvalidFile
    ));
}

#[test]
fn concurrent_stateless_reads() {
    let dir = tempfile::tempdir().unwrap();
    let path = path_in(&dir, "song.flac");

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..16)
            .map(|_| s.spawn(|| taglib().read_tags(&path)))
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap().unwrap(), stub_tags());
        }
    });
}

// ═══════════════════════════════════════════════════════════════════════
//  Handle mode
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn handle_reads_tags_and_properties() {
    let dir = tempfile::tempdir().unwrap();
    let file = taglib().open(path_in(&dir, "song.flac")).unwrap();

    assert_eq!(file.tags().unwrap(), stub_tags());
    assert_eq!(file.tag(tags::ARTIST).unwrap(), vec!["A", "B", "C"]);
    assert_eq!(file.tag(tags::TITLE).unwrap(), vec!["Song"]);
    assert!(file.tag(tags::GENRE).unwrap().is_empty());

    let props = file.properties().unwrap();
    assert_eq!(props.sample_rate, 48000);
    assert_eq!(file.properties().unwrap(), props);

    assert_eq!(file.image().unwrap(), Some(vec![1, 2, 3]));
    file.close().unwrap();
}

#[test]
fn handle_edits_and_saves() {
    let dir = tempfile::tempdir().unwrap();
    let path = path_in(&dir, "song.flac");
    let file = taglib().open(&path).unwrap();
    assert!(!file.is_readonly());

    file.set_tag(tags::ARTIST, &["One", "Two"]).unwrap();
    assert_eq!(file.tag(tags::ARTIST).unwrap(), vec!["One", "Two"]);

    file.set_tag(tags::GENRE, &["Jazz"]).unwrap();
    file.set_tag::<&str>(tags::GENRE, &[]).unwrap();
    assert!(file.tag(tags::GENRE).unwrap().is_empty());
    assert!(!file.tags().unwrap().contains_key(tags::GENRE));

    file.set_image(&[9, 9]).unwrap();

    // Edits stay in the handle until saved.
    assert_eq!(taglib().read_tags(&path).unwrap(), stub_tags());
    file.save().unwrap();
    file.close().unwrap();

    assert_eq!(
        taglib().read_tags(&path).unwrap(),
        tag_map(&[(tags::ARTIST, &["One", "Two"]), (tags::TITLE, &["Song"])])
    );
}

#[test]
fn handle_set_tags_applies_every_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = path_in(&dir, "song.flac");
    let file = taglib().open(&path).unwrap();

    let edits = tag_map(&[
        (tags::ARTIST, &["Solo"]),
        (tags::TITLE, &[]),
        (tags::ALBUM, &["Record", "Deluxe"]),
    ]);
    file.set_tags(&edits).unwrap();
    let expected = tag_map(&[(tags::ARTIST, &["Solo"]), (tags::ALBUM, &["Record", "Deluxe"])]);
    assert_eq!(file.tags().unwrap(), expected);

    file.save().unwrap();
    drop(file);

    let reopened = taglib().open_readonly(&path).unwrap();
    assert_eq!(reopened.tags().unwrap(), expected);
}

#[test]
fn unsaved_edits_are_discarded_on_close() {
    let dir = tempfile::tempdir().unwrap();
    let path = path_in(&dir, "song.flac");
    let file = taglib().open(&path).unwrap();
    file.set_tag(tags::TITLE, &["Draft"]).unwrap();
    file.close().unwrap();

    assert!(!path.exists());
    assert_eq!(taglib().read_tags(&path).unwrap(), stub_tags());
}

#[test]
fn handle_save_failure() {
    let dir = tempfile::tempdir().unwrap();
    let file = taglib().open(path_in(&dir, "song.lock")).unwrap();
    assert!(matches!(file.save().unwrap_err(), TaglibError::SaveFailed));
    assert!(matches!(file.set_image(&[1]).unwrap_err(), TaglibError::SaveFailed));
}

#[test]
fn handle_rejects_non_audio() {
    let dir = tempfile::tempdir().unwrap();
    let err = taglib().open(path_in(&dir, "notes.txt")).unwrap_err();
    assert!(matches!(err, TaglibError::InvalidFile), "got {err:?}");
}

#[test]
fn readonly_handle_rejects_writes() {
    let dir = tempfile::tempdir().unwrap();
    let file = taglib().open_readonly(path_in(&dir, "song.flac")).unwrap();
    assert!(file.is_readonly());

    assert!(matches!(
        file.set_tag(tags::TITLE, &["x"]).unwrap_err(),
        TaglibError::Readonly
    ));
    assert!(matches!(file.set_image(&[1]).unwrap_err(), TaglibError::Readonly));
    assert!(matches!(file.save().unwrap_err(), TaglibError::Readonly));

    // Reads still work.
    assert_eq!(file.tags().unwrap().len(), 2);
}

#[test]
fn handle_is_shareable_across_threads() {
    let dir = tempfile::tempdir().unwrap();
    let file = taglib().open(path_in(&dir, "song.flac")).unwrap();

    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..10 {
                    assert_eq!(file.tags().unwrap().len(), 2);
                }
            });
        }
    });
    file.close().unwrap();
}

#[test]
fn dropping_a_handle_releases_it() {
    let dir = tempfile::tempdir().unwrap();
    let file = taglib().open(path_in(&dir, "song.flac")).unwrap();
    assert_eq!(file.path(), path_in(&dir, "song.flac"));
    drop(file);
}

// ═══════════════════════════════════════════════════════════════════════
//  Guest memory discipline
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn tag_rows_are_fully_freed() {
    let dir = tempfile::tempdir().unwrap();
    let (mount, file) = Mount::for_file(path_in(&dir, "song.flac"), Access::ReadOnly).unwrap();
    let mut session = Session::open(taglib().artifact(), mount).unwrap();

    for _ in 0..5 {
        let rows: Option<Vec<String>> = session
            .call(exports::FILE_TAGS, &[Arg::Str(&file)])
            .unwrap();
        assert_eq!(rows.unwrap().len(), 4);
    }
    let live: i32 = session.call("live_allocations", &[]).unwrap();
    assert_eq!(live, 0);
}

#[test]
fn guest_exception_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let (mount, file) = Mount::for_file(path_in(&dir, "song.flac"), Access::ReadOnly).unwrap();
    let mut session = Session::open(taglib().artifact(), mount).unwrap();

    let err = session
        .call::<i32>("taglib_crash", &[Arg::Str(&file)])
        .unwrap_err();
    assert!(matches!(err, SandboxError::GuestFault { .. }), "got {err:?}");
    assert!(err.is_fatal());
    assert!(session.is_poisoned());

    // Other sessions are unaffected.
    assert_eq!(taglib().read_tags(path_in(&dir, "song.flac")).unwrap(), stub_tags());
}
