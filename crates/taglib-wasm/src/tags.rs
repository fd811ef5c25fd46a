//! Tag maps and their row encoding.
//!
//! Tags cross the boundary as a list of rows, one per key:
//!
//! ```text
//! KEY \t VALUE1 \v VALUE2 \v ...
//! ```
//!
//! Keys follow TagLib's property map naming (upper case, e.g. `ALBUMARTIST`).
//! An empty value list in a write clears that key.

use std::collections::BTreeMap;

/// Tag key to values.
pub type Tags = BTreeMap<String, Vec<String>>;

/// Separates the key from its values within a row.
pub const KEY_SEPARATOR: char = '\t';

/// Separates values within a row.
pub const VALUE_SEPARATOR: char = '\u{b}';

// ── well-known keys ──────────────────────────────────────────────────

pub const ACOUSTID_FINGERPRINT: &str = "ACOUSTID_FINGERPRINT";
pub const ACOUSTID_ID: &str = "ACOUSTID_ID";
pub const ALBUM: &str = "ALBUM";
pub const ALBUM_ARTIST: &str = "ALBUMARTIST";
pub const ALBUM_ARTIST_SORT: &str = "ALBUMARTISTSORT";
pub const ALBUM_SORT: &str = "ALBUMSORT";
pub const ARRANGER: &str = "ARRANGER";
pub const ARTIST: &str = "ARTIST";
pub const ARTISTS: &str = "ARTISTS";
pub const ARTIST_SORT: &str = "ARTISTSORT";
pub const ASIN: &str = "ASIN";
pub const BARCODE: &str = "BARCODE";
pub const BPM: &str = "BPM";
pub const CATALOG_NUMBER: &str = "CATALOGNUMBER";
pub const COMMENT: &str = "COMMENT";
pub const COMPILATION: &str = "COMPILATION";
pub const COMPOSER: &str = "COMPOSER";
pub const COMPOSER_SORT: &str = "COMPOSERSORT";
pub const CONDUCTOR: &str = "CONDUCTOR";
pub const COPYRIGHT: &str = "COPYRIGHT";
pub const DATE: &str = "DATE";
pub const DISC_NUMBER: &str = "DISCNUMBER";
pub const DISC_SUBTITLE: &str = "DISCSUBTITLE";
pub const ENCODED_BY: &str = "ENCODEDBY";
pub const ENCODING: &str = "ENCODING";
pub const ENCODING_TIME: &str = "ENCODINGTIME";
pub const FILE_TYPE: &str = "FILETYPE";
pub const GENRE: &str = "GENRE";
pub const GROUPING: &str = "GROUPING";
pub const INITIAL_KEY: &str = "INITIALKEY";
pub const ISRC: &str = "ISRC";
pub const LABEL: &str = "LABEL";
pub const LANGUAGE: &str = "LANGUAGE";
pub const LENGTH: &str = "LENGTH";
pub const LYRICIST: &str = "LYRICIST";
pub const LYRICS: &str = "LYRICS";
pub const MEDIA: &str = "MEDIA";
pub const MIXER: &str = "MIXER";
pub const MOOD: &str = "MOOD";
pub const MOVEMENT_NAME: &str = "MOVEMENTNAME";
pub const MOVEMENT_NUMBER: &str = "MOVEMENTNUMBER";
pub const MUSICBRAINZ_ALBUM_ARTIST_ID: &str = "MUSICBRAINZ_ALBUMARTISTID";
pub const MUSICBRAINZ_ALBUM_ID: &str = "MUSICBRAINZ_ALBUMID";
pub const MUSICBRAINZ_ARTIST_ID: &str = "MUSICBRAINZ_ARTISTID";
pub const MUSICBRAINZ_RELEASE_GROUP_ID: &str = "MUSICBRAINZ_RELEASEGROUPID";
pub const MUSICBRAINZ_RELEASE_TRACK_ID: &str = "MUSICBRAINZ_RELEASETRACKID";
pub const MUSICBRAINZ_TRACK_ID: &str = "MUSICBRAINZ_TRACKID";
pub const MUSICBRAINZ_WORK_ID: &str = "MUSICBRAINZ_WORKID";
pub const ORIGINAL_ALBUM: &str = "ORIGINALALBUM";
pub const ORIGINAL_ARTIST: &str = "ORIGINALARTIST";
pub const ORIGINAL_DATE: &str = "ORIGINALDATE";
pub const ORIGINAL_FILENAME: &str = "ORIGINALFILENAME";
pub const ORIGINAL_LYRICIST: &str = "ORIGINALLYRICIST";
pub const OWNER: &str = "OWNER";
pub const PERFORMER: &str = "PERFORMER";
pub const PODCAST: &str = "PODCAST";
pub const PRODUCER: &str = "PRODUCER";
pub const RELEASE_COUNTRY: &str = "RELEASECOUNTRY";
pub const RELEASE_DATE: &str = "RELEASEDATE";
pub const RELEASE_STATUS: &str = "RELEASESTATUS";
pub const RELEASE_TYPE: &str = "RELEASETYPE";
pub const REMIXER: &str = "REMIXER";
pub const REPLAYGAIN_ALBUM_GAIN: &str = "REPLAYGAIN_ALBUM_GAIN";
pub const REPLAYGAIN_ALBUM_PEAK: &str = "REPLAYGAIN_ALBUM_PEAK";
pub const REPLAYGAIN_TRACK_GAIN: &str = "REPLAYGAIN_TRACK_GAIN";
pub const REPLAYGAIN_TRACK_PEAK: &str = "REPLAYGAIN_TRACK_PEAK";
pub const SCRIPT: &str = "SCRIPT";
pub const SUBTITLE: &str = "SUBTITLE";
pub const TITLE: &str = "TITLE";
pub const TITLE_SORT: &str = "TITLESORT";
pub const TRACK_NUMBER: &str = "TRACKNUMBER";
pub const WORK: &str = "WORK";

// ── row encoding ─────────────────────────────────────────────────────

/// Encode a tag map as guest rows, one per key.
pub fn to_rows(tags: &Tags) -> Vec<String> {
    let sep = VALUE_SEPARATOR.to_string();
    tags.iter()
        .map(|(key, values)| format!("{key}{KEY_SEPARATOR}{}", values.join(&sep)))
        .collect()
}

/// Decode guest rows into a tag map.
///
/// Rows without a key separator are skipped.  Repeated keys accumulate, so
/// guests that emit one row per value decode the same as one row per key.
pub fn from_rows<S: AsRef<str>>(rows: &[S]) -> Tags {
    let mut tags = Tags::new();
    for row in rows {
        let Some((key, values)) = row.as_ref().split_once(KEY_SEPARATOR) else {
            continue;
        };
        tags.entry(key.to_owned())
            .or_default()
            .extend(values.split(VALUE_SEPARATOR).map(str::to_owned));
    }
    tags
}

/// Whether writing `wanted` over `current` would leave the file unchanged.
///
/// With `clear`, keys present in `current` but absent from `wanted` count as
/// changes because the write would remove them.
pub fn is_unchanged(current: &Tags, wanted: &Tags, clear: bool) -> bool {
    let wanted_match = wanted.iter().all(|(key, values)| match current.get(key) {
        _ if values.is_empty() => !current.contains_key(key),
        Some(existing) => existing == values,
        None => false,
    });
    if !wanted_match {
        return false;
    }
    !clear
        || current
            .keys()
            .all(|key| wanted.get(key).is_some_and(|v| !v.is_empty()))
}
