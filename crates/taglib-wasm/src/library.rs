//! Stateless, path-based metadata operations.
//!
//! Each call opens a fresh session with the file's parent directory mounted
//! (read-only for reads, read-write for writes), makes one or two guest calls
//! and discards the session.  Nothing is shared between calls except the
//! compiled guest, so any number of threads may call concurrently.

use std::ops::BitOr;
use std::path::Path;
use std::sync::OnceLock;

use taglib_sandbox::{Access, Arg, Artifact, ArtifactCell, Mount, SandboxConfig, Session};
use tracing::{debug, instrument};

use crate::error::{Result, TaglibError};
use crate::exports;
use crate::file::File;
use crate::properties::AudioProperties;
use crate::tags::{self, Tags};

#[cfg(feature = "bundled")]
const EMBEDDED: Option<&[u8]> = Some(include_bytes!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/wasm/taglib.wasm"
)));
#[cfg(not(feature = "bundled"))]
const EMBEDDED: Option<&[u8]> = None;

static GUEST: ArtifactCell = ArtifactCell::new(EMBEDDED);
static GLOBAL: OnceLock<Taglib> = OnceLock::new();

/// Set the configuration for the process-wide guest.
///
/// Must be called before the first operation; afterwards it fails with
/// [`SandboxError::AlreadyInitialized`](taglib_sandbox::SandboxError::AlreadyInitialized).
/// Without it the configuration comes from the environment.
pub fn configure(config: SandboxConfig) -> Result<()> {
    GUEST.configure(config)?;
    Ok(())
}

/// Options for [`Taglib::write_tags`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct WriteOptions(u8);

impl WriteOptions {
    pub const NONE: Self = Self(0);
    /// Remove every tag not present in the written map.
    pub const CLEAR: Self = Self(1);
    /// Read the current tags first and skip the write when nothing changes.
    pub const DIFF_BEFORE_WRITE: Self = Self(2);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Bit pattern passed to the guest.
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for WriteOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Entry point for metadata operations against one compiled guest.
#[derive(Debug, Clone)]
pub struct Taglib {
    artifact: Artifact,
}

impl Taglib {
    /// Use an already compiled guest.
    pub fn new(artifact: Artifact) -> Self {
        Self { artifact }
    }

    /// The process-wide instance, compiled on first use.
    ///
    /// Initialization failures are memoized: every later call returns the
    /// same error.
    pub fn global() -> Result<&'static Taglib> {
        if let Some(taglib) = GLOBAL.get() {
            return Ok(taglib);
        }
        let artifact = GUEST.get_or_init()?;
        Ok(GLOBAL.get_or_init(|| Taglib::new(artifact)))
    }

    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    /// All tags in the file at `path`.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn read_tags(&self, path: impl AsRef<Path>) -> Result<Tags> {
        self.with_session(path.as_ref(), Access::ReadOnly, |session, file| {
            read_rows(session, file)?.ok_or(TaglibError::InvalidFile)
        })
    }

    /// Write `tags` to the file at `path`.
    ///
    /// Keys with an empty value list are removed.  Other existing keys are
    /// kept unless `opts` contains [`WriteOptions::CLEAR`].
    #[instrument(skip(self, path, tags), fields(path = %path.as_ref().display(), keys = tags.len()))]
    pub fn write_tags(&self, path: impl AsRef<Path>, tags: &Tags, opts: WriteOptions) -> Result<()> {
        let path = path.as_ref();
        if opts.contains(WriteOptions::DIFF_BEFORE_WRITE) {
            let current = self.read_tags(path)?;
            if tags::is_unchanged(&current, tags, opts.contains(WriteOptions::CLEAR)) {
                debug!("tags unchanged, skipping write");
                return Ok(());
            }
        }

        let rows = tags::to_rows(tags);
        self.with_session(path, Access::ReadWrite, |session, file| {
            let saved: bool = session.call(
                exports::FILE_WRITE_TAGS,
                &[Arg::Str(file), Arg::Strs(&rows), Arg::U8(opts.bits())],
            )?;
            if saved { Ok(()) } else { Err(save_error(session, file)?) }
        })
    }

    /// Audio stream properties of the file at `path`.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn read_properties(&self, path: impl AsRef<Path>) -> Result<AudioProperties> {
        self.with_session(path.as_ref(), Access::ReadOnly, |session, file| {
            let words: Option<[u32; 4]> =
                session.call(exports::FILE_AUDIO_PROPERTIES, &[Arg::Str(file)])?;
            words.map(AudioProperties::from).ok_or(TaglibError::InvalidFile)
        })
    }

    /// Bytes of the first embedded picture, or `None` if there is none.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn read_image(&self, path: impl AsRef<Path>) -> Result<Option<Vec<u8>>> {
        self.with_session(path.as_ref(), Access::ReadOnly, |session, file| {
            let image: Option<Vec<u8>> = session.call(
                exports::FILE_READ_IMAGE,
                &[Arg::Str(file), Arg::OutParam(exports::LENGTH_OUT_PARAM)],
            )?;
            match image {
                Some(bytes) => Ok(Some(bytes)),
                None => ensure_valid(session, file).map(|()| None),
            }
        })
    }

    /// Replace the embedded picture with `image`.  Empty bytes remove it.
    #[instrument(skip(self, path, image), fields(path = %path.as_ref().display(), len = image.len()))]
    pub fn write_image(&self, path: impl AsRef<Path>, image: &[u8]) -> Result<()> {
        let len = u32::try_from(image.len()).map_err(|_| TaglibError::SaveFailed)?;
        self.with_session(path.as_ref(), Access::ReadWrite, |session, file| {
            let saved: bool = session.call(
                exports::FILE_WRITE_IMAGE,
                &[Arg::Str(file), Arg::Bytes(image), Arg::U32(len)],
            )?;
            if saved { Ok(()) } else { Err(save_error(session, file)?) }
        })
    }

    /// Remove every embedded picture.
    pub fn clear_images(&self, path: impl AsRef<Path>) -> Result<()> {
        self.write_image(path, &[])
    }

    /// Open a long-lived read-write handle on the file at `path`.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<File> {
        File::open_with(&self.artifact, path.as_ref(), false)
    }

    /// Open a long-lived handle that rejects writes.
    pub fn open_readonly(&self, path: impl AsRef<Path>) -> Result<File> {
        File::open_with(&self.artifact, path.as_ref(), true)
    }

    fn with_session<R>(
        &self,
        path: &Path,
        access: Access,
        f: impl FnOnce(&mut Session, &str) -> Result<R>,
    ) -> Result<R> {
        let (mount, file) = Mount::for_file(path, access)?;
        let mut session = Session::open(&self.artifact, mount)?;
        let result = f(&mut session, &file);
        session.close();
        result
    }
}

// ── free functions on the process-wide instance ──────────────────────

/// [`Taglib::read_tags`] on the process-wide instance.
pub fn read_tags(path: impl AsRef<Path>) -> Result<Tags> {
    Taglib::global()?.read_tags(path)
}

/// [`Taglib::write_tags`] on the process-wide instance.
pub fn write_tags(path: impl AsRef<Path>, tags: &Tags, opts: WriteOptions) -> Result<()> {
    Taglib::global()?.write_tags(path, tags, opts)
}

/// [`Taglib::read_properties`] on the process-wide instance.
pub fn read_properties(path: impl AsRef<Path>) -> Result<AudioProperties> {
    Taglib::global()?.read_properties(path)
}

/// [`Taglib::read_image`] on the process-wide instance.
pub fn read_image(path: impl AsRef<Path>) -> Result<Option<Vec<u8>>> {
    Taglib::global()?.read_image(path)
}

/// [`Taglib::write_image`] on the process-wide instance.
pub fn write_image(path: impl AsRef<Path>, image: &[u8]) -> Result<()> {
    Taglib::global()?.write_image(path, image)
}

/// [`Taglib::clear_images`] on the process-wide instance.
pub fn clear_images(path: impl AsRef<Path>) -> Result<()> {
    Taglib::global()?.clear_images(path)
}

// ── helpers ──────────────────────────────────────────────────────────

fn read_rows(session: &mut Session, file: &str) -> Result<Option<Tags>> {
    let rows: Option<Vec<String>> = session.call(exports::FILE_TAGS, &[Arg::Str(file)])?;
    Ok(rows.map(|rows| tags::from_rows(&rows)))
}

/// `Ok` if the guest recognises `file`, [`TaglibError::InvalidFile`] otherwise.
fn ensure_valid(session: &mut Session, file: &str) -> Result<()> {
    match read_rows(session, file)? {
        Some(_) => Ok(()),
        None => Err(TaglibError::InvalidFile),
    }
}

/// Explain a failed write: not an audio file, or a refused save.
fn save_error(session: &mut Session, file: &str) -> Result<TaglibError> {
    ensure_valid(session, file)?;
    Ok(TaglibError::SaveFailed)
}
