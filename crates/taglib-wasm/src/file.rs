//! Long-lived file handles.
//!
//! A [`File`] keeps one guest session and one guest-side file object open, so
//! several reads and edits cost a single parse of the file.  Edits stay in
//! guest memory until [`File::save`].  All calls on a handle are serialized;
//! different handles are independent.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use taglib_sandbox::{Access, Arg, Artifact, Mount, Session, SharedSession};
use tracing::{debug, warn};

use crate::error::{Result, TaglibError};
use crate::exports;
use crate::library::Taglib;
use crate::properties::AudioProperties;
use crate::tags::Tags;

/// An open audio file.
pub struct File {
    inner: Option<Handle>,
    path: PathBuf,
    readonly: bool,
    properties: OnceLock<AudioProperties>,
}

struct Handle {
    session: SharedSession,
    ptr: u32,
}

impl File {
    /// Open `path` for reading and writing with the process-wide guest.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Taglib::global()?.open(path)
    }

    /// Open `path` with the process-wide guest; writes fail with
    /// [`TaglibError::Readonly`].
    pub fn open_readonly(path: impl AsRef<Path>) -> Result<Self> {
        Taglib::global()?.open_readonly(path)
    }

    pub(crate) fn open_with(artifact: &Artifact, path: &Path, readonly: bool) -> Result<Self> {
        let access = if readonly {
            Access::ReadOnly
        } else {
            Access::ReadWrite
        };
        let (mount, guest_file) = Mount::for_file(path, access)?;
        let session = SharedSession::open(artifact, mount)?;

        let ptr = session.with(|s| {
            let ptr: u32 = s.call(exports::FILE_NEW, &[Arg::Str(&guest_file)])?;
            if ptr == 0 {
                return Ok(None);
            }
            let valid: bool = s.call(exports::FILE_IS_VALID, &[Arg::U32(ptr)])?;
            if !valid {
                s.call::<()>(exports::FILE_FREE, &[Arg::U32(ptr)])?;
                return Ok(None);
            }
            Ok(Some(ptr))
        });

        let ptr = match ptr {
            Ok(Some(ptr)) => ptr,
            Ok(None) => {
                session.close()?;
                return Err(TaglibError::InvalidFile);
            }
            Err(e) => {
                let _ = session.close();
                return Err(e.into());
            }
        };

        debug!(path = %path.display(), readonly, "opened file handle");
        Ok(Self {
            inner: Some(Handle { session, ptr }),
            path: path.to_path_buf(),
            readonly,
            properties: OnceLock::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// All tags, including unsaved edits.
    pub fn tags(&self) -> Result<Tags> {
        self.with_handle(|s, ptr| {
            let keys: Option<Vec<String>> = s.call(exports::PROPERTY_KEYS, &[Arg::U32(ptr)])?;
            let mut tags = Tags::new();
            for key in keys.unwrap_or_default() {
                let values = property_values(s, ptr, &key)?;
                tags.insert(key, values);
            }
            Ok(tags)
        })
    }

    /// Values of one tag; empty if the key is absent.
    pub fn tag(&self, key: &str) -> Result<Vec<String>> {
        self.with_handle(|s, ptr| property_values(s, ptr, key))
    }

    /// Replace the values of `key`.  An empty list removes it.
    pub fn set_tag<S: AsRef<str>>(&self, key: &str, values: &[S]) -> Result<()> {
        self.check_writable()?;
        self.with_handle(|s, ptr| set_property(s, ptr, key, values))
    }

    /// Apply every entry of `tags` as by [`File::set_tag`].
    pub fn set_tags(&self, tags: &Tags) -> Result<()> {
        self.check_writable()?;
        self.with_handle(|s, ptr| {
            for (key, values) in tags {
                set_property(s, ptr, key, values)?;
            }
            Ok(())
        })
    }

    /// Audio stream properties.  Fetched once per handle.
    pub fn properties(&self) -> Result<AudioProperties> {
        if let Some(props) = self.properties.get() {
            return Ok(*props);
        }
        let words: Option<[u32; 4]> =
            self.with_handle(|s, ptr| s.call(exports::HANDLE_AUDIO_PROPERTIES, &[Arg::U32(ptr)]))?;
        let props = words
            .map(AudioProperties::from)
            .ok_or(TaglibError::InvalidFile)?;
        Ok(*self.properties.get_or_init(|| props))
    }

    /// Bytes of the first embedded picture, or `None` if there is none.
    pub fn image(&self) -> Result<Option<Vec<u8>>> {
        self.with_handle(|s, ptr| {
            s.call(
                exports::HANDLE_READ_IMAGE,
                &[Arg::U32(ptr), Arg::OutParam(exports::LENGTH_OUT_PARAM)],
            )
        })
    }

    /// Replace the embedded picture.  Empty bytes remove it.
    pub fn set_image(&self, image: &[u8]) -> Result<()> {
        self.check_writable()?;
        let len = u32::try_from(image.len()).map_err(|_| TaglibError::SaveFailed)?;
        let accepted: bool = self.with_handle(|s, ptr| {
            s.call(
                exports::HANDLE_WRITE_IMAGE,
                &[Arg::U32(ptr), Arg::Bytes(image), Arg::U32(len)],
            )
        })?;
        if accepted { Ok(()) } else { Err(TaglibError::SaveFailed) }
    }

    /// Write pending edits to disk.
    pub fn save(&self) -> Result<()> {
        self.check_writable()?;
        let saved: bool = self.with_handle(|s, ptr| s.call(exports::FILE_SAVE, &[Arg::U32(ptr)]))?;
        if saved { Ok(()) } else { Err(TaglibError::SaveFailed) }
    }

    /// Release the guest file object and its session.  Unsaved edits are lost.
    pub fn close(mut self) -> Result<()> {
        match self.inner.take() {
            Some(handle) => handle.release(),
            None => Ok(()),
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            Err(TaglibError::Readonly)
        } else {
            Ok(())
        }
    }

    fn with_handle<R>(
        &self,
        f: impl FnOnce(&mut Session, u32) -> taglib_sandbox::Result<R>,
    ) -> Result<R> {
        let handle = self.inner.as_ref().ok_or(TaglibError::Closed)?;
        Ok(handle.session.with(|s| f(s, handle.ptr))?)
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("path", &self.path)
            .field("readonly", &self.readonly)
            .field("open", &self.inner.is_some())
            .finish()
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if let Some(handle) = self.inner.take() {
            if let Err(e) = handle.release() {
                warn!(path = %self.path.display(), error = %e, "failed to release dropped file handle");
            }
        }
    }
}

impl Handle {
    fn release(self) -> Result<()> {
        let freed = if self.session.is_poisoned() {
            Ok(())
        } else {
            self.session
                .call::<()>(exports::FILE_FREE, &[Arg::U32(self.ptr)])
                .map_err(TaglibError::from)
        };
        self.session.close()?;
        freed
    }
}

fn property_values(s: &mut Session, ptr: u32, key: &str) -> taglib_sandbox::Result<Vec<String>> {
    let values: Option<Vec<String>> =
        s.call(exports::PROPERTY_GET, &[Arg::U32(ptr), Arg::Str(key)])?;
    Ok(values.unwrap_or_default())
}

fn set_property<S: AsRef<str>>(
    s: &mut Session,
    ptr: u32,
    key: &str,
    values: &[S],
) -> taglib_sandbox::Result<()> {
    let Some((first, rest)) = values.split_first() else {
        return s.call(exports::PROPERTY_SET, &[Arg::U32(ptr), Arg::Str(key), Arg::NULL]);
    };
    s.call::<()>(
        exports::PROPERTY_SET,
        &[Arg::U32(ptr), Arg::Str(key), Arg::Str(first.as_ref())],
    )?;
    for value in rest {
        s.call::<()>(
            exports::PROPERTY_SET_APPEND,
            &[Arg::U32(ptr), Arg::Str(key), Arg::Str(value.as_ref())],
        )?;
    }
    Ok(())
}
