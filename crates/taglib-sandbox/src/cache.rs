//! Content-keyed compilation cache.
//!
//! Translating the guest to machine code is the most expensive step of
//! startup.  [`CompilationCache`] persists the serialized translation under a
//! private directory, keyed by the SHA-256 of the guest bytes and the engine's
//! precompile compatibility hash, so identical binaries compiled by a
//! compatible engine are only translated once across process restarts.
//! Entries are never invalidated explicitly; a changed binary or engine simply
//! maps to a different key.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use wasmtime::{Engine, Module};

use crate::error::{Result, SandboxError};

const ENTRY_EXTENSION: &str = "cwasm";

/// How a module was obtained by [`CompilationCache::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// A stored translation was deserialized.
    Hit,
    /// The module was compiled and (if possible) stored.
    Miss,
    /// Caching is off; the module was compiled in memory only.
    Disabled,
}

/// Durable store of compiled guest modules.
#[derive(Debug, Clone)]
pub struct CompilationCache {
    dir: Option<PathBuf>,
}

impl CompilationCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    ///
    /// On Unix the directory is created with mode `0700`.  An existing
    /// directory that is not owned by the effective user, or that grants any
    /// access to group or others, is refused: entries are loaded as native
    /// code, so anyone able to write there could run code in this process.
    /// A refused directory yields a disabled cache and a warning.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        create_private_dir(&dir)?;
        if let Err(reason) = check_private_dir(&dir) {
            warn!(dir = %dir.display(), %reason, "refusing compilation cache directory, caching disabled");
            return Ok(Self::disabled());
        }
        debug!(dir = %dir.display(), "compilation cache opened");
        Ok(Self { dir: Some(dir) })
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    /// Root directory, if the cache is enabled.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// File an entry for `bytes` compiled by `engine` would live in.
    pub fn entry_path(&self, engine: &Engine, bytes: &[u8]) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        let digest = Sha256::digest(bytes);
        let mut hasher = DefaultHasher::new();
        engine.precompile_compatibility_hash().hash(&mut hasher);
        let compat = hasher.finish();
        Some(dir.join(format!("{digest:x}-{compat:016x}.{ENTRY_EXTENSION}")))
    }

    /// Return the module for `bytes`, from the store when possible.
    ///
    /// Unreadable or stale entries are removed and recompiled.  Failing to
    /// persist a fresh translation is logged, not returned.
    pub fn load(&self, engine: &Engine, bytes: &[u8]) -> Result<(Module, CacheOutcome)> {
        let (Some(dir), Some(path)) = (self.dir.as_deref(), self.entry_path(engine, bytes)) else {
            return Ok((compile(engine, bytes)?, CacheOutcome::Disabled));
        };

        if path.is_file() {
            // SAFETY: `open` only accepts a directory owned by the effective
            // user with no group or other permissions, so entries come from
            // `store` below: `Module::serialize` output of a compatible engine
            // (the compatibility hash is in the key).
            match unsafe { Module::deserialize_file(engine, &path) } {
                Ok(module) => {
                    debug!(entry = %path.display(), "compilation cache hit");
                    return Ok((module, CacheOutcome::Hit));
                }
                Err(e) => {
                    warn!(entry = %path.display(), error = %e, "discarding unreadable cache entry");
                    let _ = fs::remove_file(&path);
                }
            }
        }

        debug!(entry = %path.display(), "compilation cache miss");
        let module = compile(engine, bytes)?;
        if let Err(e) = store(&module, dir, &path) {
            warn!(entry = %path.display(), error = %e, "failed to persist compiled module");
        }
        Ok((module, CacheOutcome::Miss))
    }
}

fn compile(engine: &Engine, bytes: &[u8]) -> Result<Module> {
    Module::new(engine, bytes)
        .map_err(|e| SandboxError::Initialization(format!("failed to compile guest: {e}")))
}

/// Write through a uniquely named temp file in `dir`, then rename into place
/// so a concurrent reader never sees a partial entry.
fn store(module: &Module, dir: &Path, path: &Path) -> Result<()> {
    let serialized = module
        .serialize()
        .map_err(|e| SandboxError::Initialization(format!("failed to serialize module: {e}")))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&serialized)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
        .map_err(|e| {
            SandboxError::Initialization(format!(
                "failed to create cache directory {}: {e}",
                dir.display()
            ))
        })
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| {
        SandboxError::Initialization(format!(
            "failed to create cache directory {}: {e}",
            dir.display()
        ))
    })
}

#[cfg(unix)]
fn check_private_dir(dir: &Path) -> std::result::Result<(), String> {
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    let meta = fs::symlink_metadata(dir).map_err(|e| e.to_string())?;
    if !meta.is_dir() {
        return Err("not a directory".into());
    }
    let uid = nix::unistd::Uid::effective().as_raw();
    if meta.uid() != uid {
        return Err(format!("owned by uid {} instead of {uid}", meta.uid()));
    }
    let mode = meta.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        return Err(format!("mode {mode:o} grants access to other users"));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_private_dir(_dir: &Path) -> std::result::Result<(), String> {
    Ok(())
}
