//! Sandbox sessions.
//!
//! A [`Session`] is one live instantiation of an [`Artifact`]: its own store,
//! linear memory and export table, with exactly one host directory visible to
//! the guest through WASI.  Nothing outside that [`Mount`] is reachable.
//!
//! Sessions are cheap enough to open per operation and may also be kept for a
//! sequence of calls (see [`SharedSession`](crate::SharedSession)).  A fault or
//! trap poisons the session; only [`Session::close`] is meaningful afterwards.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use wasmtime::{Instance, Memory, Store, StoreLimits, StoreLimitsBuilder, Trap, TypedFunc, Val, ValType};
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::{DirPerms, FilePerms, WasiCtxBuilder};

use crate::artifact::Artifact;
use crate::decode::{FromReturn, Returned};
use crate::error::{Result, SandboxError};
use crate::fault;
use crate::frame::{Arg, CallFrame};

const MEMORY_EXPORT: &str = "memory";
const MALLOC_EXPORT: &str = "malloc";
const FREE_EXPORT: &str = "free";
const INITIALIZE_EXPORT: &str = "_initialize";

/// Host state stored in every session's wasmtime [`Store`].
pub(crate) struct SessionState {
    pub(crate) wasi: WasiP1Ctx,
    limits: StoreLimits,
}

// ── mounts ───────────────────────────────────────────────────────────

/// Whether guest writes may reach the host directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// The single host directory a session exposes to its guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    host_dir: PathBuf,
    guest_dir: String,
    access: Access,
}

impl Mount {
    /// Mount `dir` (made absolute) at the equivalent guest path.
    pub fn new(dir: impl AsRef<Path>, access: Access) -> Result<Self> {
        let host_dir = absolute(dir.as_ref())?;
        if !host_dir.is_dir() {
            return Err(SandboxError::SessionOpen {
                reason: format!("not a directory: {}", host_dir.display()),
            });
        }
        let guest_dir = guest_path(&host_dir)?;
        Ok(Self {
            host_dir,
            guest_dir,
            access,
        })
    }

    /// Mount only the parent directory of `file`; also returns the guest
    /// path of the file itself.
    pub fn for_file(file: impl AsRef<Path>, access: Access) -> Result<(Self, String)> {
        let file = absolute(file.as_ref())?;
        let parent = file.parent().ok_or_else(|| SandboxError::SessionOpen {
            reason: format!("path has no parent directory: {}", file.display()),
        })?;
        let mount = Self::new(parent, access)?;
        let guest_file = guest_path(&file)?;
        Ok((mount, guest_file))
    }

    /// Absolute host directory.
    pub fn host_dir(&self) -> &Path {
        &self.host_dir
    }

    /// Path under which the guest sees the directory.
    pub fn guest_dir(&self) -> &str {
        &self.guest_dir
    }

    pub fn access(&self) -> Access {
        self.access
    }
}

/// Guest-visible form of a host path: WASI paths always use `/`.
pub fn guest_path(path: &Path) -> Result<String> {
    let s = path.to_str().ok_or_else(|| SandboxError::SessionOpen {
        reason: format!("path is not valid UTF-8: {}", path.display()),
    })?;
    Ok(if std::path::MAIN_SEPARATOR == '/' {
        s.to_owned()
    } else {
        s.replace(std::path::MAIN_SEPARATOR, "/")
    })
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| SandboxError::SessionOpen {
        reason: format!("cannot resolve {}: {e}", path.display()),
    })
}

// ── session ──────────────────────────────────────────────────────────

/// One isolated instantiation of the guest.
pub struct Session {
    store: Store<SessionState>,
    instance: Instance,
    memory: Memory,
    malloc: TypedFunc<i32, i32>,
    free: TypedFunc<i32, ()>,
    mount: Mount,
    poisoned: Option<String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("mount", &self.mount)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Instantiate `artifact` with `mount` as its only filesystem.
    ///
    /// Runs the guest's `_initialize` export when present.  Any failure
    /// discards the instance; no partial session is returned.
    pub fn open(artifact: &Artifact, mount: Mount) -> Result<Self> {
        let config = artifact.config();

        let mut builder = WasiCtxBuilder::new();
        if config.inherit_stdio {
            builder.inherit_stdout();
            builder.inherit_stderr();
        }
        let (dir_perms, file_perms) = match mount.access {
            Access::ReadOnly => (DirPerms::READ, FilePerms::READ),
            Access::ReadWrite => (DirPerms::all(), FilePerms::all()),
        };
        builder
            .preopened_dir(&mount.host_dir, &mount.guest_dir, dir_perms, file_perms)
            .map_err(|e| SandboxError::SessionOpen {
                reason: format!("failed to mount {}: {e}", mount.host_dir.display()),
            })?;

        let state = SessionState {
            wasi: builder.build_p1(),
            limits: StoreLimitsBuilder::new()
                .memory_size(config.max_memory)
                .build(),
        };
        let mut store = Store::new(artifact.engine(), state);
        store.limiter(|state| &mut state.limits);

        let instance = artifact
            .pre()
            .instantiate(&mut store)
            .map_err(|e| open_error(format!("instantiation failed: {e}")))?;

        let memory = instance
            .get_memory(&mut store, MEMORY_EXPORT)
            .ok_or_else(|| open_error("guest exports no memory".into()))?;
        let malloc = instance
            .get_typed_func::<i32, i32>(&mut store, MALLOC_EXPORT)
            .map_err(|e| open_error(format!("guest allocator unavailable: {e}")))?;
        let free = instance
            .get_typed_func::<i32, ()>(&mut store, FREE_EXPORT)
            .map_err(|e| open_error(format!("guest deallocator unavailable: {e}")))?;

        if instance.get_func(&mut store, INITIALIZE_EXPORT).is_some() {
            let init = instance
                .get_typed_func::<(), ()>(&mut store, INITIALIZE_EXPORT)
                .map_err(|e| open_error(format!("bad _initialize signature: {e}")))?;
            init.call(&mut store, ())
                .map_err(|e| open_error(format!("guest initialization failed: {e}")))?;
        }

        debug!(
            dir = %mount.host_dir.display(),
            access = ?mount.access,
            "session opened"
        );

        Ok(Self {
            store,
            instance,
            memory,
            malloc,
            free,
            mount,
            poisoned: None,
        })
    }

    /// Invoke `export` with `args` and decode its single return word as `R`.
    ///
    /// Variable-length arguments are copied into guest allocations that are
    /// freed before this returns, whether or not the call succeeded.  Pointer
    /// results are copied out and then freed as well.
    pub fn call<R: FromReturn>(&mut self, export: &str, args: &[Arg<'_>]) -> Result<R> {
        self.ensure_usable()?;

        let mut frame = CallFrame::new(export, args.len());
        let outcome = self.run_frame(export, args, &mut frame);
        if let Err(e) = &outcome {
            if e.is_fatal() && self.poisoned.is_none() {
                warn!(export, error = %e, "session poisoned");
                self.poisoned = Some(e.to_string());
            }
        }

        // A poisoned instance is discarded wholesale; running its free would
        // mean executing more guest code on corrupted state.
        let released = if self.poisoned.is_some() {
            frame.abandon();
            Ok(())
        } else {
            frame.release(self)
        };

        let value = outcome?;
        released?;
        Ok(value)
    }

    fn run_frame<R: FromReturn>(
        &mut self,
        export: &str,
        args: &[Arg<'_>],
        frame: &mut CallFrame,
    ) -> Result<R> {
        for arg in args {
            frame.push(self, arg)?;
        }
        let word = self.invoke(export, frame.words())?;
        R::from_return(Returned::new(self, export, word, frame.out_param()))
    }

    /// Call `export` with already-encoded words and return the raw result.
    fn invoke(&mut self, export: &str, words: &[u64]) -> Result<u64> {
        let func = self
            .instance
            .get_func(&mut self.store, export)
            .ok_or_else(|| SandboxError::MissingExport {
                name: export.to_owned(),
            })?;
        let ty = func.ty(&self.store);

        if ty.params().len() != words.len() {
            return Err(SandboxError::Signature {
                export: export.to_owned(),
                reason: format!("expected {} arguments, got {}", ty.params().len(), words.len()),
            });
        }

        let mut params = Vec::with_capacity(words.len());
        for (i, (param, &word)) in ty.params().zip(words).enumerate() {
            let val = match param {
                ValType::I32 => {
                    let narrow = u32::try_from(word).map_err(|_| SandboxError::Signature {
                        export: export.to_owned(),
                        reason: format!("argument {i} does not fit in i32: {word}"),
                    })?;
                    Val::I32(narrow as i32)
                }
                ValType::I64 => Val::I64(word as i64),
                other => {
                    return Err(SandboxError::Signature {
                        export: export.to_owned(),
                        reason: format!("unsupported parameter type {other} at {i}"),
                    });
                }
            };
            params.push(val);
        }

        let mut results = vec![Val::I32(0); ty.results().len()];
        if let Err(e) = func.call(&mut self.store, &params, &mut results) {
            return Err(self.fail(export, e));
        }

        match results.first() {
            None => Ok(0),
            Some(Val::I32(v)) => Ok(*v as u32 as u64),
            Some(Val::I64(v)) => Ok(*v as u64),
            Some(other) => Err(SandboxError::Signature {
                export: export.to_owned(),
                reason: format!("unsupported result {other:?}"),
            }),
        }
    }

    /// Poison the session and classify a failed guest call.
    fn fail(&mut self, export: &str, e: wasmtime::Error) -> SandboxError {
        let err = if let Some(fault) = fault::find(&e) {
            tracing::error!(export, entry_point = fault.entry_point, "fatal guest fault");
            SandboxError::GuestFault {
                export: export.to_owned(),
                entry_point: fault.entry_point.to_owned(),
            }
        } else if e.downcast_ref::<Trap>().is_some() {
            SandboxError::Trap {
                export: export.to_owned(),
                reason: e.to_string(),
            }
        } else {
            SandboxError::Execution {
                export: export.to_owned(),
                reason: e.to_string(),
            }
        };
        self.poisoned = Some(err.to_string());
        err
    }

    fn ensure_usable(&self) -> Result<()> {
        match &self.poisoned {
            Some(reason) => Err(SandboxError::Poisoned {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    // ── allocator ────────────────────────────────────────────────────

    /// Allocate `size` bytes on the guest heap.  A null result is an error.
    pub fn malloc(&mut self, size: u32) -> Result<u32> {
        self.ensure_usable()?;
        let ptr = match self.malloc.call(&mut self.store, size as i32) {
            Ok(ptr) => ptr as u32,
            Err(e) => return Err(self.fail(MALLOC_EXPORT, e)),
        };
        if ptr == 0 {
            return Err(SandboxError::Execution {
                export: MALLOC_EXPORT.to_owned(),
                reason: format!("allocation of {size} bytes returned null"),
            });
        }
        Ok(ptr)
    }

    /// Return `ptr` to the guest heap.  Null is ignored.
    pub fn free(&mut self, ptr: u32) -> Result<()> {
        if ptr == 0 {
            return Ok(());
        }
        self.ensure_usable()?;
        if let Err(e) = self.free.call(&mut self.store, ptr as i32) {
            return Err(self.fail(FREE_EXPORT, e));
        }
        Ok(())
    }

    // ── linear memory ────────────────────────────────────────────────

    /// Copy `buf.len()` bytes starting at `ptr` out of guest memory.
    pub fn read(&self, ptr: u32, buf: &mut [u8]) -> Result<()> {
        self.read_at(ptr as usize, buf)
    }

    pub(crate) fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.memory
            .read(&self.store, offset, buf)
            .map_err(|_| SandboxError::MemoryAccess {
                offset: offset as u64,
                len: buf.len() as u64,
            })
    }

    /// Read `len` bytes at `ptr` into a fresh buffer.
    pub fn read_vec(&self, ptr: u32, len: usize) -> Result<Vec<u8>> {
        // Guest-supplied lengths are checked before allocating host memory.
        let in_bounds = (ptr as usize)
            .checked_add(len)
            .is_some_and(|end| end <= self.memory_size());
        if !in_bounds {
            return Err(SandboxError::MemoryAccess {
                offset: ptr as u64,
                len: len as u64,
            });
        }
        let mut buf = vec![0; len];
        self.read(ptr, &mut buf)?;
        Ok(buf)
    }

    /// Copy `data` into guest memory at `ptr`.
    pub fn write(&mut self, ptr: u32, data: &[u8]) -> Result<()> {
        self.memory
            .write(&mut self.store, ptr as usize, data)
            .map_err(|_| SandboxError::MemoryAccess {
                offset: ptr as u64,
                len: data.len() as u64,
            })
    }

    /// Read a little-endian guest word.
    pub fn read_u32(&self, ptr: u32) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read(ptr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Write a little-endian guest word.
    pub fn write_u32(&mut self, ptr: u32, value: u32) -> Result<()> {
        self.write(ptr, &value.to_le_bytes())
    }

    /// Current size of linear memory in bytes.
    pub fn memory_size(&self) -> usize {
        self.memory.data_size(&self.store)
    }

    // ── lifecycle ────────────────────────────────────────────────────

    pub fn mount(&self) -> &Mount {
        &self.mount
    }

    /// Whether an earlier fault or trap made this session unusable.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// Release the instance, its memory and its mount.
    pub fn close(self) {
        debug!(
            dir = %self.mount.host_dir.display(),
            poisoned = self.poisoned.is_some(),
            "session closed"
        );
    }
}

fn open_error(reason: String) -> SandboxError {
    SandboxError::SessionOpen { reason }
}
