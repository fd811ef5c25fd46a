//! Guest fault bridge.
//!
//! The guest is compiled without an unwinding model, so its C++ runtime
//! imports the exception entry points from the host instead of defining them.
//! These host stand-ins never return normally: they trap with a
//! [`GuestFault`], which [`Session::call`](crate::Session::call) turns into
//! [`SandboxError::GuestFault`](crate::SandboxError::GuestFault) and a
//! poisoned session.  An internal guest fault (for example an allocation
//! failure inside the guest's allocator) is therefore never a recoverable
//! per-call error.

use tracing::error;
use wasmtime::Linker;

use crate::error::{Result, SandboxError};

/// Import module the guest runtime expects the stand-ins in.
pub const IMPORT_MODULE: &str = "env";
/// `void *__cxa_allocate_exception(size_t)`.
pub const ALLOCATE_EXCEPTION: &str = "__cxa_allocate_exception";
/// `void __cxa_throw(void *, void *, void (*)(void *))`.
pub const THROW: &str = "__cxa_throw";

/// Trap payload raised when the guest reaches an exception entry point.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("guest reached unsupported entry point {entry_point}")]
pub struct GuestFault {
    /// Which stand-in was hit.
    pub entry_point: &'static str,
}

/// Register the stand-ins on `linker`.
pub fn define<T: 'static>(linker: &mut Linker<T>) -> Result<()> {
    linker
        .func_wrap(
            IMPORT_MODULE,
            ALLOCATE_EXCEPTION,
            |size: i32| -> wasmtime::Result<i32> {
                error!(size, "guest attempted to allocate an exception");
                Err(wasmtime::Error::new(GuestFault {
                    entry_point: ALLOCATE_EXCEPTION,
                }))
            },
        )
        .map_err(link_error)?;

    linker
        .func_wrap(
            IMPORT_MODULE,
            THROW,
            |_exception: i32, _type_info: i32, _destructor: i32| -> wasmtime::Result<()> {
                error!("guest attempted to throw an exception");
                Err(wasmtime::Error::new(GuestFault { entry_point: THROW }))
            },
        )
        .map_err(link_error)?;

    Ok(())
}

/// The fault carried by a failed guest call, if any.
pub(crate) fn find(err: &wasmtime::Error) -> Option<&GuestFault> {
    err.downcast_ref::<GuestFault>()
}

fn link_error(e: wasmtime::Error) -> SandboxError {
    SandboxError::Initialization(format!("failed to define fault bridge: {e}"))
}
