//! Host runtime for a sandboxed WebAssembly guest.
//!
//! This crate loads one precompiled guest module per process and runs
//! isolated sessions against it, marshaling rich arguments into guest memory
//! and decoding results back out.
//!
//! - **[`config`]** -- [`SandboxConfig`] selects the guest binary, the
//!   compilation cache and per-session memory limits.
//! - **[`error`]** -- [`SandboxError`] enumerates every failure mode.
//! - **[`cache`]** -- [`CompilationCache`] persists compiled machine code,
//!   keyed by content.
//! - **[`artifact`]** -- [`Artifact`] is the immutable compiled guest;
//!   [`ArtifactCell`] builds it once per process.
//! - **[`session`]** -- [`Session`] is one instantiation bound to a single
//!   [`Mount`]ed directory.
//! - **[`frame`]** -- [`Arg`] values are encoded into guest words and
//!   allocations that are always freed after the call.
//! - **[`decode`]** -- [`FromReturn`] turns a returned word into strings,
//!   string lists, word arrays or length-tagged buffers.
//! - **[`fault`]** -- stand-ins for the guest's exception entry points that
//!   turn any internal guest fault into a fatal error.
//! - **[`shared`]** -- [`SharedSession`] serializes calls into one
//!   long-lived session.
//!
//! Calls are synchronous and block the calling thread.  There are no
//! background threads, timeouts or cancellation.

pub mod artifact;
pub mod cache;
pub mod config;
pub mod decode;
pub mod error;
pub mod fault;
pub mod frame;
pub mod session;
pub mod shared;

// Re-export the most commonly used types at the crate root.
pub use artifact::{Artifact, ArtifactCell};
pub use cache::{CacheOutcome, CompilationCache};
pub use config::SandboxConfig;
pub use decode::{FromReturn, Returned};
pub use error::{Result, SandboxError};
pub use frame::Arg;
pub use session::{Access, Mount, Session};
pub use shared::SharedSession;
