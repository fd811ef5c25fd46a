//! Sandbox error types.
//!
//! All host/guest boundary failures surface through [`SandboxError`], which is
//! the single error type returned by every public API in this crate.  The
//! variants follow the layer that produced them: artifact initialization,
//! session open, the calling convention, and faults raised inside the guest.

/// Unified error type for the host/guest boundary.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    // -- Artifact errors ----------------------------------------------------
    /// The compiled artifact could not be produced (cache directory, binary
    /// read, or compilation failure).  Memoized: later calls see the same
    /// message.
    #[error("artifact initialization failed: {0}")]
    Initialization(String),

    /// A configuration was supplied after the artifact was already built.
    #[error("artifact already initialized; configuration must be set before first use")]
    AlreadyInitialized,

    // -- Session errors -----------------------------------------------------
    /// The session could not be instantiated (bad mount, missing required
    /// export, failing `_initialize`).
    #[error("session open failed: {reason}")]
    SessionOpen {
        /// Human-readable description of what went wrong.
        reason: String,
    },

    // -- Calling convention errors ------------------------------------------
    /// The named export does not exist or is not a function.
    #[error("guest export not found: {name}")]
    MissingExport {
        /// Export name that was looked up.
        name: String,
    },

    /// The encoded call does not match the export's declared signature.
    #[error("signature mismatch calling {export}: {reason}")]
    Signature {
        /// Export being invoked.
        export: String,
        /// What did not line up.
        reason: String,
    },

    /// The guest call failed for a reason other than a trap.
    #[error("guest execution error in {export}: {reason}")]
    Execution { export: String, reason: String },

    /// A Wasm trap was raised while running guest code.
    #[error("guest trapped in {export}: {reason}")]
    Trap { export: String, reason: String },

    /// The guest reached one of its unsupported exception entry points.
    /// The session is unusable afterwards.
    #[error("fatal guest fault in {export}: reached {entry_point}")]
    GuestFault {
        /// Export that was running when the fault was raised.
        export: String,
        /// Guest runtime entry point that was intercepted.
        entry_point: String,
    },

    /// The session was poisoned by an earlier fault or trap, or its lock was
    /// poisoned by a panicking holder.
    #[error("session poisoned: {reason}")]
    Poisoned { reason: String },

    // -- Memory errors ------------------------------------------------------
    /// A read or write fell outside the guest's linear memory.
    #[error("guest memory access out of bounds: offset={offset}, len={len}")]
    MemoryAccess { offset: u64, len: u64 },

    /// Bytes read from guest memory did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    // -- Underlying errors --------------------------------------------------
    /// An I/O error from the host filesystem.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Returns `true` for errors after which the session must be discarded.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::GuestFault { .. }
                | Self::Trap { .. }
                | Self::Poisoned { .. }
                | Self::MemoryAccess { .. }
                | Self::Initialization(_)
        )
    }
}

/// Convenience alias used throughout the sandbox crate.
pub type Result<T> = std::result::Result<T, SandboxError>;
