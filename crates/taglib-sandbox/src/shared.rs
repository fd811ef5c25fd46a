//! Serialized access to one long-lived session.
//!
//! The guest is not reentrant: two calls interleaving on the same instance
//! would share one heap and one stack.  [`SharedSession`] owns the [`Session`]
//! behind a mutex and only hands it out for the duration of a closure, so the
//! whole allocate, call, decode and free sequence of one call completes before
//! the next caller gets in.  No raw handle to the session ever escapes.

use std::sync::Mutex;

use crate::artifact::Artifact;
use crate::decode::FromReturn;
use crate::error::{Result, SandboxError};
use crate::frame::Arg;
use crate::session::{Mount, Session};

/// A [`Session`] usable from many threads, one call at a time.
#[derive(Debug)]
pub struct SharedSession {
    inner: Mutex<Session>,
}

impl SharedSession {
    /// Wrap an already-open session.
    pub fn new(session: Session) -> Self {
        Self {
            inner: Mutex::new(session),
        }
    }

    /// Open a session on `mount` and wrap it.
    pub fn open(artifact: &Artifact, mount: Mount) -> Result<Self> {
        Session::open(artifact, mount).map(Self::new)
    }

    /// Run `f` with exclusive access to the session.
    pub fn with<R>(&self, f: impl FnOnce(&mut Session) -> Result<R>) -> Result<R> {
        let mut session = self.inner.lock().map_err(|_| lock_poisoned())?;
        f(&mut session)
    }

    /// [`Session::call`] under the lock.
    pub fn call<R: FromReturn>(&self, export: &str, args: &[Arg<'_>]) -> Result<R> {
        self.with(|session| session.call(export, args))
    }

    /// Whether the underlying session was poisoned by a guest fault.
    pub fn is_poisoned(&self) -> bool {
        self.inner
            .lock()
            .map(|session| session.is_poisoned())
            .unwrap_or(true)
    }

    /// Close the underlying session.
    pub fn close(self) -> Result<()> {
        let session = self.inner.into_inner().map_err(|_| lock_poisoned())?;
        session.close();
        Ok(())
    }
}

fn lock_poisoned() -> SandboxError {
    SandboxError::Poisoned {
        reason: "session lock poisoned by a panicking caller".into(),
    }
}
