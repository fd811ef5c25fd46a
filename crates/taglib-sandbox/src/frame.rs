//! Call frames and argument encoding.
//!
//! Every guest export takes and returns machine words.  [`Arg`] describes a
//! host value and [`CallFrame`] turns a list of them into words, copying
//! variable-length values into guest allocations:
//!
//! | arg | word | guest allocation |
//! |-----|------|------------------|
//! | `Bool` | 0 / 1 | none |
//! | `U8` / `U32` / `U64` | zero-extended | none |
//! | `Str` | pointer | `len + 1` bytes, NUL-terminated |
//! | `Strs` | pointer | `(n + 1)` slots, slot `n` null; one `Str` per element |
//! | `Bytes` | pointer (null if empty) | `len` bytes, no terminator |
//! | `OutParam` | pointer | `size` zeroed bytes the guest writes a result into |
//!
//! Every allocation is recorded the moment it is obtained, so releasing the
//! frame frees exactly what was allocated even when encoding stopped halfway.

use crate::error::{Result, SandboxError};
use crate::session::Session;

/// Size in bytes of one guest pointer slot.
pub const POINTER_SIZE: u32 = 4;

/// One argument to a guest export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg<'a> {
    Bool(bool),
    U8(u8),
    U32(u32),
    U64(u64),
    /// UTF-8 string passed as `const char *`.
    Str(&'a str),
    /// Strings passed as a null-terminated `const char **`.
    Strs(&'a [String]),
    /// Raw bytes passed as a pointer; the length travels as a separate arg.
    Bytes(&'a [u8]),
    /// Zeroed scratch space of the given size for the guest to fill.  The
    /// last one in a frame is where length-tagged results read their length.
    OutParam(u32),
}

impl Arg<'_> {
    /// A null pointer.
    pub const NULL: Arg<'static> = Arg::U32(0);
}

impl From<bool> for Arg<'_> {
    fn from(v: bool) -> Self {
        Arg::Bool(v)
    }
}

impl From<u8> for Arg<'_> {
    fn from(v: u8) -> Self {
        Arg::U8(v)
    }
}

impl From<u32> for Arg<'_> {
    fn from(v: u32) -> Self {
        Arg::U32(v)
    }
}

impl From<u64> for Arg<'_> {
    fn from(v: u64) -> Self {
        Arg::U64(v)
    }
}

impl<'a> From<&'a str> for Arg<'a> {
    fn from(v: &'a str) -> Self {
        Arg::Str(v)
    }
}

impl<'a> From<&'a String> for Arg<'a> {
    fn from(v: &'a String) -> Self {
        Arg::Str(v)
    }
}

impl<'a> From<&'a [String]> for Arg<'a> {
    fn from(v: &'a [String]) -> Self {
        Arg::Strs(v)
    }
}

impl<'a> From<&'a [u8]> for Arg<'a> {
    fn from(v: &'a [u8]) -> Self {
        Arg::Bytes(v)
    }
}

/// Encoded words plus the guest allocations backing them, for one call.
#[derive(Debug)]
pub(crate) struct CallFrame {
    export: String,
    words: Vec<u64>,
    allocations: Vec<u32>,
    out_param: Option<u32>,
}

impl CallFrame {
    pub(crate) fn new(export: &str, arity: usize) -> Self {
        Self {
            export: export.to_owned(),
            words: Vec::with_capacity(arity),
            allocations: Vec::with_capacity(arity),
            out_param: None,
        }
    }

    /// Encode one argument, allocating in `session` as needed.
    pub(crate) fn push(&mut self, session: &mut Session, arg: &Arg<'_>) -> Result<()> {
        let word = match *arg {
            Arg::Bool(v) => u64::from(v),
            Arg::U8(v) => u64::from(v),
            Arg::U32(v) => u64::from(v),
            Arg::U64(v) => v,
            Arg::Str(s) => u64::from(self.alloc_c_string(session, s)?),
            Arg::Strs(list) => u64::from(self.alloc_string_array(session, list)?),
            Arg::Bytes(bytes) if bytes.is_empty() => 0,
            Arg::Bytes(bytes) => {
                let ptr = self.alloc(session, bytes.len())?;
                session.write(ptr, bytes)?;
                u64::from(ptr)
            }
            Arg::OutParam(size) => {
                let ptr = self.alloc(session, size as usize)?;
                session.write(ptr, &vec![0; size as usize])?;
                self.out_param = Some(ptr);
                u64::from(ptr)
            }
        };
        self.words.push(word);
        Ok(())
    }

    pub(crate) fn words(&self) -> &[u64] {
        &self.words
    }

    pub(crate) fn out_param(&self) -> Option<u32> {
        self.out_param
    }

    /// Free every tracked allocation.  All frees are attempted; the first
    /// error is returned.
    pub(crate) fn release(self, session: &mut Session) -> Result<()> {
        let mut first_err = None;
        for ptr in self.allocations {
            if let Err(e) = session.free(ptr) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drop the frame without freeing; only for sessions being discarded.
    pub(crate) fn abandon(self) {
        tracing::debug!(
            export = %self.export,
            allocations = self.allocations.len(),
            "abandoning frame of poisoned session"
        );
    }

    fn alloc(&mut self, session: &mut Session, size: usize) -> Result<u32> {
        let size = u32::try_from(size).map_err(|_| self.too_large(size))?;
        let ptr = session.malloc(size)?;
        self.allocations.push(ptr);
        Ok(ptr)
    }

    fn alloc_c_string(&mut self, session: &mut Session, s: &str) -> Result<u32> {
        if s.as_bytes().contains(&0) {
            return Err(SandboxError::Signature {
                export: self.export.clone(),
                reason: "string argument contains an interior NUL".into(),
            });
        }
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);

        let ptr = self.alloc(session, bytes.len())?;
        session.write(ptr, &bytes)?;
        Ok(ptr)
    }

    fn alloc_string_array(&mut self, session: &mut Session, list: &[String]) -> Result<u32> {
        let slots = list.len() + 1;
        let block = self.alloc(session, slots * POINTER_SIZE as usize)?;
        for (i, s) in list.iter().enumerate() {
            let ptr = self.alloc_c_string(session, s)?;
            session.write_u32(block + i as u32 * POINTER_SIZE, ptr)?;
        }
        session.write_u32(block + list.len() as u32 * POINTER_SIZE, 0)?;
        Ok(block)
    }

    fn too_large(&self, size: usize) -> SandboxError {
        SandboxError::Signature {
            export: self.export.clone(),
            reason: format!("argument of {size} bytes exceeds the guest address space"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_pick_the_right_kind() {
        assert_eq!(Arg::from(true), Arg::Bool(true));
        assert_eq!(Arg::from(7u8), Arg::U8(7));
        assert_eq!(Arg::from(7u32), Arg::U32(7));
        assert_eq!(Arg::from(7u64), Arg::U64(7));
        assert_eq!(Arg::from("a"), Arg::Str("a"));

        let owned = String::from("b");
        assert_eq!(Arg::from(&owned), Arg::Str("b"));

        let list = vec!["x".to_string()];
        assert_eq!(Arg::from(list.as_slice()), Arg::Strs(&list));

        let bytes = [1u8, 2, 3];
        assert_eq!(Arg::from(&bytes[..]), Arg::Bytes(&bytes));
    }

    #[test]
    fn null_is_zero_word() {
        assert_eq!(Arg::NULL, Arg::U32(0));
    }

    #[test]
    fn new_frame_is_empty() {
        let frame = CallFrame::new("f", 3);
        assert!(frame.words().is_empty());
        assert!(frame.out_param().is_none());
    }
}
