//! Decoding of guest return words.
//!
//! A guest export returns one word.  [`FromReturn`] interprets it according to
//! the shape the caller expects:
//!
//! - `()`, `u32`, `u64`, `i32`: the word itself.
//! - `bool`: `1` is true.
//! - `Option<String>`: pointer to a NUL-terminated string.
//! - `Option<Vec<String>>`: pointer to a null-terminated array of strings.
//! - `Option<[u32; N]>`: pointer to exactly `N` words.
//! - `Option<Vec<u8>>`: pointer to bytes whose length the guest wrote into the
//!   frame's [`Arg::OutParam`](crate::Arg::OutParam).
//!
//! A null pointer decodes to `None`; what that means is up to the export.
//! Pointer results are owned by the host: every block is freed once its
//! contents have been copied out.

use crate::error::{Result, SandboxError};
use crate::frame::POINTER_SIZE;
use crate::session::Session;

/// First read size when scanning for a string terminator.  Doubles on each
/// miss, so long strings cost a logarithmic number of reads.
pub const INITIAL_WINDOW: usize = 64;

/// A completed call's return word, with the session it came from.
pub struct Returned<'a> {
    session: &'a mut Session,
    export: &'a str,
    word: u64,
    out_param: Option<u32>,
}

impl<'a> Returned<'a> {
    pub(crate) fn new(
        session: &'a mut Session,
        export: &'a str,
        word: u64,
        out_param: Option<u32>,
    ) -> Self {
        Self {
            session,
            export,
            word,
            out_param,
        }
    }

    /// The raw return word.
    pub fn word(&self) -> u64 {
        self.word
    }

    /// Export that produced the word.
    pub fn export(&self) -> &str {
        self.export
    }

    /// The word as a guest pointer; `None` when null.
    pub fn pointer(&self) -> Result<Option<u32>> {
        match self.word {
            0 => Ok(None),
            w => u32::try_from(w).map(Some).map_err(|_| {
                SandboxError::Decode(format!("{} returned a non-pointer word {w}", self.export))
            }),
        }
    }

    /// Scratch pointer of the frame's last [`Arg::OutParam`](crate::Arg::OutParam).
    pub fn out_param(&self) -> Option<u32> {
        self.out_param
    }

    pub fn session(&mut self) -> &mut Session {
        &mut *self.session
    }
}

/// Conversion from a guest return word into a host value.
pub trait FromReturn: Sized {
    fn from_return(ret: Returned<'_>) -> Result<Self>;
}

impl FromReturn for () {
    fn from_return(_: Returned<'_>) -> Result<Self> {
        Ok(())
    }
}

impl FromReturn for u64 {
    fn from_return(ret: Returned<'_>) -> Result<Self> {
        Ok(ret.word)
    }
}

impl FromReturn for u32 {
    fn from_return(ret: Returned<'_>) -> Result<Self> {
        Ok(ret.word as u32)
    }
}

impl FromReturn for i32 {
    fn from_return(ret: Returned<'_>) -> Result<Self> {
        Ok(ret.word as u32 as i32)
    }
}

impl FromReturn for bool {
    fn from_return(ret: Returned<'_>) -> Result<Self> {
        Ok(ret.word == 1)
    }
}

impl FromReturn for Option<String> {
    fn from_return(mut ret: Returned<'_>) -> Result<Self> {
        let Some(ptr) = ret.pointer()? else {
            return Ok(None);
        };
        let session = ret.session();
        let bytes = read_c_string(session, ptr)?;
        session.free(ptr)?;
        into_string(bytes).map(Some)
    }
}

impl FromReturn for Option<Vec<String>> {
    fn from_return(mut ret: Returned<'_>) -> Result<Self> {
        let Some(ptr) = ret.pointer()? else {
            return Ok(None);
        };
        let session = ret.session();
        let slots = read_pointer_list(session, ptr)?;

        let mut raw = Vec::with_capacity(slots.len());
        for &slot in &slots {
            raw.push(read_c_string(session, slot)?);
        }
        for &slot in &slots {
            session.free(slot)?;
        }
        session.free(ptr)?;

        raw.into_iter().map(into_string).collect::<Result<Vec<_>>>().map(Some)
    }
}

impl<const N: usize> FromReturn for Option<[u32; N]> {
    fn from_return(mut ret: Returned<'_>) -> Result<Self> {
        let Some(ptr) = ret.pointer()? else {
            return Ok(None);
        };
        let session = ret.session();
        let words = read_u32_array::<N>(session, ptr)?;
        session.free(ptr)?;
        Ok(Some(words))
    }
}

impl FromReturn for Option<Vec<u8>> {
    fn from_return(mut ret: Returned<'_>) -> Result<Self> {
        let out_param = ret.out_param.ok_or_else(|| SandboxError::Signature {
            export: ret.export.to_owned(),
            reason: "length-tagged result requires an OutParam argument".into(),
        })?;
        let Some(ptr) = ret.pointer()? else {
            return Ok(None);
        };
        let session = ret.session();
        let len = session.read_u32(out_param)? as usize;
        let bytes = session.read_vec(ptr, len)?;
        session.free(ptr)?;
        Ok(Some(bytes))
    }
}

// ── raw readers ──────────────────────────────────────────────────────

/// Bytes of the NUL-terminated string at `ptr`, without the terminator.
///
/// Reads a window of [`INITIAL_WINDOW`] bytes, doubling it until a
/// terminator turns up.  Windows are clamped to the end of memory, so a
/// string that runs off the end is a [`SandboxError::MemoryAccess`].
pub fn read_c_string(session: &Session, ptr: u32) -> Result<Vec<u8>> {
    let memory_size = session.memory_size();
    let mut offset = ptr as usize;
    let mut window = INITIAL_WINDOW;
    let mut out = Vec::new();

    loop {
        if offset >= memory_size {
            return Err(SandboxError::MemoryAccess {
                offset: offset as u64,
                len: window as u64,
            });
        }
        let n = window.min(memory_size - offset);
        let start = out.len();
        out.resize(start + n, 0);
        session.read_at(offset, &mut out[start..])?;

        if let Some(nul) = out[start..].iter().position(|&b| b == 0) {
            out.truncate(start + nul);
            return Ok(out);
        }
        offset += n;
        window = window.saturating_mul(2);
    }
}

/// Decode the string at `ptr` as UTF-8.
pub fn read_string(session: &Session, ptr: u32) -> Result<String> {
    into_string(read_c_string(session, ptr)?)
}

/// Pointer slots at `ptr` up to, not including, the first null slot.
pub fn read_pointer_list(session: &Session, ptr: u32) -> Result<Vec<u32>> {
    let mut slots = Vec::new();
    let mut at = ptr;
    loop {
        let slot = session.read_u32(at)?;
        if slot == 0 {
            return Ok(slots);
        }
        slots.push(slot);
        at = at.checked_add(POINTER_SIZE).ok_or(SandboxError::MemoryAccess {
            offset: u64::from(at),
            len: u64::from(POINTER_SIZE),
        })?;
    }
}

/// Strings referenced by the null-terminated array at `ptr`.
pub fn read_strings(session: &Session, ptr: u32) -> Result<Vec<String>> {
    read_pointer_list(session, ptr)?
        .into_iter()
        .map(|slot| read_string(session, slot))
        .collect()
}

/// Exactly `N` little-endian words at `ptr`.
pub fn read_u32_array<const N: usize>(session: &Session, ptr: u32) -> Result<[u32; N]> {
    let mut words = [0u32; N];
    let mut buf = vec![0u8; N * 4];
    session.read(ptr, &mut buf)?;
    for (word, chunk) in words.iter_mut().zip(buf.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(words)
}

fn into_string(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| SandboxError::Decode(format!("guest string is not UTF-8: {e}")))
}
