//! Read and write audio metadata through TagLib compiled to WebAssembly.
//!
//! The guest runs inside [`taglib_sandbox`]: it only sees the directory of the
//! file being processed, and a crash inside it surfaces as an error instead of
//! taking down the process.
//!
//! Two styles are offered:
//!
//! - **Stateless** -- [`read_tags`], [`write_tags`], [`read_properties`],
//!   [`read_image`], [`write_image`] and [`clear_images`] each process one
//!   file in a throwaway session and are safe to call from many threads.
//! - **Handle** -- [`File`] keeps the file parsed across calls and writes on
//!   [`File::save`].
//!
//! The guest binary is embedded with the `bundled` feature or loaded from
//! `TAGLIB_WASM_PATH`; see [`configure`] to set it programmatically.
//!
//! ```no_run
//! use taglib_wasm::{tags, WriteOptions};
//!
//! let mut t = taglib_wasm::read_tags("song.flac")?;
//! t.insert(tags::TITLE.into(), vec!["New title".into()]);
//! taglib_wasm::write_tags("song.flac", &t, WriteOptions::DIFF_BEFORE_WRITE)?;
//! # Ok::<(), taglib_wasm::TaglibError>(())
//! ```

pub mod error;
pub mod exports;
pub mod file;
pub mod library;
pub mod properties;
pub mod tags;

pub use error::{Result, TaglibError};
pub use file::File;
pub use library::{
    Taglib, WriteOptions, clear_images, configure, read_image, read_properties, read_tags,
    write_image, write_tags,
};
pub use properties::AudioProperties;
pub use tags::Tags;

pub use taglib_sandbox::{SandboxConfig, SandboxError};
