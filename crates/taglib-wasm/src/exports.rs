//! Names of the guest exports this crate calls.
//!
//! These strings are the contract with the TagLib module; a mismatch shows up
//! as [`SandboxError::MissingExport`](taglib_sandbox::SandboxError::MissingExport)
//! at call time.

// ── stateless, path-based ────────────────────────────────────────────

/// `char **taglib_file_tags(const char *path)`: `KEY\tV1\vV2` rows, or null
/// if the file is not recognised.
pub const FILE_TAGS: &str = "taglib_file_tags";
/// `bool taglib_file_write_tags(const char *path, const char **rows, uint8_t opts)`.
pub const FILE_WRITE_TAGS: &str = "taglib_file_write_tags";
/// `int *taglib_file_audioproperties(const char *path)`: four ints, or null.
pub const FILE_AUDIO_PROPERTIES: &str = "taglib_file_audioproperties";
/// `uint8_t *taglib_file_read_image(const char *path, uint32_t *len)`.
pub const FILE_READ_IMAGE: &str = "taglib_file_read_image";
/// `bool taglib_file_write_image(const char *path, const uint8_t *buf, uint32_t len)`.
pub const FILE_WRITE_IMAGE: &str = "taglib_file_write_image";

// ── handle-based ─────────────────────────────────────────────────────

pub const FILE_NEW: &str = "taglib_file_new";
pub const FILE_IS_VALID: &str = "taglib_file_is_valid";
pub const PROPERTY_KEYS: &str = "taglib_property_keys";
pub const PROPERTY_GET: &str = "taglib_property_get";
/// A null value clears the key.
pub const PROPERTY_SET: &str = "taglib_property_set";
pub const PROPERTY_SET_APPEND: &str = "taglib_property_set_append";
pub const HANDLE_AUDIO_PROPERTIES: &str = "taglib_handle_audioproperties";
pub const HANDLE_READ_IMAGE: &str = "taglib_handle_read_image";
pub const HANDLE_WRITE_IMAGE: &str = "taglib_handle_write_image";
pub const FILE_SAVE: &str = "taglib_file_save";
pub const FILE_FREE: &str = "taglib_file_free";

/// Size of the length out-parameter for image reads.
pub(crate) const LENGTH_OUT_PARAM: u32 = 4;
