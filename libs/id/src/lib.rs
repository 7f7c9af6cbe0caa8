//! # warden-id
//!
//! Identifier types for resources handed out by the sandbox provisioning
//! service.
//!
//! ## Design Principles
//!
//! - IDs are assigned by the provider and treated as opaque strings
//! - Parsing is strict: empty strings, whitespace, path separators and
//!   control characters are rejected before an ID reaches a URL or a shell
//! - IDs are typed so an instance ID cannot be passed where a template ID
//!   is expected
//!
//! Examples of valid IDs:
//! - `sb-1`
//! - `i8f2kq0x3n5lq7w2c1d9a`
//! - `base`

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Longest ID accepted from the provider.
pub const MAX_ID_LEN: usize = 128;
