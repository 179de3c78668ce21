//! Watchstate-Common: shared error type and small cross-cutting utilities
//! used by every other watchstate crate.
//!
//! # Examples
//!
//! ```
//! use watchstate_common::{Error, Result};
//!
//! fn example() -> Result<()> {
//!     Err(Error::not_found("state 1"))
//! }
//! ```

pub mod error;
pub mod json;

pub use error::{Error, Result};
