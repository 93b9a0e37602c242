//! Common utilities and types shared across Strata modules.
//!
//! This module provides the closed error taxonomy and the small value types
//! that every other crate in the workspace speaks.

pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use types::{ObjectKey, OwnerId, SecretString};
