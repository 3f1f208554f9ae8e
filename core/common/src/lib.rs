//! Common utilities and types shared across filerelay modules.
//!
//! This module provides the error type and the small identity/value types
//! that the cloud transport and the request orchestrator both speak.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Provider, RequestId, Security};
