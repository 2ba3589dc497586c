//! Error metadata shared by every layer of the wrapper.

pub mod error_code;

pub use error_code::{Category, ErrorCode, Severity};
