//! Test support for the database wrapper
//!
//! Entities shared by unit and integration tests, an in-memory SQLite engine
//! carrying their schema, and unified logging initialization.

pub mod entities;
pub mod logging;
pub mod sqlite;
pub mod unique_helpers;
