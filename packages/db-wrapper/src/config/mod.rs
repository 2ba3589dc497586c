//! Configuration: secret providers and connection-string assembly.

pub mod db;
pub mod providers;
pub mod secrets;

pub use db::{build_connection_string, connection_string, sanitize_connection_string};
pub use providers::{ConfigProvider, EnvConfigProvider, FileConfigProvider, MemoryConfigProvider};
pub use secrets::{LockedSecret, UnlockedSecret};
