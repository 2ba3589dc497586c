#![deny(clippy::wildcard_imports)]
#![cfg_attr(test, allow(clippy::wildcard_imports))]

pub mod config;
pub mod datatools;
pub mod db;
pub mod error;
pub mod errors;
pub mod helpers;
pub mod infra;
pub mod logging;
pub mod telemetry;

#[cfg(test)]
pub mod test_bootstrap;

// Re-exports for public API
pub use config::providers::{ConfigProvider, EnvConfigProvider, FileConfigProvider, MemoryConfigProvider};
pub use datatools::attributes::{Attribute, AttributesCollection};
pub use db::factory::{get_session, open_session, EngineArgs, SessionFactoryArgs};
pub use db::filters::{Col, Filter};
pub use db::joins::{Join, JoinKind};
pub use db::manager::{SessionManager, SessionRegistry};
pub use db::query_retry::QueryRetryPolicy;
pub use db::request::{AttributeSubquery, FetchResult, GetResultType, OrderBy, QueryRequest};
pub use db::session::{Session, SessionOptions};
pub use db::wrapper::DbWrapper;
pub use error::AppError;
pub use infra::retry::RetryConnection;
pub use telemetry::{init_tracing, LogSettings};

// Auto-initialize logging for unit tests
#[cfg(test)]
#[ctor::ctor]
fn init_test_logging() {
    test_bootstrap::logging::init();
}
