pub mod db_errors;
pub mod retry;

pub use db_errors::{classify, requires_rollback, DbErrKind};
pub use retry::{Jitter, RetryConnection};
