//! Sessions, retries, query composition and the wrapper built on them.

pub mod factory;
pub mod filters;
pub mod joins;
pub mod manager;
pub mod query_retry;
pub mod request;
pub mod session;
pub mod wrapper;

pub use factory::{get_session, open_session, EngineArgs, SessionFactoryArgs};
pub use filters::{process_filters, Col, Comparison, Filter, Pattern};
pub use joins::{apply_joins, Join, JoinKind, JoinOn};
pub use manager::{SessionManager, SessionRegistry, NO_CONNECTION_MESSAGE};
pub use query_retry::{retry_query, QueryRetryPolicy, Replay, RetryDecision, RetryFailure};
pub use request::{AttributeSubquery, FetchResult, GetResultType, OrderBy, QueryRequest};
pub use session::{Session, SessionArgs, SessionInfo, SessionOptions};
pub use wrapper::{DbWrapper, DbWrapperBuilder, DEFAULT_SAFE_SCOPE_MESSAGE};
