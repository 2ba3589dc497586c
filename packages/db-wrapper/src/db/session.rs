//! One unit of work against one engine.

use std::sync::Arc;

use futures::future::BoxFuture;
use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, TransactionTrait};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::db::query_retry::{retry_query, QueryRetryPolicy, Replay};
use crate::error::AppError;
use crate::logging::pii::Redacted;

/// Correlation data attached to every session and logged with its activity.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub ident_db_session: String,
    pub ident_db_config: String,
    pub ident_db_name: Option<String>,
    pub extra: Map<String, Value>,
}

impl SessionInfo {
    pub fn new(config_path: &[&str], db_name: Option<&str>) -> Self {
        Self {
            ident_db_session: new_session_ident(),
            ident_db_config: config_path.join("."),
            ident_db_name: db_name.map(str::to_string),
            extra: Map::new(),
        }
    }
}

/// `<unix-timestamp-nanos>_<uuid-v4-simple>`
pub fn new_session_ident() -> String {
    format!(
        "{}_{}",
        time::OffsetDateTime::now_utc().unix_timestamp_nanos(),
        uuid::Uuid::new_v4().simple()
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionArgs {
    /// Commit after every successful `run_query`.
    pub autocommit: bool,
    pub expire_on_commit: bool,
    pub query_retry: QueryRetryPolicy,
    pub info: Map<String, Value>,
}

impl Default for SessionArgs {
    fn default() -> Self {
        Self {
            autocommit: false,
            expire_on_commit: true,
            query_retry: QueryRetryPolicy::default(),
            info: Map::new(),
        }
    }
}

/// Caller overrides; unset fields keep the [`SessionArgs`] defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOptions {
    pub autocommit: Option<bool>,
    pub expire_on_commit: Option<bool>,
    pub query_retry: Option<QueryRetryPolicy>,
    pub info: Option<Map<String, Value>>,
}

impl SessionOptions {
    pub fn expire_on_commit(mut self, value: bool) -> Self {
        self.expire_on_commit = Some(value);
        self
    }

    pub fn autocommit(mut self, value: bool) -> Self {
        self.autocommit = Some(value);
        self
    }

    pub fn query_retry(mut self, policy: QueryRetryPolicy) -> Self {
        self.query_retry = Some(policy);
        self
    }
}

impl SessionArgs {
    pub fn merged(options: &SessionOptions) -> Self {
        let defaults = Self::default();
        Self {
            autocommit: options.autocommit.unwrap_or(defaults.autocommit),
            expire_on_commit: options.expire_on_commit.unwrap_or(defaults.expire_on_commit),
            query_retry: options
                .query_retry
                .clone()
                .unwrap_or(defaults.query_retry),
            info: options.info.clone().unwrap_or(defaults.info),
        }
    }
}

/// A session owns at most one open transaction on its engine and begins it
/// on first use.
///
/// Sessions are not shared: every operation takes `&mut self`.
pub struct Session {
    engine: Arc<DatabaseConnection>,
    txn: Option<DatabaseTransaction>,
    /// The open transaction holds work that a fresh one would not replay.
    dirty: bool,
    info: SessionInfo,
    args: SessionArgs,
    owns_engine: bool,
    removed: bool,
    expirations: u64,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("info", &self.info)
            .field("in_transaction", &self.txn.is_some())
            .field("dirty", &self.dirty)
            .field("removed", &self.removed)
            .finish()
    }
}

impl Session {
    /// Binds a session to an engine someone else owns and disposes.
    pub fn from_engine(
        engine: impl Into<Arc<DatabaseConnection>>,
        mut info: SessionInfo,
        args: SessionArgs,
    ) -> Self {
        info.extra.extend(args.info.clone());
        Self {
            engine: engine.into(),
            txn: None,
            dirty: false,
            info,
            args,
            owns_engine: false,
            removed: false,
            expirations: 0,
        }
    }

    /// Binds a session to an engine created for it; [`Session::dispose`]
    /// closes the engine too.
    pub(crate) fn owning_engine(
        engine: DatabaseConnection,
        info: SessionInfo,
        args: SessionArgs,
    ) -> Self {
        let mut session = Self::from_engine(engine, info, args);
        session.owns_engine = true;
        session
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn args(&self) -> &SessionArgs {
        &self.args
    }

    pub fn engine(&self) -> &Arc<DatabaseConnection> {
        &self.engine
    }

    pub fn owns_engine(&self) -> bool {
        self.owns_engine
    }

    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    /// True while the open transaction carries work that has not been
    /// committed or rolled back.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Number of times `expire_all` has run on this session.
    pub fn expirations(&self) -> u64 {
        self.expirations
    }

    /// Replaces the session arguments; takes effect from the next operation.
    pub fn set_args(&mut self, args: SessionArgs) {
        self.info.extra.extend(args.info.clone());
        self.args = args;
    }

    async fn begin_if_needed(&mut self) -> Result<(), DbErr> {
        if self.removed {
            return Err(DbErr::Custom(format!(
                "session {} has been removed",
                self.info.ident_db_session
            )));
        }
        if self.txn.is_none() {
            self.txn = Some(self.engine.begin().await?);
            debug!(
                ident_db_session = %self.info.ident_db_session,
                "session=begin"
            );
        }
        Ok(())
    }

    fn current_txn(&self) -> Result<&DatabaseTransaction, DbErr> {
        self.txn
            .as_ref()
            .ok_or_else(|| DbErr::Custom("transaction was not started".into()))
    }

    /// The session's transaction, begun if necessary.
    ///
    /// Whatever the caller does with it is treated as work the session must
    /// not lose, so later transient failures are no longer retried.
    pub async fn connection(&mut self) -> Result<&DatabaseTransaction, AppError> {
        self.begin_if_needed().await?;
        self.dirty = true;
        Ok(self.current_txn()?)
    }

    pub async fn commit(&mut self) -> Result<(), AppError> {
        if let Some(txn) = self.txn.take() {
            self.dirty = false;
            txn.commit().await?;
            debug!(ident_db_session = %self.info.ident_db_session, "session=commit");
            if self.args.expire_on_commit {
                self.expire_all();
            }
        }
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<(), AppError> {
        if let Some(txn) = self.txn.take() {
            self.dirty = false;
            txn.rollback().await?;
            debug!(ident_db_session = %self.info.ident_db_session, "session=rollback");
        }
        Ok(())
    }

    /// Invalidates session-held state. Models already handed out are plain
    /// values and are unaffected.
    pub fn expire_all(&mut self) {
        self.expirations += 1;
    }

    /// Releases the connection, rolling back any open transaction.
    pub async fn close(&mut self) -> Result<(), AppError> {
        self.rollback().await
    }

    /// Closes the session and marks it unusable.
    pub async fn remove(&mut self) -> Result<(), AppError> {
        let closed = self.close().await;
        self.removed = true;
        closed
    }

    /// Removes the session and, if it owns its engine, closes the pool.
    pub async fn dispose(mut self) -> Result<(), AppError> {
        let removed = self.remove().await;
        if self.owns_engine {
            match Arc::try_unwrap(self.engine) {
                Ok(engine) => engine.close().await?,
                Err(_) => debug!(
                    ident_db_session = %self.info.ident_db_session,
                    "session=dispose engine_still_shared"
                ),
            }
        }
        removed
    }

    /// Runs `query` against the session transaction, retrying transient
    /// disconnects with exponential backoff.
    ///
    /// `query` is called once per attempt and must rebuild the whole query.
    /// A retry runs on a fresh transaction, so it is only attempted while
    /// the session holds no earlier work; otherwise the first transient
    /// failure is terminal. On a terminal failure the session is rolled back
    /// (if the error calls for it), closed, and removed; the original `DbErr`
    /// is returned.
    pub async fn run_query<T, F>(&mut self, query: F) -> Result<T, AppError>
    where
        T: Send,
        F: for<'t> FnMut(&'t DatabaseTransaction) -> BoxFuture<'t, Result<T, DbErr>> + Send,
    {
        let policy = self.args.query_retry.clone();
        let outcome = {
            let mut attempt = QueryAttempt {
                session: &mut *self,
                query,
            };
            retry_query(&policy, &mut attempt, |attempt, n| Box::pin(attempt.run(n))).await
        };

        match outcome {
            Ok(value) => {
                self.dirty = true;
                if self.args.autocommit {
                    self.commit().await?;
                }
                Ok(value)
            }
            Err(failure) => {
                warn!(
                    ident_db_session = %self.info.ident_db_session,
                    raw_error = %Redacted(&failure.error),
                    "query_retry=terminal attempt={} kind={:?} rollback={}",
                    failure.attempts,
                    failure.kind,
                    failure.should_rollback
                );
                self.abandon(failure.should_rollback).await;
                Err(AppError::Query(failure.error))
            }
        }
    }

    /// Drops a transaction whose connection is presumed dead so the next
    /// attempt checks out a fresh one.
    async fn discard_transaction(&mut self) {
        if let Some(txn) = self.txn.take() {
            self.dirty = false;
            if let Err(e) = txn.rollback().await {
                debug!(raw_error = %Redacted(&e), "session=discard rollback_failed");
            }
        }
    }

    async fn abandon(&mut self, should_rollback: bool) {
        if should_rollback {
            if let Err(e) = self.rollback().await {
                warn!(
                    ident_db_session = %self.info.ident_db_session,
                    raw_error = %Redacted(&e),
                    "session=rollback_failed"
                );
            }
        }
        self.expire_all();
        if let Err(e) = self.remove().await {
            warn!(
                ident_db_session = %self.info.ident_db_session,
                raw_error = %Redacted(&e),
                "session=remove_failed"
            );
        }
    }
}

/// One `run_query` call as seen by [`retry_query`].
struct QueryAttempt<'a, F> {
    session: &'a mut Session,
    query: F,
}

impl<F> QueryAttempt<'_, F> {
    async fn run<T>(&mut self, attempt: u32) -> Result<T, DbErr>
    where
        F: for<'t> FnMut(&'t DatabaseTransaction) -> BoxFuture<'t, Result<T, DbErr>>,
    {
        if attempt > 1 {
            self.session.discard_transaction().await;
        }
        debug!(
            ident_db_session = %self.session.info.ident_db_session,
            "query_retry=attempting attempt={} max_attempts={}",
            attempt,
            self.session.args.query_retry.max_attempts
        );
        self.session.begin_if_needed().await?;
        let txn = self.session.current_txn()?;
        (self.query)(txn).await
    }
}

impl<F> Replay for QueryAttempt<'_, F> {
    fn can_replay(&self) -> bool {
        !self.session.dirty
    }
}
