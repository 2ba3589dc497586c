//! Long-lived session ownership for one configured database, and a registry
//! of managers keyed by name.

use std::sync::Arc;

use dashmap::DashMap;
use sea_orm::DatabaseConnection;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::db::factory::{get_session, SessionFactoryArgs};
use crate::db::session::{Session, SessionArgs, SessionInfo, SessionOptions};
use crate::error::AppError;
use crate::logging::pii::Redacted;

pub const NO_CONNECTION_MESSAGE: &str = "Failed to establish a database connection.";

/// Owns at most one live session and the engine behind it.
///
/// Teardown never fails; step failures are kept and reported once by
/// [`SessionManager::check`] or the next [`SessionManager::session`].
pub struct SessionManager {
    args: SessionFactoryArgs,
    engine: Option<Arc<DatabaseConnection>>,
    session: Option<Session>,
    errors: Vec<String>,
}

impl SessionManager {
    pub fn new(args: SessionFactoryArgs) -> Self {
        Self {
            args,
            engine: None,
            session: None,
            errors: Vec::new(),
        }
    }

    /// Manager whose sessions run on an engine created elsewhere.
    pub fn with_engine(
        args: SessionFactoryArgs,
        engine: impl Into<Arc<DatabaseConnection>>,
    ) -> Self {
        Self {
            engine: Some(engine.into()),
            ..Self::new(args)
        }
    }

    pub fn args(&self) -> &SessionFactoryArgs {
        &self.args
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    pub fn has_session(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_removed())
    }

    /// The live session, created on first use or after teardown.
    pub async fn session(&mut self) -> Result<&mut Session, AppError> {
        if !self.has_session() {
            self.check()?;
            let session = match self.engine.clone() {
                Some(engine) => {
                    let config_path = self.args.config_path();
                    Session::from_engine(
                        engine,
                        SessionInfo::new(&config_path, self.args.db_name.as_deref()),
                        SessionArgs::merged(&self.args.session_options),
                    )
                }
                None => {
                    let session = get_session(&self.args)
                        .await
                        .ok_or_else(|| AppError::connection(NO_CONNECTION_MESSAGE))?;
                    self.engine = Some(Arc::clone(session.engine()));
                    session
                }
            };
            debug!(
                ident_db_session = %session.info().ident_db_session,
                ident_db_config = %session.info().ident_db_config,
                "session_manager=created"
            );
            self.session = Some(session);
        }
        self.session
            .as_mut()
            .ok_or_else(|| AppError::session("session was not initialised"))
    }

    /// Changes the options for the current session and every later one.
    pub fn update_session_args(&mut self, options: SessionOptions) {
        let merged = SessionArgs::merged(&options);
        self.args.session_options = options;
        if let Some(session) = self.session.as_mut() {
            session.set_args(merged);
        }
    }

    pub fn expire_all(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.expire_all();
        }
    }

    /// Ends the current session: rollback when `exc`, then expire and remove.
    pub async fn teardown(&mut self, exc: bool) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let ident = session.info().ident_db_session.clone();
        if exc {
            if let Err(e) = session.rollback().await {
                self.record(&ident, "rollback", &e);
            }
        }
        session.expire_all();
        if let Err(e) = session.remove().await {
            self.record(&ident, "remove", &e);
        }
        debug!(ident_db_session = %ident, exc, "session_manager=teardown");
    }

    /// Tears down the session and closes the engine's pool. An engine still
    /// held elsewhere is only released.
    pub async fn shutdown_engine(&mut self) {
        self.teardown(false).await;
        if let Some(engine) = self.engine.take() {
            let label = self.args.label();
            let Some(engine) = Arc::into_inner(engine) else {
                debug!(config = %label, "session_manager=engine_released shared=true");
                return;
            };
            match engine.close().await {
                Ok(()) => info!(config = %label, "session_manager=engine_closed"),
                Err(e) => self.record(&label, "engine_close", &AppError::from(e)),
            }
        }
    }

    /// Reports and clears failures collected during teardown.
    pub fn check(&mut self) -> Result<(), AppError> {
        if self.errors.is_empty() {
            return Ok(());
        }
        let errors = std::mem::take(&mut self.errors);
        Err(AppError::session(format!(
            "{} cleanup step(s) failed: {}",
            errors.len(),
            errors.join("; ")
        )))
    }

    fn record(&mut self, ident: &str, step: &str, err: &AppError) {
        warn!(
            ident = %ident,
            raw_error = %Redacted(err),
            "session_manager=cleanup_failed step={}",
            step
        );
        self.errors.push(format!("{step}: {err}"));
    }
}

/// Named session managers shared across an application.
///
/// Each manager sits behind its own async mutex, so work on one database
/// never waits on another. Cloning shares the same registry.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    managers: Arc<DashMap<String, Arc<Mutex<SessionManager>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &self,
        name: &str,
        make: impl FnOnce() -> SessionManager,
    ) -> Arc<Mutex<SessionManager>> {
        self.managers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(make())))
            .value()
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Mutex<SessionManager>>> {
        self.managers.get(name).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Mutex<SessionManager>>> {
        self.managers.remove(name).map(|(_, manager)| manager)
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    /// Shuts down and forgets every manager; failures are aggregated.
    pub async fn shutdown_all(&self) -> Result<(), AppError> {
        let names: Vec<String> = self.managers.iter().map(|e| e.key().clone()).collect();
        let mut failures = Vec::new();
        for name in names {
            let Some(manager) = self.remove(&name) else {
                continue;
            };
            let mut manager = manager.lock().await;
            manager.shutdown_engine().await;
            if let Err(e) = manager.check() {
                failures.push(format!("{name}: {e}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(AppError::session(failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sea_orm::{DatabaseBackend, MockDatabase};
    use serde_json::json;

    use super::*;
    use crate::config::providers::{ConfigProvider, MemoryConfigProvider};
    use crate::db::factory::EngineArgs;
    use crate::infra::retry::RetryConnection;

    fn args() -> SessionFactoryArgs {
        let provider: Arc<dyn ConfigProvider> = Arc::new(MemoryConfigProvider::new(json!({
            "databases": {"main": {"username": "u", "password": "p", "host": "127.0.0.1", "port": 1}}
        })));
        SessionFactoryArgs::new(provider, &["databases", "main"])
            .engine_args(EngineArgs {
                connect_timeout_ms: Some(200),
                acquire_timeout_ms: Some(200),
                ..EngineArgs::default()
            })
            .retry(RetryConnection::new(1, Duration::from_millis(1)))
    }

    fn mock_manager() -> SessionManager {
        SessionManager::with_engine(
            args(),
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
        )
    }

    #[tokio::test]
    async fn session_is_reused_until_teardown() {
        let mut manager = mock_manager();
        assert!(!manager.has_session());

        let first = manager.session().await.unwrap().info().ident_db_session.clone();
        let again = manager.session().await.unwrap().info().ident_db_session.clone();
        assert_eq!(first, again);
        assert!(manager.has_session());

        manager.teardown(true).await;
        assert!(!manager.has_session());

        let fresh = manager.session().await.unwrap().info().ident_db_session.clone();
        assert_ne!(first, fresh);
        assert!(manager.check().is_ok());
    }

    #[tokio::test]
    async fn update_session_args_reaches_live_session() {
        let mut manager = mock_manager();
        manager.session().await.unwrap();
        manager.update_session_args(SessionOptions::default().autocommit(true));
        assert!(manager.session().await.unwrap().args().autocommit);

        manager.teardown(false).await;
        assert!(manager.session().await.unwrap().args().autocommit);
    }

    #[tokio::test]
    async fn shutdown_drops_engine_and_session() {
        let mut manager = mock_manager();
        manager.session().await.unwrap();
        manager.shutdown_engine().await;
        assert!(!manager.has_session());
        assert!(!manager.has_engine());
        assert!(manager.check().is_ok());
    }

    #[tokio::test]
    async fn shutdown_leaves_shared_engine_open() {
        let engine = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let mut manager = SessionManager::with_engine(args(), engine.clone());
        manager.session().await.unwrap();
        manager.shutdown_engine().await;
        assert!(!manager.has_engine());
        assert_eq!(Arc::strong_count(&engine), 1);
        assert!(manager.check().is_ok());
    }

    #[tokio::test]
    async fn unreachable_database_is_a_connection_error() {
        let mut manager = SessionManager::new(args());
        let err = manager.session().await.unwrap_err();
        assert!(err.is_connection_failure());
        assert!(err.to_string().contains(NO_CONNECTION_MESSAGE));
    }

    #[tokio::test]
    async fn recorded_failures_surface_once() {
        let mut manager = mock_manager();
        manager.record("s1", "rollback", &AppError::session("boom"));
        manager.record("s1", "remove", &AppError::session("bang"));

        let err = manager.session().await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("2 cleanup step(s) failed"));
        assert!(message.contains("rollback: Session error: boom"));

        assert!(manager.check().is_ok());
        assert!(manager.session().await.is_ok());
    }

    #[tokio::test]
    async fn registry_hands_out_one_manager_per_name() {
        let registry = SessionRegistry::new();
        let a = registry.get_or_create("main", mock_manager);
        let b = registry.get_or_create("main", || panic!("must reuse existing manager"));
        assert!(Arc::ptr_eq(&a, &b));
        registry.get_or_create("reports", mock_manager);
        assert_eq!(registry.len(), 2);

        a.lock().await.session().await.unwrap();

        registry.shutdown_all().await.unwrap();
        assert!(registry.is_empty());
        assert!(!a.lock().await.has_engine());
    }
}
