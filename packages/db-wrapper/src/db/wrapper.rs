//! High-level, session-scoped access for application code.
//!
//! Every public operation validates its arguments first, then runs inside
//! one session scope: a fresh session, one transaction, commit on success,
//! rollback on failure, session released afterwards.

use std::sync::Arc;

use futures::future::BoxFuture;
use sea_orm::sea_query::{Query, SelectStatement, SimpleExpr};
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection,
    DatabaseTransaction, DbErr, EntityName, EntityTrait, IntoActiveModel, Iterable, JsonValue,
    PrimaryKeyToColumn, QueryFilter, QueryOrder, QuerySelect, Select,
};
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use tracing::{debug, error, warn};

use crate::config::providers::ConfigProvider;
use crate::db::factory::{get_session, EngineArgs, SessionFactoryArgs};
use crate::db::filters::process_filters;
use crate::db::joins::apply_joins;
use crate::db::manager::NO_CONNECTION_MESSAGE;
use crate::db::query_retry::QueryRetryPolicy;
use crate::db::request::{AttributeSubquery, FetchResult, GetResultType, QueryRequest};
use crate::db::session::{Session, SessionArgs, SessionInfo, SessionOptions};
use crate::error::AppError;
use crate::infra::retry::RetryConnection;
use crate::logging::pii::Redacted;

pub const DEFAULT_SAFE_SCOPE_MESSAGE: &str = "Database operation failed";

const NO_ROW_MESSAGE: &str = "No row was found when one was required";
const MULTIPLE_ROWS_MESSAGE: &str = "Multiple rows were found when exactly one was required";

type ModelOf<A> = <<A as ActiveModelTrait>::Entity as EntityTrait>::Model;

pub struct DbWrapperBuilder {
    provider: Arc<dyn ConfigProvider>,
    config_path: Vec<String>,
    db_name: Option<String>,
    engine_args: EngineArgs,
    retry: RetryConnection,
    query_retry: QueryRetryPolicy,
    shared_engine: Option<Arc<DatabaseConnection>>,
}

impl DbWrapperBuilder {
    pub fn db_name(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = Some(db_name.into());
        self
    }

    pub fn engine_args(mut self, engine_args: EngineArgs) -> Self {
        self.engine_args = engine_args;
        self
    }

    pub fn retry(mut self, retry: RetryConnection) -> Self {
        self.retry = retry;
        self
    }

    pub fn query_retry(mut self, policy: QueryRetryPolicy) -> Self {
        self.query_retry = policy;
        self
    }

    /// Run every scope on `engine` instead of creating one per scope.
    pub fn shared_engine(mut self, engine: impl Into<Arc<DatabaseConnection>>) -> Self {
        self.shared_engine = Some(engine.into());
        self
    }

    pub fn build(self) -> DbWrapper {
        DbWrapper {
            provider: self.provider,
            config_path: self.config_path,
            db_name: self.db_name,
            engine_args: self.engine_args,
            retry: self.retry,
            query_retry: self.query_retry,
            shared_engine: self.shared_engine,
        }
    }
}

pub struct DbWrapper {
    provider: Arc<dyn ConfigProvider>,
    config_path: Vec<String>,
    db_name: Option<String>,
    engine_args: EngineArgs,
    retry: RetryConnection,
    query_retry: QueryRetryPolicy,
    shared_engine: Option<Arc<DatabaseConnection>>,
}

impl std::fmt::Debug for DbWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbWrapper")
            .field("config_path", &self.config_path)
            .field("db_name", &self.db_name)
            .field("shared_engine", &self.shared_engine.is_some())
            .finish_non_exhaustive()
    }
}

impl DbWrapper {
    pub fn builder<S: AsRef<str>>(
        provider: Arc<dyn ConfigProvider>,
        config_path: &[S],
    ) -> DbWrapperBuilder {
        DbWrapperBuilder {
            provider,
            config_path: config_path.iter().map(|s| s.as_ref().to_string()).collect(),
            db_name: None,
            engine_args: EngineArgs::default(),
            retry: RetryConnection::default(),
            query_retry: QueryRetryPolicy::default(),
            shared_engine: None,
        }
    }

    /// Logical database name from the secret's `database` key.
    pub fn db_name(&self) -> Result<Option<String>, AppError> {
        self.secret_str("database")
    }

    pub fn schema(&self) -> Result<Option<String>, AppError> {
        self.secret_str("schema")
    }

    pub fn current_datetime(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    fn secret_str(&self, key: &str) -> Result<Option<String>, AppError> {
        let path: Vec<&str> = self.config_path.iter().map(String::as_str).collect();
        let secret = self.provider.provide(&path)?;
        Ok(secret.with_unlocked(|s| s.get_str(key).map(str::to_string)))
    }

    fn factory_args(&self, expire_on_commit: bool) -> SessionFactoryArgs {
        let mut args = SessionFactoryArgs::new(self.provider.clone(), &self.config_path)
            .engine_args(self.engine_args.clone())
            .retry(self.retry.clone())
            .session_options(
                SessionOptions::default()
                    .expire_on_commit(expire_on_commit)
                    .query_retry(self.query_retry.clone()),
            );
        if let Some(db_name) = &self.db_name {
            args = args.db_name(db_name.clone());
        }
        args
    }

    async fn open(&self, expire_on_commit: bool) -> Result<Session, AppError> {
        let args = self.factory_args(expire_on_commit);
        match &self.shared_engine {
            Some(engine) => {
                let config_path = args.config_path();
                Ok(Session::from_engine(
                    Arc::clone(engine),
                    SessionInfo::new(&config_path, args.db_name.as_deref()),
                    SessionArgs::merged(&args.session_options),
                ))
            }
            None => get_session(&args)
                .await
                .ok_or_else(|| AppError::connection(NO_CONNECTION_MESSAGE)),
        }
    }

    /// Runs `f` in a fresh session: commit on `Ok`, rollback on `Err`, and
    /// the session released either way.
    pub async fn session_scope<R, F>(&self, expire_on_commit: bool, f: F) -> Result<R, AppError>
    where
        R: Send,
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<R, AppError>> + Send,
    {
        let mut session = self.open(expire_on_commit).await?;
        let ident = session.info().ident_db_session.clone();
        debug!(ident_db_session = %ident, "session_scope=enter");

        let outcome = match f(&mut session).await {
            Ok(value) => match session.commit().await {
                Ok(()) => Ok(value),
                Err(e) => Err(rollback_after(&mut session, e).await),
            },
            Err(e) => Err(rollback_after(&mut session, e).await),
        };

        let released = if session.owns_engine() {
            session.dispose().await
        } else {
            session.remove().await
        };
        if let Err(e) = released {
            warn!(ident_db_session = %ident, raw_error = %Redacted(&e), "session_scope=release_failed");
        }
        debug!(ident_db_session = %ident, ok = outcome.is_ok(), "session_scope=exit");
        outcome
    }

    /// [`DbWrapper::session_scope`], with any failure logged and replaced by
    /// a generic `AppError::Database` carrying `message`.
    pub async fn safe_session_scope<R, F>(
        &self,
        message: Option<&str>,
        expire_on_commit: bool,
        f: F,
    ) -> Result<R, AppError>
    where
        R: Send,
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<R, AppError>> + Send,
    {
        let message = message
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_SAFE_SCOPE_MESSAGE);
        self.session_scope(expire_on_commit, f).await.map_err(|e| {
            error!(
                code = %e.code(),
                raw_error = %Redacted(&e),
                "db_wrapper=operation_failed message={}",
                message
            );
            AppError::database(message)
        })
    }

    /// Builds the main query: joins, filters, ordering, limit.
    fn build_select<E: EntityTrait>(
        &self,
        select: Select<E>,
        request: &QueryRequest<E>,
        message: &str,
    ) -> Result<Select<E>, AppError> {
        let conditions = process_filters(&request.filters, message, request.at_least_one_filter)?;
        let order = request
            .order_by
            .as_ref()
            .map(|o| o.resolve::<E>())
            .transpose()?;

        let mut select = apply_joins(select, &request.joins);
        for condition in conditions {
            select = select.filter(condition);
        }
        if let Some((column, order)) = order {
            select = select.order_by(column, order);
        }
        if let Some(limit) = request.limit {
            select = select.limit(limit);
        }
        if request.return_type == GetResultType::Distinct {
            select = select.distinct();
        }
        Ok(select)
    }

    /// Fetches full models for `request`.
    pub async fn get_with_filters<E>(
        &self,
        request: QueryRequest<E>,
    ) -> Result<FetchResult<E, E::Model>, AppError>
    where
        E: EntityTrait,
    {
        let message = request.message();
        if !request.columns.is_empty() {
            return Err(AppError::bad_arguments(
                "Column projections are fetched with get_columns_with_filters",
            ));
        }
        let select = self.build_select(E::find(), &request, &message)?;
        self.fetch_models(select, &request, message).await
    }

    /// Fetches the requested columns only, one JSON object per row keyed by
    /// column name.
    pub async fn get_columns_with_filters<E>(
        &self,
        request: QueryRequest<E>,
    ) -> Result<FetchResult<E, JsonValue>, AppError>
    where
        E: EntityTrait,
    {
        let message = request.message();
        if request.columns.is_empty() {
            return Err(AppError::bad_arguments(
                "At least one column must be selected",
            ));
        }
        let mut select = self.build_select(E::find(), &request, &message)?;
        select = select.select_only();
        for col in &request.columns {
            select = select.column_as(SimpleExpr::from(col.expr()), col.name());
        }
        if request.return_type == GetResultType::QueryOnly {
            return Ok(FetchResult::Query(select));
        }

        let limit = row_limit(request.return_type, request.limit);
        let rows = self
            .fetch_rows(&message, request.expire_on_commit, move |txn| {
                let query = with_limit(select.clone(), limit);
                Box::pin(async move { query.into_json().all(txn).await })
            })
            .await?;
        shape(request.return_type, rows)
    }

    /// [`DbWrapper::get_with_filters`], restricted to rows that own every
    /// attribute in `attributes`. An empty attribute set adds nothing.
    pub async fn get_with_filters_and_attributes<E>(
        &self,
        request: QueryRequest<E>,
        attributes: AttributeSubquery,
    ) -> Result<FetchResult<E, E::Model>, AppError>
    where
        E: EntityTrait,
    {
        let message = request.message();
        if !request.columns.is_empty() {
            return Err(AppError::bad_arguments(
                "Column projections are fetched with get_columns_with_filters",
            ));
        }

        let mut select = E::find();
        if !attributes.attributes.is_empty() {
            select = apply_joins(select, &attributes.joins_before_subquery);
            let owners = attribute_owners(&attributes)?;
            select = select.filter(
                Condition::all().add(attributes.link_column.expr().in_subquery(owners)),
            );
        }
        let select = self.build_select(select, &request, &message)?;
        self.fetch_models(select, &request, message).await
    }

    async fn fetch_models<E>(
        &self,
        select: Select<E>,
        request: &QueryRequest<E>,
        message: String,
    ) -> Result<FetchResult<E, E::Model>, AppError>
    where
        E: EntityTrait,
    {
        if request.return_type == GetResultType::QueryOnly {
            return Ok(FetchResult::Query(select));
        }
        let limit = row_limit(request.return_type, request.limit);
        let rows = self
            .fetch_rows(&message, request.expire_on_commit, move |txn| {
                let query = with_limit(select.clone(), limit);
                Box::pin(async move { query.all(txn).await })
            })
            .await?;
        shape(request.return_type, rows)
    }

    async fn fetch_rows<T, F>(
        &self,
        message: &str,
        expire_on_commit: bool,
        mut query: F,
    ) -> Result<Vec<T>, AppError>
    where
        T: Send + 'static,
        F: for<'t> FnMut(&'t DatabaseTransaction) -> BoxFuture<'t, Result<Vec<T>, DbErr>>
            + Send
            + 'static,
    {
        self.safe_session_scope(Some(message), expire_on_commit, move |session| {
            Box::pin(async move { session.run_query(&mut query).await })
        })
        .await
    }

    /// Inserts `models` in one transaction and returns the stored rows.
    pub async fn create_models<A, M>(
        &self,
        models: impl IntoIterator<Item = M>,
        message: Option<&str>,
    ) -> Result<Vec<ModelOf<A>>, AppError>
    where
        A: ActiveModelTrait + ActiveModelBehavior + Send + 'static,
        M: IntoActiveModel<A>,
        ModelOf<A>: IntoActiveModel<A>,
    {
        let models: Vec<A> = models.into_iter().map(IntoActiveModel::into_active_model).collect();
        let message = message.map(str::to_string).unwrap_or_else(|| {
            format!("Error creating {} {} model(s)", models.len(), table_of::<A>())
        });
        self.safe_session_scope(Some(&message), false, move |session| {
            Box::pin(async move {
                let txn = session.connection().await?;
                let mut created = Vec::with_capacity(models.len());
                for model in models {
                    created.push(model.insert(txn).await?);
                }
                Ok(created)
            })
        })
        .await
    }

    pub async fn upsert_model<A, M>(&self, model: M, message: Option<&str>) -> Result<ModelOf<A>, AppError>
    where
        A: ActiveModelTrait + ActiveModelBehavior + Send + 'static,
        M: IntoActiveModel<A>,
        ModelOf<A>: IntoActiveModel<A>,
    {
        let mut stored = self.upsert_models::<A, M>([model], message).await?;
        stored
            .pop()
            .ok_or_else(|| AppError::database(message.unwrap_or(DEFAULT_SAFE_SCOPE_MESSAGE)))
    }

    /// Updates models whose primary key already exists and inserts the rest,
    /// all in one transaction.
    pub async fn upsert_models<A, M>(
        &self,
        models: impl IntoIterator<Item = M>,
        message: Option<&str>,
    ) -> Result<Vec<ModelOf<A>>, AppError>
    where
        A: ActiveModelTrait + ActiveModelBehavior + Send + 'static,
        M: IntoActiveModel<A>,
        ModelOf<A>: IntoActiveModel<A>,
    {
        let models: Vec<A> = models.into_iter().map(IntoActiveModel::into_active_model).collect();
        let message = message.map(str::to_string).unwrap_or_else(|| {
            format!("Error upserting {} {} model(s)", models.len(), table_of::<A>())
        });
        self.safe_session_scope(Some(&message), false, move |session| {
            Box::pin(async move {
                let txn = session.connection().await?;
                let mut stored = Vec::with_capacity(models.len());
                for model in models {
                    stored.push(upsert_one(txn, model).await?);
                }
                Ok(stored)
            })
        })
        .await
    }

    /// Builds a model from `fields` and upserts it.
    pub async fn create_and_upsert_model<A>(
        &self,
        fields: serde_json::Value,
        message: Option<&str>,
    ) -> Result<ModelOf<A>, AppError>
    where
        A: ActiveModelTrait + ActiveModelBehavior + Send + 'static,
        ModelOf<A>: IntoActiveModel<A> + DeserializeOwned,
    {
        let model: ModelOf<A> = serde_json::from_value(fields).map_err(|e| {
            AppError::bad_arguments(format!("Invalid fields for {}: {e}", table_of::<A>()))
        })?;
        let active: A = model.into_active_model().reset_all();
        self.upsert_model::<A, A>(active, message).await
    }

    pub async fn delete_model<A, M>(&self, model: M, message: Option<&str>) -> Result<usize, AppError>
    where
        A: ActiveModelTrait + ActiveModelBehavior + Send + 'static,
        M: IntoActiveModel<A>,
    {
        self.delete_models::<A, M>([model], message).await
    }

    /// Deletes `models` in one transaction; returns how many were supplied.
    pub async fn delete_models<A, M>(
        &self,
        models: impl IntoIterator<Item = M>,
        message: Option<&str>,
    ) -> Result<usize, AppError>
    where
        A: ActiveModelTrait + ActiveModelBehavior + Send + 'static,
        M: IntoActiveModel<A>,
    {
        let models: Vec<A> = models.into_iter().map(IntoActiveModel::into_active_model).collect();
        let message = message.map(str::to_string).unwrap_or_else(|| {
            format!("Error deleting {} {} model(s)", models.len(), table_of::<A>())
        });
        self.safe_session_scope(Some(&message), false, move |session| {
            Box::pin(async move {
                let txn = session.connection().await?;
                let count = models.len();
                for model in models {
                    model.delete(txn).await?;
                }
                Ok(count)
            })
        })
        .await
    }
}

async fn rollback_after(session: &mut Session, err: AppError) -> AppError {
    if let Err(rollback_err) = session.rollback().await {
        warn!(
            ident_db_session = %session.info().ident_db_session,
            raw_error = %Redacted(&rollback_err),
            "session_scope=rollback_failed"
        );
    }
    err
}

fn table_of<A: ActiveModelTrait>() -> String {
    A::Entity::default().table_name().to_string()
}

/// Limit sent to the database for each result shape. Exactly-one shapes
/// always fetch two rows, whatever the caller's limit, so a second match is
/// detected.
fn row_limit(return_type: GetResultType, requested: Option<u64>) -> Option<u64> {
    match return_type {
        GetResultType::First => Some(requested.map_or(1, |l| l.min(1))),
        GetResultType::One | GetResultType::OneOrNone => Some(2),
        GetResultType::All | GetResultType::Distinct | GetResultType::QueryOnly => None,
    }
}

fn with_limit<Q: QuerySelect>(query: Q, limit: Option<u64>) -> Q {
    match limit {
        Some(limit) => query.limit(limit),
        None => query,
    }
}

fn shape<E: EntityTrait, T>(
    return_type: GetResultType,
    rows: Vec<T>,
) -> Result<FetchResult<E, T>, AppError> {
    let count = rows.len();
    let mut rows_iter = rows.into_iter();
    match return_type {
        GetResultType::All => Ok(FetchResult::All(rows_iter.collect())),
        GetResultType::Distinct => Ok(FetchResult::Distinct(rows_iter.collect())),
        GetResultType::First => Ok(FetchResult::First(rows_iter.next())),
        GetResultType::OneOrNone if count > 1 => Err(AppError::multiple_results(MULTIPLE_ROWS_MESSAGE)),
        GetResultType::OneOrNone => Ok(FetchResult::OneOrNone(rows_iter.next())),
        GetResultType::One => match (count, rows_iter.next()) {
            (1, Some(row)) => Ok(FetchResult::One(row)),
            (0, _) => Err(AppError::not_found(NO_ROW_MESSAGE)),
            _ => Err(AppError::multiple_results(MULTIPLE_ROWS_MESSAGE)),
        },
        GetResultType::QueryOnly => Err(AppError::bad_arguments(
            "QUERY_ONLY requests are not executed",
        )),
    }
}

/// `SELECT group FROM attrs WHERE (name, value) IN (..) GROUP BY group
/// HAVING COUNT(name) = n`
fn attribute_owners(attributes: &AttributeSubquery) -> Result<SelectStatement, AppError> {
    let (pairs, count) = attributes.filters()?;
    let mut owners = Query::select();
    owners
        .expr(attributes.group_column.expr())
        .from(attributes.table.clone())
        .cond_where(pairs.process()?)
        .group_by_col(attributes.group_column.column_ref())
        .cond_having(count.process()?);
    Ok(owners)
}

async fn upsert_one<A>(txn: &DatabaseTransaction, model: A) -> Result<ModelOf<A>, DbErr>
where
    A: ActiveModelTrait + ActiveModelBehavior + Send,
    ModelOf<A>: IntoActiveModel<A>,
{
    let exists = match primary_key_condition(&model) {
        Some(condition) => A::Entity::find().filter(condition).one(txn).await?.is_some(),
        None => false,
    };
    if exists {
        model.reset_all().update(txn).await
    } else {
        model.insert(txn).await
    }
}

/// `pk = value` for every primary key column, or `None` while any is unset.
fn primary_key_condition<A: ActiveModelTrait>(model: &A) -> Option<Condition> {
    let values = model.get_primary_key_value()?;
    let condition = <A::Entity as EntityTrait>::PrimaryKey::iter()
        .zip(values)
        .fold(Condition::all(), |condition, (key, value)| {
            condition.add(key.into_column().eq(value))
        });
    Some(condition)
}
