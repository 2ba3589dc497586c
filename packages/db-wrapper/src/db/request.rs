//! Query descriptions handed to [`crate::db::wrapper::DbWrapper`].

use std::marker::PhantomData;
use std::str::FromStr;

use sea_orm::sea_query::IntoIden;
use sea_orm::{ColumnTrait, DynIden, EntityTrait, Order, Select};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::datatools::attributes::Attribute;
use crate::db::filters::{Col, Filter};
use crate::db::joins::Join;
use crate::error::AppError;

/// Shape of the value a query returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GetResultType {
    All,
    /// Exactly one row; zero or several is an error.
    One,
    OneOrNone,
    #[default]
    First,
    /// The built query, not executed.
    QueryOnly,
    /// `SELECT DISTINCT`, all rows.
    Distinct,
}

#[derive(Debug)]
pub enum FetchResult<E: EntityTrait, T> {
    All(Vec<T>),
    One(T),
    OneOrNone(Option<T>),
    First(Option<T>),
    Query(Select<E>),
    Distinct(Vec<T>),
}

impl<E: EntityTrait, T> FetchResult<E, T> {
    fn shape(&self) -> &'static str {
        match self {
            FetchResult::All(_) => "ALL",
            FetchResult::One(_) => "ONE",
            FetchResult::OneOrNone(_) => "ONE_OR_NONE",
            FetchResult::First(_) => "FIRST",
            FetchResult::Query(_) => "QUERY_ONLY",
            FetchResult::Distinct(_) => "DISTINCT",
        }
    }

    fn mismatch(&self, wanted: &str) -> AppError {
        AppError::bad_arguments(format!(
            "Expected a {wanted} result, got {}",
            self.shape()
        ))
    }

    pub fn into_all(self) -> Result<Vec<T>, AppError> {
        match self {
            FetchResult::All(rows) | FetchResult::Distinct(rows) => Ok(rows),
            FetchResult::One(row) => Ok(vec![row]),
            FetchResult::OneOrNone(row) | FetchResult::First(row) => Ok(row.into_iter().collect()),
            other => Err(other.mismatch("row list")),
        }
    }

    pub fn into_one(self) -> Result<T, AppError> {
        match self {
            FetchResult::One(row) => Ok(row),
            other => Err(other.mismatch("single row")),
        }
    }

    pub fn into_optional(self) -> Result<Option<T>, AppError> {
        match self {
            FetchResult::One(row) => Ok(Some(row)),
            FetchResult::OneOrNone(row) | FetchResult::First(row) => Ok(row),
            other => Err(other.mismatch("optional row")),
        }
    }

    pub fn into_query(self) -> Result<Select<E>, AppError> {
        match self {
            FetchResult::Query(select) => Ok(select),
            other => Err(other.mismatch("query")),
        }
    }
}

/// Caller-supplied ordering, typically deserialised from request input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
}

impl OrderBy {
    pub fn new(field: impl Into<String>, direction: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            direction: Some(direction.into()),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, AppError> {
        serde_json::from_value(value.clone()).map_err(|e| {
            AppError::bad_arguments(format!("Invalid arguments for order_by field: {e}"))
        })
    }

    /// Resolves the field against `E`'s columns.
    pub fn resolve<E: EntityTrait>(&self) -> Result<(E::Column, Order), AppError> {
        let (field, direction) = match (
            self.field.as_deref().filter(|f| !f.is_empty()),
            self.direction.as_deref().filter(|d| !d.is_empty()),
        ) {
            (Some(field), Some(direction)) => (field, direction),
            _ => {
                return Err(AppError::bad_arguments(
                    "Invalid arguments for order_by field. Must pass both field and direction",
                ))
            }
        };

        let column = E::Column::from_str(field).map_err(|_| {
            AppError::bad_arguments(format!("Invalid argument for order_by.field: {field}"))
        })?;
        let order = match direction.to_lowercase().as_str() {
            "asc" => Order::Asc,
            "desc" => Order::Desc,
            _ => {
                return Err(AppError::bad_arguments(format!(
                    "Invalid argument for order_by.direction: {direction}"
                )))
            }
        };
        Ok((column, order))
    }
}

/// Restricts the main query to rows owning every listed attribute.
///
/// Renders `link IN (SELECT group FROM attrs WHERE (name, value) IN (...)
/// GROUP BY group HAVING COUNT(name) = n)`.
#[derive(Debug, Clone)]
pub struct AttributeSubquery {
    pub link_column: Col,
    pub table: DynIden,
    pub group_column: Col,
    pub name_column: Col,
    pub value_column: Col,
    pub attributes: Vec<Attribute>,
    /// Applied to the main query before the restriction.
    pub joins_before_subquery: Vec<Join>,
}

impl AttributeSubquery {
    pub fn new<A: ColumnTrait>(
        link_column: impl Into<Col>,
        group_column: A,
        name_column: A,
        value_column: A,
        attributes: impl IntoIterator<Item = Attribute>,
    ) -> Self {
        Self {
            link_column: link_column.into(),
            table: A::EntityName::default().into_iden(),
            group_column: group_column.into(),
            name_column: name_column.into(),
            value_column: value_column.into(),
            attributes: attributes.into_iter().collect(),
            joins_before_subquery: Vec::new(),
        }
    }

    pub fn joins_before_subquery(mut self, joins: impl IntoIterator<Item = Join>) -> Self {
        self.joins_before_subquery = joins.into_iter().collect();
        self
    }

    /// Filters of the subquery: the `(name, value)` tuple match and the
    /// `HAVING` count.
    pub fn filters(&self) -> Result<(Filter, Filter), AppError> {
        let pairs = self
            .attributes
            .iter()
            .map(|a| vec![a.name.clone(), a.value.clone()])
            .collect::<Vec<_>>();
        let tuple = Filter::TupleIn {
            columns: vec![self.name_column.clone(), self.value_column.clone()],
            values: Some(
                pairs
                    .into_iter()
                    .map(|row| row.into_iter().map(Into::into).collect())
                    .collect(),
            ),
        };
        let count = Filter::count(self.name_column.clone(), Some(self.attributes.len()))?;
        Ok((tuple, count))
    }
}

/// Everything `get_with_filters` needs to build and shape one query.
#[derive(Debug, Clone)]
pub struct QueryRequest<E: EntityTrait> {
    pub filters: Vec<Filter>,
    pub columns: Vec<Col>,
    pub joins: Vec<Join>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<u64>,
    pub return_type: GetResultType,
    pub at_least_one_filter: bool,
    pub error_message: Option<String>,
    pub expire_on_commit: bool,
    entity: PhantomData<E>,
}

impl<E: EntityTrait> Default for QueryRequest<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: EntityTrait> QueryRequest<E> {
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
            columns: Vec::new(),
            joins: Vec::new(),
            order_by: None,
            limit: None,
            return_type: GetResultType::default(),
            at_least_one_filter: false,
            error_message: None,
            expire_on_commit: false,
            entity: PhantomData,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.filters.extend(filters);
        self
    }

    pub fn columns<C: Into<Col>>(mut self, columns: impl IntoIterator<Item = C>) -> Self {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = Some(order_by);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn return_type(mut self, return_type: GetResultType) -> Self {
        self.return_type = return_type;
        self
    }

    pub fn at_least_one_filter(mut self, required: bool) -> Self {
        self.at_least_one_filter = required;
        self
    }

    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn expire_on_commit(mut self, expire: bool) -> Self {
        self.expire_on_commit = expire;
        self
    }

    /// The caller's message, or `Error getting <table>`.
    pub fn message(&self) -> String {
        match self.error_message.as_deref().filter(|m| !m.is_empty()) {
            Some(message) => message.to_string(),
            None => format!("Error getting {}", E::default().table_name()),
        }
    }
}
