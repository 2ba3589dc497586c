//! Composable, gateable query predicates.
//!
//! A [`Filter`] carries its column and an optional value. Filters whose
//! value is missing are skipped by [`process_filters`] instead of turning
//! into `col = NULL`, so request parameters can be passed through directly.

use std::fmt;

use sea_orm::sea_query::{Expr, Func, IntoIden, SimpleExpr};
use sea_orm::{ColumnTrait, Condition, DynIden, EntityName, Value};

use crate::error::AppError;
use crate::helpers::uuid::convert_to_uuid;

/// A column qualified with its table, so filters on joined entities
/// render unambiguously.
#[derive(Clone)]
pub struct Col {
    table: DynIden,
    column: DynIden,
    name: String,
    label: String,
}

impl Col {
    pub fn of<C: ColumnTrait>(column: C) -> Self {
        let table = C::EntityName::default();
        let name = column.as_str().to_string();
        Self {
            label: format!("{}.{name}", table.table_name()),
            table: table.into_iden(),
            column: column.into_iden(),
            name,
        }
    }

    /// Bare column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `table.column`
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn column_ref(&self) -> (DynIden, DynIden) {
        (self.table.clone(), self.column.clone())
    }

    pub fn expr(&self) -> Expr {
        Expr::col(self.column_ref())
    }
}

impl fmt::Debug for Col {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl<C: ColumnTrait> From<C> for Col {
    fn from(column: C) -> Self {
        Col::of(column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    GreaterThan,
    LessThan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone)]
pub enum Filter {
    Equality {
        column: Col,
        value: Option<Value>,
        is_uuid: bool,
    },
    InList {
        column: Col,
        values: Option<Vec<Value>>,
        is_uuid: bool,
        negated: bool,
        can_be_empty: bool,
    },
    Comparison {
        column: Col,
        op: Comparison,
        or_equal: bool,
        value: Option<Value>,
    },
    /// `COUNT(column) = value`; belongs in a `HAVING` clause.
    Count { column: Col, value: Option<i64> },
    /// Composite-key membership: the row matches one of the value tuples.
    TupleIn {
        columns: Vec<Col>,
        values: Option<Vec<Vec<Value>>>,
    },
    /// `column IS TRUE|FALSE`, or `IS NOT` when negated.
    Boolean {
        column: Col,
        value: Option<bool>,
        negated: bool,
    },
    /// `column IS NULL`, or `IS NOT NULL` when negated. Always applies.
    Null { column: Col, negated: bool },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Pattern {
        column: Col,
        pattern: Pattern,
        value: Option<String>,
    },
}

impl Filter {
    pub fn eq<V: Into<Value>>(column: impl Into<Col>, value: impl Into<Option<V>>) -> Self {
        Filter::Equality {
            column: column.into(),
            value: value.into().map(Into::into),
            is_uuid: false,
        }
    }

    /// Equality on a UUID column; the value must parse as a UUID.
    pub fn eq_uuid<V: Into<Value>>(column: impl Into<Col>, value: impl Into<Option<V>>) -> Self {
        Filter::Equality {
            column: column.into(),
            value: value.into().map(Into::into),
            is_uuid: true,
        }
    }

    pub fn in_list<V, I>(column: impl Into<Col>, values: Option<I>) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Self::in_list_with(column, values, false, false, false)
    }

    pub fn not_in_list<V, I>(column: impl Into<Col>, values: Option<I>) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Self::in_list_with(column, values, true, false, false)
    }

    pub fn in_list_with<V, I>(
        column: impl Into<Col>,
        values: Option<I>,
        negated: bool,
        can_be_empty: bool,
        is_uuid: bool,
    ) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Filter::InList {
            column: column.into(),
            values: values.map(|vs| vs.into_iter().map(Into::into).collect()),
            is_uuid,
            negated,
            can_be_empty,
        }
    }

    fn comparison<V: Into<Value>>(
        column: impl Into<Col>,
        op: Comparison,
        or_equal: bool,
        value: impl Into<Option<V>>,
    ) -> Self {
        Filter::Comparison {
            column: column.into(),
            op,
            or_equal,
            value: value.into().map(Into::into),
        }
    }

    pub fn gt<V: Into<Value>>(column: impl Into<Col>, value: impl Into<Option<V>>) -> Self {
        Self::comparison(column, Comparison::GreaterThan, false, value)
    }

    pub fn gte<V: Into<Value>>(column: impl Into<Col>, value: impl Into<Option<V>>) -> Self {
        Self::comparison(column, Comparison::GreaterThan, true, value)
    }

    pub fn lt<V: Into<Value>>(column: impl Into<Col>, value: impl Into<Option<V>>) -> Self {
        Self::comparison(column, Comparison::LessThan, false, value)
    }

    pub fn lte<V: Into<Value>>(column: impl Into<Col>, value: impl Into<Option<V>>) -> Self {
        Self::comparison(column, Comparison::LessThan, true, value)
    }

    /// Fails when the count does not fit a SQL `BIGINT`.
    pub fn count(column: impl Into<Col>, value: Option<usize>) -> Result<Self, AppError> {
        let value = value
            .map(|n| {
                i64::try_from(n).map_err(|_| {
                    AppError::bad_arguments(format!("Count {n} is out of range"))
                })
            })
            .transpose()?;
        Ok(Filter::Count {
            column: column.into(),
            value,
        })
    }

    pub fn tuple_in<C, I, R, V>(columns: I, values: Option<Vec<R>>) -> Self
    where
        C: Into<Col>,
        I: IntoIterator<Item = C>,
        R: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::TupleIn {
            columns: columns.into_iter().map(Into::into).collect(),
            values: values.map(|rows| {
                rows.into_iter()
                    .map(|row| row.into_iter().map(Into::into).collect())
                    .collect()
            }),
        }
    }

    pub fn boolean(column: impl Into<Col>, value: Option<bool>, negated: bool) -> Self {
        Filter::Boolean {
            column: column.into(),
            value,
            negated,
        }
    }

    pub fn is_null(column: impl Into<Col>) -> Self {
        Filter::Null {
            column: column.into(),
            negated: false,
        }
    }

    pub fn is_not_null(column: impl Into<Col>) -> Self {
        Filter::Null {
            column: column.into(),
            negated: true,
        }
    }

    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(filters.into_iter().collect())
    }

    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(filters.into_iter().collect())
    }

    fn pattern(column: impl Into<Col>, pattern: Pattern, value: Option<impl Into<String>>) -> Self {
        Filter::Pattern {
            column: column.into(),
            pattern,
            value: value.map(Into::into),
        }
    }

    pub fn like(column: impl Into<Col>, value: Option<impl Into<String>>) -> Self {
        Self::pattern(column, Pattern::Contains, value)
    }

    pub fn starts_with(column: impl Into<Col>, value: Option<impl Into<String>>) -> Self {
        Self::pattern(column, Pattern::StartsWith, value)
    }

    pub fn ends_with(column: impl Into<Col>, value: Option<impl Into<String>>) -> Self {
        Self::pattern(column, Pattern::EndsWith, value)
    }

    /// Whether this filter takes part in the query.
    pub fn should_use(&self) -> bool {
        match self {
            Filter::Equality { value, .. } | Filter::Comparison { value, .. } => value.is_some(),
            Filter::InList {
                values,
                can_be_empty,
                ..
            } => values
                .as_ref()
                .is_some_and(|vs| !vs.is_empty() || *can_be_empty),
            Filter::TupleIn { values, .. } => values.as_ref().is_some_and(|vs| !vs.is_empty()),
            Filter::Count { value, .. } => value.is_some(),
            Filter::Boolean { value, .. } => value.is_some(),
            Filter::Null { .. } => true,
            Filter::And(filters) | Filter::Or(filters) => filters.iter().all(Filter::should_use),
            Filter::Pattern { value, .. } => value.is_some(),
        }
    }

    /// Builds the SQL predicate. Call only when [`Filter::should_use`] holds.
    pub fn process(&self) -> Result<Condition, AppError> {
        Ok(match self {
            Filter::And(filters) => filters
                .iter()
                .try_fold(Condition::all(), |cond, f| Ok::<_, AppError>(cond.add(f.process()?)))?,
            Filter::Or(filters) => filters
                .iter()
                .try_fold(Condition::any(), |cond, f| Ok::<_, AppError>(cond.add(f.process()?)))?,
            Filter::TupleIn { columns, values } => tuple_condition(columns, values.as_deref())?,
            other => Condition::all().add(other.expression()?),
        })
    }

    fn expression(&self) -> Result<SimpleExpr, AppError> {
        match self {
            Filter::Equality {
                column,
                value,
                is_uuid,
            } => {
                let value = required(column, value.as_ref())?;
                let value = if *is_uuid {
                    uuid_value(value)?
                } else {
                    value.clone()
                };
                Ok(column.expr().eq(value))
            }
            Filter::InList {
                column,
                values,
                is_uuid,
                negated,
                ..
            } => {
                let values = required(column, values.as_ref())?;
                if values.is_empty() {
                    let sql = if *negated { "1 = 1" } else { "1 = 0" };
                    return Ok(Expr::cust(sql));
                }
                let values = if *is_uuid {
                    values.iter().map(uuid_value).collect::<Result<Vec<_>, _>>()?
                } else {
                    values.clone()
                };
                Ok(if *negated {
                    column.expr().is_not_in(values)
                } else {
                    column.expr().is_in(values)
                })
            }
            Filter::Comparison {
                column,
                op,
                or_equal,
                value,
            } => {
                let value = required(column, value.as_ref())?.clone();
                let expr = column.expr();
                Ok(match (op, or_equal) {
                    (Comparison::GreaterThan, false) => expr.gt(value),
                    (Comparison::GreaterThan, true) => expr.gte(value),
                    (Comparison::LessThan, false) => expr.lt(value),
                    (Comparison::LessThan, true) => expr.lte(value),
                })
            }
            Filter::Count { column, value } => {
                let value = *required(column, value.as_ref())?;
                Ok(Expr::expr(Func::count(column.expr())).eq(value))
            }
            Filter::Boolean {
                column,
                value,
                negated,
            } => {
                let literal = if *required(column, value.as_ref())? {
                    "TRUE"
                } else {
                    "FALSE"
                };
                Ok(if *negated {
                    column.expr().is_not(Expr::cust(literal))
                } else {
                    column.expr().is(Expr::cust(literal))
                })
            }
            Filter::Null { column, negated } => Ok(if *negated {
                column.expr().is_not_null()
            } else {
                column.expr().is_null()
            }),
            Filter::Pattern {
                column,
                pattern,
                value,
            } => {
                let value = required(column, value.as_ref())?;
                let like = match pattern {
                    Pattern::Contains => format!("%{value}%"),
                    Pattern::StartsWith => format!("{value}%"),
                    Pattern::EndsWith => format!("%{value}"),
                };
                Ok(column.expr().like(like))
            }
            Filter::TupleIn { .. } | Filter::And(_) | Filter::Or(_) => Err(AppError::bad_arguments(
                "Composite filters do not reduce to a single expression",
            )),
        }
    }
}

/// `(a = x1 AND b = y1) OR (a = x2 AND b = y2) ...`, the portable form of
/// `(a, b) IN ((x1, y1), (x2, y2))`.
fn tuple_condition(columns: &[Col], rows: Option<&[Vec<Value>]>) -> Result<Condition, AppError> {
    let rows = rows.ok_or_else(|| {
        AppError::bad_arguments("Tuple filter requires a list of value tuples")
    })?;
    if let Some(row) = rows.iter().find(|row| row.len() != columns.len()) {
        return Err(AppError::bad_arguments(format!(
            "Expected tuples of {} values, got {}",
            columns.len(),
            row.len()
        )));
    }
    Ok(rows.iter().fold(Condition::any(), |any, row| {
        any.add(
            columns
                .iter()
                .zip(row)
                .fold(Condition::all(), |all, (column, value)| {
                    all.add(column.expr().eq(value.clone()))
                }),
        )
    }))
}

fn required<'a, T>(column: &Col, value: Option<&'a T>) -> Result<&'a T, AppError> {
    value.ok_or_else(|| {
        AppError::bad_arguments(format!("Filter on {} has no value", column.label()))
    })
}

fn uuid_value(value: &Value) -> Result<Value, AppError> {
    match value {
        Value::Uuid(Some(_)) => Ok(value.clone()),
        Value::String(Some(s)) => Ok(convert_to_uuid(s)?.into()),
        other => Err(AppError::bad_arguments(format!(
            "The ID {other:?} is not a valid UUID"
        ))),
    }
}

/// Processes every filter that passes its gate, in order.
///
/// With `at_least_one_filter` set, a request in which every filter was
/// gated out fails instead of matching the whole table.
pub fn process_filters(
    filters: &[Filter],
    error_message: &str,
    at_least_one_filter: bool,
) -> Result<Vec<Condition>, AppError> {
    let conditions = filters
        .iter()
        .filter(|f| f.should_use())
        .map(Filter::process)
        .collect::<Result<Vec<_>, _>>()?;

    if at_least_one_filter && conditions.is_empty() {
        let message = format!("{error_message} At least one filter must be specified");
        return Err(AppError::data_validation(message.trim_start()));
    }
    Ok(conditions)
}
