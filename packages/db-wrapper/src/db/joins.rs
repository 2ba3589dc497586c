use sea_orm::sea_query::{IntoIden, JoinType};
use sea_orm::{Condition, DynIden, EntityTrait, QuerySelect, QueryTrait, RelationDef, Related, Select};

use crate::db::filters::Col;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Outer,
}

impl JoinKind {
    fn join_type(self) -> JoinType {
        match self {
            JoinKind::Inner => JoinType::InnerJoin,
            JoinKind::Outer => JoinType::LeftJoin,
        }
    }
}

#[derive(Debug, Clone)]
pub enum JoinOn {
    /// `JOIN target ON left = right`
    Columns { target: DynIden, left: Col, right: Col },
    /// `JOIN target ON <condition>`
    Condition { target: DynIden, condition: Condition },
    /// Declared entity relation, built when the join is applied.
    Relationship(fn() -> RelationDef),
}

/// One join applied to the main query before any filter.
#[derive(Debug, Clone)]
pub struct Join {
    pub kind: JoinKind,
    pub on: JoinOn,
}

impl Join {
    pub fn inner<T: EntityTrait>(target: T, left: impl Into<Col>, right: impl Into<Col>) -> Self {
        Self::on_columns(JoinKind::Inner, target, left, right)
    }

    pub fn outer<T: EntityTrait>(target: T, left: impl Into<Col>, right: impl Into<Col>) -> Self {
        Self::on_columns(JoinKind::Outer, target, left, right)
    }

    fn on_columns<T: EntityTrait>(
        kind: JoinKind,
        target: T,
        left: impl Into<Col>,
        right: impl Into<Col>,
    ) -> Self {
        Self {
            kind,
            on: JoinOn::Columns {
                target: target.into_iden(),
                left: left.into(),
                right: right.into(),
            },
        }
    }

    pub fn on_condition<T: EntityTrait>(kind: JoinKind, target: T, condition: Condition) -> Self {
        Self {
            kind,
            on: JoinOn::Condition {
                target: target.into_iden(),
                condition,
            },
        }
    }

    pub fn relationship(kind: JoinKind, relation: fn() -> RelationDef) -> Self {
        Self {
            kind,
            on: JoinOn::Relationship(relation),
        }
    }

    /// Join along the relation `E` declares to `R`.
    pub fn related<E, R>(kind: JoinKind) -> Self
    where
        E: EntityTrait + Related<R>,
        R: EntityTrait,
    {
        Self::relationship(kind, <E as Related<R>>::to)
    }

    pub fn apply<E: EntityTrait>(&self, mut select: Select<E>) -> Select<E> {
        let join_type = self.kind.join_type();
        match &self.on {
            JoinOn::Columns {
                target,
                left,
                right,
            } => {
                QueryTrait::query(&mut select).join(
                    join_type,
                    target.clone(),
                    left.expr().eq(right.expr()),
                );
                select
            }
            JoinOn::Condition { target, condition } => {
                QueryTrait::query(&mut select).join(join_type, target.clone(), condition.clone());
                select
            }
            JoinOn::Relationship(relation) => select.join(join_type, relation()),
        }
    }
}

/// Applies `joins` in order.
pub fn apply_joins<E: EntityTrait>(select: Select<E>, joins: &[Join]) -> Select<E> {
    joins.iter().fold(select, |select, join| join.apply(select))
}

#[cfg(test)]
mod tests {
    use db_test_support::entities::{user_attributes, users};
    use sea_orm::sea_query::Expr;
    use sea_orm::{ColumnTrait, DbBackend};

    use super::*;

    fn render(joins: &[Join]) -> String {
        apply_joins(users::Entity::find(), joins)
            .build(DbBackend::Postgres)
            .to_string()
    }

    #[test]
    fn column_join_renders_on_clause() {
        let sql = render(&[Join::inner(
            user_attributes::Entity,
            users::Column::Id,
            user_attributes::Column::UserId,
        )]);
        assert!(
            sql.contains(r#"INNER JOIN "user_attributes" ON "users"."id" = "user_attributes"."user_id""#),
            "{sql}"
        );
    }

    #[test]
    fn outer_relationship_join_uses_left_join() {
        let sql = render(&[Join::related::<users::Entity, user_attributes::Entity>(
            JoinKind::Outer,
        )]);
        assert!(sql.contains(r#"LEFT JOIN "user_attributes""#), "{sql}");
    }

    #[test]
    fn relationship_join_can_be_reused() {
        let join = Join::related::<users::Entity, user_attributes::Entity>(JoinKind::Inner);
        let first = render(&[join.clone()]);
        let second = render(&[join]);
        assert_eq!(first, second);
        assert!(first.contains(r#"INNER JOIN "user_attributes" ON"#), "{first}");
        assert!(first.contains(r#""user_attributes"."user_id""#), "{first}");
    }

    #[test]
    fn condition_join_keeps_caller_order() {
        let cond = Condition::all()
            .add(
                Expr::col((users::Entity, users::Column::Id))
                    .equals((user_attributes::Entity, user_attributes::Column::UserId)),
            )
            .add(user_attributes::Column::Name.eq("colour"));
        let sql = render(&[
            Join::on_condition(JoinKind::Inner, user_attributes::Entity, cond),
            Join::outer(
                user_attributes::Entity,
                users::Column::GroupId,
                user_attributes::Column::Id,
            ),
        ]);
        let inner = sql.find("INNER JOIN").unwrap();
        let left = sql.find("LEFT JOIN").unwrap();
        assert!(inner < left, "{sql}");
        assert!(sql.contains(r#""user_attributes"."name" = 'colour'"#), "{sql}");
    }
}
