//! In-memory SQLite engine with the test schema.

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Schema};

use crate::entities::{user_attributes, users};

/// Fresh private database. One pooled connection, so every session sees
/// the same in-memory schema.
pub async fn memory_engine() -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await?;

    let backend = db.get_database_backend();
    let schema = Schema::new(backend);
    db.execute(backend.build(&schema.create_table_from_entity(users::Entity)))
        .await?;
    db.execute(backend.build(&schema.create_table_from_entity(user_attributes::Entity)))
        .await?;
    Ok(db)
}
