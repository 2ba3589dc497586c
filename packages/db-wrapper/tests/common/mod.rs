#![allow(dead_code)]

use std::sync::Arc;

use db_test_support::entities::{user_attributes, users};
use db_wrapper::config::providers::{ConfigProvider, MemoryConfigProvider};
use db_wrapper::DbWrapper;
use sea_orm::Set;
use serde_json::json;

#[ctor::ctor]
fn init_logging() {
    db_test_support::logging::init();
}

pub fn provider() -> Arc<dyn ConfigProvider> {
    Arc::new(MemoryConfigProvider::new(json!({
        "databases": {
            "main": {
                "username": "app",
                "password": "pw",
                "host": "localhost",
                "database": "accounts"
            }
        }
    })))
}

/// Wrapper over a fresh in-memory SQLite database with the test schema.
pub async fn sqlite_wrapper() -> DbWrapper {
    let engine = db_test_support::sqlite::memory_engine()
        .await
        .expect("sqlite engine");
    DbWrapper::builder(provider(), &["databases", "main"])
        .shared_engine(engine)
        .build()
}

pub fn new_user(username: &str, group_id: Option<i32>) -> users::ActiveModel {
    users::ActiveModel {
        username: Set(username.to_string()),
        email: Set(format!("{username}@example.test")),
        active: Set(true),
        group_id: Set(group_id),
        ..Default::default()
    }
}

pub fn new_attribute(user_id: i32, name: &str, value: &str) -> user_attributes::ActiveModel {
    user_attributes::ActiveModel {
        user_id: Set(user_id),
        name: Set(name.to_string()),
        value: Set(value.to_string()),
        ..Default::default()
    }
}

/// Inserts one user per name, in order.
pub async fn seed_users(wrapper: &DbWrapper, names: &[&str]) -> Vec<users::Model> {
    wrapper
        .create_models::<users::ActiveModel, _>(names.iter().map(|n| new_user(n, None)), None)
        .await
        .expect("seed users")
}
