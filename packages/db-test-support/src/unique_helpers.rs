//! Unique test data, so tests sharing a database never collide.

use uuid::Uuid;

/// `{prefix}-{uuid}`
pub fn unique_str(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

/// `{prefix}-{uuid}@example.test`
pub fn unique_email(prefix: &str) -> String {
    format!("{}@example.test", unique_str(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_differ_per_call() {
        let a = unique_str("user");
        assert_ne!(a, unique_str("user"));
        assert!(a.starts_with("user-"));
        assert!(unique_email("test").ends_with("@example.test"));
    }
}
