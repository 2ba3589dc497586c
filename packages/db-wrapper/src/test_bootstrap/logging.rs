#![cfg(test)]

/// Unit tests share the integration-test initializer so both honour
/// `DBWRAP_TEST_LOG` the same way.
pub fn init() {
    db_test_support::logging::init();
}
