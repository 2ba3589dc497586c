//! Locked configuration secrets.
//!
//! A [`LockedSecret`] only exposes its name. The payload is reachable solely
//! through the [`UnlockedSecret`] view returned by [`LockedSecret::unlock`],
//! which borrows the secret and therefore cannot outlive the caller's scope.

use std::fmt;

use serde_json::Value;

use crate::error::AppError;

pub struct LockedSecret {
    name: Vec<String>,
    payload: Value,
}

impl LockedSecret {
    pub fn new<S: AsRef<str>>(name: &[S], payload: Value) -> Self {
        Self {
            name: name.iter().map(|s| s.as_ref().to_owned()).collect(),
            payload,
        }
    }

    pub fn name(&self) -> &[String] {
        &self.name
    }

    /// Dotted form of the name, used in logs and error messages.
    pub fn label(&self) -> String {
        self.name.join(".")
    }

    pub fn unlock(&self) -> UnlockedSecret<'_> {
        UnlockedSecret { secret: self }
    }

    /// Run `f` against the unlocked payload; the view is dropped on every exit path.
    pub fn with_unlocked<R>(&self, f: impl FnOnce(&UnlockedSecret<'_>) -> R) -> R {
        f(&self.unlock())
    }
}

impl fmt::Debug for LockedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<LockedSecret: {} [LOCKED]>", self.label())
    }
}

impl fmt::Display for LockedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Short-lived view over a secret's payload.
pub struct UnlockedSecret<'a> {
    secret: &'a LockedSecret,
}

impl<'a> UnlockedSecret<'a> {
    pub fn name(&self) -> &'a [String] {
        &self.secret.name
    }

    pub fn value(&self) -> &'a Value {
        &self.secret.payload
    }

    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.secret.payload.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !v.is_null())
    }

    pub fn get_str(&self, key: &str) -> Option<&'a str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Required key rendered as a string; numbers and booleans are accepted.
    pub fn require_string(&self, key: &str) -> Result<String, AppError> {
        match self.get(key) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(Value::Bool(b)) => Ok(b.to_string()),
            Some(Value::Null) | None => Err(AppError::config(format!(
                "Secret '{}' is missing required key '{key}'",
                self.secret.label()
            ))),
            Some(_) => Err(AppError::config(format!(
                "Secret '{}' key '{key}' must be a scalar value",
                self.secret.label()
            ))),
        }
    }
}

impl fmt::Debug for UnlockedSecret<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<LockedSecret: {} [UNLOCKED]>", self.secret.label())
    }
}
