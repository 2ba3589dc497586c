//! Name/value attributes and an ordered, name-indexed collection of them.
//!
//! Attribute sets drive the all-or-nothing attribute subquery in
//! [`crate::db::wrapper::DbWrapper::get_with_filters_and_attributes`].

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// Ordered attributes with O(1) lookup by name.
///
/// The name index always points at the most recently added attribute with
/// that name, matching insertion semantics of the list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributesCollection {
    items: Vec<Attribute>,
    index: HashMap<String, usize>,
    read_only: bool,
}

impl AttributesCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attribute> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[Attribute] {
        &self.items
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.index.get(name).map(|&i| &self.items[i])
    }

    /// Update the attribute called `name` in place, or append a new one.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> Result<(), AppError> {
        self.ensure_writable("set attribute values in")?;
        match self.index.get(name) {
            Some(&i) => self.items[i].value = value.into(),
            None => self.push_unchecked(Attribute::new(name, value)),
        }
        Ok(())
    }

    pub fn push(&mut self, attribute: Attribute) -> Result<(), AppError> {
        self.ensure_writable("append to")?;
        self.push_unchecked(attribute);
        Ok(())
    }

    pub fn extend<I>(&mut self, attributes: I) -> Result<(), AppError>
    where
        I: IntoIterator<Item = Attribute>,
    {
        self.ensure_writable("extend")?;
        for attribute in attributes {
            self.push_unchecked(attribute);
        }
        Ok(())
    }

    pub fn insert(&mut self, position: usize, attribute: Attribute) -> Result<(), AppError> {
        self.ensure_writable("insert into")?;
        if position > self.items.len() {
            return Err(AppError::bad_arguments(format!(
                "Insert position {position} is out of bounds for {} attributes",
                self.items.len()
            )));
        }
        self.items.insert(position, attribute);
        self.reindex();
        Ok(())
    }

    pub fn remove(&mut self, position: usize) -> Result<Attribute, AppError> {
        self.ensure_writable("delete from")?;
        if position >= self.items.len() {
            return Err(AppError::bad_arguments(format!(
                "Delete position {position} is out of bounds for {} attributes",
                self.items.len()
            )));
        }
        let removed = self.items.remove(position);
        self.reindex();
        Ok(removed)
    }

    pub fn pop(&mut self) -> Result<Option<Attribute>, AppError> {
        self.ensure_writable("pop from")?;
        let popped = self.items.pop();
        if popped.is_some() {
            self.reindex();
        }
        Ok(popped)
    }

    pub fn clone_with(&self, read_only: bool) -> Self {
        let mut copy = self.clone();
        copy.read_only = read_only;
        copy
    }

    pub fn to_dicts(&self) -> Vec<serde_json::Value> {
        self.items
            .iter()
            .map(|a| serde_json::json!({ "name": a.name, "value": a.value }))
            .collect()
    }

    pub fn from_dicts(dicts: &[serde_json::Value]) -> Result<Self, AppError> {
        let attributes = dicts
            .iter()
            .map(|d| {
                serde_json::from_value::<Attribute>(d.clone()).map_err(|e| {
                    AppError::bad_arguments(format!("Invalid attribute {d}: {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(attributes.into_iter().collect())
    }

    fn ensure_writable(&self, action: &str) -> Result<(), AppError> {
        if self.read_only {
            return Err(AppError::bad_arguments(format!(
                "Cannot {action} a read-only attributes collection"
            )));
        }
        Ok(())
    }

    fn push_unchecked(&mut self, attribute: Attribute) {
        self.index.insert(attribute.name.clone(), self.items.len());
        self.items.push(attribute);
    }

    fn reindex(&mut self) {
        self.index = self
            .items
            .iter()
            .enumerate()
            .map(|(i, a)| (a.name.clone(), i))
            .collect();
    }
}

impl FromIterator<Attribute> for AttributesCollection {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        let mut collection = Self::new();
        for attribute in iter {
            collection.push_unchecked(attribute);
        }
        collection
    }
}

impl<'a> IntoIterator for &'a AttributesCollection {
    type Item = &'a Attribute;
    type IntoIter = std::slice::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample() -> AttributesCollection {
        [Attribute::new("color", "red"), Attribute::new("size", "L")]
            .into_iter()
            .collect()
    }

    #[test]
    fn lookup_by_name() {
        let attrs = sample();
        assert_eq!(attrs.get("size").map(|a| a.value.as_str()), Some("L"));
        assert!(attrs.get("weight").is_none());
    }

    #[test]
    fn set_updates_existing_or_appends() {
        let mut attrs = sample();
        attrs.set("color", "blue").unwrap();
        attrs.set("weight", "2kg").unwrap();
        assert_eq!(attrs.len(), 3);
        assert_eq!(attrs.get("color").unwrap().value, "blue");
        assert_eq!(attrs.as_slice()[2], Attribute::new("weight", "2kg"));
    }

    #[test]
    fn read_only_clone_rejects_mutation() {
        let mut frozen = sample().clone_with(true);
        assert!(frozen.is_read_only());
        assert!(frozen.set("color", "blue").is_err());
        assert!(frozen.push(Attribute::new("x", "y")).is_err());
        assert!(frozen.pop().is_err());
        assert_eq!(frozen.get("color").unwrap().value, "red");
    }

    #[test]
    fn removal_keeps_index_consistent() {
        let mut attrs = sample();
        attrs
            .insert(0, Attribute::new("shape", "round"))
            .unwrap();
        assert_eq!(attrs.get("color").unwrap().value, "red");

        let removed = attrs.remove(1).unwrap();
        assert_eq!(removed.name, "color");
        assert!(attrs.get("color").is_none());
        assert_eq!(attrs.get("size").unwrap().value, "L");

        let popped = attrs.pop().unwrap().unwrap();
        assert_eq!(popped.name, "size");
        assert!(attrs.get("size").is_none());
        assert!(attrs.remove(5).is_err());
    }

    #[test]
    fn dict_round_trip() {
        let dicts = sample().to_dicts();
        assert_eq!(dicts[0], json!({"name": "color", "value": "red"}));
        let back = AttributesCollection::from_dicts(&dicts).unwrap();
        assert_eq!(back, sample());

        assert!(AttributesCollection::from_dicts(&[json!({"name": "x"})]).is_err());
    }
}
