use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{KilnError, Result};
use crate::expression;

/// A typed global variable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GlobalValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl std::fmt::Display for GlobalValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GlobalValue::Bool(b) => write!(f, "{}", b),
            GlobalValue::Int(i) => write!(f, "{}", i),
            GlobalValue::Float(x) => write!(f, "{}", x),
            GlobalValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for GlobalValue {
    fn from(s: &str) -> Self {
        GlobalValue::Text(s.to_string())
    }
}

impl From<String> for GlobalValue {
    fn from(s: String) -> Self {
        GlobalValue::Text(s)
    }
}

impl From<i64> for GlobalValue {
    fn from(i: i64) -> Self {
        GlobalValue::Int(i)
    }
}

impl From<f64> for GlobalValue {
    fn from(x: f64) -> Self {
        GlobalValue::Float(x)
    }
}

impl From<bool> for GlobalValue {
    fn from(b: bool) -> Self {
        GlobalValue::Bool(b)
    }
}

impl GlobalValue {
    /// Parse a command-line style value: booleans and numbers are typed,
    /// everything else is text.
    pub fn parse_loose(raw: &str) -> Self {
        match raw {
            "true" => return GlobalValue::Bool(true),
            "false" => return GlobalValue::Bool(false),
            _ => {}
        }
        if let Ok(i) = raw.parse::<i64>() {
            return GlobalValue::Int(i);
        }
        if let Ok(x) = raw.parse::<f64>() {
            return GlobalValue::Float(x);
        }
        GlobalValue::Text(raw.to_string())
    }
}

/// Flat, process-wide table of `$NAME` variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalTable {
    vars: BTreeMap<String, GlobalValue>,
}

impl GlobalTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// All variables, sorted by name.
    pub fn list(&self) -> impl Iterator<Item = (&str, &GlobalValue)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, name: &str) -> Option<&GlobalValue> {
        self.vars.get(name)
    }

    /// Set a variable, returning the previous value.
    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: impl Into<GlobalValue>,
    ) -> Result<Option<GlobalValue>> {
        let name = name.into();
        if !expression::is_valid_name(&name) {
            return Err(KilnError::InvalidGlobal(name));
        }
        Ok(self.vars.insert(name, value.into()))
    }

    /// Remove a variable. Removing a missing name is a no-op.
    pub fn delete(&mut self, name: &str) -> Option<GlobalValue> {
        self.vars.remove(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_delete() {
        let mut table = GlobalTable::new();
        assert!(table.is_empty());
        assert_eq!(table.set("PROJECT", "demo").unwrap(), None);
        assert_eq!(table.get("PROJECT"), Some(&GlobalValue::Text("demo".into())));
        let prev = table.set("PROJECT", "other").unwrap();
        assert_eq!(prev, Some(GlobalValue::Text("demo".into())));
        assert!(table.delete("PROJECT").is_some());
        assert!(table.delete("PROJECT").is_none());
        assert!(table.get("PROJECT").is_none());
    }

    #[test]
    fn test_invalid_name_rejected() {
        let mut table = GlobalTable::new();
        let err = table.set("lower", "x").unwrap_err();
        assert!(matches!(err, KilnError::InvalidGlobal(_)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_list_sorted() {
        let mut table = GlobalTable::new();
        table.set("B", 2i64).unwrap();
        table.set("A", 1i64).unwrap();
        let names: Vec<&str> = table.list().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn test_parse_loose() {
        assert_eq!(GlobalValue::parse_loose("true"), GlobalValue::Bool(true));
        assert_eq!(GlobalValue::parse_loose("42"), GlobalValue::Int(42));
        assert_eq!(GlobalValue::parse_loose("2.5"), GlobalValue::Float(2.5));
        assert_eq!(
            GlobalValue::parse_loose("hello"),
            GlobalValue::Text("hello".into())
        );
    }

    #[test]
    fn test_serde_roundtrip_is_untagged() {
        let mut table = GlobalTable::new();
        table.set("N", 3i64).unwrap();
        table.set("S", "x").unwrap();
        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json, serde_json::json!({"N": 3, "S": "x"}));
        let back: GlobalTable = serde_json::from_value(json).unwrap();
        assert_eq!(back, table);
    }
}
