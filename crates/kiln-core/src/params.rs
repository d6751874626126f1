//! Typed node parameters and their evaluation against the global table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{KilnError, Result};
use crate::expression;
use crate::globals::GlobalTable;

/// Declared type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Int,
    Float,
    Toggle,
    Button,
    StringList,
    Menu,
}

impl ParamType {
    /// Types whose raw text goes through `$NAME` substitution.
    pub fn substitutes(self) -> bool {
        matches!(self, ParamType::String | ParamType::StringList | ParamType::Menu)
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ParamType::String => "string",
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Toggle => "toggle",
            ParamType::Button => "button",
            ParamType::StringList => "string_list",
            ParamType::Menu => "menu",
        };
        f.write_str(s)
    }
}

/// A raw (unevaluated) parameter value as stored and persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Toggle(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
}

impl ParamValue {
    fn as_display(&self) -> String {
        match self {
            ParamValue::Null => String::new(),
            ParamValue::Toggle(b) => b.to_string(),
            ParamValue::Int(i) => i.to_string(),
            ParamValue::Float(x) => x.to_string(),
            ParamValue::Text(s) => s.clone(),
            ParamValue::List(items) => items.join("\n"),
        }
    }

    fn has_expression(&self) -> bool {
        match self {
            ParamValue::Text(s) => expression::has_expression(s),
            ParamValue::List(items) => items.iter().any(|s| expression::has_expression(s)),
            _ => false,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Text(s)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<f64> for ParamValue {
    fn from(x: f64) -> Self {
        ParamValue::Float(x)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Toggle(b)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(items: Vec<String>) -> Self {
        ParamValue::List(items)
    }
}

/// An evaluated, type-coerced parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Text(String),
    Int(i64),
    Float(f64),
    Toggle(bool),
    List(Vec<String>),
}

impl TypedValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            TypedValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            TypedValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            TypedValue::Float(x) => Some(*x),
            TypedValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TypedValue::Toggle(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            TypedValue::List(items) => Some(items),
            _ => None,
        }
    }
}

/// Result of evaluating one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluated {
    pub value: TypedValue,
    /// Non-fatal problems (unresolved globals) to record on the owning node.
    pub warnings: Vec<String>,
}

/// A single named, typed parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub kind: ParamType,
    pub raw: ParamValue,
    pub default: ParamValue,
    #[serde(default)]
    pub read_only: bool,
    /// Allowed entries for `Menu` parameters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub menu: Vec<String>,
}

impl Parameter {
    fn new(name: impl Into<String>, kind: ParamType, default: ParamValue) -> Self {
        Self {
            name: name.into(),
            kind,
            raw: default.clone(),
            default,
            read_only: false,
            menu: vec![],
        }
    }

    pub fn string(name: impl Into<String>, default: impl Into<String>) -> Self {
        Self::new(name, ParamType::String, ParamValue::Text(default.into()))
    }

    pub fn int(name: impl Into<String>, default: i64) -> Self {
        Self::new(name, ParamType::Int, ParamValue::Int(default))
    }

    pub fn float(name: impl Into<String>, default: f64) -> Self {
        Self::new(name, ParamType::Float, ParamValue::Float(default))
    }

    pub fn toggle(name: impl Into<String>, default: bool) -> Self {
        Self::new(name, ParamType::Toggle, ParamValue::Toggle(default))
    }

    pub fn button(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Button, ParamValue::Null)
    }

    pub fn string_list(name: impl Into<String>, default: Vec<String>) -> Self {
        Self::new(name, ParamType::StringList, ParamValue::List(default))
    }

    pub fn menu(name: impl Into<String>, items: &[&str], default: &str) -> Self {
        let mut p = Self::new(name, ParamType::Menu, ParamValue::Text(default.to_string()));
        p.menu = items.iter().map(|s| s.to_string()).collect();
        p
    }

    /// Mark the parameter read-only.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Whether the raw value carries a `$NAME` expression.
    pub fn has_expression(&self) -> bool {
        self.kind.substitutes() && self.raw.has_expression()
    }

    /// Normalize an incoming value for this parameter's type.
    ///
    /// Shape mismatches are rejected here; textual values for numeric types
    /// are accepted and validated on evaluation.
    fn normalize(&self, value: ParamValue) -> Result<ParamValue> {
        let invalid = |message: String| KilnError::InvalidParameter {
            name: self.name.clone(),
            message,
        };

        if value == ParamValue::Null {
            return Ok(self.default.clone());
        }

        match self.kind {
            ParamType::Button => Err(invalid("buttons have no value; press them instead".into())),
            ParamType::String => match value {
                ParamValue::List(_) => Err(invalid("expected a string".into())),
                other => Ok(ParamValue::Text(other.as_display())),
            },
            ParamType::Menu => {
                let text = match value {
                    ParamValue::Int(i) => usize::try_from(i)
                        .ok()
                        .and_then(|i| self.menu.get(i).cloned())
                        .ok_or_else(|| invalid(format!("menu index {} out of range", i)))?,
                    ParamValue::Text(s) => s,
                    _ => return Err(invalid("expected a menu entry".into())),
                };
                if !expression::has_expression(&text) && !self.menu.iter().any(|m| *m == text) {
                    return Err(invalid(format!(
                        "'{}' is not one of [{}]",
                        text,
                        self.menu.join(", ")
                    )));
                }
                Ok(ParamValue::Text(text))
            }
            ParamType::Int => match value {
                ParamValue::Int(_) | ParamValue::Text(_) => Ok(value),
                ParamValue::Float(x) if x.fract() == 0.0 => Ok(ParamValue::Int(x as i64)),
                _ => Err(invalid("expected an integer".into())),
            },
            ParamType::Float => match value {
                ParamValue::Float(_) | ParamValue::Text(_) => Ok(value),
                ParamValue::Int(i) => Ok(ParamValue::Float(i as f64)),
                _ => Err(invalid("expected a number".into())),
            },
            ParamType::Toggle => match value {
                ParamValue::Toggle(_) | ParamValue::Text(_) => Ok(value),
                ParamValue::Int(i) => Ok(ParamValue::Toggle(i != 0)),
                _ => Err(invalid("expected a toggle".into())),
            },
            ParamType::StringList => match value {
                ParamValue::List(_) => Ok(value),
                ParamValue::Text(s) => Ok(ParamValue::List(vec![s])),
                _ => Err(invalid("expected a list of strings".into())),
            },
        }
    }

    /// Evaluate against a snapshot of the global table.
    pub fn evaluate(&self, globals: &GlobalTable) -> Result<Evaluated> {
        let mut warnings = Vec::new();
        let mut subst = |raw: &str| -> String {
            let sub = expression::substitute(raw, globals);
            for name in sub.unresolved {
                warnings.push(format!(
                    "Unresolved global ${} in parameter '{}'",
                    name, self.name
                ));
            }
            for name in sub.malformed {
                warnings.push(format!(
                    "Malformed global reference ${} in parameter '{}' (names are uppercase)",
                    name, self.name
                ));
            }
            sub.text
        };
        let invalid = |message: String| KilnError::InvalidParameter {
            name: self.name.clone(),
            message,
        };

        let value = match self.kind {
            ParamType::String => TypedValue::Text(subst(&self.raw.as_display())),
            ParamType::Menu => {
                let text = subst(&self.raw.as_display());
                if !self.menu.iter().any(|m| *m == text) {
                    return Err(invalid(format!("'{}' is not a menu entry", text)));
                }
                TypedValue::Text(text)
            }
            ParamType::StringList => match &self.raw {
                ParamValue::List(items) => TypedValue::List(items.iter().map(|s| subst(s)).collect()),
                ParamValue::Null => TypedValue::List(vec![]),
                other => TypedValue::List(vec![subst(&other.as_display())]),
            },
            ParamType::Int => match &self.raw {
                ParamValue::Int(i) => TypedValue::Int(*i),
                ParamValue::Text(s) => TypedValue::Int(
                    s.trim()
                        .parse::<i64>()
                        .map_err(|_| invalid(format!("'{}' is not an integer", s)))?,
                ),
                other => return Err(invalid(format!("'{}' is not an integer", other.as_display()))),
            },
            ParamType::Float => match &self.raw {
                ParamValue::Float(x) => TypedValue::Float(*x),
                ParamValue::Int(i) => TypedValue::Float(*i as f64),
                ParamValue::Text(s) => TypedValue::Float(
                    s.trim()
                        .parse::<f64>()
                        .map_err(|_| invalid(format!("'{}' is not a number", s)))?,
                ),
                other => return Err(invalid(format!("'{}' is not a number", other.as_display()))),
            },
            ParamType::Toggle => match &self.raw {
                ParamValue::Toggle(b) => TypedValue::Toggle(*b),
                ParamValue::Int(i) => TypedValue::Toggle(*i != 0),
                ParamValue::Text(s) => TypedValue::Toggle(
                    parse_toggle(s).ok_or_else(|| invalid(format!("'{}' is not a toggle", s)))?,
                ),
                other => return Err(invalid(format!("'{}' is not a toggle", other.as_display()))),
            },
            ParamType::Button => TypedValue::Toggle(false),
        };

        Ok(Evaluated { value, warnings })
    }
}

fn parse_toggle(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Some(true),
        "false" | "0" | "off" | "no" | "" => Some(false),
        _ => None,
    }
}

/// Ordered set of parameters owned by one node, plus pending button presses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterStore {
    params: Vec<Parameter>,
    pressed: Vec<String>,
}

impl ParameterStore {
    pub fn new(params: Vec<Parameter>) -> Self {
        Self {
            params,
            pressed: vec![],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Parameter> {
        self.params
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| KilnError::ParameterNotFound(name.to_string()))
    }

    pub fn get_raw(&self, name: &str) -> Result<&ParamValue> {
        self.get(name)
            .map(|p| &p.raw)
            .ok_or_else(|| KilnError::ParameterNotFound(name.to_string()))
    }

    /// Set a raw value. Returns whether the stored value changed.
    pub fn set(&mut self, name: &str, value: impl Into<ParamValue>) -> Result<bool> {
        let param = self.get_mut(name)?;
        if param.read_only {
            return Err(KilnError::ReadOnlyParameter(name.to_string()));
        }
        let normalized = param.normalize(value.into())?;
        if param.raw == normalized {
            return Ok(false);
        }
        param.raw = normalized;
        Ok(true)
    }

    /// The value `set` would store, without storing it. Node-type validators
    /// run against this form.
    pub fn normalize(&self, name: &str, value: impl Into<ParamValue>) -> Result<ParamValue> {
        self.get(name)
            .ok_or_else(|| KilnError::ParameterNotFound(name.to_string()))?
            .normalize(value.into())
    }

    /// Overwrite a value regardless of the read-only flag (owner-side updates
    /// and document import).
    pub fn force_set(&mut self, name: &str, value: impl Into<ParamValue>) -> Result<bool> {
        let param = self.get_mut(name)?;
        let normalized = param.normalize(value.into())?;
        if param.raw == normalized {
            return Ok(false);
        }
        param.raw = normalized;
        Ok(true)
    }

    pub fn evaluate(&self, name: &str, globals: &GlobalTable) -> Result<Evaluated> {
        let param = self
            .get(name)
            .ok_or_else(|| KilnError::ParameterNotFound(name.to_string()))?;
        if param.kind == ParamType::Button {
            return Ok(Evaluated {
                value: TypedValue::Toggle(self.is_pressed(name)),
                warnings: vec![],
            });
        }
        param.evaluate(globals)
    }

    /// Whether any parameter's raw value contains a `$NAME` expression.
    pub fn has_expressions(&self) -> bool {
        self.params.iter().any(|p| p.has_expression())
    }

    /// Queue a one-shot button press.
    pub fn press(&mut self, name: &str) -> Result<()> {
        let param = self
            .get(name)
            .ok_or_else(|| KilnError::ParameterNotFound(name.to_string()))?;
        if param.kind != ParamType::Button {
            return Err(KilnError::InvalidParameter {
                name: name.to_string(),
                message: format!("{} parameters cannot be pressed", param.kind),
            });
        }
        if !self.pressed.iter().any(|p| p == name) {
            self.pressed.push(name.to_string());
        }
        Ok(())
    }

    pub fn is_pressed(&self, name: &str) -> bool {
        self.pressed.iter().any(|p| p == name)
    }

    /// Drain pending presses.
    pub fn take_pressed(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pressed)
    }

    /// Raw values of every persistable parameter, keyed by name.
    pub fn raw_values(&self) -> BTreeMap<String, ParamValue> {
        self.params
            .iter()
            .filter(|p| p.kind != ParamType::Button)
            .map(|p| (p.name.clone(), p.raw.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globals::GlobalValue;

    fn store() -> ParameterStore {
        ParameterStore::new(vec![
            Parameter::string("path", "out.txt"),
            Parameter::int("count", 3),
            Parameter::float("ratio", 0.5),
            Parameter::toggle("enabled", true),
            Parameter::button("reload"),
            Parameter::string_list("tags", vec!["a".into()]),
            Parameter::menu("mode", &["overwrite", "append"], "overwrite"),
            Parameter::string("version", "1.0").read_only(),
        ])
    }

    #[test]
    fn test_global_substitution_and_warning() {
        let mut globals = GlobalTable::new();
        globals.set("PROJECT", "demo").unwrap();
        let mut params = store();
        params.set("path", "out_$PROJECT.txt").unwrap();

        let ev = params.evaluate("path", &globals).unwrap();
        assert_eq!(ev.value, TypedValue::Text("out_demo.txt".into()));
        assert!(ev.warnings.is_empty());

        globals.delete("PROJECT");
        let ev = params.evaluate("path", &globals).unwrap();
        assert_eq!(ev.value, TypedValue::Text("out_$PROJECT.txt".into()));
        assert_eq!(ev.warnings.len(), 1);
        assert!(ev.warnings[0].contains("$PROJECT"));
    }

    #[test]
    fn test_malformed_reference_warns() {
        let mut globals = GlobalTable::new();
        globals.set("PROJECT", "demo").unwrap();
        let mut params = store();
        params.set("path", "$project/$PROJECT.txt").unwrap();

        let ev = params.evaluate("path", &globals).unwrap();
        assert_eq!(ev.value, TypedValue::Text("$project/demo.txt".into()));
        assert_eq!(ev.warnings.len(), 1);
        assert!(ev.warnings[0].contains("Malformed global reference $project"), "{:?}", ev.warnings);
        assert!(ev.warnings[0].contains("'path'"));

        params.set("tags", vec!["$tag".to_string(), "$tag".to_string()]).unwrap();
        let ev = params.evaluate("tags", &globals).unwrap();
        assert_eq!(ev.warnings.len(), 2);
    }

    #[test]
    fn test_raw_and_evaluated_differ_only_with_expression() {
        let globals = GlobalTable::new();
        let params = store();
        let raw = params.get_raw("path").unwrap().clone();
        let ev = params.evaluate("path", &globals).unwrap();
        assert_eq!(raw, ParamValue::Text("out.txt".into()));
        assert_eq!(ev.value, TypedValue::Text("out.txt".into()));
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let mut globals = GlobalTable::new();
        globals.set("N", 4i64).unwrap();
        let mut params = store();
        params.set("path", "$N/$N").unwrap();
        let a = params.evaluate("path", &globals).unwrap();
        let b = params.evaluate("path", &globals).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_int_parse_failure_is_error() {
        let mut params = store();
        params.set("count", "twelve").unwrap();
        let err = params.evaluate("count", &GlobalTable::new()).unwrap_err();
        assert!(matches!(err, KilnError::InvalidParameter { .. }));

        params.set("count", " 12 ").unwrap();
        let ev = params.evaluate("count", &GlobalTable::new()).unwrap();
        assert_eq!(ev.value, TypedValue::Int(12));
    }

    #[test]
    fn test_numeric_types_bypass_substitution() {
        let mut globals = GlobalTable::new();
        globals.set("N", 5i64).unwrap();
        let mut params = store();
        params.set("count", "$N").unwrap();
        assert!(params.evaluate("count", &globals).is_err());
        assert!(!params.has_expressions());
    }

    #[test]
    fn test_float_and_toggle_coercion() {
        let mut params = store();
        params.set("ratio", 2i64).unwrap();
        let globals = GlobalTable::new();
        assert_eq!(
            params.evaluate("ratio", &globals).unwrap().value,
            TypedValue::Float(2.0)
        );
        params.set("enabled", "off").unwrap();
        assert_eq!(
            params.evaluate("enabled", &globals).unwrap().value,
            TypedValue::Toggle(false)
        );
        params.set("enabled", "maybe").unwrap();
        assert!(params.evaluate("enabled", &globals).is_err());
    }

    #[test]
    fn test_set_reports_change() {
        let mut params = store();
        assert!(!params.set("path", "out.txt").unwrap());
        assert!(params.set("path", "other.txt").unwrap());
        assert!(params.set("path", ParamValue::Null).unwrap());
        assert_eq!(params.get_raw("path").unwrap(), &ParamValue::from("out.txt"));
    }

    #[test]
    fn test_normalize_previews_stored_value() {
        let mut params = store();
        assert_eq!(params.normalize("count", 4.0).unwrap(), ParamValue::Int(4));
        assert_eq!(params.normalize("ratio", 2i64).unwrap(), ParamValue::Float(2.0));
        assert_eq!(params.normalize("count", ParamValue::Null).unwrap(), ParamValue::Int(3));
        assert!(params.normalize("count", 0.5).is_err());
        assert!(params.normalize("nope", 1i64).is_err());
        // Nothing was stored
        assert_eq!(params.get_raw("count").unwrap(), &ParamValue::Int(3));
        params.set("count", 4.0).unwrap();
        assert_eq!(params.get_raw("count").unwrap(), &ParamValue::Int(4));
    }

    #[test]
    fn test_read_only_rejected() {
        let mut params = store();
        let err = params.set("version", "2.0").unwrap_err();
        assert!(matches!(err, KilnError::ReadOnlyParameter(_)));
        assert!(params.force_set("version", "2.0").unwrap());
    }

    #[test]
    fn test_unknown_parameter() {
        let mut params = store();
        assert!(matches!(
            params.set("nope", 1i64),
            Err(KilnError::ParameterNotFound(_))
        ));
        assert!(params.get_raw("nope").is_err());
    }

    #[test]
    fn test_menu_validation() {
        let mut params = store();
        assert!(params.set("mode", "append").unwrap());
        assert!(params.set("mode", "truncate").is_err());
        params.set("mode", 0i64).unwrap();
        assert_eq!(params.get_raw("mode").unwrap(), &ParamValue::from("overwrite"));
        assert!(params.set("mode", 9i64).is_err());
    }

    #[test]
    fn test_button_press_is_one_shot() {
        let mut params = store();
        assert!(params.set("reload", true).is_err());
        params.press("reload").unwrap();
        params.press("reload").unwrap();
        assert!(params.is_pressed("reload"));
        assert_eq!(params.take_pressed(), vec!["reload".to_string()]);
        assert!(!params.is_pressed("reload"));
        assert!(params.press("path").is_err());
        assert!(!params.raw_values().contains_key("reload"));
    }

    #[test]
    fn test_string_list_substitutes_each_item() {
        let mut globals = GlobalTable::new();
        globals.set("X", GlobalValue::Text("1".into())).unwrap();
        let mut params = store();
        params
            .set("tags", vec!["$X".to_string(), "b".to_string()])
            .unwrap();
        assert!(params.has_expressions());
        let ev = params.evaluate("tags", &globals).unwrap();
        assert_eq!(ev.value, TypedValue::List(vec!["1".into(), "b".into()]));
    }

    #[test]
    fn test_null_resets_to_default() {
        let mut params = store();
        params.set("count", 10i64).unwrap();
        params.set("count", ParamValue::Null).unwrap();
        assert_eq!(params.get_raw("count").unwrap(), &ParamValue::Int(3));
    }
}
