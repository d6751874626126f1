//! `$NAME` expressions inside parameter values.
//!
//! A reference is a `$` followed by a name made of uppercase ASCII letters,
//! digits and underscores, starting with a letter or underscore. Anything
//! else after a `$` is literal text. A `$` followed by something that looks
//! like a name but breaks that grammar (`$project`, `$Project`) is reported
//! as malformed so callers can warn about it.

use std::sync::OnceLock;

use regex::Regex;

use crate::globals::GlobalTable;

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"\$([A-Z_][A-Z0-9_]*)").expect("static token pattern"))
}

fn loose_regex() -> &'static Regex {
    static LOOSE: OnceLock<Regex> = OnceLock::new();
    LOOSE.get_or_init(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").expect("static loose pattern"))
}

fn name_regex() -> &'static Regex {
    static NAME: OnceLock<Regex> = OnceLock::new();
    NAME.get_or_init(|| Regex::new(r"^[A-Z_][A-Z0-9_]*$").expect("static name pattern"))
}

/// Result of substituting globals into a raw string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub text: String,
    /// Referenced names with no entry in the table, in order of appearance.
    pub unresolved: Vec<String>,
    /// `$word` tokens that are not valid names, deduplicated, in order of appearance.
    pub malformed: Vec<String>,
}

/// Whether `name` is usable as a global variable name.
pub fn is_valid_name(name: &str) -> bool {
    name_regex().is_match(name)
}

/// Whether the raw string contains at least one `$NAME` reference.
pub fn has_expression(raw: &str) -> bool {
    raw.contains('$') && token_regex().is_match(raw)
}

/// Replace every resolvable `$NAME` with the string form of its global.
///
/// Unresolved references are left verbatim and reported, as are malformed ones.
pub fn substitute(raw: &str, globals: &GlobalTable) -> Substitution {
    if !raw.contains('$') {
        return Substitution {
            text: raw.to_string(),
            unresolved: vec![],
            malformed: vec![],
        };
    }

    let mut malformed: Vec<String> = Vec::new();
    for caps in loose_regex().captures_iter(raw) {
        let name = &caps[1];
        if !is_valid_name(name) && !malformed.iter().any(|n| n == name) {
            malformed.push(name.to_string());
        }
    }

    let mut unresolved = Vec::new();
    let text = token_regex()
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match globals.get(name) {
                Some(value) => value.to_string(),
                None => {
                    if !unresolved.iter().any(|n: &String| n == name) {
                        unresolved.push(name.to_string());
                    }
                    caps[0].to_string()
                }
            }
        })
        .into_owned();

    Substitution {
        text,
        unresolved,
        malformed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globals::GlobalValue;

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("PROJECT"));
        assert!(is_valid_name("_TMP2"));
        assert!(is_valid_name("A_1"));
        assert!(!is_valid_name("project"));
        assert!(!is_valid_name("1ABC"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("A-B"));
    }

    #[test]
    fn test_has_expression() {
        assert!(has_expression("out_$PROJECT.txt"));
        assert!(!has_expression("costs $5"));
        assert!(!has_expression("$lower"));
        assert!(!has_expression("plain"));
    }

    #[test]
    fn test_substitute_reports_malformed_names() {
        let mut globals = GlobalTable::new();
        globals.set("PROJECT", GlobalValue::Text("demo".into())).unwrap();
        let sub = substitute("$project/$PROJECT/$project_2/$project", &globals);
        assert_eq!(sub.text, "$project/demo/$project_2/$project");
        assert_eq!(sub.malformed, vec!["project".to_string(), "project_2".to_string()]);
        assert!(sub.unresolved.is_empty());

        // Mixed case breaks the grammar too, even though a prefix would match
        let sub = substitute("$Project", &globals);
        assert_eq!(sub.malformed, vec!["Project".to_string()]);

        // Digits and lone dollars are plain text
        let sub = substitute("costs $5 or $", &globals);
        assert!(sub.malformed.is_empty());
        assert!(sub.unresolved.is_empty());
    }

    #[test]
    fn test_substitute_resolved() {
        let mut globals = GlobalTable::new();
        globals.set("PROJECT", GlobalValue::Text("demo".into())).unwrap();
        let sub = substitute("out_$PROJECT.txt", &globals);
        assert_eq!(sub.text, "out_demo.txt");
        assert!(sub.unresolved.is_empty());
    }

    #[test]
    fn test_substitute_unresolved_left_verbatim() {
        let globals = GlobalTable::new();
        let sub = substitute("out_$PROJECT.txt and $PROJECT", &globals);
        assert_eq!(sub.text, "out_$PROJECT.txt and $PROJECT");
        assert_eq!(sub.unresolved, vec!["PROJECT".to_string()]);
    }

    #[test]
    fn test_substitute_typed_values() {
        let mut globals = GlobalTable::new();
        globals.set("N", GlobalValue::Int(3)).unwrap();
        globals.set("ON", GlobalValue::Bool(true)).unwrap();
        let sub = substitute("$N-$ON", &globals);
        assert_eq!(sub.text, "3-true");
    }

    #[test]
    fn test_name_is_greedy() {
        let mut globals = GlobalTable::new();
        globals.set("AB", GlobalValue::Text("x".into())).unwrap();
        // `$ABC` refers to ABC, not AB followed by C
        let sub = substitute("$ABC", &globals);
        assert_eq!(sub.text, "$ABC");
        assert_eq!(sub.unresolved, vec!["ABC".to_string()]);
    }
}
