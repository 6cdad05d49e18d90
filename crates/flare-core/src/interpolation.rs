//! `${...}` expressions in trigger variables.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static EXPRESSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\s*([^}]+?)\s*\}").expect("static expression pattern"));

/// How a trigger variable value reads before resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableValue<'a> {
    Missing,
    Literal(&'a str),
    /// Value contains at least one `${...}`; carries the raw value.
    Expression(&'a str),
}

impl<'a> VariableValue<'a> {
    pub fn classify(value: Option<&'a str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => VariableValue::Missing,
            Some(v) if contains_expression(v) => VariableValue::Expression(v),
            Some(v) => VariableValue::Literal(v),
        }
    }

    pub fn is_expression(&self) -> bool {
        matches!(self, VariableValue::Expression(_))
    }
}

pub fn contains_expression(value: &str) -> bool {
    EXPRESSION.is_match(value)
}

/// Names referenced by `${...}` expressions, in order of appearance.
pub fn referenced_names(value: &str) -> Vec<&str> {
    EXPRESSION
        .captures_iter(value)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect()
}

/// Replace every `${name}` whose name is known; unknown expressions stay in place.
pub fn substitute(input: &str, values: &HashMap<String, String>) -> String {
    EXPRESSION
        .replace_all(input, |caps: &regex::Captures| {
            let name = caps.get(1).map_or("", |m| m.as_str());
            match values.get(name) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
