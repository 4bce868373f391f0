//! `${name}` interpolation for scenario values

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{E2eError, E2eResult};

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z0-9_.\-]+)\}").expect("placeholder regex is valid"))
}

/// Names of the `${name}` placeholders in `input`
pub fn placeholders(input: &str) -> impl Iterator<Item = &str> {
    placeholder()
        .captures_iter(input)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
}

#[derive(Debug, Clone, Default)]
pub struct Vars {
    values: BTreeMap<String, String>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn extend<I, K, V>(&mut self, iter: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in iter {
            self.set(k, v);
        }
    }

    /// Replace every `${name}`. Unknown names are an error, not an empty string.
    pub fn interpolate(&self, input: &str) -> E2eResult<String> {
        let mut out = String::with_capacity(input.len());
        let mut last = 0;

        for caps in placeholder().captures_iter(input) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let value = self
                .get(name.as_str())
                .ok_or_else(|| E2eError::UnknownVariable(name.as_str().to_string()))?;
            out.push_str(&input[last..whole.start()]);
            out.push_str(value);
            last = whole.end();
        }
        out.push_str(&input[last..]);
        Ok(out)
    }

    /// Interpolate every string inside a JSON value
    pub fn interpolate_json(&self, value: &Value) -> E2eResult<Value> {
        Ok(match value {
            Value::String(s) => Value::String(self.interpolate(s)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.interpolate_json(v))
                    .collect::<E2eResult<_>>()?,
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), self.interpolate_json(v)?)))
                    .collect::<E2eResult<_>>()?,
            ),
            other => other.clone(),
        })
    }
}

/// Render a captured JSON value as a variable
pub fn value_to_var(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> Vars {
        let mut vars = Vars::new();
        vars.extend([("admin.token", "t0k"), ("member_id", "42"), ("run_id", "ab12cd34")]);
        vars
    }

    #[test]
    fn replaces_known_names() {
        let out = vars().interpolate("/api/members/${member_id}?run=${run_id}").unwrap();
        assert_eq!(out, "/api/members/42?run=ab12cd34");
    }

    #[test]
    fn leaves_plain_text_alone() {
        assert_eq!(vars().interpolate("costs $5 {ok}").unwrap(), "costs $5 {ok}");
    }

    #[test]
    fn unknown_names_fail() {
        let err = vars().interpolate("Bearer ${missing}").unwrap_err();
        assert!(matches!(err, E2eError::UnknownVariable(name) if name == "missing"));
    }

    #[test]
    fn walks_json_bodies() {
        let body = json!({"phone": "+1${member_id}", "tags": ["${run_id}", 3], "n": null});
        let out = vars().interpolate_json(&body).unwrap();
        assert_eq!(out, json!({"phone": "+142", "tags": ["ab12cd34", 3], "n": null}));
    }

    #[test]
    fn captured_values_render_plainly() {
        assert_eq!(value_to_var(&json!("x")), "x");
        assert_eq!(value_to_var(&json!(3)), "3");
        assert_eq!(value_to_var(&json!(true)), "true");
    }
}
