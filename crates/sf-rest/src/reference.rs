//! Symbolic references to the result of an earlier subrequest.
//!
//! A [`Reference`] is an immutable path such as `Account_create_0.id` or
//! `Query_0.records[0].Id`. It serializes to the `@{...}` expression the
//! composite API substitutes server-side, and can be evaluated locally
//! against an executed subrequest's body.

use std::fmt;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// Matches `@{referenceId.path[0].more}` expressions.
static REFERENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@\{([A-Za-z0-9_]+)((?:\.[A-Za-z0-9_]+|\[[0-9]+\])*)\}").expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Field(String),
    Index(usize),
}

/// Path into the eventual response body of a subrequest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    reference_id: String,
    path: Vec<Segment>,
}

impl Reference {
    pub(crate) fn new(reference_id: impl Into<String>) -> Self {
        Self {
            reference_id: reference_id.into(),
            path: Vec::new(),
        }
    }

    /// Reference id of the subrequest this points into.
    pub fn reference_id(&self) -> &str {
        &self.reference_id
    }

    /// Descend into a field.
    pub fn field(&self, name: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.path.push(Segment::Field(name.into()));
        next
    }

    /// Descend into an array element.
    pub fn index(&self, index: usize) -> Self {
        let mut next = self.clone();
        next.path.push(Segment::Index(index));
        next
    }

    /// Shorthand for `field("id")`, the id returned by create and upsert.
    pub fn id(&self) -> Self {
        self.field("id")
    }

    /// Evaluate the path against a response body.
    pub fn resolve<'a>(&self, body: &'a Value) -> Option<&'a Value> {
        self.path.iter().try_fold(body, |value, segment| match segment {
            Segment::Field(name) => value.get(name.as_str()),
            Segment::Index(index) => value.get(*index),
        })
    }

    /// Every reference embedded in `text`.
    pub(crate) fn find_all(text: &str) -> Vec<Reference> {
        REFERENCE_PATTERN
            .captures_iter(text)
            .filter_map(|caps| Reference::parse(caps.get(0)?.as_str()))
            .collect()
    }

    /// Parse a complete `@{...}` expression.
    pub(crate) fn parse(expression: &str) -> Option<Reference> {
        let inner = expression.strip_prefix("@{")?.strip_suffix('}')?;
        let split = inner.find(['.', '[']).unwrap_or(inner.len());
        let (reference_id, mut rest) = inner.split_at(split);
        if reference_id.is_empty() {
            return None;
        }

        let mut reference = Reference::new(reference_id);
        while !rest.is_empty() {
            if let Some(tail) = rest.strip_prefix('.') {
                let end = tail.find(['.', '[']).unwrap_or(tail.len());
                if end == 0 {
                    return None;
                }
                reference.path.push(Segment::Field(tail[..end].to_string()));
                rest = &tail[end..];
            } else if let Some(tail) = rest.strip_prefix('[') {
                let end = tail.find(']')?;
                reference.path.push(Segment::Index(tail[..end].parse().ok()?));
                rest = &tail[end + 1..];
            } else {
                return None;
            }
        }
        Some(reference)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{{{}", self.reference_id)?;
        for segment in &self.path {
            match segment {
                Segment::Field(name) => write!(f, ".{name}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        f.write_str("}")
    }
}

impl Serialize for Reference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl From<Reference> for Value {
    fn from(reference: Reference) -> Self {
        Value::String(reference.to_string())
    }
}

/// Collect the references embedded anywhere in a JSON value.
pub(crate) fn references_in_value(value: &Value, out: &mut Vec<Reference>) {
    match value {
        Value::String(text) => out.extend(Reference::find_all(text)),
        Value::Array(items) => items.iter().for_each(|item| references_in_value(item, out)),
        Value::Object(map) => map.values().for_each(|item| references_in_value(item, out)),
        _ => {}
    }
}

/// Replace references with the values they point to.
///
/// A string that is exactly one reference takes the referenced value as-is;
/// references inside longer strings are substituted textually. `lookup`
/// returns the executed body for a reference id.
pub(crate) fn substitute<'a>(value: &Value, lookup: &impl Fn(&str) -> Option<&'a Value>) -> Value {
    match value {
        Value::String(text) => {
            if let Some(reference) = Reference::parse(text) {
                if let Some(resolved) = lookup(reference.reference_id())
                    .and_then(|body| reference.resolve(body))
                {
                    return resolved.clone();
                }
                return value.clone();
            }
            let replaced = REFERENCE_PATTERN.replace_all(text, |caps: &regex_lite::Captures<'_>| {
                let expression = &caps[0];
                Reference::parse(expression)
                    .and_then(|reference| {
                        lookup(reference.reference_id())
                            .and_then(|body| reference.resolve(body))
                            .map(value_to_text)
                    })
                    .unwrap_or_else(|| expression.to_string())
            });
            Value::String(replaced.into_owned())
        }
        Value::Array(items) => Value::Array(items.iter().map(|item| substitute(item, lookup)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), substitute(item, lookup)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display_and_serialize() {
        let reference = Reference::new("Query_0").field("records").index(0).field("Id");
        assert_eq!(reference.to_string(), "@{Query_0.records[0].Id}");
        assert_eq!(
            serde_json::to_value(&reference).unwrap(),
            json!("@{Query_0.records[0].Id}")
        );

        let body = json!({"AccountId": Reference::new("Account_create_0").id()});
        assert_eq!(body["AccountId"], "@{Account_create_0.id}");
    }

    #[test]
    fn test_parse_matches_display() {
        let reference = Reference::new("Query_0").field("records").index(2).field("Id");
        assert_eq!(Reference::parse(&reference.to_string()), Some(reference));
        assert_eq!(Reference::parse("@{}"), None);
        assert_eq!(Reference::parse("@{Query_0.}"), None);
        assert_eq!(Reference::parse("Query_0.id"), None);
    }

    #[test]
    fn test_resolve() {
        let body = json!({"records": [{"Id": "001A"}, {"Id": "001B"}]});
        let reference = Reference::new("Query_0").field("records").index(1).field("Id");
        assert_eq!(reference.resolve(&body), Some(&json!("001B")));
        assert_eq!(Reference::new("Query_0").field("missing").resolve(&body), None);
    }

    #[test]
    fn test_find_all_in_url_and_body() {
        let refs = Reference::find_all("/services/data/v62.0/sobjects/Account/@{Account_create_0.id}");
        assert_eq!(refs, vec![Reference::new("Account_create_0").id()]);

        let mut found = Vec::new();
        references_in_value(
            &json!({"a": "@{A_0.id}", "b": ["x @{B_1.records[0].Id} y"], "c": 3}),
            &mut found,
        );
        let ids: Vec<_> = found.iter().map(Reference::reference_id).collect();
        assert_eq!(ids, vec!["A_0", "B_1"]);
    }

    #[test]
    fn test_substitute() {
        let account = json!({"id": "001xx000003DGb2AAG", "success": true});
        let lookup = |id: &str| (id == "Account_create_0").then_some(&account);

        let body = json!({
            "AccountId": "@{Account_create_0.id}",
            "Description": "child of @{Account_create_0.id}",
            "Other": "@{Unknown_0.id}"
        });
        let resolved = substitute(&body, &lookup);
        assert_eq!(resolved["AccountId"], "001xx000003DGb2AAG");
        assert_eq!(resolved["Description"], "child of 001xx000003DGb2AAG");
        assert_eq!(resolved["Other"], "@{Unknown_0.id}");
    }
}
