//! Input checks applied before a path segment is built from user input.

use crate::error::{Error, ErrorKind, Result};
use crate::reference::Reference;

/// sObject and field API names: a letter followed by letters, digits and
/// underscores.
pub(crate) fn is_safe_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|first| first.is_ascii_alphabetic())
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// Salesforce ids are 15 or 18 alphanumeric characters.
pub(crate) fn is_valid_salesforce_id(id: &str) -> bool {
    matches!(id.len(), 15 | 18) && id.chars().all(|c| c.is_ascii_alphanumeric())
}

pub(crate) fn sobject_name(name: &str) -> Result<&str> {
    if is_safe_name(name) {
        Ok(name)
    } else {
        Err(Error::new(ErrorKind::InvalidInput(format!(
            "invalid sObject name '{name}'"
        ))))
    }
}

pub(crate) fn field_name(name: &str) -> Result<&str> {
    if is_safe_name(name) {
        Ok(name)
    } else {
        Err(Error::new(ErrorKind::InvalidInput(format!(
            "invalid field name '{name}'"
        ))))
    }
}

pub(crate) fn record_id(id: &str) -> Result<&str> {
    if is_valid_salesforce_id(id) {
        Ok(id)
    } else {
        Err(Error::new(ErrorKind::InvalidInput(format!(
            "invalid Salesforce ID '{id}'"
        ))))
    }
}

/// Reference ids must be usable inside an `@{id.field}` expression.
pub(crate) fn reference_id(id: &str) -> Result<&str> {
    if !id.is_empty() && id.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
        Ok(id)
    } else {
        Err(Error::new(ErrorKind::InvalidInput(format!(
            "invalid reference id '{id}': only letters, digits and underscores are allowed"
        ))))
    }
}

/// Path segment for an id inside a composite subrequest url. Reference
/// expressions are kept verbatim so the server can substitute them.
pub(crate) fn id_segment(id: &str) -> String {
    if Reference::parse(id).is_some() {
        id.to_string()
    } else {
        urlencoding::encode(id).into_owned()
    }
}
