//! Field addressing: document-relative names, absolute names and aliases.
//!
//! A key such as `points` is relative and is stored as `<docid>.points`.
//! A key that already starts with `<digits>.` is absolute and left alone.
//!
//! Aliases resolve asymmetrically: reads use the alias key itself, writes go
//! to the normalized alias target.

use std::sync::OnceLock;

use regex::Regex;

use crate::envelope::AliasTable;

fn absolute_key() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9]+\.").expect("absolute key pattern is a valid regex"))
}

fn document_id() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[0-9]+\.").expect("document id pattern is a valid regex"))
}

/// The `<digits>.` prefix of a task id, e.g. `"12."` for `"12.grader"`.
pub fn document_prefix(task_id: &str) -> Option<String> {
    document_id().find(task_id).map(|m| m.as_str().to_string())
}

/// Whether `key` already carries a document prefix.
pub fn is_absolute(key: &str) -> bool {
    absolute_key().is_match(key)
}

/// Maps script-visible field names to storage keys for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldResolver {
    doc_prefix: String,
    aliases: AliasTable,
}

impl FieldResolver {
    pub fn new(doc_prefix: impl Into<String>, aliases: AliasTable) -> Self {
        Self {
            doc_prefix: doc_prefix.into(),
            aliases,
        }
    }

    pub fn doc_prefix(&self) -> &str {
        &self.doc_prefix
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// Prefix relative keys with the current document id. Idempotent.
    pub fn normalize(&self, key: &str) -> String {
        if is_absolute(key) {
            key.to_string()
        } else {
            format!("{}{}", self.doc_prefix, key)
        }
    }

    pub fn resolve_for_read(&self, key: &str) -> String {
        if self.aliases.contains_key(key) {
            key.to_string()
        } else {
            self.normalize(key)
        }
    }

    pub fn resolve_for_write(&self, key: &str) -> String {
        match self.aliases.get(key) {
            Some(target) => self.normalize(target),
            None => self.normalize(key),
        }
    }
}
