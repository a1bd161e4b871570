//! Range-expansion DSL for field lists.
//!
//! A spec such as `"d(1,3)=t;dsum"` widens to `["d1=t1", "d2=t2", "d3=t3", "dsum"]`.
//! Specs that do not look like `BASE(START,END)SUFFIX` pass through with their
//! alias stripped. [`widen_labeled_fields`] keeps those aliases for callers
//! that label rows with them.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{StatsError, StatsResult};

/// Upper bound on the number of names a single range may produce.
pub const MAX_WIDENED_FIELDS: usize = 10_000;

/// A field list as scripts pass it: one `;`-separated string or an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldList {
    Joined(String),
    List(Vec<String>),
}

impl FieldList {
    /// Split into individual specs; every element may itself hold `;`.
    fn specs(&self) -> Vec<&str> {
        match self {
            FieldList::Joined(s) => s.split(';').collect(),
            FieldList::List(items) => items.iter().flat_map(|s| s.split(';')).collect(),
        }
    }

    /// True for `""` and `[]`.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldList::Joined(s) => s.is_empty(),
            FieldList::List(items) => items.is_empty(),
        }
    }
}

impl From<&str> for FieldList {
    fn from(s: &str) -> Self {
        FieldList::Joined(s.to_string())
    }
}

impl From<Vec<String>> for FieldList {
    fn from(items: Vec<String>) -> Self {
        FieldList::List(items)
    }
}

fn range_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"([A-Za-z0-9_.]*)\( *([0-9]*) *, *([0-9]*) *\)(.*)")
            .expect("range pattern is a valid regex")
    })
}

/// Expand every range spec in `fields`.
///
/// An empty base (`"(1,3)"`) yields empty names, one per index. A range whose
/// bounds are missing yields nothing.
pub fn widen_fields(fields: &FieldList) -> StatsResult<Vec<String>> {
    widen(fields, false)
}

/// Like [`widen_fields`], but `name=alias` specs outside any range keep their
/// alias. Feed the result to [`separate_names_and_aliases`].
pub fn widen_labeled_fields(fields: &FieldList) -> StatsResult<Vec<String>> {
    widen(fields, true)
}

fn widen(fields: &FieldList, keep_plain_alias: bool) -> StatsResult<Vec<String>> {
    let mut widened = Vec::new();
    for field in fields.specs() {
        let mut parts = field.split('=');
        let name = parts.next().unwrap_or_default().trim();
        let alias = parts.next().map(str::trim).unwrap_or_default();

        let Some(caps) = range_pattern().captures(name) else {
            widened.push(if keep_plain_alias { field } else { name }.to_string());
            continue;
        };
        let base = &caps[1];
        let suffix = &caps[4];
        let (Ok(start), Ok(end)) = (caps[2].parse::<u64>(), caps[3].parse::<u64>()) else {
            continue;
        };
        if end >= start && (end - start) as usize >= MAX_WIDENED_FIELDS {
            return Err(StatsError::RangeTooLarge {
                max: MAX_WIDENED_FIELDS,
            });
        }

        for i in start..=end {
            let mut expanded = if base.is_empty() {
                String::new()
            } else {
                format!("{base}{i}{suffix}")
            };
            if !alias.is_empty() {
                expanded.push_str(&format!("={alias}{i}"));
            }
            widened.push(expanded);
        }
    }
    Ok(widened)
}

/// Field names paired index-for-index with their display aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamesAndAliases {
    pub names: Vec<String>,
    pub aliases: Vec<String>,
}

/// Split `name=alias` entries. Blank names are skipped, the first occurrence
/// of a name wins and a missing alias defaults to the name.
pub fn separate_names_and_aliases(fields: &[String]) -> NamesAndAliases {
    let mut out = NamesAndAliases::default();
    for field in fields {
        let mut parts = field.split('=');
        let name = parts.next().unwrap_or_default().trim();
        if name.is_empty() || out.names.iter().any(|n| n == name) {
            continue;
        }
        out.names.push(name.to_string());
        let alias = parts.next().map(str::trim).unwrap_or(name);
        out.aliases.push(alias.to_string());
    }
    out
}
