//! Ownership label selector
//!
//! Parses the selector string a session is scoped by and evaluates it against
//! object labels. The same string is handed to the remote list calls, so the
//! local predicate mirrors the server-side grammar:
//!
//! ```text
//! app=blackduck,name!=legacy,tier in (web,api),env notin (dev)
//! ```
//!
//! Every clause must hold. A clause with no recognized operator is rejected
//! instead of being ignored, since a dropped clause would widen ownership.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;

/// Comparison applied by a single clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Operator::Equals => "=",
            Operator::NotEquals => "!=",
            Operator::In => "in",
            Operator::NotIn => "notin",
        };
        f.write_str(op)
    }
}

/// One `key <op> value(s)` constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
    pub values: Vec<String>,
}

impl Requirement {
    /// Evaluate against a label map. An absent key never matches.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let Some(actual) = labels.get(&self.key) else {
            return false;
        };
        let found = self.values.iter().any(|v| v.eq_ignore_ascii_case(actual));
        match self.operator {
            Operator::Equals | Operator::In => found,
            Operator::NotEquals | Operator::NotIn => !found,
        }
    }
}

/// Parsed ownership selector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    raw: String,
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Parse a comma-joined selector. The empty string selects everything.
    pub fn parse(selector: &str) -> Result<Self> {
        let mut requirements = Vec::new();
        for clause in split_clauses(selector) {
            let clause = clause.trim();
            if clause.is_empty() {
                continue;
            }
            requirements.push(parse_clause(selector, clause)?);
        }
        Ok(Self {
            raw: selector.trim().to_string(),
            requirements,
        })
    }

    /// Whether every clause holds for the given labels
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    /// Selector string as passed to remote list calls
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Value pinned by an `key=value` clause, if any
    pub fn equality_value(&self, key: &str) -> Option<&str> {
        self.requirements
            .iter()
            .find(|r| r.key == key && r.operator == Operator::Equals)
            .and_then(|r| r.values.first())
            .map(String::as_str)
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Split on commas that are not inside a parenthesised value list.
fn split_clauses(selector: &str) -> Vec<&str> {
    let mut clauses = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in selector.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                clauses.push(&selector[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    clauses.push(&selector[start..]);
    clauses
}

fn parse_clause(selector: &str, clause: &str) -> Result<Requirement> {
    let invalid = |reason: &str| Error::Selector {
        selector: selector.to_string(),
        clause: clause.to_string(),
        reason: reason.to_string(),
    };

    let (key, operator, rest) = if let Some((k, v)) = clause.split_once("!=") {
        (k, Operator::NotEquals, v)
    } else if let Some((k, v)) = clause.split_once("==") {
        (k, Operator::Equals, v)
    } else if let Some((k, v)) = clause.split_once('=') {
        (k, Operator::Equals, v)
    } else if let Some((k, v)) = clause.split_once(" notin ") {
        (k, Operator::NotIn, v)
    } else if let Some((k, v)) = clause.split_once(" in ") {
        (k, Operator::In, v)
    } else {
        return Err(invalid("has no recognized operator"));
    };

    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(invalid("has an invalid key"));
    }

    let values = match operator {
        Operator::Equals | Operator::NotEquals => {
            let value = rest.trim();
            if value.contains(['(', ')', '=', '!']) {
                return Err(invalid("has an invalid value"));
            }
            vec![value.to_string()]
        }
        Operator::In | Operator::NotIn => {
            let list = rest
                .trim()
                .strip_prefix('(')
                .and_then(|r| r.strip_suffix(')'))
                .ok_or_else(|| invalid("needs a parenthesised value list"))?;
            let values: Vec<String> = list
                .split(',')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            if values.is_empty() {
                return Err(invalid("has an empty value list"));
            }
            values
        }
    };

    Ok(Requirement {
        key: key.to_string(),
        operator,
        values,
    })
}
