use std::collections::HashSet;

use regex::Regex;

use crate::{ConduitError, Result};

/// Decides whether a model name is excluded from caching.
///
/// Exact rules are checked first (O(1)), then regex patterns in insertion
/// order. An empty list never matches.
#[derive(Debug, Default)]
pub struct ExclusionList {
    exact: HashSet<String>,
    patterns: Vec<Regex>,
}

impl ExclusionList {
    /// Compiles the given exact names and regex patterns. Invalid patterns
    /// fail here so misconfiguration is caught at startup.
    pub fn new<S: AsRef<str>>(exact: &[S], patterns: &[S]) -> Result<Self> {
        let mut list = Self::default();

        for name in exact {
            let name = name.as_ref();
            if !name.is_empty() {
                list.exact.insert(name.to_string());
            }
        }

        for pattern in patterns {
            let pattern = pattern.as_ref();
            if pattern.is_empty() {
                continue;
            }
            let compiled = Regex::new(pattern).map_err(|err| {
                ConduitError::Other(format!("cache exclusion: invalid pattern {pattern:?}: {err}"))
            })?;
            list.patterns.push(compiled);
        }

        Ok(list)
    }

    pub fn matches(&self, model: &str) -> bool {
        if self.exact.contains(model) {
            return true;
        }
        self.patterns.iter().any(|re| re.is_match(model))
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
