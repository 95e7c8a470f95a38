//! Ordered command rules.
//!
//! Each rule pairs an unanchored regex with an executable. Rules are
//! evaluated in configured order and the first match wins: later rules are
//! never consulted once one matches, even if running its executable fails.
//!
//! Patterns are compiled once when the rule set is built, so a malformed
//! pattern rejects the configuration instead of failing mid-dispatch.

use std::path::PathBuf;

use regex::Regex;
use tracing::debug;

use crate::error::ConfigError;

/// A single dispatch rule with a compiled regex.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Pattern as written in the configuration.
    pub pattern: String,
    /// Compiled regex, searched anywhere in the message text.
    pub regex: Regex,
    /// Program to run when the pattern matches.
    pub executable: PathBuf,
}

impl Rule {
    pub fn new(pattern: &str, executable: impl Into<PathBuf>) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: pattern.to_string(),
            regex: Regex::new(pattern)?,
            executable: executable.into(),
        })
    }

    /// Unanchored search of the pattern against the message text.
    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Immutable, ordered rule list.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Compile `(pattern, executable)` pairs in order.
    ///
    /// The first invalid pattern aborts construction with its position.
    pub fn compile<I, P, E>(specs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (P, E)>,
        P: AsRef<str>,
        E: Into<PathBuf>,
    {
        let mut rules = Vec::new();
        for (index, (pattern, executable)) in specs.into_iter().enumerate() {
            let pattern = pattern.as_ref();
            let rule = Rule::new(pattern, executable).map_err(|source| {
                ConfigError::InvalidRulePattern {
                    index,
                    pattern: pattern.to_string(),
                    source,
                }
            })?;
            rules.push(rule);
        }
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Find the first rule whose pattern matches `text`.
    ///
    /// Returns the rule's position alongside it. Returns `None` when no rule
    /// matches, which is not an error.
    pub fn first_match(&self, text: &str) -> Option<(usize, &Rule)> {
        for (index, rule) in self.rules.iter().enumerate() {
            if rule.matches(text) {
                debug!(rule = index, pattern = %rule.pattern, "Message matched rule");
                return Some((index, rule));
            }
        }
        None
    }
}
