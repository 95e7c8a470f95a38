//! Sender allow-list.
//!
//! Contacts are regular expressions searched against the sender identity,
//! not exact strings. `alice@example.com` also admits
//! `malice@example.com.evil`, and `.` in a pattern matches any character.
//! Anchor patterns (`^alice@example\.com$`) to get exact allow-listing.

use regex::Regex;
use tracing::debug;

use crate::error::ConfigError;

/// Compiled allow-list of sender patterns.
#[derive(Debug, Clone, Default)]
pub struct SenderFilter {
    patterns: Vec<Regex>,
}

impl SenderFilter {
    /// Compile the contact patterns. Any invalid pattern is fatal.
    pub fn new<I, S>(patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                Regex::new(p).map_err(|source| ConfigError::InvalidContactPattern {
                    pattern: p.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Whether `sender` matches at least one contact pattern.
    ///
    /// An empty allow-list admits nobody.
    pub fn allows(&self, sender: &str) -> bool {
        let allowed = self.patterns.iter().any(|re| re.is_match(sender));
        if !allowed {
            debug!(sender, "Sender matched no contact pattern");
        }
        allowed
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
