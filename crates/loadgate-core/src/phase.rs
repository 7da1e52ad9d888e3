//! Phase classification: maps run time and concurrency to a symbolic tag.
//!
//! Rules are checked in order and the first match wins; when nothing matches
//! the tag is [`UNCLASSIFIED`]. Classification is pure and never influences
//! scheduling; it only scopes samples and thresholds.

use crate::error::ConfigError;
use crate::schedule::PhaseBoundary;
use std::fmt;
use std::time::Duration;

/// Tag assigned when no rule matches.
pub const UNCLASSIFIED: &str = "unclassified";

/// Condition a rule tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseMatch {
    /// Target concurrency within `min..=max` (`max` open when `None`).
    Concurrency {
        /// Lowest matching concurrency.
        min: u32,
        /// Highest matching concurrency.
        max: Option<u32>,
    },
    /// Run time within `[from, until)` (`until` open when `None`).
    Time {
        /// Window start.
        from: Duration,
        /// Window end, exclusive.
        until: Option<Duration>,
    },
}

impl PhaseMatch {
    fn matches(&self, elapsed: Duration, concurrency: u32) -> bool {
        match self {
            Self::Concurrency { min, max } => {
                concurrency >= *min && max.map_or(true, |max| concurrency <= max)
            }
            Self::Time { from, until } => {
                elapsed >= *from && until.map_or(true, |until| elapsed < until)
            }
        }
    }
}

/// One `condition -> tag` rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseRule {
    /// Tag assigned on match.
    pub tag: String,
    /// Condition.
    pub matcher: PhaseMatch,
}

impl PhaseRule {
    /// Rule matching a concurrency range.
    #[must_use]
    pub fn concurrency(tag: impl Into<String>, min: u32, max: Option<u32>) -> Self {
        Self {
            tag: tag.into(),
            matcher: PhaseMatch::Concurrency { min, max },
        }
    }

    /// Rule matching a time window.
    #[must_use]
    pub fn time(tag: impl Into<String>, from: Duration, until: Option<Duration>) -> Self {
        Self {
            tag: tag.into(),
            matcher: PhaseMatch::Time { from, until },
        }
    }
}

impl fmt::Display for PhaseRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.matcher {
            PhaseMatch::Concurrency { min, max: Some(max) } => {
                write!(f, "{}: {min}..={max} vus", self.tag)
            }
            PhaseMatch::Concurrency { min, max: None } => write!(f, "{}: >= {min} vus", self.tag),
            PhaseMatch::Time { from, until: Some(until) } => {
                write!(f, "{}: {from:?}..{until:?}", self.tag)
            }
            PhaseMatch::Time { from, until: None } => write!(f, "{}: {from:?}..", self.tag),
        }
    }
}

/// Ordered, read-only rule list.
#[derive(Debug, Clone, Default)]
pub struct PhaseClassifier {
    rules: Vec<PhaseRule>,
}

impl PhaseClassifier {
    /// Builds a classifier, rejecting empty tags and inverted ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPhaseRule`] for the first bad rule.
    pub fn new(rules: Vec<PhaseRule>) -> Result<Self, ConfigError> {
        for (index, rule) in rules.iter().enumerate() {
            let invalid = |message: &str| ConfigError::InvalidPhaseRule {
                index,
                tag: rule.tag.clone(),
                message: message.to_string(),
            };

            if rule.tag.trim().is_empty() {
                return Err(invalid("tag must not be empty"));
            }
            match rule.matcher {
                PhaseMatch::Concurrency { min, max: Some(max) } if max < min => {
                    return Err(invalid("concurrency max is below min"));
                }
                PhaseMatch::Time {
                    from,
                    until: Some(until),
                } if until <= from => {
                    return Err(invalid("time window ends before it starts"));
                }
                _ => {}
            }
        }
        Ok(Self { rules })
    }

    /// One time rule per stage, tagging each stage window with its name.
    ///
    /// Zero-length windows (step stages) are skipped. The final window stays
    /// open so a held profile keeps its last tag.
    #[must_use]
    pub fn from_boundaries(boundaries: &[PhaseBoundary]) -> Self {
        let windows: Vec<_> = boundaries.iter().filter(|b| b.end > b.start).collect();
        let last = windows.len().saturating_sub(1);
        let rules = windows
            .into_iter()
            .enumerate()
            .map(|(idx, boundary)| {
                let until = (idx != last).then_some(boundary.end);
                PhaseRule::time(boundary.name.clone(), boundary.start, until)
            })
            .collect();
        Self { rules }
    }

    /// Rules in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &[PhaseRule] {
        &self.rules
    }

    /// Tag for the given run time and concurrency.
    #[must_use]
    pub fn classify(&self, elapsed: Duration, concurrency: u32) -> &str {
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(elapsed, concurrency))
            .map_or(UNCLASSIFIED, |rule| rule.tag.as_str())
    }
}
