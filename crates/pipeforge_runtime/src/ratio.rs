//! Progress ratios reported by the build script's introspection targets.

use serde::Serialize;
use std::fmt;

/// A `produced / expected` count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ratio {
    /// Artifacts that exist
    pub produced: u64,
    /// Artifacts the script declares
    pub expected: u64,
}

impl Ratio {
    /// Create a ratio
    #[must_use]
    pub const fn new(produced: u64, expected: u64) -> Self {
        Self { produced, expected }
    }

    /// Parse `"n / m"`, tolerating surrounding whitespace
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let mut tokens = text.split_whitespace();
        let produced = tokens.next()?.parse().ok()?;
        if tokens.next()? != "/" {
            return None;
        }
        let expected = tokens.next()?.parse().ok()?;
        if tokens.next().is_some() {
            return None;
        }
        Some(Self { produced, expected })
    }

    /// Every expected artifact exists
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.produced == self.expected
    }

    /// Progress in `[0, 1]`; an empty ratio counts as done
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.expected == 0 {
            1.0
        } else {
            (self.produced.min(self.expected) as f64) / (self.expected as f64)
        }
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.produced, self.expected)
    }
}

/// Outcome of one ratio query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RatioReading {
    /// The query printed a valid ratio
    Known(Ratio),
    /// The query failed, timed out or printed something else
    Unknown(String),
}

impl RatioReading {
    /// Interpret the standard output of a ratio query
    ///
    /// The last non-blank line is parsed so stray tool chatter before the
    /// ratio does not hide it.
    #[must_use]
    pub fn from_output(stdout: &str) -> Self {
        let line = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("");
        match Ratio::parse(line) {
            Some(ratio) => Self::Known(ratio),
            None => Self::Unknown(format!("unparsable ratio {:?}", line.trim())),
        }
    }

    /// The ratio when known
    #[must_use]
    pub fn ratio(&self) -> Option<Ratio> {
        match self {
            Self::Known(ratio) => Some(*ratio),
            Self::Unknown(_) => None,
        }
    }

    /// Known and complete
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.ratio().is_some_and(|r| r.is_complete())
    }
}

impl fmt::Display for RatioReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(ratio) => ratio.fmt(f),
            Self::Unknown(_) => f.write_str("unknown"),
        }
    }
}

/// Both readings parsed and each one is complete on its own
#[must_use]
pub fn is_complete(target: &RatioReading, intermediate: &RatioReading) -> bool {
    target.is_complete() && intermediate.is_complete()
}
