use serde::{Deserialize, Serialize};

/// The three states a score cell can hold. Status alone decides whether the
/// cell takes part in an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "raw", rename_all = "snake_case")]
pub enum ScoreStatus {
    NoMark,
    Zero,
    Scored(f64),
}

impl ScoreStatus {
    /// Maps a stored `(status, raw_value)` pair. Unknown statuses keep the
    /// raw value if there is one; a stored "scored" with raw 0 is a no mark.
    pub fn from_stored(status: &str, raw_value: Option<f64>) -> Self {
        match status {
            "no_mark" => ScoreStatus::NoMark,
            "zero" => ScoreStatus::Zero,
            "scored" => match raw_value {
                Some(v) if v > 0.0 => ScoreStatus::Scored(v),
                _ => ScoreStatus::NoMark,
            },
            _ => raw_value
                .filter(|v| *v > 0.0)
                .map(ScoreStatus::Scored)
                .unwrap_or(ScoreStatus::NoMark),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScoreStatus::NoMark => "no_mark",
            ScoreStatus::Zero => "zero",
            ScoreStatus::Scored(_) => "scored",
        }
    }

    /// Raw value for counted states; `None` for no mark.
    pub fn raw(self) -> Option<f64> {
        match self {
            ScoreStatus::NoMark => None,
            ScoreStatus::Zero => Some(0.0),
            ScoreStatus::Scored(v) => Some(v),
        }
    }

    /// Percent of `out_of`; `None` for no mark. A non-positive denominator
    /// yields 0 rather than a division error.
    pub fn percent(self, out_of: f64) -> Option<f64> {
        let raw = self.raw()?;
        if out_of > 0.0 {
            Some(100.0 * raw / out_of)
        } else {
            Some(0.0)
        }
    }

    pub fn counts(self) -> bool {
        !matches!(self, ScoreStatus::NoMark)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StateCounts {
    pub scored: usize,
    pub zero: usize,
    pub no_mark: usize,
}

impl StateCounts {
    pub fn record(&mut self, s: ScoreStatus) {
        match s {
            ScoreStatus::NoMark => self.no_mark += 1,
            ScoreStatus::Zero => self.zero += 1,
            ScoreStatus::Scored(_) => self.scored += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.scored + self.zero + self.no_mark
    }
}
