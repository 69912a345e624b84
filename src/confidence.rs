//! Confidence: the belief strength attached to every fact.
//!
//! Confidence is an integer percentage. It is the only input the revision
//! decider looks at when an incoming fact duplicates an existing one, so the
//! type refuses values outside `0..=100` at construction time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Belief strength in the closed range `0..=100`.
///
/// # Examples
///
/// ```
/// use kyrofacts::Confidence;
///
/// let c = Confidence::new(85).unwrap();
/// assert_eq!(c.value(), 85);
/// assert!(Confidence::new(101).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Confidence(u8);

impl Confidence {
    /// Highest possible confidence.
    pub const MAX: Self = Self(100);

    /// Lowest possible confidence.
    pub const MIN: Self = Self(0);

    /// Creates a confidence value.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ConfidenceOutOfRange` if `value > 100`.
    pub fn new(value: u8) -> Result<Self, ValidationError> {
        Self::try_from(i64::from(value))
    }

    /// Returns the raw percentage.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Mean of the given confidences, rounded half-up.
    ///
    /// Returns `None` for an empty input.
    #[must_use]
    pub fn average<I>(values: I) -> Option<Self>
    where
        I: IntoIterator<Item = Self>,
    {
        let mut sum = 0u64;
        let mut count = 0u64;
        for v in values {
            sum += u64::from(v.0);
            count += 1;
        }
        if count == 0 {
            return None;
        }
        // (2*sum + count) / (2*count) == round-half-up(sum / count)
        let avg = (2 * sum + count) / (2 * count);
        #[allow(clippy::cast_possible_truncation)]
        Some(Self(avg.min(100) as u8))
    }
}

impl TryFrom<i64> for Confidence {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match u8::try_from(value) {
            Ok(v) if v <= 100 => Ok(Self(v)),
            _ => Err(ValidationError::ConfidenceOutOfRange { value }),
        }
    }
}

impl From<Confidence> for u8 {
    fn from(c: Confidence) -> Self {
        c.0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}
