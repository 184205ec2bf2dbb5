//! Scores bounded to `[0, 1]`, used for importance and confidence.

use serde::{Deserialize, Deserializer, Serialize};

use crate::{Error, Result};

/// A finite score in the closed unit interval.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct UnitScore(f64);

impl UnitScore {
    /// The lowest possible score.
    pub const ZERO: Self = Self(0.0);
    /// The neutral score used when a field is absent.
    pub const NEUTRAL: Self = Self(0.5);
    /// The highest possible score.
    pub const ONE: Self = Self(1.0);

    /// Validates `value` for the named field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ScoreOutOfRange`] when the value is not finite or lies
    /// outside `[0, 1]`.
    pub fn new(field: &'static str, value: f64) -> Result<Self> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::ScoreOutOfRange { field, value })
        }
    }

    /// Clamps an arbitrary value into the unit interval; non-finite input maps to zero.
    #[must_use]
    pub fn saturating(value: f64) -> Self {
        if value.is_finite() {
            Self(value.clamp(0.0, 1.0))
        } else {
            Self::ZERO
        }
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> f64 {
        self.0
    }
}

impl Default for UnitScore {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

impl<'de> Deserialize<'de> for UnitScore {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        Self::new("score", value).map_err(serde::de::Error::custom)
    }
}
