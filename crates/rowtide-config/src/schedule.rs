use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;

/// A fixed run interval such as `30s`, `5m`, `1h` or `500ms`.
/// A bare number is taken as seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    interval: Duration,
}

impl Schedule {
    pub fn every(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl FromStr for Schedule {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = |message: &str| ConfigError::InvalidSchedule {
            value: value.to_string(),
            message: message.to_string(),
        };

        let trimmed = value.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);
        let amount: f64 = number
            .parse()
            .map_err(|_| invalid("expected a number followed by ms, s, m, h or d"))?;

        let seconds = match unit.trim() {
            "ms" => amount / 1000.0,
            "" | "s" => amount,
            "m" => amount * 60.0,
            "h" => amount * 3600.0,
            "d" => amount * 86400.0,
            _ => return Err(invalid("unknown unit, expected ms, s, m, h or d")),
        };

        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(invalid("interval must be positive"));
        }

        let interval =
            Duration::try_from_secs_f64(seconds).map_err(|_| invalid("interval is too large"))?;
        Ok(Schedule::every(interval))
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "every {:?}", self.interval)
    }
}

impl<'de> Deserialize<'de> for Schedule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
