//! Fixed-timezone interpretation of database local times.
//!
//! A spec is a canonical zone name optionally followed by bracketed
//! extensions, e.g. `America/Chicago[dst_enabled_on_overlap:true]`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{Error, Result};

/// A timezone plus an optional preference for resolving DST overlaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimezoneSpec {
    zone: Tz,
    dst_enabled_on_overlap: Option<bool>,
}

impl TimezoneSpec {
    pub fn new(zone: Tz) -> Self {
        Self {
            zone,
            dst_enabled_on_overlap: None,
        }
    }

    pub fn utc() -> Self {
        Self::new(chrono_tz::UTC)
    }

    pub fn with_dst_preference(mut self, dst_enabled_on_overlap: bool) -> Self {
        self.dst_enabled_on_overlap = Some(dst_enabled_on_overlap);
        self
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    pub fn dst_enabled_on_overlap(&self) -> Option<bool> {
        self.dst_enabled_on_overlap
    }

    /// Resolve a wall-clock time in this zone to a UTC instant.
    pub fn to_utc(&self, local: NaiveDateTime) -> Result<DateTime<Utc>> {
        match self.zone.from_local_datetime(&local) {
            LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
            // The earlier instant of an overlap is the one still observing DST.
            LocalResult::Ambiguous(earliest, latest) => match self.dst_enabled_on_overlap {
                Some(true) => Ok(earliest.with_timezone(&Utc)),
                Some(false) => Ok(latest.with_timezone(&Utc)),
                None => Err(Error::AmbiguousLocalTime {
                    local: local.to_string(),
                    timezone: self.zone.name().to_string(),
                }),
            },
            LocalResult::None => Err(Error::NonexistentLocalTime {
                local: local.to_string(),
                timezone: self.zone.name().to_string(),
            }),
        }
    }

    /// Render a UTC instant as wall-clock time in this zone.
    pub fn to_local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.zone).naive_local()
    }
}

impl FromStr for TimezoneSpec {
    type Err = Error;

    fn from_str(spec: &str) -> Result<Self> {
        let invalid = |message: String| Error::InvalidTimezone {
            spec: spec.to_string(),
            message,
        };

        let (name, extensions) = match spec.find('[') {
            Some(open) => {
                let close = spec
                    .rfind(']')
                    .filter(|close| *close == spec.len() - 1 && *close > open)
                    .ok_or_else(|| invalid("unterminated extension block".to_string()))?;
                (&spec[..open], Some(&spec[open + 1..close]))
            }
            None => (spec, None),
        };

        let zone: Tz = name
            .trim()
            .parse()
            .map_err(|e| invalid(format!("unknown timezone: {}", e)))?;
        let mut timezone = TimezoneSpec::new(zone);

        for extension in extensions
            .into_iter()
            .flat_map(|ext| ext.split(';'))
            .filter(|ext| !ext.is_empty())
        {
            timezone = match extension {
                "dst_enabled_on_overlap:true" => timezone.with_dst_preference(true),
                "dst_enabled_on_overlap:false" => timezone.with_dst_preference(false),
                other => return Err(invalid(format!("invalid timezone extension `{}`", other))),
            };
        }

        Ok(timezone)
    }
}

impl fmt::Display for TimezoneSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.zone.name())?;
        if let Some(pref) = self.dst_enabled_on_overlap {
            write!(f, "[dst_enabled_on_overlap:{}]", pref)?;
        }
        Ok(())
    }
}
