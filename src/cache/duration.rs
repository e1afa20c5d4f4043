//! Cache duration tokens such as `3d` or `12h`

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const SECONDS_PER_HOUR: u64 = 60 * 60;
const SECONDS_PER_DAY: u64 = 24 * SECONDS_PER_HOUR;

/// Error for tokens outside the `<N>d` / `<N>h` grammar
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid cache duration format: {0:?} (expected e.g. \"3d\" or \"12h\")")]
pub struct InvalidDurationFormat(pub String);

/// A parsed cache freshness window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheDuration {
    seconds: u64,
}

impl CacheDuration {
    /// Parses a token matching `^(\d+)(d|h)$`
    pub fn parse(token: &str) -> Result<Self, InvalidDurationFormat> {
        let invalid = || InvalidDurationFormat(token.to_string());

        let unit_seconds = match token.as_bytes().last() {
            Some(b'd') => SECONDS_PER_DAY,
            Some(b'h') => SECONDS_PER_HOUR,
            _ => return Err(invalid()),
        };

        let digits = &token[..token.len() - 1];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let count: u64 = digits.parse().map_err(|_| invalid())?;
        let seconds = count
            .checked_mul(unit_seconds)
            .filter(|s| i64::try_from(*s).is_ok())
            .ok_or_else(invalid)?;

        Ok(Self { seconds })
    }

    /// Length of the window in seconds
    pub fn as_secs(&self) -> u64 {
        self.seconds
    }

    /// Length of the window in seconds as stored in SQLite
    ///
    /// `parse` keeps the value within `i64`.
    pub(crate) fn as_secs_i64(&self) -> i64 {
        self.seconds as i64
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.seconds)
    }
}

impl FromStr for CacheDuration {
    type Err = InvalidDurationFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CacheDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.seconds % SECONDS_PER_DAY == 0 {
            write!(f, "{}d", self.seconds / SECONDS_PER_DAY)
        } else {
            write!(f, "{}h", self.seconds / SECONDS_PER_HOUR)
        }
    }
}
