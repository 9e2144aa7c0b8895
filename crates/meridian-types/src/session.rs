//! Per-partition session tokens.
//!
//! A session token is an opaque cursor a client presents to guarantee it
//! never observes data older than its own prior writes/reads on that
//! partition. The rendered form is `version#global_lsn`, where `version`
//! bumps on partition failover and `global_lsn` advances with every write.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Session progress for one partition range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    pub version: u64,
    pub global_lsn: i64,
}

impl SessionToken {
    pub fn new(version: u64, global_lsn: i64) -> Self {
        Self {
            version,
            global_lsn,
        }
    }

    /// Component-wise maximum; used when folding response tokens into the
    /// session container.
    pub fn merge(self, other: SessionToken) -> SessionToken {
        if self.version != other.version {
            // A version bump resets LSN numbering; the newer epoch wins.
            return if self.version > other.version { self } else { other };
        }
        SessionToken {
            version: self.version,
            global_lsn: self.global_lsn.max(other.global_lsn),
        }
    }

    /// Whether a replica that has observed `observed` satisfies a request
    /// carrying `self`.
    pub fn is_satisfied_by(self, observed: SessionToken) -> bool {
        if observed.version != self.version {
            return observed.version > self.version;
        }
        observed.global_lsn >= self.global_lsn
    }
}

impl Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.version, self.global_lsn)
    }
}

impl FromStr for SessionToken {
    type Err = SessionTokenParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (version, lsn) = s
            .split_once('#')
            .ok_or_else(|| SessionTokenParseError::Malformed(s.to_owned()))?;
        let version = version
            .parse()
            .map_err(|_| SessionTokenParseError::Malformed(s.to_owned()))?;
        let global_lsn = lsn
            .parse()
            .map_err(|_| SessionTokenParseError::Malformed(s.to_owned()))?;
        Ok(SessionToken {
            version,
            global_lsn,
        })
    }
}

/// Errors from parsing a session token header.
#[derive(Debug, thiserror::Error)]
pub enum SessionTokenParseError {
    #[error("malformed session token: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("0#42", 0, 42)]
    #[test_case("3#-1", 3, -1)]
    #[test_case("18446744073709551615#9000", u64::MAX, 9000)]
    fn parse_and_render(s: &str, version: u64, lsn: i64) {
        let token: SessionToken = s.parse().unwrap();
        assert_eq!(token, SessionToken::new(version, lsn));
        assert_eq!(token.to_string(), s);
    }

    #[test_case(""; "empty")]
    #[test_case("42"; "no separator")]
    #[test_case("a#1"; "bad version")]
    #[test_case("1#b"; "bad lsn")]
    fn rejects_malformed(s: &str) {
        assert!(s.parse::<SessionToken>().is_err());
    }

    #[test]
    fn merge_takes_componentwise_max() {
        let a = SessionToken::new(1, 50);
        let b = SessionToken::new(1, 40);
        assert_eq!(a.merge(b), SessionToken::new(1, 50));
        assert_eq!(b.merge(a), SessionToken::new(1, 50));
    }

    #[test]
    fn merge_prefers_newer_epoch() {
        let old = SessionToken::new(1, 500);
        let new = SessionToken::new(2, 3);
        assert_eq!(old.merge(new), new);
    }

    #[test]
    fn satisfaction() {
        let requested = SessionToken::new(1, 50);
        assert!(requested.is_satisfied_by(SessionToken::new(1, 50)));
        assert!(requested.is_satisfied_by(SessionToken::new(1, 51)));
        assert!(!requested.is_satisfied_by(SessionToken::new(1, 49)));
        // Failover epochs: newer always satisfies, older never does.
        assert!(requested.is_satisfied_by(SessionToken::new(2, 0)));
        assert!(!requested.is_satisfied_by(SessionToken::new(0, 500)));
    }
}
