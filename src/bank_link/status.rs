//! The consent lifecycle of a bank link.

use std::{fmt::Display, str::FromStr};

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::Error;

/// The lifecycle status of a consent, both as tracked locally and as reported by the aggregator.
///
/// `Revoked` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkStatus {
    Pending,
    Active,
    Revoked,
    Expired,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Pending => "PENDING",
            LinkStatus::Active => "ACTIVE",
            LinkStatus::Revoked => "REVOKED",
            LinkStatus::Expired => "EXPIRED",
        }
    }

    /// Whether no further transition may leave this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkStatus::Revoked | LinkStatus::Expired)
    }

    /// The statuses from which a link may move to `self`.
    pub fn legal_sources(&self) -> &'static [LinkStatus] {
        match self {
            LinkStatus::Pending => &[],
            LinkStatus::Active => &[LinkStatus::Pending],
            LinkStatus::Revoked | LinkStatus::Expired => &[LinkStatus::Pending, LinkStatus::Active],
        }
    }

    /// Whether moving from `self` to `target` is a legal, state-changing transition.
    pub fn can_transition_to(&self, target: LinkStatus) -> bool {
        target.legal_sources().contains(self)
    }
}

impl Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LinkStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(LinkStatus::Pending),
            "ACTIVE" => Ok(LinkStatus::Active),
            "REVOKED" => Ok(LinkStatus::Revoked),
            "EXPIRED" => Ok(LinkStatus::Expired),
            other => Err(Error::MalformedRequest(format!(
                "unknown consent status \"{other}\""
            ))),
        }
    }
}

impl ToSql for LinkStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for LinkStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error: Error| FromSqlError::Other(Box::new(error)))
    }
}

#[cfg(test)]
mod tests {
    use super::LinkStatus::{self, *};

    const ALL: [LinkStatus; 4] = [Pending, Active, Revoked, Expired];

    #[test]
    fn legal_transitions() {
        assert!(Pending.can_transition_to(Active));
        assert!(Pending.can_transition_to(Revoked));
        assert!(Pending.can_transition_to(Expired));
        assert!(Active.can_transition_to(Revoked));
        assert!(Active.can_transition_to(Expired));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for source in [Revoked, Expired] {
            assert!(source.is_terminal());
            for target in ALL {
                assert!(
                    !source.can_transition_to(target),
                    "{source} -> {target} should be rejected"
                );
            }
        }
    }

    #[test]
    fn nothing_returns_to_pending() {
        for source in ALL {
            assert!(!source.can_transition_to(Pending));
        }
        assert!(!Active.can_transition_to(Active));
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("active".parse::<LinkStatus>().unwrap(), Active);
        assert_eq!(" Revoked ".parse::<LinkStatus>().unwrap(), Revoked);
        assert!("PAUSED".parse::<LinkStatus>().is_err());
    }
}
