//! Time-derived server names.
//!
//! A name is the local wall-clock time at second granularity (`HHMMSS`). Two
//! harness runs started in the same second would pick the same name, so
//! generation fails on a collision instead of retrying: retrying within the
//! same second cannot produce anything different.

use std::fmt;

use anyhow::Result;
use chrono::{DateTime, TimeZone};

use crate::error::HarnessError;

const NAME_FORMAT: &str = "%H%M%S";

/// Server name addressing one controlled editor over the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity(String);

impl SessionIdentity {
    /// Build the candidate for `now` and reject it if `registered` already
    /// contains it. The comparison ignores case because Vim upper-cases
    /// server names on some platforms.
    pub fn generate<Tz>(now: &DateTime<Tz>, registered: &[String]) -> Result<Self>
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        let candidate = now.format(NAME_FORMAT).to_string();
        if registered
            .iter()
            .any(|name| name.eq_ignore_ascii_case(&candidate))
        {
            return Err(HarnessError::Collision { name: candidate }.into());
        }
        Ok(Self(candidate))
    }

    /// Wrap a name chosen elsewhere, e.g. `gvimctl expr --server`.
    pub fn from_existing(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use proptest::prelude::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2026, 10, 18)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
            .and_utc()
    }

    #[test]
    fn name_is_zero_padded_time_of_day() {
        let id = SessionIdentity::generate(&at(9, 5, 7), &[]).unwrap();
        assert_eq!(id.as_str(), "090507");
        assert_eq!(id.to_string(), "090507");
    }

    #[test]
    fn unrelated_servers_do_not_collide() {
        let registered = vec!["GVIM".to_string(), "142529".to_string()];
        let id = SessionIdentity::generate(&at(14, 25, 30), &registered).unwrap();
        assert_eq!(id.as_str(), "142530");
    }

    #[test]
    fn existing_name_is_collision() {
        let registered = vec!["GVIM".to_string(), "142530".to_string()];
        let err = SessionIdentity::generate(&at(14, 25, 30), &registered).unwrap_err();
        match err.downcast_ref::<HarnessError>() {
            Some(HarnessError::Collision { name }) => assert_eq!(name, "142530"),
            other => panic!("expected collision, got {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn generated_name_never_in_registered_list(
            h in 0u32..24,
            m in 0u32..60,
            s in 0u32..60,
            others in proptest::collection::vec("[0-9A-Za-z]{1,8}", 0..8),
        ) {
            match SessionIdentity::generate(&at(h, m, s), &others) {
                Ok(id) => prop_assert!(
                    others.iter().all(|o| !o.eq_ignore_ascii_case(id.as_str()))
                ),
                Err(err) => {
                    let collided = matches!(
                        err.downcast_ref::<HarnessError>(),
                        Some(HarnessError::Collision { .. })
                    );
                    prop_assert!(collided, "expected a collision error, got {}", err);
                }
            }
        }

        #[test]
        fn collision_ignores_case(h in 0u32..24, m in 0u32..60, s in 0u32..60) {
            let now = at(h, m, s);
            let taken = now.format(NAME_FORMAT).to_string().to_lowercase();
            prop_assert!(SessionIdentity::generate(&now, &[taken]).is_err());
        }
    }
}
