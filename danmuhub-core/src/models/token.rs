//! Administrative API token model

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

const TOKEN_LEN: usize = 20;
const BASE62: [char; 62] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I',
    'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'a', 'b',
    'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u',
    'v', 'w', 'x', 'y', 'z',
];

/// Generate a fresh 20-char base62 token value.
#[must_use]
pub fn generate_token_value() -> String {
    nanoid::nanoid!(TOKEN_LEN, &BASE62)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiToken {
    pub id: i64,
    pub name: String,
    pub token: String,
    pub enabled: bool,
    pub expires_at: Option<DateTime<Utc>>,
    /// -1 means unlimited.
    pub daily_call_limit: i32,
    pub daily_count: i32,
    pub last_reset_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl ApiToken {
    /// Whether a call with this token should be admitted `today`.
    /// The daily counter resets at local midnight; callers pass today's date.
    #[must_use]
    pub fn admits(&self, today: NaiveDate, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        if let Some(expiry) = self.expires_at {
            if now >= expiry {
                return false;
            }
        }
        if self.daily_call_limit < 0 {
            return true;
        }
        let spent = if self.last_reset_date == today {
            self.daily_count
        } else {
            0
        };
        spent < self.daily_call_limit
    }
}

/// User-Agent filter mode for the token-authenticated surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UaFilterMode {
    Off,
    Blacklist,
    Whitelist,
}

impl UaFilterMode {
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "blacklist" => Self::Blacklist,
            "whitelist" => Self::Whitelist,
            _ => Self::Off,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Blacklist => "blacklist",
            Self::Whitelist => "whitelist",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UaRule {
    pub id: i64,
    pub ua_string: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn token(limit: i32, count: i32, reset: NaiveDate) -> ApiToken {
        ApiToken {
            id: 1,
            name: "t".into(),
            token: generate_token_value(),
            enabled: true,
            expires_at: None,
            daily_call_limit: limit,
            daily_count: count,
            last_reset_date: reset,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn token_value_is_20_base62_chars() {
        let v = generate_token_value();
        assert_eq!(v.len(), 20);
        assert!(v.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn unlimited_token_always_admits() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 1).expect("valid date");
        let t = token(-1, 99_999, today);
        assert!(t.admits(today, Utc::now()));
    }

    #[test]
    fn exhausted_counter_rejects_until_midnight() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 1).expect("valid date");
        let tomorrow = today.succ_opt().expect("valid date");
        let t = token(10, 10, today);
        assert!(!t.admits(today, Utc::now()));
        // A new day means the stale counter no longer applies.
        assert!(t.admits(tomorrow, Utc::now()));
    }

    #[test]
    fn expired_token_rejects() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 1).expect("valid date");
        let mut t = token(-1, 0, today);
        t.expires_at = Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).single().expect("valid"));
        assert!(!t.admits(today, Utc::now()));
    }
}
