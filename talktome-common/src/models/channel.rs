use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Platform ids are Discord snowflakes. They are stored in Postgres `BIGINT`
/// columns, so anything above `i64::MAX` is rejected up front, as is zero.
macro_rules! snowflake_id {
    ($name:ident, $label:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "u64", into = "u64")]
        pub struct $name(u64);

        impl $name {
            pub fn new(raw: u64) -> Result<Self, Error> {
                if raw == 0 || raw > i64::MAX as u64 {
                    return Err(Error::Validation(format!("invalid {}: {}", $label, raw)));
                }
                Ok(Self(raw))
            }

            pub fn from_i64(raw: i64) -> Result<Self, Error> {
                if raw <= 0 {
                    return Err(Error::Validation(format!("invalid {}: {}", $label, raw)));
                }
                Ok(Self(raw as u64))
            }

            pub fn get(self) -> u64 {
                self.0
            }

            /// Lossless by construction.
            pub fn as_i64(self) -> i64 {
                self.0 as i64
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| Error::Validation(format!("malformed {}: {:?}", $label, s)))?;
                Self::new(raw)
            }
        }

        impl TryFrom<u64> for $name {
            type Error = Error;

            fn try_from(raw: u64) -> Result<Self, Self::Error> {
                Self::new(raw)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> u64 {
                id.0
            }
        }
    };
}

snowflake_id!(ChannelId, "channel id");
snowflake_id!(MessageId, "message id");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_snowflakes() {
        let id: ChannelId = "1234567890123".parse().unwrap();
        assert_eq!(id.get(), 1234567890123);
        assert_eq!(id.to_string(), "1234567890123");
    }

    #[test]
    fn rejects_malformed_channel_ids() {
        assert!(matches!("general".parse::<ChannelId>(), Err(Error::Validation(_))));
        assert!(matches!("-5".parse::<ChannelId>(), Err(Error::Validation(_))));
        assert!(matches!("0".parse::<ChannelId>(), Err(Error::Validation(_))));
        assert!(matches!(ChannelId::new(u64::MAX), Err(Error::Validation(_))));
        assert!(matches!(MessageId::from_i64(-1), Err(Error::Validation(_))));
    }

    #[test]
    fn round_trips_through_postgres_representation() {
        let id = MessageId::new(i64::MAX as u64).unwrap();
        assert_eq!(MessageId::from_i64(id.as_i64()).unwrap(), id);
    }
}
