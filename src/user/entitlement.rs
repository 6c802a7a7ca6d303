//! Trial/subscription entitlement types.
//!
//! Every user is in exactly one of two states: Trial with a finite number of
//! remaining plays, or Subscribed until a date. A subscription that is past
//! its `effective_until` lapses back to a fresh trial the next time the
//! status is read.

use chrono::NaiveDate;
use serde::{Serialize, Serializer};

/// Plays granted to a fresh trial.
pub const INITIAL_PLAYCOUNT: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trial { remaining_playcount: i64 },
    Subscribed { effective_until: NaiveDate },
}

/// What is left after registering a play. Subscribed users always get
/// `Unlimited`, serialized as the string `"unlimited"` rather than a
/// made-up number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemainingPlays {
    Unlimited,
    Count(i64),
}

impl Serialize for RemainingPlays {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RemainingPlays::Unlimited => serializer.serialize_str("unlimited"),
            RemainingPlays::Count(count) => serializer.serialize_i64(*count),
        }
    }
}
