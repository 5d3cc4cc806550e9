use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A usage ceiling derived from subscription tier. The wire shape is loose
/// (`number | "unlimited"`), so serialization is implemented by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quota {
    Unlimited,
    Limited(u32),
}

impl Quota {
    /// Whether one more use is allowed given `used` so far.
    pub fn allows(&self, used: u64) -> bool {
        match self {
            Quota::Unlimited => true,
            Quota::Limited(n) => used < u64::from(*n),
        }
    }

    /// DB encoding: NULL means unlimited.
    pub fn from_column(value: Option<i64>) -> Self {
        match value {
            None => Quota::Unlimited,
            Some(n) => Quota::Limited(n.max(0) as u32),
        }
    }

    pub fn to_column(&self) -> Option<i64> {
        match self {
            Quota::Unlimited => None,
            Quota::Limited(n) => Some(i64::from(*n)),
        }
    }
}

impl Serialize for Quota {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Quota::Unlimited => serializer.serialize_str("unlimited"),
            Quota::Limited(n) => serializer.serialize_u32(*n),
        }
    }
}

impl<'de> Deserialize<'de> for Quota {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct QuotaVisitor;

        impl<'de> Visitor<'de> for QuotaVisitor {
            type Value = Quota;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a non-negative integer or the string \"unlimited\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Quota, E> {
                u32::try_from(v)
                    .map(Quota::Limited)
                    .map_err(|_| E::custom("quota out of range"))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Quota, E> {
                if v < 0 {
                    return Err(E::custom("quota must be non-negative"));
                }
                self.visit_u64(v as u64)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Quota, E> {
                match v {
                    "unlimited" => Ok(Quota::Unlimited),
                    other => Err(E::custom(format!("unknown quota value '{}'", other))),
                }
            }
        }

        deserializer.deserialize_any(QuotaVisitor)
    }
}

/// Which quota a `QuotaExceeded` failure refers to. The UI special-cases
/// `messages_per_wish` into an upgrade prompt, so the kind travels in the
/// error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    AmplificationsPerMonth,
    MessagesPerWish,
}

impl fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QuotaKind::AmplificationsPerMonth => f.write_str("monthly amplification"),
            QuotaKind::MessagesPerWish => f.write_str("per-wish message"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Premium => "premium",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(Tier::Free),
            "premium" => Some(Tier::Premium),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub tier: Tier,
    pub amplifications_per_month: Quota,
    pub messages_per_wish: Quota,
}

impl Subscription {
    pub fn free() -> Self {
        Subscription {
            tier: Tier::Free,
            amplifications_per_month: Quota::Limited(3),
            messages_per_wish: Quota::Limited(10),
        }
    }

    pub fn premium() -> Self {
        Subscription {
            tier: Tier::Premium,
            amplifications_per_month: Quota::Unlimited,
            messages_per_wish: Quota::Unlimited,
        }
    }

    pub fn is_premium(&self) -> bool {
        self.tier == Tier::Premium
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limited_quota_allows_up_to_limit() {
        let quota = Quota::Limited(2);
        assert!(quota.allows(0));
        assert!(quota.allows(1));
        assert!(!quota.allows(2));
        assert!(!quota.allows(100));
    }

    #[test]
    fn unlimited_quota_always_allows() {
        assert!(Quota::Unlimited.allows(0));
        assert!(Quota::Unlimited.allows(u64::MAX));
    }

    #[test]
    fn quota_deserializes_number_or_sentinel() {
        let limited: Quota = serde_json::from_str("5").unwrap();
        assert_eq!(limited, Quota::Limited(5));

        let unlimited: Quota = serde_json::from_str("\"unlimited\"").unwrap();
        assert_eq!(unlimited, Quota::Unlimited);

        assert!(serde_json::from_str::<Quota>("\"lots\"").is_err());
        assert!(serde_json::from_str::<Quota>("-1").is_err());
    }

    #[test]
    fn quota_serializes_back_to_wire_shape() {
        assert_eq!(serde_json::to_string(&Quota::Limited(7)).unwrap(), "7");
        assert_eq!(
            serde_json::to_string(&Quota::Unlimited).unwrap(),
            "\"unlimited\""
        );
    }

    #[test]
    fn column_encoding_uses_null_for_unlimited() {
        assert_eq!(Quota::from_column(None), Quota::Unlimited);
        assert_eq!(Quota::from_column(Some(4)), Quota::Limited(4));
        assert_eq!(Quota::Limited(4).to_column(), Some(4));
        assert_eq!(Quota::Unlimited.to_column(), None);
    }
}
