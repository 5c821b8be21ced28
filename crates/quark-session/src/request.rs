use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Per-session call identifier.
///
/// Sent as a decimal string; accepted back as a string or a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Read the `tid` of an inbound record, if it has a usable one.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) => text.trim().parse().ok().map(TransactionId),
            Value::Number(number) => number.as_u64().map(TransactionId),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TransactionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TransactionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TidVisitor;

        impl Visitor<'_> for TidVisitor {
            type Value = TransactionId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a transaction id as string or unsigned integer")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<TransactionId, E> {
                Ok(TransactionId(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<TransactionId, E> {
                u64::try_from(v)
                    .map(TransactionId)
                    .map_err(|_| E::custom("negative transaction id"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<TransactionId, E> {
                v.trim()
                    .parse()
                    .map(TransactionId)
                    .map_err(|_| E::custom(format!("invalid transaction id '{v}'")))
            }
        }

        deserializer.deserialize_any(TidVisitor)
    }
}

/// One outbound call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub tid: TransactionId,
    pub sid: String,
    pub namespace: String,
    pub action: String,
    pub method: String,
    /// Encryption requested by the method declaration.
    pub e: bool,
    pub data: Vec<Value>,
    /// Creation time, ms since the Unix epoch.
    pub ts: u64,
}

impl CallRequest {
    /// `namespace.action.method`
    pub fn path(&self) -> String {
        format!("{}.{}.{}", self.namespace, self.action, self.method)
    }

    /// True if the payload carrying this request should be encrypted when a
    /// key is available.
    pub fn wants_encryption(&self) -> bool {
        self.e && !self.data.is_empty()
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
