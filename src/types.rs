use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::Error;

/// Datapoint index. Devices report these as string keys ("1", "101"),
/// configs may carry them as either strings or integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dp(pub u32);

impl fmt::Display for Dp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Dp {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse().map(Dp)
    }
}

impl From<u32> for Dp {
    fn from(v: u32) -> Self {
        Dp(v)
    }
}

impl Serialize for Dp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.0)
    }
}

impl<'de> Deserialize<'de> for Dp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct DpVisitor;

        impl Visitor<'_> for DpVisitor {
            type Value = Dp;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a datapoint index as integer or numeric string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Dp, E> {
                u32::try_from(v).map(Dp).map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Dp, E> {
                u32::try_from(v).map(Dp).map_err(E::custom)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Dp, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DpVisitor)
    }
}

/// Sub-device identifier (a child node behind a gateway).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cid(String);

impl Cid {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Cid {
    fn from(s: &str) -> Self {
        Cid(s.to_string())
    }
}

/// Scalar datapoint value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DpValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl DpValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DpValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DpValue::Integer(i) => Some(*i as f64),
            DpValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DpValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Loose truthiness: false, zero and the empty string are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            DpValue::Bool(b) => *b,
            DpValue::Integer(i) => *i != 0,
            DpValue::Float(v) => *v != 0.0,
            DpValue::String(s) => !s.is_empty(),
        }
    }
}

impl fmt::Display for DpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DpValue::Bool(b) => write!(f, "{b}"),
            DpValue::Integer(i) => write!(f, "{i}"),
            DpValue::Float(v) => write!(f, "{v}"),
            DpValue::String(s) => f.write_str(s),
        }
    }
}

impl From<bool> for DpValue {
    fn from(v: bool) -> Self {
        DpValue::Bool(v)
    }
}

impl From<i64> for DpValue {
    fn from(v: i64) -> Self {
        DpValue::Integer(v)
    }
}

impl From<f64> for DpValue {
    fn from(v: f64) -> Self {
        DpValue::Float(v)
    }
}

impl From<&str> for DpValue {
    fn from(v: &str) -> Self {
        DpValue::String(v.to_string())
    }
}

impl From<String> for DpValue {
    fn from(v: String) -> Self {
        DpValue::String(v)
    }
}

pub type DpMap = BTreeMap<Dp, DpValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Identifies one logical entity on a device: `"<dp>"` for whole-device
/// entities, `"<cid>_<dp>"` for entities scoped to a sub-device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub cid: Option<Cid>,
    pub dp: Dp,
}

impl EntityKey {
    pub fn new(dp: Dp, cid: Option<Cid>) -> Self {
        Self { cid, dp }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cid {
            Some(cid) => write!(f, "{cid}_{}", self.dp),
            None => write!(f, "{}", self.dp),
        }
    }
}

impl FromStr for EntityKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidEntityKey(s.to_string());
        match s.split_once('_') {
            Some((cid, dp)) if !cid.is_empty() => Ok(Self {
                cid: Some(Cid::new(cid)),
                dp: dp.parse().map_err(|_| invalid())?,
            }),
            Some(_) => Err(invalid()),
            None => Ok(Self {
                cid: None,
                dp: s.parse().map_err(|_| invalid())?,
            }),
        }
    }
}
