use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{Cid, Dp, DpValue, EntityKey};
use crate::{Error, Result};

/// Value persisted for an option the user left unset.
pub const UNSET: &str = "-1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_id: String,
    pub host: String,
    pub local_key: String,
    pub protocol_version: String,
    pub friendly_name: String,
    #[serde(default)]
    pub product_key: Option<String>,
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
}

impl DeviceConfig {
    /// Entity config for a dp (whole-device entities) or for a cid
    /// (sub-device entities, where the cid alone identifies the entity).
    pub fn entity(&self, dp: Dp, cid: Option<&Cid>) -> Result<&EntityConfig> {
        self.entities
            .iter()
            .find(|e| match cid {
                Some(cid) => e.cid() == Some(cid),
                None => e.id == dp,
            })
            .ok_or_else(|| Error::UnknownEntity {
                dp,
                cid: cid.cloned(),
            })
    }

    pub fn entities_for<'a>(&'a self, platform: &'a str) -> impl Iterator<Item = &'a EntityConfig> {
        self.entities.iter().filter(move |e| e.platform == platform)
    }

    /// Configured sub-devices, one per cid in order of first appearance. When
    /// several entities share a cid, the first one carrying a refresh
    /// descriptor wins.
    pub fn sub_devices(&self) -> Vec<&SubDeviceConfig> {
        let mut out: Vec<&SubDeviceConfig> = Vec::new();
        for sub in self.entities.iter().filter_map(|e| e.sub_device.as_ref()) {
            match out.iter().position(|s| s.cid == sub.cid) {
                Some(i) if out[i].refresh.is_none() => out[i] = sub,
                Some(_) => {}
                None => out.push(sub),
            }
        }
        out
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityConfig {
    pub id: Dp,
    pub platform: String,
    pub friendly_name: String,
    #[serde(default, rename = "zigbee", skip_serializing_if = "Option::is_none")]
    pub sub_device: Option<SubDeviceConfig>,
    /// Platform-specific keys, e.g. `target_temperature_dp` or `precision`.
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl EntityConfig {
    pub fn cid(&self) -> Option<&Cid> {
        self.sub_device.as_ref().map(|s| &s.cid)
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.id, self.cid().cloned())
    }

    pub fn has_option(&self, key: &str) -> bool {
        match self.options.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => s != UNSET,
            Some(Value::Number(n)) => n.as_i64() != Some(-1),
            Some(_) => true,
        }
    }

    /// Datapoint index stored under `key`, if set and parseable.
    pub fn dp_option(&self, key: &str) -> Option<Dp> {
        if !self.has_option(key) {
            return None;
        }
        serde_json::from_value(self.options.get(key)?.clone()).ok()
    }

    pub fn f64_option(&self, key: &str) -> Option<f64> {
        if !self.has_option(key) {
            return None;
        }
        match self.options.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn str_option(&self, key: &str) -> Option<&str> {
        if !self.has_option(key) {
            return None;
        }
        self.options.get(key)?.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubDeviceConfig {
    pub cid: Cid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<RefreshDescriptor>,
}

/// How to provoke a status push from a sub-device that never reports on its
/// own: write `value` to `dp`, then optionally restore `initial_value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshDescriptor {
    pub dp: Dp,
    pub value: DpValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_value: Option<DpValue>,
}
