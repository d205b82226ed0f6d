use std::collections::BTreeMap;

use serde::Serialize;

use crate::diff::{DpChange, diff_dps};
use crate::types::{Cid, DpMap};

/// Full last-known state of one device. Subscribers always receive one of
/// these in full, never a partial update.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// Datapoints reported without a sub-device scope.
    pub dps: DpMap,
    pub sub_devices: BTreeMap<Cid, DpMap>,
}

impl StatusSnapshot {
    pub fn sub_device(&self, cid: &Cid) -> Option<&DpMap> {
        self.sub_devices.get(cid)
    }

    pub fn is_empty(&self) -> bool {
        self.dps.is_empty() && self.sub_devices.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct StatusCache {
    snapshot: StatusSnapshot,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key-wise overwrite into the parent map or the cid's map (created on
    /// first use). Keys absent from `update` are left untouched.
    pub fn merge(&mut self, update: DpMap, cid: Option<&Cid>) -> Vec<DpChange> {
        let target = match cid {
            Some(cid) => self.snapshot.sub_devices.entry(cid.clone()).or_default(),
            None => &mut self.snapshot.dps,
        };
        let changes = diff_dps(target, &update);
        target.extend(update);
        changes
    }

    pub fn snapshot(&self) -> &StatusSnapshot {
        &self.snapshot
    }

    pub fn reset(&mut self) {
        self.snapshot = StatusSnapshot::default();
    }
}
