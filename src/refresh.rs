use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::RefreshDescriptor;
use crate::types::{Cid, Dp, DpMap, DpValue};

/// An armed refresh for one sub-device: the next status push for `cid` is the
/// device echoing the trigger write, not real state.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshRequest {
    pub cid: Cid,
    pub trigger: Dp,
    pub value: DpValue,
    pub seed: Option<DpValue>,
}

impl RefreshRequest {
    pub fn new(cid: Cid, descriptor: &RefreshDescriptor) -> Self {
        Self {
            cid,
            trigger: descriptor.dp,
            value: descriptor.value.clone(),
            seed: descriptor.initial_value.clone(),
        }
    }

    pub fn trigger_write(&self) -> DpMap {
        DpMap::from([(self.trigger, self.value.clone())])
    }

    pub fn seed_write(&self) -> Option<DpMap> {
        self.seed
            .as_ref()
            .map(|seed| DpMap::from([(self.trigger, seed.clone())]))
    }
}

/// Pending refreshes keyed by cid. At most one per cid; each is handed out
/// exactly once by [`RefreshCoordinator::take`].
#[derive(Debug, Default)]
pub struct RefreshCoordinator {
    pending: Mutex<HashMap<Cid, RefreshRequest>>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `request`, replacing any request already pending for its cid.
    pub fn arm(&self, request: RefreshRequest) {
        let cid = request.cid.clone();
        if self.pending.lock().insert(cid.clone(), request).is_some() {
            debug!(%cid, "replaced pending refresh");
        }
    }

    pub fn is_pending(&self, cid: &Cid) -> bool {
        self.pending.lock().contains_key(cid)
    }

    /// Removes and returns the pending request for `cid`. Concurrent callers
    /// race on the lock; only one of them gets the request.
    pub fn take(&self, cid: &Cid) -> Option<RefreshRequest> {
        self.pending.lock().remove(cid)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}
