use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::Result;
use crate::bus::{Signal, Subscription};
use crate::config::EntityConfig;
use crate::manager::ConnectionManager;
use crate::types::{Dp, DpMap, DpValue, EntityKey};

/// Outcome of an entity command.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Handed to the device. Whether it took effect shows in a later push.
    Sent,
    /// The entity's configuration does not enable this capability.
    Unsupported,
}

impl Dispatch {
    pub fn is_sent(self) -> bool {
        self == Dispatch::Sent
    }
}

/// Last state persisted by the host, used as a placeholder until the device
/// reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestoredState {
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub identifiers: String,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub sw_version: String,
}

/// Platform-specific behaviour plugged into an [`EntityAdapter`].
pub trait EntityHooks: Send + 'static {
    /// Called with the entity's fresh view after every real status update.
    fn status_updated(&mut self, _view: &DpView<'_>) {}

    fn status_restored(&mut self, _restored: &RestoredState) {}
}

/// Read access to an entity's cached datapoints.
pub struct DpView<'a> {
    key: &'a EntityKey,
    config: &'a EntityConfig,
    status: &'a DpMap,
}

impl<'a> DpView<'a> {
    pub fn key(&self) -> &'a EntityKey {
        self.key
    }

    pub fn config(&self) -> &'a EntityConfig {
        self.config
    }

    pub fn status(&self) -> &'a DpMap {
        self.status
    }

    pub fn has_config(&self, key: &str) -> bool {
        self.config.has_option(key)
    }

    /// Cached value of `dp`. Missing values are logged, never an error.
    pub fn dp(&self, dp: Dp) -> Option<&'a DpValue> {
        let value = self.status.get(&dp);
        if value.is_none() {
            warn!(entity = %self.key, %dp, "entity is requesting unknown dp index");
        }
        value
    }

    /// Value of the datapoint configured under option `key`.
    pub fn dp_by_config(&self, key: &str) -> Option<&'a DpValue> {
        let Some(dp) = self.config.dp_option(key) else {
            warn!(entity = %self.key, option = key, "entity is requesting unset index for option");
            return None;
        };
        self.dp(dp)
    }
}

struct View<H> {
    status: DpMap,
    hooks: H,
}

struct Core<H> {
    device: ConnectionManager,
    config: EntityConfig,
    key: EntityKey,
    view: Mutex<View<H>>,
    revision: watch::Sender<u64>,
}

impl<H: EntityHooks> Core<H> {
    fn handle(&self, signal: Signal) {
        match signal {
            Signal::Disconnected => self.clear(),
            Signal::Status(snapshot) => match &self.key.cid {
                Some(cid) => match snapshot.sub_device(cid) {
                    Some(sub) if !sub.is_empty() => {
                        // Only the session completes a refresh, on the first push for this cid.
                        if self.device.refresh_coordinator().is_pending(cid) {
                            trace!(entity = %self.key, "refresh pending, skipping update");
                            return;
                        }
                        self.update(sub.clone());
                    }
                    _ => self.clear(),
                },
                None if snapshot.dps.is_empty() => self.clear(),
                None => self.update(snapshot.dps.clone()),
            },
        }
        self.revision.send_modify(|rev| *rev += 1);
    }

    fn update(&self, status: DpMap) {
        let mut guard = self.view.lock();
        let View { status: current, hooks } = &mut *guard;
        *current = status;
        hooks.status_updated(&DpView {
            key: &self.key,
            config: &self.config,
            status: current,
        });
    }

    fn clear(&self) {
        self.view.lock().status.clear();
    }
}

/// One logical entity backed by a device session: keeps the slice of the
/// device status that belongs to it and forwards writes scoped to its cid.
pub struct EntityAdapter<H: EntityHooks> {
    core: Arc<Core<H>>,
    subscription: Mutex<Option<Subscription>>,
}

impl<H: EntityHooks> EntityAdapter<H> {
    /// Resolves the entity's config from the device. Sub-device entities are
    /// found by cid, others by dp.
    pub fn new(device: &ConnectionManager, key: EntityKey, hooks: H) -> Result<Self> {
        let config = device.config().entity(key.dp, key.cid.as_ref())?.clone();
        let (revision, _) = watch::channel(0);
        Ok(Self {
            core: Arc::new(Core {
                device: device.clone(),
                config,
                key,
                view: Mutex::new(View {
                    status: DpMap::new(),
                    hooks,
                }),
                revision,
            }),
            subscription: Mutex::new(None),
        })
    }

    /// Applies `restored`, if any, then starts listening to the device.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn attach(&self, restored: Option<&RestoredState>) {
        debug!(entity = %self.core.key, config = ?self.core.config, "adding entity");
        if let Some(restored) = restored {
            self.core.view.lock().hooks.status_restored(restored);
        }

        let core = Arc::clone(&self.core);
        let subscription = self
            .core
            .device
            .bus()
            .subscribe(self.core.device.device_id(), move |signal| core.handle(signal));
        *self.subscription.lock() = Some(subscription);
    }

    pub fn detach(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            self.core.device.bus().unsubscribe(subscription);
        }
    }

    pub fn is_attached(&self) -> bool {
        self.subscription.lock().is_some()
    }

    pub fn key(&self) -> &EntityKey {
        &self.core.key
    }

    pub fn config(&self) -> &EntityConfig {
        &self.core.config
    }

    pub fn device(&self) -> &ConnectionManager {
        &self.core.device
    }

    pub fn name(&self) -> &str {
        &self.core.config.friendly_name
    }

    pub fn unique_id(&self) -> String {
        let scope = match &self.core.key.cid {
            Some(cid) => cid.to_string(),
            None => self.core.key.dp.to_string(),
        };
        format!("local_{}_{scope}", self.core.device.device_id())
    }

    pub fn device_info(&self) -> DeviceInfo {
        let device = self.core.device.config();
        DeviceInfo {
            identifiers: format!("local_{}", device.device_id),
            name: device.friendly_name.clone(),
            manufacturer: "Unknown".to_string(),
            model: device
                .product_key
                .clone()
                .unwrap_or_else(|| "Tuya generic".to_string()),
            sw_version: device.protocol_version.clone(),
        }
    }

    /// True while the entity's own dp is in its view.
    pub fn available(&self) -> bool {
        self.core.view.lock().status.contains_key(&self.core.key.dp)
    }

    pub fn status(&self) -> DpMap {
        self.core.view.lock().status.clone()
    }

    /// Bumped after every handled signal, including ones that cleared the view.
    pub fn presentation_updates(&self) -> watch::Receiver<u64> {
        self.core.revision.subscribe()
    }

    pub fn has_config(&self, key: &str) -> bool {
        self.core.config.has_option(key)
    }

    pub fn dp(&self, dp: Dp) -> Option<DpValue> {
        self.with_view(|view| view.dp(dp).cloned())
    }

    pub fn dp_by_config(&self, key: &str) -> Option<DpValue> {
        self.with_view(|view| view.dp_by_config(key).cloned())
    }

    pub fn with_view<R>(&self, f: impl FnOnce(&DpView<'_>) -> R) -> R {
        let guard = self.core.view.lock();
        f(&DpView {
            key: &self.core.key,
            config: &self.core.config,
            status: &guard.status,
        })
    }

    pub fn with_hooks<R>(&self, f: impl FnOnce(&H) -> R) -> R {
        f(&self.core.view.lock().hooks)
    }

    pub async fn set_dp(&self, value: impl Into<DpValue>, dp: Dp) {
        self.core
            .device
            .write(value.into(), dp, self.core.key.cid.as_ref())
            .await;
    }

    pub async fn set_dps(&self, values: DpMap) {
        self.core
            .device
            .write_many(values, self.core.key.cid.as_ref())
            .await;
    }
}

impl<H: EntityHooks> Drop for EntityAdapter<H> {
    fn drop(&mut self) {
        self.detach();
    }
}
