use std::collections::BTreeSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, trace, warn};

use crate::bus::{DispatchBus, Signal};
use crate::cache::{StatusCache, StatusSnapshot};
use crate::config::DeviceConfig;
use crate::logger::{MessageLogMode, MessageLogger};
use crate::refresh::{RefreshCoordinator, RefreshRequest};
use crate::transport::{ConnectParams, Connection, Transport, TransportListener};
use crate::types::{Cid, DeviceState, Dp, DpMap, DpValue, EntityKey};
use crate::{Error, Result};

pub struct ConnectionManagerBuilder {
    config: DeviceConfig,
    transport: Arc<dyn Transport>,
    bus: Option<DispatchBus>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<PathBuf>,
}

impl ConnectionManagerBuilder {
    pub fn new(config: DeviceConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            bus: None,
            log_mode: None,
            log_path: None,
        }
    }

    /// Share a bus with other devices. Defaults to a private one.
    pub fn bus(mut self, bus: DispatchBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<PathBuf>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<ConnectionManager> {
        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(Mutex::new(MessageLogger::new(mode, path)?)),
            _ => None,
        };

        // Entity ids are always requested; some firmwares only report what is asked for.
        let requested = self.config.entities.iter().map(|e| e.id).collect();

        Ok(ConnectionManager {
            inner: Arc::new(Inner {
                config: self.config,
                transport: self.transport,
                bus: self.bus.unwrap_or_default(),
                cache: Mutex::new(StatusCache::new()),
                link: Mutex::new(Link::default()),
                refresh: RefreshCoordinator::new(),
                requested: Mutex::new(requested),
                logger,
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        })
    }
}

#[derive(Default)]
struct Link {
    closing: bool,
    attempt: Option<JoinHandle<()>>,
    connection: Option<Arc<dyn Connection>>,
    /// Bumped per connection attempt; callbacks from older sessions are dropped.
    generation: u64,
    /// Disconnect reported before the attempt stored its connection.
    lost: bool,
}

struct Inner {
    config: DeviceConfig,
    transport: Arc<dyn Transport>,
    bus: DispatchBus,
    cache: Mutex<StatusCache>,
    link: Mutex<Link>,
    refresh: RefreshCoordinator,
    requested: Mutex<BTreeSet<Dp>>,
    logger: Option<Mutex<MessageLogger>>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

/// Owns the session with one physical device: connects on demand, keeps the
/// status cache and republishes the full snapshot on every update.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn builder(config: DeviceConfig, transport: Arc<dyn Transport>) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder::new(config, transport)
    }

    pub fn device_id(&self) -> &str {
        &self.inner.config.device_id
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    pub fn bus(&self) -> &DispatchBus {
        &self.inner.bus
    }

    pub fn refresh_coordinator(&self) -> &RefreshCoordinator {
        &self.inner.refresh
    }

    pub fn state(&self) -> DeviceState {
        let link = self.inner.link.lock();
        if link.attempt.is_some() {
            DeviceState::Connecting
        } else if link.connection.is_some() {
            DeviceState::Connected
        } else {
            DeviceState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == DeviceState::Connected
    }

    /// Copy of the cached status.
    pub fn status(&self) -> StatusSnapshot {
        self.inner.cache.lock().snapshot().clone()
    }

    pub fn request_datapoint(&self, dp: Dp) {
        self.inner.requested.lock().insert(dp);
    }

    pub fn requested_datapoints(&self) -> BTreeSet<Dp> {
        self.inner.requested.lock().clone()
    }

    /// Adds the datapoints referenced by `dp_keys` in every entity of
    /// `platform` to the request set, and returns those entities' keys.
    pub fn register_platform(&self, platform: &str, dp_keys: &[&str]) -> Vec<EntityKey> {
        let mut requested = self.inner.requested.lock();
        self.inner
            .config
            .entities_for(platform)
            .map(|entity| {
                requested.extend(dp_keys.iter().filter_map(|key| entity.dp_option(key)));
                entity.key()
            })
            .collect()
    }

    /// Starts a connection attempt unless one is running, the device is
    /// already connected, or the session is closing.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self) {
        let mut link = self.inner.link.lock();
        if link.closing {
            trace!(device_id = %self.device_id(), "session closing, not connecting");
            return;
        }
        if link.attempt.is_some() || link.connection.is_some() {
            trace!(device_id = %self.device_id(), "already connected or connecting");
            return;
        }

        link.generation += 1;
        link.lost = false;
        let generation = link.generation;
        let this = self.clone();
        link.attempt = Some(
            self.inner
                .tasks
                .spawn(async move { this.establish(generation).await }),
        );
    }

    async fn establish(&self, generation: u64) {
        debug!(device_id = %self.device_id(), host = %self.inner.config.host, "connecting");

        match self.open(generation).await {
            Ok(()) => debug!(device_id = %self.device_id(), "connected"),
            Err(err) => {
                error!(
                    device_id = %self.device_id(),
                    host = %self.inner.config.host,
                    error = %err,
                    "connect failed"
                );
                let partial = self.inner.link.lock().connection.take();
                if let Some(conn) = partial {
                    conn.close().await;
                }
            }
        }

        let mut link = self.inner.link.lock();
        if link.generation == generation {
            link.attempt = None;
        }
    }

    async fn open(&self, generation: u64) -> Result<()> {
        let listener: Arc<dyn TransportListener> = Arc::new(SessionListener {
            inner: Arc::downgrade(&self.inner),
            generation,
        });
        let conn = self
            .inner
            .transport
            .connect(&self.connect_params(), listener)
            .await?;

        let rejected = {
            let mut link = self.inner.link.lock();
            if link.closing || link.lost {
                true
            } else {
                link.connection = Some(Arc::clone(&conn));
                false
            }
        };
        if rejected {
            conn.close().await;
            return Err(Error::Connection("link lost during setup".to_string()));
        }

        let requested = self.requested_datapoints();
        conn.register_indices(&requested);

        let mut refreshing = false;
        for sub in self.inner.config.sub_devices() {
            match &sub.refresh {
                Some(descriptor) => {
                    refreshing = true;
                    let request = RefreshRequest::new(sub.cid.clone(), descriptor);
                    self.trigger_refresh(&conn, request).await?;
                }
                None => self.query_on(&conn, Some(&sub.cid)).await,
            }
        }

        if !refreshing {
            self.query_on(&conn, None).await;
        }
        Ok(())
    }

    /// Closes the session for good: cancels a running connection attempt and
    /// waits for it, waits for refresh follow-ups, then closes the link and
    /// drops the device's bus channel, ending every subscription. No listener
    /// callback has any effect once this returns.
    pub async fn close(&self) {
        let attempt = {
            let mut link = self.inner.link.lock();
            link.closing = true;
            link.attempt.take()
        };
        self.inner.shutdown.cancel();

        if let Some(attempt) = attempt {
            attempt.abort();
            if let Err(e) = attempt.await
                && !e.is_cancelled()
            {
                warn!(device_id = %self.device_id(), "connect task failed: {e}");
            }
        }

        self.inner.tasks.close();
        self.inner.tasks.wait().await;

        let connection = self.inner.link.lock().connection.take();
        if let Some(conn) = connection {
            conn.close().await;
            debug!(device_id = %self.device_id(), "connection closed");
        }
        self.inner.bus.remove(self.device_id());
    }

    /// Sets one datapoint. Failures are logged; the outcome shows up in a
    /// later status push.
    pub async fn write(&self, value: DpValue, dp: Dp, cid: Option<&Cid>) {
        if let Err(err) = self.try_write(value.clone(), dp, cid).await {
            error!(
                device_id = %self.device_id(),
                device = %self.inner.config.friendly_name,
                cid = ?cid,
                %dp,
                %value,
                error = %err,
                "failed to set dp"
            );
        }
    }

    pub async fn write_many(&self, values: DpMap, cid: Option<&Cid>) {
        let count = values.len();
        if let Err(err) = self.try_write_many(values, cid).await {
            error!(
                device_id = %self.device_id(),
                device = %self.inner.config.friendly_name,
                cid = ?cid,
                count,
                error = %err,
                "failed to set dps"
            );
        }
    }

    /// Requests a status report. The reply goes through [`Self::on_status`].
    pub async fn query(&self, cid: Option<&Cid>) {
        let result = match self.connection() {
            Ok(conn) => self.fetch_status(&conn, cid).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            self.log_query_failure(cid, &err);
        }
    }

    /// Arms a refresh for a sub-device and writes its trigger value.
    pub async fn refresh_sub_device(&self, request: RefreshRequest) {
        let cid = request.cid.clone();
        let result = match self.connection() {
            Ok(conn) => self.trigger_refresh(&conn, request).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            error!(device_id = %self.device_id(), %cid, error = %err, "failed to force refresh");
        }
    }

    /// Completes a pending refresh for `cid`, if any: writes the seed value
    /// when one is configured, then queries the sub-device. Returns whether a
    /// refresh was pending.
    pub fn complete_refresh(&self, cid: &Cid) -> bool {
        let Some(request) = self.inner.refresh.take(cid) else {
            return false;
        };
        debug!(device_id = %self.device_id(), %cid, "sub device refreshed");
        let this = self.clone();
        self.spawn_tracked(async move { this.finish_refresh(request).await });
        true
    }

    /// Entry point for status pushes and query replies.
    pub fn on_status(&self, status: DpMap, cid: Option<Cid>) {
        if self.inner.shutdown.is_cancelled() {
            trace!(device_id = %self.device_id(), "session closed, dropping status");
            return;
        }
        self.log_message(|l| l.log_status(cid.as_ref(), &status));

        if let Some(cid) = &cid
            && self.complete_refresh(cid)
        {
            debug!(device_id = %self.device_id(), %cid, "discarding refresh trigger echo");
            return;
        }

        let mut cache = self.inner.cache.lock();
        let changes = cache.merge(status, cid.as_ref());
        trace!(
            device_id = %self.device_id(),
            cid = ?cid,
            changed = changes.len(),
            "status merged"
        );
        // Publish under the cache lock so snapshots go out in merge order.
        let snapshot = Arc::new(cache.snapshot().clone());
        self.inner.bus.publish(self.device_id(), Signal::Status(snapshot));
    }

    /// Link loss. Subscribers see [`Signal::Disconnected`]; reconnecting is up
    /// to whoever calls [`Self::connect`] next.
    pub fn on_disconnected(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.bus.publish(self.device_id(), Signal::Disconnected);
        {
            let mut link = self.inner.link.lock();
            if link.attempt.is_some() && link.connection.is_none() {
                link.lost = true;
            }
            link.connection = None;
        }
        debug!(device_id = %self.device_id(), "disconnected, waiting for discovery broadcast");
    }

    async fn trigger_refresh(&self, conn: &Arc<dyn Connection>, request: RefreshRequest) -> Result<()> {
        let cid = request.cid.clone();
        let write = request.trigger_write();
        debug!(device_id = %self.device_id(), %cid, "forcing refresh for sub device");

        self.inner.refresh.arm(request);
        self.log_message(|l| l.log_write(Some(&cid), &write));
        if let Err(err) = conn.write_many(write, Some(&cid)).await {
            // No echo will come for a write that never landed.
            self.inner.refresh.take(&cid);
            return Err(err);
        }
        Ok(())
    }

    async fn finish_refresh(&self, request: RefreshRequest) {
        if let Some(seed) = request.seed_write() {
            debug!(
                device_id = %self.device_id(),
                cid = %request.cid,
                "restoring initial value of refresh dp"
            );
            self.write_many(seed, Some(&request.cid)).await;
        }
        self.query(Some(&request.cid)).await;
    }

    async fn query_on(&self, conn: &Arc<dyn Connection>, cid: Option<&Cid>) {
        if let Err(err) = self.fetch_status(conn, cid).await {
            self.log_query_failure(cid, &err);
        }
    }

    async fn try_write(&self, value: DpValue, dp: Dp, cid: Option<&Cid>) -> Result<()> {
        let conn = self.connection()?;
        self.log_message(|l| l.log_write(cid, &DpMap::from([(dp, value.clone())])));
        conn.write(value, dp, cid).await
    }

    async fn try_write_many(&self, values: DpMap, cid: Option<&Cid>) -> Result<()> {
        let conn = self.connection()?;
        self.log_message(|l| l.log_write(cid, &values));
        conn.write_many(values, cid).await
    }

    async fn fetch_status(&self, conn: &Arc<dyn Connection>, cid: Option<&Cid>) -> Result<()> {
        debug!(device_id = %self.device_id(), cid = ?cid, "retrieving status");
        self.log_message(|l| l.log_query(cid));
        let status = conn
            .query(cid)
            .await?
            .ok_or_else(|| Error::NoStatus(cid.cloned()))?;
        self.on_status(status, cid.cloned());
        Ok(())
    }

    fn spawn_tracked<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        let shutdown = self.inner.shutdown.clone();
        self.inner.tasks.spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {}
                () = task => {}
            }
        });
    }

    fn connection(&self) -> Result<Arc<dyn Connection>> {
        self.inner
            .link
            .lock()
            .connection
            .clone()
            .ok_or(Error::NotConnected)
    }

    fn connect_params(&self) -> ConnectParams {
        let config = &self.inner.config;
        ConnectParams {
            host: config.host.clone(),
            device_id: config.device_id.clone(),
            local_key: config.local_key.clone(),
            protocol_version: config.protocol_version.clone(),
        }
    }

    fn log_query_failure(&self, cid: Option<&Cid>, err: &Error) {
        error!(
            device_id = %self.device_id(),
            device = %self.inner.config.friendly_name,
            cid = ?cid,
            error = %err,
            "failed to get status"
        );
    }

    fn log_message(&self, f: impl FnOnce(&mut MessageLogger)) {
        if let Some(logger) = &self.inner.logger {
            f(&mut logger.lock());
        }
    }
}

/// Listener handed to the transport. Holds the session weakly so a leaked
/// connection cannot keep the manager alive.
struct SessionListener {
    inner: Weak<Inner>,
    generation: u64,
}

impl SessionListener {
    fn manager(&self) -> Option<ConnectionManager> {
        let inner = self.inner.upgrade()?;
        if inner.link.lock().generation != self.generation {
            trace!(device_id = %inner.config.device_id, "ignoring callback from stale session");
            return None;
        }
        Some(ConnectionManager { inner })
    }
}

impl TransportListener for SessionListener {
    fn on_status(&self, status: DpMap, cid: Option<Cid>) {
        if let Some(manager) = self.manager() {
            manager.on_status(status, cid);
        }
    }

    fn on_disconnected(&self) {
        if let Some(manager) = self.manager() {
            manager.on_disconnected();
        }
    }
}
