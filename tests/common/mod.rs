#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tuya_lan_session::{
    Cid, ConnectParams, Connection, ConnectionManager, DeviceConfig, Dp, DpMap, DpValue, Error,
    Result, Transport, TransportListener,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Register(BTreeSet<Dp>),
    Query(Option<Cid>),
    Write(Option<Cid>, DpMap),
    Close,
}

#[derive(Default)]
struct MockState {
    connects: Vec<ConnectParams>,
    calls: Vec<Call>,
    replies: HashMap<Option<Cid>, DpMap>,
    fail_connect: bool,
    fail_writes: bool,
    connect_delay: Option<Duration>,
    listeners: Vec<Arc<dyn TransportListener>>,
}

/// In-memory transport recording everything the session asks of it.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status returned by `query(cid)`. Queries without a reply yield no data.
    pub fn reply(&self, cid: Option<&str>, status: DpMap) {
        self.state.lock().replies.insert(cid.map(Cid::new), status);
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.state.lock().fail_connect = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    pub fn delay_connect(&self, delay: Duration) {
        self.state.lock().connect_delay = Some(delay);
    }

    pub fn connects(&self) -> usize {
        self.state.lock().connects.len()
    }

    pub fn last_connect(&self) -> Option<ConnectParams> {
        self.state.lock().connects.last().cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn queries(&self) -> Vec<Option<Cid>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Query(cid) => Some(cid),
                _ => None,
            })
            .collect()
    }

    pub fn writes(&self) -> Vec<(Option<Cid>, DpMap)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Write(cid, values) => Some((cid, values)),
                _ => None,
            })
            .collect()
    }

    pub fn closes(&self) -> usize {
        self.calls().iter().filter(|c| **c == Call::Close).count()
    }

    /// Listener handed over by the most recent connect.
    pub fn listener(&self) -> Arc<dyn TransportListener> {
        self.state
            .lock()
            .listeners
            .last()
            .cloned()
            .expect("transport was never connected")
    }

    pub fn push(&self, status: DpMap, cid: Option<&str>) {
        self.listener().on_status(status, cid.map(Cid::new));
    }

    pub fn drop_link(&self) {
        self.listener().on_disconnected();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        params: &ConnectParams,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Arc<dyn Connection>> {
        let delay = {
            let mut state = self.state.lock();
            state.connects.push(params.clone());
            state.listeners.push(listener);
            state.connect_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.lock().fail_connect {
            return Err(Error::Connection("handshake rejected".to_string()));
        }
        Ok(Arc::new(MockConnection {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    fn record_write(&self, cid: Option<&Cid>, values: DpMap) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Write(cid.cloned(), values));
        if state.fail_writes {
            return Err(Error::Transport("write timed out".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&self, cid: Option<&Cid>) -> Result<Option<DpMap>> {
        let mut state = self.state.lock();
        state.calls.push(Call::Query(cid.cloned()));
        Ok(state.replies.get(&cid.cloned()).cloned())
    }

    async fn write(&self, value: DpValue, dp: Dp, cid: Option<&Cid>) -> Result<()> {
        self.record_write(cid, DpMap::from([(dp, value)]))
    }

    async fn write_many(&self, values: DpMap, cid: Option<&Cid>) -> Result<()> {
        self.record_write(cid, values)
    }

    fn register_indices(&self, indices: &BTreeSet<Dp>) {
        self.state.lock().calls.push(Call::Register(indices.clone()));
    }

    async fn close(&self) {
        self.state.lock().calls.push(Call::Close);
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

pub fn dps(value: Value) -> DpMap {
    serde_json::from_value(value).expect("valid dp map")
}

pub fn device(entities: Value) -> DeviceConfig {
    serde_json::from_value(serde_json::json!({
        "device_id": "bf0123",
        "host": "192.168.1.40",
        "local_key": "0123456789abcdef",
        "protocol_version": "3.3",
        "friendly_name": "Hallway",
        "entities": entities,
    }))
    .expect("valid device config")
}

/// Entity A on dp 1 (whole device) and entity B on dp 2 behind sub-device 26.
pub fn switch_pair() -> DeviceConfig {
    device(serde_json::json!([
        {"id": "1", "platform": "switch", "friendly_name": "Main"},
        {"id": "2", "platform": "switch", "friendly_name": "Relay", "zigbee": {"cid": "26"}},
    ]))
}

/// Radiator valve behind sub-device 30 that only reports after a write to dp 101.
pub fn refreshing_valve() -> DeviceConfig {
    device(serde_json::json!([
        {"id": "3", "platform": "switch", "friendly_name": "Valve",
         "zigbee": {"cid": "30", "refresh": {"dp": "101", "value": true, "initial_value": false}}},
    ]))
}

/// The refreshing valve on cid 30 next to a plain relay on cid 26.
pub fn valve_and_relay() -> DeviceConfig {
    device(serde_json::json!([
        {"id": "2", "platform": "switch", "friendly_name": "Relay", "zigbee": {"cid": "26"}},
        {"id": "4", "platform": "sensor", "friendly_name": "Valve battery", "zigbee": {"cid": "30"}},
        {"id": "3", "platform": "switch", "friendly_name": "Valve",
         "zigbee": {"cid": "30", "refresh": {"dp": "101", "value": true, "initial_value": false}}},
    ]))
}

pub fn manager(config: DeviceConfig, transport: &MockTransport) -> ConnectionManager {
    ConnectionManager::builder(config, Arc::new(transport.clone()))
        .build()
        .expect("manager builds")
}

/// Polls `check` until it holds, failing the test after two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
