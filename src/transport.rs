//! Capabilities the session consumes from the wire-level client. Framing,
//! encryption and the handshake all live behind these traits.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;
use crate::types::{Cid, Dp, DpMap, DpValue};

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectParams {
    pub host: String,
    pub device_id: String,
    pub local_key: String,
    pub protocol_version: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a session. `listener` receives pushes until the connection is
    /// closed or lost.
    async fn connect(
        &self,
        params: &ConnectParams,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Arc<dyn Connection>>;
}

#[async_trait]
pub trait Connection: Send + Sync {
    /// `Ok(None)` means the device answered without status data.
    async fn query(&self, cid: Option<&Cid>) -> Result<Option<DpMap>>;

    async fn write(&self, value: DpValue, dp: Dp, cid: Option<&Cid>) -> Result<()>;

    async fn write_many(&self, values: DpMap, cid: Option<&Cid>) -> Result<()>;

    /// Datapoints to ask for explicitly; some firmwares only report what is
    /// requested.
    fn register_indices(&self, indices: &BTreeSet<Dp>);

    async fn close(&self);
}

/// Callbacks a [`Transport`] invokes. May be called from any task, at any
/// time, including while the connection is still being set up.
pub trait TransportListener: Send + Sync {
    fn on_status(&self, status: DpMap, cid: Option<Cid>);

    fn on_disconnected(&self);
}
