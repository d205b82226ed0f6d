mod bus;
mod cache;
pub mod climate;
mod config;
mod diff;
mod entity;
mod error;
mod logger;
mod manager;
mod refresh;
mod transport;
mod types;

pub use bus::{DispatchBus, Signal, Subscription};
pub use cache::{StatusCache, StatusSnapshot};
pub use config::{DeviceConfig, EntityConfig, RefreshDescriptor, SubDeviceConfig, UNSET};
pub use diff::DpChange;
pub use entity::{DeviceInfo, Dispatch, DpView, EntityAdapter, EntityHooks, RestoredState};
pub use error::{Error, Result};
pub use logger::MessageLogMode;
pub use manager::{ConnectionManager, ConnectionManagerBuilder};
pub use refresh::{RefreshCoordinator, RefreshRequest};
pub use transport::{ConnectParams, Connection, Transport, TransportListener};
pub use types::*;
