use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;
use uuid::Uuid;

use crate::{error::Result, types::DeviceInfo};

/// A GATT service and the characteristics it exposes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Service UUID
    pub uuid: Uuid,
    /// Characteristic UUIDs in this service
    pub characteristics: Vec<Uuid>,
}

/// A value pushed by the peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Characteristic that notified
    pub characteristic: Uuid,
    /// Payload
    pub value: Vec<u8>,
}

/// An established link to one peripheral
///
/// Implementations do not serialize access themselves; the connection layer
/// guarantees at most one read or write is in flight.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Services discovered on the peripheral
    fn services(&self) -> Vec<ServiceInfo>;

    /// Ask for a larger ATT MTU; returns the negotiated size
    async fn request_mtu(&self, mtu: u16) -> Result<u16>;

    /// Write `data` to `characteristic` as one logical write
    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()>;

    /// Read the current value of `characteristic`
    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>>;

    /// Enable notifications on `characteristic`
    async fn subscribe(&self, characteristic: Uuid) -> Result<()>;

    /// Disable notifications on `characteristic`
    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()>;

    /// Stream of notifications from every subscribed characteristic
    async fn notifications(&self) -> Result<BoxStream<'static, Notification>>;

    /// Whether the link is still up
    async fn is_connected(&self) -> bool;

    /// Tear the link down
    async fn disconnect(&self) -> Result<()>;
}

/// Discovery and link establishment
#[async_trait]
pub trait BleAdapter: Send + Sync + 'static {
    /// Link type produced by [`BleAdapter::connect`]
    type Link: Transport;

    /// First peripheral whose advertised name starts with `name_prefix`, or
    /// `None` once `timeout` passes without a match
    async fn scan(&self, name_prefix: &str, timeout: Duration) -> Result<Option<DeviceInfo>>;

    /// Connect to the peripheral with `device_id` and discover its services
    async fn connect(&self, device_id: &str) -> Result<Self::Link>;
}
