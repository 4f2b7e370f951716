use async_trait::async_trait;
use btleplug::{
    api::{
        Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, Service,
        WriteType,
    },
    platform::{Adapter, Manager, Peripheral},
};
use futures::stream::{BoxStream, StreamExt};
use std::{collections::BTreeSet, collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{Result, TrainerError},
    transport::{BleAdapter, Notification, ServiceInfo, Transport},
    types::DeviceInfo,
};

/// BLE manager for trainer discovery and connection
pub struct BleManager {
    manager: Manager,
    peripherals: Arc<Mutex<HashMap<String, Peripheral>>>,
}

impl BleManager {
    /// Create a new BLE manager
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::Ble`] if the Bluetooth adapter cannot be initialized.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;

        Ok(Self {
            manager,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    async fn central(&self) -> Result<Adapter> {
        self.manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TrainerError::DeviceNotFound)
    }

    /// Device info for `peripheral` if its advertised name starts with `prefix`
    async fn matching_device(peripheral: &Peripheral, prefix: &str) -> Option<DeviceInfo> {
        let properties = peripheral.properties().await.ok().flatten()?;
        let name = properties.local_name?;
        if !matches_prefix(&name, prefix) {
            return None;
        }
        Some(DeviceInfo::new(
            name,
            peripheral.id().to_string(),
            properties.rssi.unwrap_or(0),
        ))
    }

    /// Cached peripheral for `device_id`, falling back to the adapter's
    /// known peripherals so a remembered id connects without a fresh scan
    async fn resolve_peripheral(&self, device_id: &str) -> Result<Peripheral> {
        if let Some(peripheral) = self.peripherals.lock().await.get(device_id).cloned() {
            return Ok(peripheral);
        }

        let central = self.central().await?;
        let peripheral = find_by_id(central.peripherals().await?, device_id, |p| {
            p.id().to_string()
        })
        .ok_or(TrainerError::DeviceNotFound)?;
        debug!("Resolved {device_id} from adapter peripherals");

        self.peripherals
            .lock()
            .await
            .insert(device_id.to_string(), peripheral.clone());
        Ok(peripheral)
    }

    async fn find_known(central: &Adapter, prefix: &str) -> Option<(DeviceInfo, Peripheral)> {
        let peripherals = central.peripherals().await.ok()?;
        for peripheral in peripherals {
            if let Some(device) = Self::matching_device(&peripheral, prefix).await {
                return Some((device, peripheral));
            }
        }
        None
    }
}

#[async_trait]
impl BleAdapter for BleManager {
    type Link = BleLink;

    async fn scan(&self, name_prefix: &str, scan_timeout: Duration) -> Result<Option<DeviceInfo>> {
        info!("Starting scan for trainers...");

        let central = self.central().await?;
        let mut events = central.events().await?;
        central.start_scan(ScanFilter::default()).await?;

        let search = async {
            if let Some(found) = Self::find_known(&central, name_prefix).await {
                return Some(found);
            }
            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                let Ok(peripheral) = central.peripheral(&id).await else {
                    continue;
                };
                if let Some(device) = Self::matching_device(&peripheral, name_prefix).await {
                    return Some((device, peripheral));
                }
            }
            None
        };
        let found = timeout(scan_timeout, search).await.ok().flatten();

        if let Err(e) = central.stop_scan().await {
            warn!("Failed to stop scan: {e}");
        }

        Ok(match found {
            Some((device, peripheral)) => {
                self.peripherals
                    .lock()
                    .await
                    .insert(device.id.clone(), peripheral);
                Some(device)
            }
            None => None,
        })
    }

    async fn connect(&self, device_id: &str) -> Result<BleLink> {
        let peripheral = self.resolve_peripheral(device_id).await?;

        if !peripheral.is_connected().await.unwrap_or(false) {
            peripheral
                .connect()
                .await
                .map_err(|e| TrainerError::ConnectionFailed(e.to_string()))?;
        }
        peripheral.discover_services().await?;

        let services = peripheral.services();
        debug!("Discovered {} service(s) on {device_id}", services.len());

        Ok(BleLink {
            characteristics: peripheral.characteristics().into_iter().collect(),
            services: service_infos(&services),
            peripheral,
        })
    }
}

/// Established btleplug link to one trainer
pub struct BleLink {
    peripheral: Peripheral,
    characteristics: Vec<Characteristic>,
    services: Vec<ServiceInfo>,
}

impl BleLink {
    fn characteristic(&self, uuid: Uuid) -> Result<&Characteristic> {
        self.characteristics
            .iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| TrainerError::CharacteristicNotFound(uuid.to_string()))
    }
}

#[async_trait]
impl Transport for BleLink {
    fn services(&self) -> Vec<ServiceInfo> {
        self.services.clone()
    }

    async fn request_mtu(&self, mtu: u16) -> Result<u16> {
        // btleplug negotiates the MTU itself and exposes no request API
        Err(TrainerError::Unsupported(format!("MTU request ({mtu})")))
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral
            .write(characteristic, data, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
        let characteristic = self.characteristic(characteristic)?;
        Ok(self.peripheral.read(characteristic).await?)
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral.subscribe(characteristic).await?;
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral.unsubscribe(characteristic).await?;
        Ok(())
    }

    async fn notifications(&self) -> Result<BoxStream<'static, Notification>> {
        let stream = self.peripheral.notifications().await?;
        Ok(stream
            .map(|n| Notification {
                characteristic: n.uuid,
                value: n.value,
            })
            .boxed())
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

fn matches_prefix(name: &str, prefix: &str) -> bool {
    name.starts_with(prefix)
}

fn find_by_id<P>(peripherals: Vec<P>, device_id: &str, id_of: impl Fn(&P) -> String) -> Option<P> {
    peripherals.into_iter().find(|p| id_of(p) == device_id)
}

fn service_infos(services: &BTreeSet<Service>) -> Vec<ServiceInfo> {
    services
        .iter()
        .map(|service| ServiceInfo {
            uuid: service.uuid,
            characteristics: service.characteristics.iter().map(|c| c.uuid).collect(),
        })
        .collect()
}
