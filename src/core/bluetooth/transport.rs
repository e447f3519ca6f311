//! Transport capability consumed by the session
//! Defines the abstract GATT interface the session drives, plus the real
//! adapter backed by the bluest library. Device discovery itself is the
//! caller's concern; discovered devices are registered here by identity.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device};
use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::bluetooth::constants::DISCONNECT_POLL_INTERVAL_MS;
use crate::core::bluetooth::types::{DeviceIdentity, SolarCharacteristic};
use crate::error::TransportError;

/// Callback invoked with the payload of each incoming notification.
pub type NotificationCallback = Box<dyn Fn(Vec<u8>) + Send + Sync>;

/// Callback invoked once when the link is lost unexpectedly.
pub type DisconnectCallback = Box<dyn Fn() + Send + Sync>;

/// The GATT operations the session needs from the wireless link.
///
/// Implementations must be safe to share across tasks; the session
/// serializes batch reads and control writes itself.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a link to the device.
    async fn connect(&self, identity: &DeviceIdentity) -> Result<(), TransportError>;

    /// Release the link. The device stays known so a later `connect`
    /// can re-establish it.
    async fn disconnect(&self, identity: &DeviceIdentity) -> Result<(), TransportError>;

    /// Read the current value of a characteristic.
    async fn read(
        &self,
        identity: &DeviceIdentity,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, TransportError>;

    /// Write a characteristic without waiting for an acknowledgement.
    async fn write_no_response(
        &self,
        identity: &DeviceIdentity,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    /// Subscribe to a characteristic's notification stream. Replaces any
    /// previous subscription for the same characteristic.
    async fn subscribe(
        &self,
        identity: &DeviceIdentity,
        service: Uuid,
        characteristic: Uuid,
        on_value: NotificationCallback,
    ) -> Result<(), TransportError>;

    /// Register a callback fired once if the link drops unexpectedly.
    /// A deliberate `disconnect` must not fire it.
    async fn set_disconnect_handler(
        &self,
        identity: &DeviceIdentity,
        on_disconnect: DisconnectCallback,
    ) -> Result<(), TransportError>;
}

/// Live GATT handles for one connected device.
struct DeviceLink {
    device: Device,
    characteristics: HashMap<Uuid, Characteristic>,
}

/// Real transport backed by the platform Bluetooth stack via bluest.
pub struct BluestTransport {
    adapter: Adapter,
    /// Devices handed over by discovery, keyed by identity id.
    devices: Mutex<HashMap<String, Device>>,
    /// Active links, keyed by identity id.
    links: Arc<Mutex<HashMap<String, DeviceLink>>>,
}

impl BluestTransport {
    /// Create a transport on the default adapter.
    pub async fn new() -> Result<Self, TransportError> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| TransportError::Adapter(anyhow!("no Bluetooth adapter found")))?;
        adapter
            .wait_available()
            .await
            .map_err(|e| TransportError::Adapter(e.into()))?;
        info!("Bluetooth adapter is available.");
        Ok(Self {
            adapter,
            devices: Mutex::new(HashMap::new()),
            links: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Register a discovered device under the identity the session will use.
    pub async fn register_device(&self, identity: &DeviceIdentity, device: Device) {
        self.devices.lock().await.insert(identity.id.clone(), device);
    }

    async fn lookup_device(&self, identity: &DeviceIdentity) -> Result<Device, TransportError> {
        self.devices
            .lock()
            .await
            .get(&identity.id)
            .cloned()
            .ok_or_else(|| TransportError::DeviceNotFound(identity.id.clone()))
    }

    async fn lookup_characteristic(
        &self,
        identity: &DeviceIdentity,
        characteristic: Uuid,
    ) -> Result<Characteristic, TransportError> {
        let links = self.links.lock().await;
        let link = links.get(&identity.id).ok_or(TransportError::NotConnected)?;
        link.characteristics
            .get(&characteristic)
            .cloned()
            .ok_or(TransportError::AttributeMissing(characteristic))
    }

    /// Walk the device's services and collect handles for all six
    /// characteristics in the static address table.
    async fn discover_link(device: &Device) -> Result<HashMap<Uuid, Characteristic>, TransportError> {
        let services = device
            .services()
            .await
            .map_err(|e| TransportError::Adapter(e.into()))?;

        let mut found = HashMap::new();
        for service in &services {
            let wanted: Vec<Uuid> = SolarCharacteristic::POLL_ORDER
                .iter()
                .filter(|c| c.service_uuid() == service.uuid())
                .map(|c| c.uuid())
                .collect();
            if wanted.is_empty() {
                debug!("Skipping unrelated service: {}", service.uuid());
                continue;
            }
            for characteristic in service
                .characteristics()
                .await
                .map_err(|e| TransportError::Adapter(e.into()))?
            {
                if wanted.contains(&characteristic.uuid()) {
                    info!("Found characteristic: {}", characteristic.uuid());
                    found.insert(characteristic.uuid(), characteristic);
                }
            }
        }

        for c in SolarCharacteristic::POLL_ORDER {
            if !found.contains_key(&c.uuid()) {
                return Err(TransportError::AttributeMissing(c.uuid()));
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl Transport for BluestTransport {
    async fn connect(&self, identity: &DeviceIdentity) -> Result<(), TransportError> {
        let device = self.lookup_device(identity).await?;

        if !device.is_connected().await {
            info!("Initiating connection to {}...", identity.id);
            self.adapter
                .connect_device(&device)
                .await
                .map_err(|e| TransportError::Adapter(e.into()))?;
        }

        info!("Connection successful, discovering services...");
        let characteristics = Self::discover_link(&device).await?;

        self.links.lock().await.insert(
            identity.id.clone(),
            DeviceLink {
                device,
                characteristics,
            },
        );
        Ok(())
    }

    async fn disconnect(&self, identity: &DeviceIdentity) -> Result<(), TransportError> {
        let link = self.links.lock().await.remove(&identity.id);
        let Some(link) = link else {
            return Ok(());
        };
        if link.device.is_connected().await {
            info!("Disconnecting from device {}", identity.id);
            self.adapter
                .disconnect_device(&link.device)
                .await
                .map_err(|e| TransportError::Adapter(e.into()))?;
        }
        Ok(())
    }

    async fn read(
        &self,
        identity: &DeviceIdentity,
        _service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, TransportError> {
        let characteristic = self.lookup_characteristic(identity, characteristic).await?;
        characteristic
            .read()
            .await
            .map_err(|e| TransportError::Adapter(e.into()))
    }

    async fn write_no_response(
        &self,
        identity: &DeviceIdentity,
        _service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let characteristic = self.lookup_characteristic(identity, characteristic).await?;
        characteristic
            .write_without_response(payload)
            .await
            .map_err(|e| TransportError::Adapter(e.into()))
    }

    async fn subscribe(
        &self,
        identity: &DeviceIdentity,
        _service: Uuid,
        characteristic: Uuid,
        on_value: NotificationCallback,
    ) -> Result<(), TransportError> {
        let characteristic = self.lookup_characteristic(identity, characteristic).await?;
        let id = identity.id.clone();
        tokio::spawn(async move {
            let uuid = characteristic.uuid();
            match characteristic.notify().await {
                Ok(mut stream) => {
                    info!("Listening for notifications on {uuid}...");
                    while let Some(result) = stream.next().await {
                        match result {
                            Ok(value) => on_value(value),
                            Err(e) => {
                                warn!("Notification error on {uuid} ({id}): {e}");
                                break;
                            }
                        }
                    }
                    info!("Notification stream for {uuid} ended");
                }
                Err(e) => warn!("Failed to subscribe to {uuid} ({id}): {e}"),
            }
        });
        Ok(())
    }

    async fn set_disconnect_handler(
        &self,
        identity: &DeviceIdentity,
        on_disconnect: DisconnectCallback,
    ) -> Result<(), TransportError> {
        let device = {
            let links = self.links.lock().await;
            links
                .get(&identity.id)
                .map(|link| link.device.clone())
                .ok_or(TransportError::NotConnected)?
        };
        let links = Arc::clone(&self.links);
        let id = identity.id.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(DISCONNECT_POLL_INTERVAL_MS)).await;
                if !links.lock().await.contains_key(&id) {
                    // Released deliberately; nothing to report.
                    break;
                }
                if !device.is_connected().await {
                    warn!("Device {id} lost its connection");
                    on_disconnect();
                    break;
                }
            }
        });
        Ok(())
    }
}
