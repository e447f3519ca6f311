//! In-process Solar Box simulator
//!
//! Implements [`Transport`] against a scriptable in-memory device so
//! sessions can be exercised in integration tests without real BLE
//! hardware. Records every link operation in a journal for ordering
//! assertions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use async_trait::async_trait;
use uuid::Uuid;

use crate::core::bluetooth::transport::{DisconnectCallback, NotificationCallback, Transport};
use crate::core::bluetooth::types::{DeviceIdentity, SolarCharacteristic};
use crate::error::TransportError;

/// One recorded link operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Connect,
    Disconnect,
    Read(Uuid),
    Write { characteristic: Uuid, payload: Vec<u8> },
    Subscribe(Uuid),
}

struct SimInner {
    values: Mutex<HashMap<Uuid, Vec<u8>>>,
    journal: Mutex<Vec<JournalEntry>>,
    connect_instants: Mutex<Vec<Instant>>,
    read_failures: Mutex<HashMap<Uuid, u32>>,
    connect_failures: AtomicU32,
    read_delay: Mutex<Duration>,
    connected: AtomicBool,
    on_disconnect: Mutex<Option<DisconnectCallback>>,
    subscribers: Mutex<HashMap<Uuid, Arc<NotificationCallback>>>,
}

/// A simulated Solar Box device.
///
/// Clones share the same device; keep one clone in the test while the
/// session owns another through the [`Transport`] object.
#[derive(Clone)]
pub struct SimulatedSolarBox {
    inner: Arc<SimInner>,
}

impl SimulatedSolarBox {
    /// Create a simulator preloaded with plausible telemetry: a full
    /// battery, 12.5 V / 1.5 A / 300 W of PV input, the load off and the
    /// controller idle.
    pub fn new() -> Self {
        let mut values = HashMap::new();
        values.insert(
            SolarCharacteristic::BatteryLevel.uuid(),
            vec![0x64, 0x00],
        );
        values.insert(
            SolarCharacteristic::PvVoltage.uuid(),
            12.5f32.to_le_bytes().to_vec(),
        );
        values.insert(
            SolarCharacteristic::PvCurrent.uuid(),
            1.5f32.to_le_bytes().to_vec(),
        );
        values.insert(
            SolarCharacteristic::PvPower.uuid(),
            300u16.to_le_bytes().to_vec(),
        );
        values.insert(SolarCharacteristic::TriggerLoad.uuid(), vec![0x00]);
        values.insert(SolarCharacteristic::TriggerState.uuid(), b"IDLE".to_vec());

        Self {
            inner: Arc::new(SimInner {
                values: Mutex::new(values),
                journal: Mutex::new(Vec::new()),
                connect_instants: Mutex::new(Vec::new()),
                read_failures: Mutex::new(HashMap::new()),
                connect_failures: AtomicU32::new(0),
                read_delay: Mutex::new(Duration::ZERO),
                connected: AtomicBool::new(false),
                on_disconnect: Mutex::new(None),
                subscribers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Replace the stored value of a characteristic.
    pub fn set_value(&self, characteristic: SolarCharacteristic, payload: Vec<u8>) {
        self.inner
            .values
            .lock()
            .unwrap()
            .insert(characteristic.uuid(), payload);
    }

    /// Make the next `count` reads of a characteristic fail.
    pub fn fail_next_reads(&self, characteristic: SolarCharacteristic, count: u32) {
        self.inner
            .read_failures
            .lock()
            .unwrap()
            .insert(characteristic.uuid(), count);
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.inner.connect_failures.store(count, Ordering::SeqCst);
    }

    /// Stretch every read by `delay` of simulated link latency.
    pub fn set_read_delay(&self, delay: Duration) {
        *self.inner.read_delay.lock().unwrap() = delay;
    }

    /// Deliver a device-initiated notification, updating the stored
    /// value and invoking the subscriber, if any.
    pub fn push_notification(&self, characteristic: SolarCharacteristic, payload: Vec<u8>) {
        self.inner
            .values
            .lock()
            .unwrap()
            .insert(characteristic.uuid(), payload.clone());
        let subscriber = self
            .inner
            .subscribers
            .lock()
            .unwrap()
            .get(&characteristic.uuid())
            .cloned();
        if let Some(on_value) = subscriber {
            on_value(payload);
        }
    }

    /// Drop the link as the device would: unexpectedly, firing the
    /// registered disconnect handler.
    pub fn drop_link(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        let handler = self.inner.on_disconnect.lock().unwrap();
        if let Some(on_disconnect) = handler.as_ref() {
            on_disconnect();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// All link operations recorded so far, in order.
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.inner.journal.lock().unwrap().clone()
    }

    /// When each connect attempt arrived, for backoff assertions.
    pub fn connect_instants(&self) -> Vec<Instant> {
        self.inner.connect_instants.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connect_instants.lock().unwrap().len()
    }

    fn record(&self, entry: JournalEntry) {
        self.inner.journal.lock().unwrap().push(entry);
    }
}

impl Default for SimulatedSolarBox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SimulatedSolarBox {
    async fn connect(&self, _identity: &DeviceIdentity) -> Result<(), TransportError> {
        self.record(JournalEntry::Connect);
        self.inner.connect_instants.lock().unwrap().push(Instant::now());

        let remaining = self.inner.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.inner
                .connect_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::Adapter(anyhow!("simulated connect failure")));
        }
        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self, _identity: &DeviceIdentity) -> Result<(), TransportError> {
        // A requested disconnect never fires the disconnect handler.
        self.record(JournalEntry::Disconnect);
        self.inner.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn read(
        &self,
        _identity: &DeviceIdentity,
        _service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.record(JournalEntry::Read(characteristic));

        let delay = *self.inner.read_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        {
            let mut failures = self.inner.read_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&characteristic) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(TransportError::Adapter(anyhow!("simulated read failure")));
                }
            }
        }

        self.inner
            .values
            .lock()
            .unwrap()
            .get(&characteristic)
            .cloned()
            .ok_or_else(|| TransportError::Adapter(anyhow!("no value for {characteristic}")))
    }

    async fn write_no_response(
        &self,
        _identity: &DeviceIdentity,
        _service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.record(JournalEntry::Write {
            characteristic,
            payload: payload.to_vec(),
        });
        // The device applies the write, so the next read echoes it back.
        self.inner
            .values
            .lock()
            .unwrap()
            .insert(characteristic, payload.to_vec());
        Ok(())
    }

    async fn subscribe(
        &self,
        _identity: &DeviceIdentity,
        _service: Uuid,
        characteristic: Uuid,
        on_value: NotificationCallback,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.record(JournalEntry::Subscribe(characteristic));
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .insert(characteristic, Arc::new(on_value));
        Ok(())
    }

    async fn set_disconnect_handler(
        &self,
        _identity: &DeviceIdentity,
        on_disconnect: DisconnectCallback,
    ) -> Result<(), TransportError> {
        *self.inner.on_disconnect.lock().unwrap() = Some(on_disconnect);
        Ok(())
    }
}
