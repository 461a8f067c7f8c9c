//! Bluetooth LE driver
//!
//! `btleplug` is async, so the driver owns a small tokio runtime and blocks
//! on it for connect, write and disconnect. Notifications of the selected
//! characteristic are forwarded by a runtime task into a channel that
//! [`read_chunk`](TransportDriver::read_chunk) waits on.
//!
//! Finding the device is a bounded lookup by address or advertised name;
//! interactive scanning is left to the caller.

use super::{BleConfig, TransportDriver, TransportKind};
use crate::error::TransportError;
use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use uuid::Uuid;

pub struct BleDriver {
    config: BleConfig,
    runtime: Runtime,
    peripheral: Option<Peripheral>,
    characteristic: Characteristic,
    notifications: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    cancel: Arc<AtomicBool>,
}

impl BleDriver {
    pub fn open(config: BleConfig) -> Result<Self, TransportError> {
        let service = parse_uuid(&config.service_id, "service")?;
        let char_uuid = parse_uuid(&config.characteristic_id, "characteristic")?;
        if config.device_id.trim().is_empty() {
            return Err(TransportError::InvalidConfig("no BLE device selected".to_string()));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()?;

        let (tx, notifications) = unbounded();
        let (peripheral, characteristic) = runtime.block_on(async {
            let adapter = first_adapter().await?;
            let peripheral = find_device(&adapter, &config, service).await?;

            peripheral.connect().await.map_err(map_ble_error)?;
            peripheral.discover_services().await.map_err(map_ble_error)?;

            let characteristic = peripheral
                .characteristics()
                .into_iter()
                .find(|c| c.uuid == char_uuid && c.service_uuid == service)
                .ok_or_else(|| {
                    TransportError::NotFound(format!("characteristic {}", char_uuid))
                })?;

            if characteristic
                .properties
                .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
            {
                peripheral
                    .subscribe(&characteristic)
                    .await
                    .map_err(map_ble_error)?;
            }

            let mut stream = peripheral.notifications().await.map_err(map_ble_error)?;
            tokio::spawn(async move {
                while let Some(notification) = stream.next().await {
                    if notification.uuid == char_uuid && tx.send(notification.value).is_err() {
                        break;
                    }
                }
            });

            Ok::<_, TransportError>((peripheral, characteristic))
        })?;

        tracing::info!("Connected to BLE device {}", config.device_id);
        Ok(Self {
            config,
            runtime,
            peripheral: Some(peripheral),
            characteristic,
            notifications,
            pending: Vec::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }
}

async fn first_adapter() -> Result<Adapter, TransportError> {
    let manager = Manager::new().await.map_err(map_ble_error)?;
    manager
        .adapters()
        .await
        .map_err(map_ble_error)?
        .into_iter()
        .next()
        .ok_or(TransportError::AdapterOff)
}

async fn find_device(
    adapter: &Adapter,
    config: &BleConfig,
    service: Uuid,
) -> Result<Peripheral, TransportError> {
    adapter
        .start_scan(ScanFilter {
            services: vec![service],
        })
        .await
        .map_err(map_ble_error)?;

    let deadline = Instant::now() + Duration::from_millis(config.scan_timeout_ms);
    let wanted = config.device_id.trim();
    let found = loop {
        if let Some(peripheral) = matching(adapter, wanted).await {
            break Some(peripheral);
        }
        if Instant::now() >= deadline {
            break None;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    };

    let _ = adapter.stop_scan().await;
    found.ok_or_else(|| TransportError::NotFound(format!("BLE device {}", wanted)))
}

/// Peripheral whose address or advertised name is `wanted`
async fn matching(adapter: &Adapter, wanted: &str) -> Option<Peripheral> {
    for peripheral in adapter.peripherals().await.ok()? {
        if peripheral.address().to_string().eq_ignore_ascii_case(wanted) {
            return Some(peripheral);
        }
        let name = peripheral
            .properties()
            .await
            .ok()
            .flatten()
            .and_then(|p| p.local_name);
        if name.as_deref() == Some(wanted) {
            return Some(peripheral);
        }
    }
    None
}

impl TransportDriver for BleDriver {
    fn kind(&self) -> TransportKind {
        TransportKind::BluetoothLe
    }

    fn target(&self) -> &str {
        &self.config.device_id
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.peripheral.is_none() {
            return Err(TransportError::NotOpen);
        }
        if self.cancel.load(Ordering::Acquire) {
            return Ok(0);
        }

        if self.pending.is_empty() {
            let timeout = Duration::from_millis(self.config.read_timeout_ms.max(1));
            match self.notifications.recv_timeout(timeout) {
                Ok(value) => self.pending = value,
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => {
                    self.peripheral = None;
                    return Err(TransportError::ConnectionLost(self.config.device_id.clone()));
                }
            }
        }

        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let peripheral = self.peripheral.as_ref().ok_or(TransportError::NotOpen)?;
        let write_type = if self
            .characteristic
            .properties
            .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
        {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };

        self.runtime
            .block_on(peripheral.write(&self.characteristic, data, write_type))
            .map_err(map_ble_error)?;
        Ok(data.len())
    }

    fn close(&mut self) {
        self.cancel.store(true, Ordering::Release);
        if let Some(peripheral) = self.peripheral.take() {
            if let Err(e) = self.runtime.block_on(peripheral.disconnect()) {
                tracing::debug!("BLE disconnect failed: {}", e);
            }
            tracing::info!("Disconnected from BLE device {}", self.config.device_id);
        }
    }

    fn is_open(&self) -> bool {
        self.peripheral.is_some() && !self.cancel.load(Ordering::Acquire)
    }

    fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }
}

impl Drop for BleDriver {
    fn drop(&mut self) {
        self.close();
    }
}

fn parse_uuid(text: &str, what: &str) -> Result<Uuid, TransportError> {
    Uuid::parse_str(text.trim())
        .map_err(|e| TransportError::InvalidConfig(format!("invalid {} UUID '{}': {}", what, text, e)))
}

fn map_ble_error(err: btleplug::Error) -> TransportError {
    match err {
        btleplug::Error::PermissionDenied => {
            TransportError::PermissionDenied("Bluetooth".to_string())
        }
        btleplug::Error::DeviceNotFound => TransportError::NotFound("BLE device".to_string()),
        btleplug::Error::NotConnected => TransportError::ConnectionLost("BLE device".to_string()),
        btleplug::Error::TimedOut(d) => TransportError::Timeout(format!("{:?}", d)),
        btleplug::Error::NotSupported(what) => TransportError::UnsupportedPlatform(what),
        other => TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            other.to_string(),
        )),
    }
}
