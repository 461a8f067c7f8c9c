//! Transport drivers
//!
//! A transport delivers the raw byte stream of a device. Every driver
//! implements [`TransportDriver`]; callers never branch on the concrete type.
//!
//! # Drivers
//!
//! - [`uart::UartDriver`] - serial ports via `serialport`, with optional
//!   automatic reconnection
//! - [`network::NetworkDriver`] - TCP client or UDP socket (unicast or multicast)
//! - `ble::BleDriver` - a Bluetooth LE characteristic via `btleplug`
//!   (requires the `ble` feature)
//! - [`loopback::LoopbackDriver`] - in-process pipe for tests and embedding
//!
//! # Reading
//!
//! [`TransportDriver::read_chunk`] blocks on the OS primitive for at most the
//! configured read timeout and returns `Ok(0)` when nothing arrived. The
//! [`ByteChunks`] iterator hides idle timeouts and ends once the driver is
//! closed or cancelled through its [`cancel_token`](TransportDriver::cancel_token).

pub mod loopback;
pub mod network;
pub mod uart;

#[cfg(feature = "ble")]
pub mod ble;

pub use loopback::{LoopbackDriver, LoopbackHandle};
pub use network::NetworkDriver;
pub use uart::UartDriver;

use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default time a read blocks before reporting an idle timeout
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Size of the buffer used by [`ByteChunks`]
pub const CHUNK_SIZE: usize = 4096;

/// Kind of transport behind a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Uart,
    Network,
    BluetoothLe,
    Loopback,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Uart => write!(f, "UART"),
            TransportKind::Network => write!(f, "Network"),
            TransportKind::BluetoothLe => write!(f, "Bluetooth LE"),
            TransportKind::Loopback => write!(f, "Loopback"),
        }
    }
}

/// Transport configuration, keyed by driver kind
///
/// In TOML:
///
/// ```toml
/// [transport]
/// kind = "uart"
/// port = "/dev/ttyUSB0"
/// baud_rate = 115200
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    Uart(UartConfig),
    Network(NetworkConfig),
    BluetoothLe(BleConfig),
}

impl TransportConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Uart(_) => TransportKind::Uart,
            TransportConfig::Network(_) => TransportKind::Network,
            TransportConfig::BluetoothLe(_) => TransportKind::BluetoothLe,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Uart(UartConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
    Space,
    Mark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    #[default]
    One,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    #[default]
    None,
    RtsCts,
    XonXoff,
}

/// Serial port settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UartConfig {
    /// Port path or name (`/dev/ttyUSB0`, `COM3`)
    pub port: String,
    pub baud_rate: u32,
    /// 5, 6, 7 or 8
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    /// Reopen the port when it disappears
    pub auto_reconnect: bool,
    /// Assert DTR after opening
    pub dtr: bool,
    pub reconnect: ReconnectPolicy,
    pub read_timeout_ms: u64,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            auto_reconnect: false,
            dtr: true,
            reconnect: ReconnectPolicy::default(),
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketType {
    #[default]
    Tcp,
    Udp,
}

/// Network socket settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub socket_type: SocketType,
    /// Host name or IP address
    pub remote_address: String,
    pub remote_port: u16,
    /// Local UDP port, 0 lets the OS choose
    pub local_port: u16,
    /// Join `remote_address` as an IPv4 multicast group (UDP only)
    pub multicast: bool,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            socket_type: SocketType::Tcp,
            remote_address: "127.0.0.1".to_string(),
            remote_port: 23,
            local_port: 0,
            multicast: false,
            connect_timeout_ms: 5000,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

/// Bluetooth LE characteristic settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    /// Device address or advertised name
    pub device_id: String,
    /// Service UUID
    pub service_id: String,
    /// Characteristic UUID carrying the data stream
    pub characteristic_id: String,
    /// Time allowed to find the device
    pub scan_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            service_id: String::new(),
            characteristic_id: String::new(),
            scan_timeout_ms: 5000,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    Exponential,
    Fixed,
}

/// Retry schedule for automatic reconnection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub backoff: Backoff,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// 0 retries forever
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            backoff: Backoff::Exponential,
            base_delay_ms: 100,
            max_delay_ms: 5000,
            max_attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given (0-based) attempt
    pub fn delay(&self, attempt: u32) -> Duration {
        let ms = match self.backoff {
            Backoff::Fixed => self.base_delay_ms,
            Backoff::Exponential => self
                .base_delay_ms
                .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX)),
        };
        Duration::from_millis(ms.min(self.max_delay_ms))
    }

    /// Whether `attempts` retries used up the budget
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts != 0 && attempts >= self.max_attempts
    }
}

/// Uniform byte-stream interface over every transport
pub trait TransportDriver: Send {
    fn kind(&self) -> TransportKind;

    /// Human readable target (port, address, device)
    fn target(&self) -> &str;

    /// Read available bytes; `Ok(0)` means the read timed out idle
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Release the underlying handle
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Flag that, once set, makes blocking loops in the driver return
    fn cancel_token(&self) -> Arc<AtomicBool>;
}

impl dyn TransportDriver {
    /// Lazy sequence of received chunks
    pub fn chunks(&mut self) -> ByteChunks<'_> {
        ByteChunks {
            cancel: self.cancel_token(),
            driver: self,
            buf: vec![0u8; CHUNK_SIZE],
            done: false,
        }
    }
}

/// Iterator over the chunks received by a driver
pub struct ByteChunks<'a> {
    driver: &'a mut (dyn TransportDriver + 'static),
    cancel: Arc<AtomicBool>,
    buf: Vec<u8>,
    done: bool,
}

impl Iterator for ByteChunks<'_> {
    type Item = Result<Vec<u8>, TransportError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if self.cancel.load(Ordering::Acquire) || !self.driver.is_open() {
                self.done = true;
                break;
            }
            match self.driver.read_chunk(&mut self.buf) {
                Ok(0) => continue,
                Ok(n) => return Some(Ok(self.buf[..n].to_vec())),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// Open a driver for the given configuration
pub fn open(config: &TransportConfig) -> Result<Box<dyn TransportDriver>, TransportError> {
    tracing::info!("Opening {} transport", config.kind());
    match config {
        TransportConfig::Uart(cfg) => Ok(Box::new(UartDriver::open(cfg.clone())?)),
        TransportConfig::Network(cfg) => Ok(Box::new(NetworkDriver::open(cfg.clone())?)),
        #[cfg(feature = "ble")]
        TransportConfig::BluetoothLe(cfg) => Ok(Box::new(ble::BleDriver::open(cfg.clone())?)),
        #[cfg(not(feature = "ble"))]
        TransportConfig::BluetoothLe(_) => Err(TransportError::UnsupportedPlatform(
            "built without Bluetooth LE support (enable the `ble` feature)".to_string(),
        )),
    }
}

/// Sleep for `duration` unless cancelled first; returns `false` if cancelled
pub(crate) fn sleep_cancellable(duration: Duration, cancel: &AtomicBool) -> bool {
    const SLICE: Duration = Duration::from_millis(20);
    let deadline = Instant::now() + duration;
    loop {
        if cancel.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(SLICE.min(deadline - now));
    }
}
