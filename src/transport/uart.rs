//! Serial port driver
//!
//! When `auto_reconnect` is enabled a lost port is reopened inside
//! [`read_chunk`](TransportDriver::read_chunk) following the configured
//! [`ReconnectPolicy`](super::ReconnectPolicy). Reconnection only gives up when
//! the driver is cancelled or the attempt budget is spent.

use super::{
    sleep_cancellable, FlowControl, Parity, StopBits, TransportDriver, TransportKind, UartConfig,
};
use crate::error::TransportError;
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct UartDriver {
    config: UartConfig,
    port: Option<Box<dyn SerialPort>>,
    cancel: Arc<AtomicBool>,
    reconnects: u64,
}

impl UartDriver {
    pub fn open(config: UartConfig) -> Result<Self, TransportError> {
        let port = Self::open_port(&config)?;
        tracing::info!("Opened serial port {} at {} baud", config.port, config.baud_rate);

        Ok(Self {
            config,
            port: Some(port),
            cancel: Arc::new(AtomicBool::new(false)),
            reconnects: 0,
        })
    }

    /// Validate settings and open the port
    fn open_port(config: &UartConfig) -> Result<Box<dyn SerialPort>, TransportError> {
        if config.port.trim().is_empty() {
            return Err(TransportError::InvalidConfig(
                "no serial port selected".to_string(),
            ));
        }

        let data_bits = match config.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            8 => serialport::DataBits::Eight,
            other => {
                return Err(TransportError::InvalidConfig(format!(
                    "unsupported data bits {}",
                    other
                )))
            }
        };

        let parity = match config.parity {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Mark | Parity::Space => {
                return Err(TransportError::UnsupportedPlatform(format!(
                    "{:?} parity is not supported by the serial backend",
                    config.parity
                )))
            }
        };

        let stop_bits = match config.stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        };

        let flow_control = match config.flow_control {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::RtsCts => serialport::FlowControl::Hardware,
            FlowControl::XonXoff => serialport::FlowControl::Software,
        };

        let mut port = serialport::new(&config.port, config.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(flow_control)
            .timeout(Duration::from_millis(config.read_timeout_ms.max(1)))
            .open()
            .map_err(|e| map_serial_error(e, &config.port))?;

        if let Err(e) = port.write_data_terminal_ready(config.dtr) {
            tracing::debug!("Failed to set DTR on {}: {}", config.port, e);
        }

        Ok(port)
    }

    /// Number of successful reconnections since open
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    fn reconnect(&mut self) -> Result<(), TransportError> {
        let policy = self.config.reconnect.clone();
        let mut attempt = 0u32;

        loop {
            if policy.exhausted(attempt) {
                return Err(TransportError::ConnectionLost(format!(
                    "{} (gave up after {} reconnect attempts)",
                    self.config.port, attempt
                )));
            }
            if !sleep_cancellable(policy.delay(attempt), &self.cancel) {
                return Err(TransportError::ConnectionLost(format!(
                    "{} (reconnect cancelled)",
                    self.config.port
                )));
            }
            attempt += 1;

            match Self::open_port(&self.config) {
                Ok(port) => {
                    tracing::info!(
                        "Reconnected to {} after {} attempt(s)",
                        self.config.port,
                        attempt
                    );
                    self.port = Some(port);
                    self.reconnects += 1;
                    return Ok(());
                }
                Err(e) => tracing::debug!("Reconnect attempt {} failed: {}", attempt, e),
            }
        }
    }
}

impl TransportDriver for UartDriver {
    fn kind(&self) -> TransportKind {
        TransportKind::Uart
    }

    fn target(&self) -> &str {
        &self.config.port
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        loop {
            if self.cancel.load(Ordering::Acquire) {
                return Ok(0);
            }
            let Some(port) = self.port.as_mut() else {
                return Err(TransportError::NotOpen);
            };

            match port.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Ok(0)
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    let error = TransportError::from_io(e, &self.config.port);
                    self.port = None;
                    if !self.config.auto_reconnect {
                        return Err(error);
                    }
                    tracing::warn!("Serial port lost ({}), reconnecting", error);
                    self.reconnect()?;
                }
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;
        port.write_all(data)
            .and_then(|_| port.flush())
            .map_err(|e| TransportError::from_io(e, &self.config.port))?;
        Ok(data.len())
    }

    fn close(&mut self) {
        self.cancel.store(true, Ordering::Release);
        if self.port.take().is_some() {
            tracing::info!("Closed serial port {}", self.config.port);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some() && !self.cancel.load(Ordering::Acquire)
    }

    fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }
}

impl Drop for UartDriver {
    fn drop(&mut self) {
        self.close();
    }
}

fn map_serial_error(err: serialport::Error, port: &str) -> TransportError {
    match err.kind() {
        serialport::ErrorKind::NoDevice => TransportError::NotFound(port.to_string()),
        serialport::ErrorKind::InvalidInput => {
            TransportError::InvalidConfig(format!("{}: {}", port, err.description))
        }
        serialport::ErrorKind::Io(kind) => {
            TransportError::from_io(std::io::Error::new(kind, err.description), port)
        }
        serialport::ErrorKind::Unknown => {
            TransportError::Io(std::io::Error::new(ErrorKind::Other, err.description))
        }
    }
}
