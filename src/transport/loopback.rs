//! In-process loopback transport
//!
//! [`LoopbackDriver::pair`] returns a driver and the [`LoopbackHandle`] that
//! plays the device: bytes sent through the handle are read by the driver,
//! bytes written to the driver are collected by the handle. Dropping the
//! handle looks like the device going away.

use super::{TransportDriver, TransportKind, DEFAULT_READ_TIMEOUT_MS};
use crate::error::TransportError;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct LoopbackDriver {
    incoming: Receiver<Vec<u8>>,
    outgoing: Sender<Vec<u8>>,
    /// Bytes of a chunk that did not fit the caller's buffer
    pending: Vec<u8>,
    read_timeout: Duration,
    open: bool,
    cancel: Arc<AtomicBool>,
}

/// Device side of a loopback pair
#[derive(Debug, Clone)]
pub struct LoopbackHandle {
    to_driver: Sender<Vec<u8>>,
    from_driver: Receiver<Vec<u8>>,
}

impl LoopbackDriver {
    pub fn pair() -> (Self, LoopbackHandle) {
        let (to_driver, incoming) = unbounded();
        let (outgoing, from_driver) = unbounded();

        let driver = Self {
            incoming,
            outgoing,
            pending: Vec::new(),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            open: true,
            cancel: Arc::new(AtomicBool::new(false)),
        };
        (
            driver,
            LoopbackHandle {
                to_driver,
                from_driver,
            },
        )
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    fn drain_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        n
    }
}

impl LoopbackHandle {
    /// Deliver bytes to the driver
    pub fn send(&self, data: impl Into<Vec<u8>>) -> bool {
        self.to_driver.send(data.into()).is_ok()
    }

    /// Everything written by the driver so far
    pub fn written(&self) -> Vec<u8> {
        self.from_driver.try_iter().flatten().collect()
    }

    /// Wait for the next write from the driver
    pub fn recv_written(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.from_driver.recv_timeout(timeout).ok()
    }
}

impl TransportDriver for LoopbackDriver {
    fn kind(&self) -> TransportKind {
        TransportKind::Loopback
    }

    fn target(&self) -> &str {
        "loopback"
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        if self.cancel.load(Ordering::Acquire) {
            return Ok(0);
        }
        if !self.pending.is_empty() {
            return Ok(self.drain_pending(buf));
        }

        match self.incoming.recv_timeout(self.read_timeout) {
            Ok(chunk) => {
                self.pending = chunk;
                Ok(self.drain_pending(buf))
            }
            Err(RecvTimeoutError::Timeout) => Ok(0),
            Err(RecvTimeoutError::Disconnected) => {
                self.open = false;
                Err(TransportError::ConnectionLost("loopback peer dropped".to_string()))
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        self.outgoing
            .send(data.to_vec())
            .map_err(|_| TransportError::ConnectionLost("loopback peer dropped".to_string()))?;
        Ok(data.len())
    }

    fn close(&mut self) {
        self.cancel.store(true, Ordering::Release);
        self.open = false;
        self.pending.clear();
    }

    fn is_open(&self) -> bool {
        self.open && !self.cancel.load(Ordering::Acquire)
    }

    fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_and_write() {
        let (mut driver, handle) = LoopbackDriver::pair();
        assert!(handle.send(b"hello".to_vec()));

        let mut buf = [0u8; 3];
        assert_eq!(driver.read_chunk(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(driver.read_chunk(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"lo");

        driver.write(b"cmd").unwrap();
        assert_eq!(handle.written(), b"cmd");
    }

    #[test]
    fn test_idle_timeout() {
        let (driver, _handle) = LoopbackDriver::pair();
        let mut driver = driver.with_read_timeout(Duration::from_millis(5));
        let mut buf = [0u8; 8];
        assert_eq!(driver.read_chunk(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_chunks_iterator() {
        let (driver, handle) = LoopbackDriver::pair();
        let mut driver: Box<dyn TransportDriver> =
            Box::new(driver.with_read_timeout(Duration::from_millis(5)));

        handle.send(b"a".to_vec());
        handle.send(b"b".to_vec());
        drop(handle);

        let chunks: Vec<_> = driver.chunks().collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].as_ref().unwrap(), b"a");
        assert_eq!(chunks[1].as_ref().unwrap(), b"b");
        assert!(matches!(chunks[2], Err(TransportError::ConnectionLost(_))));
    }

    #[test]
    fn test_cancel_ends_chunks() {
        let (driver, handle) = LoopbackDriver::pair();
        let mut driver: Box<dyn TransportDriver> =
            Box::new(driver.with_read_timeout(Duration::from_millis(5)));
        let cancel = driver.cancel_token();

        handle.send(b"x".to_vec());
        let mut chunks = driver.chunks();
        assert_eq!(chunks.next().unwrap().unwrap(), b"x");
        cancel.store(true, Ordering::Release);
        assert!(chunks.next().is_none());
    }
}
