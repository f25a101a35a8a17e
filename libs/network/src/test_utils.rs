//! Test doubles for code that drives [`Client`]s

use crate::transports::{Client, Scheme};
use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// A client that records writes and can be told to fail a given write
#[derive(Debug)]
pub struct FakeClient {
    scheme: Scheme,
    address: String,
    writes: SyncMutex<Vec<Vec<u8>>>,
    fail_write_number: SyncMutex<Option<usize>>,
    write_attempts: AtomicUsize,
    close_calls: AtomicUsize,
    locked_close_calls: AtomicUsize,
    frame_lock: Mutex<()>,
}

impl FakeClient {
    pub fn new(scheme: Scheme, address: impl Into<String>) -> Self {
        Self {
            scheme,
            address: address.into(),
            writes: SyncMutex::new(Vec::new()),
            fail_write_number: SyncMutex::new(None),
            write_attempts: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            locked_close_calls: AtomicUsize::new(0),
            frame_lock: Mutex::new(()),
        }
    }

    pub fn udp(address: impl Into<String>) -> Self {
        Self::new(Scheme::Udp, address)
    }

    pub fn tls(address: impl Into<String>) -> Self {
        Self::new(Scheme::Tls, address)
    }

    /// Fail the `n`th write attempt (1-based) and every one after it
    pub fn fail_from_write(self, n: usize) -> Self {
        *self.fail_write_number.lock() = Some(n);
        self
    }

    /// Successfully written buffers, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Closes that happened while the frame lock was held
    pub fn locked_close_calls(&self) -> usize {
        self.locked_close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Client for FakeClient {
    fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn write(&self, data: &[u8]) -> io::Result<usize> {
        let attempt = self.write_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if matches!(*self.fail_write_number.lock(), Some(n) if attempt >= n) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "injected failure"));
        }
        self.writes.lock().push(data.to_vec());
        Ok(data.len())
    }

    async fn close(&self) -> io::Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.frame_lock.try_lock().is_err() {
            self.locked_close_calls.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn frame_lock(&self) -> &Mutex<()> {
        &self.frame_lock
    }
}

/// Absolute path of a PEM fixture shipped with this crate's tests
pub fn fixture_path(name: &str) -> String {
    format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
}
