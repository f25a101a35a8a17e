//! UDP delivery endpoint

use super::{Client, Scheme};
use async_trait::async_trait;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::Mutex;
use tracing::debug;

/// Connected datagram socket, bound on first write
#[derive(Debug)]
pub struct UdpClient {
    scheme: Scheme,
    address: String,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    frame_lock: Mutex<()>,
}

impl UdpClient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            scheme: Scheme::Udp,
            address: address.into(),
            socket: Mutex::new(None),
            frame_lock: Mutex::new(()),
        }
    }

    async fn socket(&self) -> io::Result<Arc<UdpSocket>> {
        let mut guard = self.socket.lock().await;
        if let Some(socket) = guard.as_ref() {
            return Ok(Arc::clone(socket));
        }

        let target = lookup_host(self.address.as_str())
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("{} resolved to no addresses", self.address),
                )
            })?;
        let local: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(target).await?;
        debug!(address = %self.address, %target, "UDP client connected");

        let socket = Arc::new(socket);
        *guard = Some(Arc::clone(&socket));
        Ok(socket)
    }
}

#[async_trait]
impl Client for UdpClient {
    fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn write(&self, data: &[u8]) -> io::Result<usize> {
        let socket = self.socket().await?;
        socket.send(data).await
    }

    async fn close(&self) -> io::Result<()> {
        self.socket.lock().await.take();
        Ok(())
    }

    fn frame_lock(&self) -> &Mutex<()> {
        &self.frame_lock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_is_one_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpClient::new(receiver.local_addr().unwrap().to_string());

        assert_eq!(client.write(b"signed-bytes").await.unwrap(), 12);

        let mut buf = [0u8; 64];
        let n = receiver.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"signed-bytes");
    }

    #[tokio::test]
    async fn test_close_then_write_rebinds() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpClient::new(receiver.local_addr().unwrap().to_string());

        client.write(b"one").await.unwrap();
        client.close().await.unwrap();
        client.write(b"two").await.unwrap();

        let mut buf = [0u8; 16];
        let n = receiver.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"one");
        let n = receiver.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"two");
    }
}
