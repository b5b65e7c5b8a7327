//! Connection handed to the host stack once a channel is connected

use bytes::Bytes;
use multiaddr::Multiaddr;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::debug;

use crate::channel::{Channel, ChannelEvent, ChannelEvents, Role};
use crate::error::TransportError;

/// Buffer size of the in-process pipe behind [`Connection::into_io`]
const IO_BUFFER_SIZE: usize = 64 * 1024;

/// Largest message written to the data channel by [`Connection::into_io`]
const IO_CHUNK_SIZE: usize = 16 * 1024;

struct Inner {
    channel: Arc<dyn Channel>,
    remote_addr: Option<Multiaddr>,
}

/// A connected channel
///
/// Clones share the same channel.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    pub(crate) fn new(channel: Arc<dyn Channel>, remote_addr: Option<Multiaddr>) -> Self {
        Self {
            inner: Arc::new(Inner {
                channel,
                remote_addr,
            }),
        }
    }

    /// Initiator or responder side of the handshake
    pub fn role(&self) -> Role {
        self.inner.channel.role()
    }

    /// Dialed address on the outbound side, observed HTTP source address on
    /// the inbound side
    pub fn remote_addr(&self) -> Option<&Multiaddr> {
        self.inner.remote_addr.as_ref()
    }

    pub fn observed_addrs(&self) -> Vec<Multiaddr> {
        self.inner.remote_addr.iter().cloned().collect()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.channel.is_connected()
    }

    pub async fn send(&self, data: impl Into<Bytes>) -> Result<(), TransportError> {
        self.inner.channel.send(data.into()).await?;
        Ok(())
    }

    /// Next message, `None` once the connection is closed
    pub async fn recv(&self) -> Option<Bytes> {
        self.inner.channel.recv().await
    }

    pub async fn close(&self) {
        self.inner.channel.destroy().await;
    }

    /// Expose the connection as a byte stream
    ///
    /// Data channels cannot be half-closed, so shutting down or dropping the
    /// returned stream closes the whole connection.
    pub fn into_io(self) -> DuplexStream {
        let (local, remote) = tokio::io::duplex(IO_BUFFER_SIZE);
        let (mut reader, mut writer) = tokio::io::split(remote);

        let outbound = self.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; IO_CHUNK_SIZE];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Err(e) = outbound.send(Bytes::copy_from_slice(&buf[..n])).await {
                            debug!("Outbound pump stopped: {}", e);
                            break;
                        }
                    }
                }
            }
            outbound.close().await;
        });

        let inbound = self;
        tokio::spawn(async move {
            while let Some(data) = inbound.recv().await {
                if writer.write_all(&data).await.is_err() {
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        local
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role())
            .field("remote_addr", &self.inner.remote_addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Destroy the channel once it reports close or error after connecting
pub(crate) fn spawn_close_watcher(channel: Arc<dyn Channel>, mut events: ChannelEvents) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ChannelEvent::Close => break,
                ChannelEvent::Error(e) => {
                    debug!("Connection error: {}", e);
                    break;
                }
                _ => {}
            }
        }
        channel.destroy().await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelFactory, ChannelOptions};
    use crate::config::ChannelConfig;
    use crate::mock::MockChannelFactory;

    async fn connected_pair() -> (Connection, Connection) {
        let factory = MockChannelFactory::new();
        let (initiator, mut init_events) = factory
            .create(ChannelOptions::initiator(ChannelConfig::default()))
            .await
            .unwrap();
        let Some(ChannelEvent::Signal(offer)) = init_events.recv().await else {
            panic!("no offer");
        };
        let (responder, mut resp_events) = factory
            .create(ChannelOptions::responder(ChannelConfig::default()))
            .await
            .unwrap();
        responder.signal(offer).await.unwrap();
        let Some(ChannelEvent::Signal(answer)) = resp_events.recv().await else {
            panic!("no answer");
        };
        initiator.signal(answer).await.unwrap();

        let remote: Multiaddr = "/ip4/127.0.0.1/tcp/1/http/p2p-webrtc-direct".parse().unwrap();
        (
            Connection::new(initiator, Some(remote)),
            Connection::new(responder, None),
        )
    }

    #[tokio::test]
    async fn test_connection_addrs() {
        let (dialer, listener) = connected_pair().await;
        assert_eq!(dialer.role(), Role::Initiator);
        assert_eq!(dialer.observed_addrs().len(), 1);
        assert_eq!(
            dialer.remote_addr().unwrap().to_string(),
            "/ip4/127.0.0.1/tcp/1/http/p2p-webrtc-direct"
        );
        assert!(listener.remote_addr().is_none());
        assert!(listener.observed_addrs().is_empty());
    }

    #[tokio::test]
    async fn test_into_io_roundtrip() {
        let (dialer, listener) = connected_pair().await;
        let mut io = dialer.into_io();

        io.write_all(b"ping over io").await.unwrap();
        assert_eq!(listener.recv().await.unwrap(), Bytes::from_static(b"ping over io"));

        listener.send(Bytes::from_static(b"pong")).await.unwrap();
        let mut buf = [0u8; 4];
        io.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(io);
        assert!(listener.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_is_shared_between_clones() {
        let (dialer, _listener) = connected_pair().await;
        let clone = dialer.clone();
        assert!(clone.is_connected());
        dialer.close().await;
        assert!(!clone.is_connected());
        assert!(clone.send(Bytes::from_static(b"x")).await.is_err());
    }
}
