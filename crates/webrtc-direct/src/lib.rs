//! WebRTC-direct transport
//!
//! Dials and listens on `/ip4|ip6/<addr>/tcp/<port>/http/p2p-webrtc-direct`
//! addresses. Signaling needs no third party: the dialer sends its complete
//! offer to the listener's HTTP endpoint and reads the answer from the
//! response. After that the peers talk over a single WebRTC data channel.
//!
//! # Overview
//!
//! - **Dial**: one initiator channel, one `GET /?signal=<offer>` request
//! - **Listen**: an axum server that answers offers with responder channels
//! - **Filter**: pick the dialable addresses out of a peer's address list
//!
//! The WebRTC stack sits behind [`ChannelFactory`], so tests run the whole
//! transport against [`MockChannelFactory`] over loopback HTTP.
//!
//! # Example
//!
//! ```rust,no_run
//! use webrtc_direct::WebRTCDirect;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = WebRTCDirect::new();
//!     let addr = "/ip4/127.0.0.1/tcp/12345/http/p2p-webrtc-direct".parse()?;
//!
//!     let conn = transport.dial(&addr, transport.dial_options()).await?;
//!     conn.send("hello").await?;
//!     if let Some(reply) = conn.recv().await {
//!         println!("{}", String::from_utf8_lossy(&reply));
//!     }
//!     conn.close().await;
//!
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod channel;
pub mod config;
pub mod connection;
pub mod dial;
pub mod error;
pub mod listener;
pub mod mock;
pub mod rtc;
pub mod signal;

pub use address::{filter, is_webrtc_direct, SignalingTarget};
pub use channel::{
    Channel, ChannelEvent, ChannelEvents, ChannelFactory, ChannelOptions, Role,
};
pub use config::{ChannelConfig, DialOptions, ListenerOptions, WebRTCDirectConfig};
pub use connection::Connection;
pub use error::{ChannelError, TransportError};
pub use listener::{ConnectionHandler, Listener, ListenerEvent, ListenerState, ListenerStatus};
pub use mock::{MockBehavior, MockChannelFactory};
pub use multiaddr::Multiaddr;
pub use rtc::RtcChannelFactory;
pub use signal::{SignalKind, SignalMessage};

use std::sync::Arc;

/// Name the transport is registered under
pub const TRANSPORT_TAG: &str = "webrtc-direct";

/// WebRTC-direct transport
#[derive(Clone)]
pub struct WebRTCDirect {
    factory: Arc<dyn ChannelFactory>,
    http: reqwest::Client,
    config: WebRTCDirectConfig,
}

impl WebRTCDirect {
    /// Transport on top of the real WebRTC stack
    pub fn new() -> Self {
        Self::with_factory(Arc::new(RtcChannelFactory::new()))
    }

    /// Transport on top of any channel factory
    pub fn with_factory(factory: Arc<dyn ChannelFactory>) -> Self {
        Self {
            factory,
            http: signaling_client(),
            config: WebRTCDirectConfig::default(),
        }
    }

    pub fn with_config(mut self, config: WebRTCDirectConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a preconfigured HTTP client for signaling requests
    ///
    /// Signaling goes straight to the peer, so the default client ignores
    /// system proxy settings. A client passed here is used as is.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn config(&self) -> &WebRTCDirectConfig {
        &self.config
    }

    pub fn dial_options(&self) -> DialOptions {
        self.config.dial_options()
    }

    pub fn listener_options(&self) -> ListenerOptions {
        self.config.listener_options()
    }

    pub async fn dial(
        &self,
        addr: &Multiaddr,
        options: DialOptions,
    ) -> Result<Connection, TransportError> {
        dial::dial(&*self.factory, &self.http, addr, options).await
    }

    pub fn create_listener(
        &self,
        options: ListenerOptions,
        handler: Option<ConnectionHandler>,
    ) -> Result<Listener, TransportError> {
        Listener::create(self.factory.clone(), options, handler)
    }

    /// Keep the addresses this transport can dial
    pub fn filter<I>(&self, addrs: I) -> Vec<Multiaddr>
    where
        I: IntoIterator,
        I::Item: std::borrow::Borrow<Multiaddr>,
    {
        address::filter(addrs)
    }
}

/// HTTP client for signaling requests, bypassing any system proxy
pub(crate) fn signaling_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to build signaling client, using defaults: {}", e);
            reqwest::Client::new()
        })
}

impl Default for WebRTCDirect {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WebRTCDirect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRTCDirect")
            .field("tag", &TRANSPORT_TAG)
            .field("config", &self.config)
            .finish()
    }
}
