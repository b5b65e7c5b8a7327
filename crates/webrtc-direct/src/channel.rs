//! Channel capability
//!
//! A channel is one WebRTC peer connection carrying a single data channel.
//! The dial and listen engines only see these traits, so any implementation
//! can be plugged in:
//! - [`crate::rtc::RtcChannelFactory`] on top of the `webrtc` crate (production)
//! - [`crate::mock::MockChannelFactory`] in-memory (tests)

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::signal::SignalMessage;

/// Side of the offer/answer exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Creates the offer (dial side)
    Initiator,
    /// Answers an offer (listen side)
    Responder,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Responder => write!(f, "responder"),
        }
    }
}

/// Options a channel is constructed with
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub role: Role,
    /// Stream ICE candidates as separate signals. The engines always pass
    /// `false`: one complete description per side.
    pub trickle: bool,
    pub config: ChannelConfig,
}

impl ChannelOptions {
    pub fn initiator(config: ChannelConfig) -> Self {
        Self {
            role: Role::Initiator,
            trickle: false,
            config,
        }
    }

    pub fn responder(config: ChannelConfig) -> Self {
        Self {
            role: Role::Responder,
            trickle: false,
            config,
        }
    }
}

/// Lifecycle events emitted by a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Local description ready to be sent to the remote side
    Signal(SignalMessage),
    /// Data channel is open
    Connect,
    /// Channel gave up waiting to connect
    Timeout,
    Error(ChannelError),
    Close,
}

/// Event stream handed out together with each channel
pub type ChannelEvents = mpsc::Receiver<ChannelEvent>;

/// One WebRTC peer connection
#[async_trait]
pub trait Channel: Send + Sync {
    fn role(&self) -> Role;

    /// Feed a remote description into the channel. May be called before the
    /// channel produced its own local description.
    async fn signal(&self, remote: SignalMessage) -> Result<(), ChannelError>;

    /// Send one message over the data channel
    async fn send(&self, data: Bytes) -> Result<(), ChannelError>;

    /// Next message from the data channel, `None` once closed
    async fn recv(&self) -> Option<Bytes>;

    /// Data channel open and not destroyed
    fn is_connected(&self) -> bool;

    /// Tear down the peer connection. Idempotent.
    async fn destroy(&self);
}

/// Creates channels
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    /// Create a channel and its event stream. An initiator emits its offer
    /// as a `Signal` event without further prompting.
    async fn create(
        &self,
        options: ChannelOptions,
    ) -> Result<(Arc<dyn Channel>, ChannelEvents), ChannelError>;

    /// Whether responder channels can be served from this environment
    fn can_listen(&self) -> bool {
        true
    }
}

#[async_trait]
impl<T: ChannelFactory + ?Sized> ChannelFactory for Arc<T> {
    async fn create(
        &self,
        options: ChannelOptions,
    ) -> Result<(Arc<dyn Channel>, ChannelEvents), ChannelError> {
        (**self).create(options).await
    }

    fn can_listen(&self) -> bool {
        (**self).can_listen()
    }
}
