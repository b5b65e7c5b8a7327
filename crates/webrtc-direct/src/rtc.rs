//! Real WebRTC channel factory
//!
//! Wraps the webrtc crate to implement ChannelFactory for production use.
//! Candidates are never trickled: each side waits for ICE gathering to
//! finish and sends one complete description.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::channel::{Channel, ChannelEvent, ChannelEvents, ChannelFactory, ChannelOptions, Role};
use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::signal::{SignalKind, SignalMessage};

const EVENT_BUFFER: usize = 16;
const INCOMING_BUFFER: usize = 100;

fn connection_failed(e: webrtc::Error) -> ChannelError {
    ChannelError::ConnectionFailed(e.to_string())
}

fn signaling_failed(e: webrtc::Error) -> ChannelError {
    ChannelError::Signaling(e.to_string())
}

fn to_signal(description: RTCSessionDescription) -> Result<SignalMessage, ChannelError> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SignalKind::Offer,
        RTCSdpType::Answer => SignalKind::Answer,
        RTCSdpType::Pranswer => SignalKind::Pranswer,
        RTCSdpType::Rollback => SignalKind::Rollback,
        RTCSdpType::Unspecified => {
            return Err(ChannelError::Signaling(
                "local description has no type".to_string(),
            ))
        }
    };
    Ok(SignalMessage {
        kind,
        sdp: description.sdp,
    })
}

fn to_rtc(signal: SignalMessage) -> Result<RTCSessionDescription, ChannelError> {
    match signal.kind {
        SignalKind::Offer => RTCSessionDescription::offer(signal.sdp),
        SignalKind::Answer => RTCSessionDescription::answer(signal.sdp),
        SignalKind::Pranswer => RTCSessionDescription::pranswer(signal.sdp),
        SignalKind::Rollback => {
            return Err(ChannelError::Signaling(
                "rollback is not supported".to_string(),
            ))
        }
    }
    .map_err(signaling_failed)
}

/// State shared with the webrtc callbacks
struct Shared {
    events: mpsc::Sender<ChannelEvent>,
    incoming: mpsc::Sender<Bytes>,
    data_channel: Mutex<Option<Arc<RTCDataChannel>>>,
    connected: AtomicBool,
    closed: CancellationToken,
}

impl Shared {
    async fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(event).await;
    }

    async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        self.emit(ChannelEvent::Close).await;
    }
}

/// Wire the data channel callbacks to the shared state
async fn attach_data_channel(shared: Arc<Shared>, dc: Arc<RTCDataChannel>) {
    let mut slot = shared.data_channel.lock().await;
    if slot.is_some() {
        warn!("Ignoring extra data channel '{}'", dc.label());
        return;
    }

    let on_open = shared.clone();
    let label = dc.label().to_string();
    dc.on_open(Box::new(move || {
        let shared = on_open.clone();
        let label = label.clone();
        Box::pin(async move {
            info!("Data channel '{}' open", label);
            shared.connected.store(true, Ordering::SeqCst);
            shared.emit(ChannelEvent::Connect).await;
        })
    }));

    let on_message = shared.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let shared = on_message.clone();
        Box::pin(async move {
            let _ = shared.incoming.send(msg.data).await;
        })
    }));

    let on_close = shared.clone();
    dc.on_close(Box::new(move || {
        let shared = on_close.clone();
        Box::pin(async move {
            debug!("Data channel closed");
            shared.close().await;
        })
    }));

    let on_error = shared.clone();
    dc.on_error(Box::new(move |err: webrtc::Error| {
        let shared = on_error.clone();
        Box::pin(async move {
            shared
                .emit(ChannelEvent::Error(ChannelError::DataChannel(err.to_string())))
                .await;
        })
    }));

    *slot = Some(dc);
}

/// WebRTC peer connection with one data channel
pub struct RtcChannel {
    role: Role,
    pc: Arc<RTCPeerConnection>,
    shared: Arc<Shared>,
    incoming: Mutex<mpsc::Receiver<Bytes>>,
    gather_timeout: Duration,
    destroyed: AtomicBool,
}

impl RtcChannel {
    /// Create a local description and wait for ICE gathering so that all
    /// candidates are embedded in the SDP
    async fn local_description(&self, kind: SignalKind) -> Result<SignalMessage, ChannelError> {
        let description = match kind {
            SignalKind::Offer => self.pc.create_offer(None).await,
            _ => self.pc.create_answer(None).await,
        }
        .map_err(signaling_failed)?;

        let mut gathering_complete = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(description)
            .await
            .map_err(signaling_failed)?;

        if tokio::time::timeout(self.gather_timeout, gathering_complete.recv())
            .await
            .is_err()
        {
            warn!(
                "ICE gathering incomplete after {:?}, sending partial description",
                self.gather_timeout
            );
        }

        let local = self.pc.local_description().await.ok_or_else(|| {
            ChannelError::Signaling("no local description after gathering".to_string())
        })?;
        debug!("{} description ready, SDP len: {}", self.role, local.sdp.len());
        to_signal(local)
    }
}

#[async_trait]
impl Channel for RtcChannel {
    fn role(&self) -> Role {
        self.role
    }

    async fn signal(&self, remote: SignalMessage) -> Result<(), ChannelError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ChannelError::Destroyed);
        }

        let kind = remote.kind;
        self.pc
            .set_remote_description(to_rtc(remote)?)
            .await
            .map_err(signaling_failed)?;

        if self.role == Role::Responder && kind == SignalKind::Offer {
            let answer = self.local_description(SignalKind::Answer).await?;
            self.shared.emit(ChannelEvent::Signal(answer)).await;
        }
        Ok(())
    }

    async fn send(&self, data: Bytes) -> Result<(), ChannelError> {
        let dc = self
            .shared
            .data_channel
            .lock()
            .await
            .clone()
            .ok_or_else(|| ChannelError::DataChannel("no data channel".to_string()))?;
        dc.send(&data)
            .await
            .map(|_| ())
            .map_err(|e| ChannelError::DataChannel(e.to_string()))
    }

    async fn recv(&self) -> Option<Bytes> {
        let mut incoming = self.incoming.lock().await;
        tokio::select! {
            biased;
            data = incoming.recv() => data,
            _ = self.shared.closed.cancelled() => None,
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst) && !self.destroyed.load(Ordering::SeqCst)
    }

    async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.close().await;

        let dc = self.shared.data_channel.lock().await.take();
        if let Some(dc) = dc {
            if let Err(e) = dc.close().await {
                debug!("Error closing data channel: {}", e);
            }
        }
        if let Err(e) = self.pc.close().await {
            debug!("Error closing peer connection: {}", e);
        }
    }
}

/// Real WebRTC channel factory
///
/// Creates actual WebRTC connections using the webrtc crate.
pub struct RtcChannelFactory;

impl RtcChannelFactory {
    pub fn new() -> Self {
        Self
    }

    async fn new_peer_connection(
        config: &ChannelConfig,
    ) -> Result<Arc<RTCPeerConnection>, ChannelError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(connection_failed)?;

        let mut registry = Registry::new();
        registry =
            register_default_interceptors(registry, &mut media_engine).map_err(connection_failed)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if config.stun_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: config.stun_servers.clone(),
                ..Default::default()
            }]
        };
        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        api.new_peer_connection(rtc_config)
            .await
            .map(Arc::new)
            .map_err(connection_failed)
    }
}

impl Default for RtcChannelFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelFactory for RtcChannelFactory {
    async fn create(
        &self,
        options: ChannelOptions,
    ) -> Result<(Arc<dyn Channel>, ChannelEvents), ChannelError> {
        if options.trickle {
            warn!("Trickle ICE not supported, gathering full descriptions");
        }

        let pc = Self::new_peer_connection(&options.config).await?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_BUFFER);
        let shared = Arc::new(Shared {
            events: events_tx,
            incoming: incoming_tx,
            data_channel: Mutex::new(None),
            connected: AtomicBool::new(false),
            closed: CancellationToken::new(),
        });

        let on_state = shared.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let shared = on_state.clone();
            Box::pin(async move {
                debug!("Peer connection state: {:?}", state);
                match state {
                    RTCPeerConnectionState::Failed => {
                        shared
                            .emit(ChannelEvent::Error(ChannelError::IceConnectionFailed))
                            .await
                    }
                    RTCPeerConnectionState::Closed => shared.close().await,
                    _ => {}
                }
            })
        }));

        let channel = Arc::new(RtcChannel {
            role: options.role,
            pc: pc.clone(),
            shared: shared.clone(),
            incoming: Mutex::new(incoming_rx),
            gather_timeout: options.config.gather_timeout(),
            destroyed: AtomicBool::new(false),
        });

        match options.role {
            Role::Initiator => {
                let dc_init = RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                };
                let dc = pc
                    .create_data_channel(&options.config.data_channel_label, Some(dc_init))
                    .await
                    .map_err(connection_failed)?;
                attach_data_channel(shared, dc).await;

                let offerer = channel.clone();
                tokio::spawn(async move {
                    let event = match offerer.local_description(SignalKind::Offer).await {
                        Ok(offer) => ChannelEvent::Signal(offer),
                        Err(e) => ChannelEvent::Error(e),
                    };
                    offerer.shared.emit(event).await;
                });
            }
            Role::Responder => {
                // Register before any remote description is applied
                let on_dc = shared;
                pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                    let shared = on_dc.clone();
                    Box::pin(async move {
                        info!("Received data channel '{}'", dc.label());
                        attach_data_channel(shared, dc).await;
                    })
                }));
            }
        }

        Ok((channel, events_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_is_rejected() {
        let signal = SignalMessage {
            kind: SignalKind::Rollback,
            sdp: String::new(),
        };
        assert!(matches!(to_rtc(signal), Err(ChannelError::Signaling(_))));
    }

    #[tokio::test]
    async fn test_initiator_emits_complete_offer() {
        let factory = RtcChannelFactory::new();
        let (channel, mut events) = factory
            .create(ChannelOptions::initiator(ChannelConfig::local_only()))
            .await
            .unwrap();
        assert_eq!(channel.role(), Role::Initiator);

        match events.recv().await {
            Some(ChannelEvent::Signal(offer)) => {
                assert_eq!(offer.kind, SignalKind::Offer);
                assert!(offer.sdp.contains("webrtc-datachannel"));
            }
            other => panic!("expected offer, got {:?}", other),
        }
        assert!(!channel.is_connected());
        channel.destroy().await;
    }
}
