//! Mock channel factory for testing
//!
//! Channels are connected through in-memory mpsc pipes instead of WebRTC.
//! The offer SDP is just a channel id; a responder looks the id up in the
//! registry shared by every clone of the factory, so a dialer and a listener
//! built from the same factory can find each other.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::channel::{Channel, ChannelEvent, ChannelEvents, ChannelFactory, ChannelOptions, Role};
use crate::error::ChannelError;
use crate::signal::{SignalKind, SignalMessage};

const PIPE_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 16;

/// How a channel behaves during the handshake
///
/// Initiators apply it once they get an answer. Responders apply it right
/// after answering, except `Stall`, which makes a responder never answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Connect immediately
    Connect,
    /// Never connect, never fail
    Stall,
    /// Emit a connection error. A failing responder also fails the
    /// initiator it answered.
    Fail,
    /// Emit the channel's own timeout event
    Timeout,
}

/// Remote half waiting for a responder to pick it up
struct PendingEnd {
    tx: mpsc::Sender<Bytes>,
    rx: mpsc::Receiver<Bytes>,
}

#[derive(Default)]
struct Registry {
    pending: Mutex<HashMap<String, PendingEnd>>,
    /// Offers whose responder failed
    failed: Mutex<HashSet<String>>,
    next_id: AtomicU64,
    initiators: AtomicUsize,
    responders: AtomicUsize,
    destroyed: AtomicUsize,
}

/// Mock channel factory
///
/// Clones share the registry and counters.
#[derive(Clone)]
pub struct MockChannelFactory {
    registry: Arc<Registry>,
    behavior: MockBehavior,
    responder_behavior: MockBehavior,
    can_listen: bool,
}

impl MockChannelFactory {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry::default()),
            behavior: MockBehavior::Connect,
            responder_behavior: MockBehavior::Connect,
            can_listen: true,
        }
    }

    /// Same registry, different initiator behavior
    pub fn with_behavior(&self, behavior: MockBehavior) -> Self {
        Self {
            behavior,
            ..self.clone()
        }
    }

    /// Same registry, different responder behavior
    pub fn with_responder_behavior(&self, behavior: MockBehavior) -> Self {
        Self {
            responder_behavior: behavior,
            ..self.clone()
        }
    }

    /// Factory that reports it cannot serve inbound channels, like a browser
    pub fn dial_only(&self) -> Self {
        Self {
            can_listen: false,
            ..self.clone()
        }
    }

    /// Number of channels created with the given role
    pub fn created(&self, role: Role) -> usize {
        match role {
            Role::Initiator => self.registry.initiators.load(Ordering::SeqCst),
            Role::Responder => self.registry.responders.load(Ordering::SeqCst),
        }
    }

    /// Number of channels destroyed
    pub fn destroyed(&self) -> usize {
        self.registry.destroyed.load(Ordering::SeqCst)
    }
}

impl Default for MockChannelFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelFactory for MockChannelFactory {
    async fn create(
        &self,
        options: ChannelOptions,
    ) -> Result<(Arc<dyn Channel>, ChannelEvents), ChannelError> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let channel = MockChannel {
            role: options.role,
            id: Mutex::new(None),
            behavior: match options.role {
                Role::Initiator => self.behavior,
                Role::Responder => self.responder_behavior,
            },
            registry: self.registry.clone(),
            events: events_tx,
            tx: Mutex::new(None),
            rx: tokio::sync::Mutex::new(None),
            connected: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            closed: CancellationToken::new(),
        };

        match options.role {
            Role::Initiator => {
                self.registry.initiators.fetch_add(1, Ordering::SeqCst);
                let n = self.registry.next_id.fetch_add(1, Ordering::SeqCst);
                let id = format!("mock-{}", n);

                // A sends to B's receiver and vice versa
                let (tx_a, rx_a) = mpsc::channel(PIPE_BUFFER);
                let (tx_b, rx_b) = mpsc::channel(PIPE_BUFFER);
                channel.attach(&id, tx_b, rx_a);
                self.registry
                    .pending
                    .lock()
                    .map_err(|_| ChannelError::ConnectionFailed("registry poisoned".into()))?
                    .insert(id.clone(), PendingEnd { tx: tx_a, rx: rx_b });

                channel.emit(ChannelEvent::Signal(SignalMessage::offer(id))).await;
            }
            Role::Responder => {
                self.registry.responders.fetch_add(1, Ordering::SeqCst);
            }
        }

        Ok((Arc::new(channel), events_rx))
    }

    fn can_listen(&self) -> bool {
        self.can_listen
    }
}

/// In-memory channel
pub struct MockChannel {
    role: Role,
    id: Mutex<Option<String>>,
    behavior: MockBehavior,
    registry: Arc<Registry>,
    events: mpsc::Sender<ChannelEvent>,
    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    rx: tokio::sync::Mutex<Option<mpsc::Receiver<Bytes>>>,
    connected: AtomicBool,
    destroyed: AtomicBool,
    closed: CancellationToken,
}

impl MockChannel {
    fn attach(&self, id: &str, tx: mpsc::Sender<Bytes>, rx: mpsc::Receiver<Bytes>) {
        if let Ok(mut slot) = self.id.lock() {
            *slot = Some(id.to_string());
        }
        if let Ok(mut slot) = self.tx.lock() {
            *slot = Some(tx);
        }
        if let Ok(mut slot) = self.rx.try_lock() {
            *slot = Some(rx);
        }
    }

    async fn emit(&self, event: ChannelEvent) {
        // receiver may already be gone
        let _ = self.events.send(event).await;
    }

    async fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.emit(ChannelEvent::Connect).await;
    }

    /// Apply the configured behavior once the descriptions are exchanged
    async fn settle(&self) {
        match self.behavior {
            MockBehavior::Connect => self.connect().await,
            MockBehavior::Stall => {}
            MockBehavior::Fail => {
                self.emit(ChannelEvent::Error(ChannelError::ConnectionFailed(
                    "mock failure".to_string(),
                )))
                .await
            }
            MockBehavior::Timeout => self.emit(ChannelEvent::Timeout).await,
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<Bytes>> {
        self.tx.lock().ok().and_then(|tx| tx.clone())
    }
}

#[async_trait]
impl Channel for MockChannel {
    fn role(&self) -> Role {
        self.role
    }

    async fn signal(&self, remote: SignalMessage) -> Result<(), ChannelError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ChannelError::Destroyed);
        }

        match (self.role, remote.kind) {
            (Role::Responder, SignalKind::Offer) => {
                let pending = self
                    .registry
                    .pending
                    .lock()
                    .map_err(|_| ChannelError::ConnectionFailed("registry poisoned".into()))?
                    .remove(&remote.sdp);
                match pending {
                    Some(end) => {
                        self.attach(&remote.sdp, end.tx, end.rx);
                        if self.behavior == MockBehavior::Stall {
                            return Ok(());
                        }
                        if self.behavior == MockBehavior::Fail {
                            if let Ok(mut failed) = self.registry.failed.lock() {
                                failed.insert(remote.sdp.clone());
                            }
                        }
                        self.emit(ChannelEvent::Signal(SignalMessage::answer(remote.sdp)))
                            .await;
                        self.settle().await;
                    }
                    None => {
                        self.emit(ChannelEvent::Error(ChannelError::Signaling(format!(
                            "unknown offer {}",
                            remote.sdp
                        ))))
                        .await;
                    }
                }
                Ok(())
            }
            (Role::Initiator, SignalKind::Answer) => {
                let expected = self.id.lock().ok().and_then(|id| id.clone());
                if expected.as_deref() != Some(remote.sdp.as_str()) {
                    return Err(ChannelError::Signaling(format!(
                        "answer {} does not match offer",
                        remote.sdp
                    )));
                }
                let remote_failed = self
                    .registry
                    .failed
                    .lock()
                    .map(|mut failed| failed.remove(&remote.sdp))
                    .unwrap_or(false);
                if remote_failed {
                    self.emit(ChannelEvent::Error(ChannelError::ConnectionFailed(
                        "remote peer failed".to_string(),
                    )))
                    .await;
                } else {
                    self.settle().await;
                }
                Ok(())
            }
            (role, kind) => Err(ChannelError::Signaling(format!(
                "{} cannot take {:?}",
                role, kind
            ))),
        }
    }

    async fn send(&self, data: Bytes) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::Destroyed);
        }
        let tx = self.sender().ok_or(ChannelError::Destroyed)?;
        tx.send(data).await.map_err(|_| ChannelError::Destroyed)
    }

    async fn recv(&self) -> Option<Bytes> {
        let mut rx = self.rx.lock().await;
        let rx = rx.as_mut()?;
        tokio::select! {
            biased;
            data = rx.recv() => data,
            _ = self.closed.cancelled() => None,
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.destroyed.load(Ordering::SeqCst)
    }

    async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.registry.destroyed.fetch_add(1, Ordering::SeqCst);
        self.closed.cancel();
        // dropping our sender ends the peer's recv
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        if let Some(id) = self.id.lock().ok().and_then(|id| id.clone()) {
            if let Ok(mut pending) = self.registry.pending.lock() {
                pending.remove(&id);
            }
        }
        self.emit(ChannelEvent::Close).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;

    async fn handshake(
        factory: &MockChannelFactory,
    ) -> (Arc<dyn Channel>, ChannelEvents, Arc<dyn Channel>, ChannelEvents) {
        let (initiator, mut init_events) = factory
            .create(ChannelOptions::initiator(ChannelConfig::default()))
            .await
            .unwrap();
        let offer = match init_events.recv().await {
            Some(ChannelEvent::Signal(offer)) => offer,
            other => panic!("expected offer, got {:?}", other),
        };

        let (responder, mut resp_events) = factory
            .create(ChannelOptions::responder(ChannelConfig::default()))
            .await
            .unwrap();
        responder.signal(offer).await.unwrap();
        let answer = match resp_events.recv().await {
            Some(ChannelEvent::Signal(answer)) => answer,
            other => panic!("expected answer, got {:?}", other),
        };
        assert_eq!(resp_events.recv().await, Some(ChannelEvent::Connect));

        initiator.signal(answer).await.unwrap();
        (initiator, init_events, responder, resp_events)
    }

    #[tokio::test]
    async fn test_mock_handshake_and_roundtrip() {
        let factory = MockChannelFactory::new();
        let (initiator, mut init_events, responder, _resp_events) = handshake(&factory).await;
        assert_eq!(init_events.recv().await, Some(ChannelEvent::Connect));
        assert!(initiator.is_connected());
        assert!(responder.is_connected());

        initiator.send(Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(responder.recv().await.unwrap(), Bytes::from_static(b"hello"));

        responder.send(Bytes::from_static(b"world")).await.unwrap();
        assert_eq!(initiator.recv().await.unwrap(), Bytes::from_static(b"world"));

        assert_eq!(factory.created(Role::Initiator), 1);
        assert_eq!(factory.created(Role::Responder), 1);
    }

    #[tokio::test]
    async fn test_mock_destroy_ends_both_sides() {
        let factory = MockChannelFactory::new();
        let (initiator, mut init_events, responder, _resp_events) = handshake(&factory).await;
        assert_eq!(init_events.recv().await, Some(ChannelEvent::Connect));

        initiator.destroy().await;
        initiator.destroy().await;
        assert_eq!(factory.destroyed(), 1);
        assert_eq!(init_events.recv().await, Some(ChannelEvent::Close));
        assert!(initiator.recv().await.is_none());
        assert!(responder.recv().await.is_none());
        assert!(initiator.send(Bytes::from_static(b"x")).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_behaviors() {
        let factory = MockChannelFactory::new();

        let failing = factory.with_behavior(MockBehavior::Fail);
        let (_i, mut events, _r, _re) = handshake(&failing).await;
        assert!(matches!(events.recv().await, Some(ChannelEvent::Error(_))));

        let timing_out = factory.with_behavior(MockBehavior::Timeout);
        let (_i, mut events, _r, _re) = handshake(&timing_out).await;
        assert_eq!(events.recv().await, Some(ChannelEvent::Timeout));

        let stalled = factory.with_behavior(MockBehavior::Stall);
        let (initiator, mut events, _r, _re) = handshake(&stalled).await;
        assert!(events.try_recv().is_err());
        assert!(!initiator.is_connected());
    }

    #[tokio::test]
    async fn test_mock_responder_behaviors() {
        let factory = MockChannelFactory::new().with_responder_behavior(MockBehavior::Fail);
        let (initiator, mut init_events) = factory
            .create(ChannelOptions::initiator(ChannelConfig::default()))
            .await
            .unwrap();
        let offer = match init_events.recv().await {
            Some(ChannelEvent::Signal(offer)) => offer,
            other => panic!("expected offer, got {:?}", other),
        };
        let (responder, mut resp_events) = factory
            .create(ChannelOptions::responder(ChannelConfig::default()))
            .await
            .unwrap();
        responder.signal(offer).await.unwrap();
        let answer = match resp_events.recv().await {
            Some(ChannelEvent::Signal(answer)) => answer,
            other => panic!("expected answer, got {:?}", other),
        };
        assert!(matches!(
            resp_events.recv().await,
            Some(ChannelEvent::Error(ChannelError::ConnectionFailed(_)))
        ));

        // the initiator hears about the failure once it takes the answer
        initiator.signal(answer).await.unwrap();
        assert!(matches!(
            init_events.recv().await,
            Some(ChannelEvent::Error(ChannelError::ConnectionFailed(_)))
        ));
        assert!(!initiator.is_connected());

        let stalled = factory.with_responder_behavior(MockBehavior::Stall);
        let (_initiator, mut init_events) = stalled
            .create(ChannelOptions::initiator(ChannelConfig::default()))
            .await
            .unwrap();
        let offer = match init_events.recv().await {
            Some(ChannelEvent::Signal(offer)) => offer,
            other => panic!("expected offer, got {:?}", other),
        };
        let (responder, mut resp_events) = stalled
            .create(ChannelOptions::responder(ChannelConfig::default()))
            .await
            .unwrap();
        responder.signal(offer).await.unwrap();
        assert!(resp_events.try_recv().is_err());
        responder.destroy().await;
        assert_eq!(resp_events.recv().await, Some(ChannelEvent::Close));
    }

    #[tokio::test]
    async fn test_mock_unknown_offer() {
        let factory = MockChannelFactory::new();
        let (responder, mut events) = factory
            .create(ChannelOptions::responder(ChannelConfig::default()))
            .await
            .unwrap();
        responder.signal(SignalMessage::offer("nope")).await.unwrap();
        assert!(matches!(
            events.recv().await,
            Some(ChannelEvent::Error(ChannelError::Signaling(_)))
        ));
    }

    #[test]
    fn test_dial_only_cannot_listen() {
        let factory = MockChannelFactory::new();
        assert!(factory.can_listen());
        assert!(!factory.dial_only().can_listen());
    }
}
