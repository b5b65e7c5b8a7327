//! Listen side: HTTP signaling endpoint that answers offers
//!
//! Each `GET /?signal=<encoded offer>` gets its own responder channel, owned
//! by a spawned task rather than the request handler. The response body is
//! the encoded answer; the channel connects afterwards and is handed to the
//! connection handler. A channel whose answer never reaches the client is
//! destroyed.

use axum::{
    extract::{ConnectInfo, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use multiaddr::Multiaddr;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::address::{from_socket_addr, with_bound_port, SignalingTarget};
use crate::channel::{Channel, ChannelEvent, ChannelEvents, ChannelFactory, ChannelOptions};
use crate::config::{ChannelConfig, ListenerOptions};
use crate::connection::{spawn_close_watcher, Connection};
use crate::error::{ChannelError, TransportError};
use crate::signal::{self, SignalMessage};

const EVENT_CAPACITY: usize = 64;

/// Called once for every inbound connection
pub type ConnectionHandler = Arc<dyn Fn(Connection) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Created,
    Listening,
    Closed,
}

/// Snapshot published on every state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerStatus {
    pub state: ListenerState,
    /// Bound address while listening
    pub addr: Option<Multiaddr>,
}

#[derive(Debug, Clone)]
pub enum ListenerEvent {
    Listening(Multiaddr),
    Connection(Connection),
    /// A signaling request or inbound channel failed; the listener keeps
    /// serving
    Error(Arc<TransportError>),
    Close,
}

/// State shared with the request handlers
#[derive(Clone)]
struct ServerState {
    factory: Arc<dyn ChannelFactory>,
    channel: ChannelConfig,
    handler: ConnectionHandler,
    events: broadcast::Sender<ListenerEvent>,
    shutdown: CancellationToken,
}

impl ServerState {
    fn emit(&self, event: ListenerEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Log and publish a failed request, returning the response text
    fn report(&self, err: TransportError) -> String {
        warn!("Signaling request failed: {}", err);
        let message = err.to_string();
        self.emit(ListenerEvent::Error(Arc::new(err)));
        message
    }
}

pub struct Listener {
    server: ServerState,
    status: watch::Sender<ListenerStatus>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Listener {
    /// Create a listener in the `Created` state
    ///
    /// Fails with `CannotListen` when the factory cannot serve inbound
    /// channels.
    pub fn create(
        factory: Arc<dyn ChannelFactory>,
        options: ListenerOptions,
        handler: Option<ConnectionHandler>,
    ) -> Result<Self, TransportError> {
        if !factory.can_listen() {
            return Err(TransportError::CannotListen);
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (status, _) = watch::channel(ListenerStatus {
            state: ListenerState::Created,
            addr: None,
        });

        Ok(Self {
            server: ServerState {
                factory,
                channel: options.channel,
                handler: handler
                    .unwrap_or_else(|| Arc::new(|_: Connection| {}) as ConnectionHandler),
                events,
                shutdown: CancellationToken::new(),
            },
            status,
            task: Mutex::new(None),
        })
    }

    /// Bind the signaling endpoint of `addr` and start serving
    pub async fn listen(&self, addr: &Multiaddr) -> Result<(), TransportError> {
        let mut task = self.task.lock().await;
        match self.state() {
            ListenerState::Created => {}
            ListenerState::Listening => return Err(TransportError::AlreadyListening),
            ListenerState::Closed => return Err(TransportError::ListenerClosed),
        }

        let target = SignalingTarget::from_multiaddr(addr)?;
        let tcp = TcpListener::bind(target.socket_addr())
            .await
            .map_err(|source| TransportError::Bind {
                addr: target.to_string(),
                source,
            })?;
        let bound = with_bound_port(addr, tcp.local_addr()?.port());

        let app = Router::new()
            .route("/", get(handle_signal))
            .with_state(self.server.clone());

        let shutdown = self.server.shutdown.clone();
        let server = self.server.clone();
        *task = Some(tokio::spawn(async move {
            let result = axum::serve(
                tcp,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

            if let Err(e) = result {
                error!("Signaling server failed: {}", e);
                server.emit(ListenerEvent::Error(Arc::new(TransportError::Io(e))));
            }
        }));

        self.status.send_replace(ListenerStatus {
            state: ListenerState::Listening,
            addr: Some(bound.clone()),
        });
        info!("Listening on {}", bound);
        self.server.emit(ListenerEvent::Listening(bound));
        Ok(())
    }

    /// Stop serving and wait for the server to shut down
    ///
    /// Does nothing unless the listener is listening.
    pub async fn close(&self) -> Result<(), TransportError> {
        let mut task = self.task.lock().await;
        if self.state() != ListenerState::Listening {
            return Ok(());
        }

        self.server.shutdown.cancel();
        if let Some(handle) = task.take() {
            if let Err(e) = handle.await {
                warn!("Signaling server task ended abnormally: {}", e);
            }
        }

        self.status.send_replace(ListenerStatus {
            state: ListenerState::Closed,
            addr: None,
        });
        info!("Listener closed");
        self.server.emit(ListenerEvent::Close);
        Ok(())
    }

    /// Bound address, empty unless listening
    pub fn get_addrs(&self) -> Vec<Multiaddr> {
        self.status.borrow().addr.iter().cloned().collect()
    }

    pub fn state(&self) -> ListenerState {
        self.status.borrow().state
    }

    /// Follow state changes
    pub fn watch_state(&self) -> watch::Receiver<ListenerStatus> {
        self.status.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ListenerEvent> {
        self.server.events.subscribe()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.server.shutdown.cancel();
    }
}

#[derive(Debug, Deserialize)]
struct SignalQuery {
    signal: Option<String>,
}

async fn handle_signal(
    State(state): State<ServerState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    query: Option<Query<SignalQuery>>,
) -> Response {
    let Some(encoded) = query.and_then(|Query(q)| q.signal) else {
        return reject(
            &state,
            StatusCode::BAD_REQUEST,
            TransportError::MalformedSignal("missing signal parameter".into()),
        );
    };
    let offer = match signal::decode(&encoded) {
        Ok(offer) => offer,
        Err(e) => return reject(&state, StatusCode::BAD_REQUEST, e),
    };
    debug!("Signal from {}: {:?}", remote, offer.kind);

    let (reply_tx, reply_rx) = oneshot::channel();
    tokio::spawn(negotiate(state, offer, from_socket_addr(remote), reply_tx));

    match reply_rx.await {
        Ok(Ok(body)) => signal_response(StatusCode::OK, body),
        Ok(Err(message)) => signal_response(StatusCode::INTERNAL_SERVER_ERROR, message),
        Err(_) => signal_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "signaling task ended without an answer".to_string(),
        ),
    }
}

/// Answer text for the request handler, or the error message to return
type Reply = oneshot::Sender<Result<String, String>>;

/// Create a responder for `offer`, answer it and see it through to a connection
///
/// The channel is destroyed whenever the answer is not delivered: the channel
/// fails, the client goes away, or the listener closes first.
async fn negotiate(
    state: ServerState,
    offer: SignalMessage,
    observed: Multiaddr,
    mut reply: Reply,
) {
    let (channel, mut events) = match state
        .factory
        .create(ChannelOptions::responder(state.channel.clone()))
        .await
    {
        Ok(created) => created,
        Err(e) => {
            let _ = reply.send(Err(state.report(e.into())));
            return;
        }
    };

    let answered = tokio::select! {
        result = answer_offer(&*channel, offer, &mut events) => result,
        _ = reply.closed() => Err(client_gone()),
        _ = state.shutdown.cancelled() => Err(TransportError::ListenerClosed),
    };
    let (body, connected) = match answered {
        Ok(answered) => answered,
        Err(e) => {
            channel.destroy().await;
            let _ = reply.send(Err(state.report(e)));
            return;
        }
    };

    if reply.send(Ok(body)).is_err() {
        channel.destroy().await;
        state.report(client_gone());
        return;
    }

    await_connection(state, channel, events, observed, connected).await;
}

/// Pass the offer to the channel and wait for its answer, encoded
///
/// Also reports whether the channel connected before answering.
async fn answer_offer(
    channel: &dyn Channel,
    offer: SignalMessage,
    events: &mut ChannelEvents,
) -> Result<(String, bool), TransportError> {
    channel.signal(offer).await?;

    let mut connected = false;
    let answer = loop {
        match events.recv().await {
            Some(ChannelEvent::Signal(answer)) => break answer,
            Some(ChannelEvent::Connect) => connected = true,
            Some(ChannelEvent::Error(e)) => return Err(e.into()),
            Some(ChannelEvent::Timeout) => return Err(ChannelError::Timeout.into()),
            Some(ChannelEvent::Close) | None => return Err(ChannelError::Destroyed.into()),
        }
    };

    Ok((signal::encode(&answer)?, connected))
}

fn client_gone() -> TransportError {
    ChannelError::Signaling("client went away before the answer".into()).into()
}

/// Wait for the answered channel to connect and hand it over
async fn await_connection(
    state: ServerState,
    channel: Arc<dyn Channel>,
    mut events: ChannelEvents,
    observed: Multiaddr,
    mut connected: bool,
) {
    while !connected {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = state.shutdown.cancelled() => {
                debug!("Listener closed before {} connected", observed);
                channel.destroy().await;
                state.emit(ListenerEvent::Error(Arc::new(TransportError::ListenerClosed)));
                return;
            }
        };
        let failure = match event {
            Some(ChannelEvent::Connect) => {
                connected = true;
                continue;
            }
            Some(ChannelEvent::Signal(_)) => continue,
            Some(ChannelEvent::Error(e)) => e,
            Some(ChannelEvent::Timeout) => ChannelError::Timeout,
            Some(ChannelEvent::Close) | None => ChannelError::Destroyed,
        };
        warn!("Inbound channel from {} failed: {}", observed, failure);
        channel.destroy().await;
        state.emit(ListenerEvent::Error(Arc::new(failure.into())));
        return;
    }

    info!("Inbound connection from {}", observed);
    let conn = Connection::new(channel.clone(), Some(observed));
    spawn_close_watcher(channel, events);
    state.emit(ListenerEvent::Connection(conn.clone()));
    (state.handler)(conn);
}

fn reject(state: &ServerState, status: StatusCode, err: TransportError) -> Response {
    signal_response(status, state.report(err))
}

fn signal_response(status: StatusCode, body: String) -> Response {
    (
        status,
        [
            (header::CONTENT_TYPE, "text/plain"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        body,
    )
        .into_response()
}
