//! Dial side: one initiator channel, one signaling request

use futures::future::{BoxFuture, Fuse, FusedFuture, FutureExt};
use multiaddr::Multiaddr;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::address::SignalingTarget;
use crate::channel::{Channel, ChannelEvent, ChannelFactory, ChannelOptions};
use crate::config::DialOptions;
use crate::connection::{spawn_close_watcher, Connection};
use crate::error::{ChannelError, TransportError};
use crate::signal::{self, SignalMessage};

/// Dial a `/ip4|ip6/<addr>/tcp/<port>/http/p2p-webrtc-direct` address
///
/// Resolves on the first of: the channel connects, the channel errors or
/// times out, `options.timeout` elapses, `options.cancel` fires. The channel
/// is destroyed on every failure. There are no retries.
pub async fn dial(
    factory: &dyn ChannelFactory,
    http: &reqwest::Client,
    addr: &Multiaddr,
    options: DialOptions,
) -> Result<Connection, TransportError> {
    let cancel = options.cancel.unwrap_or_default();
    if cancel.is_cancelled() {
        return Err(TransportError::Cancelled);
    }

    let target = SignalingTarget::from_multiaddr(addr)?;
    debug!("Dialing {}", target);

    let start = Instant::now();
    let (channel, mut events) = factory
        .create(ChannelOptions::initiator(options.channel))
        .await
        .map_err(|e| TransportError::channel_failed(target, e))?;

    let deadline = tokio::time::sleep(options.timeout);
    tokio::pin!(deadline);

    let mut exchange: Fuse<BoxFuture<'static, Result<(), TransportError>>> = Fuse::terminated();
    let mut signaled = false;

    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Dial to {} aborted", target);
                break Err(TransportError::Cancelled);
            }
            _ = &mut deadline => {
                debug!("Timeout dialing {}", target);
                break Err(timed_out(target, start));
            }
            res = &mut exchange, if !exchange.is_terminated() => {
                if let Err(e) = res {
                    break Err(e);
                }
            }
            event = events.recv() => match event {
                Some(ChannelEvent::Signal(offer)) => {
                    if signaled {
                        debug!("Ignoring extra {:?} signal for {}", offer.kind, target);
                        continue;
                    }
                    signaled = true;
                    exchange = exchange_signal(http.clone(), target, channel.clone(), offer)
                        .boxed()
                        .fuse();
                }
                Some(ChannelEvent::Connect) => break Ok(()),
                Some(ChannelEvent::Error(e)) => {
                    break Err(TransportError::channel_failed(target, e));
                }
                Some(ChannelEvent::Timeout) => {
                    debug!("Timeout dialing {}", target);
                    break Err(timed_out(target, start));
                }
                Some(ChannelEvent::Close) | None => {
                    break Err(TransportError::channel_failed(target, ChannelError::Destroyed));
                }
            },
        }
    };

    match result {
        Ok(()) => {
            info!("Connected to {}", target);
            spawn_close_watcher(channel.clone(), events);
            Ok(Connection::new(channel, Some(addr.clone())))
        }
        Err(e) => {
            channel.destroy().await;
            Err(e)
        }
    }
}

fn timed_out(target: SignalingTarget, start: Instant) -> TransportError {
    TransportError::Timeout {
        target: target.to_string(),
        elapsed_ms: start.elapsed().as_millis() as u64,
    }
}

/// Send the local offer to the listener and feed its answer back
async fn exchange_signal(
    http: reqwest::Client,
    target: SignalingTarget,
    channel: Arc<dyn Channel>,
    offer: SignalMessage,
) -> Result<(), TransportError> {
    let encoded = signal::encode(&offer)?;
    let resp = http
        .get(target.url())
        .query(&[("signal", encoded.as_str())])
        .send()
        .await
        .map_err(|e| TransportError::signaling_failed(target, e.to_string()))?;

    let status = resp.status();
    debug!("Signaling {} -> status: {}", target, status);
    if status != StatusCode::OK {
        return Err(TransportError::signaling_failed(
            target,
            format!("signaling endpoint returned {}", status),
        ));
    }

    let body = resp
        .text()
        .await
        .map_err(|e| TransportError::signaling_failed(target, e.to_string()))?;
    let answer = signal::decode(&body)?;

    channel
        .signal(answer)
        .await
        .map_err(|e| TransportError::channel_failed(target, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Role;
    use crate::mock::MockChannelFactory;
    use tokio_util::sync::CancellationToken;

    fn addr(s: &str) -> Multiaddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_precancelled_dial_creates_nothing() {
        let factory = MockChannelFactory::new();
        let token = CancellationToken::new();
        token.cancel();

        let err = dial(
            &factory,
            &crate::signaling_client(),
            &addr("/ip4/127.0.0.1/tcp/9/http/p2p-webrtc-direct"),
            DialOptions::default().with_cancel(token),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, TransportError::Cancelled));
        assert_eq!(factory.created(Role::Initiator), 0);
    }

    #[tokio::test]
    async fn test_invalid_address_rejected_before_channel() {
        let factory = MockChannelFactory::new();
        let err = dial(
            &factory,
            &crate::signaling_client(),
            &addr("/dns4/example.com/tcp/80/http/p2p-webrtc-direct"),
            DialOptions::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, TransportError::InvalidAddress(_)));
        assert_eq!(factory.created(Role::Initiator), 0);
    }

    #[tokio::test]
    async fn test_unreachable_destroys_channel() {
        // bind then drop to get a port nobody listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let factory = MockChannelFactory::new();
        let err = dial(
            &factory,
            &crate::signaling_client(),
            &addr(&format!("/ip4/127.0.0.1/tcp/{}/http/p2p-webrtc-direct", port)),
            DialOptions::default(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.code(), "ERR_HTTP");
        assert!(err.to_string().contains(&format!("127.0.0.1:{}", port)));
        assert_eq!(factory.destroyed(), 1);
    }
}
