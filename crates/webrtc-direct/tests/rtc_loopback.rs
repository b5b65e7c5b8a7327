//! Loopback test over the real WebRTC stack
//!
//! Needs working UDP and ICE on the host, so it is ignored by default:
//! `cargo test --test rtc_loopback -- --ignored`

use std::sync::Arc;
use std::time::Duration;
use webrtc_direct::{
    ChannelConfig, Connection, ConnectionHandler, RtcChannelFactory, WebRTCDirect,
    WebRTCDirectConfig,
};

#[tokio::test]
#[ignore]
async fn test_real_webrtc_echo() {
    let config = WebRTCDirectConfig {
        channel: ChannelConfig::local_only(),
        dial_timeout_ms: 20_000,
    };
    let transport =
        WebRTCDirect::with_factory(Arc::new(RtcChannelFactory::new())).with_config(config);

    let handler: ConnectionHandler = Arc::new(|conn: Connection| {
        tokio::spawn(async move {
            while let Some(data) = conn.recv().await {
                if conn.send(data).await.is_err() {
                    break;
                }
            }
        });
    });
    let listener = transport
        .create_listener(transport.listener_options(), Some(handler))
        .unwrap();
    listener
        .listen(&"/ip4/127.0.0.1/tcp/0/http/p2p-webrtc-direct".parse().unwrap())
        .await
        .unwrap();
    let bound = listener.get_addrs().remove(0);

    let conn = transport
        .dial(&bound, transport.dial_options())
        .await
        .unwrap();
    conn.send("over a real data channel").await.unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(10), conn.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.as_ref(), b"over a real data channel");

    conn.close().await;
    listener.close().await.unwrap();
}
