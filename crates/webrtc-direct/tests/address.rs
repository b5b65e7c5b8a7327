//! Address filtering

use std::sync::Arc;
use webrtc_direct::{filter, is_webrtc_direct, MockChannelFactory, Multiaddr, WebRTCDirect};

const PEER: &str = "QmcgpsyWgH8Y8ajJz1Cu72KnS5uo2Aa2LpzU7kinSupNKC";

fn ma(s: &str) -> Multiaddr {
    s.parse().unwrap()
}

fn mixed_addrs() -> Vec<Multiaddr> {
    vec![
        ma("/ip4/127.0.0.1/tcp/9090/ws"),
        ma("/ip4/127.0.0.1/tcp/9090/http/p2p-webrtc-direct"),
        ma("/ip6/::1/tcp/9090/http/p2p-webrtc-direct"),
        ma("/ip4/1.2.3.4/tcp/3456/ws/p2p-webrtc-star"),
        ma(&format!("/ip4/127.0.0.1/tcp/9090/http/p2p-webrtc-direct/p2p/{}", PEER)),
        ma(&format!("/p2p/{}/ip4/10.0.0.1/tcp/80/http/p2p-webrtc-direct", PEER)),
        ma("/ip4/127.0.0.1/udp/9090/http/p2p-webrtc-direct"),
        ma("/dns4/example.com/tcp/443/http/p2p-webrtc-direct"),
        ma("/ip4/127.0.0.1/tcp/9090/p2p-webrtc-direct"),
    ]
}

#[test]
fn test_filter_keeps_exact_grammar_in_order() {
    let kept = filter(mixed_addrs());
    assert_eq!(
        kept,
        vec![
            ma("/ip4/127.0.0.1/tcp/9090/http/p2p-webrtc-direct"),
            ma("/ip6/::1/tcp/9090/http/p2p-webrtc-direct"),
            ma(&format!("/ip4/127.0.0.1/tcp/9090/http/p2p-webrtc-direct/p2p/{}", PEER)),
            ma(&format!("/p2p/{}/ip4/10.0.0.1/tcp/80/http/p2p-webrtc-direct", PEER)),
        ]
    );
    assert!(kept.iter().all(is_webrtc_direct));
}

#[test]
fn test_filter_never_returns_relayed() {
    let relayed = vec![
        ma(&format!(
            "/ip4/1.2.3.4/tcp/9090/http/p2p-webrtc-direct/p2p/{}/p2p-circuit",
            PEER
        )),
        ma(&format!(
            "/ip4/1.2.3.4/tcp/4001/p2p/{}/p2p-circuit{}",
            PEER, "/ip4/127.0.0.1/tcp/9090/http/p2p-webrtc-direct"
        )),
    ];
    assert!(filter(&relayed).is_empty());

    let mut addrs = mixed_addrs();
    addrs.extend(relayed);
    for addr in filter(&addrs) {
        assert!(!addr.to_string().contains("p2p-circuit"));
    }
}

#[test]
fn test_filter_single_address() {
    let addr = ma("/ip4/127.0.0.1/tcp/9090/http/p2p-webrtc-direct");
    assert_eq!(filter([&addr]), vec![addr.clone()]);
    assert_eq!(filter(Some(addr.clone())), vec![addr]);

    let other = ma("/ip4/127.0.0.1/tcp/9090/ws");
    assert!(filter([other]).is_empty());
    assert!(filter(Vec::<Multiaddr>::new()).is_empty());
}

#[test]
fn test_transport_filter_matches_free_function() {
    let transport = WebRTCDirect::with_factory(Arc::new(MockChannelFactory::new()));
    let addrs = mixed_addrs();
    assert_eq!(transport.filter(&addrs), filter(&addrs));
}
