//! Live decode loop over a multicast loopback.
//!
//! Skips when the host cannot join or route 239.255.0.0/16 on `lo`.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use moldfeed_core::config::MulticastTarget;
use moldfeed_core::wire::SessionId;
use moldfeed_services::{LiveFeed, MulticastChannel, Pipeline, TypeFilter};

use crate::*;

const WAIT: Duration = Duration::from_secs(2);

/// Join `group` on loopback, or None (with a SKIP line) if the host can't.
fn join(group: Ipv4Addr) -> Option<MulticastChannel> {
    let target = MulticastTarget {
        group,
        port: 0,
        interface: Ipv4Addr::LOCALHOST,
        source: None,
    };
    match MulticastChannel::connect(&target, 1 << 20) {
        Ok(channel) => Some(channel),
        Err(e) => {
            eprintln!("SKIP: cannot join {group} on lo: {e:#}");
            None
        }
    }
}

/// Multicast sender bound to loopback with loop enabled.
fn sender() -> std::io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_multicast_if_v4(&Ipv4Addr::LOCALHOST)?;
    socket.set_multicast_loop_v4(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0).into())?;
    Ok(socket)
}

/// Send every packet to the channel's group and port. False (with a SKIP
/// line) if the host refuses to route it.
fn publish(channel: &MulticastChannel, packets: &[Vec<u8>]) -> bool {
    let port = channel.local_addr().expect("bound").port();
    let dest = SocketAddrV4::new(channel.target().group, port);
    let result = sender().and_then(|socket| {
        packets
            .iter()
            .try_for_each(|p| socket.send_to(p, &dest.into()).map(|_| ()))
    });
    match result {
        Ok(()) => true,
        Err(e) => {
            eprintln!("SKIP: cannot send to {dest}: {e}");
            false
        }
    }
}

#[tokio::test]
async fn live_feed_tracks_sequence_over_multicast() {
    let Some(channel) = join(Ipv4Addr::new(239, 255, 77, 1)) else {
        return;
    };
    let packets = vec![
        order_packet(SESSION, 1, 2),
        order_packet(SESSION, 3, 1),
        order_packet(SESSION, 3, 1),
        order_packet(SESSION, 10, 2),
    ];
    if !publish(&channel, &packets) {
        return;
    }

    let table = layout();
    let mut feed = LiveFeed::new(channel, Pipeline::new(&table, None, 6));
    let mut sink = Recorder::default();

    let Ok(summary) = tokio::time::timeout(WAIT, feed.run(&mut sink)).await else {
        eprintln!("SKIP: multicast loopback delivered nothing within {WAIT:?}");
        return;
    };

    assert_eq!(summary.packets, 4);
    assert_eq!(summary.decoded, 6);
    assert_eq!(
        sink.events,
        vec![
            "msg 1 ref=1",
            "msg 2 ref=2",
            "msg 3 ref=3",
            "dup expected=4 received=3",
            "msg 3 ref=3",
            "gap expected=4 received=10 missing=6",
            "msg 10 ref=10",
            "msg 11 ref=11",
            "cap decoded=6",
        ]
    );
    assert_eq!(feed.tracker().expected(), Some(12));
}

#[tokio::test]
async fn live_feed_filters_and_follows_session_change() {
    let Some(channel) = join(Ipv4Addr::new(239, 255, 77, 2)) else {
        return;
    };
    channel.set_receive_buffer_size(64 * 1024).unwrap();
    assert!(channel.receive_buffer_size().unwrap() >= 64 * 1024);
    let next: SessionId = "SESSION002".parse().unwrap();
    let packets = vec![order_packet(SESSION, 50, 2), order_packet(next, 1, 2)];
    if !publish(&channel, &packets) {
        return;
    }

    let table = layout();
    // Nothing on this feed is type 'B': everything is counted, nothing shown.
    let pipeline = Pipeline::new(&table, Some(TypeFilter::new([b'B'])), 4);
    let mut feed = LiveFeed::new(channel, pipeline);
    let mut sink = Recorder::default();

    let Ok(summary) = tokio::time::timeout(WAIT, feed.run(&mut sink)).await else {
        eprintln!("SKIP: multicast loopback delivered nothing within {WAIT:?}");
        return;
    };

    assert_eq!(summary.decoded, 4);
    assert!(sink.messages().is_empty());
    assert_eq!(feed.tracker().session(), Some(next));
    assert_eq!(feed.tracker().expected(), Some(3));
    assert_eq!(sink.events.last().unwrap(), "cap decoded=4");
}
