//! moldfeed integration test harness.
//!
//! Tests here drive the live loop and the recovery engine over real UDP
//! sockets on the loopback interface. Recovery tests need nothing special.
//! Live tests need multicast on `lo` and skip gracefully without it:
//!
//!   sudo ip route add 239.0.0.0/8 dev lo
//!   cargo test --test integration
//!
//! Every socket binds an ephemeral port, so tests may run in parallel.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use moldfeed_core::decode::FieldValue;
use moldfeed_core::layout::MessageTable;
use moldfeed_core::wire::{encode_packet, RerequestPacket, SessionId};
use moldfeed_services::{DatagramSource, FeedEvent, FeedSink};

mod live;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const SESSION: SessionId = SessionId::new(*b"SESSION001");

/// Layout used by every test: one Add Order type.
pub const LAYOUT_JSON: &str = r#"{
  "messages": [
    { "type": "A", "name": "Add Order",
      "fields": [
        { "name": "Message Type", "type": "char",   "size": 1 },
        { "name": "Stock Locate", "type": "uint16", "size": 2 },
        { "name": "Reference",    "type": "uint64", "size": 8 },
        { "name": "Stock",        "type": "alpha",  "size": 8 }
      ] }
  ]
}"#;

pub fn layout() -> MessageTable {
    MessageTable::from_json(LAYOUT_JSON).expect("test layout is valid")
}

/// An Add Order body whose Reference field carries `reference`.
pub fn add_order(reference: u64) -> Vec<u8> {
    let mut body = vec![b'A'];
    body.extend_from_slice(&7u16.to_be_bytes());
    body.extend_from_slice(&reference.to_be_bytes());
    body.extend_from_slice(b"MOLD    ");
    body
}

/// One packet of Add Orders for `start..start + count`, each referencing
/// its own sequence number.
pub fn order_packet(session: SessionId, start: u64, count: u64) -> Vec<u8> {
    let bodies: Vec<Vec<u8>> = (start..start + count).map(add_order).collect();
    let refs: Vec<&[u8]> = bodies.iter().map(Vec::as_slice).collect();
    encode_packet(session, start, &refs).expect("packet fits")
}

/// Per-test scratch directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("moldfeed-it-{}-{name}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

/// Records events as short strings. Messages become `msg <seq> ref=<n>`.
#[derive(Default)]
pub struct Recorder {
    pub events: Vec<String>,
}

impl Recorder {
    pub fn messages(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter(|e| e.starts_with("msg "))
            .map(String::as_str)
            .collect()
    }
}

impl FeedSink for Recorder {
    fn on_event(&mut self, event: &FeedEvent<'_>) {
        let line = match event {
            FeedEvent::Message {
                sequence, message, ..
            } => {
                let reference = message
                    .fields()
                    .find(|f| f.spec.name == "Reference")
                    .map(|f| f.value);
                match reference {
                    Some(FieldValue::Unsigned(n)) => format!("msg {sequence} ref={n}"),
                    _ => format!("msg {sequence} undecoded"),
                }
            }
            FeedEvent::Gap {
                expected,
                received,
                missing,
                ..
            } => format!("gap expected={expected} received={received} missing={missing}"),
            FeedEvent::Duplicate {
                expected, received, ..
            } => format!("dup expected={expected} received={received}"),
            FeedEvent::SessionAcquired { session, .. } => format!("acquired {session}"),
            FeedEvent::Stalled {
                sequence,
                remaining,
                ..
            } => format!("stalled {sequence} remaining={remaining}"),
            FeedEvent::CapReached { decoded } => format!("cap decoded={decoded}"),
            other => format!("{other:?}"),
        };
        self.events.push(line);
    }
}

/// Plain unicast socket standing in for the live feed in recovery tests.
pub struct LoopbackSource {
    socket: UdpSocket,
}

impl LoopbackSource {
    pub async fn bind() -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .context("bind loopback source")?;
        Ok(Self { socket })
    }

    pub fn addr(&self) -> SocketAddr {
        self.socket.local_addr().expect("bound socket has an address")
    }

    /// Deliver one datagram to this source.
    pub async fn inject(&self, datagram: &[u8]) -> Result<()> {
        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        sender.send_to(datagram, self.addr()).await?;
        Ok(())
    }
}

impl DatagramSource for LoopbackSource {
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf).await
    }
}

/// Rerequest server on 127.0.0.1 holding Add Orders for `first..end`.
///
/// Answers every valid rerequest with up to `per_packet` messages per
/// reply packet; sequences it does not hold are silently not sent.
pub struct RerequestServer {
    addr: SocketAddrV4,
    requests: Arc<Mutex<Vec<(SessionId, u64, u16)>>>,
    task: JoinHandle<()>,
}

impl RerequestServer {
    pub async fn spawn(first: u64, end: u64, per_packet: u64) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .context("bind rerequest server")?;
        let addr = match socket.local_addr()? {
            SocketAddr::V4(v4) => v4,
            other => anyhow::bail!("expected IPv4 address, got {other}"),
        };

        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = requests.clone();
        let task = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            while let Ok((len, from)) = socket.recv_from(&mut buf).await {
                let Ok(request) = RerequestPacket::parse(&buf[..len]) else {
                    continue;
                };
                let session = request.session();
                let start = request.start_sequence();
                let count = request.message_count();
                log.lock().unwrap().push((session, start, count));

                if start < first {
                    continue;
                }
                let stop = end.min(start + u64::from(count));
                let mut seq = start;
                while seq < stop {
                    let n = per_packet.min(stop - seq);
                    let packet = order_packet(session, seq, n);
                    if socket.send_to(&packet, from).await.is_err() {
                        break;
                    }
                    seq += n;
                }
            }
        });

        Ok(Self {
            addr,
            requests,
            task,
        })
    }

    pub fn addr(&self) -> SocketAddrV4 {
        self.addr
    }

    /// Every request seen so far, as (session, start, count).
    pub fn requests(&self) -> Vec<(SessionId, u64, u16)> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for RerequestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
