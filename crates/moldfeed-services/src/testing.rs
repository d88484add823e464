//! In-memory channels and a recording sink for driver tests.

use std::collections::VecDeque;
use std::io;

use moldfeed_core::decode::DecodeStatus;
use moldfeed_core::layout::{FieldKind, MessageSpec, MessageTable};
use moldfeed_core::wire::{encode_packet, RerequestPacket, SessionId};

use crate::channel::{DatagramSource, ReplayChannel, Reply};
use crate::event::{FeedEvent, FeedSink};

pub const SESSION: SessionId = SessionId::new(*b"SESSION001");

/// Body every fake packet carries: type 'A', uint32 1.
pub const BODY: &[u8] = b"A\0\0\0\x01";

/// Types 'A' and 'B', each a 1-byte char followed by a uint32.
pub fn table() -> MessageTable {
    let mut table = MessageTable::new();
    for (tag, name) in [(b'A', "Add"), (b'B', "Bump")] {
        let spec = MessageSpec::new(
            tag,
            name,
            [("Type", FieldKind::Char, 1), ("Value", FieldKind::UInt32, 4)],
        )
        .unwrap();
        table.insert(spec).unwrap();
    }
    table
}

/// Flattens events into short strings for exact assertions.
#[derive(Default)]
pub struct Recorder {
    pub events: Vec<String>,
}

impl FeedSink for Recorder {
    fn on_event(&mut self, event: &FeedEvent<'_>) {
        let line = match event {
            FeedEvent::Message {
                sequence, message, ..
            } => {
                let tag = message.type_tag().map(char::from).unwrap_or('?');
                let status = match message.status() {
                    DecodeStatus::Complete => "Complete",
                    DecodeStatus::Truncated { .. } => "Truncated",
                    DecodeStatus::Unknown => "Unknown",
                };
                format!("msg {sequence} {tag} {status}")
            }
            FeedEvent::SessionChange {
                previous,
                current,
                sequence,
            } => format!("session {previous}->{current} at {sequence}"),
            FeedEvent::Gap {
                expected,
                received,
                missing,
                ..
            } => format!("gap expected={expected} received={received} missing={missing}"),
            FeedEvent::Duplicate {
                expected, received, ..
            } => format!("dup expected={expected} received={received}"),
            FeedEvent::EndOfSession { sequence, .. } => format!("eos {sequence}"),
            FeedEvent::FrameOverrun {
                sequence, skipped, ..
            } => format!("overrun {sequence} skipped={skipped}"),
            FeedEvent::SessionAcquired { session, sequence } => {
                format!("acquired {session} at {sequence}")
            }
            FeedEvent::ChunkRequested { start, count, .. } => format!("request {start} {count}"),
            FeedEvent::ReplyTimeout {
                start,
                count,
                attempt,
            } => format!("timeout start={start} count={count} attempt={attempt}"),
            FeedEvent::ChunkFinished {
                start,
                requested,
                received,
            } => format!("finished {start} requested={requested} received={received}"),
            FeedEvent::Stalled {
                sequence,
                remaining,
                bounded,
            } => format!("stalled {sequence} remaining={remaining} bounded={bounded}"),
            FeedEvent::CapReached { decoded } => format!("cap decoded={decoded}"),
        };
        self.events.push(line);
    }
}

/// Live source replaying a fixed list of datagrams.
///
/// Once the script runs out, `recv` never resolves, like a quiet group.
pub struct ScriptedSource {
    datagrams: VecDeque<Vec<u8>>,
    failures: u32,
}

impl ScriptedSource {
    pub fn new(datagrams: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            datagrams: datagrams.into_iter().collect(),
            failures: 0,
        }
    }

    /// A source that never delivers anything.
    pub fn pending() -> Self {
        Self::new([])
    }

    /// Fail the next `n` receives before delivering.
    pub fn fail_first(&mut self, n: u32) {
        self.failures = n;
    }
}

impl DatagramSource for ScriptedSource {
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(io::Error::new(io::ErrorKind::Other, "scripted failure"));
        }
        match self.datagrams.pop_front() {
            Some(datagram) => {
                buf[..datagram.len()].copy_from_slice(&datagram);
                Ok(datagram.len())
            }
            None => std::future::pending().await,
        }
    }
}

/// Rerequest server holding sequences `first..end` of [`SESSION`].
///
/// Each request is answered immediately with packets of up to
/// `per_packet` messages; an empty reply queue reads as a timeout.
pub struct FakeRerequester {
    first: u64,
    end: u64,
    per_packet: usize,
    replies: VecDeque<Vec<u8>>,
    /// Every request received, as (session, start, count).
    pub requests: Vec<(SessionId, u64, u16)>,
    /// Cap on messages served per request.
    pub max_reply: Option<u16>,
    pub fail_replies: bool,
    pub fail_sends: bool,
}

impl FakeRerequester {
    pub fn new(first: u64, end: u64, per_packet: usize) -> Self {
        Self {
            first,
            end,
            per_packet,
            replies: VecDeque::new(),
            requests: Vec::new(),
            max_reply: None,
            fail_replies: false,
            fail_sends: false,
        }
    }
}

impl ReplayChannel for FakeRerequester {
    async fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        if self.fail_sends {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "scripted send failure"));
        }
        let request = RerequestPacket::parse(datagram)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let (start, count) = (request.start_sequence(), request.message_count());
        self.requests.push((request.session(), start, count));

        let mut wanted = u64::from(self.max_reply.map_or(count, |max| max.min(count)));
        let mut seq = start;
        if seq < self.first {
            return Ok(());
        }
        while wanted > 0 && seq < self.end {
            let n = wanted.min(self.end - seq).min(self.per_packet as u64);
            let bodies = vec![BODY; n as usize];
            self.replies
                .push_back(encode_packet(request.session(), seq, &bodies).unwrap());
            seq += n;
            wanted -= n;
        }
        Ok(())
    }

    async fn recv_reply(&mut self, buf: &mut [u8]) -> io::Result<Reply> {
        if self.fail_replies {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "scripted receive failure"));
        }
        match self.replies.pop_front() {
            Some(datagram) => {
                buf[..datagram.len()].copy_from_slice(&datagram);
                Ok(Reply::Datagram(datagram.len()))
            }
            None => Ok(Reply::TimedOut),
        }
    }
}
