//! Feed events: everything the drivers report, as structured data.
//!
//! Rendering is the sink's business; the drivers never print. Message
//! events borrow from the receive buffer and are only valid for the
//! duration of the `on_event` call.

use moldfeed_core::decode::DecodedMessage;
use moldfeed_core::wire::SessionId;

#[derive(Debug, Clone, Copy)]
pub enum FeedEvent<'a> {
    /// A decoded (or unknown-type) message that passed the type filter.
    Message {
        session: SessionId,
        sequence: u64,
        message: DecodedMessage<'a>,
    },

    // ── Sequencing (live mode) ───────────────────────────────────────────────
    SessionChange {
        previous: SessionId,
        current: SessionId,
        sequence: u64,
    },
    Gap {
        session: SessionId,
        expected: u64,
        received: u64,
        missing: u64,
    },
    Duplicate {
        session: SessionId,
        expected: u64,
        received: u64,
    },
    EndOfSession {
        session: SessionId,
        sequence: u64,
    },
    /// A frame's length prefix ran past the packet; the rest was skipped.
    FrameOverrun {
        session: SessionId,
        sequence: u64,
        skipped: u16,
    },

    // ── Recovery ─────────────────────────────────────────────────────────────
    SessionAcquired {
        session: SessionId,
        sequence: u64,
    },
    ChunkRequested {
        session: SessionId,
        start: u64,
        count: u16,
    },
    ReplyTimeout {
        start: u64,
        count: u16,
        attempt: u32,
    },
    ChunkFinished {
        start: u64,
        requested: u16,
        received: u64,
    },
    Stalled {
        sequence: u64,
        remaining: u64,
        bounded: bool,
    },

    /// The global message cap was hit; the driver is stopping.
    CapReached { decoded: u64 },
}

/// Receiver of feed events.
pub trait FeedSink {
    fn on_event(&mut self, event: &FeedEvent<'_>);
}

