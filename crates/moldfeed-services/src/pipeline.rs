//! Per-packet processing shared by the live loop and the recovery engine.
//!
//! Frames each message out of the packet, counts it, applies the type
//! filter and hands the decoded view to the sink. Counting happens before
//! filtering, so filtered-out and unknown messages still count toward the
//! global cap.

use moldfeed_core::decode::decode_message;
use moldfeed_core::layout::{MessageTable, TYPE_SLOTS};
use moldfeed_core::wire::{Frames, PacketHeader};

use crate::event::{FeedEvent, FeedSink};

/// Allow-set of message type bytes.
#[derive(Debug, Clone)]
pub struct TypeFilter {
    allowed: [bool; TYPE_SLOTS],
}

impl TypeFilter {
    pub fn new(types: impl IntoIterator<Item = u8>) -> Self {
        let mut allowed = [false; TYPE_SLOTS];
        for t in types {
            allowed[usize::from(t)] = true;
        }
        Self { allowed }
    }

    #[inline]
    pub fn allows(&self, type_tag: u8) -> bool {
        self.allowed[usize::from(type_tag)]
    }
}

/// What happened to one packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketReport {
    /// Messages framed and counted from this packet.
    pub processed: u64,
    /// Messages that passed the filter and were reported.
    pub reported: u64,
    /// A malformed frame cut the packet short.
    pub overrun: bool,
    /// The global cap is reached; the driver should stop.
    pub cap_reached: bool,
}

pub struct Pipeline<'t> {
    table: &'t MessageTable,
    filter: Option<TypeFilter>,
    /// 0 = unbounded.
    max_messages: u64,
    processed: u64,
}

impl<'t> Pipeline<'t> {
    pub fn new(table: &'t MessageTable, filter: Option<TypeFilter>, max_messages: u64) -> Self {
        Self {
            table,
            filter,
            max_messages,
            processed: 0,
        }
    }

    /// Messages counted so far across all packets.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn cap_reached(&self) -> bool {
        self.max_messages != 0 && self.processed >= self.max_messages
    }

    fn passes(&self, type_tag: Option<u8>) -> bool {
        match (&self.filter, type_tag) {
            (None, _) => true,
            (Some(filter), Some(tag)) => filter.allows(tag),
            (Some(_), None) => false,
        }
    }

    /// Decode every message in `packet`, stopping early at the cap.
    pub fn process_packet(
        &mut self,
        header: &PacketHeader,
        packet: &[u8],
        sink: &mut impl FeedSink,
    ) -> PacketReport {
        let mut report = PacketReport::default();

        if header.is_end_of_session() {
            sink.on_event(&FeedEvent::EndOfSession {
                session: header.session,
                sequence: header.sequence_number,
            });
            report.cap_reached = self.cap_reached();
            return report;
        }

        let mut frames = Frames::new(packet, header);

        while !self.cap_reached() {
            let Some(frame) = frames.next() else { break };
            // Sequence numbers are arbitrary on the wire; never panic past u64::MAX.
            let sequence = header.sequence_number.wrapping_add(report.processed);
            self.processed += 1;
            report.processed += 1;

            if self.passes(frame.type_tag()) {
                report.reported += 1;
                sink.on_event(&FeedEvent::Message {
                    session: header.session,
                    sequence,
                    message: decode_message(frame, self.table),
                });
            }
        }

        if let Some(e) = frames.overrun() {
            let sequence = header.sequence_number.wrapping_add(report.processed);
            tracing::debug!(
                session = %header.session,
                sequence,
                error = %e,
                "malformed frame, rest of packet skipped"
            );
            sink.on_event(&FeedEvent::FrameOverrun {
                session: header.session,
                sequence,
                skipped: frames.remaining(),
            });
            report.overrun = true;
        }

        report.cap_reached = self.cap_reached();
        report
    }
}
