//! Live decode loop: multicast datagrams in, events out.
//!
//! Per datagram: parse the header (malformed datagrams are dropped
//! silently), classify it against the sequence tracker, advance the
//! tracker, then run every message through the pipeline. The loop ends
//! cleanly when the global message cap is reached; with no cap it runs
//! until the caller drops it.

use std::io;

use moldfeed_core::sequence::{SequenceTracker, Sequencing};
use moldfeed_core::wire::{PacketHeader, MAX_DATAGRAM};

use crate::channel::DatagramSource;
use crate::event::{FeedEvent, FeedSink};
use crate::pipeline::{PacketReport, Pipeline};

/// What became of one received datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketStatus {
    /// Too short to hold a header.
    Skipped,
    Processed(PacketReport),
}

/// Totals at the end of a live run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveSummary {
    pub packets: u64,
    pub decoded: u64,
}

pub struct LiveFeed<'t, C> {
    channel: C,
    tracker: SequenceTracker,
    pipeline: Pipeline<'t>,
    buf: Vec<u8>,
    packets: u64,
}

impl<'t, C: DatagramSource> LiveFeed<'t, C> {
    pub fn new(channel: C, pipeline: Pipeline<'t>) -> Self {
        Self {
            channel,
            tracker: SequenceTracker::new(),
            pipeline,
            buf: vec![0u8; MAX_DATAGRAM],
            packets: 0,
        }
    }

    pub fn tracker(&self) -> &SequenceTracker {
        &self.tracker
    }

    pub fn summary(&self) -> LiveSummary {
        LiveSummary {
            packets: self.packets,
            decoded: self.pipeline.processed(),
        }
    }

    /// Run until the message cap is reached. Receive errors are logged and
    /// the loop carries on.
    pub async fn run(&mut self, sink: &mut impl FeedSink) -> LiveSummary {
        tracing::info!("listening for live packets");

        while !self.pipeline.cap_reached() {
            match self.next_packet(sink).await {
                Ok(PacketStatus::Processed(report)) if report.cap_reached => break,
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "live receive failed"),
            }
        }

        let summary = self.summary();
        sink.on_event(&FeedEvent::CapReached {
            decoded: summary.decoded,
        });
        tracing::info!(
            packets = summary.packets,
            decoded = summary.decoded,
            "message cap reached, stopping"
        );
        summary
    }

    /// Receive and process exactly one datagram.
    pub async fn next_packet(&mut self, sink: &mut impl FeedSink) -> io::Result<PacketStatus> {
        let len = self.channel.recv(&mut self.buf).await?;
        let packet = &self.buf[..len];

        let Ok(header) = PacketHeader::parse(packet) else {
            tracing::trace!(len, "datagram too short for a header, discarding");
            return Ok(PacketStatus::Skipped);
        };
        self.packets += 1;

        match self.tracker.track(&header) {
            Sequencing::Joined { session, sequence } => {
                tracing::info!(%session, sequence, "joined session");
            }
            Sequencing::SessionChange {
                previous,
                current,
                sequence,
            } => {
                tracing::warn!(%previous, %current, sequence, "session change");
                sink.on_event(&FeedEvent::SessionChange {
                    previous,
                    current,
                    sequence,
                });
            }
            Sequencing::Gap {
                expected,
                received,
                missing,
            } => {
                tracing::warn!(session = %header.session, expected, received, missing, "sequence gap");
                sink.on_event(&FeedEvent::Gap {
                    session: header.session,
                    expected,
                    received,
                    missing,
                });
            }
            Sequencing::Duplicate { expected, received } => {
                tracing::warn!(session = %header.session, expected, received, "duplicate packet");
                sink.on_event(&FeedEvent::Duplicate {
                    session: header.session,
                    expected,
                    received,
                });
            }
            Sequencing::InOrder => {}
        }

        let report = self.pipeline.process_packet(&header, packet, sink);
        Ok(PacketStatus::Processed(report))
    }
}
