//! Recovery engine: chunked rerequest/replay over unicast.
//!
//! ```text
//! AcquiringSession → Requesting → AwaitingReplies → Requesting | Stalled | Done
//! ```
//!
//! The session token comes from the first valid live header. Each chunk
//! asks for `min(remaining, chunk_size)` messages (just `chunk_size` when
//! unbounded) and then collects replies until three consecutive receive
//! timeouts, a hard receive error, or the chunk is fully answered. The
//! cursor advances by what was actually decoded, not by what was asked for.
//!
//! A chunk that yields nothing is a stall: a failure when a total was
//! requested, the normal end of data when it was not.

use std::time::Duration;

use zerocopy::AsBytes;

use moldfeed_core::config::DEFAULT_RECOVERY_CHUNK;
use moldfeed_core::wire::{PacketHeader, RerequestPacket, SessionId, MAX_DATAGRAM};

use crate::channel::{DatagramSource, ReplayChannel, Reply};
use crate::event::{FeedEvent, FeedSink};
use crate::pipeline::Pipeline;

/// Consecutive reply timeouts that end a chunk.
pub const MAX_CONSECUTIVE_TIMEOUTS: u32 = 3;

/// Where recovery should start and how much it should fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPlan {
    pub start: u64,
    /// Total messages to recover. 0 = until the server runs dry.
    pub total: u64,
    /// Messages per rerequest. 0 = [`DEFAULT_RECOVERY_CHUNK`].
    pub chunk_size: u16,
    /// Give up waiting for a live header after this long. None = never.
    pub session_timeout: Option<Duration>,
}

/// Recovery progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryCursor {
    pub current_seq: u64,
    /// Messages still wanted. Meaningless when unbounded.
    pub remaining: u64,
    pub bounded: bool,
}

impl RecoveryCursor {
    pub fn new(start: u64, total: u64) -> Self {
        Self {
            current_seq: start,
            remaining: total,
            bounded: total != 0,
        }
    }

    /// Count for the next rerequest.
    pub fn request_count(&self, chunk_size: u16) -> u16 {
        if self.bounded {
            self.remaining.min(u64::from(chunk_size)) as u16
        } else {
            chunk_size
        }
    }

    /// Move past `received` decoded messages.
    pub fn advance(&mut self, received: u64) {
        self.current_seq = self.current_seq.saturating_add(received);
        if self.bounded {
            self.remaining = self.remaining.saturating_sub(received);
        }
    }

    pub fn is_done(&self) -> bool {
        self.bounded && self.remaining == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Every requested message was recovered.
    Completed,
    /// Unbounded download hit a stall: the server has nothing more.
    EndOfData,
    /// The global message cap was reached mid-chunk.
    CapReached,
    /// Bounded download hit a stall before getting everything.
    Stalled,
}

impl RecoveryOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Stalled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub outcome: RecoveryOutcome,
    pub session: SessionId,
    pub cursor: RecoveryCursor,
    /// Rerequests sent.
    pub chunks: u32,
    /// Messages decoded across all chunks.
    pub decoded: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("no live packet within {0:?} to learn the session from")]
    SessionTimeout(Duration),

    #[error("failed to send rerequest: {0}")]
    Send(#[source] std::io::Error),
}

/// Result of one AwaitingReplies phase.
#[derive(Debug, Clone, Copy, Default)]
struct ChunkResult {
    received: u64,
    cap_reached: bool,
}

pub struct RecoveryEngine<'t, L, R> {
    live: L,
    replay: R,
    pipeline: Pipeline<'t>,
    plan: RecoveryPlan,
    buf: Vec<u8>,
}

impl<'t, L: DatagramSource, R: ReplayChannel> RecoveryEngine<'t, L, R> {
    pub fn new(live: L, replay: R, pipeline: Pipeline<'t>, mut plan: RecoveryPlan) -> Self {
        if plan.chunk_size == 0 {
            plan.chunk_size = DEFAULT_RECOVERY_CHUNK;
        }
        Self {
            live,
            replay,
            pipeline,
            plan,
            buf: vec![0u8; MAX_DATAGRAM],
        }
    }

    /// Drive the download to completion, stall or cap.
    ///
    /// Errors only when the session cannot be learned or a rerequest cannot
    /// be sent; everything else ends in a [`RecoveryReport`].
    pub async fn run(&mut self, sink: &mut impl FeedSink) -> Result<RecoveryReport, RecoveryError> {
        let session = self.acquire_session(sink).await?;

        let mut cursor = RecoveryCursor::new(self.plan.start, self.plan.total);
        let mut chunks = 0u32;

        tracing::info!(
            %session,
            start = cursor.current_seq,
            total = self.plan.total,
            chunk_size = self.plan.chunk_size,
            "starting recovery"
        );

        let outcome = loop {
            // Requesting
            let start = cursor.current_seq;
            let count = cursor.request_count(self.plan.chunk_size);
            sink.on_event(&FeedEvent::ChunkRequested {
                session,
                start,
                count,
            });
            let request = RerequestPacket::new(session, start, count);
            self.replay
                .send(request.as_bytes())
                .await
                .map_err(RecoveryError::Send)?;
            chunks += 1;
            tracing::debug!(start, count, "rerequest sent");

            // AwaitingReplies
            let chunk = self.await_replies(start, count, sink).await;
            cursor.advance(chunk.received);
            sink.on_event(&FeedEvent::ChunkFinished {
                start,
                requested: count,
                received: chunk.received,
            });

            if chunk.cap_reached {
                sink.on_event(&FeedEvent::CapReached {
                    decoded: self.pipeline.processed(),
                });
                break RecoveryOutcome::CapReached;
            }

            if chunk.received == 0 {
                sink.on_event(&FeedEvent::Stalled {
                    sequence: cursor.current_seq,
                    remaining: cursor.remaining,
                    bounded: cursor.bounded,
                });
                if cursor.bounded {
                    tracing::warn!(
                        sequence = cursor.current_seq,
                        remaining = cursor.remaining,
                        "recovery stalled before all messages arrived"
                    );
                    break RecoveryOutcome::Stalled;
                }
                tracing::info!(sequence = cursor.current_seq, "no more data from rerequester");
                break RecoveryOutcome::EndOfData;
            }

            if cursor.is_done() {
                break RecoveryOutcome::Completed;
            }
        };

        let report = RecoveryReport {
            outcome,
            session,
            cursor,
            chunks,
            decoded: self.pipeline.processed(),
        };
        tracing::info!(
            outcome = ?report.outcome,
            next_sequence = cursor.current_seq,
            chunks,
            decoded = report.decoded,
            "recovery finished"
        );
        Ok(report)
    }

    /// Listen to the live feed until one valid header shows the session.
    async fn acquire_session(
        &mut self,
        sink: &mut impl FeedSink,
    ) -> Result<SessionId, RecoveryError> {
        tracing::info!("waiting for a live packet to learn the session");

        let live = &mut self.live;
        let buf = &mut self.buf;
        let listen = async move {
            loop {
                match live.recv(buf).await {
                    Ok(len) => match PacketHeader::parse(&buf[..len]) {
                        Ok(header) => return header,
                        Err(e) => tracing::trace!(error = %e, "discarding live datagram"),
                    },
                    Err(e) => tracing::warn!(error = %e, "live receive failed"),
                }
            }
        };

        let header = match self.plan.session_timeout {
            Some(limit) => tokio::time::timeout(limit, listen)
                .await
                .map_err(|_| RecoveryError::SessionTimeout(limit))?,
            None => listen.await,
        };

        sink.on_event(&FeedEvent::SessionAcquired {
            session: header.session,
            sequence: header.sequence_number,
        });
        Ok(header.session)
    }

    /// Collect replies for one chunk.
    async fn await_replies(&mut self, start: u64, count: u16, sink: &mut impl FeedSink) -> ChunkResult {
        let mut result = ChunkResult::default();
        let mut timeouts = 0u32;

        while timeouts < MAX_CONSECUTIVE_TIMEOUTS {
            match self.replay.recv_reply(&mut self.buf).await {
                Ok(Reply::TimedOut) => {
                    timeouts += 1;
                    tracing::debug!(start, count, attempt = timeouts, "reply timeout");
                    sink.on_event(&FeedEvent::ReplyTimeout {
                        start,
                        count,
                        attempt: timeouts,
                    });
                }
                Ok(Reply::Datagram(len)) => {
                    timeouts = 0;
                    let packet = &self.buf[..len];
                    let Ok(header) = PacketHeader::parse(packet) else {
                        tracing::trace!(len, "reply too short for a header, discarding");
                        continue;
                    };

                    let report = self.pipeline.process_packet(&header, packet, sink);
                    result.received += report.processed;

                    if report.cap_reached {
                        result.cap_reached = true;
                        return result;
                    }
                    if result.received >= u64::from(count) {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, start, count, "reply receive failed, ending chunk");
                    break;
                }
            }
        }

        result
    }
}
