//! Sequence tracking: join, session change, gap and duplicate detection.
//!
//! Forward-only and best-effort: after every packet the expected sequence
//! moves to `sequence_number + message_count`, whatever the packet was
//! classified as. Gaps are reported, never backfilled here; healing a gap
//! takes an explicit recovery run.

use crate::wire::{PacketHeader, SessionId};

/// Tracker state for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequenceState {
    #[default]
    NotJoined,
    Joined {
        session: SessionId,
        expected: u64,
    },
}

/// How an incoming packet relates to what the tracker expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequencing {
    /// First packet seen. Not a gap.
    Joined { session: SessionId, sequence: u64 },
    /// The session token changed; the new packet is the new baseline.
    SessionChange {
        previous: SessionId,
        current: SessionId,
        sequence: u64,
    },
    /// Packet starts past the expected sequence.
    Gap {
        expected: u64,
        received: u64,
        missing: u64,
    },
    /// Packet starts before the expected sequence.
    Duplicate { expected: u64, received: u64 },
    InOrder,
}

#[derive(Debug, Default)]
pub struct SequenceTracker {
    state: SequenceState,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    pub fn session(&self) -> Option<SessionId> {
        match self.state {
            SequenceState::Joined { session, .. } => Some(session),
            SequenceState::NotJoined => None,
        }
    }

    pub fn expected(&self) -> Option<u64> {
        match self.state {
            SequenceState::Joined { expected, .. } => Some(expected),
            SequenceState::NotJoined => None,
        }
    }

    /// Classify `header` against the current state.
    ///
    /// Joining and session changes adopt the header as the new baseline.
    /// Gaps and duplicates leave the baseline to [`advance`](Self::advance).
    pub fn classify(&mut self, header: &PacketHeader) -> Sequencing {
        let received = header.sequence_number;
        match self.state {
            SequenceState::NotJoined => {
                self.state = SequenceState::Joined {
                    session: header.session,
                    expected: received,
                };
                Sequencing::Joined {
                    session: header.session,
                    sequence: received,
                }
            }
            SequenceState::Joined { session, .. } if session != header.session => {
                self.state = SequenceState::Joined {
                    session: header.session,
                    expected: received,
                };
                Sequencing::SessionChange {
                    previous: session,
                    current: header.session,
                    sequence: received,
                }
            }
            SequenceState::Joined { expected, .. } if received > expected => Sequencing::Gap {
                expected,
                received,
                missing: received - expected,
            },
            SequenceState::Joined { expected, .. } if received < expected => {
                Sequencing::Duplicate { expected, received }
            }
            SequenceState::Joined { .. } => Sequencing::InOrder,
        }
    }

    /// Move the expected sequence past this packet, unconditionally.
    pub fn advance(&mut self, header: &PacketHeader) {
        self.state = SequenceState::Joined {
            session: header.session,
            expected: header.next_sequence(),
        };
    }

    /// Classify, then advance. What the live loop does for every packet.
    pub fn track(&mut self, header: &PacketHeader) -> Sequencing {
        let sequencing = self.classify(header);
        self.advance(header);
        sequencing
    }
}
