//! moldfeed-services: the two feed drivers and the sockets they run on.
//!
//! [`LiveFeed`] decodes the multicast feed as it arrives; [`RecoveryEngine`]
//! downloads a sequence range from the rerequest server. Both share the
//! per-packet [`Pipeline`] and report through a [`FeedSink`].

pub mod channel;
pub mod event;
pub mod live;
pub mod pipeline;
pub mod recovery;

#[cfg(test)]
mod testing;

pub use channel::{DatagramSource, MulticastChannel, ReplayChannel, Reply, UnicastChannel};
pub use event::{FeedEvent, FeedSink};
pub use live::{LiveFeed, LiveSummary, PacketStatus};
pub use pipeline::{PacketReport, Pipeline, TypeFilter};
pub use recovery::{
    RecoveryCursor, RecoveryEngine, RecoveryError, RecoveryOutcome, RecoveryPlan, RecoveryReport,
    MAX_CONSECUTIVE_TIMEOUTS,
};
