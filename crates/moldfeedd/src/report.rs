//! Console rendering of feed events.

use std::io::{self, Write};

use moldfeed_core::decode::{DecodeStatus, DecodedMessage};
use moldfeed_services::{FeedEvent, FeedSink};

/// Writes one line per event; in verbose mode, every field of every message.
pub struct ConsoleSink<W> {
    out: W,
    verbose: bool,
    write_failed: bool,
}

impl ConsoleSink<io::Stdout> {
    pub fn stdout(verbose: bool) -> Self {
        Self::new(io::stdout(), verbose)
    }
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W, verbose: bool) -> Self {
        Self {
            out,
            verbose,
            write_failed: false,
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }

    fn render(&mut self, event: &FeedEvent<'_>) -> io::Result<()> {
        let out = &mut self.out;
        match event {
            FeedEvent::Message {
                sequence, message, ..
            } => self.render_message(*sequence, message)?,
            FeedEvent::SessionChange {
                previous,
                current,
                sequence,
            } => writeln!(out, "SESSION CHANGE {previous} -> {current} at seq {sequence}")?,
            FeedEvent::Gap {
                session,
                expected,
                received,
                missing,
            } => writeln!(
                out,
                "GAP session={session} expected={expected} received={received} missing={missing}"
            )?,
            FeedEvent::Duplicate {
                session,
                expected,
                received,
            } => writeln!(
                out,
                "DUPLICATE session={session} expected={expected} received={received}"
            )?,
            FeedEvent::EndOfSession { session, sequence } => {
                writeln!(out, "END OF SESSION {session} at seq {sequence}")?
            }
            FeedEvent::FrameOverrun {
                session,
                sequence,
                skipped,
            } => writeln!(
                out,
                "MALFORMED session={session} seq={sequence} skipped={skipped}"
            )?,
            FeedEvent::SessionAcquired { session, sequence } => {
                writeln!(out, "session {session} (live seq {sequence})")?
            }
            FeedEvent::ChunkRequested {
                session,
                start,
                count,
            } => writeln!(out, "REQUEST session={session} seq={start} count={count}")?,
            FeedEvent::ReplyTimeout {
                start,
                count,
                attempt,
            } => writeln!(out, "TIMEOUT seq={start} count={count} attempt={attempt}")?,
            FeedEvent::ChunkFinished {
                start,
                requested,
                received,
            } => {
                if self.verbose {
                    writeln!(out, "chunk seq={start} requested={requested} received={received}")?
                }
            }
            FeedEvent::Stalled {
                sequence,
                remaining,
                bounded: true,
            } => writeln!(out, "STALLED at seq {sequence}, {remaining} messages not recovered")?,
            FeedEvent::Stalled { sequence, .. } => {
                writeln!(out, "END OF DATA at seq {sequence}")?
            }
            FeedEvent::CapReached { decoded } => {
                writeln!(out, "stopped after {decoded} messages")?
            }
        }
        Ok(())
    }

    fn render_message(&mut self, sequence: u64, message: &DecodedMessage<'_>) -> io::Result<()> {
        let out = &mut self.out;
        let len = message.bytes().len();
        let (Some(tag), Some(name)) = (message.type_tag(), message.name()) else {
            let tag = message.type_tag().map_or(String::from("none"), |t| format!("0x{t:02X}"));
            return writeln!(out, "[{sequence}] UNKNOWN type={tag} len={len}");
        };

        match message.status() {
            DecodeStatus::Truncated { field, .. } => writeln!(
                out,
                "[{sequence}] {} {name} len={len} TRUNCATED at field {field}",
                char::from(tag)
            )?,
            _ => writeln!(out, "[{sequence}] {} {name} len={len}", char::from(tag))?,
        }

        if self.verbose {
            for field in message.fields() {
                writeln!(out, "    {:<24} {}", field.spec.name, field.value)?;
            }
        }
        Ok(())
    }
}

impl<W: Write> FeedSink for ConsoleSink<W> {
    fn on_event(&mut self, event: &FeedEvent<'_>) {
        if let Err(e) = self.render(event) {
            // Only complain once; a closed stdout fails every write after.
            if !self.write_failed {
                tracing::warn!(error = %e, "failed to write output");
                self.write_failed = true;
            }
        }
    }
}
