//! MoldUDP64 wire format: packet header, message framing, rerequests.
//!
//! These types ARE the protocol. A downstream packet is a 20-byte header
//! (10-byte session, 8-byte sequence number, 2-byte message count) followed
//! by `message_count` frames of `{2-byte length, body}`. All integers are
//! big-endian.
//!
//! Fixed-layout structures use zerocopy derives with explicit big-endian
//! field types, so the byte order never depends on the host. There is no
//! unsafe code in this module.

use std::fmt;
use std::str::FromStr;

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U16, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Session token length in bytes.
pub const SESSION_LEN: usize = 10;

/// Downstream packet header length: session + sequence + count.
pub const HEADER_LEN: usize = 20;

/// Length of the big-endian prefix in front of every message frame.
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Message count value marking the end of a session. Carries no messages.
pub const END_OF_SESSION: u16 = 0xFFFF;

/// Largest UDP payload we will ever receive into a scratch buffer.
pub const MAX_DATAGRAM: usize = 64 * 1024;

// ── Session ───────────────────────────────────────────────────────────────────

/// Opaque 10-byte session token.
///
/// Compared by exact byte equality. The bytes are not required to be valid
/// text; `Display` renders printable ASCII verbatim and escapes the rest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SessionId(pub [u8; SESSION_LEN]);

impl SessionId {
    pub const fn new(bytes: [u8; SESSION_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_LEN] {
        &self.0
    }
}

impl From<[u8; SESSION_LEN]> for SessionId {
    fn from(bytes: [u8; SESSION_LEN]) -> Self {
        Self(bytes)
    }
}

impl FromStr for SessionId {
    type Err = WireError;

    /// Parse a session token from exactly ten bytes of text.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; SESSION_LEN] = s
            .as_bytes()
            .try_into()
            .map_err(|_| WireError::SessionLength(s.len()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b == b' ' || b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02X}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId(\"{}\")", self)
    }
}

// ── Packet Header ─────────────────────────────────────────────────────────────

/// On-wire MoldUDP64 downstream header.
///
/// Wire size: 20 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct MoldHeader {
    /// Raw session token. No trimming, no encoding validation.
    pub session: [u8; SESSION_LEN],

    /// Sequence number of the first message in the packet.
    pub sequence: U64<BigEndian>,

    /// Number of message frames that follow. 0 = heartbeat,
    /// 0xFFFF = end of session.
    pub count: U16<BigEndian>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(MoldHeader, [u8; HEADER_LEN]);

/// Parsed packet header. Immutable once parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub session: SessionId,
    pub sequence_number: u64,
    pub message_count: u16,
}

impl PacketHeader {
    /// Parse the header at the front of a datagram.
    pub fn parse(packet: &[u8]) -> Result<Self, WireError> {
        let raw = MoldHeader::read_from_prefix(packet)
            .ok_or(WireError::ShortHeader(packet.len()))?;
        Ok(Self {
            session: SessionId(raw.session),
            sequence_number: raw.sequence.get(),
            message_count: raw.count.get(),
        })
    }

    pub fn is_heartbeat(&self) -> bool {
        self.message_count == 0
    }

    pub fn is_end_of_session(&self) -> bool {
        self.message_count == END_OF_SESSION
    }

    /// Number of message frames physically present in the packet.
    pub fn frame_count(&self) -> u16 {
        if self.is_end_of_session() {
            0
        } else {
            self.message_count
        }
    }

    /// Sequence number the next packet of this session should start at.
    pub fn next_sequence(&self) -> u64 {
        self.sequence_number
            .saturating_add(u64::from(self.frame_count()))
    }

    pub fn to_wire(&self) -> MoldHeader {
        MoldHeader {
            session: self.session.0,
            sequence: U64::new(self.sequence_number),
            count: U16::new(self.message_count),
        }
    }
}

/// Parse the MoldUDP64 header of `packet`. Fails if fewer than 20 bytes.
pub fn parse_header(packet: &[u8]) -> Result<PacketHeader, WireError> {
    PacketHeader::parse(packet)
}

// ── Message Framing ───────────────────────────────────────────────────────────

/// One message frame, borrowed from the enclosing packet buffer.
///
/// Never copied; valid only while the receive buffer that produced it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramedMessage<'a> {
    bytes: &'a [u8],
}

impl<'a> FramedMessage<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Declared frame length. Frames never exceed `u16::MAX` bytes.
    pub fn len(&self) -> u16 {
        self.bytes.len() as u16
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// First byte of the body, which selects the message layout.
    pub fn type_tag(&self) -> Option<u8> {
        self.bytes.first().copied()
    }
}

/// Iteration state over the frames of one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCursor {
    pub offset: usize,
    pub remaining: u16,
}

impl FrameCursor {
    /// Cursor positioned at the first frame after the header.
    pub fn new(header: &PacketHeader) -> Self {
        Self {
            offset: HEADER_LEN,
            remaining: header.frame_count(),
        }
    }
}

/// Yield the next frame and advance the cursor.
///
/// Returns `Ok(None)` once `remaining` hits zero. A length prefix that would
/// read past the end of the packet is an error and leaves the cursor as is.
/// Frame lengths are not checked against any message layout here.
pub fn next_message<'a>(
    packet: &'a [u8],
    cursor: &mut FrameCursor,
) -> Result<Option<FramedMessage<'a>>, WireError> {
    if cursor.remaining == 0 {
        return Ok(None);
    }

    let body_start = cursor.offset + LENGTH_PREFIX_LEN;
    let prefix = packet
        .get(cursor.offset..body_start)
        .ok_or(WireError::TruncatedLengthPrefix {
            offset: cursor.offset,
        })?;
    let declared = usize::from(u16::from_be_bytes([prefix[0], prefix[1]]));

    let body_end = body_start + declared;
    let bytes = packet
        .get(body_start..body_end)
        .ok_or(WireError::FrameOverrun {
            offset: cursor.offset,
            declared,
            available: packet.len().saturating_sub(body_start),
        })?;

    cursor.offset = body_end;
    cursor.remaining -= 1;
    Ok(Some(FramedMessage { bytes }))
}

/// Iterator over the frames of a packet.
///
/// Stops early, without panicking, at the first malformed frame; the
/// failure is kept and available from [`Frames::overrun`].
#[derive(Debug)]
pub struct Frames<'a> {
    packet: &'a [u8],
    cursor: FrameCursor,
    overrun: Option<WireError>,
}

impl<'a> Frames<'a> {
    pub fn new(packet: &'a [u8], header: &PacketHeader) -> Self {
        Self {
            packet,
            cursor: FrameCursor::new(header),
            overrun: None,
        }
    }

    /// Why iteration stopped early, if it did.
    pub fn overrun(&self) -> Option<&WireError> {
        self.overrun.as_ref()
    }

    /// Frames not yet yielded (including any lost to an overrun).
    pub fn remaining(&self) -> u16 {
        self.cursor.remaining
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = FramedMessage<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.overrun.is_some() {
            return None;
        }
        match next_message(self.packet, &mut self.cursor) {
            Ok(frame) => frame,
            Err(e) => {
                self.overrun = Some(e);
                None
            }
        }
    }
}

// ── Rerequest ─────────────────────────────────────────────────────────────────

/// Unicast retransmission request sent to the rerequest server.
///
/// Same layout as the downstream header: the server answers with ordinary
/// MoldUDP64 packets starting at `sequence`.
///
/// Wire size: 20 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct RerequestPacket {
    /// Raw session token, not text-padded.
    pub session: [u8; SESSION_LEN],
    /// First sequence number requested.
    pub sequence: U64<BigEndian>,
    /// Number of messages requested.
    pub count: U16<BigEndian>,
}

assert_eq_size!(RerequestPacket, [u8; HEADER_LEN]);

impl RerequestPacket {
    pub fn new(session: SessionId, sequence: u64, count: u16) -> Self {
        Self {
            session: session.0,
            sequence: U64::new(sequence),
            count: U16::new(count),
        }
    }

    /// Decode a rerequest datagram. It must be exactly 20 bytes.
    pub fn parse(datagram: &[u8]) -> Result<Self, WireError> {
        if datagram.len() != HEADER_LEN {
            return Err(WireError::RerequestLength(datagram.len()));
        }
        Self::read_from(datagram).ok_or(WireError::RerequestLength(datagram.len()))
    }

    pub fn session(&self) -> SessionId {
        SessionId(self.session)
    }

    pub fn start_sequence(&self) -> u64 {
        self.sequence.get()
    }

    pub fn message_count(&self) -> u16 {
        self.count.get()
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Build a downstream packet carrying `messages`, first one at `sequence`.
pub fn encode_packet(
    session: SessionId,
    sequence: u64,
    messages: &[&[u8]],
) -> Result<Vec<u8>, WireError> {
    let count = u16::try_from(messages.len())
        .ok()
        .filter(|&c| c != END_OF_SESSION)
        .ok_or(WireError::TooManyMessages(messages.len()))?;

    let body: usize = messages.iter().map(|m| LENGTH_PREFIX_LEN + m.len()).sum();
    let mut packet = Vec::with_capacity(HEADER_LEN + body);

    let header = PacketHeader {
        session,
        sequence_number: sequence,
        message_count: count,
    };
    packet.extend_from_slice(header.to_wire().as_bytes());

    for message in messages {
        let len = u16::try_from(message.len())
            .map_err(|_| WireError::MessageTooLong(message.len()))?;
        packet.extend_from_slice(&len.to_be_bytes());
        packet.extend_from_slice(message);
    }
    Ok(packet)
}

/// Build an end-of-session packet. `sequence` is the next expected number.
pub fn encode_end_of_session(session: SessionId, sequence: u64) -> Vec<u8> {
    let header = PacketHeader {
        session,
        sequence_number: sequence,
        message_count: END_OF_SESSION,
    };
    header.to_wire().as_bytes().to_vec()
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("packet of {0} bytes is shorter than the {}-byte header", HEADER_LEN)]
    ShortHeader(usize),

    #[error("length prefix at offset {offset} runs past the end of the packet")]
    TruncatedLengthPrefix { offset: usize },

    #[error("frame at offset {offset} declares {declared} bytes, only {available} remain")]
    FrameOverrun {
        offset: usize,
        declared: usize,
        available: usize,
    },

    #[error("rerequest must be {} bytes, got {0}", HEADER_LEN)]
    RerequestLength(usize),

    #[error("session token must be {} bytes, got {0}", SESSION_LEN)]
    SessionLength(usize),

    #[error("{0} messages do not fit in one packet")]
    TooManyMessages(usize),

    #[error("message of {0} bytes exceeds the 65535-byte frame limit")]
    MessageTooLong(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
