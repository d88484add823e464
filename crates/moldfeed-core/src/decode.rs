//! Layout-driven message decoding.
//!
//! A message body is matched to its layout by its first byte and walked
//! field by field. Decoding borrows from the receive buffer and never
//! allocates; rendering to text happens only when a value is displayed.

use std::fmt;

use crate::layout::{FieldKind, FieldSpec, MessageSpec, MessageTable};
use crate::wire::FramedMessage;

// ── Values ────────────────────────────────────────────────────────────────────

/// A decoded field value, borrowing from the message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Char(char),
    Unsigned(u64),
    Signed(i64),
    /// Raw text bytes, exactly `size` long, nulls and padding included.
    Text(&'a [u8]),
    /// Raw bytes, displayed as uppercase hex.
    Binary(&'a [u8]),
}

impl fmt::Display for FieldValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Char(c) => write!(f, "{c}"),
            Self::Unsigned(v) => write!(f, "{v}"),
            Self::Signed(v) => write!(f, "{v}"),
            Self::Text(bytes) => match std::str::from_utf8(bytes) {
                Ok(s) => f.write_str(s),
                Err(_) => bytes.iter().try_for_each(|&b| write!(f, "{}", b as char)),
            },
            Self::Binary(bytes) => f.write_str(&hex::encode_upper(bytes)),
        }
    }
}

/// Big-endian unsigned value of up to the last eight bytes of `bytes`.
fn read_be(bytes: &[u8]) -> u64 {
    let tail = &bytes[bytes.len().saturating_sub(8)..];
    tail.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

/// Big-endian two's-complement value, sign-extended from the field width.
fn read_be_signed(bytes: &[u8]) -> i64 {
    let width = bytes.len().min(8);
    if width == 0 {
        return 0;
    }
    let shift = 64 - 8 * width as u32;
    ((read_be(bytes) << shift) as i64) >> shift
}

/// Decode one field's bytes according to its kind.
///
/// The width is whatever the layout says; a mismatch between `size` and
/// the kind's natural width is not checked.
pub fn decode_field(kind: FieldKind, bytes: &[u8]) -> FieldValue<'_> {
    match kind {
        FieldKind::Char => match bytes.first() {
            Some(&b) => FieldValue::Char(b as char),
            None => FieldValue::Binary(bytes),
        },
        FieldKind::UInt8 | FieldKind::UInt16 | FieldKind::UInt32 | FieldKind::UInt64 => {
            FieldValue::Unsigned(read_be(bytes))
        }
        FieldKind::Int16 | FieldKind::Int32 | FieldKind::Int64 => {
            FieldValue::Signed(read_be_signed(bytes))
        }
        FieldKind::String => FieldValue::Text(bytes),
        FieldKind::Binary => FieldValue::Binary(bytes),
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// Outcome of matching a message against the layout table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Every field fit inside the message.
    Complete,
    /// Field number `field` (and all after it) ran past the end of the
    /// message. Fields before it are still decoded.
    Truncated { field: usize, length: u16 },
    /// No layout for this type byte (or an empty body).
    Unknown,
}

/// A field paired with its decoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedField<'a> {
    pub spec: &'a FieldSpec,
    pub value: FieldValue<'a>,
}

/// A message matched against its layout. Fields are decoded lazily.
#[derive(Debug, Clone, Copy)]
pub struct DecodedMessage<'a> {
    bytes: &'a [u8],
    spec: Option<&'a MessageSpec>,
}

impl<'a> DecodedMessage<'a> {
    pub fn type_tag(&self) -> Option<u8> {
        self.bytes.first().copied()
    }

    pub fn spec(&self) -> Option<&'a MessageSpec> {
        self.spec
    }

    pub fn name(&self) -> Option<&'a str> {
        self.spec.map(|s| s.name.as_str())
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn status(&self) -> DecodeStatus {
        let Some(spec) = self.spec else {
            return DecodeStatus::Unknown;
        };
        match spec.fields.iter().position(|f| f.end() > self.bytes.len()) {
            Some(field) => DecodeStatus::Truncated {
                field,
                length: self.bytes.len() as u16,
            },
            None => DecodeStatus::Complete,
        }
    }

    /// Fields in declared order, stopping at the first one that does not fit.
    pub fn fields(&self) -> Fields<'a> {
        let specs: &'a [FieldSpec] = match self.spec {
            Some(spec) => &spec.fields,
            None => &[],
        };
        Fields {
            bytes: self.bytes,
            specs: specs.iter(),
        }
    }
}

/// Iterator over the decodable fields of a message.
#[derive(Debug, Clone)]
pub struct Fields<'a> {
    bytes: &'a [u8],
    specs: std::slice::Iter<'a, FieldSpec>,
}

impl<'a> Iterator for Fields<'a> {
    type Item = DecodedField<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let spec = self.specs.next()?;
        let Some(raw) = self.bytes.get(spec.offset as usize..spec.end()) else {
            // Truncated: nothing past this field is readable either.
            let done: &'a [FieldSpec] = &[];
            self.specs = done.iter();
            return None;
        };
        Some(DecodedField {
            spec,
            value: decode_field(spec.kind, raw),
        })
    }
}

/// Match a framed message to its layout.
///
/// Unknown types are still a valid result; the caller counts them as
/// processed without field output.
pub fn decode_message<'a>(msg: FramedMessage<'a>, table: &'a MessageTable) -> DecodedMessage<'a> {
    let spec = msg.type_tag().and_then(|tag| table.get(tag));
    DecodedMessage {
        bytes: msg.bytes(),
        spec,
    }
}
