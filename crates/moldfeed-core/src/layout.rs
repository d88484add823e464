//! Message layouts: the data-driven decode table.
//!
//! Each message type byte maps to an ordered list of fixed-size fields.
//! Field offsets are the running sum of the preceding sizes, computed once
//! when the layout is built and never touched again.
//!
//! Layouts are loaded from JSON:
//!
//! ```json
//! { "messages": [
//!   { "type": "S", "name": "System Event",
//!     "fields": [ { "name": "Message Type", "type": "char", "size": 1 },
//!                 { "name": "Timestamp", "type": "uint64", "size": 8 } ] } ] }
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Number of distinct type bytes, and the size of the lookup table.
pub const TYPE_SLOTS: usize = 256;

// ── Field kinds ───────────────────────────────────────────────────────────────

/// How a field's bytes are interpreted. Determines width and signedness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum FieldKind {
    Char,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int16,
    Int32,
    Int64,
    String,
    /// Raw bytes, rendered as uppercase hex. Also the fallback for any
    /// kind name we do not recognise.
    Binary,
}

impl FieldKind {
    /// Map a layout kind name to a kind. Case-insensitive; unknown names
    /// decode as binary.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "char" => Self::Char,
            "uint8" | "u8" => Self::UInt8,
            "uint16" | "u16" => Self::UInt16,
            "uint32" | "u32" => Self::UInt32,
            "uint64" | "u64" => Self::UInt64,
            "int16" | "i16" => Self::Int16,
            "int32" | "i32" => Self::Int32,
            "int64" | "i64" => Self::Int64,
            "string" | "alpha" => Self::String,
            _ => Self::Binary,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Char => "char",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::String => "string",
            Self::Binary => "binary",
        }
    }
}

impl From<String> for FieldKind {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

// ── Specs ─────────────────────────────────────────────────────────────────────

/// One field of a message layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub size: u32,
    /// Byte offset from the start of the message body.
    pub offset: u32,
}

impl FieldSpec {
    /// One past the last byte of this field.
    pub fn end(&self) -> usize {
        self.offset as usize + self.size as usize
    }
}

/// Layout of one message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSpec {
    pub type_tag: u8,
    pub name: String,
    /// Sum of all field sizes.
    pub total_length: u32,
    pub fields: Vec<FieldSpec>,
}

impl MessageSpec {
    /// Build a layout from `(name, kind, size)` triples in wire order.
    pub fn new<N, I>(type_tag: u8, name: impl Into<String>, fields: I) -> Result<Self, LayoutError>
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, FieldKind, u32)>,
    {
        let name = name.into();
        let mut offset: u32 = 0;
        let mut specs = Vec::new();

        for (field_name, kind, size) in fields {
            let field_name = field_name.into();
            if size == 0 {
                return Err(LayoutError::ZeroSizeField {
                    message: name,
                    field: field_name,
                });
            }
            let end = offset.checked_add(size).ok_or_else(|| LayoutError::TooLong {
                message: name.clone(),
            })?;
            specs.push(FieldSpec {
                name: field_name,
                kind,
                size,
                offset,
            });
            offset = end;
        }

        Ok(Self {
            type_tag,
            name,
            total_length: offset,
            fields: specs,
        })
    }
}

// ── Table ─────────────────────────────────────────────────────────────────────

/// Dense 256-slot table of layouts indexed by the raw type byte.
/// An empty slot means "unknown type".
#[derive(Debug, Clone)]
pub struct MessageTable {
    slots: Box<[Option<MessageSpec>; TYPE_SLOTS]>,
}

impl Default for MessageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageTable {
    pub fn new() -> Self {
        Self {
            slots: Box::new(std::array::from_fn(|_| None)),
        }
    }

    /// Add a layout. Each type byte may be defined once.
    pub fn insert(&mut self, spec: MessageSpec) -> Result<(), LayoutError> {
        let slot = &mut self.slots[usize::from(spec.type_tag)];
        if slot.is_some() {
            return Err(LayoutError::DuplicateType(spec.type_tag));
        }
        *slot = Some(spec);
        Ok(())
    }

    #[inline]
    pub fn get(&self, type_tag: u8) -> Option<&MessageSpec> {
        self.slots[usize::from(type_tag)].as_ref()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Defined layouts in type-byte order.
    pub fn iter(&self) -> impl Iterator<Item = &MessageSpec> {
        self.slots.iter().flatten()
    }

    /// Parse a JSON layout description.
    pub fn from_json(text: &str) -> Result<Self, LayoutError> {
        let file: LayoutFile = serde_json::from_str(text).map_err(LayoutError::Parse)?;
        let mut table = Self::new();

        for raw in file.messages {
            let tag = match raw.type_tag.as_bytes() {
                [b] => Some(*b),
                _ => None,
            };
            let Some(tag) = tag else {
                return Err(LayoutError::BadTypeTag {
                    message: raw.name,
                    tag: raw.type_tag,
                });
            };
            let fields = raw.fields.into_iter().map(|f| (f.name, f.kind, f.size));
            table.insert(MessageSpec::new(tag, raw.name, fields)?)?;
        }
        Ok(table)
    }

    /// Read and parse a JSON layout file.
    pub fn load(path: &Path) -> Result<Self, LayoutError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| LayoutError::ReadFailed(path.to_path_buf(), e))?;
        Self::from_json(&text)
    }
}

// ── JSON shape ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LayoutFile {
    messages: Vec<RawMessage>,
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    type_tag: String,
    name: String,
    #[serde(default)]
    fields: Vec<RawField>,
}

#[derive(Deserialize)]
struct RawField {
    name: String,
    #[serde(rename = "type")]
    kind: FieldKind,
    size: u32,
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("invalid layout JSON: {0}")]
    Parse(serde_json::Error),
    #[error("message '{message}' has type tag {tag:?}, expected exactly one byte")]
    BadTypeTag { message: String, tag: String },
    #[error("type byte 0x{0:02x} is defined more than once")]
    DuplicateType(u8),
    #[error("field '{field}' of message '{message}' has zero size")]
    ZeroSizeField { message: String, field: String },
    #[error("message '{message}' is longer than u32::MAX bytes")]
    TooLong { message: String },
}
