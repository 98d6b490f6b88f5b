//! Fixed-layout records of the IME extension protocol.
//!
//! Every request starts with the common 4-byte header (extension major
//! opcode, minor opcode, length in 4-byte units) and has a fixed size per
//! minor opcode. Replies are 32 bytes, with get-composition-string carrying
//! trailing payload padded to the transport's 4-byte atom. The notify event
//! occupies the leading 18 bytes of a 32-byte event record.
//!
//! All records are parsed and serialized with an explicit [`ByteOrder`], so
//! the server can talk to byte-swapped peers where the protocol permits it.

use bitflags::bitflags;

use crate::error::ProtocolError;

/// Name under which the extension is registered on the transport.
pub const EXTENSION_NAME: &str = "XIME";

pub const MAJOR_VERSION: u16 = 1;
pub const MINOR_VERSION: u16 = 0;
pub const PATCH_VERSION: u32 = 0;

/// Event number of the notify event, relative to the extension's event base.
pub const NOTIFY_EVENT: u8 = 0;
/// Number of events the extension registers.
pub const EVENT_COUNT: u8 = 1;
/// Number of extension-specific error codes.
pub const ERROR_COUNT: u8 = 3;

/// Opaque handle of a server-side IME context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u32);

impl ContextId {
    pub const fn from_raw(raw: u32) -> Self {
        ContextId(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

bitflags! {
    /// Event-interest mask carried by select-input.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventMask: u32 {
        const NOTIFY = 1 << 0;
    }
}

bitflags! {
    /// Composition sub-field selectors.
    ///
    /// Used both as the `index` of get-composition-string and as the update
    /// bitmask reported by the host IME. Only `COMP_STR`, `COMP_ATTR`,
    /// `CURSOR_POS` and `RESULT_STR` are stored by the server; the remaining
    /// bits are reserved by the protocol.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CompositionField: u32 {
        const COMP_READ_STR = 1;
        const COMP_READ_ATTR = 2;
        const COMP_READ_CLAUSE = 4;
        const COMP_STR = 8;
        const COMP_ATTR = 16;
        const COMP_CLAUSE = 32;
        const CURSOR_POS = 128;
        const DELTA_START = 256;
        const RESULT_READ_STR = 512;
        const RESULT_READ_CLAUSE = 1024;
        const RESULT_STR = 2048;
        const RESULT_CLAUSE = 4096;
    }
}

/// Placement style of the host's composition window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompositionStyle {
    #[default]
    Default,
    Rect,
    Point,
    ForcePosition,
}

impl CompositionStyle {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(CompositionStyle::Default),
            1 => Some(CompositionStyle::Rect),
            2 => Some(CompositionStyle::Point),
            32 => Some(CompositionStyle::ForcePosition),
            _ => None,
        }
    }

    pub const fn raw(self) -> u32 {
        match self {
            CompositionStyle::Default => 0,
            CompositionStyle::Rect => 1,
            CompositionStyle::Point => 2,
            CompositionStyle::ForcePosition => 32,
        }
    }
}

/// Discriminator of a notify event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyKind {
    OpenStatus,
    Composition,
    StartComposition,
    EndComposition,
}

impl NotifyKind {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(NotifyKind::OpenStatus),
            1 => Some(NotifyKind::Composition),
            2 => Some(NotifyKind::StartComposition),
            3 => Some(NotifyKind::EndComposition),
            _ => None,
        }
    }

    pub const fn raw(self) -> u8 {
        match self {
            NotifyKind::OpenStatus => 0,
            NotifyKind::Composition => 1,
            NotifyKind::StartComposition => 2,
            NotifyKind::EndComposition => 3,
        }
    }
}

/// Minor opcodes of the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    QueryVersion,
    SelectInput,
    CreateContext,
    SetOpenStatus,
    SetCompositionWindow,
    GetCompositionString,
    SetFocus,
    SetCompositionDraw,
    GetCursorPosition,
}

impl Opcode {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Opcode::QueryVersion),
            1 => Some(Opcode::SelectInput),
            2 => Some(Opcode::CreateContext),
            3 => Some(Opcode::SetOpenStatus),
            4 => Some(Opcode::SetCompositionWindow),
            5 => Some(Opcode::GetCompositionString),
            6 => Some(Opcode::SetFocus),
            7 => Some(Opcode::SetCompositionDraw),
            8 => Some(Opcode::GetCursorPosition),
            _ => None,
        }
    }

    pub const fn raw(self) -> u8 {
        match self {
            Opcode::QueryVersion => 0,
            Opcode::SelectInput => 1,
            Opcode::CreateContext => 2,
            Opcode::SetOpenStatus => 3,
            Opcode::SetCompositionWindow => 4,
            Opcode::GetCompositionString => 5,
            Opcode::SetFocus => 6,
            Opcode::SetCompositionDraw => 7,
            Opcode::GetCursorPosition => 8,
        }
    }

    /// Fixed on-the-wire request size in bytes, header included.
    pub const fn fixed_size(self) -> usize {
        match self {
            Opcode::QueryVersion => 4,
            Opcode::SelectInput => 8,
            Opcode::CreateContext => 4,
            Opcode::SetOpenStatus => 12,
            Opcode::SetCompositionWindow => 20,
            Opcode::GetCompositionString => 16,
            Opcode::SetFocus => 12,
            Opcode::SetCompositionDraw => 12,
            Opcode::GetCursorPosition => 8,
        }
    }
}

/// Byte order of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    /// The byte order of this process.
    pub const fn native() -> Self {
        if cfg!(target_endian = "little") {
            ByteOrder::LittleEndian
        } else {
            ByteOrder::BigEndian
        }
    }
}

fn put_u16(out: &mut Vec<u8>, value: u16, order: ByteOrder) {
    let bytes = match order {
        ByteOrder::LittleEndian => value.to_le_bytes(),
        ByteOrder::BigEndian => value.to_be_bytes(),
    };
    out.extend_from_slice(&bytes);
}

fn put_u32(out: &mut Vec<u8>, value: u32, order: ByteOrder) {
    let bytes = match order {
        ByteOrder::LittleEndian => value.to_le_bytes(),
        ByteOrder::BigEndian => value.to_be_bytes(),
    };
    out.extend_from_slice(&bytes);
}

fn put_i16(out: &mut Vec<u8>, value: i16, order: ByteOrder) {
    put_u16(out, value as u16, order);
}

/// Reads a `u16` at `offset`; the caller has checked the bounds.
pub(crate) fn get_u16(buf: &[u8], offset: usize, order: ByteOrder) -> u16 {
    let bytes = [buf[offset], buf[offset + 1]];
    match order {
        ByteOrder::LittleEndian => u16::from_le_bytes(bytes),
        ByteOrder::BigEndian => u16::from_be_bytes(bytes),
    }
}

pub(crate) fn get_u32(buf: &[u8], offset: usize, order: ByteOrder) -> u32 {
    let bytes = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
    match order {
        ByteOrder::LittleEndian => u32::from_le_bytes(bytes),
        ByteOrder::BigEndian => u32::from_be_bytes(bytes),
    }
}

fn get_i16(buf: &[u8], offset: usize, order: ByteOrder) -> i16 {
    get_u16(buf, offset, order) as i16
}

/// Rounds `len` up to the transport's 4-byte atom.
pub(crate) const fn pad4(len: usize) -> usize {
    (len + 3) & !3
}

/// A typed extension request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    QueryVersion,
    SelectInput {
        mask: EventMask,
    },
    CreateContext,
    SetOpenStatus {
        context: ContextId,
        state: bool,
    },
    SetCompositionWindow {
        context: ContextId,
        style: CompositionStyle,
        x: i16,
        y: i16,
        width: i16,
        height: i16,
    },
    GetCompositionString {
        context: ContextId,
        field: CompositionField,
    },
    SetFocus {
        context: ContextId,
        focus: bool,
    },
    SetCompositionDraw {
        context: ContextId,
        draw: bool,
    },
    GetCursorPosition {
        context: ContextId,
    },
}

impl Request {
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::QueryVersion => Opcode::QueryVersion,
            Request::SelectInput { .. } => Opcode::SelectInput,
            Request::CreateContext => Opcode::CreateContext,
            Request::SetOpenStatus { .. } => Opcode::SetOpenStatus,
            Request::SetCompositionWindow { .. } => Opcode::SetCompositionWindow,
            Request::GetCompositionString { .. } => Opcode::GetCompositionString,
            Request::SetFocus { .. } => Opcode::SetFocus,
            Request::SetCompositionDraw { .. } => Opcode::SetCompositionDraw,
            Request::GetCursorPosition { .. } => Opcode::GetCursorPosition,
        }
    }

    /// Serializes the request, header included.
    pub fn serialize(&self, major_opcode: u8, order: ByteOrder) -> Vec<u8> {
        let opcode = self.opcode();
        let size = opcode.fixed_size();
        let mut out = Vec::with_capacity(size);
        out.push(major_opcode);
        out.push(opcode.raw());
        put_u16(&mut out, (size / 4) as u16, order);
        match *self {
            Request::QueryVersion | Request::CreateContext => (),
            Request::SelectInput { mask } => put_u32(&mut out, mask.bits(), order),
            Request::SetOpenStatus { context, state } => {
                put_u32(&mut out, context.raw(), order);
                put_u32(&mut out, state as u32, order);
            },
            Request::SetCompositionWindow { context, style, x, y, width, height } => {
                // Style precedes the context on the wire.
                put_u32(&mut out, style.raw(), order);
                put_u32(&mut out, context.raw(), order);
                put_i16(&mut out, x, order);
                put_i16(&mut out, y, order);
                put_i16(&mut out, width, order);
                put_i16(&mut out, height, order);
            },
            Request::GetCompositionString { context, field } => {
                put_u32(&mut out, context.raw(), order);
                put_u32(&mut out, field.bits(), order);
                put_u32(&mut out, 0, order);
            },
            Request::SetFocus { context, focus } => {
                put_u32(&mut out, context.raw(), order);
                put_u32(&mut out, focus as u32, order);
            },
            Request::SetCompositionDraw { context, draw } => {
                put_u32(&mut out, context.raw(), order);
                put_u32(&mut out, draw as u32, order);
            },
            Request::GetCursorPosition { context } => put_u32(&mut out, context.raw(), order),
        }
        debug_assert_eq!(out.len(), size);
        out
    }

    /// Parses a raw request, validating its declared and actual size against
    /// the fixed size of its minor opcode.
    pub fn parse(buf: &[u8], order: ByteOrder) -> Result<Self, ProtocolError> {
        if buf.len() < 4 {
            return Err(ProtocolError::BadRequest(0));
        }
        let opcode = Opcode::from_raw(buf[1]).ok_or(ProtocolError::BadRequest(buf[1]))?;
        let declared = get_u16(buf, 2, order) as usize * 4;
        if declared != opcode.fixed_size() || buf.len() != opcode.fixed_size() {
            return Err(ProtocolError::Length(opcode));
        }

        let request = match opcode {
            Opcode::QueryVersion => Request::QueryVersion,
            Opcode::SelectInput => Request::SelectInput {
                mask: EventMask::from_bits_truncate(get_u32(buf, 4, order)),
            },
            Opcode::CreateContext => Request::CreateContext,
            Opcode::SetOpenStatus => Request::SetOpenStatus {
                context: ContextId::from_raw(get_u32(buf, 4, order)),
                state: get_u32(buf, 8, order) != 0,
            },
            Opcode::SetCompositionWindow => {
                let style = get_u32(buf, 4, order);
                Request::SetCompositionWindow {
                    style: CompositionStyle::from_raw(style)
                        .ok_or(ProtocolError::Value(style))?,
                    context: ContextId::from_raw(get_u32(buf, 8, order)),
                    x: get_i16(buf, 12, order),
                    y: get_i16(buf, 14, order),
                    width: get_i16(buf, 16, order),
                    height: get_i16(buf, 18, order),
                }
            },
            Opcode::GetCompositionString => Request::GetCompositionString {
                context: ContextId::from_raw(get_u32(buf, 4, order)),
                field: CompositionField::from_bits_retain(get_u32(buf, 8, order)),
            },
            Opcode::SetFocus => Request::SetFocus {
                context: ContextId::from_raw(get_u32(buf, 4, order)),
                focus: get_u32(buf, 8, order) != 0,
            },
            Opcode::SetCompositionDraw => Request::SetCompositionDraw {
                context: ContextId::from_raw(get_u32(buf, 4, order)),
                draw: get_u32(buf, 8, order) != 0,
            },
            Opcode::GetCursorPosition => Request::GetCursorPosition {
                context: ContextId::from_raw(get_u32(buf, 4, order)),
            },
        };

        Ok(request)
    }
}

/// A typed reply. Requests without a reply record produce none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    QueryVersion { major: u16, minor: u16, patch: u32 },
    CreateContext { context: ContextId },
    CompositionString { data: Vec<u8> },
    CursorPosition { context: ContextId, cursor: u32 },
}

impl Reply {
    /// Serializes the reply, 32-byte header plus padded payload.
    pub fn serialize(&self, sequence: u16, order: ByteOrder) -> Vec<u8> {
        let payload = match self {
            // strLength is 16-bit; clamp longer values so the declared and
            // actual payload sizes stay in step.
            Reply::CompositionString { data } => &data[..data.len().min(u16::MAX as usize)],
            _ => &[],
        };
        let mut out = Vec::with_capacity(32 + pad4(payload.len()));
        out.push(1); // Reply
        out.push(0);
        put_u16(&mut out, sequence, order);
        put_u32(&mut out, (pad4(payload.len()) / 4) as u32, order);
        match *self {
            Reply::QueryVersion { major, minor, patch } => {
                put_u16(&mut out, major, order);
                put_u16(&mut out, minor, order);
                put_u32(&mut out, patch, order);
            },
            Reply::CreateContext { context } => put_u32(&mut out, context.raw(), order),
            Reply::CompositionString { .. } => {
                put_u16(&mut out, payload.len() as u16, order);
            },
            Reply::CursorPosition { context, cursor } => {
                put_u32(&mut out, context.raw(), order);
                put_u32(&mut out, cursor, order);
            },
        }
        out.resize(32, 0);
        out.extend_from_slice(payload);
        out.resize(32 + pad4(payload.len()), 0);
        out
    }

    /// Parses the reply to `opcode` out of a full reply record.
    ///
    /// Returns `None` for a record that is too short or is not a reply.
    pub fn parse(opcode: Opcode, buf: &[u8], order: ByteOrder) -> Option<Self> {
        if buf.len() < 32 || buf[0] != 1 {
            return None;
        }
        match opcode {
            Opcode::QueryVersion => Some(Reply::QueryVersion {
                major: get_u16(buf, 8, order),
                minor: get_u16(buf, 10, order),
                patch: get_u32(buf, 12, order),
            }),
            Opcode::CreateContext => Some(Reply::CreateContext {
                context: ContextId::from_raw(get_u32(buf, 8, order)),
            }),
            Opcode::GetCompositionString => {
                let len = get_u16(buf, 8, order) as usize;
                if buf.len() < 32 + len {
                    return None;
                }
                Some(Reply::CompositionString { data: buf[32..32 + len].to_vec() })
            },
            Opcode::GetCursorPosition => Some(Reply::CursorPosition {
                context: ContextId::from_raw(get_u32(buf, 8, order)),
                cursor: get_u32(buf, 12, order),
            }),
            _ => None,
        }
    }
}

/// Serializes a protocol error into a 32-byte error record.
pub fn serialize_error(
    error: &ProtocolError,
    error_base: u8,
    major_opcode: u8,
    minor_opcode: u8,
    sequence: u16,
    order: ByteOrder,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    out.push(0); // Error
    out.push(error.error_code(error_base));
    put_u16(&mut out, sequence, order);
    let value = match *error {
        ProtocolError::UnknownContext(context) => context.raw(),
        ProtocolError::Value(value) => value,
        _ => 0,
    };
    put_u32(&mut out, value, order);
    put_u16(&mut out, minor_opcode as u16, order);
    out.push(major_opcode);
    out.resize(32, 0);
    out
}

/// The asynchronous notify event.
///
/// Occupies the leading 18 bytes of the transport's 32-byte event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyEvent {
    pub kind: NotifyKind,
    pub sequence: u16,
    pub context: ContextId,
    pub time: u32,
    pub arg: u32,
}

impl NotifyEvent {
    /// Serializes the event for a peer of the given byte order.
    pub fn serialize(&self, event_base: u8, order: ByteOrder) -> [u8; 32] {
        let mut out = Vec::with_capacity(32);
        out.push(event_base + NOTIFY_EVENT);
        out.push(self.kind.raw());
        put_u16(&mut out, self.sequence, order);
        put_u32(&mut out, self.context.raw(), order);
        put_u32(&mut out, self.time, order);
        put_u16(&mut out, 0, order);
        put_u32(&mut out, self.arg, order);
        out.resize(32, 0);
        let mut fixed = [0; 32];
        fixed.copy_from_slice(&out);
        fixed
    }

    /// Parses a notify event, checking the event code against the base.
    pub fn parse(buf: &[u8], event_base: u8, order: ByteOrder) -> Option<Self> {
        if buf.len() < 18 || buf[0] & 0x7f != event_base + NOTIFY_EVENT {
            return None;
        }
        Some(NotifyEvent {
            kind: NotifyKind::from_raw(buf[1])?,
            sequence: get_u16(buf, 2, order),
            context: ContextId::from_raw(get_u32(buf, 4, order)),
            time: get_u32(buf, 8, order),
            arg: get_u32(buf, 14, order),
        })
    }
}
