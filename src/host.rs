//! Seam to the host platform's native IME.
//!
//! The server never talks to the platform directly; it drives an object
//! implementing [`HostIme`] and reacts to the events the embedder feeds back
//! through [`HostEvent`]. Host-provided text is UTF-16 and is converted
//! lossily before it is stored or put on the wire.

use std::{error, fmt};

use crate::wire::{CompositionField, CompositionStyle};

/// Handle of one native IME session owned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u32);

impl SessionId {
    pub const fn from_raw(raw: u32) -> Self {
        SessionId(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Placement of the native composition window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositionWindow {
    pub style: CompositionStyle,
    pub x: i16,
    pub y: i16,
    pub width: i16,
    pub height: i16,
}

impl CompositionWindow {
    /// The host-chosen default placement.
    pub const DEFAULT: Self = CompositionWindow {
        style: CompositionStyle::Default,
        x: 0,
        y: 0,
        width: 0,
        height: 0,
    };
}

/// One value read back from the host for a composition sub-field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositionValue {
    /// UTF-16 text of the current or result string.
    Text(Vec<u16>),
    /// Per-character attribute bytes.
    Attributes(Vec<u8>),
    /// Caret position within the composition string.
    Cursor(u32),
}

/// Failure of a host IME call.
#[derive(Debug)]
pub enum HostError {
    /// The session handle is not alive on the host side.
    UnknownSession(SessionId),
    /// The platform call itself failed.
    Platform(Box<dyn error::Error + Send + Sync>),
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostError::UnknownSession(session) => {
                write!(f, "host IME session {} is gone", session.raw())
            },
            HostError::Platform(err) => write!(f, "host IME call failed: {err}"),
        }
    }
}

impl error::Error for HostError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            HostError::Platform(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

/// Capability surface of the native IME, implemented by the embedder.
pub trait HostIme: Send {
    /// Opens a native IME session and returns its handle.
    fn create_session(&mut self) -> Result<SessionId, HostError>;

    /// Tears the session down on the host side.
    fn destroy_session(&mut self, session: SessionId) -> Result<(), HostError>;

    /// Whether the native IME is currently open for this session.
    fn open_status(&mut self, session: SessionId) -> Result<bool, HostError>;

    /// Opens or closes the native IME.
    fn set_open_status(&mut self, session: SessionId, open: bool) -> Result<(), HostError>;

    /// Moves the native composition window.
    fn set_composition_window(
        &mut self,
        session: SessionId,
        window: CompositionWindow,
    ) -> Result<(), HostError>;

    /// Reads one composition sub-field back from the host.
    ///
    /// `Ok(None)` means the host has no value for the field right now.
    fn composition_value(
        &mut self,
        session: SessionId,
        field: CompositionField,
    ) -> Result<Option<CompositionValue>, HostError>;

    /// Associates or dissociates keyboard focus with the session.
    fn set_focus(&mut self, session: SessionId, focus: bool) -> Result<(), HostError>;
}

/// A native IME event the embedder observed for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    /// The IME was toggled; carries the new open state.
    OpenStatus(bool),
    /// The composition changed; the mask names the updated sub-fields.
    Composition(CompositionField),
    StartComposition,
    EndComposition,
}

/// What the embedder should do with the native event after the server has
/// processed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Suppress the host's default composition rendering.
    Consume,
    /// Let the host perform its default handling.
    PassThrough,
}

/// Lossy UTF-16 → UTF-8 conversion for host-provided text.
pub(crate) fn utf16_to_utf8_lossy(units: &[u16]) -> Vec<u8> {
    String::from_utf16_lossy(units).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_text_conversion_is_lossy_not_fatal() {
        assert_eq!(utf16_to_utf8_lossy(&[0x65e5, 0x672c]), "日本".as_bytes());
        // An unpaired surrogate becomes the replacement character.
        let converted = utf16_to_utf8_lossy(&[0xd800, 0x0041]);
        assert_eq!(String::from_utf8(converted).unwrap(), "\u{fffd}A");
    }
}
