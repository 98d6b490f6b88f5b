//! Typed client stub for the extension.
//!
//! The stub speaks the extension wire format over a [`Transport`] and is what
//! the bridge worker uses to drive the server from its own connection. A
//! client always talks in its native byte order; swapping for a foreign
//! server is the transport's problem.

use crate::error::ClientError;
use crate::host::CompositionWindow;
use crate::wire::{
    ByteOrder, CompositionField, ContextId, EventMask, NotifyEvent, Reply, Request,
};

/// Blocking byte transport to one connection of the windowing server.
pub trait Transport {
    /// Major opcode the server assigned to the extension.
    fn major_opcode(&self) -> u8;

    /// First event code of the extension.
    fn event_base(&self) -> u8;

    /// Sends a request and blocks until its reply record (or error) arrives.
    fn request_with_reply(&mut self, buf: &[u8]) -> Result<Vec<u8>, ClientError>;

    /// Sends a request that has no reply.
    fn request(&mut self, buf: &[u8]) -> Result<(), ClientError>;
}

/// Extension version reported by query-version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub patch: u32,
}

/// One typed method per protocol request.
#[derive(Debug)]
pub struct ImeClient<T> {
    transport: T,
}

impl<T: Transport> ImeClient<T> {
    pub fn new(transport: T) -> Self {
        ImeClient { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn roundtrip(&mut self, request: Request) -> Result<Reply, ClientError> {
        let opcode = request.opcode();
        let buf = request.serialize(self.transport.major_opcode(), ByteOrder::native());
        let raw = self.transport.request_with_reply(&buf)?;
        if raw.first() == Some(&0) {
            return Err(ClientError::ErrorReply(raw.get(1).copied().unwrap_or(0)));
        }
        Reply::parse(opcode, &raw, ByteOrder::native()).ok_or(ClientError::MalformedReply)
    }

    fn send(&mut self, request: Request) -> Result<(), ClientError> {
        let buf = request.serialize(self.transport.major_opcode(), ByteOrder::native());
        self.transport.request(&buf)
    }

    pub fn query_version(&mut self) -> Result<Version, ClientError> {
        match self.roundtrip(Request::QueryVersion)? {
            Reply::QueryVersion { major, minor, patch } => Ok(Version { major, minor, patch }),
            _ => Err(ClientError::MalformedReply),
        }
    }

    pub fn select_input(&mut self, mask: EventMask) -> Result<(), ClientError> {
        self.send(Request::SelectInput { mask })
    }

    pub fn create_context(&mut self) -> Result<ContextId, ClientError> {
        match self.roundtrip(Request::CreateContext)? {
            Reply::CreateContext { context } => Ok(context),
            _ => Err(ClientError::MalformedReply),
        }
    }

    pub fn set_open_status(&mut self, context: ContextId, state: bool) -> Result<(), ClientError> {
        self.send(Request::SetOpenStatus { context, state })
    }

    pub fn set_composition_window(
        &mut self,
        context: ContextId,
        window: CompositionWindow,
    ) -> Result<(), ClientError> {
        self.send(Request::SetCompositionWindow {
            context,
            style: window.style,
            x: window.x,
            y: window.y,
            width: window.width,
            height: window.height,
        })
    }

    /// Fetches one stored composition sub-field, UTF-8 for the string fields.
    pub fn composition_string(
        &mut self,
        context: ContextId,
        field: CompositionField,
    ) -> Result<Vec<u8>, ClientError> {
        match self.roundtrip(Request::GetCompositionString { context, field })? {
            Reply::CompositionString { data } => Ok(data),
            _ => Err(ClientError::MalformedReply),
        }
    }

    pub fn set_focus(&mut self, context: ContextId, focus: bool) -> Result<(), ClientError> {
        self.send(Request::SetFocus { context, focus })
    }

    pub fn set_composition_draw(
        &mut self,
        context: ContextId,
        draw: bool,
    ) -> Result<(), ClientError> {
        self.send(Request::SetCompositionDraw { context, draw })
    }

    pub fn cursor_position(&mut self, context: ContextId) -> Result<u32, ClientError> {
        match self.roundtrip(Request::GetCursorPosition { context })? {
            Reply::CursorPosition { cursor, .. } => Ok(cursor),
            _ => Err(ClientError::MalformedReply),
        }
    }

    /// Decodes an event record into a notify event, if it is one.
    pub fn decode_event(&self, buf: &[u8]) -> Option<NotifyEvent> {
        NotifyEvent::parse(buf, self.transport.event_base(), ByteOrder::native())
    }
}
