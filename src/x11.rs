//! x11rb adapters for the client-side seams.
//!
//! [`X11Transport`] speaks the extension over any x11rb connection and
//! [`X11WindowTree`] resolves top-level ancestors for coordinate
//! translation. Both are thin; the protocol logic lives in [`crate::client`]
//! and [`crate::bridge`].

use std::io::IoSlice;
use std::thread;

use tracing::{debug, warn};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::errors::{ParseError, ReplyError};
use x11rb::protocol::xproto::ConnectionExt as _;
use x11rb::rust_connection::RustConnection;
use x11rb::utils::RawFdContainer;
use x11rb::x11_utils::TryParse;

use crate::bridge::{WindowTree, CONNECT_RETRIES, CONNECT_RETRY_DELAY};
use crate::client::Transport;
use crate::error::{BridgeError, ClientError};
use crate::wire::EXTENSION_NAME;

/// Captures a reply's raw bytes instead of parsing a generated structure.
struct RawReply(Vec<u8>);

impl TryParse for RawReply {
    fn try_parse(remaining: &[u8]) -> Result<(Self, &[u8]), ParseError> {
        Ok((RawReply(remaining.to_vec()), &[]))
    }
}

/// Extension transport over an x11rb connection.
pub struct X11Transport<'c, C> {
    conn: &'c C,
    major_opcode: u8,
    event_base: u8,
}

impl<'c, C: RequestConnection> X11Transport<'c, C> {
    /// Looks the extension up on the connection.
    ///
    /// `Ok(None)` when the server does not advertise it.
    pub fn new(conn: &'c C) -> Result<Option<Self>, ClientError> {
        let info = conn
            .extension_information(EXTENSION_NAME)
            .map_err(ClientError::transport)?;
        Ok(info.map(|info| {
            debug!(
                major_opcode = info.major_opcode,
                first_event = info.first_event,
                "extension present"
            );
            X11Transport {
                conn,
                major_opcode: info.major_opcode,
                event_base: info.first_event,
            }
        }))
    }
}

impl<C: RequestConnection> Transport for X11Transport<'_, C> {
    fn major_opcode(&self) -> u8 {
        self.major_opcode
    }

    fn event_base(&self) -> u8 {
        self.event_base
    }

    fn request_with_reply(&mut self, buf: &[u8]) -> Result<Vec<u8>, ClientError> {
        let cookie = self
            .conn
            .send_request_with_reply::<RawReply>(
                &[IoSlice::new(buf)],
                Vec::<RawFdContainer>::new(),
            )
            .map_err(ClientError::transport)?;
        match cookie.reply() {
            Ok(reply) => Ok(reply.0),
            Err(ReplyError::X11Error(err)) => Err(ClientError::ErrorReply(err.error_code)),
            Err(ReplyError::ConnectionError(err)) => Err(ClientError::transport(err)),
        }
    }

    fn request(&mut self, buf: &[u8]) -> Result<(), ClientError> {
        self.conn
            .send_request_without_reply(&[IoSlice::new(buf)], Vec::<RawFdContainer>::new())
            .map_err(ClientError::transport)?
            .ignore_error();
        Ok(())
    }
}

/// Window-hierarchy lookups over an x11rb connection.
pub struct X11WindowTree<'c, C> {
    conn: &'c C,
}

impl<'c, C: Connection> X11WindowTree<'c, C> {
    pub fn new(conn: &'c C) -> Self {
        X11WindowTree { conn }
    }

    fn top_level(&self, window: u32) -> Option<u32> {
        let mut current = window;
        loop {
            let tree = self.conn.query_tree(current).ok()?.reply().ok()?;
            if tree.parent == tree.root {
                return Some(current);
            }
            current = tree.parent;
        }
    }
}

impl<C: Connection + Send + Sync> WindowTree for X11WindowTree<'_, C> {
    fn translate_to_top_level(&mut self, window: u32, x: i16, y: i16) -> Option<(i16, i16)> {
        let top = self.top_level(window)?;
        let reply = self
            .conn
            .translate_coordinates(window, top, x, y)
            .ok()?
            .reply()
            .ok()?;
        Some((reply.dst_x, reply.dst_y))
    }
}

/// Opens the worker's own connection, retrying while the server comes up.
pub fn connect(display: Option<&str>) -> Result<(RustConnection, usize), BridgeError> {
    let mut attempt = 0;
    loop {
        match x11rb::connect(display) {
            Ok(connected) => return Ok(connected),
            Err(err) if attempt + 1 < CONNECT_RETRIES => {
                attempt += 1;
                warn!(attempt, "server not reachable yet: {err}");
                thread::sleep(CONNECT_RETRY_DELAY);
            },
            Err(err) => {
                return Err(BridgeError::Connect(ClientError::transport(err)));
            },
        }
    }
}
