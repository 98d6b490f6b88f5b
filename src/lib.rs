//! Bridge between the X input-method framework and a host platform's
//! native IME.
//!
//! The crate has two halves joined by a small custom X extension:
//!
//! - The **server** half ([`server`]) lives inside the display server. It
//!   dispatches the extension's requests, keeps one context per native IME
//!   session, caches the composition values the host reports and fans
//!   notify events out to subscribed clients. The native IME itself sits
//!   behind the [`host::HostIme`] trait.
//! - The **worker** half ([`bridge`]) runs an in-process input-method
//!   server on its own thread with its own connection. It reacts to notify
//!   events by pulling composition state over the wire ([`client`]) and
//!   turning it into preedit and commit callbacks on an
//!   [`bridge::ImFramework`] implementation.
//!
//! [`wire`] defines the protocol records both halves share; [`x11`] holds
//! the x11rb-backed adapters for the client-side seams.

pub mod bridge;
pub mod client;
pub mod error;
pub mod host;
pub mod ic;
pub mod server;
pub mod wire;
pub mod x11;

pub use bridge::{
    spawn, BridgeHandle, BridgeMessage, BridgeWorker, ImFramework, ImsRequest, PreeditDraw,
    Registration, WindowTree,
};
pub use client::{ImeClient, Transport, Version};
pub use error::{BridgeError, ClientError, ProtocolError};
pub use host::{
    CompositionValue, CompositionWindow, Disposition, HostEvent, HostIme, SessionId,
};
pub use server::{ClientId, ClientInfo, EventSink, ImeServer, ServerHandle};
pub use wire::{
    CompositionField, CompositionStyle, ContextId, EventMask, NotifyEvent, NotifyKind,
};
