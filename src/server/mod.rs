//! The extension server: request dispatch, context store, event fanout.
//!
//! The embedding display server hands raw extension requests to
//! [`ImeServer::dispatch`] and feeds native IME activity into
//! [`ImeServer::handle_host_event`]. Both paths run under one lock; a
//! [`ServerHandle`] is shared between the embedder and the bridge worker.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::error::ProtocolError;
use crate::host::{
    CompositionWindow, Disposition, HostEvent, HostIme, SessionId,
};
use crate::wire::{
    ByteOrder, CompositionField, ContextId, NotifyEvent, NotifyKind, Reply, Request,
    MAJOR_VERSION, MINOR_VERSION, PATCH_VERSION,
};

pub mod context;
pub mod events;

pub use context::{Context, ContextStore};
pub use events::{ClientId, EventRegistry, EventSink};

/// Per-request description of the calling client.
#[derive(Debug, Clone, Copy)]
pub struct ClientInfo {
    pub id: ClientId,
    pub byte_order: ByteOrder,
    /// Sequence number of this request on the client's connection.
    pub sequence: u16,
}

impl ClientInfo {
    fn is_local(&self) -> bool {
        self.byte_order == ByteOrder::native()
    }
}

/// Shared, lock-guarded server state.
pub type ServerHandle = Arc<Mutex<ImeServer>>;

pub struct ImeServer {
    host: Box<dyn HostIme>,
    contexts: ContextStore,
    events: EventRegistry,
    enabled: bool,
}

impl ImeServer {
    pub fn new(host: Box<dyn HostIme>) -> Self {
        ImeServer {
            host,
            contexts: ContextStore::new(),
            events: EventRegistry::new(),
            enabled: true,
        }
    }

    pub fn into_shared(self) -> ServerHandle {
        Arc::new(Mutex::new(self))
    }

    /// Turns the extension off (or back on). While disabled only
    /// query-version is served.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn contexts(&self) -> &ContextStore {
        &self.contexts
    }

    /// Handles one raw extension request.
    ///
    /// `Ok(Some(bytes))` is a serialized reply for the client; `Ok(None)`
    /// means the request has no reply. An `Err` maps to a typed error reply
    /// and leaves all stores unchanged.
    ///
    /// `make_sink` is called at most once, when select-input installs a
    /// subscription for this client.
    pub fn dispatch(
        &mut self,
        client: &ClientInfo,
        buf: &[u8],
        make_sink: impl FnOnce() -> Box<dyn EventSink>,
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        let request = Request::parse(buf, client.byte_order)?;
        debug!(client = client.id.raw(), ?request, "dispatching");

        if matches!(request, Request::QueryVersion) {
            let reply = Reply::QueryVersion {
                major: MAJOR_VERSION,
                minor: MINOR_VERSION,
                patch: PATCH_VERSION,
            };
            return Ok(Some(reply.serialize(client.sequence, client.byte_order)));
        }
        if !self.enabled {
            return Err(ProtocolError::Disabled);
        }
        if !client.is_local() {
            return Err(ProtocolError::NotLocal);
        }

        match request {
            Request::QueryVersion => unreachable!("answered above"),
            Request::SelectInput { mask } => {
                if mask.is_empty() {
                    self.events.remove_client(client.id);
                } else {
                    self.events.select_input(client.id, mask, make_sink());
                }
                Ok(None)
            },
            Request::CreateContext => {
                let session = self.host.create_session().map_err(|err| {
                    warn!("host refused an IME session: {err}");
                    ProtocolError::Alloc
                })?;
                let context = self.contexts.insert(session)?;
                let reply = Reply::CreateContext { context };
                Ok(Some(reply.serialize(client.sequence, client.byte_order)))
            },
            Request::SetOpenStatus { context, state } => {
                let session = self.contexts.get(context)?.session();
                if let Err(err) = self.host.set_open_status(session, state) {
                    warn!(context = context.raw(), "set-open-status failed on the host: {err}");
                }
                Ok(None)
            },
            Request::SetCompositionWindow { context, style, x, y, width, height } => {
                let session = self.contexts.get(context)?.session();
                let window = CompositionWindow { style, x, y, width, height };
                if let Err(err) = self.host.set_composition_window(session, window) {
                    warn!(
                        context = context.raw(),
                        "set-composition-window failed on the host: {err}"
                    );
                }
                Ok(None)
            },
            Request::GetCompositionString { context, field } => {
                let data = self.contexts.get(context)?.field_bytes(field)?.to_vec();
                let reply = Reply::CompositionString { data };
                Ok(Some(reply.serialize(client.sequence, client.byte_order)))
            },
            Request::SetFocus { context, focus } => {
                let session = self.contexts.get(context)?.session();
                if let Err(err) = self.host.set_focus(session, focus) {
                    warn!(context = context.raw(), "set-focus failed on the host: {err}");
                }
                Ok(None)
            },
            Request::SetCompositionDraw { context, draw } => {
                self.contexts.get_mut(context)?.set_draw(draw);
                Ok(None)
            },
            Request::GetCursorPosition { context } => {
                let cursor = self.contexts.get(context)?.cursor();
                let reply = Reply::CursorPosition { context, cursor };
                Ok(Some(reply.serialize(client.sequence, client.byte_order)))
            },
        }
    }

    /// Reacts to one native IME event observed by the embedder.
    ///
    /// Caches updated composition values, fans a notify event out to
    /// subscribers and tells the embedder whether to suppress the host's
    /// default composition rendering.
    pub fn handle_host_event(
        &mut self,
        session: SessionId,
        event: HostEvent,
        time: u32,
    ) -> Disposition {
        let Some(context) = self.contexts.find_by_session(session) else {
            return Disposition::PassThrough;
        };

        match event {
            HostEvent::OpenStatus(open) => {
                self.notify(NotifyKind::OpenStatus, context, time, open as u32);
            },
            HostEvent::StartComposition => {
                self.notify(NotifyKind::StartComposition, context, time, 0);
            },
            HostEvent::EndComposition => {
                self.notify(NotifyKind::EndComposition, context, time, 0);
            },
            HostEvent::Composition(fields) => {
                // One notify per changed sub-field, in storage priority order.
                for field in self.cache_composition(session, fields) {
                    self.notify(NotifyKind::Composition, context, time, field.bits());
                }
            },
        }

        match event {
            // Toggling the IME is never swallowed.
            HostEvent::OpenStatus(_) => Disposition::PassThrough,
            _ => {
                let draw = self.contexts.get(context).map(Context::draw).unwrap_or(false);
                if draw {
                    Disposition::PassThrough
                } else {
                    Disposition::Consume
                }
            },
        }
    }

    fn notify(&mut self, kind: NotifyKind, context: ContextId, time: u32, arg: u32) {
        self.events.fan_out(&NotifyEvent { kind, sequence: 0, context, time, arg });
    }

    /// Pulls the updated sub-fields back from the host into the cache and
    /// returns which of the stored sub-fields were touched.
    fn cache_composition(
        &mut self,
        session: SessionId,
        fields: CompositionField,
    ) -> Vec<CompositionField> {
        const STORED: [CompositionField; 4] = [
            CompositionField::COMP_STR,
            CompositionField::CURSOR_POS,
            CompositionField::RESULT_STR,
            CompositionField::COMP_ATTR,
        ];
        let mut touched = Vec::new();
        for field in STORED {
            if !fields.contains(field) {
                continue;
            }
            touched.push(field);
            let value = match self.host.composition_value(session, field) {
                Ok(Some(value)) => value,
                Ok(None) => continue,
                Err(err) => {
                    warn!("reading composition field {field:?} from the host failed: {err}");
                    continue;
                },
            };
            let Some(context) = self.contexts.find_by_session(session) else { break };
            if let Ok(context) = self.contexts.get_mut(context) {
                context.store_value(field, value);
            }
        }
        touched
    }

    /// Destroys one context and its host session.
    pub fn destroy_context(&mut self, context: ContextId) {
        if let Some(session) = self.contexts.remove(context) {
            if let Err(err) = self.host.destroy_session(session) {
                warn!("destroying host session {} failed: {err}", session.raw());
            }
        }
    }

    /// Drops the client's event subscription. Called on disconnect.
    pub fn client_gone(&mut self, client: ClientId) {
        self.events.remove_client(client);
    }

    /// Extension reset: tears down every context and host session and drops
    /// all subscriptions.
    pub fn reset(&mut self) {
        for session in self.contexts.drain_sessions() {
            if let Err(err) = self.host.destroy_session(session) {
                warn!("destroying host session {} failed: {err}", session.raw());
            }
        }
        self.events.clear();
    }
}
