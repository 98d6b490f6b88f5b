//! The bridge worker.
//!
//! A dedicated thread owns its own connection to the windowing server, the
//! IC attribute store and the registration with the input-method framework.
//! Everything it reacts to arrives over one channel: notify events decoded
//! from its connection and framework-driven requests. That channel is the
//! single serialization point; no bridge state is shared with other threads.

use std::error::Error;
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::client::{ImeClient, Transport};
use crate::error::{BridgeError, ClientError};
use crate::ic::{
    AttrName, AttrScope, IcId, IcStore, IcUpdate, InputStyle, SideEffect, FILTER_EVENTS,
    SUPPORTED_STYLES,
};
use crate::host::CompositionWindow;
use crate::wire::{CompositionField, ContextId, EventMask, NotifyEvent, NotifyKind};

pub mod feedback;

use feedback::{feedback_for_text, Feedback};

/// Connection attempts before the worker gives up on the server.
pub const CONNECT_RETRIES: u32 = 40;
/// Pause between connection attempts.
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(4);

/// Raw 32-byte key event record forwarded through the framework.
pub type RawKeyEvent = [u8; 32];

/// What the worker announces when registering as an input-method server.
#[derive(Debug, Clone)]
pub struct Registration {
    pub im_name: String,
    pub locales: String,
    pub styles: Vec<InputStyle>,
    pub filter_events: u32,
}

impl Default for Registration {
    fn default() -> Self {
        Registration {
            im_name: "XIME".into(),
            locales: "ja_JP,ko_KR,zh_CN,zh_HK,zh_SG,zh_TW".into(),
            styles: SUPPORTED_STYLES.to_vec(),
            filter_events: FILTER_EVENTS,
        }
    }
}

/// Window-hierarchy lookups for coordinate translation.
pub trait WindowTree: Send {
    /// Translates a point in `window`'s coordinate space into the space of
    /// its top-level ancestor. `None` when the walk fails; callers then use
    /// the untranslated point.
    fn translate_to_top_level(&mut self, window: u32, x: i16, y: i16) -> Option<(i16, i16)>;
}

/// One preedit-draw callback payload.
#[derive(Debug, Clone, Copy)]
pub struct PreeditDraw<'a> {
    pub caret: u32,
    pub chg_first: u32,
    /// Characters of previously drawn preedit to replace.
    pub chg_length: u32,
    pub text: &'a str,
    pub feedback: &'a [Feedback],
}

/// Callbacks into the input-method-server protocol library.
///
/// Text is UTF-8 here; transcoding to the transport encoding is the
/// implementation's concern.
pub trait ImFramework: Send {
    fn register(&mut self, registration: &Registration)
        -> Result<(), Box<dyn Error + Send + Sync>>;
    fn preedit_start(&mut self, ic: IcId);
    fn preedit_draw(&mut self, ic: IcId, draw: PreeditDraw<'_>);
    fn preedit_done(&mut self, ic: IcId);
    fn commit(&mut self, ic: IcId, text: &str);
    /// Passes a filtered key event on to the client it was withheld from.
    fn forward_key(&mut self, ic: IcId, event: &RawKeyEvent);
}

/// Framework-driven request, queued onto the worker channel.
#[derive(Debug)]
pub enum ImsRequest {
    CreateIc {
        owner: u16,
        update: IcUpdate,
        reply: Sender<Option<IcId>>,
    },
    SetIcValues {
        ic: IcId,
        owner: u16,
        update: IcUpdate,
    },
    GetIcValues {
        ic: IcId,
        queries: Vec<(AttrScope, AttrName)>,
        reply: Sender<Vec<Option<Vec<u8>>>>,
    },
    SetIcFocus {
        ic: IcId,
    },
    UnsetIcFocus {
        ic: IcId,
    },
    DestroyIc {
        ic: IcId,
    },
    ResetIc {
        ic: IcId,
    },
    ForwardEvent {
        ic: IcId,
        event: Box<RawKeyEvent>,
    },
}

/// Everything the worker loop consumes.
#[derive(Debug)]
pub enum BridgeMessage {
    Notify(NotifyEvent),
    Ims(ImsRequest),
    Shutdown,
}

pub struct BridgeWorker<T, F, W> {
    client: ImeClient<T>,
    framework: F,
    tree: W,
    ics: IcStore,
}

impl<T: Transport, F: ImFramework, W: WindowTree> BridgeWorker<T, F, W> {
    pub fn new(client: ImeClient<T>, framework: F, tree: W) -> Self {
        BridgeWorker { client, framework, tree, ics: IcStore::new() }
    }

    /// Verifies the extension, subscribes to notify events and registers
    /// with the framework.
    pub fn start(&mut self, registration: &Registration) -> Result<(), BridgeError> {
        let version = self.client.query_version().map_err(|err| match err {
            ClientError::ErrorReply(_) | ClientError::MalformedReply => {
                BridgeError::ExtensionMissing
            },
            err => BridgeError::Connect(err),
        })?;
        debug!(
            major = version.major,
            minor = version.minor,
            patch = version.patch,
            "IME extension present"
        );
        self.client.select_input(EventMask::NOTIFY).map_err(BridgeError::Connect)?;
        self.framework.register(registration).map_err(BridgeError::Register)?;
        Ok(())
    }

    /// Serves messages until shutdown or a fatal fault.
    pub fn run(&mut self, receiver: &Receiver<BridgeMessage>) -> Result<(), BridgeError> {
        loop {
            match receiver.recv() {
                Ok(BridgeMessage::Notify(event)) => self.handle_notify(&event)?,
                Ok(BridgeMessage::Ims(request)) => self.handle_request(request)?,
                Ok(BridgeMessage::Shutdown) => return Ok(()),
                Err(_) => return Err(BridgeError::ChannelClosed),
            }
        }
    }

    pub fn handle_request(&mut self, request: ImsRequest) -> Result<(), BridgeError> {
        match request {
            ImsRequest::CreateIc { owner, update, reply } => {
                let ic = match self.create_ic(owner, &update) {
                    Ok(ic) => Some(ic),
                    Err(err) => {
                        warn!("create-ic failed: {err}");
                        None
                    },
                };
                let _ = reply.send(ic);
            },
            ImsRequest::SetIcValues { ic, owner, update } => {
                let Some(record) = self.ics.get_mut(ic) else { return Ok(()) };
                record.set_owner(owner);
                let context = record.context();
                let effects = record.store(&update);
                self.apply_effects(context, &effects)?;
            },
            ImsRequest::GetIcValues { ic, queries, reply } => {
                let values = match self.ics.get(ic) {
                    Some(record) => queries
                        .iter()
                        .map(|(scope, name)| record.get_value(*scope, *name))
                        .collect(),
                    None => vec![None; queries.len()],
                };
                let _ = reply.send(values);
            },
            ImsRequest::SetIcFocus { ic } => {
                if let Some(record) = self.ics.get(ic) {
                    self.client.set_focus(record.context(), true)?;
                }
            },
            ImsRequest::UnsetIcFocus { ic } => {
                if let Some(record) = self.ics.get(ic) {
                    self.client.set_focus(record.context(), false)?;
                }
            },
            // The wire context and its host session outlive the IC; they are
            // torn down with the extension, not with the IC.
            ImsRequest::DestroyIc { ic } => {
                self.ics.remove(ic);
            },
            ImsRequest::ResetIc { ic } => {
                if let Some(record) = self.ics.get_mut(ic) {
                    record.set_visible_preedit(0);
                }
            },
            ImsRequest::ForwardEvent { ic, event } => {
                let Some(record) = self.ics.get_mut(ic) else { return Ok(()) };
                // Right after an IME toggle the first filtered key is the
                // toggle key itself; swallow it once.
                if record.take_toggled() {
                    debug!(ic = ic.raw(), "swallowing toggle key");
                } else {
                    self.framework.forward_key(ic, &event);
                }
            },
        }
        Ok(())
    }

    fn create_ic(&mut self, owner: u16, update: &IcUpdate) -> Result<IcId, BridgeError> {
        let context = self.client.create_context()?;
        let ic = self.ics.create(context, owner);
        debug!(ic = ic.raw(), context = context.raw(), "created input context");
        let effects = match self.ics.get_mut(ic) {
            Some(record) => record.store(update),
            None => Vec::new(),
        };
        self.apply_effects(context, &effects)?;
        Ok(ic)
    }

    fn apply_effects(
        &mut self,
        context: ContextId,
        effects: &[SideEffect],
    ) -> Result<(), BridgeError> {
        for effect in effects {
            match *effect {
                SideEffect::SetDraw(draw) => {
                    self.client.set_composition_draw(context, draw)?;
                },
                SideEffect::MoveWindow { style, anchor, x, y, width, height } => {
                    let (x, y) = match anchor {
                        Some(window) => {
                            self.tree.translate_to_top_level(window, x, y).unwrap_or((x, y))
                        },
                        None => (x, y),
                    };
                    self.client.set_composition_window(
                        context,
                        CompositionWindow { style, x, y, width, height },
                    )?;
                },
            }
        }
        Ok(())
    }

    /// Reacts to one notify event from the worker's connection.
    pub fn handle_notify(&mut self, event: &NotifyEvent) -> Result<(), BridgeError> {
        let Some(ic) = self.ics.find_by_context(event.context) else {
            debug!(context = event.context.raw(), "notify for a context with no IC");
            return Ok(());
        };

        match event.kind {
            NotifyKind::OpenStatus => {
                if let Some(record) = self.ics.get_mut(ic) {
                    record.mark_toggled();
                }
                self.framework.preedit_start(ic);
            },
            NotifyKind::StartComposition => self.framework.preedit_start(ic),
            NotifyKind::EndComposition => {
                self.clear_preedit(ic);
                self.framework.preedit_done(ic);
            },
            NotifyKind::Composition => {
                let fields = CompositionField::from_bits_retain(event.arg);
                self.handle_composition(ic, event.context, fields)?;
            },
        }
        Ok(())
    }

    fn handle_composition(
        &mut self,
        ic: IcId,
        context: ContextId,
        fields: CompositionField,
    ) -> Result<(), BridgeError> {
        if fields.contains(CompositionField::COMP_STR) {
            if let Some(text) = self.fetch(context, CompositionField::COMP_STR)? {
                let text = String::from_utf8_lossy(&text).into_owned();
                if !text.is_empty() {
                    let attrs = self
                        .fetch(context, CompositionField::COMP_ATTR)?
                        .unwrap_or_default();
                    let caret = match self.client.cursor_position(context) {
                        Ok(caret) => caret,
                        Err(ClientError::ErrorReply(_)) => 0,
                        Err(err) => return Err(err.into()),
                    };
                    let feedback = feedback_for_text(&text, &attrs);
                    let visible =
                        self.ics.get(ic).map(|record| record.visible_preedit()).unwrap_or(0);
                    self.framework.preedit_draw(
                        ic,
                        PreeditDraw {
                            caret,
                            chg_first: 0,
                            chg_length: visible as u32,
                            text: &text,
                            feedback: &feedback,
                        },
                    );
                    if let Some(record) = self.ics.get_mut(ic) {
                        record.set_visible_preedit(text.chars().count());
                    }
                }
            }
        }

        if fields.contains(CompositionField::RESULT_STR) {
            if let Some(result) = self.fetch(context, CompositionField::RESULT_STR)? {
                let result = String::from_utf8_lossy(&result);
                if !result.is_empty() {
                    self.framework.commit(ic, &result);
                    self.clear_preedit(ic);
                }
            }
        }

        Ok(())
    }

    /// Erases preedit text drawn through callbacks, if any.
    fn clear_preedit(&mut self, ic: IcId) {
        let visible = self.ics.get(ic).map(|record| record.visible_preedit()).unwrap_or(0);
        if visible == 0 {
            return;
        }
        self.framework.preedit_draw(
            ic,
            PreeditDraw {
                caret: 0,
                chg_first: 0,
                chg_length: visible as u32,
                text: "",
                feedback: &[],
            },
        );
        if let Some(record) = self.ics.get_mut(ic) {
            record.set_visible_preedit(0);
        }
    }

    /// Reads one sub-field over the wire; a typed error reply (nothing
    /// stored yet) is not a fault.
    fn fetch(
        &mut self,
        context: ContextId,
        field: CompositionField,
    ) -> Result<Option<Vec<u8>>, BridgeError> {
        match self.client.composition_string(context, field) {
            Ok(data) => Ok(Some(data)),
            Err(ClientError::ErrorReply(code)) => {
                debug!(context = context.raw(), code, "sub-field {field:?} not available");
                Ok(None)
            },
            Err(err) => Err(err.into()),
        }
    }
}

/// Running worker thread plus the sender that feeds it.
pub struct BridgeHandle {
    sender: Sender<BridgeMessage>,
    thread: JoinHandle<Result<(), BridgeError>>,
}

impl BridgeHandle {
    pub fn sender(&self) -> &Sender<BridgeMessage> {
        &self.sender
    }

    /// Asks the worker to stop and waits for it.
    pub fn shutdown(self) -> Result<(), BridgeError> {
        let _ = self.sender.send(BridgeMessage::Shutdown);
        self.thread.join().unwrap_or(Err(BridgeError::ChannelClosed))
    }
}

/// Starts the worker on its own thread.
pub fn spawn<T, F, W>(
    mut worker: BridgeWorker<T, F, W>,
    registration: Registration,
) -> io::Result<BridgeHandle>
where
    T: Transport + Send + 'static,
    F: ImFramework + 'static,
    W: WindowTree + 'static,
{
    let (sender, receiver) = mpsc::channel();
    let thread = thread::Builder::new().name("xime-bridge".into()).spawn(move || {
        worker.start(&registration)?;
        worker.run(&receiver)
    })?;
    Ok(BridgeHandle { sender, thread })
}
