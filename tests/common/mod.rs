//! Shared in-memory fixtures: a loopback transport that feeds the worker's
//! requests straight into an [`ImeServer`], a scripted host IME and a
//! recording framework.

#![allow(dead_code)]

use std::error::Error;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

use xime::bridge::{
    BridgeMessage, ImFramework, PreeditDraw, RawKeyEvent, Registration, WindowTree,
};
use xime::host::{CompositionValue, CompositionWindow, HostError, HostIme, SessionId};
use xime::server::{ClientId, ClientInfo, EventSink, ServerHandle};
use xime::wire::{serialize_error, ByteOrder, CompositionField, NotifyEvent};
use xime::{ClientError, Transport};

pub const MAJOR_OPCODE: u8 = 131;
pub const EVENT_BASE: u8 = 100;
pub const ERROR_BASE: u8 = 140;

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// What the scripted host currently reports, shared with the test body.
#[derive(Default)]
pub struct HostState {
    next: u32,
    pub live: Vec<SessionId>,
    pub comp: Option<Vec<u16>>,
    pub attrs: Option<Vec<u8>>,
    pub result: Option<Vec<u16>>,
    pub caret: u32,
    pub open_calls: Vec<(SessionId, bool)>,
    pub window_calls: Vec<(SessionId, CompositionWindow)>,
    pub focus_calls: Vec<(SessionId, bool)>,
}

#[derive(Clone, Default)]
pub struct FakeIme(pub Arc<Mutex<HostState>>);

impl HostIme for FakeIme {
    fn create_session(&mut self) -> Result<SessionId, HostError> {
        let mut state = self.0.lock().unwrap();
        state.next += 1;
        let session = SessionId::from_raw(state.next);
        state.live.push(session);
        Ok(session)
    }

    fn destroy_session(&mut self, session: SessionId) -> Result<(), HostError> {
        let mut state = self.0.lock().unwrap();
        let index = state
            .live
            .iter()
            .position(|live| *live == session)
            .ok_or(HostError::UnknownSession(session))?;
        state.live.remove(index);
        Ok(())
    }

    fn open_status(&mut self, _: SessionId) -> Result<bool, HostError> {
        Ok(false)
    }

    fn set_open_status(&mut self, session: SessionId, open: bool) -> Result<(), HostError> {
        self.0.lock().unwrap().open_calls.push((session, open));
        Ok(())
    }

    fn set_composition_window(
        &mut self,
        session: SessionId,
        window: CompositionWindow,
    ) -> Result<(), HostError> {
        self.0.lock().unwrap().window_calls.push((session, window));
        Ok(())
    }

    fn composition_value(
        &mut self,
        _: SessionId,
        field: CompositionField,
    ) -> Result<Option<CompositionValue>, HostError> {
        let state = self.0.lock().unwrap();
        Ok(if field == CompositionField::COMP_STR {
            state.comp.clone().map(CompositionValue::Text)
        } else if field == CompositionField::COMP_ATTR {
            state.attrs.clone().map(CompositionValue::Attributes)
        } else if field == CompositionField::RESULT_STR {
            state.result.clone().map(CompositionValue::Text)
        } else if field == CompositionField::CURSOR_POS {
            Some(CompositionValue::Cursor(state.caret))
        } else {
            None
        })
    }

    fn set_focus(&mut self, session: SessionId, focus: bool) -> Result<(), HostError> {
        self.0.lock().unwrap().focus_calls.push((session, focus));
        Ok(())
    }
}

/// Delivers events into the worker's message channel.
pub struct ChannelSink(pub Sender<BridgeMessage>);

impl EventSink for ChannelSink {
    fn deliver(&self, event: &NotifyEvent) {
        let _ = self.0.send(BridgeMessage::Notify(*event));
    }
}

/// Records delivered events for assertions.
#[derive(Clone, Default)]
pub struct Inbox(pub Arc<Mutex<Vec<NotifyEvent>>>);

impl EventSink for Inbox {
    fn deliver(&self, event: &NotifyEvent) {
        self.0.lock().unwrap().push(*event);
    }
}

/// Transport that dispatches directly into a shared server, no socket.
pub struct Loopback {
    server: ServerHandle,
    sink_sender: Sender<BridgeMessage>,
    sequence: u16,
}

impl Loopback {
    pub fn new(server: ServerHandle, sink_sender: Sender<BridgeMessage>) -> Self {
        Loopback { server, sink_sender, sequence: 0 }
    }

    fn client_info(&self) -> ClientInfo {
        ClientInfo {
            id: ClientId::from_raw(1),
            byte_order: ByteOrder::native(),
            sequence: self.sequence,
        }
    }
}

impl Transport for Loopback {
    fn major_opcode(&self) -> u8 {
        MAJOR_OPCODE
    }

    fn event_base(&self) -> u8 {
        EVENT_BASE
    }

    fn request_with_reply(&mut self, buf: &[u8]) -> Result<Vec<u8>, ClientError> {
        self.sequence = self.sequence.wrapping_add(1);
        let info = self.client_info();
        let sender = self.sink_sender.clone();
        let mut server = self.server.lock().unwrap();
        match server.dispatch(&info, buf, move || Box::new(ChannelSink(sender))) {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(ClientError::MalformedReply),
            Err(err) => Ok(serialize_error(
                &err,
                ERROR_BASE,
                MAJOR_OPCODE,
                buf[1],
                info.sequence,
                ByteOrder::native(),
            )),
        }
    }

    fn request(&mut self, buf: &[u8]) -> Result<(), ClientError> {
        self.sequence = self.sequence.wrapping_add(1);
        let info = self.client_info();
        let sender = self.sink_sender.clone();
        let mut server = self.server.lock().unwrap();
        // Errors of reply-less requests are asynchronous on a real
        // connection; the loopback just drops them.
        let _ = server.dispatch(&info, buf, move || Box::new(ChannelSink(sender)));
        Ok(())
    }
}

/// Every window's top-level ancestor sits at a fixed (+5, +7) offset.
pub struct OffsetTree;

impl WindowTree for OffsetTree {
    fn translate_to_top_level(&mut self, _: u32, x: i16, y: i16) -> Option<(i16, i16)> {
        Some((x + 5, y + 7))
    }
}

#[derive(Debug, PartialEq)]
pub enum Call {
    Start(xime::ic::IcId),
    Draw {
        ic: xime::ic::IcId,
        caret: u32,
        chg_length: u32,
        text: String,
        feedback: Vec<xime::bridge::feedback::Feedback>,
    },
    Done(xime::ic::IcId),
    Commit(xime::ic::IcId, String),
    Key(xime::ic::IcId),
}

#[derive(Clone, Default)]
pub struct Recorder(pub Arc<Mutex<Vec<Call>>>);

impl Recorder {
    pub fn calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl ImFramework for Recorder {
    fn register(&mut self, _: &Registration) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }

    fn preedit_start(&mut self, ic: xime::ic::IcId) {
        self.0.lock().unwrap().push(Call::Start(ic));
    }

    fn preedit_draw(&mut self, ic: xime::ic::IcId, draw: PreeditDraw<'_>) {
        self.0.lock().unwrap().push(Call::Draw {
            ic,
            caret: draw.caret,
            chg_length: draw.chg_length,
            text: draw.text.to_owned(),
            feedback: draw.feedback.to_vec(),
        });
    }

    fn preedit_done(&mut self, ic: xime::ic::IcId) {
        self.0.lock().unwrap().push(Call::Done(ic));
    }

    fn commit(&mut self, ic: xime::ic::IcId, text: &str) {
        self.0.lock().unwrap().push(Call::Commit(ic, text.to_owned()));
    }

    fn forward_key(&mut self, ic: xime::ic::IcId, _: &RawKeyEvent) {
        self.0.lock().unwrap().push(Call::Key(ic));
    }
}

/// Drains queued notify events into the worker.
pub fn pump<T, F, W>(
    worker: &mut xime::bridge::BridgeWorker<T, F, W>,
    receiver: &Receiver<BridgeMessage>,
) where
    T: Transport,
    F: ImFramework,
    W: WindowTree,
{
    while let Ok(message) = receiver.try_recv() {
        match message {
            BridgeMessage::Notify(event) => worker.handle_notify(&event).unwrap(),
            BridgeMessage::Ims(request) => worker.handle_request(request).unwrap(),
            BridgeMessage::Shutdown => return,
        }
    }
}
