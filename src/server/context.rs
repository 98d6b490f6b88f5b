//! Server-side IME context store.
//!
//! A context pairs a wire-visible handle with a host IME session and caches
//! the composition values the host reported last. Cached values are what
//! get-composition-string answers from; a sub-field that was never reported
//! is distinct from one that is currently empty.

use std::collections::HashMap;

use crate::error::ProtocolError;
use crate::host::{utf16_to_utf8_lossy, CompositionValue, SessionId};
use crate::wire::{CompositionField, ContextId};

#[derive(Debug)]
pub struct Context {
    session: SessionId,
    comp_str: Option<Vec<u8>>,
    comp_attr: Option<Vec<u8>>,
    result_str: Option<Vec<u8>>,
    cursor: u32,
    draw: bool,
}

impl Context {
    fn new(session: SessionId) -> Self {
        Context {
            session,
            comp_str: None,
            comp_attr: None,
            result_str: None,
            cursor: 0,
            // Native rendering stays suppressed until a client opts in with
            // set-composition-draw.
            draw: false,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Whether the host should perform its default composition rendering.
    pub fn draw(&self) -> bool {
        self.draw
    }

    pub fn set_draw(&mut self, draw: bool) {
        self.draw = draw;
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Caches one sub-field value reported by the host.
    ///
    /// Text arrives UTF-16 and is stored UTF-8.
    pub fn store_value(&mut self, field: CompositionField, value: CompositionValue) {
        // Reserved sub-fields and mismatched shapes are dropped.
        if field == CompositionField::COMP_STR {
            if let CompositionValue::Text(units) = value {
                self.comp_str = Some(utf16_to_utf8_lossy(&units));
            }
        } else if field == CompositionField::RESULT_STR {
            if let CompositionValue::Text(units) = value {
                self.result_str = Some(utf16_to_utf8_lossy(&units));
            }
        } else if field == CompositionField::COMP_ATTR {
            if let CompositionValue::Attributes(bytes) = value {
                self.comp_attr = Some(bytes);
            }
        } else if field == CompositionField::CURSOR_POS {
            if let CompositionValue::Cursor(position) = value {
                self.cursor = position;
            }
        }
    }

    /// Answers get-composition-string for one sub-field.
    pub fn field_bytes(&self, field: CompositionField) -> Result<&[u8], ProtocolError> {
        let stored = if field == CompositionField::COMP_STR {
            &self.comp_str
        } else if field == CompositionField::COMP_ATTR {
            &self.comp_attr
        } else if field == CompositionField::RESULT_STR {
            &self.result_str
        } else {
            return Err(ProtocolError::Value(field.bits()));
        };
        stored.as_deref().ok_or(ProtocolError::NoValue)
    }
}

/// The set of live contexts, keyed by wire handle.
#[derive(Debug, Default)]
pub struct ContextStore {
    contexts: HashMap<ContextId, Context>,
    next: u32,
}

impl ContextStore {
    pub fn new() -> Self {
        ContextStore { contexts: HashMap::new(), next: 1 }
    }

    /// Registers a new context for a host session and hands out its handle.
    ///
    /// Handles are monotonic and never reused within a server lifetime.
    pub fn insert(&mut self, session: SessionId) -> Result<ContextId, ProtocolError> {
        let id = ContextId::from_raw(self.next);
        self.next = self.next.checked_add(1).ok_or(ProtocolError::Alloc)?;
        self.contexts.insert(id, Context::new(session));
        Ok(id)
    }

    pub fn get(&self, id: ContextId) -> Result<&Context, ProtocolError> {
        self.contexts.get(&id).ok_or(ProtocolError::UnknownContext(id))
    }

    pub fn get_mut(&mut self, id: ContextId) -> Result<&mut Context, ProtocolError> {
        self.contexts.get_mut(&id).ok_or(ProtocolError::UnknownContext(id))
    }

    /// Finds the context attached to a host session.
    pub fn find_by_session(&self, session: SessionId) -> Option<ContextId> {
        self.contexts
            .iter()
            .find(|(_, context)| context.session == session)
            .map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Removes one context, yielding its host session to tear down.
    pub fn remove(&mut self, id: ContextId) -> Option<SessionId> {
        self.contexts.remove(&id).map(|context| context.session)
    }

    /// Removes every context, yielding the host sessions to tear down.
    pub fn drain_sessions(&mut self) -> Vec<SessionId> {
        self.contexts.drain().map(|(_, context)| context.session).collect()
    }
}
