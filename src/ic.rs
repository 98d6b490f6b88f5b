//! Input-context attribute store for the input-method-server side.
//!
//! One [`InputContext`] exists per IC the framework created; it remembers the
//! attributes the client set and owns the link to the wire-level context
//! handle. Storing certain attributes has protocol side effects (moving the
//! native composition window, toggling default rendering); those are returned
//! as data so the worker can apply them over its connection after coordinate
//! translation.

use std::collections::HashMap;

use bitflags::bitflags;
use tracing::debug;

use crate::wire::{CompositionStyle, ContextId};

/// 16-bit IC handle, assigned monotonically starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IcId(u16);

impl IcId {
    pub const fn from_raw(raw: u16) -> Self {
        IcId(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }
}

bitflags! {
    /// Input styles of the input-method protocol.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InputStyle: u32 {
        const PREEDIT_AREA = 0x0001;
        const PREEDIT_CALLBACKS = 0x0002;
        const PREEDIT_POSITION = 0x0004;
        const PREEDIT_NOTHING = 0x0008;
        const PREEDIT_NONE = 0x0010;
        const STATUS_AREA = 0x0100;
        const STATUS_CALLBACKS = 0x0200;
        const STATUS_NOTHING = 0x0400;
        const STATUS_NONE = 0x0800;
    }
}

/// The style combinations advertised on registration.
pub const SUPPORTED_STYLES: [InputStyle; 9] = [
    InputStyle::PREEDIT_CALLBACKS.union(InputStyle::STATUS_AREA),
    InputStyle::PREEDIT_CALLBACKS.union(InputStyle::STATUS_NOTHING),
    InputStyle::PREEDIT_CALLBACKS.union(InputStyle::STATUS_NONE),
    InputStyle::PREEDIT_POSITION.union(InputStyle::STATUS_AREA),
    InputStyle::PREEDIT_POSITION.union(InputStyle::STATUS_NOTHING),
    InputStyle::PREEDIT_POSITION.union(InputStyle::STATUS_NONE),
    InputStyle::PREEDIT_AREA.union(InputStyle::STATUS_AREA),
    InputStyle::PREEDIT_NOTHING.union(InputStyle::STATUS_NOTHING),
    InputStyle::PREEDIT_NOTHING.union(InputStyle::STATUS_NONE),
];

/// Event mask every IC filters: key presses and releases.
pub const FILTER_EVENTS: u32 = (1 << 0) | (1 << 1);

/// Line space reported back to clients regardless of the stored value.
pub const REPORTED_LINE_SPACE: u32 = 18;

/// Attribute names of the input-method protocol's IC value lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrName {
    InputStyle,
    ClientWindow,
    FocusWindow,
    FilterEvents,
    Area,
    AreaNeeded,
    SpotLocation,
    Colormap,
    StdColormap,
    Foreground,
    Background,
    BackgroundPixmap,
    FontSet,
    LineSpace,
    Cursor,
    SeparatorOfNestedList,
}

impl AttrName {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "inputStyle" => AttrName::InputStyle,
            "clientWindow" => AttrName::ClientWindow,
            "focusWindow" => AttrName::FocusWindow,
            "filterEvents" => AttrName::FilterEvents,
            "area" => AttrName::Area,
            "areaNeeded" => AttrName::AreaNeeded,
            "spotLocation" => AttrName::SpotLocation,
            "colorMap" => AttrName::Colormap,
            "stdColorMap" => AttrName::StdColormap,
            "foreground" => AttrName::Foreground,
            "background" => AttrName::Background,
            "backgroundPixmap" => AttrName::BackgroundPixmap,
            "fontSet" => AttrName::FontSet,
            "lineSpace" => AttrName::LineSpace,
            "cursor" => AttrName::Cursor,
            "separatorofNestedList" => AttrName::SeparatorOfNestedList,
            _ => return None,
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            AttrName::InputStyle => "inputStyle",
            AttrName::ClientWindow => "clientWindow",
            AttrName::FocusWindow => "focusWindow",
            AttrName::FilterEvents => "filterEvents",
            AttrName::Area => "area",
            AttrName::AreaNeeded => "areaNeeded",
            AttrName::SpotLocation => "spotLocation",
            AttrName::Colormap => "colorMap",
            AttrName::StdColormap => "stdColorMap",
            AttrName::Foreground => "foreground",
            AttrName::Background => "background",
            AttrName::BackgroundPixmap => "backgroundPixmap",
            AttrName::FontSet => "fontSet",
            AttrName::LineSpace => "lineSpace",
            AttrName::Cursor => "cursor",
            AttrName::SeparatorOfNestedList => "separatorofNestedList",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: i16,
    pub y: i16,
}

/// One attribute value, already decoded by the framework adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IcValue {
    Style(InputStyle),
    Window(u32),
    Rect(Rect),
    Point(Point),
    Card32(u32),
    String(String),
}

/// IC attribute lists of one create-ic or set-ic-values call.
#[derive(Debug, Clone, Default)]
pub struct IcUpdate {
    pub ic: Vec<(AttrName, IcValue)>,
    pub preedit: Vec<(AttrName, IcValue)>,
    pub status: Vec<(AttrName, IcValue)>,
}

/// Which attribute list a get targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrScope {
    Ic,
    Preedit,
    Status,
}

/// Protocol work a stored attribute requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    SetDraw(bool),
    /// Move the native composition window. When `anchor` names a window the
    /// coordinates are in its space and must be translated to its top-level
    /// ancestor first.
    MoveWindow {
        style: CompositionStyle,
        anchor: Option<u32>,
        x: i16,
        y: i16,
        width: i16,
        height: i16,
    },
}

/// Preedit or status attribute set of one IC.
#[derive(Debug, Clone, Default)]
pub struct AreaAttributes {
    pub area: Rect,
    pub area_needed: Rect,
    pub spot: Point,
    pub colormap: u32,
    pub foreground: u32,
    pub background: u32,
    pub background_pixmap: u32,
    pub font: Option<String>,
    pub line_space: u32,
    pub cursor: u32,
}

#[derive(Debug)]
pub struct InputContext {
    id: IcId,
    context: ContextId,
    /// Framework connection the IC belongs to; kept from the last call so
    /// worker-originated callbacks can address the right client.
    owner: u16,
    input_style: InputStyle,
    client_window: Option<u32>,
    focus_window: Option<u32>,
    preedit: AreaAttributes,
    status: AreaAttributes,
    /// Set when the native IME was toggled; the next forwarded key event is
    /// the toggle key itself and gets swallowed once.
    toggled: bool,
    /// Code points of preedit text currently shown through draw callbacks.
    visible_preedit: usize,
}

impl InputContext {
    fn new(id: IcId, context: ContextId, owner: u16) -> Self {
        InputContext {
            id,
            context,
            owner,
            input_style: InputStyle::empty(),
            client_window: None,
            focus_window: None,
            preedit: AreaAttributes::default(),
            status: AreaAttributes::default(),
            toggled: false,
            visible_preedit: 0,
        }
    }

    pub fn id(&self) -> IcId {
        self.id
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn owner(&self) -> u16 {
        self.owner
    }

    pub fn set_owner(&mut self, owner: u16) {
        self.owner = owner;
    }

    pub fn input_style(&self) -> InputStyle {
        self.input_style
    }

    pub fn focus_window(&self) -> Option<u32> {
        self.focus_window
    }

    pub fn mark_toggled(&mut self) {
        self.toggled = true;
    }

    /// Consumes the toggle flag; true exactly once after a toggle.
    pub fn take_toggled(&mut self) -> bool {
        std::mem::take(&mut self.toggled)
    }

    pub fn visible_preedit(&self) -> usize {
        self.visible_preedit
    }

    pub fn set_visible_preedit(&mut self, chars: usize) {
        self.visible_preedit = chars;
    }

    /// Stores the update's attributes and returns the protocol side effects
    /// in the order they must be applied.
    pub fn store(&mut self, update: &IcUpdate) -> Vec<SideEffect> {
        let mut effects = Vec::new();

        for (name, value) in &update.ic {
            match (name, value) {
                (AttrName::InputStyle, IcValue::Style(style)) => {
                    self.input_style = *style;
                    self.style_effects(&mut effects);
                },
                (AttrName::ClientWindow, IcValue::Window(window)) => {
                    self.client_window = Some(*window);
                },
                (AttrName::FocusWindow, IcValue::Window(window)) => {
                    self.focus_window = Some(*window);
                },
                _ => debug!(ic = self.id.raw(), "ignoring IC attribute {:?}", name),
            }
        }

        for (name, value) in &update.preedit {
            match (name, value) {
                (AttrName::Area, IcValue::Rect(area)) => {
                    self.preedit.area = *area;
                    effects.push(SideEffect::MoveWindow {
                        style: CompositionStyle::Rect,
                        anchor: self.focus_window,
                        x: area.x,
                        y: area.y,
                        width: area.width as i16,
                        height: area.height as i16,
                    });
                },
                (AttrName::SpotLocation, IcValue::Point(spot)) => {
                    self.preedit.spot = *spot;
                    effects.push(SideEffect::MoveWindow {
                        style: CompositionStyle::Point,
                        anchor: self.focus_window,
                        x: spot.x,
                        y: spot.y,
                        width: 0,
                        height: 0,
                    });
                },
                _ => store_area_attribute(&mut self.preedit, *name, value),
            }
        }

        for (name, value) in &update.status {
            match (name, value) {
                (AttrName::Area, IcValue::Rect(area)) => self.status.area = *area,
                _ => store_area_attribute(&mut self.status, *name, value),
            }
        }

        effects
    }

    fn style_effects(&self, effects: &mut Vec<SideEffect>) {
        let preedit = self.input_style
            & (InputStyle::PREEDIT_CALLBACKS
                | InputStyle::PREEDIT_POSITION
                | InputStyle::PREEDIT_AREA
                | InputStyle::PREEDIT_NOTHING);
        if preedit == InputStyle::PREEDIT_CALLBACKS {
            effects.push(SideEffect::SetDraw(false));
        } else if preedit == InputStyle::PREEDIT_POSITION || preedit == InputStyle::PREEDIT_AREA {
            effects.push(SideEffect::SetDraw(true));
        } else if preedit == InputStyle::PREEDIT_NOTHING {
            effects.push(SideEffect::SetDraw(true));
            effects.push(SideEffect::MoveWindow {
                style: CompositionStyle::Default,
                anchor: None,
                x: 0,
                y: 0,
                width: 0,
                height: 0,
            });
        }
    }

    /// Answers one get-ic-values attribute as wire-ready bytes, or `None`
    /// when the attribute is not served.
    pub fn get_value(&self, scope: AttrScope, name: AttrName) -> Option<Vec<u8>> {
        let attrs = match scope {
            AttrScope::Ic => {
                return match name {
                    AttrName::FilterEvents => Some(FILTER_EVENTS.to_ne_bytes().to_vec()),
                    _ => None,
                };
            },
            AttrScope::Preedit => &self.preedit,
            AttrScope::Status => &self.status,
        };

        match name {
            AttrName::Area => Some(rect_bytes(attrs.area)),
            AttrName::AreaNeeded => Some(rect_bytes(attrs.area_needed)),
            AttrName::SpotLocation if scope == AttrScope::Preedit => {
                let mut out = Vec::with_capacity(4);
                out.extend_from_slice(&attrs.spot.x.to_ne_bytes());
                out.extend_from_slice(&attrs.spot.y.to_ne_bytes());
                Some(out)
            },
            AttrName::FontSet => {
                let font = attrs.font.as_deref().unwrap_or("");
                let mut out = Vec::with_capacity(2 + font.len());
                out.extend_from_slice(&(font.len() as u16).to_ne_bytes());
                out.extend_from_slice(font.as_bytes());
                Some(out)
            },
            AttrName::Foreground => Some(attrs.foreground.to_ne_bytes().to_vec()),
            AttrName::Background => Some(attrs.background.to_ne_bytes().to_vec()),
            // Reported as a fixed default no matter what was stored.
            AttrName::LineSpace => Some(REPORTED_LINE_SPACE.to_ne_bytes().to_vec()),
            _ => None,
        }
    }
}

fn store_area_attribute(attrs: &mut AreaAttributes, name: AttrName, value: &IcValue) {
    match (name, value) {
        (AttrName::AreaNeeded, IcValue::Rect(rect)) => attrs.area_needed = *rect,
        (AttrName::Colormap | AttrName::StdColormap, IcValue::Card32(id)) => attrs.colormap = *id,
        (AttrName::Foreground, IcValue::Card32(pixel)) => attrs.foreground = *pixel,
        (AttrName::Background, IcValue::Card32(pixel)) => attrs.background = *pixel,
        (AttrName::BackgroundPixmap, IcValue::Card32(id)) => attrs.background_pixmap = *id,
        (AttrName::FontSet, IcValue::String(font)) => {
            if attrs.font.as_deref() != Some(font) {
                attrs.font = Some(font.clone());
            }
        },
        (AttrName::LineSpace, IcValue::Card32(space)) => attrs.line_space = *space,
        (AttrName::Cursor, IcValue::Card32(id)) => attrs.cursor = *id,
        _ => (),
    }
}

fn rect_bytes(rect: Rect) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    out.extend_from_slice(&rect.x.to_ne_bytes());
    out.extend_from_slice(&rect.y.to_ne_bytes());
    out.extend_from_slice(&rect.width.to_ne_bytes());
    out.extend_from_slice(&rect.height.to_ne_bytes());
    out
}

/// All live ICs of the worker, keyed by handle.
#[derive(Debug, Default)]
pub struct IcStore {
    ics: HashMap<IcId, InputContext>,
    next: u16,
}

impl IcStore {
    pub fn new() -> Self {
        IcStore { ics: HashMap::new(), next: 1 }
    }

    pub fn create(&mut self, context: ContextId, owner: u16) -> IcId {
        let id = IcId::from_raw(self.next);
        self.next = self.next.wrapping_add(1).max(1);
        self.ics.insert(id, InputContext::new(id, context, owner));
        id
    }

    pub fn get(&self, id: IcId) -> Option<&InputContext> {
        self.ics.get(&id)
    }

    pub fn get_mut(&mut self, id: IcId) -> Option<&mut InputContext> {
        self.ics.get_mut(&id)
    }

    pub fn find_by_context(&self, context: ContextId) -> Option<IcId> {
        self.ics
            .iter()
            .find(|(_, ic)| ic.context == context)
            .map(|(id, _)| *id)
    }

    pub fn remove(&mut self, id: IcId) -> Option<InputContext> {
        self.ics.remove(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.ics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_ic() -> (IcStore, IcId) {
        let mut store = IcStore::new();
        let id = store.create(ContextId::from_raw(1), 3);
        (store, id)
    }

    #[test]
    fn preedit_nothing_resets_the_composition_window() {
        let (mut store, id) = store_with_ic();
        let ic = store.get_mut(id).unwrap();
        let effects = ic.store(&IcUpdate {
            ic: vec![(
                AttrName::InputStyle,
                IcValue::Style(InputStyle::PREEDIT_NOTHING | InputStyle::STATUS_NOTHING),
            )],
            ..IcUpdate::default()
        });
        assert_eq!(
            effects,
            vec![
                SideEffect::SetDraw(true),
                SideEffect::MoveWindow {
                    style: CompositionStyle::Default,
                    anchor: None,
                    x: 0,
                    y: 0,
                    width: 0,
                    height: 0,
                },
            ]
        );
    }

    #[test]
    fn callback_preedit_disables_default_rendering() {
        let (mut store, id) = store_with_ic();
        let ic = store.get_mut(id).unwrap();
        let effects = ic.store(&IcUpdate {
            ic: vec![(
                AttrName::InputStyle,
                IcValue::Style(InputStyle::PREEDIT_CALLBACKS | InputStyle::STATUS_NONE),
            )],
            ..IcUpdate::default()
        });
        assert_eq!(effects, vec![SideEffect::SetDraw(false)]);
    }

    #[test]
    fn spot_location_moves_the_window_relative_to_the_focus_window() {
        let (mut store, id) = store_with_ic();
        let ic = store.get_mut(id).unwrap();
        ic.store(&IcUpdate {
            ic: vec![(AttrName::FocusWindow, IcValue::Window(0x400))],
            ..IcUpdate::default()
        });
        let effects = ic.store(&IcUpdate {
            preedit: vec![(AttrName::SpotLocation, IcValue::Point(Point { x: 12, y: 30 }))],
            ..IcUpdate::default()
        });
        assert_eq!(
            effects,
            vec![SideEffect::MoveWindow {
                style: CompositionStyle::Point,
                anchor: Some(0x400),
                x: 12,
                y: 30,
                width: 0,
                height: 0,
            }]
        );
    }

    #[test]
    fn served_values_have_their_documented_quirks() {
        let (mut store, id) = store_with_ic();
        let ic = store.get_mut(id).unwrap();
        ic.store(&IcUpdate {
            preedit: vec![
                (AttrName::FontSet, IcValue::String("-misc-fixed".into())),
                (AttrName::LineSpace, IcValue::Card32(25)),
            ],
            ..IcUpdate::default()
        });

        let font = ic.get_value(AttrScope::Preedit, AttrName::FontSet).unwrap();
        assert_eq!(&font[..2], &11u16.to_ne_bytes());
        assert_eq!(&font[2..], b"-misc-fixed");

        // Line space answers the fixed default, not the stored value.
        assert_eq!(
            ic.get_value(AttrScope::Preedit, AttrName::LineSpace).unwrap(),
            REPORTED_LINE_SPACE.to_ne_bytes().to_vec()
        );

        assert_eq!(
            ic.get_value(AttrScope::Ic, AttrName::FilterEvents).unwrap(),
            FILTER_EVENTS.to_ne_bytes().to_vec()
        );
    }

    #[test]
    fn attribute_names_round_trip() {
        for name in [
            AttrName::InputStyle,
            AttrName::FocusWindow,
            AttrName::SpotLocation,
            AttrName::StdColormap,
            AttrName::SeparatorOfNestedList,
        ] {
            assert_eq!(AttrName::from_name(name.name()), Some(name));
        }
        assert_eq!(AttrName::from_name("unheardOf"), None);
    }

    #[test]
    fn toggle_flag_is_consumed_once() {
        let (mut store, id) = store_with_ic();
        let ic = store.get_mut(id).unwrap();
        assert!(!ic.take_toggled());
        ic.mark_toggled();
        assert!(ic.take_toggled());
        assert!(!ic.take_toggled());
    }
}
