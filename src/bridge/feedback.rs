//! Mapping from host composition attributes to preedit display feedback.

use bitflags::bitflags;

bitflags! {
    /// Display feedback of one preedit character, input-method-protocol
    /// wire values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Feedback: u32 {
        const REVERSE = 1;
        const UNDERLINE = 2;
        const HIGHLIGHT = 4;
        const PRIMARY = 32;
        const SECONDARY = 64;
        const TERTIARY = 128;
    }
}

/// Host attribute byte codes.
pub const ATTR_INPUT: u8 = 0;
pub const ATTR_TARGET_CONVERTED: u8 = 1;
pub const ATTR_CONVERTED: u8 = 2;
pub const ATTR_TARGET_NOT_CONVERTED: u8 = 3;
pub const ATTR_INPUT_ERROR: u8 = 4;
pub const ATTR_FIXED_CONVERTED: u8 = 5;

/// Feedback shown for one host attribute code.
pub fn attribute_feedback(attr: u8) -> Feedback {
    match attr {
        ATTR_TARGET_CONVERTED => Feedback::UNDERLINE | Feedback::REVERSE,
        ATTR_CONVERTED => Feedback::PRIMARY,
        ATTR_TARGET_NOT_CONVERTED => Feedback::REVERSE,
        // Plain input, input errors, fixed conversions and anything unknown
        // render as underlined text.
        _ => Feedback::UNDERLINE,
    }
}

/// One feedback entry per character of `text`.
///
/// The host reports one attribute byte per character of the composition
/// string; characters beyond the reported run fall back to underline.
pub fn feedback_for_text(text: &str, attrs: &[u8]) -> Vec<Feedback> {
    text.chars()
        .enumerate()
        .map(|(i, _)| attrs.get(i).copied().map_or(Feedback::UNDERLINE, attribute_feedback))
        .collect()
}
