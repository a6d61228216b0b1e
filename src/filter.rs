use crate::classifier::{Classifier, Element, PageContext};
use serde::{Deserialize, Serialize};
use unicode_width::UnicodeWidthChar;

/// Keys that never count: modifiers, navigation, function keys, lock and
/// system keys, and composition markers. Values follow `KeyboardEvent.key`.
pub const IGNORED_KEYS: &[&str] = &[
    "Shift", "Control", "Alt", "AltGraph", "Meta", "OS", "Super", "Hyper", "Fn", "FnLock",
    "Symbol", "SymbolLock", "CapsLock", "NumLock", "ScrollLock", "Tab", "Escape", "ArrowUp",
    "ArrowDown", "ArrowLeft", "ArrowRight", "Home", "End", "PageUp", "PageDown", "Insert",
    "ContextMenu", "PrintScreen", "Pause", "Clear", "F1", "F2", "F3", "F4", "F5", "F6", "F7",
    "F8", "F9", "F10", "F11", "F12", "Dead", "Process", "Unidentified", "Compose",
];

const DELETION_KEYS: &[&str] = &["Backspace", "Delete"];

/// A raw keydown as seen by a capture-phase listener
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyEvent {
    pub key: String,
    pub repeat: bool,
    pub ctrl: bool,
    pub meta: bool,
    pub alt: bool,
    pub shift: bool,
    pub target: Option<Element>,
}

impl KeyEvent {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Default::default()
        }
    }

    pub fn with_target(mut self, target: Element) -> Self {
        self.target = Some(target);
        self
    }

    pub fn repeated(mut self) -> Self {
        self.repeat = true;
        self
    }

    pub fn with_ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn with_meta(mut self) -> Self {
        self.meta = true;
        self
    }

    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }
}

/// A paste, already reduced to its length. The text itself never enters the
/// engine.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PasteEvent {
    pub chars: usize,
    pub target: Option<Element>,
}

impl PasteEvent {
    pub fn from_text(text: &str, target: Option<Element>) -> Self {
        Self {
            chars: text.chars().count(),
            target,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum IgnoreReason {
    Inactive,
    Repeat,
    NotEditable,
    NonTypingKey,
    Shortcut,
    Unrecognized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    Countable,
    Deletion,
    Ignored(IgnoreReason),
}

/// One character wide enough to be drawn, or Enter
pub fn is_countable_key(key: &str) -> bool {
    if key == "Enter" {
        return true;
    }
    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => c.width().is_some(),
        _ => false,
    }
}

/// Rules are checked in order and the first match decides.
pub fn classify_key(
    event: &KeyEvent,
    active: bool,
    classifier: &Classifier,
    page: &PageContext,
) -> KeyClass {
    use IgnoreReason::*;

    if !active {
        return KeyClass::Ignored(Inactive);
    }
    if event.repeat {
        return KeyClass::Ignored(Repeat);
    }
    if !classifier.is_eligible(event.target.as_ref(), page) {
        return KeyClass::Ignored(NotEditable);
    }
    let key = event.key.as_str();
    if IGNORED_KEYS.contains(&key) {
        return KeyClass::Ignored(NonTypingKey);
    }
    if event.ctrl || event.meta {
        return KeyClass::Ignored(Shortcut);
    }
    if DELETION_KEYS.contains(&key) {
        return KeyClass::Deletion;
    }
    if is_countable_key(key) {
        return KeyClass::Countable;
    }
    KeyClass::Ignored(Unrecognized)
}

/// Returns the number of pasted characters to count, if any.
pub fn classify_paste(
    event: &PasteEvent,
    active: bool,
    classifier: &Classifier,
    page: &PageContext,
) -> Option<usize> {
    if !active || !classifier.is_eligible(event.target.as_ref(), page) {
        return None;
    }
    Some(event.chars)
}
