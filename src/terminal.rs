//! The terminal as an editing surface.
//!
//! Crossterm key events are translated into the `KeyboardEvent.key` vocabulary
//! the filter understands, and the terminal itself is presented as a single
//! text area with no frames. Keys carry no target of their own: whether they
//! count depends on the terminal holding focus.

use crate::classifier::{Element, PageContext};
use crate::clock::Millis;
use crate::filter::KeyEvent;
use crossterm::event::{
    KeyCode, KeyEvent as CtKeyEvent, KeyEventKind, KeyModifiers, MediaKeyCode, ModifierKeyCode,
};

/// Host name recorded for sessions measured in the terminal
pub const TERMINAL_HOST: &str = "terminal";

/// Same key pressed again within this gap is taken as auto-repeat when the
/// terminal cannot report event kinds
pub const REPEAT_GAP_MS: Millis = 50;

pub fn terminal_page() -> PageContext {
    PageContext::new(TERMINAL_HOST, "/").with_focus(Element::textarea())
}

fn modifier_key(code: ModifierKeyCode) -> &'static str {
    use ModifierKeyCode::*;
    match code {
        LeftShift | RightShift => "Shift",
        LeftControl | RightControl => "Control",
        LeftAlt | RightAlt => "Alt",
        LeftSuper | RightSuper => "Super",
        LeftHyper | RightHyper => "Hyper",
        LeftMeta | RightMeta => "Meta",
        IsoLevel3Shift | IsoLevel5Shift => "AltGraph",
    }
}

fn media_key(code: MediaKeyCode) -> &'static str {
    use MediaKeyCode::*;
    match code {
        Play => "MediaPlay",
        Pause => "MediaPause",
        PlayPause => "MediaPlayPause",
        Stop => "MediaStop",
        TrackNext | FastForward => "MediaTrackNext",
        TrackPrevious | Rewind => "MediaTrackPrevious",
        Record => "MediaRecord",
        Reverse => "MediaRewind",
        LowerVolume => "AudioVolumeDown",
        RaiseVolume => "AudioVolumeUp",
        MuteVolume => "AudioVolumeMute",
    }
}

/// The DOM `key` value a browser would report for this key
pub fn dom_key(code: KeyCode) -> String {
    match code {
        KeyCode::Char(c) => c.to_string(),
        KeyCode::F(n) => format!("F{n}"),
        KeyCode::Modifier(m) => modifier_key(m).to_string(),
        KeyCode::Media(m) => media_key(m).to_string(),
        other => match other {
            KeyCode::Backspace => "Backspace",
            KeyCode::Enter => "Enter",
            KeyCode::Left => "ArrowLeft",
            KeyCode::Right => "ArrowRight",
            KeyCode::Up => "ArrowUp",
            KeyCode::Down => "ArrowDown",
            KeyCode::Home => "Home",
            KeyCode::End => "End",
            KeyCode::PageUp => "PageUp",
            KeyCode::PageDown => "PageDown",
            KeyCode::Tab | KeyCode::BackTab => "Tab",
            KeyCode::Delete => "Delete",
            KeyCode::Insert => "Insert",
            KeyCode::Esc => "Escape",
            KeyCode::CapsLock => "CapsLock",
            KeyCode::ScrollLock => "ScrollLock",
            KeyCode::NumLock => "NumLock",
            KeyCode::PrintScreen => "PrintScreen",
            KeyCode::Pause => "Pause",
            KeyCode::Menu => "ContextMenu",
            KeyCode::KeypadBegin => "Clear",
            _ => "Unidentified",
        }
        .to_string(),
    }
}

/// Translates a crossterm key press. Releases are dropped: the engine only
/// listens for keydown.
pub fn to_key_event(event: &CtKeyEvent) -> Option<KeyEvent> {
    if event.kind == KeyEventKind::Release {
        return None;
    }
    let mods = event.modifiers;
    Some(KeyEvent {
        key: dom_key(event.code),
        repeat: event.kind == KeyEventKind::Repeat,
        ctrl: mods.contains(KeyModifiers::CONTROL),
        meta: mods.intersects(KeyModifiers::SUPER | KeyModifiers::META),
        alt: mods.contains(KeyModifiers::ALT),
        shift: mods.contains(KeyModifiers::SHIFT),
        target: None,
    })
}

/// Turns crossterm key events into filter events, flagging auto-repeat.
///
/// With keyboard enhancement the terminal marks repeats itself. Without it
/// every repeat arrives as a fresh press, so a press of the same key within
/// [`REPEAT_GAP_MS`] of the previous one is treated as a repeat.
#[derive(Debug, Default)]
pub struct KeyTranslator {
    reports_event_types: bool,
    last_press: Option<(KeyCode, Millis)>,
}

impl KeyTranslator {
    pub fn new(reports_event_types: bool) -> Self {
        Self {
            reports_event_types,
            last_press: None,
        }
    }

    pub fn reports_event_types(&self) -> bool {
        self.reports_event_types
    }

    pub fn translate(&mut self, event: &CtKeyEvent, now: Millis) -> Option<KeyEvent> {
        if event.kind == KeyEventKind::Release {
            self.last_press = None;
            return None;
        }
        let mut key = to_key_event(event)?;
        if !self.reports_event_types {
            key.repeat = self.last_press.is_some_and(|(code, at)| {
                code == event.code && now.saturating_sub(at) < REPEAT_GAP_MS
            });
        }
        self.last_press = Some((event.code, now));
        Some(key)
    }
}
