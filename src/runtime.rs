//! Event plumbing for the live terminal session.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use crossterm::event::{self, Event as CtEvent, KeyEvent, KeyEventKind};

/// What the live session reacts to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaceEvent {
    Key(KeyEvent),
    Paste(String),
    /// Terminal gained (`true`) or lost focus
    Focus(bool),
    Resize,
    Tick,
}

impl PaceEvent {
    /// Maps a raw terminal event. Key releases and mouse input are dropped.
    pub fn from_terminal(event: CtEvent) -> Option<Self> {
        match event {
            CtEvent::Key(key) if key.kind == KeyEventKind::Release => None,
            CtEvent::Key(key) => Some(PaceEvent::Key(key)),
            CtEvent::Paste(text) => Some(PaceEvent::Paste(text)),
            CtEvent::FocusGained => Some(PaceEvent::Focus(true)),
            CtEvent::FocusLost => Some(PaceEvent::Focus(false)),
            CtEvent::Resize(_, _) => Some(PaceEvent::Resize),
            CtEvent::Mouse(_) => None,
        }
    }
}

pub trait PaceEventSource {
    /// Waits up to `timeout`; `None` when nothing arrived in time.
    fn next_event(&self, timeout: Duration) -> Option<PaceEvent>;
}

/// Reads crossterm events on a background thread
pub struct CrosstermEventSource {
    rx: Receiver<PaceEvent>,
}

impl CrosstermEventSource {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();

        std::thread::spawn(move || loop {
            let raw = match event::read() {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::debug!(error = %e, "terminal input closed");
                    break;
                }
            };
            if let Some(ev) = PaceEvent::from_terminal(raw) {
                if tx.send(ev).is_err() {
                    break;
                }
            }
        });

        Self { rx }
    }
}

impl Default for CrosstermEventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PaceEventSource for CrosstermEventSource {
    fn next_event(&self, timeout: Duration) -> Option<PaceEvent> {
        self.rx.recv_timeout(timeout).ok()
    }
}

/// Replays events pushed through a channel
pub struct ChannelEventSource {
    rx: Receiver<PaceEvent>,
}

impl ChannelEventSource {
    pub fn new(rx: Receiver<PaceEvent>) -> Self {
        Self { rx }
    }
}

impl PaceEventSource for ChannelEventSource {
    fn next_event(&self, timeout: Duration) -> Option<PaceEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(ev) => Some(ev),
            Err(RecvTimeoutError::Timeout) => None,
            // nobody left to send: behave like a quiet terminal
            Err(RecvTimeoutError::Disconnected) => {
                std::thread::sleep(timeout);
                None
            }
        }
    }
}

/// Paces the live loop: hands out input as it arrives and a `Tick` whenever
/// the engine's next timer is due or the redraw interval elapses.
pub struct Pacer<E: PaceEventSource> {
    source: E,
    redraw: Duration,
}

impl<E: PaceEventSource> Pacer<E> {
    pub fn new(source: E, redraw: Duration) -> Self {
        Self { source, redraw }
    }

    pub fn redraw_interval(&self) -> Duration {
        self.redraw
    }

    /// Blocks until input arrives, `until_deadline` passes, or the redraw
    /// interval elapses, whichever comes first.
    pub fn next(&self, until_deadline: Option<Duration>) -> PaceEvent {
        let wait = until_deadline.map_or(self.redraw, |d| d.min(self.redraw));
        self.source.next_event(wait).unwrap_or(PaceEvent::Tick)
    }
}
