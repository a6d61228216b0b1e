//! The measurement engine: one run per page context.
//!
//! Everything is driven from outside and runs to completion: input handlers
//! ([`Engine::handle_key`], [`Engine::handle_paste`]), frame notifications,
//! commands, and [`Engine::advance`], which fires whatever deferred work is due
//! on the engine's clock.

use crate::classifier::{Classifier, Element, PageContext};
use crate::clock::{ActiveClock, Millis, Scheduler, Task, TimeSource, TimerId, IDLE_THRESHOLD_MS};
use crate::config::{Config, BROADCAST_INTERVAL_MS};
use crate::filter::{classify_key, classify_paste, KeyClass, KeyEvent, PasteEvent};
use crate::frames::{FrameCoverage, FrameHost, FrameId, NodeId};
use crate::history::SessionRecorder;
use crate::reporter::{LiveReporter, NullReporter};
use crate::session::{MeasurementRun, Session, Snapshot};
use crate::util::typing_speed;
use serde::{Deserialize, Serialize};

/// Node the frame observer is rooted at unless configured otherwise
pub const DOCUMENT_ROOT: NodeId = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub idle_threshold_ms: Millis,
    pub broadcast_interval_ms: Millis,
    pub root: NodeId,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_threshold_ms: IDLE_THRESHOLD_MS,
            broadcast_interval_ms: BROADCAST_INTERVAL_MS,
            root: DOCUMENT_ROOT,
        }
    }
}

impl From<&Config> for EngineConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            idle_threshold_ms: cfg.idle_threshold_ms,
            broadcast_interval_ms: cfg.broadcast_interval_ms.max(1),
            ..Default::default()
        }
    }
}

/// Requests from a control surface such as a popup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(tag = "command", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Command {
    Start,
    Stop,
    Query,
}

pub struct Engine<H: FrameHost> {
    config: EngineConfig,
    page: PageContext,
    run: MeasurementRun,
    clock: ActiveClock,
    scheduler: Scheduler,
    classifier: Classifier,
    coverage: FrameCoverage,
    host: H,
    recorder: Option<Box<dyn SessionRecorder>>,
    reporter: Box<dyn LiveReporter>,
    broadcast_timer: Option<TimerId>,
}

impl<H: FrameHost> Engine<H> {
    pub fn new(page: PageContext, host: H, time: impl TimeSource + 'static) -> Self {
        let config = EngineConfig::default();
        Self {
            clock: ActiveClock::new(config.idle_threshold_ms),
            config,
            page,
            run: MeasurementRun::default(),
            scheduler: Scheduler::new(Box::new(time)),
            classifier: Classifier::default(),
            coverage: FrameCoverage::new(),
            host,
            recorder: None,
            reporter: Box::new(NullReporter),
            broadcast_timer: None,
        }
    }

    /// A zero broadcast interval is raised to 1 ms so `advance()` terminates.
    pub fn with_config(mut self, mut config: EngineConfig) -> Self {
        config.broadcast_interval_ms = config.broadcast_interval_ms.max(1);
        self.clock = ActiveClock::new(config.idle_threshold_ms);
        self.config = config;
        self
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_recorder(mut self, recorder: impl SessionRecorder + 'static) -> Self {
        self.recorder = Some(Box::new(recorder));
        self
    }

    pub fn with_reporter(mut self, reporter: impl LiveReporter + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    pub fn is_active(&self) -> bool {
        self.run.active
    }

    /// True while keystrokes are arriving within the idle threshold
    pub fn is_bursting(&self) -> bool {
        self.clock.is_bursting()
    }

    pub fn run(&self) -> &MeasurementRun {
        &self.run
    }

    pub fn page(&self) -> &PageContext {
        &self.page
    }

    /// Tracks `document.activeElement` of the top-level page.
    pub fn set_focus(&mut self, focused: Option<Element>) {
        self.page.focused = focused;
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn now_ms(&self) -> Millis {
        self.scheduler.now_ms()
    }

    pub fn next_deadline(&self) -> Option<Millis> {
        self.scheduler.next_deadline()
    }

    /// Starts a fresh run. Calling it during a run discards that run
    /// entirely rather than layering onto it.
    pub fn start(&mut self) -> Snapshot {
        if self.run.active {
            tracing::debug!("start requested during a run; resetting");
            self.teardown();
        }

        self.run = MeasurementRun::started();
        self.clock.reset(&mut self.scheduler);
        self.coverage.start_watching(&mut self.host, self.config.root);
        self.broadcast_timer = Some(
            self.scheduler
                .schedule(self.config.broadcast_interval_ms, Task::Broadcast),
        );

        tracing::info!(host = %self.page.host, "measurement started");
        self.snapshot()
    }

    pub fn stop(&mut self) -> Snapshot {
        if !self.run.active {
            return self.snapshot();
        }

        let now = self.now_ms();
        self.clock.finalize(&mut self.scheduler);
        self.run.active = false;
        self.run.stopped_at = Some(now);
        self.teardown();

        let snapshot = self.snapshot();
        tracing::info!(
            chars = snapshot.counted_chars,
            wpm = snapshot.wpm,
            active_secs = snapshot.active_secs,
            "measurement stopped"
        );

        if snapshot.counted_chars > 0 {
            self.record(&snapshot, now);
        }
        snapshot
    }

    /// Current derived values. Also raises the run's peak WPM, so the peak
    /// is sampled at snapshot granularity.
    pub fn snapshot(&mut self) -> Snapshot {
        let now = self.now_ms();
        let active_ms = self.clock.elapsed_active_ms(now);
        let (wpm, cpm) = typing_speed(self.run.counted_chars, active_ms);
        self.run.peak_wpm = self.run.peak_wpm.max(wpm);

        let end = if self.run.active {
            now
        } else {
            self.run.stopped_at.unwrap_or(now)
        };
        let elapsed_secs = self
            .run
            .first_keystroke_at
            .map(|first| end.saturating_sub(first) / 1_000)
            .unwrap_or(0);

        Snapshot {
            active: self.run.active,
            wpm,
            cpm,
            counted_chars: self.run.counted_chars,
            backspace_count: self.run.backspace_count,
            pasted_char_count: self.run.pasted_char_count,
            elapsed_secs,
            active_secs: active_ms / 1_000,
            peak_wpm: self.run.peak_wpm,
            has_data: self.run.has_data(),
        }
    }

    pub fn handle_command(&mut self, command: Command) -> Snapshot {
        tracing::debug!(%command, "command received");
        match command {
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::Query => self.snapshot(),
        }
    }

    pub fn handle_key(&mut self, event: &KeyEvent) -> KeyClass {
        let class = classify_key(event, self.run.active, &self.classifier, &self.page);
        match class {
            KeyClass::Deletion => {
                self.run.backspace_count += 1;
                self.clock.record_activity(&mut self.scheduler);
            }
            KeyClass::Countable => {
                if self.run.first_keystroke_at.is_none() {
                    self.run.first_keystroke_at = Some(self.now_ms());
                }
                self.run.counted_chars += 1;
                self.clock.record_activity(&mut self.scheduler);
            }
            KeyClass::Ignored(reason) => {
                tracing::trace!(key = %event.key, %reason, "key ignored");
            }
        }
        class
    }

    /// Returns how many pasted characters were counted.
    pub fn handle_paste(&mut self, event: &PasteEvent) -> Option<usize> {
        let pasted = classify_paste(event, self.run.active, &self.classifier, &self.page)?;
        self.run.pasted_char_count += pasted as u64;
        self.clock.record_activity(&mut self.scheduler);
        Some(pasted)
    }

    pub fn on_nodes_added(&mut self, nodes: &[NodeId]) {
        self.coverage.on_nodes_added(&mut self.host, nodes);
    }

    pub fn on_frame_load(&mut self, frame: FrameId) {
        self.coverage.on_frame_load(&mut self.host, frame);
    }

    pub fn is_frame_covered(&self, frame: FrameId) -> bool {
        self.coverage.is_attached(frame)
    }

    /// Fires every timer due by now, earliest first. Returns how many fired.
    pub fn advance(&mut self) -> usize {
        let mut fired = 0;
        while let Some((_due, task)) = self.scheduler.pop_due() {
            fired += 1;
            match task {
                Task::IdleExpiry => self.clock.expire_idle(),
                Task::Broadcast => {
                    let snapshot = self.snapshot();
                    self.reporter.publish(&snapshot);
                    self.broadcast_timer = Some(
                        self.scheduler
                            .schedule(self.config.broadcast_interval_ms, Task::Broadcast),
                    );
                }
            }
        }
        fired
    }

    fn teardown(&mut self) {
        if let Some(id) = self.broadcast_timer.take() {
            self.scheduler.cancel(id);
        }
        self.coverage.stop_watching(&mut self.host);
    }

    /// Persistence failures are logged and otherwise ignored; the caller
    /// already has its snapshot.
    fn record(&mut self, snapshot: &Snapshot, now: Millis) {
        let Some(recorder) = self.recorder.as_mut() else {
            return;
        };
        let session = Session::from_snapshot(snapshot, now, &self.page.host);
        if let Err(e) = recorder.append(&session) {
            tracing::warn!(error = %e, "failed to persist session");
        }
    }
}

impl<H: FrameHost> std::fmt::Debug for Engine<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("page", &self.page)
            .field("run", &self.run)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
