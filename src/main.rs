mod ui;

use chrono::{DateTime, Utc};
use clap::{error::ErrorKind, CommandFactory, Parser, Subcommand};
use crossterm::{
    event::{
        DisableBracketedPaste, DisableFocusChange, EnableBracketedPaste, EnableFocusChange,
        KeyCode, KeyEvent, KeyModifiers, KeyboardEnhancementFlags, PopKeyboardEnhancementFlags,
        PushKeyboardEnhancementFlags,
    },
    execute,
    terminal::{
        disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
    tty::IsTty,
};
use keypace::{
    app_dirs::AppDirs,
    clock::SystemTimeSource,
    classifier::{Classifier, Element},
    config::{Config, ConfigStore, FileConfigStore},
    filter::{KeyClass, PasteEvent},
    frames::NoFrames,
    history::{HistoryError, HistoryStore},
    reporter::ChannelReporter,
    runtime::{CrosstermEventSource, PaceEvent, Pacer},
    terminal::{terminal_page, KeyTranslator},
    Command, Engine, EngineConfig, Snapshot,
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use std::{
    error::Error,
    fs::{self, File, OpenOptions},
    io::{self, stdin},
    path::PathBuf,
    sync::{
        mpsc::{self, Receiver},
        Mutex,
    },
    time::Duration,
};
use time_humanize::{Accuracy, HumanTime, Tense};
use tracing_subscriber::EnvFilter;

const TICK_RATE_MS: u64 = 50;
/// Characters of typed text kept for the echo line
const ECHO_CAPACITY: usize = 512;

/// measure how fast you actually type, counting only the time spent typing
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "Measures typing speed in active time: pauses longer than the idle threshold do not count against you. Finished sessions are kept in a small local history."
)]
pub struct Cli {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// pause, in milliseconds, after which a typing burst ends
    #[clap(long)]
    idle_ms: Option<u64>,

    /// number of sessions to keep in history
    #[clap(long)]
    history_limit: Option<usize>,

    /// log at debug level
    #[clap(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// measure typing live in the terminal (default)
    Live,
    /// list recent sessions, newest first
    History,
    /// write the session history to a CSV file
    Export { path: PathBuf },
    /// delete every stored session
    Clear,
}

impl Cli {
    /// Flags take precedence over the config file
    fn apply_overrides(&self, mut config: Config) -> Config {
        if let Some(idle_ms) = self.idle_ms {
            config.idle_threshold_ms = idle_ms;
        }
        if let Some(limit) = self.history_limit {
            config.history_limit = limit;
        }
        config
    }

    fn is_live(&self) -> bool {
        matches!(self.command, None | Some(Commands::Live))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppState {
    Measuring,
    Finished,
}

pub struct App {
    pub engine: Engine<NoFrames>,
    pub live: Snapshot,
    pub state: AppState,
    /// What has been typed, as far as the terminal can show it
    pub echo: String,
    keys: KeyTranslator,
    live_rx: Receiver<Snapshot>,
}

impl App {
    pub fn new(config: &Config, history: Option<HistoryStore>) -> Self {
        let (tx, rx) = mpsc::channel();
        let classifier = config
            .extra_editor_hosts
            .iter()
            .cloned()
            .fold(Classifier::new(), |c, pattern| c.with_heuristic(pattern));

        let mut engine = Engine::new(terminal_page(), NoFrames, SystemTimeSource)
            .with_config(EngineConfig::from(config))
            .with_classifier(classifier)
            .with_reporter(ChannelReporter::new(tx));
        if let Some(store) = history {
            engine = engine.with_recorder(store);
        }

        let live = engine.handle_command(Command::Start);
        Self {
            engine,
            live,
            state: AppState::Measuring,
            echo: String::new(),
            keys: KeyTranslator::default(),
            live_rx: rx,
        }
    }

    pub fn with_key_translator(mut self, keys: KeyTranslator) -> Self {
        self.keys = keys;
        self
    }

    /// Fires due timers and picks up the newest broadcast snapshot.
    pub fn on_tick(&mut self) {
        self.engine.advance();
        if let Some(snapshot) = self.live_rx.try_iter().last() {
            if self.state == AppState::Measuring {
                self.live = snapshot;
            }
        }
    }

    pub fn on_key(&mut self, key: &KeyEvent) -> Option<KeyClass> {
        let event = self.keys.translate(key, self.engine.now_ms())?;
        let class = self.engine.handle_key(&event);
        match class {
            KeyClass::Countable if event.key == "Enter" => self.echo.push(' '),
            KeyClass::Countable => self.echo.push_str(&event.key),
            KeyClass::Deletion => {
                self.echo.pop();
            }
            KeyClass::Ignored(_) => {}
        }
        self.trim_echo();
        Some(class)
    }

    pub fn on_paste(&mut self, text: &str) {
        let paste = PasteEvent::from_text(text, None);
        if self.engine.handle_paste(&paste).is_some() {
            self.echo.extend(text.chars().filter(|c| !c.is_control()));
            self.trim_echo();
        }
    }

    pub fn finish(&mut self) {
        self.live = self.engine.handle_command(Command::Stop);
        self.state = AppState::Finished;
    }

    pub fn restart(&mut self) {
        self.echo.clear();
        self.live = self.engine.handle_command(Command::Start);
        self.state = AppState::Measuring;
    }

    /// Focus moving away from the terminal leaves nothing focused
    pub fn on_focus(&mut self, gained: bool) {
        self.engine.set_focus(gained.then(Element::textarea));
    }

    /// How long the event loop may block before a timer is due
    pub fn time_until_deadline(&self) -> Option<Duration> {
        self.engine
            .next_deadline()
            .map(|due| Duration::from_millis(due.saturating_sub(self.engine.now_ms())))
    }

    fn trim_echo(&mut self) {
        let excess = self.echo.chars().count().saturating_sub(ECHO_CAPACITY);
        if excess > 0 {
            self.echo = self.echo.chars().skip(excess).collect();
        }
    }
}

fn init_tracing(verbose: bool, to_log_file: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if to_log_file {
        if let Some(file) = AppDirs::log_path().and_then(|path| open_log_file(&path)) {
            let _ = builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
            return;
        }
    }
    let _ = builder.with_writer(io::stderr).try_init();
}

fn open_log_file(path: &std::path::Path) -> Option<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).ok()?;
    }
    OpenOptions::new().create(true).append(true).open(path).ok()
}

fn open_history(config: &Config) -> Result<HistoryStore, HistoryError> {
    Ok(HistoryStore::open_default()?.with_limit(config.history_limit))
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.is_live());
    let config = cli.apply_overrides(FileConfigStore::new().load());

    match cli.command.clone().unwrap_or(Commands::Live) {
        Commands::Live => run_live(&config),
        Commands::History => print_history(&open_history(&config)?),
        Commands::Export { path } => {
            let store = open_history(&config)?;
            let exported = store.export_csv(File::create(&path)?)?;
            println!("exported {} sessions to {}", exported, path.display());
            Ok(())
        }
        Commands::Clear => {
            open_history(&config)?.clear()?;
            println!("history cleared");
            Ok(())
        }
    }
}

fn run_live(config: &Config) -> Result<(), Box<dyn Error>> {
    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    let history = match open_history(config) {
        Ok(store) => Some(store),
        Err(e) => {
            tracing::warn!(error = %e, "history unavailable, sessions will not be saved");
            None
        }
    };

    enable_raw_mode()?;
    // without event kinds every auto-repeat looks like a fresh press
    let enhanced = supports_keyboard_enhancement().unwrap_or(false);
    tracing::debug!(enhanced, "keyboard enhancement");
    let mut stdout = io::stdout();
    execute!(
        stdout,
        EnterAlternateScreen,
        EnableBracketedPaste,
        EnableFocusChange
    )?;
    if enhanced {
        execute!(
            stdout,
            PushKeyboardEnhancementFlags(
                KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                    | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
            )
        )?;
    }
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(config, history).with_key_translator(KeyTranslator::new(enhanced));
    let result = start_tui(&mut terminal, &mut app);

    disable_raw_mode()?;
    if enhanced {
        execute!(terminal.backend_mut(), PopKeyboardEnhancementFlags)?;
    }
    execute!(
        terminal.backend_mut(),
        DisableFocusChange,
        DisableBracketedPaste,
        LeaveAlternateScreen
    )?;
    terminal.show_cursor()?;

    result
}

fn start_tui<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<(), Box<dyn Error>> {
    let pacer = Pacer::new(
        CrosstermEventSource::new(),
        Duration::from_millis(TICK_RATE_MS),
    );

    loop {
        terminal.draw(|f| ui::draw(app, f))?;

        match pacer.next(app.time_until_deadline()) {
            PaceEvent::Tick | PaceEvent::Resize => {}
            PaceEvent::Paste(text) => {
                if app.state == AppState::Measuring {
                    app.on_paste(&text);
                }
            }
            PaceEvent::Focus(gained) => app.on_focus(gained),
            PaceEvent::Key(key) => {
                let interrupt =
                    key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c');
                if interrupt {
                    if app.state == AppState::Measuring {
                        app.finish();
                    }
                    break;
                }
                match (&app.state, key.code) {
                    (AppState::Measuring, KeyCode::Esc) => app.finish(),
                    (AppState::Measuring, _) => {
                        app.on_key(&key);
                    }
                    (AppState::Finished, KeyCode::Char('r')) => app.restart(),
                    (AppState::Finished, KeyCode::Esc | KeyCode::Char('q')) => break,
                    (AppState::Finished, _) => {}
                }
            }
        }

        app.on_tick();
    }

    Ok(())
}

fn ago(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0) as u64;
    HumanTime::from(Duration::from_secs(secs)).to_text_en(Accuracy::Rough, Tense::Past)
}

fn print_history(store: &HistoryStore) -> Result<(), Box<dyn Error>> {
    let sessions = store.list()?;
    if sessions.is_empty() {
        println!("no sessions recorded yet");
        return Ok(());
    }

    let now = Utc::now();
    println!(
        "{:<18} {:<20} {:>5} {:>5} {:>6} {:>6} {:>5} {:>7}",
        "when", "domain", "wpm", "peak", "cpm", "chars", "del", "active"
    );
    for s in &sessions {
        println!(
            "{:<18} {:<20} {:>5} {:>5} {:>6} {:>6} {:>5} {:>6}s",
            ago(s.created_at, now),
            s.domain,
            s.wpm,
            s.peak_wpm,
            s.cpm,
            s.total_chars,
            s.backspaces,
            s.active_secs
        );
    }

    let summary = store.summary()?;
    if let (Some(mean), Some(best)) = (summary.mean_wpm, summary.best_wpm) {
        println!(
            "\n{} sessions, mean {:.0} wpm, best {} wpm, {} chars over {}s active",
            summary.sessions, mean, best, summary.total_chars, summary.total_active_secs
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keypace::filter::IgnoreReason;

    fn app() -> App {
        App::new(&Config::default(), None)
    }

    fn press(app: &mut App, c: char) {
        app.on_key(&KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE));
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["keypace"]);
        assert_eq!(cli.command, None);
        assert!(cli.is_live());
        assert!(!cli.verbose);
        assert_eq!(cli.apply_overrides(Config::default()), Config::default());
    }

    #[test]
    fn test_cli_subcommands() {
        let cli = Cli::parse_from(["keypace", "history"]);
        assert_eq!(cli.command, Some(Commands::History));
        assert!(!cli.is_live());

        let cli = Cli::parse_from(["keypace", "export", "out.csv"]);
        assert_eq!(
            cli.command,
            Some(Commands::Export {
                path: PathBuf::from("out.csv")
            })
        );

        let cli = Cli::parse_from(["keypace", "clear"]);
        assert_eq!(cli.command, Some(Commands::Clear));
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from(["keypace", "--idle-ms", "3500", "--history-limit", "3"]);
        let config = cli.apply_overrides(Config::default());
        assert_eq!(config.idle_threshold_ms, 3500);
        assert_eq!(config.history_limit, 3);
        assert_eq!(config.broadcast_interval_ms, Config::default().broadcast_interval_ms);
    }

    #[test]
    fn test_app_starts_measuring() {
        let app = app();
        assert_eq!(app.state, AppState::Measuring);
        assert!(app.engine.is_active());
        assert!(!app.live.has_data);
    }

    #[test]
    fn test_keys_are_counted_and_echoed() {
        let mut app = app();
        press(&mut app, 'h');
        press(&mut app, 'i');
        app.on_key(&KeyEvent::new(KeyCode::Backspace, KeyModifiers::NONE));
        app.on_key(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL));

        assert_eq!(app.echo, "h");
        assert_eq!(app.engine.run().counted_chars, 2);
        assert_eq!(app.engine.run().backspace_count, 1);
    }

    #[test]
    fn test_paste_is_tracked_separately() {
        let mut app = app();
        app.on_paste("hello\nworld");
        assert_eq!(app.engine.run().pasted_char_count, 11);
        assert_eq!(app.engine.run().counted_chars, 0);
        assert_eq!(app.echo, "helloworld");
    }

    #[test]
    fn test_finish_and_restart() {
        let mut app = app();
        press(&mut app, 'a');
        app.finish();
        assert_eq!(app.state, AppState::Finished);
        assert!(!app.live.active);
        assert_eq!(app.live.counted_chars, 1);

        app.restart();
        assert_eq!(app.state, AppState::Measuring);
        assert!(app.echo.is_empty());
        assert_eq!(app.engine.run().counted_chars, 0);
    }

    #[test]
    fn test_echo_is_bounded() {
        let mut app = app();
        for c in "xy".chars().cycle().take(ECHO_CAPACITY + 20) {
            press(&mut app, c);
        }
        assert_eq!(app.echo.chars().count(), ECHO_CAPACITY);
    }

    #[test]
    fn test_deadline_tracks_engine_timers() {
        let mut app = app();
        let wait = app.time_until_deadline().unwrap();
        assert!(wait <= Duration::from_millis(250));

        app.finish();
        assert_eq!(app.time_until_deadline(), None);
    }

    #[test]
    fn test_focus_follows_terminal() {
        let mut app = app();
        app.on_focus(false);
        assert_eq!(app.engine.page().focused, None);
        let typed_away = app.on_key(&KeyEvent::new(KeyCode::Char('j'), KeyModifiers::NONE));
        assert_eq!(typed_away, Some(KeyClass::Ignored(IgnoreReason::NotEditable)));
        app.on_paste("pasted elsewhere");
        assert_eq!(app.engine.run().counted_chars, 0);
        assert_eq!(app.engine.run().pasted_char_count, 0);

        app.on_focus(true);
        assert_eq!(app.engine.page().focused, Some(Element::textarea()));
        press(&mut app, 'k');
        assert_eq!(app.engine.run().counted_chars, 1);
    }

    #[test]
    fn test_held_key_counts_once() {
        let mut app = app();
        // auto-repeat without event kinds arrives as back-to-back presses
        for _ in 0..5 {
            press(&mut app, 'z');
        }
        assert_eq!(app.engine.run().counted_chars, 1);
        assert_eq!(app.echo, "z");
    }

    #[test]
    fn test_ago_is_past_tense() {
        let now = Utc::now();
        let text = ago(now - chrono::Duration::minutes(5), now);
        assert!(text.contains("ago"), "{text}");
    }
}
