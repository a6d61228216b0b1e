// End-to-end runs of the measurement engine on a virtual clock, persisting
// to a real sqlite file and reporting through the public reporters.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use keypace::classifier::{Element, PageContext};
use keypace::clock::{ManualTime, Millis};
use keypace::config::Config;
use keypace::filter::{KeyClass, KeyEvent, PasteEvent};
use keypace::frames::NoFrames;
use keypace::history::HistoryStore;
use keypace::reporter::JsonLinesReporter;
use keypace::{Command, Engine, EngineConfig, Snapshot};
use tempfile::tempdir;

const T0: Millis = 1_700_000_000_000;

#[derive(Clone, Default)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn page() -> PageContext {
    PageContext::new("mail.example.com", "/compose")
}

fn key(k: &str) -> KeyEvent {
    KeyEvent::new(k).with_target(Element::textarea())
}

fn type_burst(time: &ManualTime, engine: &mut Engine<NoFrames>, n: usize, gap_ms: Millis) {
    for i in 0..n {
        if i > 0 {
            time.advance(gap_ms);
        }
        engine.advance();
        assert_eq!(engine.handle_key(&key("e")), KeyClass::Countable);
    }
}

#[test]
fn finished_run_lands_in_history_file() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("state").join("history.db");
    let time = ManualTime::new(T0);
    let mut engine =
        Engine::new(page(), NoFrames, time.clone()).with_recorder(HistoryStore::open(&db).unwrap());

    engine.start();
    // 30 chars across 2.9 active seconds
    type_burst(&time, &mut engine, 30, 100);
    let snap = engine.stop();
    assert_eq!(snap.counted_chars, 30);
    assert_eq!(snap.wpm, 124);
    assert_eq!(snap.cpm, 621);

    let stored = HistoryStore::open(&db).unwrap().list().unwrap();
    assert_eq!(stored.len(), 1);
    let session = &stored[0];
    assert_eq!(session.domain, "mail.example.com");
    assert_eq!(session.wpm, 124);
    assert_eq!(session.cpm, 621);
    assert_eq!(session.total_chars, 30);
    assert_eq!(session.active_secs, 2);
    assert_eq!(session.id as u64, T0 + 2_900);
    assert!(session.peak_wpm >= session.wpm);
}

#[test]
fn history_keeps_only_the_newest_runs() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("history.db");
    let time = ManualTime::new(T0);
    let store = HistoryStore::open(&db).unwrap().with_limit(3);
    let mut engine = Engine::new(page(), NoFrames, time.clone()).with_recorder(store);

    for run in 1..=5 {
        engine.start();
        type_burst(&time, &mut engine, run, 150);
        engine.stop();
        time.advance(10_000);
    }

    let stored = HistoryStore::open(&db).unwrap().list().unwrap();
    let chars: Vec<u64> = stored.iter().map(|s| s.total_chars).collect();
    assert_eq!(chars, vec![5, 4, 3]);
    assert!(stored.windows(2).all(|w| w[0].created_at > w[1].created_at));
}

#[test]
fn empty_and_paste_only_runs_are_not_recorded() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("history.db");
    let time = ManualTime::new(T0);
    let mut engine =
        Engine::new(page(), NoFrames, time.clone()).with_recorder(HistoryStore::open(&db).unwrap());

    engine.start();
    time.advance(5_000);
    engine.stop();

    engine.start();
    let pasted = engine.handle_paste(&PasteEvent::from_text("lorem ipsum", Some(Element::textarea())));
    engine.handle_key(&key("Backspace"));
    let snap = engine.stop();
    assert_eq!(pasted, Some(11));
    assert_eq!(snap.pasted_char_count, 11);
    assert_eq!(snap.counted_chars, 0);

    assert!(HistoryStore::open(&db).unwrap().list().unwrap().is_empty());
}

#[test]
fn idle_pauses_do_not_dilute_speed() {
    let time = ManualTime::new(T0);
    let mut engine = Engine::new(page(), NoFrames, time.clone());
    engine.start();

    type_burst(&time, &mut engine, 20, 100);
    let before_pause = engine.snapshot();

    // a long think, with the scheduler driven the whole way
    for _ in 0..60 {
        time.advance(250);
        engine.advance();
    }
    assert!(!engine.is_bursting());
    let after_pause = engine.snapshot();
    assert_eq!(after_pause.wpm, before_pause.wpm);
    assert_eq!(after_pause.active_secs, before_pause.active_secs);
    assert!(after_pause.elapsed_secs >= 15);

    type_burst(&time, &mut engine, 20, 100);
    let snap = engine.stop();
    assert_eq!(snap.counted_chars, 40);
    // 40 chars in 3.8 active seconds
    assert_eq!(snap.active_secs, 3);
    assert_eq!(snap.cpm, 632);
}

#[test]
fn configured_idle_threshold_is_honoured() {
    let config = Config {
        idle_threshold_ms: 500,
        ..Config::default()
    };
    let time = ManualTime::new(T0);
    let mut engine =
        Engine::new(page(), NoFrames, time.clone()).with_config(EngineConfig::from(&config));
    engine.start();

    type_burst(&time, &mut engine, 5, 100);
    time.advance(800);
    engine.advance();
    assert!(!engine.is_bursting());
    type_burst(&time, &mut engine, 5, 100);

    let snap = engine.stop();
    // two 400ms bursts; the 800ms gap is dropped
    assert_eq!(snap.counted_chars, 10);
    assert_eq!(snap.cpm, 750);
}

#[test]
fn live_snapshots_stream_as_json_lines() {
    let out = SharedBuf::default();
    let time = ManualTime::new(T0);
    let mut engine = Engine::new(page(), NoFrames, time.clone())
        .with_reporter(JsonLinesReporter::new(out.clone()));

    engine.start();
    type_burst(&time, &mut engine, 10, 100);
    time.advance(250);
    engine.advance();
    engine.stop();

    let text = String::from_utf8(out.0.borrow().clone()).unwrap();
    let snapshots: Vec<Snapshot> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    // each broadcast rearms 250ms after it fires: 300, 600, 900 and 1150
    assert_eq!(snapshots.len(), 4);
    assert!(snapshots.iter().all(|s| s.active));
    assert!(snapshots
        .windows(2)
        .all(|w| w[0].counted_chars <= w[1].counted_chars));
    assert!(snapshots.iter().all(|s| s.counted_chars <= 10));
}

#[test]
fn popup_commands_drive_the_run() {
    let time = ManualTime::new(T0);
    let mut engine = Engine::new(page(), NoFrames, time.clone());

    let command = |raw: &str| serde_json::from_str::<Command>(raw).unwrap();

    let snap = engine.handle_command(command(r#"{"command":"query"}"#));
    assert!(!snap.active);
    assert!(!snap.has_data);

    engine.handle_command(command(r#"{"command":"start"}"#));
    type_burst(&time, &mut engine, 5, 200);
    let live = engine.handle_command(command(r#"{"command":"query"}"#));
    assert!(live.active);
    assert_eq!(live.counted_chars, 5);

    let done = engine.handle_command(command(r#"{"command":"stop"}"#));
    assert!(!done.active);
    assert_eq!(done.counted_chars, 5);
    assert_eq!(
        serde_json::to_value(done).unwrap()["counted_chars"],
        serde_json::json!(5)
    );
}

#[test]
fn canvas_editor_counts_keys_from_its_input_frame() {
    let time = ManualTime::new(T0);
    let page = PageContext::new("docs.google.com", "/spreadsheets/d/xyz/edit")
        .with_focus(Element::iframe());
    let mut engine = Engine::new(page, NoFrames, time.clone());
    engine.start();

    let from_canvas = KeyEvent::new("q").with_target(Element::new("canvas"));
    assert_eq!(engine.handle_key(&from_canvas), KeyClass::Countable);

    engine.set_focus(Some(Element::body()));
    assert!(matches!(engine.handle_key(&from_canvas), KeyClass::Ignored(_)));

    // any ordinary editable target still counts
    assert_eq!(engine.handle_key(&key("w")), KeyClass::Countable);
    assert_eq!(engine.snapshot().counted_chars, 2);
}
