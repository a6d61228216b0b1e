use crate::session::Snapshot;
use std::io::Write;
use std::sync::mpsc::Sender;

/// Delivers live snapshots to whatever surface is listening.
///
/// Delivery is best-effort: with nobody listening the snapshot is dropped.
pub trait LiveReporter {
    fn publish(&mut self, snapshot: &Snapshot);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl LiveReporter for NullReporter {
    fn publish(&mut self, _snapshot: &Snapshot) {}
}

/// Forwards snapshots over an mpsc channel
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: Sender<Snapshot>,
}

impl ChannelReporter {
    pub fn new(tx: Sender<Snapshot>) -> Self {
        Self { tx }
    }
}

impl LiveReporter for ChannelReporter {
    fn publish(&mut self, snapshot: &Snapshot) {
        if self.tx.send(*snapshot).is_err() {
            tracing::trace!("no live listener");
        }
    }
}

/// Writes one JSON object per snapshot
#[derive(Debug)]
pub struct JsonLinesReporter<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> LiveReporter for JsonLinesReporter<W> {
    fn publish(&mut self, snapshot: &Snapshot) {
        let written = serde_json::to_writer(&mut self.out, snapshot)
            .map_err(std::io::Error::from)
            .and_then(|()| writeln!(self.out));
        if let Err(e) = written {
            tracing::debug!(error = %e, "dropping live snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn snapshot(wpm: u32) -> Snapshot {
        Snapshot {
            active: true,
            wpm,
            has_data: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_channel_reporter_delivers() {
        let (tx, rx) = mpsc::channel();
        let mut reporter = ChannelReporter::new(tx);
        reporter.publish(&snapshot(42));
        assert_eq!(rx.try_recv().unwrap().wpm, 42);
    }

    #[test]
    fn test_channel_reporter_without_listener() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let mut reporter = ChannelReporter::new(tx);
        // must not panic
        reporter.publish(&snapshot(1));
    }

    #[test]
    fn test_json_lines_reporter() {
        let mut reporter = JsonLinesReporter::new(Vec::new());
        reporter.publish(&snapshot(10));
        reporter.publish(&snapshot(20));

        let text = String::from_utf8(reporter.into_inner()).unwrap();
        let wpms: Vec<u64> = text
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["wpm"].as_u64().unwrap())
            .collect();
        assert_eq!(wpms, vec![10, 20]);
    }

    #[test]
    fn test_null_reporter() {
        NullReporter.publish(&snapshot(5));
    }
}
