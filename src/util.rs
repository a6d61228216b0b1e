use crate::clock::Millis;

/// Characters per standard word
pub const CHARS_PER_WORD: f64 = 5.0;

pub fn mean(data: &[f64]) -> Option<f64> {
    let sum = data.iter().sum::<f64>();
    let count = data.len();

    match count {
        positive if positive > 0 => Some(sum / count as f64),
        _ => None,
    }
}

/// (WPM, CPM) over active minutes, both rounded. Zero when no active time
/// has been recorded.
pub fn typing_speed(chars: u64, active_ms: Millis) -> (u32, u32) {
    let active_min = active_ms as f64 / 60_000.0;
    if active_min <= 0.0 {
        return (0, 0);
    }
    let chars = chars as f64;
    let wpm = ((chars / CHARS_PER_WORD) / active_min).round();
    let cpm = (chars / active_min).round();
    (wpm as u32, cpm as u32)
}
