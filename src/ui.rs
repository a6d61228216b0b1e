use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Paragraph, Widget, Wrap},
    Frame,
};
use unicode_width::UnicodeWidthChar;

use crate::{App, AppState};

const HORIZONTAL_MARGIN: u16 = 5;
const VERTICAL_MARGIN: u16 = 2;

pub fn draw(app: &App, f: &mut Frame) {
    f.render_widget(app, f.area());
}

impl Widget for &App {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let snap = &self.live;
        // styles
        let bold_style = Style::default().add_modifier(Modifier::BOLD);
        let green_bold_style = Style::default().patch(bold_style).fg(Color::Green);
        let dim_style = Style::default().add_modifier(Modifier::DIM);
        let italic_style = Style::default().add_modifier(Modifier::ITALIC);
        let idle_style = Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD | Modifier::ITALIC);
        let magenta_style = Style::default().fg(Color::Magenta);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .horizontal_margin(HORIZONTAL_MARGIN)
            .vertical_margin(VERTICAL_MARGIN)
            .constraints([
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Length(2),
                Constraint::Length(1),
                Constraint::Length(2),
                Constraint::Length(1),
                Constraint::Min(1),
                Constraint::Length(1),
            ])
            .split(area);

        let status = match (&self.state, snap.has_data, self.engine.is_bursting()) {
            (AppState::Finished, _, _) => Span::styled("session finished", bold_style),
            (AppState::Measuring, false, _) => Span::styled("start typing", italic_style),
            (AppState::Measuring, true, true) => Span::styled("typing", green_bold_style),
            (AppState::Measuring, true, false) => {
                Span::styled("IDLE - paused until the next keystroke", idle_style)
            }
        };
        Paragraph::new(Line::from(vec![
            Span::styled("keypace", magenta_style.patch(bold_style)),
            Span::raw("  "),
            status,
        ]))
        .render(chunks[0], buf);

        let speed = Paragraph::new(vec![
            Line::from(vec![
                Span::styled(format!("{} wpm", snap.wpm), green_bold_style),
                Span::raw("   "),
                Span::styled(format!("{} cpm", snap.cpm), bold_style),
            ]),
            Line::from(Span::styled(format!("peak {} wpm", snap.peak_wpm), dim_style)),
        ])
        .alignment(Alignment::Center);
        speed.render(chunks[2], buf);

        let counters = Paragraph::new(vec![
            Line::from(format!(
                "chars {}   deletions {}   pasted {}",
                snap.counted_chars, snap.backspace_count, snap.pasted_char_count
            )),
            Line::from(Span::styled(
                format!(
                    "active {}   elapsed {}",
                    clock_text(snap.active_secs),
                    clock_text(snap.elapsed_secs)
                ),
                dim_style,
            )),
        ])
        .alignment(Alignment::Center);
        counters.render(chunks[4], buf);

        let echo_area = chunks[6];
        let capacity = echo_area.width as usize * echo_area.height as usize;
        Paragraph::new(visible_tail(&self.echo, capacity))
            .wrap(Wrap { trim: false })
            .render(echo_area, buf);

        let help = match self.state {
            AppState::Measuring => "esc finish   ctrl+c quit",
            AppState::Finished => "r restart   esc/q quit",
        };
        Paragraph::new(Span::styled(help, italic_style))
            .alignment(Alignment::Center)
            .render(chunks[7], buf);
    }
}

fn clock_text(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Longest suffix of `text` that fits in `width` terminal cells
fn visible_tail(text: &str, width: usize) -> &str {
    let mut used = 0;
    for (idx, c) in text.char_indices().rev() {
        used += c.width().unwrap_or(0);
        if used > width {
            return &text[idx + c.len_utf8()..];
        }
    }
    text
}
