//! Progress animation shown while a recording is being analyzed.

use ratatui::{
    prelude::*,
    widgets::{Paragraph, Wrap},
};
use std::time::Instant;

const SPINNER: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Spinner plus a bouncing dot track, advanced once per rendered frame.
pub struct AnalyzingAnimation {
    frame: usize,
    track_width: usize,
    started: Instant,
}

impl AnalyzingAnimation {
    pub fn new(track_width: usize) -> Self {
        Self {
            frame: 0,
            track_width: track_width.max(3),
            started: Instant::now(),
        }
    }

    pub fn update(&mut self) {
        self.frame = self.frame.wrapping_add(1);
    }

    pub fn spinner(&self) -> &'static str {
        SPINNER[self.frame % SPINNER.len()]
    }

    /// Column of the moving dot; sweeps right then back.
    pub fn dot_position(&self) -> usize {
        let span = self.track_width - 1;
        let phase = self.frame % (span * 2);
        if phase <= span {
            phase
        } else {
            span * 2 - phase
        }
    }

    fn track(&self) -> String {
        let dot = self.dot_position();
        (0..self.track_width)
            .map(|i| if i == dot { '●' } else { '·' })
            .collect()
    }

    pub fn draw(&self, frame: &mut Frame, area: Rect, sentence: &str) {
        let seconds = self.started.elapsed().as_secs();
        let lines = vec![
            Line::from(Span::styled(
                format!("{} Listening to your reading… {}s", self.spinner(), seconds),
                Style::default().fg(Color::Rgb(206, 224, 220)).bold(),
            )),
            Line::from(""),
            Line::from(Span::styled(
                self.track(),
                Style::default().fg(Color::Rgb(255, 107, 157)),
            )),
            Line::from(""),
            Line::from(Span::styled(
                format!("“{sentence}”"),
                Style::default().fg(Color::Rgb(185, 207, 212)).italic(),
            )),
        ];

        let top = area.y + area.height.saturating_sub(lines.len() as u16) / 2;
        let centered = Rect {
            x: area.x,
            y: top,
            width: area.width,
            height: area.height.saturating_sub(top - area.y),
        };
        frame.render_widget(
            Paragraph::new(lines)
                .alignment(Alignment::Center)
                .wrap(Wrap { trim: true }),
            centered,
        );
    }
}
