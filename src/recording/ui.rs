//! Terminal user interface for a practice session.
//!
//! Shows the sentence to read, the live visualization while recording, a
//! spinner while the recording is analyzed, and the scored feedback or error
//! afterwards.

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    prelude::*,
    style::{Color, Style},
    widgets::{Block, Borders, Paragraph, Sparkline, Wrap},
};
use std::error::Error;
use std::io::{stdout, Stdout};
use std::time::Duration;

use super::session::SessionState;
use super::visualizations::VisualFrame;
use crate::feedback::animation::AnalyzingAnimation;
use crate::feedback::presenter::{ErrorPresentation, Presentation};

const FG: Color = Color::Rgb(206, 224, 220);
const MUTED: Color = Color::Rgb(185, 207, 212);
const BG: Color = Color::Rgb(0, 0, 0);
const ACCENT: Color = Color::Rgb(255, 107, 157);

/// User input during practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PracticeCommand {
    /// No key pressed
    Continue,
    /// Start recording, or stop and analyze (Enter or Space)
    StartStop,
    /// Record the sentence again ('r')
    ReRecord,
    /// Leave practice (Escape, 'q' or Ctrl+C)
    Quit,
}

/// Everything one frame of the practice screen shows.
pub struct PracticeView<'a> {
    pub state: SessionState,
    pub sentence: &'a str,
    /// Position of the sentence in the story's narration
    pub time_range: Option<&'a str>,
    pub visual: Option<&'a VisualFrame>,
    pub elapsed: Duration,
    pub ceiling: Duration,
    pub presentation: Option<&'a Presentation>,
    pub error: Option<&'a ErrorPresentation>,
}

pub struct PracticeTui {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl PracticeTui {
    /// Enters raw mode and the alternate screen.
    ///
    /// # Errors
    /// - If the terminal cannot be initialized
    pub fn new() -> Result<Self, Box<dyn Error>> {
        enable_raw_mode()?;
        let mut stdout = stdout();
        execute!(stdout, crossterm::terminal::EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        Ok(Self { terminal })
    }

    /// Columns available for visualization bars.
    pub fn width(&self) -> usize {
        self.terminal
            .size()
            .map(|size| size.width as usize)
            .unwrap_or(80)
    }

    /// Draws one frame.
    ///
    /// # Errors
    /// - If terminal rendering fails
    pub fn render(
        &mut self,
        view: &PracticeView<'_>,
        animation: &AnalyzingAnimation,
    ) -> Result<(), Box<dyn Error>> {
        self.terminal.draw(|frame| draw_practice(frame, view, animation))?;
        Ok(())
    }

    /// Polls for a key press for up to `timeout`.
    ///
    /// # Errors
    /// - If event polling fails
    pub fn handle_input(&mut self, timeout: Duration) -> Result<PracticeCommand, Box<dyn Error>> {
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    return Ok(PracticeCommand::Continue);
                }
                return Ok(match key.code {
                    KeyCode::Enter | KeyCode::Char(' ') => {
                        tracing::debug!("Start/stop key pressed");
                        PracticeCommand::StartStop
                    }
                    KeyCode::Char('r') => {
                        tracing::debug!("Re-record key pressed");
                        PracticeCommand::ReRecord
                    }
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        PracticeCommand::Quit
                    }
                    KeyCode::Char('q') | KeyCode::Esc => PracticeCommand::Quit,
                    _ => PracticeCommand::Continue,
                });
            }
        }
        Ok(PracticeCommand::Continue)
    }

    /// Restores the terminal.
    ///
    /// # Errors
    /// - If raw mode cannot be disabled or the screen cannot be left
    pub fn cleanup(&mut self) -> Result<(), Box<dyn Error>> {
        disable_raw_mode()?;
        execute!(
            self.terminal.backend_mut(),
            crossterm::terminal::LeaveAlternateScreen
        )?;
        self.terminal.show_cursor()?;
        Ok(())
    }
}

fn draw_practice(frame: &mut Frame, view: &PracticeView<'_>, animation: &AnalyzingAnimation) {
    let area = frame.area();
    let [header, body, footer] = Layout::vertical([
        Constraint::Length(4),
        Constraint::Min(3),
        Constraint::Length(1),
    ])
    .areas(area);

    let mut lines = vec![Line::from(Span::styled(
        view.sentence,
        Style::default().fg(FG).bold(),
    ))];
    if let Some(range) = view.time_range {
        lines.push(Line::from(Span::styled(range, Style::default().fg(MUTED))));
    }
    let sentence = Paragraph::new(lines)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::BOTTOM)
                .border_style(Style::default().fg(MUTED)),
        );
    frame.render_widget(sentence, header);

    match view.state {
        SessionState::Recording | SessionState::Stopped => draw_bars(frame, body, view.visual),
        SessionState::Analyzing => animation.draw(frame, body, view.sentence),
        SessionState::Result => match view.presentation {
            Some(presentation) => draw_result(frame, body, presentation),
            None => draw_hint(frame, body, "Press Enter to record"),
        },
        SessionState::Error => match view.error {
            Some(error) => draw_error(frame, body, error),
            None => draw_hint(frame, body, "Press r to record again"),
        },
        SessionState::Idle => draw_hint(frame, body, "Press Enter or Space to start reading"),
    }

    frame.render_widget(footer_line(view), footer);
}

/// Mirrored sparkline: bars grow up in the top two thirds and the inverse fills below.
fn draw_bars(frame: &mut Frame, area: Rect, visual: Option<&VisualFrame>) {
    let empty = Vec::new();
    let bars = visual.map(|v| &v.bars).unwrap_or(&empty);

    let top_height = area.height / 3 * 2;
    let top = Rect {
        height: top_height,
        ..area
    };
    let bottom = Rect {
        y: area.y + top_height,
        height: area.height.saturating_sub(top_height),
        ..area
    };

    frame.render_widget(
        Sparkline::default()
            .data(bars)
            .max(100)
            .style(Style::default().bg(BG).fg(FG)),
        top,
    );

    let inverted: Vec<u64> = bars.iter().map(|&v| 100u64.saturating_sub(v)).collect();
    frame.render_widget(
        Sparkline::default()
            .data(&inverted)
            .max(100)
            .style(Style::default().bg(MUTED).fg(BG)),
        bottom,
    );
}

fn draw_hint(frame: &mut Frame, area: Rect, hint: &str) {
    let y = area.y + area.height / 2;
    frame.render_widget(
        Paragraph::new(Span::styled(hint, Style::default().fg(MUTED))).alignment(Alignment::Center),
        Rect {
            y,
            height: 1.min(area.height),
            ..area
        },
    );
}

fn draw_result(frame: &mut Frame, area: Rect, presentation: &Presentation) {
    let mut lines = vec![
        Line::from(Span::styled(
            format!("{}  {}", presentation.icon, presentation.score),
            Style::default().fg(ACCENT).bold(),
        )),
        Line::from(""),
        Line::from(Span::styled(presentation.message, Style::default().fg(FG))),
    ];

    if let Some(badge) = &presentation.medal_badge {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            badge.clone(),
            Style::default().fg(Color::Yellow).bold(),
        )));
    }

    if !presentation.sub_scores.is_empty() {
        lines.push(Line::from(""));
        let spans: Vec<Span> = presentation
            .sub_scores
            .iter()
            .enumerate()
            .flat_map(|(i, sub)| {
                let sep = if i == 0 { "" } else { "   " };
                [
                    Span::raw(sep),
                    Span::styled(format!("{} ", sub.label), Style::default().fg(MUTED)),
                    Span::styled(sub.value.to_string(), Style::default().fg(FG).bold()),
                ]
            })
            .collect();
        lines.push(Line::from(spans));
    }

    if let Some(text) = &presentation.feedback_text {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            text.clone(),
            Style::default().fg(MUTED).italic(),
        )));
    }

    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "r record again · q quit",
        Style::default().fg(MUTED),
    )));

    let height = (lines.len() as u16).min(area.height);
    let panel = Rect {
        y: area.y + area.height.saturating_sub(height) / 2,
        height,
        ..area
    };
    frame.render_widget(
        Paragraph::new(lines)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true }),
        panel,
    );
}

fn draw_error(frame: &mut Frame, area: Rect, error: &ErrorPresentation) {
    let lines = vec![
        Line::from(Span::styled(
            error.message.clone(),
            Style::default().fg(Color::White).bg(Color::Red).bold(),
        )),
        Line::from(""),
        Line::from(Span::styled(error.action_hint, Style::default().fg(MUTED))),
    ];
    let panel = Rect {
        y: area.y + area.height.saturating_sub(3) / 2,
        height: 3.min(area.height),
        ..area
    };
    frame.render_widget(
        Paragraph::new(lines)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true }),
        panel,
    );
}

fn footer_line(view: &PracticeView<'_>) -> Paragraph<'static> {
    let indicator = match view.state {
        SessionState::Recording => Span::styled("● ", Style::default().fg(Color::Red)),
        SessionState::Stopped | SessionState::Analyzing => {
            Span::styled("◌ ", Style::default().fg(Color::Yellow))
        }
        SessionState::Result => Span::styled("✓ ", Style::default().fg(Color::Green)),
        SessionState::Error => Span::styled("✗ ", Style::default().fg(Color::Red)),
        SessionState::Idle => Span::styled("○ ", Style::default().fg(MUTED)),
    };

    let elapsed = view.elapsed.as_secs();
    let ceiling = view.ceiling.as_secs();
    let level = view.visual.map(|v| v.level).unwrap_or(0);

    Paragraph::new(Line::from(vec![
        indicator,
        Span::raw(format!("{}", view.state)),
        Span::raw(" / "),
        Span::raw(format!(
            "{}:{:02} of {}:{:02}",
            elapsed / 60,
            elapsed % 60,
            ceiling / 60,
            ceiling % 60
        )),
        Span::raw(" / "),
        Span::raw(format!("{level}%")),
    ]))
    .style(Style::default().fg(MUTED).bg(BG))
}
