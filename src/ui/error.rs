//! Full-screen fallback for unexpected failures.
//!
//! Anything the practice screen cannot show as a categorized error ends up
//! here: a red screen with the message and the choice to restart practice
//! from scratch or quit.

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{prelude::*, widgets::Paragraph};
use std::io::{self, Stdout};

/// What the user chose on the error screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorChoice {
    /// Start the practice flow again
    Restart,
    Quit,
}

impl ErrorChoice {
    pub fn from_key(code: KeyCode) -> Option<Self> {
        match code {
            KeyCode::Char('r') | KeyCode::Enter => Some(ErrorChoice::Restart),
            KeyCode::Char('q') | KeyCode::Esc => Some(ErrorChoice::Quit),
            _ => None,
        }
    }
}

pub struct ErrorScreen {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    active: bool,
}

impl ErrorScreen {
    /// Enters raw mode and the alternate screen.
    ///
    /// # Errors
    /// - If the terminal cannot be initialized
    pub fn new() -> anyhow::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        Ok(ErrorScreen {
            terminal,
            active: true,
        })
    }

    /// Shows `error_message` until the user restarts (r/Enter) or quits (q/Esc).
    ///
    /// # Errors
    /// - If terminal rendering or input polling fails
    pub fn show_error(&mut self, error_message: &str) -> anyhow::Result<ErrorChoice> {
        loop {
            self.terminal
                .draw(|frame| draw_error_screen(frame, error_message))?;

            if event::poll(std::time::Duration::from_millis(100))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    if let Some(choice) = ErrorChoice::from_key(key.code) {
                        tracing::debug!("Error screen choice: {:?}", choice);
                        return Ok(choice);
                    }
                }
            }
        }
    }

    /// Restores the terminal. Safe to call more than once.
    ///
    /// # Errors
    /// - If terminal mode cannot be disabled
    pub fn cleanup(&mut self) -> anyhow::Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        disable_raw_mode()?;
        execute!(self.terminal.backend_mut(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()?;
        Ok(())
    }
}

impl Drop for ErrorScreen {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

fn draw_error_screen(frame: &mut Frame, error_message: &str) {
    let area = frame.area();
    let red = Style::default().bg(Color::Rgb(255, 0, 0));
    frame.buffer_mut().set_style(area, red);

    let padding_x = area.width / 10;
    let text_width = (area.width * 80) / 100;

    let white = Style::default()
        .fg(Color::Rgb(255, 255, 255))
        .bg(Color::Rgb(255, 0, 0));
    let text = vec![
        Line::from(Span::styled(error_message, white.bold())),
        Line::from(""),
        Line::from(Span::styled("Press r to start over, or q to quit", white)),
    ];

    let paragraph = Paragraph::new(text)
        .alignment(Alignment::Center)
        .wrap(ratatui::widgets::Wrap { trim: true });

    let centered_area = Rect {
        x: area.x + padding_x,
        y: area.y + area.height / 3,
        width: text_width,
        height: area.height - area.height / 3,
    };
    frame.render_widget(paragraph, centered_area);
}
