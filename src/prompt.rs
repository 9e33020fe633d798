//! Prompting port.
//!
//! Operations that may need a value from the user take a `&dyn Prompter`.
//! Whether the session is interactive is decided by the caller when the
//! prompter is built; a non-interactive prompter answers with defaults
//! when it has one and fails fast otherwise.

use std::io::Write;

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use rustyline::DefaultEditor;
use rustyline::config::Behavior;
use rustyline::error::ReadlineError;

use crate::error::PromptError;

/// Text input, selection and confirmation.
pub trait Prompter: Send + Sync {
    fn is_interactive(&self) -> bool;

    /// Free text with an optional default (returned on empty input).
    fn input(&self, message: &str, default: Option<&str>) -> Result<String, PromptError>;

    /// Masked input.
    fn password(&self, message: &str) -> Result<String, PromptError>;

    /// Pick one of `options`.
    fn select(&self, message: &str, options: &[String]) -> Result<String, PromptError>;

    /// Yes/no question.
    fn confirm(&self, message: &str, default: bool) -> Result<bool, PromptError>;
}

/// Prompter backed by the controlling terminal.
pub struct TerminalPrompter {
    interactive: bool,
}

impl TerminalPrompter {
    pub fn new(interactive: bool) -> Self {
        Self { interactive }
    }

    fn non_interactive(message: &str) -> PromptError {
        PromptError::NonInteractive {
            prompt: message.to_string(),
        }
    }

    fn editor() -> Result<DefaultEditor, PromptError> {
        let config = rustyline::Config::builder()
            .behavior(Behavior::PreferTerm)
            .auto_add_history(false)
            .build();
        DefaultEditor::with_config(config).map_err(|e| PromptError::Io(e.to_string()))
    }

    fn readline(prompt: &str, initial: &str) -> Result<String, PromptError> {
        let mut editor = Self::editor()?;
        match editor.readline_with_initial(prompt, (initial, "")) {
            Ok(line) => Ok(line.trim().to_string()),
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => Err(PromptError::Interrupted),
            Err(e) => Err(PromptError::Io(e.to_string())),
        }
    }
}

impl Prompter for TerminalPrompter {
    fn is_interactive(&self) -> bool {
        self.interactive
    }

    fn input(&self, message: &str, default: Option<&str>) -> Result<String, PromptError> {
        if !self.interactive {
            return default
                .map(str::to_string)
                .ok_or_else(|| Self::non_interactive(message));
        }
        let line = Self::readline(&format!("{}: ", message), default.unwrap_or(""))?;
        match (line.is_empty(), default) {
            (true, Some(default)) => Ok(default.to_string()),
            _ => Ok(line),
        }
    }

    fn password(&self, message: &str) -> Result<String, PromptError> {
        if !self.interactive {
            return Err(Self::non_interactive(message));
        }
        read_masked(message)
    }

    fn select(&self, message: &str, options: &[String]) -> Result<String, PromptError> {
        if !self.interactive || options.is_empty() {
            return Err(Self::non_interactive(message));
        }
        let mut stderr = std::io::stderr();
        loop {
            let _ = writeln!(stderr, "{}", message);
            for (i, option) in options.iter().enumerate() {
                let _ = writeln!(stderr, "  {:>2}) {}", i + 1, option);
            }
            let answer = Self::readline(&format!("Choose [1-{}]: ", options.len()), "")?;
            if let Ok(n) = answer.parse::<usize>()
                && (1..=options.len()).contains(&n)
            {
                return Ok(options[n - 1].clone());
            }
            if let Some(option) = options.iter().find(|o| **o == answer) {
                return Ok(option.clone());
            }
            let _ = writeln!(stderr, "Invalid choice '{}'", answer);
        }
    }

    fn confirm(&self, message: &str, default: bool) -> Result<bool, PromptError> {
        if !self.interactive {
            return Err(Self::non_interactive(message));
        }
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        let answer = Self::readline(&format!("{} {} ", message, hint), "")?;
        Ok(parse_yes_no(&answer).unwrap_or(default))
    }
}

fn parse_yes_no(answer: &str) -> Option<bool> {
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// Read a line in raw mode without echoing it.
fn read_masked(message: &str) -> Result<String, PromptError> {
    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "{}: ", message);
    let _ = stderr.flush();

    terminal::enable_raw_mode().map_err(|e| PromptError::Io(e.to_string()))?;
    let result = read_masked_raw();
    let _ = terminal::disable_raw_mode();
    let _ = writeln!(stderr);
    result
}

fn read_masked_raw() -> Result<String, PromptError> {
    let mut value = String::new();
    loop {
        let ev = event::read().map_err(|e| PromptError::Io(e.to_string()))?;
        let Event::Key(key) = ev else { continue };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match key.code {
            KeyCode::Enter => return Ok(value),
            KeyCode::Backspace => {
                value.pop();
            }
            KeyCode::Char('c' | 'd') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Err(PromptError::Interrupted);
            }
            KeyCode::Esc => return Err(PromptError::Interrupted),
            KeyCode::Char(c) => value.push(c),
            _ => {}
        }
    }
}
