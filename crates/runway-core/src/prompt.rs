//! Collaborators the orchestrator talks to: someone to ask, and somewhere to
//! report progress.

use std::io::Write;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub message: String,
    pub yes: String,
    pub no: String,
    /// Label of the "remember this answer" option, when offered.
    pub never: Option<String>,
}

impl Prompt {
    pub fn new(message: impl Into<String>, yes: impl Into<String>, no: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            yes: yes.into(),
            no: no.into(),
            never: None,
        }
    }

    #[must_use]
    pub fn with_never(mut self, never: impl Into<String>) -> Self {
        self.never = Some(never.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Yes,
    No,
    Never,
    Canceled,
}

pub trait DecisionPrompt: Send + Sync {
    fn ask(&self, prompt: &Prompt) -> Choice;

    /// Whether a person is around to answer.
    fn is_interactive(&self) -> bool {
        true
    }
}

/// Answers every prompt with a fixed choice.
#[derive(Debug, Clone, Copy)]
pub struct HeadlessPrompt {
    pub default: Choice,
}

impl Default for HeadlessPrompt {
    fn default() -> Self {
        Self {
            default: Choice::No,
        }
    }
}

impl DecisionPrompt for HeadlessPrompt {
    fn ask(&self, prompt: &Prompt) -> Choice {
        log::info!("{} -> {:?} (headless)", prompt.message, self.default);
        self.default
    }

    fn is_interactive(&self) -> bool {
        false
    }
}

pub trait ProgressSink: Send + Sync {
    /// `progress` is a fraction in `[0, 1]`; NaN means indeterminate and
    /// `None` leaves the bar alone.
    fn update(&self, message: Option<&str>, progress: Option<f64>);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn update(&self, _message: Option<&str>, _progress: Option<f64>) {}
}

/// Plain-text progress: one `message [percent]` line per change.
pub struct LineProgress<W> {
    fallback: String,
    state: Mutex<LineState<W>>,
}

struct LineState<W> {
    out: W,
    last: String,
}

impl<W: Write + Send> LineProgress<W> {
    /// `fallback` stands in for updates that carry no message.
    pub fn new(out: W, fallback: impl Into<String>) -> Self {
        Self {
            fallback: fallback.into(),
            state: Mutex::new(LineState {
                out,
                last: String::new(),
            }),
        }
    }

    pub fn into_inner(self) -> W {
        match self.state.into_inner() {
            Ok(state) => state.out,
            Err(poisoned) => poisoned.into_inner().out,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn format_line(message: &str, progress: Option<f64>) -> String {
    match progress {
        Some(fraction) if fraction.is_finite() => {
            let percent = (fraction.clamp(0.0, 1.0) * 100.0) as u8;
            format!("{message} [{percent}]")
        }
        _ => message.to_string(),
    }
}

impl<W: Write + Send> ProgressSink for LineProgress<W> {
    fn update(&self, message: Option<&str>, progress: Option<f64>) {
        let line = format_line(message.unwrap_or(&self.fallback), progress);
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.last != line {
            let _ = writeln!(state.out, "{line}");
            let _ = state.out.flush();
            state.last = line;
        }
    }
}
