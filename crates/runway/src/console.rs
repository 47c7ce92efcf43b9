use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use runway_core::{Choice, DecisionPrompt, HeadlessPrompt, LineProgress, ProgressSink, Prompt};

const TICK: Duration = Duration::from_millis(100);

/// Asks on stderr and reads the answer from stdin.
///
/// A live progress bar sharing the terminal is hidden while the question is
/// open and shown again once it is answered.
pub struct ConsolePrompt {
    progress: Option<ProgressBar>,
}

impl ConsolePrompt {
    pub fn new(progress: Option<ProgressBar>) -> Self {
        Self { progress }
    }
}

impl DecisionPrompt for ConsolePrompt {
    fn ask(&self, prompt: &Prompt) -> Choice {
        let _paused = self.progress.as_ref().map(PausedBar::new);
        ask_on_terminal(prompt)
    }
}

/// Keeps a bar off the terminal until dropped.
struct PausedBar<'a> {
    bar: &'a ProgressBar,
}

impl<'a> PausedBar<'a> {
    fn new(bar: &'a ProgressBar) -> Self {
        bar.disable_steady_tick();
        bar.set_draw_target(ProgressDrawTarget::hidden());
        Self { bar }
    }
}

impl Drop for PausedBar<'_> {
    fn drop(&mut self) {
        self.bar.set_draw_target(ProgressDrawTarget::stderr());
        self.bar.enable_steady_tick(TICK);
    }
}

fn ask_on_terminal(prompt: &Prompt) -> Choice {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "\n{}\n", prompt.message);
    let _ = writeln!(stderr, "  [1] {}", prompt.yes);
    let _ = writeln!(stderr, "  [2] {}", prompt.no);
    if let Some(never) = &prompt.never {
        let _ = writeln!(stderr, "  [3] {never}");
    }

    let stdin = io::stdin();
    loop {
        let _ = write!(stderr, "> ");
        let _ = stderr.flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => return Choice::Canceled,
            Ok(_) => {}
        }
        if let Some(choice) = parse_answer(&line, prompt) {
            return choice;
        }
        let _ = writeln!(stderr, "Please answer with one of the numbers above.");
    }
}

/// Accepts the option number or its label, case-insensitively.
fn parse_answer(input: &str, prompt: &Prompt) -> Option<Choice> {
    let answer = input.trim();
    if answer.is_empty() {
        return None;
    }
    let is = |label: &str| answer.eq_ignore_ascii_case(label);
    if answer == "1" || is(&prompt.yes) {
        Some(Choice::Yes)
    } else if answer == "2" || is(&prompt.no) {
        Some(Choice::No)
    } else if prompt
        .never
        .as_deref()
        .is_some_and(|never| answer == "3" || is(never))
    {
        Some(Choice::Never)
    } else {
        None
    }
}

/// A progress bar while the fraction is known, a spinner otherwise.
pub struct ConsoleProgress {
    bar: ProgressBar,
    determinate: Mutex<bool>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style());
        bar.enable_steady_tick(TICK);
        Self {
            bar,
            determinate: Mutex::new(false),
        }
    }
}

impl Drop for ConsoleProgress {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {percent:>3}%")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸━")
}

impl ProgressSink for ConsoleProgress {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn update(&self, message: Option<&str>, progress: Option<f64>) {
        if let Some(message) = message {
            self.bar.set_message(message.to_string());
        }
        let Some(progress) = progress else {
            return;
        };
        let Ok(mut determinate) = self.determinate.lock() else {
            return;
        };
        if progress.is_finite() {
            if !*determinate {
                self.bar.set_length(1000);
                self.bar.set_style(bar_style());
                *determinate = true;
            }
            self.bar
                .set_position((progress.clamp(0.0, 1.0) * 1000.0) as u64);
        } else if *determinate {
            self.bar.set_style(spinner_style());
            *determinate = false;
        }
    }
}

/// Progress for the current terminal: a live bar when interactive, plain
/// lines when headless or redirected.
pub fn progress_sink(headless: bool) -> Arc<dyn ProgressSink> {
    console(headless).0
}

/// Progress sink and prompt that share the terminal.
pub fn console(headless: bool) -> (Arc<dyn ProgressSink>, Arc<dyn DecisionPrompt>) {
    if headless {
        return (line_progress(), Arc::new(HeadlessPrompt::default()));
    }
    if !io::stderr().is_terminal() {
        return (line_progress(), Arc::new(ConsolePrompt::new(None)));
    }
    let progress = ConsoleProgress::new();
    let prompt = ConsolePrompt::new(Some(progress.bar.clone()));
    (Arc::new(progress), Arc::new(prompt))
}

fn line_progress() -> Arc<dyn ProgressSink> {
    Arc::new(LineProgress::new(io::stdout(), "Downloading runtime"))
}
