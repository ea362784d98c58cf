//! Colored terminal output for the CLI
//!
//! Uses `termcolor` for cross-platform colored terminal output.
//! Respects the `NO_COLOR` environment variable and the `--color` flag.

use om_core::RunError;
use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Resolve `ColorChoice` from the CLI flag and environment.
///
/// Priority: `NO_COLOR` env > `--color` flag > auto-detect TTY.
pub fn resolve_color_choice(flag: Option<&str>) -> ColorChoice {
    if std::env::var_os("NO_COLOR").is_some() {
        return ColorChoice::Never;
    }
    match flag {
        Some("always") => ColorChoice::Always,
        Some("never") => ColorChoice::Never,
        _ => ColorChoice::Auto,
    }
}

/// Styled output writer for the terminal.
pub struct StyledOutput {
    stdout: StandardStream,
    stderr: StandardStream,
}

impl StyledOutput {
    /// Create a new styled output with the given color choice.
    pub fn new(choice: ColorChoice) -> Self {
        Self {
            stdout: StandardStream::stdout(choice),
            stderr: StandardStream::stderr(choice),
        }
    }

    fn write_styled(&mut self, label: &str, color: Color, text: &str) {
        let mut spec = ColorSpec::new();
        spec.set_fg(Some(color)).set_bold(true);
        let _ = self.stdout.set_color(&spec);
        let _ = write!(self.stdout, "{}", label);
        let _ = self.stdout.reset();
        let _ = writeln!(self.stdout, " {}", text);
    }

    /// Green "ok" line.
    pub fn success(&mut self, text: &str) {
        self.write_styled("ok", Color::Green, text);
    }

    /// Red "FAILED" line on stdout.
    pub fn failure(&mut self, text: &str) {
        self.write_styled("FAILED", Color::Red, text);
    }

    /// Plain line on stdout.
    pub fn line(&mut self, text: &str) {
        let _ = writeln!(self.stdout, "{}", text);
    }

    /// Report a top-level error on stderr, with the VM backtrace if any.
    pub fn report(&mut self, error: &anyhow::Error) {
        let mut spec = ColorSpec::new();
        spec.set_fg(Some(Color::Red)).set_bold(true);
        let _ = self.stderr.set_color(&spec);
        let _ = write!(self.stderr, "error");
        let _ = self.stderr.reset();
        let _ = writeln!(self.stderr, ": {:#}", error);

        if let Some(run) = error.downcast_ref::<RunError>() {
            for frame in &run.backtrace {
                let _ = writeln!(self.stderr, "    at {}", frame);
            }
        }
        let _ = self.stderr.flush();
    }
}
