use std::fmt;

/// Verbosity of messages reported while building expressions.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticLevel {
    /// Don't show any diagnostics.
    #[default]
    Off,
    /// Report only rejected calls.
    Warn,
    /// Report every inference, including results reused from the cache.
    Info,
}

impl DiagnosticLevel {
    /// Parse a level name ("off", "warn" or "info").
    pub fn from_name(name: &str) -> Option<DiagnosticLevel> {
        match name {
            "off" => Some(DiagnosticLevel::Off),
            "warn" => Some(DiagnosticLevel::Warn),
            "info" => Some(DiagnosticLevel::Info),
            _ => None,
        }
    }
}

/// Diagnostic reporter for type inference.
///
/// Messages are printed to stdout as single lines of the form
/// `W| nn.conv2d: message`.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    level: DiagnosticLevel,
}

impl Diagnostics {
    pub fn new(level: DiagnosticLevel) -> Self {
        Self { level }
    }

    /// Return true if diagnostic messages are enabled at a given level.
    pub fn enabled(&self, level: DiagnosticLevel) -> bool {
        self.level >= level
    }

    /// Log a message for operator `op` at the [`Info`](DiagnosticLevel::Info) level.
    pub fn info(&self, op: &str, message: fmt::Arguments<'_>) {
        if let Some(line) = self.format(DiagnosticLevel::Info, op, message) {
            println!("{}", line);
        }
    }

    /// Log a message for operator `op` at the [`Warn`](DiagnosticLevel::Warn) level.
    pub fn warn(&self, op: &str, message: fmt::Arguments<'_>) {
        if let Some(line) = self.format(DiagnosticLevel::Warn, op, message) {
            println!("{}", line);
        }
    }

    /// Format a message, or return `None` if `level` is disabled.
    fn format(
        &self,
        level: DiagnosticLevel,
        op: &str,
        message: fmt::Arguments<'_>,
    ) -> Option<String> {
        let level_char = match level {
            DiagnosticLevel::Off => return None,
            DiagnosticLevel::Warn => 'W',
            DiagnosticLevel::Info => 'I',
        };
        if !self.enabled(level) {
            return None;
        }
        Some(format!("{}| {}: {}", level_char, op, message))
    }
}
