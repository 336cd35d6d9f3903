// Guest exception reporting - message, source excerpt with a column marker, and stack

use regex::Regex;
use rquickjs::CaughtError;
use std::fmt::Write as _;
use std::sync::LazyLock;
use thiserror::Error;

/// `file:line:column` of a stack frame, with or without surrounding parentheses
static FRAME_LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^\s()]+):(\d+):(\d+)").expect("Invalid regex"));

/// A guest error caught at a host call site
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ScriptError {
    pub message: String,
    pub stack: Option<String>,
    pub file: Option<String>,
    /// 1-based
    pub line: Option<u32>,
    /// 1-based
    pub column: Option<u32>,
}

impl ScriptError {
    /// Build from a message and optional stack, taking the location from the
    /// first stack frame that carries one
    pub fn new(message: impl Into<String>, stack: Option<String>) -> Self {
        let location = stack.as_deref().and_then(parse_frame_location);
        let (file, line, column) = match location {
            Some((file, line, column)) => (Some(file), Some(line), Some(column)),
            None => (None, None, None),
        };
        Self {
            message: message.into(),
            stack,
            file,
            line,
            column,
        }
    }

    /// Convert whatever the guest threw
    ///
    /// Explicit `fileName`/`lineNumber`/`columnNumber` properties win over the
    /// location parsed from the stack.
    pub fn from_caught(caught: CaughtError<'_>) -> Self {
        match caught {
            CaughtError::Exception(exception) => {
                let mut error = Self::new(exception.message().unwrap_or_default(), exception.stack());
                let number = |key: &str| {
                    exception
                        .get::<_, Option<f64>>(key)
                        .ok()
                        .flatten()
                        .filter(|n| n.is_finite() && *n >= 1.0)
                        .map(|n| n as u32)
                };
                if let Some(file) = exception.get::<_, Option<String>>("fileName").ok().flatten() {
                    error.file = Some(file);
                }
                if let Some(line) = number("lineNumber") {
                    error.line = Some(line);
                }
                if let Some(column) = number("columnNumber") {
                    error.column = Some(column);
                }
                error
            }
            CaughtError::Value(value) => {
                let message = match value.as_string().and_then(|s| s.to_string().ok()) {
                    Some(text) => text,
                    None => match value.as_number() {
                        Some(number) => number.to_string(),
                        None => format!("uncaught {} value", value.type_name()),
                    },
                };
                Self::new(message, None)
            }
            CaughtError::Error(error) => Self::new(error.to_string(), None),
        }
    }

    /// The offending source line followed by a caret under the column
    pub fn excerpt(&self, source: &str) -> Option<String> {
        let line = self.line? as usize;
        let text = source.lines().nth(line.checked_sub(1)?)?;
        let column = self.column.unwrap_or(1).saturating_sub(1) as usize;
        Some(format!("{}\n{}", text, column_marker(text, column)))
    }

    /// Full multi-line report: message, excerpt when `source` is known, stack
    pub fn render(&self, source: Option<&str>) -> String {
        let mut report = format!("Uncaught exception: {}", self.message);
        if let (Some(file), Some(line)) = (&self.file, self.line) {
            let _ = write!(report, " ({}:{}:{})", file, line, self.column.unwrap_or(0));
        }
        if let Some(excerpt) = source.and_then(|source| self.excerpt(source)) {
            report.push('\n');
            report.push_str(&excerpt);
        }
        if let Some(stack) = self.stack.as_deref().map(str::trim_end) {
            if !stack.is_empty() {
                report.push('\n');
                report.push_str(stack);
            }
        }
        report
    }

    /// Log the error for the context labelled `context`
    pub fn report(&self, context: &str, source: Option<&str>) {
        tracing::error!(context, "{}", self.render(source));
    }
}

/// Caret line pointing at the 0-based `column` of `line`
///
/// Tabs before the column are kept so the caret lines up however the
/// terminal expands them; every other character becomes a space.
pub fn column_marker(line: &str, column: usize) -> String {
    let mut marker: String = line
        .chars()
        .take(column)
        .map(|c| if c == '\t' { '\t' } else { ' ' })
        .collect();
    let missing = column.saturating_sub(marker.chars().count());
    marker.extend(std::iter::repeat_n(' ', missing));
    marker.push('^');
    marker
}

/// Location of the first stack frame that has one
pub fn parse_frame_location(stack: &str) -> Option<(String, u32, u32)> {
    stack.lines().find_map(|frame| {
        let caps = FRAME_LOCATION.captures(frame)?;
        let line = caps[2].parse().ok()?;
        let column = caps[3].parse().ok()?;
        Some((caps[1].to_string(), line, column))
    })
}
