//! Backend stdio contract.
//!
//! The backend reads one command per line and writes free-form text back.
//! A few fixed phrases and an end-of-task marker carry meaning for the
//! front-end; [`OutputParser`] turns raw output chunks into display text and
//! signals. Chunks arrive with arbitrary boundaries, so the parser buffers
//! until a line is complete. An end-of-task marker is acted on as soon as it
//! is seen, even without a trailing newline.

use crate::config::BackendProtocolConfig;
use serde::{Deserialize, Serialize};

/// Phrases and markers recognized in backend output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendMarkers {
    /// Appended by the backend when a unit of work completes.
    pub end_of_task: String,
    /// Backend is ready to accept commands.
    pub ready: String,
    /// Secondary milestone: the automation browser is up.
    pub browser_ready: String,
    /// Lines starting with this are errors.
    pub error_prefix: String,
    /// Lines containing this are errors.
    pub error_phrase: String,
}

impl Default for BackendMarkers {
    fn default() -> Self {
        Self {
            end_of_task: BackendProtocolConfig::END_OF_TASK_MARKER.to_string(),
            ready: BackendProtocolConfig::READY_PHRASE.to_string(),
            browser_ready: BackendProtocolConfig::BROWSER_READY_PHRASE.to_string(),
            error_prefix: BackendProtocolConfig::ERROR_PREFIX.to_string(),
            error_phrase: BackendProtocolConfig::ERROR_PHRASE.to_string(),
        }
    }
}

/// A unit of interpreted backend output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "text", rename_all = "snake_case")]
pub enum OutputEvent {
    /// Normal text to display.
    Text(String),
    /// Error text, displayed distinctly.
    ErrorText(String),
    /// The backend accepts commands.
    Ready,
    /// The automation browser finished initializing.
    BrowserReady,
    /// The current task finished.
    TaskCompleted,
    /// The current task reported an error.
    TaskFailed,
}

/// Incremental parser for backend output.
#[derive(Debug, Clone)]
pub struct OutputParser {
    markers: BackendMarkers,
    pending: String,
}

impl Default for OutputParser {
    fn default() -> Self {
        Self::new(BackendMarkers::default())
    }
}

impl OutputParser {
    pub fn new(markers: BackendMarkers) -> Self {
        Self {
            markers,
            pending: String::new(),
        }
    }

    /// Feed a chunk of output and return the events it completes.
    pub fn feed(&mut self, chunk: &str) -> Vec<OutputEvent> {
        self.pending.push_str(chunk);
        let mut events = Vec::new();

        while let Some(idx) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=idx).collect();
            self.interpret(line.trim_end_matches(['\n', '\r']), &mut events);
        }

        // An unterminated line can still close a task
        if !self.markers.end_of_task.is_empty() {
            while let Some(idx) = self.pending.find(&self.markers.end_of_task) {
                let end = idx + self.markers.end_of_task.len();
                let segment: String = self.pending.drain(..end).collect();
                self.interpret(&segment, &mut events);
            }
        }

        events
    }

    /// Interpret whatever is buffered as a final line.
    pub fn flush(&mut self) -> Vec<OutputEvent> {
        let mut events = Vec::new();
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.interpret(rest.trim_end_matches('\r'), &mut events);
        }
        events
    }

    /// Text buffered while waiting for the end of a line.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    fn interpret(&self, line: &str, events: &mut Vec<OutputEvent>) {
        let marker = self.markers.end_of_task.as_str();
        let (text, completions) = if !marker.is_empty() && line.contains(marker) {
            (line.replace(marker, ""), line.matches(marker).count())
        } else {
            (line.to_string(), 0)
        };

        let is_error = self.is_error_line(&text);
        if !text.trim().is_empty() {
            if is_error {
                events.push(OutputEvent::ErrorText(text.clone()));
            } else {
                events.push(OutputEvent::Text(text.clone()));
            }
        }

        if contains_phrase(&text, &self.markers.ready) {
            events.push(OutputEvent::Ready);
        }
        if contains_phrase(&text, &self.markers.browser_ready) {
            events.push(OutputEvent::BrowserReady);
        }
        if is_error {
            events.push(OutputEvent::TaskFailed);
        }
        events.extend(std::iter::repeat(OutputEvent::TaskCompleted).take(completions));
    }

    fn is_error_line(&self, text: &str) -> bool {
        let prefix = self.markers.error_prefix.as_str();
        (!prefix.is_empty() && text.trim_start().starts_with(prefix))
            || contains_phrase(text, &self.markers.error_phrase)
    }
}

fn contains_phrase(text: &str, phrase: &str) -> bool {
    !phrase.is_empty() && text.contains(phrase)
}
