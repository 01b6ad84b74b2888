//! Command terminal bound to a single lab.
//!
//! A session runs at most one command at a time. Each submission appends an
//! `Executing` entry immediately and completes it in place exactly once, so the
//! history always lists commands in submission order.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use chrono::{DateTime, Local};
use shared::{
    domain::{Lab, LabId, LabStatus},
    protocol::{CommandResultResponse, ExecuteCommandRequest},
};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
    api::LabApi,
    error::{ApplicationError, FetchError},
};

/// Exit code recorded when the execute call itself failed.
pub const TRANSPORT_FAILURE_EXIT_CODE: i32 = -1;

pub const DEFAULT_SUGGESTIONS: [&str; 12] = [
    "ls -la",
    "pwd",
    "whoami",
    "ps aux",
    "df -h",
    "free -h",
    "uname -a",
    "cat /etc/os-release",
    "env",
    "which python3",
    "which node",
    "which docker",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Executing,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandHistoryEntry {
    pub id: u64,
    pub command: String,
    pub submitted_at: DateTime<Local>,
    pub status: CommandStatus,
    pub output: String,
    pub error_text: String,
    pub exit_code: Option<i32>,
    pub duration_ms: Option<u64>,
}

impl CommandHistoryEntry {
    fn executing(id: u64, command: String) -> Self {
        Self {
            id,
            command,
            submitted_at: Local::now(),
            status: CommandStatus::Executing,
            output: String::new(),
            error_text: String::new(),
            exit_code: None,
            duration_ms: None,
        }
    }

    pub fn is_executing(&self) -> bool {
        self.status == CommandStatus::Executing
    }

    fn complete(&mut self, outcome: &Result<CommandResultResponse, CommandFailure>, duration_ms: u64) {
        if !self.is_executing() {
            return;
        }
        match outcome {
            Ok(result) => {
                self.status = CommandStatus::Success;
                self.output = result.output.clone();
                self.error_text = result.error.clone();
                self.exit_code = result.exit_code;
            }
            Err(CommandFailure::Application(err)) => {
                self.status = CommandStatus::Error;
                self.output = err.output.clone();
                self.error_text = err.message.clone();
                self.exit_code = err.exit_code;
            }
            Err(CommandFailure::Transport(err)) => {
                self.status = CommandStatus::Error;
                self.output = String::new();
                self.error_text = format!("Failed to execute command: {}", err.reason());
                self.exit_code = Some(TRANSPORT_FAILURE_EXIT_CODE);
            }
        }
        self.duration_ms = Some(duration_ms);
    }

    pub fn display_timestamp(&self) -> String {
        self.submitted_at.format("%H:%M:%S").to_string()
    }

    pub fn status_badge(&self) -> String {
        let duration = self.duration_ms.unwrap_or_default();
        match self.status {
            CommandStatus::Executing => "Running...".to_string(),
            CommandStatus::Success => format!("✓ ({duration}ms)"),
            CommandStatus::Error => match self.exit_code {
                Some(code) => format!("✗ Exit {code} ({duration}ms)"),
                None => format!("✗ ({duration}ms)"),
            },
        }
    }
}

enum CommandFailure {
    Application(ApplicationError),
    Transport(FetchError),
}

/// Splits a completed execute call into success and backend-reported failure.
pub fn application_outcome(
    result: CommandResultResponse,
) -> Result<CommandResultResponse, ApplicationError> {
    if result.success {
        Ok(result)
    } else {
        Err(ApplicationError {
            message: result.error,
            output: result.output,
            exit_code: result.exit_code,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitRejection {
    #[error("no terminal session is open")]
    NoSession,
    #[error("command is empty")]
    EmptyCommand,
    #[error("Terminal is disabled - Lab status: {0}")]
    LabNotRunning(LabStatus),
    #[error("another command is still executing")]
    CommandInFlight,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Opened(Lab),
    LabUpdated(Lab),
    EntryAppended(CommandHistoryEntry),
    EntryCompleted(CommandHistoryEntry),
    InputChanged(String),
    SuggestionsLoaded(Vec<String>),
    Cleared,
    Closed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub lab: Option<Lab>,
    pub history: Vec<CommandHistoryEntry>,
    pub input: String,
    pub suggestions: Vec<String>,
    pub executing: bool,
}

impl SessionSnapshot {
    pub fn is_open(&self) -> bool {
        self.lab.is_some()
    }

    pub fn can_submit(&self) -> bool {
        !self.executing
            && !self.input.trim().is_empty()
            && self.lab.as_ref().is_some_and(|lab| lab.status.is_running())
    }

    pub fn disabled_reason(&self) -> Option<String> {
        let lab = self.lab.as_ref()?;
        (!lab.status.is_running())
            .then(|| SubmitRejection::LabNotRunning(lab.status.clone()).to_string())
    }
}

struct OpenSession {
    lab: Lab,
    history: Vec<CommandHistoryEntry>,
    input: String,
    suggestions: Vec<String>,
    next_entry_id: u64,
}

impl OpenSession {
    fn new(lab: Lab) -> Self {
        Self {
            lab,
            history: Vec::new(),
            input: String::new(),
            suggestions: default_suggestions(),
            next_entry_id: 1,
        }
    }
}

#[derive(Default)]
struct SessionState {
    open: Option<OpenSession>,
    /// Bumped on every open and close so late completions cannot reach a newer session.
    generation: u64,
}

/// Holds the single execute slot until the outstanding call resolves or is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn default_suggestions() -> Vec<String> {
    DEFAULT_SUGGESTIONS.iter().map(|cmd| cmd.to_string()).collect()
}

pub struct TerminalSession {
    api: Arc<dyn LabApi>,
    inner: Mutex<SessionState>,
    /// Spans open/close: the remote shell is shared by every session on the same lab.
    in_flight: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
}

impl TerminalSession {
    pub fn new(api: Arc<dyn LabApi>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            api,
            inner: Mutex::new(SessionState::default()),
            in_flight: AtomicBool::new(false),
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let guard = self.inner.lock().await;
        let executing = self.in_flight.load(Ordering::Acquire);
        match &guard.open {
            Some(session) => SessionSnapshot {
                lab: Some(session.lab.clone()),
                history: session.history.clone(),
                input: session.input.clone(),
                suggestions: session.suggestions.clone(),
                executing,
            },
            None => SessionSnapshot::default(),
        }
    }

    pub async fn history(&self) -> Vec<CommandHistoryEntry> {
        let guard = self.inner.lock().await;
        guard
            .open
            .as_ref()
            .map(|session| session.history.clone())
            .unwrap_or_default()
    }

    pub async fn lab(&self) -> Option<Lab> {
        let guard = self.inner.lock().await;
        guard.open.as_ref().map(|session| session.lab.clone())
    }

    /// Binds the session to `lab` and starts from an empty history.
    pub async fn open(&self, lab: Lab) {
        {
            let mut guard = self.inner.lock().await;
            guard.generation += 1;
            guard.open = Some(OpenSession::new(lab.clone()));
        }
        info!("terminal: opened lab_id={} status={}", lab.id, lab.status);
        self.emit(SessionEvent::Opened(lab));
    }

    /// Replaces the bound lab snapshot when `lab` is the bound lab.
    pub async fn refresh_lab(&self, lab: &Lab) -> bool {
        {
            let mut guard = self.inner.lock().await;
            let Some(session) = guard.open.as_mut() else {
                return false;
            };
            if session.lab.id != lab.id {
                return false;
            }
            session.lab = lab.clone();
        }
        self.emit(SessionEvent::LabUpdated(lab.clone()));
        true
    }

    pub async fn close(&self) {
        let was_open = {
            let mut guard = self.inner.lock().await;
            guard.generation += 1;
            guard.open.take()
        };
        if let Some(session) = was_open {
            info!("terminal: closed lab_id={}", session.lab.id);
            self.emit(SessionEvent::Closed);
        }
    }

    /// Empties the history. The lab binding and pending input stay.
    pub async fn clear(&self) {
        {
            let mut guard = self.inner.lock().await;
            let Some(session) = guard.open.as_mut() else {
                return;
            };
            session.history.clear();
        }
        self.emit(SessionEvent::Cleared);
    }

    pub async fn set_input(&self, text: &str) {
        {
            let mut guard = self.inner.lock().await;
            let Some(session) = guard.open.as_mut() else {
                return;
            };
            session.input = text.to_string();
        }
        self.emit(SessionEvent::InputChanged(text.to_string()));
    }

    /// Fills the pending input with `text` without submitting it.
    pub async fn select_suggestion(&self, text: &str) {
        debug!("terminal: suggestion selected command={text}");
        self.set_input(text).await;
    }

    /// Loads the lab's suggested commands, keeping the built-in list when the call fails.
    pub async fn load_suggestions(&self) -> Vec<String> {
        let (lab_id, generation) = {
            let guard = self.inner.lock().await;
            match &guard.open {
                Some(session) => (session.lab.id.clone(), guard.generation),
                None => return Vec::new(),
            }
        };

        let suggestions = match self.api.suggested_commands(&lab_id).await {
            Ok(commands) if !commands.is_empty() => commands,
            Ok(_) => default_suggestions(),
            Err(err) => {
                warn!("terminal: suggested commands unavailable lab_id={lab_id}: {err}");
                default_suggestions()
            }
        };

        {
            let mut guard = self.inner.lock().await;
            if guard.generation != generation {
                return suggestions;
            }
            if let Some(session) = guard.open.as_mut() {
                session.suggestions = suggestions.clone();
            }
        }
        self.emit(SessionEvent::SuggestionsLoaded(suggestions.clone()));
        suggestions
    }

    /// Submits the pending input.
    pub async fn submit_pending(&self) -> Result<CommandHistoryEntry, SubmitRejection> {
        let input = {
            let guard = self.inner.lock().await;
            guard
                .open
                .as_ref()
                .map(|session| session.input.clone())
                .ok_or(SubmitRejection::NoSession)?
        };
        self.submit(&input).await
    }

    /// Runs `command` against the bound lab and returns its completed entry.
    pub async fn submit(&self, command: &str) -> Result<CommandHistoryEntry, SubmitRejection> {
        let (lab_id, mut entry, generation, slot) = {
            let mut guard = self.inner.lock().await;
            let state = &mut *guard;
            let generation = state.generation;
            let Some(session) = state.open.as_mut() else {
                return Err(SubmitRejection::NoSession);
            };
            if command.trim().is_empty() {
                return Err(SubmitRejection::EmptyCommand);
            }
            if !session.lab.status.is_running() {
                return Err(SubmitRejection::LabNotRunning(session.lab.status.clone()));
            }
            if self
                .in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                debug!("terminal: submit ignored, a command is in flight");
                return Err(SubmitRejection::CommandInFlight);
            }
            let slot = InFlight(&self.in_flight);

            let entry = CommandHistoryEntry::executing(session.next_entry_id, command.to_string());
            session.next_entry_id += 1;
            session.history.push(entry.clone());
            session.input.clear();
            (session.lab.id.clone(), entry, generation, slot)
        };
        self.emit(SessionEvent::EntryAppended(entry.clone()));
        self.emit(SessionEvent::InputChanged(String::new()));

        let started = Instant::now();
        let result = self
            .api
            .execute_command(ExecuteCommandRequest {
                lab_id: lab_id.clone(),
                command: command.to_string(),
            })
            .await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let outcome = match result {
            Ok(result) => application_outcome(result).map_err(CommandFailure::Application),
            Err(err) => {
                warn!("terminal: execute call failed lab_id={lab_id}: {err}");
                Err(CommandFailure::Transport(err))
            }
        };
        entry.complete(&outcome, duration_ms);

        let applied = {
            let mut guard = self.inner.lock().await;
            let state = &mut *guard;
            if state.generation == generation {
                state
                    .open
                    .as_mut()
                    .and_then(|session| session.history.iter_mut().find(|e| e.id == entry.id))
                    .map(|stored| stored.complete(&outcome, duration_ms))
                    .is_some()
            } else {
                false
            }
        };
        drop(slot);

        debug!(
            "terminal: command finished lab_id={lab_id} entry={} status={:?} exit_code={:?} duration_ms={duration_ms}",
            entry.id, entry.status, entry.exit_code
        );
        if applied {
            self.emit(SessionEvent::EntryCompleted(entry.clone()));
        } else {
            debug!("terminal: completion for entry={} no longer in history", entry.id);
        }
        Ok(entry)
    }

    pub async fn lab_id(&self) -> Option<LabId> {
        let guard = self.inner.lock().await;
        guard.open.as_ref().map(|session| session.lab.id.clone())
    }
}

#[cfg(test)]
#[path = "tests/terminal_tests.rs"]
mod tests;
