use crate::settings::HostSettings;
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuggestionKind {
    #[default]
    GhostText,
    Completion,
    Intellisense,
    Codelens,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionRequest {
    pub content: String,
    pub line: u32,
    pub col: u32,
    pub line_text: String,
    pub language: String,
    pub file_name: String,
    pub prefix: String,
    pub suffix: String,
    #[serde(rename = "type")]
    pub kind: SuggestionKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRoute {
    pub url: String,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl RemoteRoute {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            streaming: false,
            timeout_ms: default_timeout_ms(),
        }
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    fn agent(&self) -> ureq::Agent {
        ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(self.timeout_ms.max(100)))
            .build()
    }
}

const fn default_timeout_ms() -> u64 {
    10_000
}

pub type SuggestionHandler = Arc<dyn Fn(&SuggestionRequest) -> Result<String> + Send + Sync>;
pub type StreamingHandler =
    Arc<dyn Fn(&SuggestionRequest, &mut dyn FnMut(&str)) -> Result<()> + Send + Sync>;

#[derive(Clone, Default)]
enum Mode {
    #[default]
    Unset,
    Handler {
        complete: SuggestionHandler,
        stream: Option<StreamingHandler>,
    },
    Route(RemoteRoute),
}

#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Failed,
    Cancelled,
    Inactive,
}

#[derive(Default)]
pub struct SuggestionCoordinator {
    mode: Mutex<Mode>,
    in_flight: Mutex<Option<CancellationToken>>,
}

impl SuggestionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_handler(
        &self,
        complete: impl Fn(&SuggestionRequest) -> Result<String> + Send + Sync + 'static,
    ) {
        self.set_mode(Mode::Handler {
            complete: Arc::new(complete),
            stream: None,
        });
    }

    pub fn set_streaming_handler(
        &self,
        complete: impl Fn(&SuggestionRequest) -> Result<String> + Send + Sync + 'static,
        stream: impl Fn(&SuggestionRequest, &mut dyn FnMut(&str)) -> Result<()>
            + Send
            + Sync
            + 'static,
    ) {
        self.set_mode(Mode::Handler {
            complete: Arc::new(complete),
            stream: Some(Arc::new(stream)),
        });
    }

    pub fn set_route(&self, route: RemoteRoute) {
        tracing::debug!(url = %route.url, streaming = route.streaming, "ai route configured");
        self.set_mode(Mode::Route(route));
    }

    pub fn apply_settings(&self, settings: &HostSettings) {
        match &settings.ai {
            Some(route) => self.set_route(route.clone()),
            None => {
                let routed = matches!(*self.mode(), Mode::Route(_));
                if routed {
                    self.clear();
                }
            }
        }
    }

    pub fn clear(&self) {
        self.set_mode(Mode::Unset);
    }

    pub fn is_active(&self) -> bool {
        !matches!(*self.mode(), Mode::Unset)
    }

    pub fn is_streaming_available(&self) -> bool {
        match &*self.mode() {
            Mode::Unset => false,
            Mode::Handler { stream, .. } => stream.is_some(),
            Mode::Route(route) => route.streaming,
        }
    }

    pub fn cancel(&self) {
        if let Some(token) = lock(&self.in_flight).take() {
            token.cancel();
        }
    }

    pub fn get_suggestion(&self, request: &SuggestionRequest) -> Option<String> {
        let mode = self.mode().clone();
        if matches!(mode, Mode::Unset) {
            return None;
        }
        let token = self.begin();

        let result = match &mode {
            Mode::Unset => return None,
            Mode::Handler { complete, .. } => complete(request),
            Mode::Route(route) => fetch_text(route, request),
        };

        if token.is_cancelled() {
            tracing::debug!("suggestion superseded, result dropped");
            return None;
        }
        self.finish(&token);

        match result {
            Ok(text) if text.is_empty() => None,
            Ok(text) => Some(text),
            Err(err) => {
                tracing::warn!("suggestion failed: {err:#}");
                None
            }
        }
    }

    /// Streams one suggestion through `on_chunk`. Falls back to a single
    /// chunk when the configured mode cannot stream. `on_complete` is skipped
    /// only when the request was cancelled.
    pub fn stream_suggestion(
        &self,
        request: &SuggestionRequest,
        mut on_chunk: impl FnMut(&str),
        on_complete: impl FnOnce(),
    ) -> StreamOutcome {
        let mode = self.mode().clone();
        if matches!(mode, Mode::Unset) {
            return StreamOutcome::Inactive;
        }
        let token = self.begin();

        let mut forward = |chunk: &str| {
            if !token.is_cancelled() && !chunk.is_empty() {
                on_chunk(chunk);
            }
        };

        let result = match &mode {
            Mode::Unset => return StreamOutcome::Inactive,
            Mode::Handler {
                stream: Some(stream),
                ..
            } => stream(request, &mut forward),
            Mode::Handler { complete, .. } => complete(request).map(|text| forward(&text)),
            Mode::Route(route) if route.streaming => {
                stream_remote(route, request, &token, &mut forward)
            }
            Mode::Route(route) => fetch_text(route, request).map(|text| forward(&text)),
        };

        if token.is_cancelled() {
            tracing::debug!("suggestion stream superseded");
            return StreamOutcome::Cancelled;
        }
        self.finish(&token);

        let outcome = match result {
            Ok(()) => StreamOutcome::Completed,
            Err(err) => {
                tracing::warn!("suggestion stream failed: {err:#}");
                StreamOutcome::Failed
            }
        };
        on_complete();
        outcome
    }

    fn mode(&self) -> MutexGuard<'_, Mode> {
        lock(&self.mode)
    }

    fn set_mode(&self, mode: Mode) {
        self.cancel();
        *self.mode() = mode;
    }

    fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = lock(&self.in_flight).replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    fn finish(&self, token: &CancellationToken) {
        let mut in_flight = lock(&self.in_flight);
        if in_flight
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(&current.cancelled, &token.cancelled))
        {
            *in_flight = None;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn post(route: &RemoteRoute, request: &SuggestionRequest, accept: &str) -> Result<ureq::Response> {
    if route.url.trim().is_empty() {
        bail!("suggestion route url is empty");
    }
    let response = route
        .agent()
        .post(route.url.as_str())
        .set("Content-Type", "application/json")
        .set("Accept", accept)
        .send_json(request);
    match response {
        Ok(response) => Ok(response),
        Err(ureq::Error::Status(status, response)) => {
            let body = response.into_string().unwrap_or_default();
            Err(anyhow!("suggestion route returned status {status}: {body}"))
        }
        Err(ureq::Error::Transport(err)) => Err(anyhow!("suggestion transport error: {err}")),
    }
}

fn fetch_text(route: &RemoteRoute, request: &SuggestionRequest) -> Result<String> {
    let value: serde_json::Value = post(route, request, "application/json")?
        .into_json()
        .context("failed to decode suggestion response JSON")?;
    value
        .get("text")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("suggestion response missing `text`"))
}

fn stream_remote(
    route: &RemoteRoute,
    request: &SuggestionRequest,
    token: &CancellationToken,
    on_chunk: &mut dyn FnMut(&str),
) -> Result<()> {
    let response = post(route, request, "text/event-stream")?;
    let reader = BufReader::new(response.into_reader());
    for line in reader.lines() {
        if token.is_cancelled() {
            break;
        }
        let line = line.context("read suggestion stream")?;
        match parse_event_line(&line) {
            EventLine::Chunk(text) => on_chunk(&text),
            EventLine::Done => break,
            EventLine::Skip => {}
        }
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum EventLine {
    Chunk(String),
    Done,
    Skip,
}

fn parse_event_line(line: &str) -> EventLine {
    let Some(data) = line.strip_prefix("data:") else {
        return EventLine::Skip;
    };
    let data = data.trim();
    if data == DONE_SENTINEL {
        return EventLine::Done;
    }
    match serde_json::from_str::<serde_json::Value>(data) {
        Ok(value) => value
            .get("text")
            .and_then(serde_json::Value::as_str)
            .map(|text| EventLine::Chunk(text.to_string()))
            .unwrap_or(EventLine::Skip),
        Err(err) => {
            tracing::debug!("skipping malformed stream frame: {err}");
            EventLine::Skip
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SessionCounter {
    latest: Arc<AtomicU64>,
}

impl SessionCounter {
    pub fn mint(&self) -> u64 {
        self.latest.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn latest(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, session: u64) -> bool {
        self.latest() == session
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RevealTick {
    Advanced,
    Finished,
    Stale,
}

#[derive(Debug)]
struct RevealState {
    session: u64,
    chars: Vec<char>,
    shown: usize,
}

#[derive(Debug, Default)]
pub struct GhostTextReveal {
    sessions: SessionCounter,
    state: Option<RevealState>,
}

impl GhostTextReveal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sessions(sessions: SessionCounter) -> Self {
        Self {
            sessions,
            state: None,
        }
    }

    pub fn start(&mut self, text: &str) -> u64 {
        let session = self.sessions.mint();
        self.state = Some(RevealState {
            session,
            chars: text.chars().collect(),
            shown: 0,
        });
        session
    }

    pub fn tick(&mut self, session: u64, step: usize) -> RevealTick {
        if !self.sessions.is_current(session) {
            return RevealTick::Stale;
        }
        let Some(state) = self.state.as_mut().filter(|s| s.session == session) else {
            return RevealTick::Stale;
        };
        state.shown = (state.shown + step.max(1)).min(state.chars.len());
        if state.shown == state.chars.len() {
            RevealTick::Finished
        } else {
            RevealTick::Advanced
        }
    }

    pub fn visible(&self) -> String {
        self.state
            .as_ref()
            .map(|s| s.chars[..s.shown].iter().collect())
            .unwrap_or_default()
    }

    pub fn is_revealing(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|s| s.shown < s.chars.len())
    }

    pub fn cancel(&mut self) {
        self.sessions.mint();
        self.state = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;

    fn request() -> SuggestionRequest {
        SuggestionRequest {
            content: "fn ma".to_string(),
            line: 0,
            col: 5,
            line_text: "fn ma".to_string(),
            language: "rust".to_string(),
            file_name: "main.rs".to_string(),
            prefix: "fn ma".to_string(),
            suffix: String::new(),
            kind: SuggestionKind::GhostText,
        }
    }

    #[test]
    fn request_body_uses_wire_field_names() {
        let value = serde_json::to_value(request()).expect("serialize request");
        assert_eq!(value["lineText"], "fn ma");
        assert_eq!(value["fileName"], "main.rs");
        assert_eq!(value["type"], "ghost-text");
        assert_eq!(
            serde_json::to_value(SuggestionKind::Codelens).expect("serialize kind"),
            "codelens"
        );
    }

    #[test]
    fn settings_route_is_applied_and_cleared() {
        let coordinator = SuggestionCoordinator::new();
        let mut settings = HostSettings {
            ai: Some(RemoteRoute::new("http://127.0.0.1:9/suggest").streaming(true)),
            ..HostSettings::default()
        };

        coordinator.apply_settings(&settings);
        assert!(coordinator.is_active());
        assert!(coordinator.is_streaming_available());

        settings.ai = None;
        coordinator.apply_settings(&settings);
        assert!(!coordinator.is_active());

        coordinator.set_handler(|_| Ok("local".to_string()));
        coordinator.apply_settings(&settings);
        assert_eq!(coordinator.get_suggestion(&request()).as_deref(), Some("local"));
    }

    #[test]
    fn inactive_until_configured() {
        let coordinator = SuggestionCoordinator::new();
        assert!(!coordinator.is_active());
        assert_eq!(coordinator.get_suggestion(&request()), None);
        assert_eq!(
            coordinator.stream_suggestion(&request(), |_| {}, || {}),
            StreamOutcome::Inactive
        );

        coordinator.set_handler(|req| Ok(format!("{}in() {{}}", req.prefix)));
        assert!(coordinator.is_active());
        assert!(!coordinator.is_streaming_available());
        assert_eq!(
            coordinator.get_suggestion(&request()).as_deref(),
            Some("fn main() {}")
        );

        coordinator.clear();
        assert!(!coordinator.is_active());
    }

    #[test]
    fn handler_error_becomes_no_suggestion() {
        let coordinator = SuggestionCoordinator::new();
        coordinator.set_handler(|_| Err(anyhow!("backend down")));
        assert_eq!(coordinator.get_suggestion(&request()), None);
    }

    #[test]
    fn relative_route_without_server_yields_none() {
        let coordinator = SuggestionCoordinator::new();
        coordinator.set_route(RemoteRoute::new("/x"));
        assert!(coordinator.is_active());
        assert_eq!(coordinator.get_suggestion(&request()), None);
    }

    #[test]
    fn non_streaming_mode_degrades_to_single_chunk() {
        let coordinator = SuggestionCoordinator::new();
        coordinator.set_handler(|_| Ok("in()".to_string()));

        let mut chunks = Vec::new();
        let mut completed = false;
        let outcome = coordinator.stream_suggestion(
            &request(),
            |chunk| chunks.push(chunk.to_string()),
            || completed = true,
        );

        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(chunks, vec!["in()".to_string()]);
        assert!(completed);
    }

    #[test]
    fn streaming_handler_is_preferred() {
        let coordinator = SuggestionCoordinator::new();
        coordinator.set_streaming_handler(
            |_| Ok("whole".to_string()),
            |_, emit| {
                emit("in");
                emit("()");
                Ok(())
            },
        );
        assert!(coordinator.is_streaming_available());

        let mut chunks = Vec::new();
        let outcome =
            coordinator.stream_suggestion(&request(), |chunk| chunks.push(chunk.to_string()), || {});
        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(chunks.concat(), "in()");
    }

    #[test]
    fn cancellation_mid_stream_drops_later_chunks_silently() {
        let coordinator = Arc::new(SuggestionCoordinator::new());
        let weak: Weak<SuggestionCoordinator> = Arc::downgrade(&coordinator);
        coordinator.set_streaming_handler(
            |_| Ok(String::new()),
            move |_, emit| {
                emit("a");
                if let Some(coordinator) = weak.upgrade() {
                    coordinator.cancel();
                }
                emit("b");
                Ok(())
            },
        );

        let mut chunks = Vec::new();
        let mut completed = false;
        let outcome = coordinator.stream_suggestion(
            &request(),
            |chunk| chunks.push(chunk.to_string()),
            || completed = true,
        );

        assert_eq!(outcome, StreamOutcome::Cancelled);
        assert_eq!(chunks, vec!["a".to_string()]);
        assert!(!completed);
    }

    #[test]
    fn failed_stream_still_completes() {
        let coordinator = SuggestionCoordinator::new();
        coordinator.set_streaming_handler(
            |_| Ok(String::new()),
            |_, emit| {
                emit("partial");
                Err(anyhow!("connection reset"))
            },
        );

        let mut completed = false;
        let outcome = coordinator.stream_suggestion(&request(), |_| {}, || completed = true);
        assert_eq!(outcome, StreamOutcome::Failed);
        assert!(completed);
    }

    #[test]
    fn event_lines_parse() {
        assert_eq!(
            parse_event_line(r#"data: {"text":"fn"}"#),
            EventLine::Chunk("fn".to_string())
        );
        assert_eq!(parse_event_line("data: [DONE]"), EventLine::Done);
        assert_eq!(parse_event_line(": keep-alive"), EventLine::Skip);
        assert_eq!(parse_event_line("data: {oops"), EventLine::Skip);
    }

    #[test]
    fn newer_reveal_session_invalidates_older_ticks() {
        let mut reveal = GhostTextReveal::new();
        let first = reveal.start("hello");
        assert_eq!(reveal.tick(first, 2), RevealTick::Advanced);
        assert_eq!(reveal.visible(), "he");

        let second = reveal.start("world");
        assert_eq!(reveal.tick(first, 1), RevealTick::Stale);
        assert_eq!(reveal.visible(), "");

        assert_eq!(reveal.tick(second, 3), RevealTick::Advanced);
        assert_eq!(reveal.tick(second, 3), RevealTick::Finished);
        assert_eq!(reveal.visible(), "world");
        assert!(!reveal.is_revealing());
    }

    #[test]
    fn shared_counter_lets_other_components_invalidate_a_reveal() {
        let sessions = SessionCounter::default();
        let mut reveal = GhostTextReveal::with_sessions(sessions.clone());
        let session = reveal.start("abc");

        sessions.mint();
        assert_eq!(reveal.tick(session, 1), RevealTick::Stale);

        reveal.cancel();
        assert_eq!(reveal.visible(), "");
    }
}
