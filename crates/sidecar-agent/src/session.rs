//! Conversation session and agent loop.
//!
//! A [`Session`] owns the conversation history and drives one exchange at
//! a time: append the user turn, load a fresh settings snapshot, trim the
//! window, ask the provider, detect command-shaped replies, execute
//! commands, and re-ask with the results.
//!
//! Errors inside a turn never reach the caller as `Err`: they are
//! formatted into a user-visible string. The only `Err` out of
//! [`Session::send`] is [`AgentError::SessionBusy`], returned when a turn
//! is already in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::command::{classify, Classification, Command};
use crate::context::{trim_context, MAX_TOKEN_WINDOW};
use crate::environment::{ExecutionEnvironment, ExecutionResult, ExecutionStatus};
use crate::extract::{ContentExtractor, RawExtractor};
use sidecar_common::{AgentError, Message};
use sidecar_config::SettingsStore;
use sidecar_providers::{ChatRequest, ProviderRegistry, StreamCallbacks};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

/// System prompt installed when the caller requests network mode.
const NETWORK_SYSTEM_PROMPT: &str = "\
You can access the internet by issuing tool commands. Decide per request whether you need to.
If you need live information (news, page content, weather, search results), you must reply with strictly this JSON format and nothing else:
{\"action\": \"FETCH\", \"urls\": [\"https://example.com\"]}
Never reply that you cannot access the web or real-time information; you have that capability.
When you decide to go online, think of likely URLs yourself: news sites, search engines, Wikipedia.
If you do not need the internet, reply in ordinary natural language and never with action-bearing JSON, so your reply is not mistaken for a command.";

/// Failure marker prepended to per-command error lines in the follow-up
/// prompt.
const FAIL_MARK: &str = "\u{274c}";

/// Clears the replying flag and discards the cancellation token on every
/// exit path, including cancellation of the future itself. The guard is
/// the sole releaser of both, so nothing it clears can belong to a later
/// turn.
struct ReplyGuard<'a> {
    session: &'a Session,
}

impl<'a> ReplyGuard<'a> {
    fn acquire(session: &'a Session) -> Result<(Self, CancellationToken), AgentError> {
        if session
            .replying
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(AgentError::SessionBusy);
        }
        let token = CancellationToken::new();
        *session.cancel.lock().expect("cancel slot poisoned") = Some(token.clone());
        Ok((Self { session }, token))
    }
}

impl Drop for ReplyGuard<'_> {
    fn drop(&mut self) {
        *self.session.cancel.lock().expect("cancel slot poisoned") = None;
        self.session.replying.store(false, Ordering::Release);
    }
}

/// A conversation session. One exchange at a time; `stop` cancels the
/// in-flight exchange from another task.
pub struct Session {
    /// Conversation history. Mutated only by the loop itself: append on
    /// turn start, append on terminal success, never on abort.
    context: Mutex<Vec<Message>>,
    system_prompt: Mutex<String>,
    temperature: f64,
    stream: bool,
    callbacks: StreamCallbacks,
    registry: Arc<ProviderRegistry>,
    store: Arc<SettingsStore>,
    environment: Arc<dyn ExecutionEnvironment>,
    extractor: Arc<dyn ContentExtractor>,
    /// Present exactly while a request is in flight.
    cancel: Mutex<Option<CancellationToken>>,
    replying: AtomicBool,
}

impl Session {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: Arc<SettingsStore>,
        environment: Arc<dyn ExecutionEnvironment>,
    ) -> Self {
        Self {
            context: Mutex::new(Vec::new()),
            system_prompt: Mutex::new(DEFAULT_SYSTEM_PROMPT.to_string()),
            temperature: 0.7,
            stream: false,
            callbacks: StreamCallbacks::default(),
            registry,
            store,
            environment,
            extractor: Arc::new(RawExtractor::new()),
            cancel: Mutex::new(None),
            replying: AtomicBool::new(false),
        }
    }

    pub fn with_system_prompt(self, prompt: impl Into<String>) -> Self {
        *self.system_prompt.lock().expect("system prompt poisoned") = prompt.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_callbacks(mut self, callbacks: StreamCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ContentExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Run one turn: the user input in, the resolved assistant reply out.
    ///
    /// Turn-level failures (network, provider, execution target) come back
    /// as a user-visible error string, not as `Err`; the only error is
    /// [`AgentError::SessionBusy`] when a turn is already in flight.
    pub async fn send(
        &self,
        input: impl Into<String>,
        network: bool,
    ) -> Result<String, AgentError> {
        let input = input.into();
        let (_guard, cancel) = ReplyGuard::acquire(self)?;

        match self.run_turn(&input, network, &cancel).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                warn!("turn failed: {e}");
                Ok(format!(
                    "{FAIL_MARK} Something went wrong, check that your API key is valid. Error: {e}"
                ))
            }
        }
    }

    async fn run_turn(
        &self,
        input: &str,
        network: bool,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        // Fresh snapshot every turn; credentials are never cached.
        let settings = self.store.load();
        let kind = settings.default_provider;
        let api_key = settings.api_key(kind).to_string();
        let model = settings.model(kind).to_string();

        self.context
            .lock()
            .expect("context poisoned")
            .push(Message::user(input));

        if network {
            *self.system_prompt.lock().expect("system prompt poisoned") =
                NETWORK_SYSTEM_PROMPT.to_string();
        }

        let provider = self.registry.get(kind)?;

        let window = {
            let context = self.context.lock().expect("context poisoned");
            let prompt = self.system_prompt.lock().expect("system prompt poisoned");
            trim_context(&context, &prompt, MAX_TOKEN_WINDOW)
        };

        let reply = provider
            .ask(
                ChatRequest {
                    messages: &window,
                    api_key: &api_key,
                    model: &model,
                    temperature: self.temperature,
                    stream: self.stream,
                },
                &self.callbacks,
                cancel,
            )
            .await?;

        if reply.is_cancelled() {
            // Stopping discards the partial reply from history.
            return Ok(reply.text);
        }

        let commands = match classify(&reply.text) {
            Classification::PlainText => {
                self.push_assistant(&reply.text);
                return Ok(reply.text);
            }
            Classification::Commands(commands) => commands,
        };

        debug!(count = commands.len(), "reply classified as commands");

        let Some(target) = self.environment.resolve_target().await else {
            let message = format!("{FAIL_MARK} {}", AgentError::TargetMissing);
            self.push_assistant(&message);
            return Ok(message);
        };

        // Commands run strictly in array order; a failed command is
        // summarized and the rest still run.
        let mut summaries = Vec::with_capacity(commands.len());
        for command in &commands {
            let result = self.environment.execute(target, command).await;
            summaries.push(self.summarize(command, &result));
        }

        // Second pass: the execution summaries plus the original input go
        // back as a single synthetic user turn, sent on its own. Its reply
        // is always final text, never re-classified, and the synthetic
        // turn itself is not stored in history.
        let combined = Message::user(format!("{};{}", summaries.join("\n"), input));
        let final_reply = provider
            .ask(
                ChatRequest {
                    messages: std::slice::from_ref(&combined),
                    api_key: &api_key,
                    model: &model,
                    temperature: self.temperature,
                    stream: self.stream,
                },
                &self.callbacks,
                cancel,
            )
            .await?;

        if final_reply.is_cancelled() {
            return Ok(final_reply.text);
        }

        self.push_assistant(&final_reply.text);
        Ok(final_reply.text)
    }

    fn summarize(&self, command: &Command, result: &ExecutionResult) -> String {
        match result.status {
            ExecutionStatus::Success => {
                let mut lines = Vec::new();
                for item in &result.results {
                    if let Some(html) = &item.html {
                        let url = item.url.as_deref().unwrap_or("");
                        lines.push(self.extractor.extract(html, url));
                    } else if let Some(text) = &item.text {
                        lines.push(text.clone());
                    } else if let Some(error) = &item.error {
                        let url = item.url.as_deref().unwrap_or("");
                        lines.push(format!("{FAIL_MARK} {url} failed: {error}"));
                    }
                }
                lines.join("\n")
            }
            ExecutionStatus::Error => {
                let error = result.error.as_deref().unwrap_or("unknown error");
                format!("{FAIL_MARK} {} failed: {error}", command.action)
            }
        }
    }

    fn push_assistant(&self, content: &str) {
        self.context
            .lock()
            .expect("context poisoned")
            .push(Message::assistant(content));
    }

    /// Cancel the in-flight exchange, if any. The adapter observes the
    /// signal and resolves with the partial text; nothing is appended to
    /// history for a stopped turn.
    ///
    /// The session stays busy until the cancelled turn unwinds; only the
    /// guard owning the turn releases the flag and the token slot, so a
    /// `send` racing a `stop` is rejected rather than admitted alongside
    /// the turn still winding down.
    pub fn stop(&self) {
        if let Some(token) = self.cancel.lock().expect("cancel slot poisoned").as_ref() {
            token.cancel();
        }
    }

    pub fn is_replying(&self) -> bool {
        self.replying.load(Ordering::Acquire)
    }

    /// Snapshot of the conversation history.
    pub fn messages(&self) -> Vec<Message> {
        self.context.lock().expect("context poisoned").clone()
    }

    pub fn message_count(&self) -> usize {
        self.context.lock().expect("context poisoned").len()
    }

    /// Clear conversation history.
    pub fn clear(&self) {
        self.context.lock().expect("context poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::environment::{ExecutionTarget, ResultItem};
    use sidecar_common::{ProviderError, ProviderKind, Role};
    use sidecar_providers::{ChatProvider, Reply};

    /// Provider that replays a script of replies and records every
    /// message window it is asked with.
    struct ScriptedProvider {
        replies: Mutex<VecDeque<Result<Reply, ProviderError>>>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<Reply, ProviderError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn windows(&self) -> Vec<Vec<Message>> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::OpenAi
        }

        async fn ask(
            &self,
            request: ChatRequest<'_>,
            _callbacks: &StreamCallbacks,
            _cancel: &CancellationToken,
        ) -> Result<Reply, ProviderError> {
            self.seen.lock().unwrap().push(request.messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::Network("script exhausted".into())))
        }
    }

    /// Provider that blocks until cancelled, then yields a fixed partial.
    struct PendingProvider {
        partial: String,
    }

    #[async_trait]
    impl ChatProvider for PendingProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::OpenAi
        }

        async fn ask(
            &self,
            _request: ChatRequest<'_>,
            callbacks: &StreamCallbacks,
            cancel: &CancellationToken,
        ) -> Result<Reply, ProviderError> {
            cancel.cancelled().await;
            callbacks.abort(&self.partial);
            Ok(Reply::cancelled(self.partial.clone()))
        }
    }

    struct FakeEnvironment {
        target: Option<ExecutionTarget>,
        result: ExecutionResult,
        executed: Mutex<Vec<Command>>,
    }

    impl FakeEnvironment {
        fn with_result(result: ExecutionResult) -> Self {
            Self {
                target: Some(ExecutionTarget(1)),
                result,
                executed: Mutex::new(Vec::new()),
            }
        }

        fn without_target() -> Self {
            Self {
                target: None,
                result: ExecutionResult::success(Vec::new()),
                executed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ExecutionEnvironment for FakeEnvironment {
        async fn resolve_target(&self) -> Option<ExecutionTarget> {
            self.target
        }

        async fn execute(&self, _target: ExecutionTarget, command: &Command) -> ExecutionResult {
            self.executed.lock().unwrap().push(command.clone());
            self.result.clone()
        }
    }

    fn session_with(
        provider: Arc<dyn ChatProvider>,
        environment: Arc<dyn ExecutionEnvironment>,
    ) -> Session {
        let mut registry = ProviderRegistry::empty();
        registry.register(provider);
        Session::new(
            Arc::new(registry),
            Arc::new(SettingsStore::in_memory()),
            environment,
        )
    }

    fn ok(text: &str) -> Result<Reply, ProviderError> {
        Ok(Reply::complete(text.to_string()))
    }

    #[tokio::test]
    async fn plain_reply_appends_one_user_and_one_assistant_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![ok("hello there")]));
        let session = session_with(provider.clone(), Arc::new(FakeEnvironment::without_target()));

        let reply = session.send("hi", false).await.unwrap();
        assert_eq!(reply, "hello there");

        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], Message::user("hi"));
        assert_eq!(messages[1], Message::assistant("hello there"));
        assert!(!session.is_replying());

        // The provider saw the system prompt first, then the user turn
        let windows = provider.windows();
        assert_eq!(windows[0][0].role, Role::System);
        assert_eq!(windows[0][1], Message::user("hi"));
    }

    #[tokio::test]
    async fn command_reply_round_trips_through_the_environment() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ok(r#"{"action":"FETCH","urls":["https://wx.example"]}"#),
            ok("It's sunny, 22\u{b0}C"),
        ]));
        let environment = Arc::new(FakeEnvironment::with_result(ExecutionResult::success(
            vec![ResultItem::html("https://wx.example", "<html>sunny</html>")],
        )));
        let session = session_with(provider.clone(), environment.clone());

        let reply = session.send("what's the weather", true).await.unwrap();
        assert_eq!(reply, "It's sunny, 22\u{b0}C");

        // Exactly one user + one assistant turn; the FETCH reply is not stored
        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], Message::user("what's the weather"));
        assert_eq!(messages[1], Message::assistant("It's sunny, 22\u{b0}C"));

        // One FETCH executed
        let executed = environment.executed.lock().unwrap();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].action, "FETCH");

        // Second pass: one synthetic user turn, no system message, carrying
        // the extraction and the original input
        let windows = provider.windows();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[1].len(), 1);
        assert_eq!(windows[1][0].role, Role::User);
        assert!(windows[1][0].content.contains("sunny"));
        assert!(windows[1][0].content.ends_with(";what's the weather"));
    }

    #[tokio::test]
    async fn network_mode_installs_the_tooling_prompt() {
        let provider = Arc::new(ScriptedProvider::new(vec![ok("plain answer")]));
        let session = session_with(provider.clone(), Arc::new(FakeEnvironment::without_target()));

        session.send("anything", true).await.unwrap();

        let windows = provider.windows();
        assert_eq!(windows[0][0].role, Role::System);
        assert!(windows[0][0].content.contains("FETCH"));
    }

    #[tokio::test]
    async fn missing_target_fails_the_turn_as_an_assistant_reply() {
        let provider = Arc::new(ScriptedProvider::new(vec![ok(
            r#"{"action":"READ_DOM","selector":"main"}"#,
        )]));
        let session = session_with(provider, Arc::new(FakeEnvironment::without_target()));

        let reply = session.send("summarize the page", false).await.unwrap();
        assert!(reply.contains("no execution target"));

        // The error reply is part of the conversation, not a thrown error
        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, reply);
    }

    #[tokio::test]
    async fn per_command_failure_does_not_abort_the_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ok(r#"[{"action":"FETCH","urls":["http://x"]},{"action":"FETCH","urls":["http://y"]}]"#),
            ok("final answer"),
        ]));
        let environment = Arc::new(FakeEnvironment::with_result(ExecutionResult::failure(
            "boom",
        )));
        let session = session_with(provider.clone(), environment.clone());

        let reply = session.send("go", false).await.unwrap();
        assert_eq!(reply, "final answer");
        // Both commands still ran
        assert_eq!(environment.executed.lock().unwrap().len(), 2);
        // Their failures are summarized into the follow-up prompt
        let windows = provider.windows();
        assert!(windows[1][0].content.contains("FETCH failed: boom"));
    }

    #[tokio::test]
    async fn provider_error_becomes_a_user_visible_string() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::Request {
            status: 401,
            body: "bad key".into(),
        })]));
        let session = session_with(provider, Arc::new(FakeEnvironment::without_target()));

        let reply = session.send("hi", false).await.unwrap();
        assert!(reply.contains("401"));
        assert!(reply.contains("API key"));

        // The user turn stays; no assistant turn is appended
        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert!(!session.is_replying());
    }

    #[tokio::test]
    async fn unregistered_provider_fails_the_turn() {
        // Empty registry: the settings default (openai) has no adapter
        let session = Session::new(
            Arc::new(ProviderRegistry::empty()),
            Arc::new(SettingsStore::in_memory()),
            Arc::new(FakeEnvironment::without_target()),
        );

        let reply = session.send("hi", false).await.unwrap();
        assert!(reply.contains("unsupported provider: openai"));
    }

    #[tokio::test]
    async fn stop_yields_the_partial_and_appends_nothing() {
        let provider = Arc::new(PendingProvider {
            partial: "partial tex".to_string(),
        });
        let session = Arc::new(session_with(
            provider,
            Arc::new(FakeEnvironment::without_target()),
        ));

        let background = Arc::clone(&session);
        let handle = tokio::spawn(async move { background.send("question", false).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(session.is_replying());

        // A second send while one is in flight is rejected
        let busy = session.send("again", false).await;
        assert!(matches!(busy, Err(AgentError::SessionBusy)));

        session.stop();
        let reply = handle.await.unwrap().unwrap();
        assert_eq!(reply, "partial tex");

        // Stopping discards the partial from history: only the user turn
        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], Message::user("question"));
        assert!(!session.is_replying());
    }

    /// Provider that, once cancelled, takes a while to wind down before
    /// yielding its partial.
    struct SlowAbortProvider;

    #[async_trait]
    impl ChatProvider for SlowAbortProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::OpenAi
        }

        async fn ask(
            &self,
            _request: ChatRequest<'_>,
            callbacks: &StreamCallbacks,
            cancel: &CancellationToken,
        ) -> Result<Reply, ProviderError> {
            cancel.cancelled().await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            callbacks.abort("partial");
            Ok(Reply::cancelled("partial".to_string()))
        }
    }

    #[tokio::test]
    async fn stop_keeps_the_session_busy_until_the_turn_unwinds() {
        let session = Arc::new(session_with(
            Arc::new(SlowAbortProvider),
            Arc::new(FakeEnvironment::without_target()),
        ));

        let first = Arc::clone(&session);
        let handle = tokio::spawn(async move { first.send("one", false).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.stop();

        // The stopped turn is still winding down: the session stays busy
        // and a new send is rejected rather than admitted alongside it.
        assert!(session.is_replying());
        let busy = session.send("two", false).await;
        assert!(matches!(busy, Err(AgentError::SessionBusy)));

        let reply = handle.await.unwrap().unwrap();
        assert_eq!(reply, "partial");
        assert!(!session.is_replying());

        // The next turn owns its own token: it is visible as in flight
        // and stoppable, untouched by the previous turn's cleanup.
        let second = Arc::clone(&session);
        let handle = tokio::spawn(async move { second.send("three", false).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(session.is_replying());
        session.stop();
        let reply = handle.await.unwrap().unwrap();
        assert_eq!(reply, "partial");
        assert!(!session.is_replying());

        // Stopped turns left only their user messages behind
        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.role == Role::User));
    }

    #[tokio::test]
    async fn second_pass_reply_is_never_reclassified() {
        // The final reply is command-shaped JSON, but it must be treated
        // as plain text because it came from the second pass.
        let provider = Arc::new(ScriptedProvider::new(vec![
            ok(r#"{"action":"FETCH","urls":["http://x"]}"#),
            ok(r#"{"action":"FETCH","urls":["http://again"]}"#),
        ]));
        let environment = Arc::new(FakeEnvironment::with_result(ExecutionResult::success(
            vec![ResultItem::html("http://x", "<p>data</p>")],
        )));
        let session = session_with(provider, environment.clone());

        let reply = session.send("fetch it", false).await.unwrap();
        assert_eq!(reply, r#"{"action":"FETCH","urls":["http://again"]}"#);
        // Only the first command executed; the second-pass JSON did not
        assert_eq!(environment.executed.lock().unwrap().len(), 1);
        assert_eq!(session.messages().len(), 2);
    }
}
