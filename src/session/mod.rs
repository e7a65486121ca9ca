//! Console chat session — reads operator lines, forwards them to the
//! configured provider, prints the reply.
//!
//! The session owns the provider (and through it the API key) and the
//! conversation [`History`]. `main` builds one at startup with
//! [`ChatSession::from_config`] and drives it with [`ChatSession::run`].
//!
//! State machine:
//!
//! ```text
//! Idle ──run──▶ AwaitingInput ──input──▶ AwaitingResponse
//!                 ▲    │                      │
//!                 └────┼──── reply / error ───┘
//!                      │                      │
//!       exit / EOF / ctrl-c            auth failure / ctrl-c
//!                      ▼                      ▼
//!                  Terminated ◀───────────────┘
//! ```

pub mod history;

pub use history::{History, Role, Turn};

use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ChatConfig, Config};
use crate::error::AppError;
use crate::llm::{Generate, LlmProvider, ProviderError, providers};

pub const FAREWELL: &str = "Goodbye!";
pub const NO_RESPONSE: &str = "No response received.";
pub const INVALID_CREDENTIAL: &str = "Invalid API key. Check your credential and restart.";
pub const TOO_MANY_REQUESTS: &str = "Too many requests. Please wait a moment and try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingInput,
    AwaitingResponse,
    Terminated,
}

/// Why [`ChatSession::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The operator typed the exit command.
    OperatorExit,
    /// Stdin reached end of file.
    InputClosed,
    /// The shutdown token was cancelled (Ctrl-C).
    Interrupted,
    /// The provider rejected the API key.
    AuthenticationFailed,
}

impl ExitReason {
    /// Process exit status for this outcome.
    pub fn exit_code(self) -> i32 {
        match self {
            ExitReason::AuthenticationFailed => 1,
            _ => 0,
        }
    }
}

pub struct ChatSession<P> {
    provider: P,
    chat: ChatConfig,
    history: History,
    state: SessionState,
}

impl ChatSession<LlmProvider> {
    /// Build the configured provider and wrap it in a fresh session.
    ///
    /// Fails with [`AppError::Config`] when the provider needs an API key and
    /// none is set, so nothing is printed to the console.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let provider = providers::build(&config.llm, config.llm_api_key.clone())
            .map_err(|e| AppError::Config(e.to_string()))?;
        info!(provider = provider.name(), "llm provider ready");
        Ok(Self::new(provider, config.chat.clone()))
    }
}

impl<P: Generate> ChatSession<P> {
    pub fn new(provider: P, chat: ChatConfig) -> Self {
        Self { provider, chat, history: History::new(), state: SessionState::Idle }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Run the loop until the operator exits, input ends, `shutdown` is
    /// cancelled, or the provider rejects the API key.
    ///
    /// Lines are read from `input`; prompts and replies are written to `out`.
    /// A session runs once: calling `run` after it terminated is an error.
    pub async fn run<R, W>(
        &mut self,
        input: R,
        out: &mut W,
        shutdown: &CancellationToken,
    ) -> Result<ExitReason, AppError>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        if self.state == SessionState::Terminated {
            return Err(AppError::Session("session already terminated".into()));
        }
        self.state = SessionState::AwaitingInput;
        debug!("chat session started");

        let mut lines = input.lines();

        let reason = loop {
            write!(out, "{}", self.chat.user_prompt)?;
            out.flush()?;

            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                line = lines.next_line() => Some(line),
            };

            let line = match next {
                None => {
                    writeln!(out)?;
                    break ExitReason::Interrupted;
                }
                Some(line) => line?,
            };

            let Some(line) = line else {
                writeln!(out)?;
                debug!("stdin closed");
                break ExitReason::InputClosed;
            };

            let text = line.trim();
            if text.is_empty() {
                continue;
            }

            if self.is_exit_command(text) {
                self.say(out, FAREWELL)?;
                break ExitReason::OperatorExit;
            }

            if let Some(reason) = self.exchange(text, out, shutdown).await? {
                break reason;
            }
        };

        self.state = SessionState::Terminated;
        info!(?reason, turns = self.history.len(), "chat session ended");
        Ok(reason)
    }

    fn is_exit_command(&self, text: &str) -> bool {
        text.eq_ignore_ascii_case(&self.chat.exit_command)
    }

    /// One round-trip. Returns `Some` when the loop must stop.
    async fn exchange<W: Write>(
        &mut self,
        text: &str,
        out: &mut W,
        shutdown: &CancellationToken,
    ) -> Result<Option<ExitReason>, AppError> {
        self.history.push(Turn::new(Role::Operator, text));
        self.state = SessionState::AwaitingResponse;
        debug!(input_len = text.len(), "forwarding operator input");

        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            result = self.provider.generate(text) => Some(result),
        };

        let Some(result) = result else {
            writeln!(out)?;
            return Ok(Some(ExitReason::Interrupted));
        };

        match result {
            Ok(resp) if resp.text.trim().is_empty() => {
                warn!("provider returned no text");
                self.say(out, NO_RESPONSE)?;
            }
            Ok(resp) => {
                if let Some(u) = resp.usage {
                    debug!(input_tokens = u.input_tokens, output_tokens = u.output_tokens, "llm usage");
                }
                self.say(out, &resp.text)?;
                self.history.push(Turn::new(Role::Assistant, resp.text));
            }
            Err(ProviderError::Authentication(message)) => {
                error!(%message, "provider rejected the API key");
                self.say(out, INVALID_CREDENTIAL)?;
                return Ok(Some(ExitReason::AuthenticationFailed));
            }
            Err(ProviderError::RateLimited(message)) => {
                warn!(%message, "provider rate limit hit");
                self.say(out, TOO_MANY_REQUESTS)?;
            }
            Err(e) => {
                warn!(error = %e, "provider request failed");
                self.say(out, &format!("Error: {e}"))?;
            }
        }

        self.state = SessionState::AwaitingInput;
        Ok(None)
    }

    fn say<W: Write>(&self, out: &mut W, text: &str) -> Result<(), AppError> {
        writeln!(out, "{}{}", self.chat.assistant_prefix, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run_dummy(input: &str) -> (ChatSession<LlmProvider>, ExitReason, String) {
        let mut session = ChatSession::from_config(&Config::test_default()).unwrap();
        let mut out = Vec::new();
        let reason = session
            .run(input.as_bytes(), &mut out, &CancellationToken::new())
            .await
            .unwrap();
        (session, reason, String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn dummy_round_trip_then_exit() {
        let (session, reason, out) = run_dummy("hello\nexit\n").await;
        assert_eq!(reason, ExitReason::OperatorExit);
        assert_eq!(session.state(), SessionState::Terminated);
        assert!(out.contains("AI chatbot: [echo] hello"));
        assert!(out.ends_with("AI chatbot: Goodbye!\n"));
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history().last(), Some(&Turn::new(Role::Assistant, "[echo] hello")));
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let (session, _, out) = run_dummy("\n   \nexit\n").await;
        assert!(session.history().is_empty());
        assert_eq!(out.matches("You: ").count(), 3);
    }

    #[tokio::test]
    async fn input_is_trimmed_before_forwarding() {
        let (session, _, _) = run_dummy("  spaced out  \n").await;
        assert_eq!(session.history().turns()[0], Turn::new(Role::Operator, "spaced out"));
    }

    #[tokio::test]
    async fn eof_ends_session() {
        let (session, reason, out) = run_dummy("").await;
        assert_eq!(reason, ExitReason::InputClosed);
        assert_eq!(reason.exit_code(), 0);
        assert!(session.history().is_empty());
        assert!(!out.contains(FAREWELL));
    }

    #[tokio::test]
    async fn cancelled_token_interrupts_before_reading() {
        let mut session = ChatSession::from_config(&Config::test_default()).unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let mut out = Vec::new();
        let reason = session.run("hello\n".as_bytes(), &mut out, &shutdown).await.unwrap();
        assert_eq!(reason, ExitReason::Interrupted);
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn terminated_session_cannot_rerun() {
        let (mut session, _, _) = run_dummy("exit\n").await;
        let err = session
            .run("hi\n".as_bytes(), &mut Vec::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Session(_)));
    }

    #[test]
    fn new_session_is_idle() {
        let session = ChatSession::from_config(&Config::test_default()).unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.provider().name(), "dummy");
    }

    #[test]
    fn missing_key_is_config_error() {
        let mut config = Config::test_default();
        config.llm.provider = "gemini".into();
        config.llm_api_key = None;
        let err = ChatSession::from_config(&config).err().unwrap();
        assert!(matches!(err, AppError::Config(ref m) if m.contains("GEMINI_API_KEY")));
    }

    #[test]
    fn exit_codes() {
        assert_eq!(ExitReason::OperatorExit.exit_code(), 0);
        assert_eq!(ExitReason::Interrupted.exit_code(), 0);
        assert_eq!(ExitReason::AuthenticationFailed.exit_code(), 1);
    }
}
