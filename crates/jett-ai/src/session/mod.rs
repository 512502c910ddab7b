//! The voice session state machine.
//!
//! One turn is Idle → Listening → Processing → Speaking → Idle. Every wait
//! outside Idle races the collaborator against a cancel request and a
//! deadline rooted at the transition into that state. Reaching Idle from any
//! state cancels the turn token, which every collaborator holds.

pub mod state;

pub use state::{transition, SessionInput, SessionState};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use jett_core::config::SessionConfig;
use jett_core::error::{GovernorError, SessionError};
use jett_core::interfaces::{SpeechCapture, Synthesizer, TokenStream, Transcriber, WakeDetector};
use jett_core::security::{ExecutionResult, Operation};
use jett_guard::ActionGovernor;

use crate::events::SessionEvent;
use crate::intent::parse_command;
use crate::router::QueryRouter;

/// Longest action output passed on to the model.
const MAX_ACTION_DETAIL_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlSignal {
    Wake,
    Cancel,
}

/// Cloneable handle for manual activation and cancellation.
#[derive(Debug, Clone)]
pub struct SessionControl {
    tx: mpsc::UnboundedSender<ControlSignal>,
}

impl SessionControl {
    /// Same as the wake word. Ignored unless the session is idle.
    pub fn wake(&self) {
        let _ = self.tx.send(ControlSignal::Wake);
    }

    /// Abort the turn in flight. A no-op while idle.
    pub fn cancel(&self) {
        let _ = self.tx.send(ControlSignal::Cancel);
    }
}

/// Data belonging to the current turn. Dropped on every return to Idle.
#[derive(Debug)]
pub struct SessionContext {
    pub turn_id: Uuid,
    pub started_at: Instant,
    pub transcript: Option<String>,
    cancel: CancellationToken,
}

impl SessionContext {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            started_at: Instant::now(),
            transcript: None,
            cancel,
        }
    }
}

/// How a turn ended. The session is back in Idle in every case.
#[derive(Debug)]
pub enum TurnOutcome {
    Completed,
    /// Nothing was said, or the transcript was empty.
    NoSpeech,
    /// The backend finished without producing a token.
    NoResponse,
    Aborted {
        state: SessionState,
        reason: SessionError,
    },
}

enum Phase<T> {
    Done(T),
    Cancelled,
    TimedOut,
}

/// Race `fut` against cancellation and `deadline`. Wake requests that arrive
/// meanwhile are consumed and ignored.
async fn race<F: Future>(
    fut: F,
    cancel: &CancellationToken,
    control: &mut mpsc::UnboundedReceiver<ControlSignal>,
    deadline: Instant,
) -> Phase<F::Output> {
    tokio::pin!(fut);
    let sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(sleep);
    let mut control_open = true;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Phase::Cancelled,
            signal = control.recv(), if control_open => match signal {
                Some(ControlSignal::Cancel) => return Phase::Cancelled,
                Some(ControlSignal::Wake) => tracing::debug!("Wake ignored, session busy"),
                None => control_open = false,
            },
            _ = &mut sleep => return Phase::TimedOut,
            out = &mut fut => return Phase::Done(out),
        }
    }
}

pub struct SessionMachine {
    state: SessionState,
    context: Option<SessionContext>,
    wake: Box<dyn WakeDetector>,
    capture: Box<dyn SpeechCapture>,
    transcriber: Arc<dyn Transcriber>,
    synthesizer: Arc<dyn Synthesizer>,
    router: Arc<QueryRouter>,
    governor: Option<Arc<ActionGovernor>>,
    config: SessionConfig,
    control: SessionControl,
    control_rx: mpsc::UnboundedReceiver<ControlSignal>,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
    shutdown: CancellationToken,
}

impl SessionMachine {
    pub fn new(
        wake: Box<dyn WakeDetector>,
        capture: Box<dyn SpeechCapture>,
        transcriber: Arc<dyn Transcriber>,
        synthesizer: Arc<dyn Synthesizer>,
        router: Arc<QueryRouter>,
        config: SessionConfig,
    ) -> Self {
        let (tx, control_rx) = mpsc::unbounded_channel();
        Self {
            state: SessionState::Idle,
            context: None,
            wake,
            capture,
            transcriber,
            synthesizer,
            router,
            governor: None,
            config,
            control: SessionControl { tx },
            control_rx,
            events: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Route recognised commands through `governor`. Without one, commands
    /// are answered like any other query.
    pub fn with_governor(mut self, governor: Arc<ActionGovernor>) -> Self {
        self.governor = Some(governor);
        self
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Cancelling `token` stops [`run`](Self::run) and any turn in flight.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn context(&self) -> Option<&SessionContext> {
        self.context.as_ref()
    }

    pub fn control(&self) -> SessionControl {
        self.control.clone()
    }

    /// Wait for wake, run a turn, repeat until shutdown.
    pub async fn run(&mut self) {
        tracing::info!("Session loop started");
        while self.wait_for_wake().await {
            match self.run_turn().await {
                TurnOutcome::Completed => tracing::info!("Turn completed"),
                TurnOutcome::NoSpeech => tracing::debug!("Turn ended without speech"),
                TurnOutcome::NoResponse => tracing::warn!("Backend produced no response"),
                TurnOutcome::Aborted { state, reason } => {
                    tracing::info!(%state, "Turn aborted: {reason}")
                }
            }
        }
        tracing::info!("Session loop stopped");
    }

    async fn wait_for_wake(&mut self) -> bool {
        let period = self.config.wake_poll().max(Duration::from_millis(1));
        let mut poll = tokio::time::interval(period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return false,
                signal = self.control_rx.recv() => match signal {
                    Some(ControlSignal::Wake) => return true,
                    Some(ControlSignal::Cancel) => {}
                    None => return false,
                },
                _ = poll.tick() => {
                    if self.wake.poll() {
                        tracing::info!("Wake word detected");
                        return true;
                    }
                }
            }
        }
    }

    /// Run one turn as if the wake word had just been heard.
    pub async fn run_turn(&mut self) -> TurnOutcome {
        let ctx = SessionContext::new(self.shutdown.child_token());
        let span = tracing::info_span!("turn", id = %ctx.turn_id);
        let cancel = ctx.cancel.clone();
        self.context = Some(ctx);
        self.apply(SessionInput::Wake);

        let outcome = self.drive(cancel).instrument(span).await;
        if self.state != SessionState::Idle {
            self.apply(SessionInput::Failed);
        }
        outcome
    }

    async fn drive(&mut self, cancel: CancellationToken) -> TurnOutcome {
        // Listening
        let deadline = Instant::now() + self.config.listen_timeout();
        let audio = match race(
            self.capture.record(&cancel),
            &cancel,
            &mut self.control_rx,
            deadline,
        )
        .await
        {
            Phase::Done(Ok(Some(audio))) => audio,
            Phase::Done(Ok(None)) => return self.finish(SessionInput::NoSpeech, TurnOutcome::NoSpeech),
            Phase::Done(Err(e)) => return self.abort(e.into()),
            Phase::Cancelled => return self.abort(SessionError::Cancelled),
            Phase::TimedOut => return self.abort(self.timeout()),
        };
        self.apply(SessionInput::SpeechEnded);

        // Processing: one deadline covers transcription, any command, and the
        // first response token.
        let deadline = Instant::now() + self.config.processing_timeout();
        let transcript = match race(
            self.transcriber.transcribe(audio, &cancel),
            &cancel,
            &mut self.control_rx,
            deadline,
        )
        .await
        {
            Phase::Done(Ok(text)) => text.trim().to_string(),
            Phase::Done(Err(e)) => return self.abort(e.into()),
            Phase::Cancelled => return self.abort(SessionError::Cancelled),
            Phase::TimedOut => return self.abort(self.timeout()),
        };
        if transcript.is_empty() {
            return self.finish(SessionInput::NoSpeech, TurnOutcome::NoSpeech);
        }
        tracing::info!("Transcript: {transcript}");
        if let Some(ctx) = self.context.as_mut() {
            ctx.transcript = Some(transcript.clone());
        }
        self.emit(SessionEvent::Transcript(transcript.clone()));

        let mut prompt = transcript.clone();
        let mut governed = None;
        if let Some((kind, target)) = parse_command(&transcript) {
            match self.governor.clone() {
                Some(governor) => {
                    let op = Operation::new(kind, target, governor.subject());
                    // Spawned so that a cancel or timeout never interrupts
                    // the governor between its audit writes.
                    let handle = tokio::spawn({
                        let governor = Arc::clone(&governor);
                        let op = op.clone();
                        async move { governor.authorize(&op).await }
                    });
                    let result = match race(handle, &cancel, &mut self.control_rx, deadline).await {
                        Phase::Done(Ok(result)) => result,
                        Phase::Done(Err(join)) => Err(GovernorError::Execution(format!(
                            "governor task failed: {join}"
                        ))),
                        Phase::Cancelled => return self.abort(SessionError::Cancelled),
                        Phase::TimedOut => return self.abort(self.timeout()),
                    };
                    let (success, detail) = describe_action(&op, &result);
                    self.emit(SessionEvent::ActionOutcome {
                        operation: op,
                        success,
                        detail: detail.clone(),
                    });
                    prompt = format!("{transcript}\n\n[Action result: {detail}. Tell the user briefly.]");
                    governed = Some(governor);
                }
                None => tracing::debug!(%kind, %target, "Command heard but no governor configured"),
            }
        }

        let routed = match race(
            self.router.route_with_verdict(&transcript, &prompt),
            &cancel,
            &mut self.control_rx,
            deadline,
        )
        .await
        {
            Phase::Done(Ok(routed)) => routed,
            Phase::Done(Err(e)) => return self.abort(e.into()),
            Phase::Cancelled => return self.abort(SessionError::Cancelled),
            Phase::TimedOut => return self.abort(self.timeout()),
        };
        if let Some(governor) = governed {
            if let Err(e) = governor.record_route(
                governor.subject(),
                routed.verdict.route,
                &routed.verdict.matched_signal,
                routed.served_by,
            ) {
                tracing::error!("Failed to audit routing decision: {e}");
            }
        }

        let mut tokens = routed.tokens;
        let first = match race(tokens.next(), &cancel, &mut self.control_rx, deadline).await {
            Phase::Done(Some(Ok(token))) => token,
            Phase::Done(Some(Err(e))) => return self.abort(e.into()),
            Phase::Done(None) => {
                return self.finish(SessionInput::EmptyResponse, TurnOutcome::NoResponse)
            }
            Phase::Cancelled => return self.abort(SessionError::Cancelled),
            Phase::TimedOut => return self.abort(self.timeout()),
        };
        self.apply(SessionInput::FirstToken);

        // Speaking
        let deadline = Instant::now() + self.config.speaking_timeout();
        let events = self.events.clone();
        let speech: TokenStream = Box::pin(
            stream::once(async move { Ok(first) })
                .chain(tokens)
                .inspect(move |item| {
                    if let (Ok(token), Some(tx)) = (item, events.as_ref()) {
                        let _ = tx.send(SessionEvent::Spoken(token.clone()));
                    }
                }),
        );
        match race(
            self.synthesizer.stream_speak(speech, &cancel),
            &cancel,
            &mut self.control_rx,
            deadline,
        )
        .await
        {
            Phase::Done(Ok(())) => self.finish(SessionInput::PlaybackDone, TurnOutcome::Completed),
            Phase::Done(Err(e)) => self.abort(e.into()),
            Phase::Cancelled => self.abort(SessionError::Cancelled),
            Phase::TimedOut => self.abort(self.timeout()),
        }
    }

    fn apply(&mut self, input: SessionInput) -> bool {
        let Some(next) = transition(self.state, input) else {
            tracing::debug!(state = %self.state, ?input, "Input ignored");
            return false;
        };
        let from = std::mem::replace(&mut self.state, next);
        if next == SessionState::Idle {
            if let Some(ctx) = self.context.take() {
                ctx.cancel.cancel();
                tracing::debug!(
                    elapsed_ms = ctx.started_at.elapsed().as_millis() as u64,
                    "Turn context released"
                );
            }
        }
        tracing::debug!(%from, to = %next, "State change");
        self.emit(SessionEvent::StateChanged { from, to: next });
        true
    }

    fn finish(&mut self, input: SessionInput, outcome: TurnOutcome) -> TurnOutcome {
        self.apply(input);
        outcome
    }

    fn abort(&mut self, reason: SessionError) -> TurnOutcome {
        let state = self.state;
        let input = match reason {
            SessionError::Cancelled => SessionInput::Cancel,
            SessionError::Timeout { .. } => SessionInput::Timeout,
            _ => SessionInput::Failed,
        };
        tracing::warn!(%state, "Turn aborted: {reason}");
        self.emit(SessionEvent::TurnAborted {
            state,
            reason: reason.to_string(),
        });
        self.apply(input);
        TurnOutcome::Aborted { state, reason }
    }

    fn timeout(&self) -> SessionError {
        SessionError::Timeout {
            state: self.state.to_string(),
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// One-line summary of a governed action, for the event stream and the prompt.
fn describe_action(op: &Operation, result: &Result<ExecutionResult, GovernorError>) -> (bool, String) {
    let what = format!("{} {}", op.kind, op.target);
    match result {
        Ok(done) => {
            let output: String = done.output.chars().take(MAX_ACTION_DETAIL_CHARS).collect();
            (true, format!("{what} succeeded: {output}"))
        }
        Err(GovernorError::PolicyDenied(_)) => (false, format!("{what} is not permitted")),
        Err(GovernorError::RateLimited { retry_after }) => (
            false,
            format!(
                "{what} was rate limited, try again in {} seconds",
                retry_after.as_secs().max(1)
            ),
        ),
        Err(GovernorError::Execution(detail)) => (false, format!("{what} failed: {detail}")),
        Err(GovernorError::Audit(_)) => (
            false,
            format!("{what} could not be confirmed because the audit log is unavailable"),
        ),
    }
}
