use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Result;
use futures_util::StreamExt;
use jett_ai::router::ComplexityClassifier;
use jett_ai::voice::console::{self, ConsoleSynthesizer, TextTranscriber};
use jett_ai::{QueryRouter, SessionControl, SessionEvent, SessionMachine};
use jett_core::config::AppConfig;
use jett_core::security::{Operation, OperationKind};
use jett_guard::AuditSink;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::setup::{create_governor, create_router, open_audit};

#[cfg(feature = "voice-stt")]
type AudioGuard = jett_ai::voice::capture::MicInput;
#[cfg(not(feature = "voice-stt"))]
type AudioGuard = ();

pub async fn run(config: &AppConfig, text: bool) -> Result<()> {
    let governor = create_governor(config)?;
    let router = create_router(config)?;
    let shutdown = CancellationToken::new();

    let (machine, _audio): (SessionMachine, Option<AudioGuard>) = if text {
        (text_session(config, router.clone(), shutdown.clone()), None)
    } else {
        let (machine, audio) = voice_session(config, router.clone())?;
        (machine, Some(audio))
    };

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let mut machine = machine
        .with_governor(governor)
        .with_events(events_tx)
        .with_shutdown(shutdown.clone());

    tokio::spawn(log_events(events_rx));
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted");
                shutdown.cancel();
            }
        }
    });
    if !text {
        spawn_manual_controls(machine.control(), shutdown.clone());
    }

    machine.run().await;

    let served = router.telemetry();
    tracing::info!(
        local = served.local,
        cloud = served.cloud,
        fallbacks = served.fallbacks,
        "Session ended"
    );
    Ok(())
}

fn text_session(
    config: &AppConfig,
    router: Arc<QueryRouter>,
    shutdown: CancellationToken,
) -> SessionMachine {
    let (wake, capture) = console::stdin_input(shutdown);
    SessionMachine::new(
        Box::new(wake),
        Box::new(capture),
        Arc::new(TextTranscriber),
        Arc::new(ConsoleSynthesizer),
        router,
        config.session.clone(),
    )
}

#[cfg(feature = "voice-stt")]
fn voice_session(
    config: &AppConfig,
    router: Arc<QueryRouter>,
) -> Result<(SessionMachine, AudioGuard)> {
    use jett_ai::voice::capture::{MicCapture, MicInput};
    use jett_ai::voice::stt::{WhisperTranscriber, WHISPER_SAMPLE_RATE};
    use jett_ai::voice::{PiperSynthesizer, WakeWordDetector};

    let mic = MicInput::start(WHISPER_SAMPLE_RATE)?;

    #[cfg(feature = "wake-word")]
    let wake = WakeWordDetector::new(
        &config.voice.wake_word_model,
        config.voice.wake_threshold,
        mic.consumer(),
        mic.sample_rate() as usize,
    )?;
    #[cfg(not(feature = "wake-word"))]
    let wake = WakeWordDetector::new(&config.voice.wake_word_model)?;

    if config.voice.piper_model.is_empty() {
        tracing::warn!("voice.piper_model is not set, speech output will fail");
    }

    let machine = SessionMachine::new(
        Box::new(wake),
        Box::new(MicCapture::new(&mic, &config.voice)),
        Arc::new(WhisperTranscriber::new(&config.voice.whisper_model)?),
        Arc::new(PiperSynthesizer::from_config(&config.voice)),
        router,
        config.session.clone(),
    );
    Ok((machine, mic))
}

#[cfg(not(feature = "voice-stt"))]
fn voice_session(
    _config: &AppConfig,
    _router: Arc<QueryRouter>,
) -> Result<(SessionMachine, AudioGuard)> {
    anyhow::bail!("Built without the 'voice-stt' feature; use `jett run --text`")
}

/// Enter starts a turn, `c` cancels the current one, `q` quits.
fn spawn_manual_controls(control: SessionControl, shutdown: CancellationToken) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match line.trim() {
                "" | "w" => control.wake(),
                "c" | "cancel" => control.cancel(),
                "q" | "quit" => {
                    shutdown.cancel();
                    break;
                }
                other => eprintln!("Unknown control '{other}' (Enter, c, q)"),
            }
        }
    });
}

async fn log_events(mut rx: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            SessionEvent::StateChanged { from, to } => tracing::debug!(%from, %to, "Session state"),
            SessionEvent::Transcript(text) => tracing::info!("Heard: {text}"),
            SessionEvent::ActionOutcome {
                operation,
                success,
                detail,
            } => {
                if success {
                    tracing::info!(%operation, "{detail}");
                } else {
                    tracing::warn!(%operation, "{detail}");
                }
            }
            SessionEvent::Spoken(_) => {}
            SessionEvent::TurnAborted { state, reason } => {
                tracing::warn!(%state, "Turn aborted: {reason}")
            }
        }
    }
}

pub async fn ask(config: &AppConfig, text: &str) -> Result<()> {
    let router = create_router(config)?;
    let mut routed = router.route_with_verdict(text, text).await?;
    tracing::info!(
        route = %routed.verdict.route,
        served_by = %routed.served_by,
        "Answering"
    );
    let mut out = std::io::stdout();
    while let Some(token) = routed.tokens.next().await {
        write!(out, "{}", token?)?;
        out.flush()?;
    }
    writeln!(out)?;
    Ok(())
}

pub async fn exec(
    config: &AppConfig,
    kind: &str,
    target: String,
    subject: Option<String>,
) -> Result<()> {
    let kind: OperationKind = kind.parse()?;
    let governor = create_governor(config)?;
    let subject = subject.unwrap_or_else(|| governor.subject().to_string());
    let op = Operation::new(kind, target, subject);
    match governor.authorize(&op).await {
        Ok(result) => {
            println!("{}", result.output);
            Ok(())
        }
        Err(e) if e.is_governance() => {
            tracing::warn!(%op, "Refused");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

pub fn classify(config: &AppConfig, text: &str, json: bool) -> Result<()> {
    if json {
        let router = create_router(config)?;
        println!("{}", serde_json::to_string_pretty(&router.explain(text))?);
    } else {
        let classifier = ComplexityClassifier::from_config(&config.router)?;
        let verdict = classifier.classify(text);
        println!("{}\t{}", verdict.route, verdict.matched_signal);
    }
    Ok(())
}

pub fn audit(config: &AppConfig, recent: usize, verify: bool, json: bool) -> Result<()> {
    let log = open_audit(config)?;
    if verify {
        let count = log.verify()?;
        println!("OK: {count} records verified");
        return Ok(());
    }

    let records = log.recent(recent)?;
    for record in &records {
        if json {
            println!("{}", serde_json::to_string(record)?);
        } else {
            println!("{}", record.to_line());
        }
    }
    if !json {
        println!("({} records)", records.len());
    }
    Ok(())
}

pub fn check_config(config: &AppConfig) -> Result<()> {
    println!("subject:    {}", config.governor.subject);
    println!("delegate:   {}", config.governor.delegate);
    println!("allowlist:  {} entries", config.governor.allow.len());
    println!(
        "rate limit: {}/min, {}/hour",
        config.governor.per_minute, config.governor.per_hour
    );
    println!("audit dir:  {}", config.audit.dir);
    println!("router:     {:?}", config.router.mode);
    println!("rules:      {} custom", config.router.rules.len());
    println!("OK");
    Ok(())
}
