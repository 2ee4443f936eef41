//! Application entry point for voice-practice.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Create the [`tokio`] runtime (multi-thread, 2 workers).
//! 4. Build the service clients, the audio devices and the usage gate.
//! 5. Restore the saved conversation.
//! 6. Spawn the hotkey listener thread.
//! 7. Run the orchestrator until Ctrl-C, printing status changes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use voice_practice::{
    audio::{AnalysisContext, CpalMicrophone, VolumeLevel},
    config::{AppConfig, AppPaths},
    gate::{unlock_gate, HttpPasswordVerifier, LocalUsageGate},
    hotkey::{parse_key, ControlEvent, HotkeyListener},
    llm::{HistoryStore, HttpChatClient},
    pipeline::{
        lock, new_shared_session, Components, ConversationOrchestrator, ConversationState, SharedSession,
    },
    playback::CpalOutput,
    stt::HttpTranscriber,
    tts::{CachedSynthesizer, HttpSynthesizer},
};

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("voice-practice starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    let paths = AppPaths::new();

    // 3. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    // 4. Components
    let gate = LocalUsageGate::open(&paths.usage_file, config.gate.max_free_uses);
    if let Some(password) = config.gate.owner_password.as_deref() {
        let verifier = HttpPasswordVerifier::from_config(&config.service);
        match rt.block_on(unlock_gate(&gate, &verifier, password)) {
            Ok(true) => log::info!("Owner password accepted; usage is unlimited"),
            Ok(false) => log::warn!("Owner password rejected"),
            Err(e) => log::warn!("Could not verify owner password: {e}"),
        }
    }

    let synthesizer = CachedSynthesizer::new(
        HttpSynthesizer::from_config(&config.service, &config.speech),
        config.speech.cache_capacity,
    );

    // 5. Saved conversation
    let history = HistoryStore::new(&paths.history_file);
    let session = new_shared_session(history.load());

    let components = Components {
        microphone: Arc::new(CpalMicrophone::new()),
        analysis: AnalysisContext::from_config(&config.audio),
        transcriber: Arc::new(HttpTranscriber::from_config(&config.service)),
        chat: Arc::new(HttpChatClient::from_config(&config.service)),
        synthesizer: Arc::new(synthesizer),
        output: Arc::new(CpalOutput::new(&config.playback)),
        gate: Arc::new(gate),
        history: Some(history),
    };

    // 6. Hotkey listener thread
    let (control_tx, control_rx) = mpsc::channel::<ControlEvent>(16);
    let key = parse_key(&config.hotkey.control_key).unwrap_or_else(|| {
        log::warn!("Unknown control key {:?}; using F9", config.hotkey.control_key);
        rdev::Key::F9
    });
    let _listener = HotkeyListener::start(key, control_tx.clone()).context("failed to start hotkey listener")?;
    log::info!("Press {:?} to talk", key);

    // 7. Orchestrator
    rt.block_on(async move {
        let orchestrator = ConversationOrchestrator::new(Arc::clone(&session), components, &config);
        tokio::spawn(print_status(session, orchestrator.volume()));
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = control_tx.send(ControlEvent::Shutdown).await;
            }
        });
        orchestrator.run(control_rx).await;
    });

    log::info!("voice-practice stopped");
    Ok(())
}

/// Print the session's status line whenever it changes.
async fn print_status(session: SharedSession, volume: Arc<VolumeLevel>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let mut last = String::new();
    loop {
        ticker.tick().await;
        let (status, listening) = {
            let s = lock(&session);
            (s.status_text(), s.state == ConversationState::Listening)
        };
        if listening {
            log::debug!("mic {}", volume_bar(volume.get()));
        }
        if status != last {
            println!("{status}");
            last = status;
        }
    }
}

fn volume_bar(level: f32) -> String {
    let filled = (level.clamp(0.0, 100.0) / 5.0).round() as usize;
    format!("[{}{}]", "#".repeat(filled), " ".repeat(20 - filled))
}
