//! Conversation orchestrator.
//!
//! [`ConversationOrchestrator`] owns the recorder and the playback queue and
//! is the only writer of the [`SharedSession`].  It reacts to two inputs:
//!
//! * [`ControlEvent`]s from the hotkey (or `Ctrl-C`),
//! * session events posted by the work it spawned (auto-stop,
//!   transcription, chat, synthesis, playback).
//!
//! Every spawned step carries the [`TurnId`] that was live when it started.
//! Results for any other turn are dropped on arrival, which is how a
//! barge-in cancels the work of the turn it interrupts.
//!
//! ```text
//! Pressed (Idle/Error, gate ok) ─▶ mint turn ─▶ stop playback ─▶ unlock ─▶ recorder.start   [Listening]
//! Pressed / AutoStopped          ─▶ recorder.stop ─▶ spawn transcribe                       [Processing]
//! Transcribed                    ─▶ append user ─▶ spawn chat
//! Replied                        ─▶ append assistant ─▶ segment ─▶ SynthesisPipeline
//! Synthesized (first ok)         ─▶ enqueue + play                                          [Speaking]
//! Pressed (Processing/Speaking)  ─▶ barge-in: same as the first line without the gate
//! ```

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::audio::{
    AnalysisContext, Microphone, RecorderError, SilenceAwareRecorder, StopReason, VolumeLevel,
};
use crate::config::AppConfig;
use crate::gate::UsageGate;
use crate::hotkey::ControlEvent;
use crate::llm::{ChatError, ChatReply, ChatService, HistoryStore, Speaker};
use crate::playback::{AudioOutput, AudioQueueEntry, PlaybackError, PlaybackEvent, PlaybackSequencer};
use crate::stt::{detect_language, Transcriber, TranscriptionError};
use crate::tts::{
    DispatchPolicy, SentenceSegmenter, SynthesisError, SynthesisOutcome, SynthesisPipeline,
    Synthesizer,
};

use super::state::{lock, ConversationState, Notice, SharedSession, TurnId};

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

/// Turn-ending failures.  `Display` is what the user sees.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("{0}")]
    Recorder(#[from] RecorderError),

    #[error("Couldn't understand the recording: {0}")]
    Transcription(#[from] TranscriptionError),

    #[error("No reply from the tutor: {0}")]
    Chat(#[from] ChatError),

    #[error("Couldn't voice the reply: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("Couldn't play the reply: {0}")]
    Playback(#[from] PlaybackError),
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

/// The collaborators the orchestrator drives.  `main` builds the real ones,
/// tests plug in doubles.
pub struct Components {
    pub microphone: Arc<dyn Microphone>,
    pub analysis: Arc<AnalysisContext>,
    pub transcriber: Arc<dyn Transcriber>,
    pub chat: Arc<dyn ChatService>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub output: Arc<dyn AudioOutput>,
    pub gate: Arc<dyn UsageGate>,
    /// Where the exchange log is saved after each append.
    pub history: Option<HistoryStore>,
}

// ---------------------------------------------------------------------------
// SessionEvent
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum SessionEvent {
    AutoStopped {
        turn: TurnId,
        reason: StopReason,
    },
    Transcribed {
        turn: TurnId,
        result: Result<String, TranscriptionError>,
    },
    Replied {
        turn: TurnId,
        result: Result<ChatReply, ChatError>,
    },
    Synthesized(SynthesisOutcome),
    SynthesisFinished {
        turn: TurnId,
    },
    Playback(PlaybackEvent),
}

/// Progress of the reply being voiced.
#[derive(Debug)]
struct ReplyProgress {
    turn: TurnId,
    /// Clips handed to the sequencer.
    delivered: usize,
    /// Clips the sequencer finished or skipped.
    settled: usize,
    failed: usize,
    last_error: Option<SessionError>,
    synthesis_done: bool,
}

impl ReplyProgress {
    fn new(turn: TurnId) -> Self {
        Self {
            turn,
            delivered: 0,
            settled: 0,
            failed: 0,
            last_error: None,
            synthesis_done: false,
        }
    }
}

// ---------------------------------------------------------------------------
// ConversationOrchestrator
// ---------------------------------------------------------------------------

pub struct ConversationOrchestrator {
    session: SharedSession,
    recorder: SilenceAwareRecorder,
    transcriber: Arc<dyn Transcriber>,
    chat: Arc<dyn ChatService>,
    gate: Arc<dyn UsageGate>,
    history: Option<HistoryStore>,
    segmenter: SentenceSegmenter,
    synthesis: SynthesisPipeline,
    sequencer: PlaybackSequencer,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    live_turn: watch::Sender<TurnId>,
    reply: Option<ReplyProgress>,
}

impl ConversationOrchestrator {
    /// Must be called inside a tokio runtime (the playback worker is
    /// spawned here).
    pub fn new(session: SharedSession, components: Components, config: &AppConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let playback_tx = events_tx.clone();
        let sequencer = PlaybackSequencer::spawn(components.output, &config.playback, move |event| {
            let _ = playback_tx.send(SessionEvent::Playback(event));
        });

        let recorder = SilenceAwareRecorder::new(
            components.microphone,
            components.analysis,
            config.audio.clone(),
        );
        let synthesis = SynthesisPipeline::new(
            components.synthesizer,
            DispatchPolicy::from_config(&config.speech),
        );
        let (live_turn, _) = watch::channel(lock(&session).turn);

        Self {
            session,
            recorder,
            transcriber: components.transcriber,
            chat: components.chat,
            gate: components.gate,
            history: components.history,
            segmenter: SentenceSegmenter::new(config.speech.max_unit_chars),
            synthesis,
            sequencer,
            events_tx,
            events_rx,
            live_turn,
            reply: None,
        }
    }

    /// Live microphone level for the status view.
    pub fn volume(&self) -> Arc<VolumeLevel> {
        self.recorder.volume()
    }

    // -----------------------------------------------------------------------
    // Main async loop
    // -----------------------------------------------------------------------

    /// Run until [`ControlEvent::Shutdown`] arrives or `control_rx` closes.
    pub async fn run(mut self, mut control_rx: mpsc::Receiver<ControlEvent>) {
        loop {
            tokio::select! {
                control = control_rx.recv() => match control {
                    Some(ControlEvent::Pressed) => self.on_control().await,
                    Some(ControlEvent::Shutdown) | None => break,
                },
                Some(event) = self.events_rx.recv() => self.on_event(event).await,
            }
        }

        self.recorder.cancel().await;
        self.sequencer.stop().await;
        log::info!("session: orchestrator shutting down");
    }

    async fn on_control(&mut self) {
        let (state, turn, blocked) = {
            let s = lock(&self.session);
            (s.state, s.turn, s.playback_blocked)
        };
        log::debug!("session: control pressed in {state:?}");

        match state {
            ConversationState::Idle | ConversationState::Error => self.begin_listening(true).await,
            ConversationState::Listening => self.finish_listening(turn).await,
            ConversationState::Speaking if blocked => self.resume_playback().await,
            ConversationState::Processing | ConversationState::Speaking => {
                log::info!("session: barge-in on turn {turn}");
                self.begin_listening(false).await;
            }
        }
    }

    async fn on_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::AutoStopped { turn, reason } => {
                let listening = {
                    let s = lock(&self.session);
                    s.is_current(turn) && s.state == ConversationState::Listening
                };
                if listening {
                    log::info!("session: recording ended ({reason:?})");
                    self.finish_listening(turn).await;
                }
            }
            SessionEvent::Transcribed { turn, result } => {
                if self.is_stale(turn, "transcription") {
                    return;
                }
                match result {
                    Ok(text) => self.on_transcript(turn, text),
                    Err(e) => self.fail(turn, e.into()),
                }
            }
            SessionEvent::Replied { turn, result } => {
                if self.is_stale(turn, "chat reply") {
                    return;
                }
                match result {
                    Ok(reply) => self.on_reply(turn, reply.response),
                    Err(e) => self.fail(turn, e.into()),
                }
            }
            SessionEvent::Synthesized(outcome) => {
                if self.is_stale(outcome.turn, "synthesis") {
                    return;
                }
                self.on_synthesized(outcome);
            }
            SessionEvent::SynthesisFinished { turn } => {
                if self.is_stale(turn, "synthesis end") {
                    return;
                }
                self.on_synthesis_finished(turn);
            }
            SessionEvent::Playback(event) => self.on_playback(event),
        }
    }

    // -----------------------------------------------------------------------
    // Turn steps
    // -----------------------------------------------------------------------

    /// Idle/Error → Listening (with the gate) or barge-in (without).
    async fn begin_listening(&mut self, consult_gate: bool) {
        if consult_gate {
            let status = self.gate.check();
            if !status.allowed {
                log::info!("session: usage limit reached");
                let mut s = lock(&self.session);
                s.state = ConversationState::Idle;
                s.remaining_uses = Some(status.remaining);
                s.notice = Some(Notice::UsageLimitReached {
                    remaining: status.remaining,
                });
                return;
            }
        }

        let turn = {
            let mut s = lock(&self.session);
            let turn = s.mint_turn();
            s.display_text = None;
            s.response_text = None;
            s.error_message = None;
            s.notice = None;
            s.playback_drained = false;
            s.playback_blocked = false;
            turn
        };
        self.live_turn.send_replace(turn);
        self.reply = None;

        self.sequencer.stop().await;
        if let Err(e) = self.sequencer.unlock().await {
            log::warn!("session: output unlock failed ({e}); will retry on the next press");
        }

        match self.recorder.start().await {
            Ok(auto_stop) => {
                if consult_gate {
                    self.gate.increment();
                    lock(&self.session).remaining_uses = Some(self.gate.check().remaining);
                }
                self.set_state(ConversationState::Listening);

                let tx = self.events_tx.clone();
                tokio::spawn(async move {
                    if let Some(reason) = auto_stop.fired().await {
                        let _ = tx.send(SessionEvent::AutoStopped { turn, reason });
                    }
                });
            }
            Err(e) => self.fail(turn, e.into()),
        }
    }

    /// Listening → Processing.
    async fn finish_listening(&mut self, turn: TurnId) {
        let audio = match self.recorder.stop().await {
            Ok(Some(audio)) => audio,
            Ok(None) => return,
            Err(e) => {
                self.fail(turn, e.into());
                return;
            }
        };
        self.set_state(ConversationState::Processing);

        let hint = lock(&self.session).language_hint.clone();
        let transcriber = Arc::clone(&self.transcriber);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = transcriber.transcribe(&audio, hint.as_deref()).await;
            let _ = tx.send(SessionEvent::Transcribed { turn, result });
        });
    }

    fn on_transcript(&mut self, turn: TurnId, text: String) {
        let text = text.trim().to_string();
        if text.is_empty() {
            log::info!("session: empty transcript");
            let mut s = lock(&self.session);
            s.state = ConversationState::Idle;
            s.notice = Some(Notice::NothingHeard);
            return;
        }
        log::info!("session: user said {text:?}");

        let history = {
            let mut s = lock(&self.session);
            if let Some(code) = detect_language(&text) {
                if s.language_hint.as_deref() != Some(code) {
                    log::info!("session: language hint is now {code}");
                }
                s.language_hint = Some(code.to_string());
            }
            let history = s.exchange_log.entries().to_vec();
            s.exchange_log.append(Speaker::User, text.clone());
            s.display_text = Some(text.clone());
            history
        };
        self.persist();

        let chat = Arc::clone(&self.chat);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = chat.reply(&text, &history).await;
            let _ = tx.send(SessionEvent::Replied { turn, result });
        });
    }

    fn on_reply(&mut self, turn: TurnId, text: String) {
        log::info!("session: assistant replied ({} chars)", text.chars().count());
        {
            let mut s = lock(&self.session);
            s.exchange_log.append(Speaker::Assistant, text.clone());
            s.response_text = Some(text.clone());
        }
        self.persist();

        let units = self.segmenter.segment(&text);
        if units.is_empty() {
            log::info!("session: nothing to speak");
            self.set_state(ConversationState::Idle);
            return;
        }
        log::debug!("session: {} unit(s) to voice", units.len());

        self.reply = Some(ReplyProgress::new(turn));
        let mut outcomes = self.synthesis.dispatch(turn, units);
        let mut live = self.live_turn.subscribe();
        let tx = self.events_tx.clone();

        // Forward until the turn is superseded; dropping `outcomes` then
        // keeps the pipeline from starting further requests.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outcome = outcomes.recv() => match outcome {
                        Some(outcome) => {
                            if tx.send(SessionEvent::Synthesized(outcome)).is_err() {
                                return;
                            }
                        }
                        None => {
                            let _ = tx.send(SessionEvent::SynthesisFinished { turn });
                            return;
                        }
                    },
                    changed = live.changed() => {
                        if changed.is_err() || *live.borrow() != turn {
                            log::debug!("session: turn {turn} superseded; abandoning synthesis");
                            return;
                        }
                    }
                }
            }
        });
    }

    fn on_synthesized(&mut self, outcome: SynthesisOutcome) {
        let Some(reply) = self.reply.as_mut().filter(|r| r.turn == outcome.turn) else {
            return;
        };
        match outcome.result {
            Ok(asset) => {
                log::debug!("session: unit {} ready", outcome.sequence_index);
                reply.delivered += 1;
                self.sequencer.enqueue(AudioQueueEntry {
                    turn: outcome.turn,
                    sequence_index: outcome.sequence_index,
                    asset,
                });

                let first = {
                    let mut s = lock(&self.session);
                    let first = s.state == ConversationState::Processing;
                    if first {
                        s.state = ConversationState::Speaking;
                    }
                    first
                };
                if first {
                    log::info!("session: Processing → Speaking");
                    self.sequencer.play();
                }
            }
            Err(e) => {
                log::warn!("session: unit {} could not be voiced: {e}", outcome.sequence_index);
                reply.failed += 1;
                reply.last_error = Some(e.into());
                let failed = reply.failed;
                lock(&self.session).notice = Some(Notice::SynthesisPartial { failed });
            }
        }
    }

    fn on_synthesis_finished(&mut self, turn: TurnId) {
        let Some(reply) = self.reply.as_mut().filter(|r| r.turn == turn) else {
            return;
        };
        reply.synthesis_done = true;

        if reply.delivered == 0 {
            let error = reply
                .last_error
                .take()
                .unwrap_or_else(|| SynthesisError::EmptyAudio.into());
            self.fail(turn, error);
            return;
        }
        self.check_drained(turn);
    }

    fn on_playback(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Started {
                turn,
                sequence_index,
            } => log::debug!("session: turn {turn} playing unit {sequence_index}"),
            PlaybackEvent::Finished { turn, .. } => {
                if let Some(reply) = self.reply.as_mut().filter(|r| r.turn == turn) {
                    reply.settled += 1;
                }
                self.check_drained(turn);
            }
            PlaybackEvent::Interrupted { turn } => log::debug!("session: turn {turn} playback interrupted"),
            // An empty queue can race a clip that is still on its way in;
            // the settled count decides.
            PlaybackEvent::Drained { turn } => log::debug!("session: turn {turn} queue empty"),
            PlaybackEvent::Blocked { turn, error, .. } => {
                if self.is_stale(turn, "playback blocked") {
                    return;
                }
                log::warn!("session: {error}; waiting for the next press");
                let mut s = lock(&self.session);
                s.playback_blocked = true;
                s.notice = Some(Notice::PlaybackBlocked);
            }
            PlaybackEvent::Failed {
                turn,
                sequence_index,
                error,
            } => {
                if self.is_stale(turn, "playback failure") {
                    return;
                }
                let Some(reply) = self.reply.as_mut().filter(|r| r.turn == turn) else {
                    return;
                };
                log::warn!("session: unit {sequence_index} could not be played: {error}");
                reply.settled += 1;
                reply.failed += 1;
                reply.last_error = Some(error.into());
                let failed = reply.failed;
                lock(&self.session).notice = Some(Notice::SynthesisPartial { failed });
                self.check_drained(turn);
            }
        }
    }

    /// Speaking with a blocked queue: the press unlocks output and resumes.
    async fn resume_playback(&mut self) {
        log::info!("session: resuming blocked playback");
        if let Err(e) = self.sequencer.unlock().await {
            log::warn!("session: output unlock failed again: {e}");
        }
        {
            let mut s = lock(&self.session);
            s.playback_blocked = false;
            if s.notice == Some(Notice::PlaybackBlocked) {
                s.notice = None;
            }
        }
        self.sequencer.play();
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn is_stale(&self, turn: TurnId, what: &str) -> bool {
        let stale = !lock(&self.session).is_current(turn);
        if stale {
            log::debug!("session: dropping {what} of stale turn {turn}");
        }
        stale
    }

    /// Drained once synthesis is over and every clip it delivered has been
    /// played or skipped.
    fn check_drained(&self, turn: TurnId) {
        let Some(reply) = self.reply.as_ref().filter(|r| r.turn == turn) else {
            return;
        };
        if reply.synthesis_done && reply.delivered > 0 && reply.settled >= reply.delivered {
            self.mark_drained();
        }
    }

    fn mark_drained(&self) {
        let mut s = lock(&self.session);
        if s.state == ConversationState::Speaking && !s.playback_drained {
            log::info!("session: reply played; waiting for the user");
            s.playback_drained = true;
        }
    }

    fn set_state(&self, state: ConversationState) {
        let mut s = lock(&self.session);
        if s.state != state {
            log::info!("session: {:?} → {state:?}", s.state);
            s.state = state;
        }
    }

    fn fail(&self, turn: TurnId, error: SessionError) {
        let mut s = lock(&self.session);
        if !s.is_current(turn) {
            return;
        }
        log::error!("session: turn {turn} failed: {error}");
        s.state = ConversationState::Error;
        s.error_message = Some(error.to_string());
    }

    fn persist(&self) {
        let Some(store) = &self.history else {
            return;
        };
        let log = lock(&self.session).exchange_log.clone();
        if let Err(e) = store.save(&log) {
            log::warn!("session: could not save history to {}: {e}", store.path().display());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
