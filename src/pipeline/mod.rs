//! Conversation orchestration.
//!
//! ```text
//! ControlEvent (mpsc)
//!        │
//!        ▼
//! ConversationOrchestrator::run()  ← async tokio task
//!        │
//!        ├─ Idle / Error      → gate check → mint turn → recorder.start  → Listening
//!        ├─ Listening         → recorder.stop → transcribe               → Processing
//!        │                      └─ chat → segment → synthesize (ordered)
//!        │                           └─ first audio → sequencer.play     → Speaking
//!        └─ Processing / Speaking → stop playback, mint turn, listen      (barge-in)
//!
//! SharedSession (Arc<Mutex<Session>>) ←─── read by the status printer
//! ```
//!
//! Every spawned step carries the [`TurnId`] it was started for; results for
//! a superseded turn are dropped when they come back.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use tokio::sync::mpsc;
//! use voice_practice::config::AppConfig;
//! use voice_practice::llm::ExchangeLog;
//! use voice_practice::pipeline::{new_shared_session, Components, ConversationOrchestrator};
//!
//! # fn components() -> Components { unimplemented!() }
//! #[tokio::main]
//! async fn main() {
//!     let config = AppConfig::default();
//!     let session = new_shared_session(ExchangeLog::new());
//!     let orchestrator = ConversationOrchestrator::new(session.clone(), components(), &config);
//!
//!     let (control_tx, control_rx) = mpsc::channel(16);
//!     // control_tx is passed to HotkeyListener::start(...)
//!     # drop(control_tx);
//!     orchestrator.run(control_rx).await;
//! }
//! ```

pub mod runner;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use runner::{Components, ConversationOrchestrator, SessionError};
pub use state::{lock, new_shared_session, ConversationState, Notice, Session, SharedSession, TurnId};
