//! Conversation state machine and the shared session.
//!
//! [`ConversationState`] is the orchestrator's single state enum.  The
//! status view reads everything else it shows from [`Session`] through
//! [`SharedSession`].
//!
//! ```text
//! Idle ──control (gate allows)──▶ Listening ──stop / silence──▶ Processing
//! Processing ──first audio──▶ Speaking ──control──▶ Listening (barge-in)
//! Processing ──control──▶ Listening (barge-in)
//! any ──unrecoverable error──▶ Error ──control──▶ Listening
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::llm::ExchangeLog;

// ---------------------------------------------------------------------------
// ConversationState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConversationState {
    /// Waiting for the user.
    #[default]
    Idle,

    /// Microphone open, silence clock armed.
    Listening,

    /// Transcription, chat or the first synthesis is in flight.
    Processing,

    /// Reply audio is playing (or has drained and awaits the user).
    Speaking,

    /// The last turn failed.  The next control press starts listening.
    Error,
}

impl ConversationState {
    /// `true` while a turn is in progress.
    ///
    /// ```
    /// use voice_practice::pipeline::ConversationState;
    ///
    /// assert!(!ConversationState::Idle.is_busy());
    /// assert!(ConversationState::Listening.is_busy());
    /// assert!(ConversationState::Processing.is_busy());
    /// assert!(ConversationState::Speaking.is_busy());
    /// assert!(!ConversationState::Error.is_busy());
    /// ```
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            ConversationState::Listening | ConversationState::Processing | ConversationState::Speaking
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConversationState::Idle => "Idle",
            ConversationState::Listening => "Listening",
            ConversationState::Processing => "Thinking",
            ConversationState::Speaking => "Speaking",
            ConversationState::Error => "Error",
        }
    }
}

// ---------------------------------------------------------------------------
// TurnId
// ---------------------------------------------------------------------------

/// Stamp carried by every asynchronous step of a turn.  Only results whose
/// stamp equals the live one may touch the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TurnId(pub u64);

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Notice
// ---------------------------------------------------------------------------

/// Non-fatal messages for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    UsageLimitReached { remaining: u32 },
    NothingHeard,
    SynthesisPartial { failed: usize },
    PlaybackBlocked,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::UsageLimitReached { remaining } => write!(
                f,
                "Free sessions used up ({remaining} left). Enter the owner password to continue."
            ),
            Notice::NothingHeard => write!(f, "Didn't catch that. Press the key and try again."),
            Notice::SynthesisPartial { failed } => {
                write!(f, "{failed} part(s) of the reply could not be voiced")
            }
            Notice::PlaybackBlocked => write!(f, "Audio output is blocked. Press the key to play the reply."),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Everything the status view shows.  Only the orchestrator writes it.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub state: ConversationState,
    pub exchange_log: ExchangeLog,
    /// Live turn; 0 before the first one.
    pub turn: TurnId,
    /// ISO-639-1 code sent with the next transcription.
    pub language_hint: Option<String>,
    /// What the user said in the current turn.
    pub display_text: Option<String>,
    /// The assistant's reply in the current turn.
    pub response_text: Option<String>,
    pub error_message: Option<String>,
    pub notice: Option<Notice>,
    /// The current reply has been heard in full.
    pub playback_drained: bool,
    /// Playback is paused on a rejection; the next press resumes it.
    pub playback_blocked: bool,
    pub remaining_uses: Option<u32>,
}

impl Session {
    pub fn new(exchange_log: ExchangeLog) -> Self {
        Self {
            exchange_log,
            ..Self::default()
        }
    }

    /// Start a new turn and make it the live one.
    pub fn mint_turn(&mut self) -> TurnId {
        self.turn = TurnId(self.turn.0 + 1);
        self.turn
    }

    pub fn is_current(&self, turn: TurnId) -> bool {
        self.turn == turn
    }

    /// One-line status for the terminal view.
    pub fn status_text(&self) -> String {
        let detail = match self.state {
            ConversationState::Idle => match &self.notice {
                Some(notice) => notice.to_string(),
                None => "press the key to talk".to_string(),
            },
            ConversationState::Listening => "listening... (pause or press to finish)".to_string(),
            ConversationState::Processing => {
                let text = match &self.display_text {
                    Some(text) => format!("you: {text}"),
                    None => "transcribing...".to_string(),
                };
                self.with_notice(text)
            }
            ConversationState::Speaking => {
                let reply = self.response_text.clone().unwrap_or_default();
                if self.playback_blocked {
                    format!("{reply} [{}]", Notice::PlaybackBlocked)
                } else if self.playback_drained {
                    format!("{} [done, press to reply]", self.with_notice(reply))
                } else {
                    self.with_notice(reply)
                }
            }
            ConversationState::Error => self
                .error_message
                .clone()
                .unwrap_or_else(|| "something went wrong".to_string()),
        };
        format!("[{}] {detail}", self.state.label())
    }

    fn with_notice(&self, text: String) -> String {
        match &self.notice {
            Some(notice) if *notice != Notice::PlaybackBlocked => format!("{text} [{notice}]"),
            _ => text,
        }
    }
}

// ---------------------------------------------------------------------------
// SharedSession
// ---------------------------------------------------------------------------

/// Cheap to clone.  Never hold the lock across an `.await`.
pub type SharedSession = Arc<Mutex<Session>>;

pub fn new_shared_session(exchange_log: ExchangeLog) -> SharedSession {
    Arc::new(Mutex::new(Session::new(exchange_log)))
}

/// Lock the session, recovering from a poisoned mutex.
pub fn lock(session: &SharedSession) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Speaker;

    #[test]
    fn idle_and_error_are_not_busy() {
        assert!(!ConversationState::Idle.is_busy());
        assert!(!ConversationState::Error.is_busy());
    }

    #[test]
    fn turn_states_are_busy() {
        assert!(ConversationState::Listening.is_busy());
        assert!(ConversationState::Processing.is_busy());
        assert!(ConversationState::Speaking.is_busy());
    }

    #[test]
    fn labels() {
        assert_eq!(ConversationState::Idle.label(), "Idle");
        assert_eq!(ConversationState::Listening.label(), "Listening");
        assert_eq!(ConversationState::Processing.label(), "Thinking");
        assert_eq!(ConversationState::Speaking.label(), "Speaking");
        assert_eq!(ConversationState::Error.label(), "Error");
    }

    #[test]
    fn default_state_is_idle() {
        assert_eq!(ConversationState::default(), ConversationState::Idle);
        assert_eq!(Session::default().turn, TurnId(0));
    }

    #[test]
    fn minted_turns_increase_and_supersede() {
        let mut session = Session::default();
        let first = session.mint_turn();
        let second = session.mint_turn();
        assert!(second > first);
        assert!(!session.is_current(first));
        assert!(session.is_current(second));
    }

    #[test]
    fn status_text_reflects_state() {
        let mut session = Session::new(ExchangeLog::new());
        assert_eq!(session.status_text(), "[Idle] press the key to talk");

        session.notice = Some(Notice::NothingHeard);
        assert!(session.status_text().contains("Didn't catch that"));

        session.notice = None;
        session.state = ConversationState::Speaking;
        session.response_text = Some("Hi there!".into());
        session.playback_drained = true;
        assert_eq!(session.status_text(), "[Speaking] Hi there! [done, press to reply]");

        session.state = ConversationState::Error;
        session.error_message = Some("Microphone access denied".into());
        assert_eq!(session.status_text(), "[Error] Microphone access denied");
    }

    #[test]
    fn partial_synthesis_warning_is_shown_while_speaking() {
        let mut session = Session::new(ExchangeLog::new());
        session.state = ConversationState::Speaking;
        session.response_text = Some("One. Two. Three.".into());
        session.notice = Some(Notice::SynthesisPartial { failed: 1 });
        assert_eq!(
            session.status_text(),
            "[Speaking] One. Two. Three. [1 part(s) of the reply could not be voiced]"
        );

        session.playback_drained = true;
        assert_eq!(
            session.status_text(),
            "[Speaking] One. Two. Three. [1 part(s) of the reply could not be voiced] [done, press to reply]"
        );
    }

    #[test]
    fn partial_synthesis_warning_is_shown_while_thinking() {
        let mut session = Session::new(ExchangeLog::new());
        session.state = ConversationState::Processing;
        session.display_text = Some("Hello".into());
        session.notice = Some(Notice::SynthesisPartial { failed: 2 });
        assert_eq!(
            session.status_text(),
            "[Thinking] you: Hello [2 part(s) of the reply could not be voiced]"
        );
    }

    #[test]
    fn shared_session_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SharedSession>();
    }

    #[test]
    fn shared_session_can_be_cloned_and_mutated() {
        let mut log = ExchangeLog::new();
        log.append(Speaker::User, "hello");
        let session = new_shared_session(log);
        let other = Arc::clone(&session);

        lock(&session).state = ConversationState::Listening;
        assert_eq!(lock(&other).state, ConversationState::Listening);
        assert_eq!(lock(&other).exchange_log.len(), 1);
    }
}
