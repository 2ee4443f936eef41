//! Global control key, backed by `rdev`.
//!
//! One physical press of the configured key is one
//! [`ControlEvent::Pressed`], whatever state the conversation is in; the
//! orchestrator decides what a press means.  `Ctrl-C` is wired to
//! [`ControlEvent::Shutdown`] in `main`.
//!
//! ```no_run
//! use tokio::sync::mpsc;
//! use voice_practice::hotkey::{parse_key, HotkeyListener};
//!
//! let (tx, _rx) = mpsc::channel(16);
//! let key = parse_key("F9").expect("unknown key");
//! let _listener = HotkeyListener::start(key, tx).expect("listener thread");
//! ```

pub mod listener;

pub use listener::HotkeyListener;

/// Input to the conversation orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// The control key went down.
    Pressed,
    /// Stop everything and leave.
    Shutdown,
}

/// Parse a key name from the config into an [`rdev::Key`].
///
/// Accepts `F1`–`F12`, a few named keys and single ASCII letters (either
/// case).
///
/// ```
/// use voice_practice::hotkey::parse_key;
///
/// assert_eq!(parse_key("F9"), Some(rdev::Key::F9));
/// assert_eq!(parse_key("space"), Some(rdev::Key::Space));
/// assert_eq!(parse_key("xyz"), None);
/// ```
pub fn parse_key(name: &str) -> Option<rdev::Key> {
    use rdev::Key;

    const FUNCTION_KEYS: [Key; 12] = [
        Key::F1, Key::F2, Key::F3, Key::F4, Key::F5, Key::F6,
        Key::F7, Key::F8, Key::F9, Key::F10, Key::F11, Key::F12,
    ];
    const LETTERS: [Key; 26] = [
        Key::KeyA, Key::KeyB, Key::KeyC, Key::KeyD, Key::KeyE, Key::KeyF, Key::KeyG,
        Key::KeyH, Key::KeyI, Key::KeyJ, Key::KeyK, Key::KeyL, Key::KeyM, Key::KeyN,
        Key::KeyO, Key::KeyP, Key::KeyQ, Key::KeyR, Key::KeyS, Key::KeyT, Key::KeyU,
        Key::KeyV, Key::KeyW, Key::KeyX, Key::KeyY, Key::KeyZ,
    ];

    let name = name.trim();
    if let Some(n) = name
        .strip_prefix(['F', 'f'])
        .and_then(|digits| digits.parse::<usize>().ok())
    {
        return (1..=12).contains(&n).then(|| FUNCTION_KEYS[n - 1]);
    }

    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_alphabetic() {
            let index = (c.to_ascii_lowercase() as u8 - b'a') as usize;
            return Some(LETTERS[index]);
        }
        return None;
    }

    match name.to_ascii_lowercase().as_str() {
        "escape" | "esc" => Some(Key::Escape),
        "space" => Some(Key::Space),
        "return" | "enter" => Some(Key::Return),
        "tab" => Some(Key::Tab),
        "capslock" => Some(Key::CapsLock),
        "scrolllock" => Some(Key::ScrollLock),
        "pause" => Some(Key::Pause),
        "printscreen" => Some(Key::PrintScreen),
        "altgr" => Some(Key::AltGr),
        "rightcontrol" | "rctrl" => Some(Key::ControlRight),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_function_keys() {
        assert_eq!(parse_key("F1"), Some(rdev::Key::F1));
        assert_eq!(parse_key("F9"), Some(rdev::Key::F9));
        assert_eq!(parse_key("f12"), Some(rdev::Key::F12));
        assert_eq!(parse_key("F13"), None);
        assert_eq!(parse_key("F0"), None);
    }

    #[test]
    fn parse_named_keys() {
        assert_eq!(parse_key("Escape"), Some(rdev::Key::Escape));
        assert_eq!(parse_key("Esc"), Some(rdev::Key::Escape));
        assert_eq!(parse_key("Space"), Some(rdev::Key::Space));
        assert_eq!(parse_key("Enter"), Some(rdev::Key::Return));
        assert_eq!(parse_key("RCtrl"), Some(rdev::Key::ControlRight));
    }

    #[test]
    fn parse_letter_keys_case_insensitive() {
        assert_eq!(parse_key("A"), Some(rdev::Key::KeyA));
        assert_eq!(parse_key("z"), Some(rdev::Key::KeyZ));
        assert_eq!(parse_key("f"), Some(rdev::Key::KeyF));
    }

    #[test]
    fn parse_unknown_key_returns_none() {
        assert_eq!(parse_key("xyz"), None);
        assert_eq!(parse_key(""), None);
        assert_eq!(parse_key("1"), None);
        assert_eq!(parse_key("Ctrl+V"), None);
    }
}
