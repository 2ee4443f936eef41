//! Dedicated OS-thread key listener using `rdev::listen`.
//!
//! `rdev::listen` blocks forever and has no shutdown API, so the thread
//! lives until the process exits; dropping [`HotkeyListener`] only sets a
//! stop flag that makes the callback ignore further events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::ControlEvent;

pub struct HotkeyListener {
    stop: Arc<AtomicBool>,
    _thread: std::thread::JoinHandle<()>,
}

impl HotkeyListener {
    /// Forward one [`ControlEvent::Pressed`] per physical press of `key`.
    /// Auto-repeat key-downs while the key is held are swallowed.
    pub fn start(key: rdev::Key, tx: mpsc::Sender<ControlEvent>) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("hotkey-listener".into())
            .spawn(move || {
                let mut held = false;
                let result = rdev::listen(move |event| {
                    if stop_flag.load(Ordering::Relaxed) {
                        return;
                    }
                    match event.event_type {
                        rdev::EventType::KeyPress(k) if k == key => {
                            if !held {
                                held = true;
                                let _ = tx.blocking_send(ControlEvent::Pressed);
                            }
                        }
                        rdev::EventType::KeyRelease(k) if k == key => held = false,
                        _ => {}
                    }
                });

                if let Err(e) = result {
                    log::error!("hotkey-listener: rdev::listen exited with error: {e:?}");
                }
            })?;

        Ok(Self {
            stop,
            _thread: thread,
        })
    }
}

impl Drop for HotkeyListener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
