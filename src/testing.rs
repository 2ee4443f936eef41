//! Helpers shared by the test doubles.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Replies handed out in order; the last one repeats forever.
pub struct Script<T: Clone> {
    replies: Mutex<VecDeque<(Duration, T)>>,
    calls: Mutex<usize>,
}

impl<T: Clone> Script<T> {
    pub fn new(replies: Vec<(Duration, T)>) -> Self {
        assert!(!replies.is_empty(), "script needs at least one reply");
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(0),
        }
    }

    /// Take the next reply, waiting out its delay.
    pub async fn next(&self) -> T {
        let (delay, reply) = {
            *self.calls.lock().unwrap() += 1;
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.pop_front().unwrap()
            } else {
                replies.front().cloned().unwrap()
            }
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        reply
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}
