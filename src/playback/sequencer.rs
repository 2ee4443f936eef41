//! Ordered playback queue.
//!
//! [`PlaybackSequencer`] is a handle to a worker task that owns the queue
//! and the [`AudioOutput`].  Commands go in over an mpsc channel, progress
//! comes out through the `on_event` callback.
//!
//! ```text
//! enqueue ─▶ queue ──(play requested, not blocked)──▶ output.play()
//!                                                      ├─ done   ─▶ Finished, next / Drained
//!                                                      ├─ stop() ─▶ future dropped, Interrupted
//!                                                      └─ Blocked ─▶ wait, retry once ─▶ Blocked (paused)
//! ```
//!
//! A paused (blocked) queue keeps the rejected entry at its head; the next
//! `play()` resumes from it.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use super::output::{AudioOutput, PlaybackError};
use crate::config::PlaybackConfig;
use crate::pipeline::TurnId;
use crate::tts::AudioAsset;

#[derive(Debug, Clone)]
pub struct AudioQueueEntry {
    pub turn: TurnId,
    pub sequence_index: usize,
    pub asset: AudioAsset,
}

#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    Started { turn: TurnId, sequence_index: usize },
    Finished { turn: TurnId, sequence_index: usize },
    /// Nothing left to play for now.
    Drained { turn: TurnId },
    /// `stop()` cut or discarded audio of this turn.
    Interrupted { turn: TurnId },
    /// Still rejected after the retry; the queue is paused.
    Blocked {
        turn: TurnId,
        sequence_index: usize,
        error: PlaybackError,
    },
    /// This entry was skipped.
    Failed {
        turn: TurnId,
        sequence_index: usize,
        error: PlaybackError,
    },
}

type EventSink = Arc<dyn Fn(PlaybackEvent) + Send + Sync>;

enum Command {
    Enqueue(AudioQueueEntry),
    Play,
    Stop(oneshot::Sender<()>),
    Unlock(oneshot::Sender<Result<(), PlaybackError>>),
}

// ---------------------------------------------------------------------------
// PlaybackSequencer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PlaybackSequencer {
    tx: mpsc::UnboundedSender<Command>,
}

impl PlaybackSequencer {
    /// Spawn the worker on the current runtime.  It exits when every handle
    /// is dropped.
    pub fn spawn(
        output: Arc<dyn AudioOutput>,
        config: &PlaybackConfig,
        on_event: impl Fn(PlaybackEvent) + Send + Sync + 'static,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            output,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            on_event: Arc::new(on_event),
            rx,
            queue: VecDeque::new(),
            playing: false,
            paused: false,
            unlocked: false,
            turn: None,
        };
        tokio::spawn(worker.run());
        Self { tx }
    }

    pub fn enqueue(&self, entry: AudioQueueEntry) {
        self.send(Command::Enqueue(entry));
    }

    /// Start (or resume) playing the queue, including entries enqueued later.
    pub fn play(&self) {
        self.send(Command::Play);
    }

    /// Halt the current clip, discard the queue.  Returns once the output
    /// has been released.
    pub async fn stop(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(Command::Stop(ack_tx));
        let _ = ack_rx.await;
    }

    /// Run the unlock clip unless a previous one (or a successful clip)
    /// already proved output is allowed.
    pub async fn unlock(&self) -> Result<(), PlaybackError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Unlock(reply_tx));
        reply_rx
            .await
            .map_err(|_| PlaybackError::Device("playback worker stopped".into()))?
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            log::warn!("playback: worker is gone; command dropped");
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

enum Busy<T> {
    Done(T),
    Stopped(oneshot::Sender<()>),
    Closed,
}

struct Worker {
    output: Arc<dyn AudioOutput>,
    retry_delay: Duration,
    on_event: EventSink,
    rx: mpsc::UnboundedReceiver<Command>,
    queue: VecDeque<AudioQueueEntry>,
    playing: bool,
    paused: bool,
    unlocked: bool,
    turn: Option<TurnId>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            if self.playing && !self.paused {
                if let Some(entry) = self.queue.pop_front() {
                    if !self.play_entry(entry).await {
                        break;
                    }
                    continue;
                }
            }

            match self.rx.recv().await {
                Some(Command::Enqueue(entry)) => self.accept(entry),
                Some(Command::Play) => self.resume(),
                Some(Command::Stop(ack)) => {
                    self.stop_all(false);
                    let _ = ack.send(());
                }
                Some(Command::Unlock(reply)) => {
                    let result = self.unlock().await;
                    let _ = reply.send(result);
                }
                None => break,
            }
        }
        log::debug!("playback: worker finished");
    }

    fn emit(&self, event: PlaybackEvent) {
        (self.on_event)(event);
    }

    fn accept(&mut self, entry: AudioQueueEntry) {
        self.turn = Some(entry.turn);
        self.queue.push_back(entry);
    }

    fn resume(&mut self) {
        self.playing = true;
        self.paused = false;
    }

    async fn unlock(&mut self) -> Result<(), PlaybackError> {
        if self.unlocked {
            return Ok(());
        }
        self.output.unlock().await?;
        self.unlocked = true;
        log::debug!("playback: output unlocked");
        Ok(())
    }

    fn stop_all(&mut self, cut: bool) {
        let discarded = !self.queue.is_empty();
        self.queue.clear();
        self.playing = false;
        self.paused = false;
        if let Some(turn) = self.turn {
            if cut || discarded {
                self.emit(PlaybackEvent::Interrupted { turn });
            }
        }
    }

    /// Await `fut` while still serving commands.  A stop or a closed channel
    /// drops `fut` on return.
    async fn serve_while<F: Future>(&mut self, fut: F) -> Busy<F::Output> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                out = &mut fut => return Busy::Done(out),
                command = self.rx.recv() => match command {
                    Some(Command::Enqueue(entry)) => self.accept(entry),
                    Some(Command::Play) => self.resume(),
                    // Audio is already going out.
                    Some(Command::Unlock(reply)) => {
                        let _ = reply.send(Ok(()));
                    }
                    Some(Command::Stop(ack)) => return Busy::Stopped(ack),
                    None => return Busy::Closed,
                },
            }
        }
    }

    /// Returns `false` when the worker should exit.
    async fn play_entry(&mut self, entry: AudioQueueEntry) -> bool {
        let AudioQueueEntry {
            turn,
            sequence_index,
            ..
        } = entry;
        self.turn = Some(turn);
        let output = Arc::clone(&self.output);
        self.emit(PlaybackEvent::Started {
            turn,
            sequence_index,
        });

        let mut retried = false;
        loop {
            let result = match self.serve_while(output.play(&entry.asset)).await {
                Busy::Done(result) => result,
                Busy::Stopped(ack) => {
                    self.stop_all(true);
                    let _ = ack.send(());
                    return true;
                }
                Busy::Closed => return false,
            };

            match result {
                Ok(()) => {
                    self.unlocked = true;
                    self.emit(PlaybackEvent::Finished {
                        turn,
                        sequence_index,
                    });
                    self.drained_check(turn);
                    return true;
                }
                Err(PlaybackError::Blocked(reason)) if !retried => {
                    log::warn!("playback: turn {turn} unit {sequence_index} blocked ({reason}); retrying");
                    self.unlocked = false;
                    retried = true;
                    match self.serve_while(tokio::time::sleep(self.retry_delay)).await {
                        Busy::Done(()) => {}
                        Busy::Stopped(ack) => {
                            self.stop_all(true);
                            let _ = ack.send(());
                            return true;
                        }
                        Busy::Closed => return false,
                    }
                }
                Err(error @ PlaybackError::Blocked(_)) => {
                    log::warn!("playback: turn {turn} unit {sequence_index} still blocked; pausing");
                    self.unlocked = false;
                    self.paused = true;
                    self.queue.push_front(entry);
                    self.emit(PlaybackEvent::Blocked {
                        turn,
                        sequence_index,
                        error,
                    });
                    return true;
                }
                Err(error) => {
                    log::warn!("playback: turn {turn} unit {sequence_index} skipped: {error}");
                    self.emit(PlaybackEvent::Failed {
                        turn,
                        sequence_index,
                        error,
                    });
                    self.drained_check(turn);
                    return true;
                }
            }
        }
    }

    fn drained_check(&self, turn: TurnId) {
        if self.queue.is_empty() {
            self.emit(PlaybackEvent::Drained { turn });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
