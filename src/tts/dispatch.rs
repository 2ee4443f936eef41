//! Ordered synthesis of a reply.
//!
//! ```text
//! units ──▶ FuturesOrdered (≤ concurrency in flight) ──▶ mpsc ──▶ consumer
//!            completes in any order, yields in sequence order
//! ```
//!
//! Every outcome carries the turn that asked for it.  When the consumer
//! drops its receiver (the turn was superseded) no further requests are
//! started; the ones already in flight are still awaited and their results
//! discarded.

use std::sync::Arc;

use futures::stream::{FuturesOrdered, StreamExt};
use tokio::sync::mpsc;

use super::segmenter::SpeakableUnit;
use super::synth::{AudioAsset, SynthesisError, Synthesizer};
use crate::config::{DispatchMode, SpeechConfig};
use crate::pipeline::TurnId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPolicy {
    /// One request for the whole reply.
    FullReply,
    /// One request per unit, at most `concurrency` at a time.
    Chunked { concurrency: usize },
}

impl DispatchPolicy {
    pub fn from_config(config: &SpeechConfig) -> Self {
        match config.dispatch {
            DispatchMode::FullReply => Self::FullReply,
            DispatchMode::Chunked => Self::Chunked {
                concurrency: config.concurrency.max(1),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct SynthesisOutcome {
    pub turn: TurnId,
    pub sequence_index: usize,
    pub text: String,
    pub result: Result<AudioAsset, SynthesisError>,
}

pub struct SynthesisPipeline {
    synthesizer: Arc<dyn Synthesizer>,
    policy: DispatchPolicy,
}

impl SynthesisPipeline {
    pub fn new(synthesizer: Arc<dyn Synthesizer>, policy: DispatchPolicy) -> Self {
        Self {
            synthesizer,
            policy,
        }
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    /// Start synthesizing `units` for `turn`.  Outcomes arrive in
    /// non-decreasing `sequence_index` order; the channel closes after the
    /// last one.
    pub fn dispatch(&self, turn: TurnId, units: Vec<SpeakableUnit>) -> mpsc::Receiver<SynthesisOutcome> {
        let (units, concurrency) = match self.policy {
            DispatchPolicy::FullReply => (merge(units), 1),
            DispatchPolicy::Chunked { concurrency } => (units, concurrency.max(1)),
        };
        log::debug!(
            "tts: turn {turn}: {} request(s), {concurrency} at a time",
            units.len()
        );

        let (tx, rx) = mpsc::channel(units.len().max(1));
        tokio::spawn(drive(
            Arc::clone(&self.synthesizer),
            turn,
            units,
            concurrency,
            tx,
        ));
        rx
    }
}

fn merge(units: Vec<SpeakableUnit>) -> Vec<SpeakableUnit> {
    if units.is_empty() {
        return units;
    }
    let text = units
        .iter()
        .map(|u| u.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    vec![SpeakableUnit {
        sequence_index: 0,
        text,
    }]
}

async fn synthesize_unit(
    synthesizer: Arc<dyn Synthesizer>,
    unit: SpeakableUnit,
) -> (SpeakableUnit, Result<AudioAsset, SynthesisError>) {
    let result = synthesizer.synthesize(&unit.text).await;
    (unit, result)
}

async fn drive(
    synthesizer: Arc<dyn Synthesizer>,
    turn: TurnId,
    units: Vec<SpeakableUnit>,
    concurrency: usize,
    tx: mpsc::Sender<SynthesisOutcome>,
) {
    let mut pending = units.into_iter();
    let mut in_flight = FuturesOrdered::new();
    let mut superseded = false;

    loop {
        while !superseded && in_flight.len() < concurrency {
            match pending.next() {
                Some(unit) => in_flight.push_back(synthesize_unit(Arc::clone(&synthesizer), unit)),
                None => break,
            }
        }

        let Some((unit, result)) = in_flight.next().await else {
            break;
        };
        if superseded {
            continue;
        }

        if let Err(e) = &result {
            log::warn!("tts: turn {turn} unit {} failed: {e}", unit.sequence_index);
        }
        let outcome = SynthesisOutcome {
            turn,
            sequence_index: unit.sequence_index,
            text: unit.text,
            result,
        };
        if tx.send(outcome).await.is_err() {
            log::debug!("tts: turn {turn} superseded; no further requests");
            superseded = true;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::tts::synth::MockSynthesizer;

    fn units(texts: &[&str]) -> Vec<SpeakableUnit> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| SpeakableUnit {
                sequence_index: i,
                text: t.to_string(),
            })
            .collect()
    }

    async fn collect(mut rx: mpsc::Receiver<SynthesisOutcome>) -> Vec<SynthesisOutcome> {
        let mut out = Vec::new();
        while let Some(outcome) = rx.recv().await {
            out.push(outcome);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_order_completion_is_delivered_in_order() {
        let synth = Arc::new(
            MockSynthesizer::new()
                .delay("first", Duration::from_millis(300))
                .delay("second", Duration::from_millis(10))
                .delay("third", Duration::from_millis(100)),
        );
        let pipeline = SynthesisPipeline::new(synth, DispatchPolicy::Chunked { concurrency: 3 });

        let outcomes = collect(pipeline.dispatch(TurnId(7), units(&["first", "second", "third"]))).await;

        let order: Vec<usize> = outcomes.iter().map(|o| o.sequence_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert!(outcomes.iter().all(|o| o.turn == TurnId(7)));
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded() {
        let texts = ["a", "b", "c", "d", "e", "f"];
        let mut mock = MockSynthesizer::new();
        for t in texts {
            mock = mock.delay(t, Duration::from_millis(100));
        }
        let synth = Arc::new(mock);
        let pipeline = SynthesisPipeline::new(
            Arc::clone(&synth) as Arc<dyn Synthesizer>,
            DispatchPolicy::Chunked { concurrency: 2 },
        );

        let outcomes = collect(pipeline.dispatch(TurnId(1), units(&texts))).await;
        assert_eq!(outcomes.len(), 6);
        assert_eq!(synth.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn middle_failure_does_not_stop_the_rest() {
        let synth = Arc::new(MockSynthesizer::new().fail_on("two"));
        let pipeline = SynthesisPipeline::new(
            Arc::clone(&synth) as Arc<dyn Synthesizer>,
            DispatchPolicy::Chunked { concurrency: 3 },
        );

        let outcomes = collect(pipeline.dispatch(TurnId(1), units(&["one", "two", "three"]))).await;
        assert!(outcomes[0].result.is_ok());
        assert!(outcomes[1].result.is_err());
        assert!(outcomes[2].result.is_ok());
        assert_eq!(synth.requests().len(), 3);
    }

    #[tokio::test]
    async fn full_reply_is_one_request() {
        let synth = Arc::new(MockSynthesizer::new());
        let pipeline =
            SynthesisPipeline::new(Arc::clone(&synth) as Arc<dyn Synthesizer>, DispatchPolicy::FullReply);

        let outcomes = collect(pipeline.dispatch(TurnId(1), units(&["Hi there!", "How can I help?"]))).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].sequence_index, 0);
        assert_eq!(synth.requests(), vec!["Hi there! How can I help?"]);
    }

    #[tokio::test]
    async fn no_units_closes_immediately() {
        let pipeline = SynthesisPipeline::new(
            Arc::new(MockSynthesizer::new()),
            DispatchPolicy::Chunked { concurrency: 3 },
        );
        assert!(collect(pipeline.dispatch(TurnId(1), Vec::new())).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_receiver_stops_new_requests() {
        let texts = ["a", "b", "c", "d", "e", "f", "g", "h"];
        let mut mock = MockSynthesizer::new();
        for t in texts {
            mock = mock.delay(t, Duration::from_millis(100));
        }
        let synth = Arc::new(mock);
        let pipeline = SynthesisPipeline::new(
            Arc::clone(&synth) as Arc<dyn Synthesizer>,
            DispatchPolicy::Chunked { concurrency: 2 },
        );

        let mut rx = pipeline.dispatch(TurnId(3), units(&texts));
        assert!(rx.recv().await.is_some());
        drop(rx);
        tokio::time::sleep(Duration::from_secs(2)).await;

        let sent = synth.requests().len();
        assert!(sent >= 2 && sent < texts.len(), "sent {sent}");
    }

    #[test]
    fn policy_from_config() {
        let mut config = SpeechConfig::default();
        assert_eq!(
            DispatchPolicy::from_config(&config),
            DispatchPolicy::Chunked { concurrency: 3 }
        );
        config.dispatch = DispatchMode::FullReply;
        assert_eq!(DispatchPolicy::from_config(&config), DispatchPolicy::FullReply);
        config.dispatch = DispatchMode::Chunked;
        config.concurrency = 0;
        assert_eq!(
            DispatchPolicy::from_config(&config),
            DispatchPolicy::Chunked { concurrency: 1 }
        );
    }
}
