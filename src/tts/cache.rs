//! Memoising wrapper for any [`Synthesizer`].
//!
//! Replies repeat ("Great!", "Let's try again.") often enough that keeping
//! recent clips avoids a round trip.  Keys are the exact text; only
//! successes are stored; the least recently used clip is evicted first.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use async_trait::async_trait;
use lru::LruCache;

use super::synth::{AudioAsset, SynthesisError, Synthesizer};

pub struct CachedSynthesizer<S: Synthesizer> {
    inner: S,
    cache: Option<Mutex<LruCache<String, AudioAsset>>>,
}

impl<S: Synthesizer> CachedSynthesizer<S> {
    /// `capacity == 0` turns caching off.
    pub fn new(inner: S, capacity: usize) -> Self {
        Self {
            inner,
            cache: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.cache
            .as_ref()
            .and_then(|c| c.lock().ok().map(|c| c.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, text: &str) -> Option<AudioAsset> {
        let cache = self.cache.as_ref()?;
        let mut cache = cache.lock().ok()?;
        cache.get(text).cloned()
    }

    fn remember(&self, text: &str, asset: &AudioAsset) {
        if let Some(Ok(mut cache)) = self.cache.as_ref().map(|c| c.lock()) {
            cache.put(text.to_string(), asset.clone());
        }
    }
}

#[async_trait]
impl<S: Synthesizer> Synthesizer for CachedSynthesizer<S> {
    async fn synthesize(&self, text: &str) -> Result<AudioAsset, SynthesisError> {
        if let Some(hit) = self.lookup(text) {
            log::debug!("tts: cache hit ({} chars)", text.chars().count());
            return Ok(hit);
        }
        let asset = self.inner.synthesize(text).await?;
        self.remember(text, &asset);
        Ok(asset)
    }
}
