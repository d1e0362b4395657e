use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Pacing bounds for the incremental reveal.
///
/// The whole reveal aims for `min_total_ms..=max_total_ms` regardless of
/// length: long replies get bigger chunks, short ones smaller chunks with
/// longer pauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub per_char_ms: u64,
    pub min_total_ms: u64,
    pub max_total_ms: u64,
    pub max_delay_ms: u64,
    pub base_chunk_chars: usize,
    pub max_chunks: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            per_char_ms: 20,
            min_total_ms: 1_000,
            max_total_ms: 3_000,
            max_delay_ms: 80,
            base_chunk_chars: 3,
            max_chunks: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub chunk_chars: usize,
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    /// Stopped early; `revealed` chars were already delivered.
    Cancelled { revealed: usize },
}

#[derive(Debug, Clone, Default)]
pub struct StreamingEngine {
    config: StreamingConfig,
}

impl StreamingEngine {
    pub fn new(config: StreamingConfig) -> Self {
        Self { config }
    }

    pub fn pacing(&self, total_chars: usize) -> Pacing {
        let cfg = &self.config;
        let chunks = total_chars
            .div_ceil(cfg.base_chunk_chars.max(1))
            .clamp(1, cfg.max_chunks.max(1));
        let chunk_chars = total_chars.div_ceil(chunks).max(1);

        let budget_ms = (total_chars as u64)
            .saturating_mul(cfg.per_char_ms)
            .clamp(cfg.min_total_ms, cfg.max_total_ms.max(cfg.min_total_ms));
        let delay_ms = (budget_ms / chunks as u64).min(cfg.max_delay_ms);

        Pacing {
            chunk_chars,
            delay: Duration::from_millis(delay_ms),
        }
    }

    /// Reveal `text` progressively, calling `on_chunk` with the accumulated
    /// prefix after every chunk.
    ///
    /// Cancellation is checked before each chunk and while sleeping. A
    /// `false` from `on_chunk` means the target is gone and stops the reveal
    /// the same way.
    pub async fn reveal<F>(
        &self,
        text: &str,
        cancel: &CancellationToken,
        mut on_chunk: F,
    ) -> StreamOutcome
    where
        F: FnMut(&str) -> bool,
    {
        let total = text.chars().count();
        if total == 0 {
            return StreamOutcome::Completed;
        }

        let pacing = self.pacing(total);
        tracing::trace!(
            "Revealing {} chars in chunks of {} every {:?}",
            total,
            pacing.chunk_chars,
            pacing.delay
        );

        let mut ends = text.char_indices().map(|(i, c)| i + c.len_utf8());
        let mut revealed = 0;
        let mut end = 0;

        while revealed < total {
            if cancel.is_cancelled() {
                return StreamOutcome::Cancelled { revealed };
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return StreamOutcome::Cancelled { revealed };
                }
                _ = tokio::time::sleep(pacing.delay) => {}
            }

            for _ in 0..pacing.chunk_chars {
                match ends.next() {
                    Some(e) => {
                        end = e;
                        revealed += 1;
                    }
                    None => break,
                }
            }

            if !on_chunk(&text[..end]) {
                return StreamOutcome::Cancelled { revealed };
            }
        }

        StreamOutcome::Completed
    }
}
