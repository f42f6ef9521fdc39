//! Single-path argmax decoding.
//!
//! # Algorithm
//!
//! One hypothesis, one decoder call per step: emit the argmax token, stop
//! on the end symbol or when the length budget `floor(n_frames *
//! max_len_ratio) + 1` runs out. In oracle mode the emitted token is
//! recorded as usual but the reference token is fed back instead, which
//! measures per-step prediction quality under a gold history.
//!
//! # Example
//!
//! ```rust,ignore
//! use beamfuse::search::{GreedyConfig, GreedySearch, Utterance};
//! use beamfuse::vocab::SpecialSymbols;
//!
//! let search = GreedySearch::new(GreedyConfig::default(), SpecialSymbols::asr_default(), &decoder)?;
//! let out = search.decode(&Utterance::new(&encoded))?;
//! ```

use std::time::{Duration, Instant};

use crate::error::{DecodeError, DecodeResult};
use crate::score::ScoreSource;
use crate::search::{Direction, Utterance};
use crate::vocab::SpecialSymbols;

/// Greedy decoding options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GreedyConfig {
    /// Generation order of the decoder being driven.
    pub direction: Direction,
    /// Length budget as a fraction of encoder frames.
    pub max_len_ratio: f32,
    /// Strip the end symbol from returned tokens.
    pub exclude_eos: bool,
    /// Feed reference tokens back instead of emitted ones.
    pub oracle: bool,
    /// Wall-clock budget, checked once per step.
    pub deadline: Option<Duration>,
}

impl Default for GreedyConfig {
    fn default() -> Self {
        Self {
            direction: Direction::Forward,
            max_len_ratio: 1.0,
            exclude_eos: false,
            oracle: false,
            deadline: None,
        }
    }
}

impl GreedyConfig {
    /// Set the generation order.
    #[must_use]
    pub const fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Set the length budget ratio.
    #[must_use]
    pub const fn with_max_len_ratio(mut self, ratio: f32) -> Self {
        self.max_len_ratio = ratio;
        self
    }

    /// Strip the end symbol from returned tokens.
    #[must_use]
    pub const fn with_exclude_eos(mut self, exclude: bool) -> Self {
        self.exclude_eos = exclude;
        self
    }

    /// Enable oracle (teacher-forced) feeding.
    #[must_use]
    pub const fn with_oracle(mut self, oracle: bool) -> Self {
        self.oracle = oracle;
        self
    }

    /// Set a wall-clock budget.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Check option ranges.
    ///
    /// # Errors
    /// Returns a config error for a non-positive or non-finite length ratio.
    pub fn validate(&self) -> DecodeResult<()> {
        if !self.max_len_ratio.is_finite() || self.max_len_ratio <= 0.0 {
            return Err(DecodeError::Config(format!(
                "max_len_ratio must be positive and finite, got {}",
                self.max_len_ratio
            )));
        }
        Ok(())
    }
}

/// Decoded output of one greedy pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GreedyOutput {
    /// Emitted tokens in surface order, truncated at the first end symbol.
    pub tokens: Vec<u32>,
    /// Whether decoding stopped by emitting the end symbol.
    pub reached_eos: bool,
}

/// Greedy decoder driver over a single score source.
#[derive(Debug)]
pub struct GreedySearch<'a, D> {
    config: GreedyConfig,
    symbols: SpecialSymbols,
    source: &'a D,
}

impl<'a, D: ScoreSource> GreedySearch<'a, D> {
    /// Build a greedy search over one score source.
    ///
    /// # Errors
    /// Returns a config error if the options or symbols are inconsistent.
    pub fn new(config: GreedyConfig, symbols: SpecialSymbols, source: &'a D) -> DecodeResult<Self> {
        config.validate()?;
        symbols.validate()?;
        Ok(Self { config, symbols, source })
    }

    /// Decode one utterance.
    ///
    /// # Errors
    /// Returns a config error if oracle mode has no reference, and
    /// propagates score-source failures.
    pub fn decode(&self, utt: &Utterance<'_>) -> DecodeResult<GreedyOutput> {
        let _span = crate::trace_enter!("greedy_decode");

        let reference = match (self.config.oracle, utt.reference) {
            (false, _) => None,
            (true, Some(r)) => Some(r),
            (true, None) => {
                return Err(DecodeError::Config(
                    "oracle decoding requires a reference transcript".into(),
                ))
            }
        };

        let eos = self.symbols.eos;
        if utt.encoded.is_empty() {
            return Ok(self.finalize(vec![eos], true));
        }

        let budget = match reference {
            Some(r) => r.len() + 1,
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            None => (utt.encoded.n_frames() as f32 * self.config.max_len_ratio).floor() as usize + 1,
        };

        let started = Instant::now();
        let mut history = vec![eos];
        let mut cache = self.source.initial_cache();
        let mut emitted: Vec<u32> = Vec::new();
        let mut reached_eos = false;

        for t in 0..budget {
            if let Some(deadline) = self.config.deadline {
                if t > 0 && started.elapsed() >= deadline {
                    crate::trace_event!(step = t, "greedy deadline expired");
                    break;
                }
            }

            let mut step = self.source.score_step(&[&history], utt.encoded, &[&cache])?;
            step.check_batch(1)?;
            let row = &step.logits[0];
            let Some(best) = argmax(row) else {
                return Err(DecodeError::Score("decoder returned an empty logits row".into()));
            };
            #[allow(clippy::cast_possible_truncation)]
            let y = best as u32;
            emitted.push(y);

            if y == eos {
                reached_eos = true;
                break;
            }
            if t == budget - 1 {
                break;
            }

            let fed = match reference {
                Some(r) => match r.get(t) {
                    Some(&token) => token,
                    None => break,
                },
                None => y,
            };
            history.push(fed);
            cache = match step.caches.pop() {
                Some(c) => c,
                None => return Err(DecodeError::batch_mismatch("decoder caches", 0, 1)),
            };
        }

        crate::trace_event!(emitted = emitted.len(), reached_eos, "greedy decode done");
        Ok(self.finalize(emitted, reached_eos))
    }

    /// Resolve direction and end-symbol stripping on the raw emissions.
    fn finalize(&self, mut tokens: Vec<u32>, reached_eos: bool) -> GreedyOutput {
        if self.config.direction.is_backward() {
            tokens.reverse();
        }
        if self.config.exclude_eos && reached_eos {
            if self.config.direction.is_backward() {
                tokens.remove(0);
            } else {
                tokens.pop();
            }
        }
        GreedyOutput { tokens, reached_eos }
    }
}

/// Index of the largest value, first one winning ties.
fn argmax(row: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in row.iter().enumerate() {
        let better = match best {
            None => true,
            Some((_, b)) => v > b,
        };
        if better {
            best = Some((i, v));
        }
    }
    best.map(|(i, _)| i)
}
