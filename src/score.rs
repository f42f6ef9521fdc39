//! Scoring traits and encoder-output buffers.
//!
//! The search never sees model internals. The attention decoder and the
//! external language model are both "score sources": given what a hypothesis
//! has emitted so far plus an opaque per-hypothesis state, they return a
//! distribution over the next token and a fresh state. Both are queried once
//! per beam step with the whole live beam as a batch, and both must keep the
//! output row order identical to the input order.
//!
//! States are value objects. The engine clones them whenever a hypothesis is
//! expanded into several children, so implementations must not hide shared
//! mutable storage behind them.

use crate::error::{DecodeError, DecodeResult};

// ===== Encoder output =====

/// Encoded input for one utterance: `n_frames` fixed-width feature vectors
/// in a flat row-major buffer. Read-only for the duration of a decode.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderOutput {
    feats: Vec<f32>,
    n_frames: usize,
    dim: usize,
}

impl EncoderOutput {
    /// Wrap a flat `n_frames x dim` buffer.
    pub fn new(feats: Vec<f32>, n_frames: usize, dim: usize) -> DecodeResult<Self> {
        if feats.len() != n_frames * dim {
            return Err(DecodeError::Encoder(format!(
                "feature buffer of {} does not match {n_frames} frames x {dim} dims",
                feats.len()
            )));
        }
        Ok(Self { feats, n_frames, dim })
    }

    /// An output with no frames (degenerate utterance).
    #[must_use]
    pub const fn empty(dim: usize) -> Self {
        Self { feats: Vec::new(), n_frames: 0, dim }
    }

    /// Number of valid time frames.
    #[must_use]
    pub const fn n_frames(&self) -> usize {
        self.n_frames
    }

    /// Feature width per frame.
    #[must_use]
    pub const fn dim(&self) -> usize {
        self.dim
    }

    /// Whether the utterance has no frames.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.n_frames == 0
    }

    /// One frame as a slice.
    ///
    /// # Panics
    /// Panics if `t >= n_frames()`; callers index within bounds.
    #[must_use]
    pub fn frame(&self, t: usize) -> &[f32] {
        &self.feats[t * self.dim..(t + 1) * self.dim]
    }

    /// The whole flat buffer.
    #[must_use]
    pub fn feats(&self) -> &[f32] {
        &self.feats
    }
}

// ===== Batched step outputs =====

/// One batched decoder step: a row of raw next-token logits per hypothesis
/// plus the updated cache for each, in input order.
#[derive(Debug, Clone)]
pub struct StepScores<C> {
    /// Raw logits rows, one per hypothesis, each `vocab_size` wide.
    pub logits: Vec<Vec<f32>>,
    /// Updated caches, one per hypothesis.
    pub caches: Vec<C>,
}

impl<C> StepScores<C> {
    /// Check the batch contract against the number of queried hypotheses.
    pub(crate) fn check_batch(&self, want: usize) -> DecodeResult<()> {
        if self.logits.len() != want {
            return Err(DecodeError::batch_mismatch("decoder logits", self.logits.len(), want));
        }
        if self.caches.len() != want {
            return Err(DecodeError::batch_mismatch("decoder caches", self.caches.len(), want));
        }
        Ok(())
    }
}

/// One batched language-model step: log-probability rows plus updated states.
#[derive(Debug, Clone)]
pub struct LmStep<S> {
    /// Next-token log-probability rows, one per hypothesis.
    pub log_probs: Vec<Vec<f32>>,
    /// Updated recurrent states, one per hypothesis.
    pub states: Vec<S>,
}

impl<S> LmStep<S> {
    pub(crate) fn check_batch(&self, want: usize) -> DecodeResult<()> {
        if self.log_probs.len() != want {
            return Err(DecodeError::batch_mismatch("lm log-probs", self.log_probs.len(), want));
        }
        if self.states.len() != want {
            return Err(DecodeError::batch_mismatch("lm states", self.states.len(), want));
        }
        Ok(())
    }
}

// ===== Traits =====

/// The attention decoder as seen by the search: one batched call per step.
///
/// `histories` are the full token sequences emitted so far (start symbol
/// included) and grow by one per step; `caches` are the per-hypothesis states
/// returned by the previous call. Implementations return raw logits; the
/// engine applies softmax smoothing and the log-softmax itself.
pub trait ScoreSource {
    /// Opaque per-hypothesis decoder state, cloned on hypothesis expansion.
    type Cache: Clone;

    /// State for the root hypothesis before any token is scored.
    fn initial_cache(&self) -> Self::Cache;

    /// Score the next token for every live hypothesis in one call.
    fn score_step(
        &self,
        histories: &[&[u32]],
        encoded: &EncoderOutput,
        caches: &[&Self::Cache],
    ) -> DecodeResult<StepScores<Self::Cache>>;
}

/// External language model with a recurrent prediction contract: the state
/// summarizes the prefix, so each step sees only the newest token.
pub trait LanguageModel {
    /// Opaque recurrent state, cloned on hypothesis expansion.
    type State: Clone;

    /// State before any token has been consumed.
    fn initial_state(&self) -> Self::State;

    /// Advance every hypothesis by its latest token in one batched call.
    fn predict(
        &self,
        last_tokens: &[u32],
        states: &[&Self::State],
    ) -> DecodeResult<LmStep<Self::State>>;

    /// Total log-probability of a token sequence under this model,
    /// summing `log P(tokens[i+1] | tokens[..=i])` from a fresh state.
    ///
    /// Used by second-pass rescoring; sequences shorter than two tokens
    /// score zero.
    fn score_sequence(&self, tokens: &[u32]) -> DecodeResult<f32> {
        let mut state = self.initial_state();
        let mut total = 0.0f32;
        for pair in tokens.windows(2) {
            let mut step = self.predict(&[pair[0]], &[&state])?;
            step.check_batch(1)?;
            let lp = step
                .log_probs
                .first()
                .and_then(|row| row.get(pair[1] as usize))
                .copied()
                .ok_or_else(|| {
                    DecodeError::Score(format!("lm row has no entry for token {}", pair[1]))
                })?;
            total += lp;
            state = match step.states.pop() {
                Some(s) => s,
                None => return Err(DecodeError::batch_mismatch("lm states", 0, 1)),
            };
        }
        Ok(total)
    }
}

/// Upstream encoder, opaque beyond its output contract.
pub trait Encoder {
    /// Encode `n_frames` of raw features (flat row-major buffer) into the
    /// representation the decoder scores against.
    fn encode(&self, features: &[f32], n_frames: usize) -> DecodeResult<EncoderOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===== EncoderOutput =====

    #[test]
    fn test_encoder_output_shape_check() {
        assert!(EncoderOutput::new(vec![0.0; 6], 2, 3).is_ok());
        let err = EncoderOutput::new(vec![0.0; 5], 2, 3).expect_err("bad shape");
        assert!(matches!(err, DecodeError::Encoder(_)));
    }

    #[test]
    fn test_encoder_output_frame_access() {
        let enc = EncoderOutput::new(vec![1.0, 2.0, 3.0, 4.0], 2, 2).expect("valid shape");
        assert_eq!(enc.frame(0), &[1.0, 2.0]);
        assert_eq!(enc.frame(1), &[3.0, 4.0]);
        assert_eq!(enc.n_frames(), 2);
        assert_eq!(enc.dim(), 2);
        assert!(!enc.is_empty());
    }

    #[test]
    fn test_encoder_output_empty() {
        let enc = EncoderOutput::empty(16);
        assert!(enc.is_empty());
        assert_eq!(enc.n_frames(), 0);
        assert_eq!(enc.dim(), 16);
    }

    // ===== Batch contract =====

    #[test]
    fn test_step_scores_batch_check() {
        let step = StepScores { logits: vec![vec![0.0; 4]; 2], caches: vec![(); 2] };
        assert!(step.check_batch(2).is_ok());
        assert!(step.check_batch(3).is_err());
    }

    #[test]
    fn test_lm_step_batch_check() {
        let step = LmStep { log_probs: vec![vec![0.0; 4]; 2], states: vec![(); 1] };
        assert!(step.check_batch(2).is_err());
    }

    // ===== score_sequence =====

    /// Uniform LM over a fixed vocab: every token gets -ln(V).
    struct UniformLm {
        vocab: usize,
    }

    impl LanguageModel for UniformLm {
        type State = u32;

        fn initial_state(&self) -> u32 {
            0
        }

        fn predict(&self, last_tokens: &[u32], _states: &[&u32]) -> DecodeResult<LmStep<u32>> {
            #[allow(clippy::cast_precision_loss)]
            let lp = -(self.vocab as f32).ln();
            Ok(LmStep {
                log_probs: vec![vec![lp; self.vocab]; last_tokens.len()],
                states: last_tokens.to_vec(),
            })
        }
    }

    #[test]
    fn test_score_sequence_sums_steps() {
        let lm = UniformLm { vocab: 8 };
        let total = lm.score_sequence(&[2, 5, 6, 2]).expect("uniform lm never fails");
        let expected = -(8.0f32).ln() * 3.0;
        assert!((total - expected).abs() < 1e-6);
    }

    #[test]
    fn test_score_sequence_short_inputs() {
        let lm = UniformLm { vocab: 8 };
        assert_eq!(lm.score_sequence(&[]).expect("empty"), 0.0);
        assert_eq!(lm.score_sequence(&[2]).expect("single"), 0.0);
    }

    // ===== Encoder =====

    /// Identity encoder: hands the feature buffer through unchanged.
    struct PassthroughEncoder {
        dim: usize,
    }

    impl Encoder for PassthroughEncoder {
        fn encode(&self, features: &[f32], n_frames: usize) -> DecodeResult<EncoderOutput> {
            EncoderOutput::new(features.to_vec(), n_frames, self.dim)
        }
    }

    #[test]
    fn test_encoder_contract() {
        let enc = PassthroughEncoder { dim: 3 };
        let out = enc.encode(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2).expect("valid shape");
        assert_eq!(out.n_frames(), 2);
        assert_eq!(out.frame(1), &[4.0, 5.0, 6.0]);
        assert!(enc.encode(&[1.0, 2.0], 2).is_err());
    }
}
