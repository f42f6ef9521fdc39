//! CTC scoring over a per-utterance emission lattice.
//!
//! The lattice is produced once per utterance by an upstream CTC output layer
//! (frames x vocab log-probabilities, blank included) and is read-only for
//! the whole decode: every hypothesis of one utterance shares the same
//! buffer. Three consumers live in this module tree:
//!
//! - [`best_path`]: frame-wise argmax with repeat collapse, the plain
//!   CTC decode used on its own for sub-level outputs.
//! - [`prefix::CtcPrefixScorer`]: the incremental prefix scorer blended into
//!   beam search.
//! - [`loss::forward_log_prob`]: the full-sequence forward recursion, the
//!   evaluation-mode face of the CTC criterion.

pub mod loss;
pub mod prefix;

pub use loss::{forward_log_prob, HierarchicalCtc, HierarchicalCtcScore};
pub use prefix::{CtcPrefixScorer, CtcPrefixState};

use crate::error::{DecodeError, DecodeResult};

/// Frames x vocab log-probability lattice for one utterance, flat row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct EmissionLattice {
    log_probs: Vec<f32>,
    n_frames: usize,
    vocab: usize,
}

impl EmissionLattice {
    /// Wrap a flat `n_frames x vocab` buffer of log-probabilities.
    pub fn new(log_probs: Vec<f32>, n_frames: usize, vocab: usize) -> DecodeResult<Self> {
        if vocab == 0 {
            return Err(DecodeError::Lattice("lattice vocab must be non-zero".into()));
        }
        if log_probs.len() != n_frames * vocab {
            return Err(DecodeError::Lattice(format!(
                "lattice buffer of {} does not match {n_frames} frames x {vocab} labels",
                log_probs.len()
            )));
        }
        Ok(Self { log_probs, n_frames, vocab })
    }

    /// Build a lattice from per-frame rows (test and glue convenience).
    pub fn from_rows(rows: &[Vec<f32>]) -> DecodeResult<Self> {
        let vocab = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != vocab) {
            return Err(DecodeError::Lattice("lattice rows differ in width".into()));
        }
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Self::new(flat, rows.len(), vocab.max(1))
    }

    /// Number of time frames.
    #[must_use]
    pub const fn n_frames(&self) -> usize {
        self.n_frames
    }

    /// Number of labels per frame, blank included.
    #[must_use]
    pub const fn vocab_size(&self) -> usize {
        self.vocab
    }

    /// One frame of label log-probabilities.
    ///
    /// # Panics
    /// Panics if `t >= n_frames()`; callers index within bounds.
    #[must_use]
    pub fn frame(&self, t: usize) -> &[f32] {
        &self.log_probs[t * self.vocab..(t + 1) * self.vocab]
    }

    /// Log-probability of label `k` at frame `t`.
    ///
    /// # Panics
    /// Panics on out-of-range `t` or `k`.
    #[must_use]
    pub fn log_prob(&self, t: usize, k: u32) -> f32 {
        self.log_probs[t * self.vocab + k as usize]
    }

    /// A copy with the frame axis reversed, for backward decoding.
    #[must_use]
    pub fn reversed(&self) -> Self {
        let mut log_probs = Vec::with_capacity(self.log_probs.len());
        for t in (0..self.n_frames).rev() {
            log_probs.extend_from_slice(self.frame(t));
        }
        Self { log_probs, n_frames: self.n_frames, vocab: self.vocab }
    }
}

/// Stable `log(exp(a) + exp(b))`.
///
/// Negative infinity is an annihilator on either side, so accumulators can
/// start from `f32::NEG_INFINITY` without producing NaN.
#[must_use]
pub(crate) fn log_sum_exp(a: f32, b: f32) -> f32 {
    if a == f32::NEG_INFINITY {
        return b;
    }
    if b == f32::NEG_INFINITY {
        return a;
    }
    let max = a.max(b);
    max + ((a - max).exp() + (b - max).exp()).ln()
}

/// Best-path (greedy) CTC decode: frame-wise argmax, collapse repeats,
/// drop blanks. Ties pick the lowest label id.
#[must_use]
pub fn best_path(lattice: &EmissionLattice, blank: u32) -> Vec<u32> {
    let mut out = Vec::new();
    let mut prev: Option<u32> = None;
    for t in 0..lattice.n_frames() {
        let frame = lattice.frame(t);
        let mut best = 0usize;
        for (k, &lp) in frame.iter().enumerate() {
            if lp > frame[best] {
                best = k;
            }
        }
        #[allow(clippy::cast_possible_truncation)]
        let label = best as u32;
        if label != blank && prev != Some(label) {
            out.push(label);
        }
        prev = Some(label);
    }
    out
}
