//! Monotonic and chunkwise alignment math.
//!
//! The parameter-free half of a monotonic chunkwise attention mechanism:
//! trained energy layers stay outside this crate, and these routines turn
//! their outputs (per-frame selection probabilities and chunk energies)
//! into alignment distributions over the key axis. All functions operate on
//! one query row at a time.
//!
//! # Algorithm
//!
//! A monotonic head walks the key axis left to right and decides per frame
//! whether to stop. The expected alignment under that process has a closed
//! form (`Parallel`), an exact sequential recurrence (`Recursive`), and a
//! thresholded inference rule that commits to the first selected frame at or
//! after the previous boundary (`Hard`). A chunkwise layer then spreads each
//! aligned boundary over a fixed-width window behind it using masked-softmax
//! weights.

use crate::error::{DecodeError, DecodeResult};

/// Exclusive cumulative sum: `[a, b, c] -> [0, a, a + b]`.
#[must_use]
pub fn exclusive_cumsum(x: &[f32]) -> Vec<f32> {
    let mut out = Vec::with_capacity(x.len());
    let mut run = 0.0f32;
    for &v in x {
        out.push(run);
        run += v;
    }
    out
}

/// Exclusive cumulative product: `[a, b, c] -> [1, a, a * b]`.
#[must_use]
pub fn exclusive_cumprod(x: &[f32]) -> Vec<f32> {
    let mut out = Vec::with_capacity(x.len());
    let mut run = 1.0f32;
    for &v in x {
        out.push(run);
        run *= v;
    }
    out
}

/// Numerically stable exclusive cumulative product via log-space summation,
/// with inputs clamped to `[eps, 1]`.
#[must_use]
pub fn safe_cumprod(x: &[f32], eps: f32) -> Vec<f32> {
    let logs: Vec<f32> = x.iter().map(|&v| v.clamp(eps, 1.0).ln()).collect();
    exclusive_cumsum(&logs).iter().map(|&v| v.exp()).collect()
}

/// Windowed sum: `out[i] = sum(x[i - back ..= i + forward])`, edges clipped.
#[must_use]
pub fn moving_sum(x: &[f32], back: usize, forward: usize) -> Vec<f32> {
    let n = x.len();
    let mut out = vec![0.0f32; n];
    for (i, slot) in out.iter_mut().enumerate() {
        let lo = i.saturating_sub(back);
        let hi = (i + forward + 1).min(n);
        *slot = x[lo..hi].iter().sum();
    }
    out
}

/// How the monotonic alignment is computed from selection probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonotonicMode {
    /// Exact sequential recurrence over the key axis.
    Recursive,
    /// Closed-form solution of the same recurrence (cumulative products).
    Parallel,
    /// Threshold at 0.5 and commit to the first selected frame.
    Hard,
}

/// Monotonic alignment over one query step.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicAligner {
    mode: MonotonicMode,
    eps: f32,
}

impl MonotonicAligner {
    /// Create an aligner for the given mode.
    #[must_use]
    pub const fn new(mode: MonotonicMode) -> Self {
        Self { mode, eps: 1e-6 }
    }

    /// Override the clamping epsilon used by the parallel closed form.
    #[must_use]
    pub const fn with_epsilon(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    /// Compute the alignment over the key axis for one query.
    ///
    /// `emit_probs` are per-frame selection probabilities (already through
    /// the sigmoid); `align_prev` is the previous query's alignment, one-hot
    /// at frame 0 for the first query.
    pub fn align(&self, emit_probs: &[f32], align_prev: &[f32]) -> DecodeResult<Vec<f32>> {
        if emit_probs.len() != align_prev.len() {
            return Err(DecodeError::Alignment(format!(
                "selection probabilities cover {} frames, previous alignment {}",
                emit_probs.len(),
                align_prev.len()
            )));
        }
        let alpha = match self.mode {
            MonotonicMode::Recursive => Self::align_recursive(emit_probs, align_prev),
            MonotonicMode::Parallel => self.align_parallel(emit_probs, align_prev),
            MonotonicMode::Hard => Self::align_hard(emit_probs, align_prev),
        };
        Ok(alpha)
    }

    /// `q[j] = (1 - p[j-1]) * q[j-1] + align_prev[j]`, `alpha[j] = p[j] * q[j]`.
    fn align_recursive(p: &[f32], align_prev: &[f32]) -> Vec<f32> {
        let mut alpha = Vec::with_capacity(p.len());
        let mut q = 0.0f32;
        let mut carry = 1.0f32;
        for (j, &pj) in p.iter().enumerate() {
            q = carry * q + align_prev[j];
            alpha.push(pj * q);
            carry = 1.0 - pj;
        }
        alpha
    }

    fn align_parallel(&self, p: &[f32], align_prev: &[f32]) -> Vec<f32> {
        let one_minus: Vec<f32> = p.iter().map(|&v| 1.0 - v).collect();
        let cumprod = safe_cumprod(&one_minus, self.eps);
        let mut alpha = Vec::with_capacity(p.len());
        let mut run = 0.0f32;
        for (j, &pj) in p.iter().enumerate() {
            run += align_prev[j] / cumprod[j].clamp(self.eps, 1.0);
            alpha.push(pj * cumprod[j] * run);
        }
        alpha
    }

    /// Binarize at 0.5, zero everything before the previous boundary, then
    /// keep only the first selected frame:
    /// `p_choose                        = [0, 0, 0, 1, 1, 0, 1, 1]`
    /// `exclusive_cumprod(1 - p_choose) = [1, 1, 1, 1, 0, 0, 0, 0]`
    /// `alpha                           = [0, 0, 0, 1, 0, 0, 0, 0]`
    fn align_hard(p: &[f32], align_prev: &[f32]) -> Vec<f32> {
        let mut mass = 0.0f32;
        let bits: Vec<f32> = p
            .iter()
            .zip(align_prev)
            .map(|(&pj, &prev)| {
                mass += prev;
                if pj >= 0.5 {
                    mass
                } else {
                    0.0
                }
            })
            .collect();
        let one_minus: Vec<f32> = bits.iter().map(|&b| 1.0 - b).collect();
        let gate = exclusive_cumprod(&one_minus);
        bits.iter().zip(&gate).map(|(&b, &g)| b * g).collect()
    }
}

/// Spread an alignment over fixed-width chunks using masked-softmax weights
/// of the chunk energies. Each frame draws on the softmax denominators of
/// the windows that contain it.
pub fn chunkwise_attention(
    alpha: &[f32],
    chunk_energies: &[f32],
    chunk_size: usize,
    sharpening: f32,
) -> DecodeResult<Vec<f32>> {
    if chunk_size == 0 {
        return Err(DecodeError::Alignment("chunk size must be at least 1".into()));
    }
    if alpha.len() != chunk_energies.len() {
        return Err(DecodeError::Alignment(format!(
            "alignment covers {} frames, chunk energies {}",
            alpha.len(),
            chunk_energies.len()
        )));
    }
    if alpha.is_empty() {
        return Ok(Vec::new());
    }

    // Shift energies and clamp the exponentials away from zero.
    let max = chunk_energies.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let softmax_exp: Vec<f32> = chunk_energies.iter().map(|&e| (e - max).exp().max(1e-5)).collect();
    let denominators = moving_sum(&softmax_exp, chunk_size - 1, 0);
    let ratios: Vec<f32> = alpha
        .iter()
        .zip(&denominators)
        .map(|(&a, &d)| a * sharpening / d)
        .collect();
    let spread = moving_sum(&ratios, 0, chunk_size - 1);
    Ok(softmax_exp.iter().zip(&spread).map(|(&e, &s)| e * s).collect())
}
