//! Full-sequence CTC scoring and the hierarchical multi-task blend.
//!
//! [`forward_log_prob`] walks the blank-augmented state lattice once and
//! returns `log P(labels | lattice)`, the evaluation-mode value of the CTC
//! criterion (its negation is the per-utterance loss). [`HierarchicalCtc`]
//! combines a main-level and a sub-level score the way a hierarchical
//! multi-task model weights its two objectives.

use super::{log_sum_exp, EmissionLattice};
use crate::error::{DecodeError, DecodeResult};

/// Log-probability of emitting exactly `labels` under the lattice.
///
/// Standard forward recursion over the `2n + 1` blank-augmented states:
/// stay, advance by one, or skip a blank between distinct labels. Returns
/// negative infinity when the lattice is too short for the label sequence.
pub fn forward_log_prob(
    lattice: &EmissionLattice,
    labels: &[u32],
    blank: u32,
) -> DecodeResult<f32> {
    let t_len = lattice.n_frames();
    let vocab = lattice.vocab_size();
    if blank as usize >= vocab {
        return Err(DecodeError::Lattice(format!(
            "blank id {blank} outside lattice vocab {vocab}"
        )));
    }
    if let Some(&bad) = labels.iter().find(|&&l| l as usize >= vocab) {
        return Err(DecodeError::Lattice(format!(
            "label {bad} outside lattice vocab {vocab}"
        )));
    }
    if labels.contains(&blank) {
        return Err(DecodeError::Lattice("labels must not contain blank".into()));
    }

    let n = labels.len();
    if t_len == 0 {
        return Ok(if n == 0 { 0.0 } else { f32::NEG_INFINITY });
    }

    let s_len = 2 * n + 1;
    let label_at = |s: usize| -> u32 {
        if s % 2 == 0 {
            blank
        } else {
            labels[s / 2]
        }
    };

    let mut prev = vec![f32::NEG_INFINITY; s_len];
    prev[0] = lattice.log_prob(0, blank);
    if s_len > 1 {
        prev[1] = lattice.log_prob(0, label_at(1));
    }

    for t in 1..t_len {
        let mut cur = vec![f32::NEG_INFINITY; s_len];
        for (s, slot) in cur.iter_mut().enumerate() {
            let mut acc = prev[s];
            if s >= 1 {
                acc = log_sum_exp(acc, prev[s - 1]);
            }
            if s >= 2 {
                let lbl = label_at(s);
                // Blank-skip transition only between distinct labels.
                if lbl != blank && lbl != label_at(s - 2) {
                    acc = log_sum_exp(acc, prev[s - 2]);
                }
            }
            *slot = acc + lattice.log_prob(t, label_at(s));
        }
        prev = cur;
    }

    let mut total = prev[s_len - 1];
    if s_len >= 2 {
        total = log_sum_exp(total, prev[s_len - 2]);
    }
    Ok(total)
}

/// Weighted combination of a main-level and a sub-level CTC score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HierarchicalCtcScore {
    /// `main_weight * main + (1 - main_weight) * sub`.
    pub total: f32,
    /// Main-level sequence log-probability.
    pub main: f32,
    /// Sub-level sequence log-probability.
    pub sub: f32,
}

/// Main/sub blending for hierarchical multi-task CTC evaluation.
#[derive(Debug, Clone, Copy)]
pub struct HierarchicalCtc {
    main_weight: f32,
}

impl HierarchicalCtc {
    /// Create a blender; `main_weight` must lie in `[0, 1]`.
    pub fn new(main_weight: f32) -> DecodeResult<Self> {
        if !(0.0..=1.0).contains(&main_weight) {
            return Err(DecodeError::Config(format!(
                "ctc main weight {main_weight} outside [0, 1]"
            )));
        }
        Ok(Self { main_weight })
    }

    /// The configured main-level weight.
    #[must_use]
    pub const fn main_weight(&self) -> f32 {
        self.main_weight
    }

    /// Blend two already-computed scores.
    #[must_use]
    pub fn blend(&self, main: f32, sub: f32) -> f32 {
        main * self.main_weight + sub * (1.0 - self.main_weight)
    }

    /// Score one utterance at both levels and blend.
    pub fn score(
        &self,
        main_lattice: &EmissionLattice,
        main_labels: &[u32],
        sub_lattice: &EmissionLattice,
        sub_labels: &[u32],
        blank: u32,
    ) -> DecodeResult<HierarchicalCtcScore> {
        let main = forward_log_prob(main_lattice, main_labels, blank)?;
        let sub = forward_log_prob(sub_lattice, sub_labels, blank)?;
        Ok(HierarchicalCtcScore { total: self.blend(main, sub), main, sub })
    }
}
