//! Incremental CTC prefix scoring for joint CTC-attention beam search.
//!
//! A prefix score is the probability mass of every lattice path whose
//! collapsed output *starts with* the given token prefix. Scoring a
//! candidate extension reuses the parent prefix's per-frame accumulators, so
//! one beam step costs O(frames x candidates) instead of re-walking the
//! lattice for the whole vocabulary.
//!
//! # Algorithm
//!
//! For a prefix ending in label `l`, two log-domain accumulators are kept per
//! frame `t`: mass of paths that realize the whole prefix by `t` and end in
//! `l` (non-blank), and mass of those that end in blank. Extending by a new
//! label `c` runs one forward sweep: the parent mass available at `t-1` feeds
//! the child's non-blank accumulator at `t`, where a repeated label may only
//! draw on the parent's blank mass (CTC collapses adjacent repeats). The
//! candidate's score is the running log-sum of parent mass times the label
//! emission; an end-symbol candidate instead scores the parent's total mass
//! at the final frame, and blank is never a valid extension.
//!
//! # Example
//!
//! ```rust,ignore
//! let scorer = CtcPrefixScorer::new(&lattice, symbols)?;
//! let root = scorer.initial_state();
//! let (scores, states) = scorer.score(&[symbols.eos], &[a, b], &root)?;
//! ```

use super::{log_sum_exp, EmissionLattice};
use crate::error::{DecodeError, DecodeResult};
use crate::vocab::SpecialSymbols;

/// Per-prefix forward accumulators, one pair per lattice frame.
///
/// Derived functionally: extending a prefix builds a fresh state from the
/// parent's, so hypotheses sharing a parent never alias mutable data.
#[derive(Debug, Clone, PartialEq)]
pub struct CtcPrefixState {
    /// Mass of paths realizing the prefix by frame `t`, ending in its last label.
    nonblank: Vec<f32>,
    /// Mass of paths realizing the prefix by frame `t`, ending in blank.
    blank: Vec<f32>,
}

impl CtcPrefixState {
    /// Total prefix mass accumulated at the final frame.
    ///
    /// For the root state this is the probability of the empty output.
    #[must_use]
    pub fn prefix_log_prob(&self) -> f32 {
        match (self.nonblank.last(), self.blank.last()) {
            (Some(&n), Some(&b)) => log_sum_exp(n, b),
            _ => 0.0,
        }
    }

    fn n_frames(&self) -> usize {
        self.nonblank.len()
    }
}

/// Incremental prefix scorer bound to one utterance's emission lattice.
#[derive(Debug, Clone, Copy)]
pub struct CtcPrefixScorer<'a> {
    lattice: &'a EmissionLattice,
    blank: u32,
    eos: u32,
}

impl<'a> CtcPrefixScorer<'a> {
    /// Bind a scorer to a lattice.
    ///
    /// The blank id must address a lattice column; the end symbol needs no
    /// column of its own (its score is the accumulated prefix mass, never an
    /// emission probability).
    pub fn new(lattice: &'a EmissionLattice, symbols: SpecialSymbols) -> DecodeResult<Self> {
        symbols.validate()?;
        if symbols.blank as usize >= lattice.vocab_size() {
            return Err(DecodeError::Lattice(format!(
                "blank id {} outside lattice vocab {}",
                symbols.blank,
                lattice.vocab_size()
            )));
        }
        Ok(Self { lattice, blank: symbols.blank, eos: symbols.eos })
    }

    /// State for the start-symbol-only prefix: no non-blank mass anywhere,
    /// blank mass accumulating along the all-blank path.
    #[must_use]
    pub fn initial_state(&self) -> CtcPrefixState {
        let t_len = self.lattice.n_frames();
        let mut blank = vec![f32::NEG_INFINITY; t_len];
        let mut run = 0.0f32;
        for (t, acc) in blank.iter_mut().enumerate() {
            run += self.lattice.log_prob(t, self.blank);
            *acc = run;
        }
        CtcPrefixState { nonblank: vec![f32::NEG_INFINITY; t_len], blank }
    }

    /// Score every candidate extension of `prefix` given the parent state.
    ///
    /// `prefix` includes the leading start symbol. Returned scores are
    /// absolute prefix log-probabilities (not increments), paired with the
    /// state each candidate's child hypothesis must carry.
    pub fn score(
        &self,
        prefix: &[u32],
        candidates: &[u32],
        parent: &CtcPrefixState,
    ) -> DecodeResult<(Vec<f32>, Vec<CtcPrefixState>)> {
        let t_len = self.lattice.n_frames();
        let Some((&last, _)) = prefix.split_last() else {
            return Err(DecodeError::Score(
                "ctc prefix must include the start symbol".into(),
            ));
        };
        if parent.n_frames() != t_len || parent.blank.len() != t_len {
            return Err(DecodeError::Score(format!(
                "ctc state covers {} frames, lattice has {t_len}",
                parent.n_frames()
            )));
        }
        let out_len = prefix.len() - 1;

        // No frames: only the empty output has mass.
        if t_len == 0 {
            let scores = candidates
                .iter()
                .map(|&c| if c == self.eos && out_len == 0 { 0.0 } else { f32::NEG_INFINITY })
                .collect();
            let states = vec![parent.clone(); candidates.len()];
            return Ok((scores, states));
        }

        let r_sum: Vec<f32> = (0..t_len)
            .map(|t| log_sum_exp(parent.nonblank[t], parent.blank[t]))
            .collect();

        let mut scores = Vec::with_capacity(candidates.len());
        let mut states = Vec::with_capacity(candidates.len());
        for &c in candidates {
            if c == self.blank {
                // Blank never extends a prefix; the child is unreachable.
                scores.push(f32::NEG_INFINITY);
                states.push(parent.clone());
                continue;
            }
            if c == self.eos {
                // Ending here claims the mass of paths that realize the
                // prefix exactly, over all frames.
                scores.push(r_sum[t_len - 1]);
                states.push(parent.clone());
                continue;
            }
            if c as usize >= self.lattice.vocab_size() {
                return Err(DecodeError::Score(format!(
                    "candidate token {c} outside lattice vocab {}",
                    self.lattice.vocab_size()
                )));
            }
            let (psi, state) = self.extend(c, last, out_len, parent, &r_sum);
            scores.push(psi);
            states.push(state);
        }
        Ok((scores, states))
    }

    /// One forward sweep extending the prefix by label `c`.
    fn extend(
        &self,
        c: u32,
        last: u32,
        out_len: usize,
        parent: &CtcPrefixState,
        r_sum: &[f32],
    ) -> (f32, CtcPrefixState) {
        let t_len = self.lattice.n_frames();
        let mut nonblank = vec![f32::NEG_INFINITY; t_len];
        let mut blank = vec![f32::NEG_INFINITY; t_len];

        // Parent mass usable just before `c` is consumed: a repeated label
        // must cross a blank, so only the parent's blank-ending mass counts.
        let same_label = out_len > 0 && c == last;
        let phi = |t: usize| if same_label { parent.blank[t] } else { r_sum[t] };

        let mut psi;
        if out_len == 0 {
            nonblank[0] = self.lattice.log_prob(0, c);
            psi = nonblank[0];
        } else {
            psi = f32::NEG_INFINITY;
        }

        let start = out_len.max(1);
        for t in start..t_len {
            let x_c = self.lattice.log_prob(t, c);
            nonblank[t] = log_sum_exp(nonblank[t - 1], phi(t - 1)) + x_c;
            blank[t] = log_sum_exp(nonblank[t - 1], blank[t - 1])
                + self.lattice.log_prob(t, self.blank);
            psi = log_sum_exp(psi, phi(t - 1) + x_c);
        }
        (psi, CtcPrefixState { nonblank, blank })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-4;

    /// 3 frames over {blank, A, B}: blank-dominant at 0 and 2, A-dominant at 1.
    fn toy_lattice() -> EmissionLattice {
        EmissionLattice::from_rows(&[
            vec![0.8f32.ln(), 0.15f32.ln(), 0.05f32.ln()],
            vec![0.1f32.ln(), 0.8f32.ln(), 0.1f32.ln()],
            vec![0.8f32.ln(), 0.15f32.ln(), 0.05f32.ln()],
        ])
        .expect("valid toy lattice")
    }

    /// blank 0, A 1, B 2; eos outside the lattice vocab.
    fn toy_symbols() -> SpecialSymbols {
        SpecialSymbols::new(3, 4, 5, 0)
    }

    const A: u32 = 1;
    const B: u32 = 2;
    const EOS: u32 = 3;

    // ===== Construction =====

    #[test]
    fn test_new_rejects_blank_outside_vocab() {
        let lat = toy_lattice();
        let err = CtcPrefixScorer::new(&lat, SpecialSymbols::new(9, 4, 5, 7))
            .expect_err("blank out of range");
        assert!(matches!(err, DecodeError::Lattice(_)));
    }

    #[test]
    fn test_initial_state_accumulates_blank_path() {
        let lat = toy_lattice();
        let scorer = CtcPrefixScorer::new(&lat, toy_symbols()).expect("valid scorer");
        let state = scorer.initial_state();
        // All-blank path: 0.8, 0.8 * 0.1, 0.8 * 0.1 * 0.8
        assert!((state.blank[0] - 0.8f32.ln()).abs() < EPS);
        assert!((state.blank[1] - 0.08f32.ln()).abs() < EPS);
        assert!((state.blank[2] - 0.064f32.ln()).abs() < EPS);
        assert!(state.nonblank.iter().all(|&x| x == f32::NEG_INFINITY));
        assert!((state.prefix_log_prob() - 0.064f32.ln()).abs() < EPS);
    }

    // ===== Single-step scores =====

    #[test]
    fn test_first_label_scores_match_enumeration() {
        let lat = toy_lattice();
        let scorer = CtcPrefixScorer::new(&lat, toy_symbols()).expect("valid scorer");
        let root = scorer.initial_state();
        let (scores, _) = scorer.score(&[EOS], &[A, B], &root).expect("score ok");
        // First non-blank symbol is A: 0.15 + 0.8*0.8 + 0.8*0.1*0.15 = 0.802
        assert!((scores[0] - 0.802f32.ln()).abs() < EPS);
        // First non-blank symbol is B: 0.05 + 0.8*0.1 + 0.8*0.1*0.05 = 0.134
        assert!((scores[1] - 0.134f32.ln()).abs() < EPS);
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn test_eos_scores_exact_prefix_mass() {
        let lat = toy_lattice();
        let scorer = CtcPrefixScorer::new(&lat, toy_symbols()).expect("valid scorer");
        let root = scorer.initial_state();
        let (_, states) = scorer.score(&[EOS], &[A], &root).expect("score ok");
        let (scores, _) = scorer.score(&[EOS, A], &[EOS], &states[0]).expect("score ok");
        // Paths collapsing to exactly [A] over 3 frames sum to 0.746.
        assert!((scores[0] - 0.746f32.ln()).abs() < EPS);
    }

    #[test]
    fn test_repeated_label_needs_blank_gap() {
        let lat = toy_lattice();
        let scorer = CtcPrefixScorer::new(&lat, toy_symbols()).expect("valid scorer");
        let root = scorer.initial_state();
        let (_, states) = scorer.score(&[EOS], &[A], &root).expect("score ok");
        let (scores, _) = scorer.score(&[EOS, A], &[A], &states[0]).expect("score ok");
        // Only path for [A, A] in 3 frames is A-blank-A: 0.15 * 0.1 * 0.15
        assert!((scores[0] - 0.00225f32.ln()).abs() < EPS);
    }

    #[test]
    fn test_blank_candidate_is_log_zero() {
        let lat = toy_lattice();
        let scorer = CtcPrefixScorer::new(&lat, toy_symbols()).expect("valid scorer");
        let root = scorer.initial_state();
        let (scores, _) = scorer.score(&[EOS], &[0], &root).expect("score ok");
        assert_eq!(scores[0], f32::NEG_INFINITY);
    }

    // ===== Contract violations =====

    #[test]
    fn test_empty_prefix_rejected() {
        let lat = toy_lattice();
        let scorer = CtcPrefixScorer::new(&lat, toy_symbols()).expect("valid scorer");
        let root = scorer.initial_state();
        assert!(scorer.score(&[], &[A], &root).is_err());
    }

    #[test]
    fn test_candidate_outside_vocab_rejected() {
        let lat = toy_lattice();
        let scorer = CtcPrefixScorer::new(&lat, toy_symbols()).expect("valid scorer");
        let root = scorer.initial_state();
        // 7 is neither blank nor eos and has no lattice column.
        assert!(scorer.score(&[EOS], &[7], &root).is_err());
    }

    #[test]
    fn test_state_frame_mismatch_rejected() {
        let lat = toy_lattice();
        let scorer = CtcPrefixScorer::new(&lat, toy_symbols()).expect("valid scorer");
        let stale = CtcPrefixState {
            nonblank: vec![f32::NEG_INFINITY; 2],
            blank: vec![f32::NEG_INFINITY; 2],
        };
        assert!(scorer.score(&[EOS], &[A], &stale).is_err());
    }

    // ===== Properties =====

    #[test]
    fn property_longer_prefixes_never_gain_mass() {
        let lat = toy_lattice();
        let scorer = CtcPrefixScorer::new(&lat, toy_symbols()).expect("valid scorer");
        let root = scorer.initial_state();
        let (first, states) = scorer.score(&[EOS], &[A, B], &root).expect("score ok");
        let (second, _) = scorer.score(&[EOS, A], &[B], &states[0]).expect("score ok");
        // Prefix [A, B] is a refinement of [A]; mass can only shrink.
        assert!(second[0] <= first[0] + EPS);
    }

    #[test]
    fn property_scores_are_deterministic() {
        let lat = toy_lattice();
        let scorer = CtcPrefixScorer::new(&lat, toy_symbols()).expect("valid scorer");
        let root = scorer.initial_state();
        let (a, states_a) = scorer.score(&[EOS], &[A, B], &root).expect("score ok");
        let (b, states_b) = scorer.score(&[EOS], &[A, B], &root).expect("score ok");
        assert_eq!(a, b);
        assert_eq!(states_a, states_b);
    }
}
