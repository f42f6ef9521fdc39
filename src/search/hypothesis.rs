//! Beam hypothesis records.
//!
//! A [`Hypothesis`] is the unit the beam loop clones, extends, and prunes:
//! the token prefix (leading with the start symbol) plus the cumulative
//! score components and the per-collaborator state needed to extend it one
//! more step. [`FinishedHypothesis`] is the outward-facing form after
//! finalization, with the start symbol stripped and decode direction
//! resolved.

use crate::ctc::prefix::CtcPrefixState;

/// One live beam entry.
///
/// `C` is the score-source cache type, `S` the language-model state type.
/// Score components are kept separately so second-pass rescoring and
/// diagnostics can see through the joint score.
#[derive(Debug, Clone)]
pub struct Hypothesis<C, S> {
    /// Token prefix, always starting with the start symbol.
    pub tokens: Vec<u32>,
    /// Joint ranking score (weighted mix of the components below).
    pub score: f32,
    /// Cumulative attention-decoder log probability.
    pub score_attn: f32,
    /// Absolute CTC prefix log probability of `tokens[1..]`.
    pub score_ctc: f32,
    /// Cumulative shallow-fusion language-model log probability.
    pub score_lm: f32,
    /// Per-source decoder caches, one per ensemble member.
    pub caches: Vec<C>,
    /// Shallow-fusion language-model state, if an LM is attached.
    pub lm_state: Option<S>,
    /// CTC prefix-scorer state, if a lattice is attached.
    pub ctc_state: Option<CtcPrefixState>,
    /// Forward second-pass LM log probability, set by rescoring.
    pub score_lm_second: Option<f32>,
    /// Reverse second-pass LM log probability, set by rescoring.
    pub score_lm_second_rev: Option<f32>,
}

impl<C, S> Hypothesis<C, S> {
    /// Root hypothesis holding only the start symbol, with zero scores.
    #[must_use]
    pub fn start(
        start_symbol: u32,
        caches: Vec<C>,
        lm_state: Option<S>,
        ctc_state: Option<CtcPrefixState>,
    ) -> Self {
        Self {
            tokens: vec![start_symbol],
            score: 0.0,
            score_attn: 0.0,
            score_ctc: 0.0,
            score_lm: 0.0,
            caches,
            lm_state,
            ctc_state,
            score_lm_second: None,
            score_lm_second_rev: None,
        }
    }

    /// Tokens emitted after the start symbol.
    #[must_use]
    pub fn emitted_len(&self) -> usize {
        self.tokens.len().saturating_sub(1)
    }

    /// Most recent token, if any.
    #[must_use]
    pub fn last_token(&self) -> Option<u32> {
        self.tokens.last().copied()
    }
}

/// A finalized n-best entry.
///
/// `tokens` has the start symbol stripped and, for backward decoders, the
/// surface order restored. The end symbol is kept unless the caller asked
/// for it to be excluded.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedHypothesis {
    /// Output token sequence.
    pub tokens: Vec<u32>,
    /// Final joint score, including any second-pass contributions.
    pub score: f32,
    /// Cumulative attention-decoder log probability.
    pub score_attn: f32,
    /// Absolute CTC prefix log probability.
    pub score_ctc: f32,
    /// Cumulative shallow-fusion LM log probability.
    pub score_lm: f32,
    /// Forward second-pass LM log probability, if rescored.
    pub score_lm_second: Option<f32>,
    /// Reverse second-pass LM log probability, if rescored.
    pub score_lm_second_rev: Option<f32>,
    /// Whether the hypothesis ended by emitting the end symbol.
    pub reached_eos: bool,
}
