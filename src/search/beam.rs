//! Beam search with joint attention/CTC/LM scoring.
//!
//! # Algorithm
//!
//! The engine keeps up to `beam_width` live hypotheses in lockstep. Each
//! step batches one call per score source and one to the shallow-fusion
//! LM, then expands every parent in two stages: a coarse top-k over the
//! cumulative attention score alone, followed by joint refinement that
//! adds the LM, length-penalty, and CTC prefix terms and re-ranks the
//! same candidates. End-symbol candidates must clear a minimum-length
//! floor and an end-symbol confidence threshold before they may finish.
//! Finished hypotheses leave the beam; the loop stops when enough have
//! finished, the length budget runs out, or an optional deadline expires.
//! Second-pass LMs then rescore the finished set before the n-best list
//! is cut.
//!
//! The backward direction drives a right-to-left decoder: the CTC lattice
//! is time-reversed once up front and output tokens are restored to
//! surface order at the end.
//!
//! # Example
//!
//! ```rust,ignore
//! use beamfuse::search::{BeamSearch, BeamSearchConfig, Utterance};
//! use beamfuse::vocab::SpecialSymbols;
//!
//! let config = BeamSearchConfig::default().with_beam_width(8).with_ctc_weight(0.3);
//! let search: BeamSearch<MyDecoder, MyLm> =
//!     BeamSearch::new(config, SpecialSymbols::asr_default(), vec![&decoder])?.with_lm(&lm);
//! let nbest = search.decode(&Utterance::new(&encoded).with_ctc_lattice(&lattice), None)?;
//! ```

use std::cmp::Ordering;
use std::time::{Duration, Instant};

use crate::ctc::prefix::CtcPrefixScorer;
use crate::ctc::EmissionLattice;
use crate::error::{DecodeError, DecodeResult};
use crate::score::{LanguageModel, LmStep, ScoreSource};
use crate::search::hypothesis::{FinishedHypothesis, Hypothesis};
use crate::search::rescore::{rescore, SecondPass};
use crate::search::{Direction, LmCarryOver, Utterance};
use crate::vocab::SpecialSymbols;

/// Beam search options.
///
/// All weights live on the log-probability scale. The joint score of a
/// candidate is `cumulative_attention * (1 - ctc_weight) + cumulative_lm *
/// lm_weight + (emitted + 1) * length_penalty + ctc_prefix * ctc_weight`,
/// optionally divided by the emitted length when `length_norm` is set.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BeamSearchConfig {
    /// Generation order of the decoder being driven.
    pub direction: Direction,
    /// Live hypotheses kept per step.
    pub beam_width: usize,
    /// Hypotheses returned per utterance.
    pub nbest: usize,
    /// Length budget as a fraction of encoder frames.
    pub max_len_ratio: f32,
    /// Minimum emitted length, as a fraction of encoder frames, before the
    /// end symbol may be proposed.
    pub min_len_ratio: f32,
    /// Weight of the CTC prefix score in the joint score.
    pub ctc_weight: f32,
    /// Weight of the shallow-fusion LM in the joint score.
    pub lm_weight: f32,
    /// Weight of the forward second-pass LM applied after the beam.
    pub lm_second_weight: f32,
    /// Weight of the reverse second-pass LM applied after the beam.
    pub lm_second_rev_weight: f32,
    /// Reward per emitted token.
    pub length_penalty: f32,
    /// Divide the joint score by the emitted length when ranking.
    pub length_norm: bool,
    /// End-symbol log probability must exceed `eos_threshold` times the
    /// best competing token's log probability for a hypothesis to finish.
    pub eos_threshold: f32,
    /// Multiplier on decoder logits before the softmax.
    pub softmax_smoothing: f32,
    /// Strip the end symbol from returned tokens.
    pub exclude_eos: bool,
    /// Close the whole beam at the reference length instead of on the end
    /// symbol.
    pub oracle: bool,
    /// Wall-clock budget, checked once per step.
    pub deadline: Option<Duration>,
}

impl Default for BeamSearchConfig {
    fn default() -> Self {
        Self {
            direction: Direction::Forward,
            beam_width: 5,
            nbest: 1,
            max_len_ratio: 1.0,
            min_len_ratio: 0.0,
            ctc_weight: 0.0,
            lm_weight: 0.0,
            lm_second_weight: 0.0,
            lm_second_rev_weight: 0.0,
            length_penalty: 0.0,
            length_norm: false,
            eos_threshold: 1.5,
            softmax_smoothing: 1.0,
            exclude_eos: false,
            oracle: false,
            deadline: None,
        }
    }
}

impl BeamSearchConfig {
    /// Set the generation order.
    #[must_use]
    pub const fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Set the number of live hypotheses kept per step.
    #[must_use]
    pub const fn with_beam_width(mut self, beam_width: usize) -> Self {
        self.beam_width = beam_width;
        self
    }

    /// Set the number of hypotheses returned per utterance.
    #[must_use]
    pub const fn with_nbest(mut self, nbest: usize) -> Self {
        self.nbest = nbest;
        self
    }

    /// Set the length budget ratio.
    #[must_use]
    pub const fn with_max_len_ratio(mut self, ratio: f32) -> Self {
        self.max_len_ratio = ratio;
        self
    }

    /// Set the minimum-length ratio gating the end symbol.
    #[must_use]
    pub const fn with_min_len_ratio(mut self, ratio: f32) -> Self {
        self.min_len_ratio = ratio;
        self
    }

    /// Set the CTC weight.
    #[must_use]
    pub const fn with_ctc_weight(mut self, weight: f32) -> Self {
        self.ctc_weight = weight;
        self
    }

    /// Set the shallow-fusion LM weight.
    #[must_use]
    pub const fn with_lm_weight(mut self, weight: f32) -> Self {
        self.lm_weight = weight;
        self
    }

    /// Set the forward second-pass LM weight.
    #[must_use]
    pub const fn with_lm_second_weight(mut self, weight: f32) -> Self {
        self.lm_second_weight = weight;
        self
    }

    /// Set the reverse second-pass LM weight.
    #[must_use]
    pub const fn with_lm_second_rev_weight(mut self, weight: f32) -> Self {
        self.lm_second_rev_weight = weight;
        self
    }

    /// Set the per-token length reward.
    #[must_use]
    pub const fn with_length_penalty(mut self, penalty: f32) -> Self {
        self.length_penalty = penalty;
        self
    }

    /// Enable length-normalized ranking.
    #[must_use]
    pub const fn with_length_norm(mut self, norm: bool) -> Self {
        self.length_norm = norm;
        self
    }

    /// Set the end-symbol confidence threshold.
    #[must_use]
    pub const fn with_eos_threshold(mut self, threshold: f32) -> Self {
        self.eos_threshold = threshold;
        self
    }

    /// Set the softmax smoothing factor.
    #[must_use]
    pub const fn with_softmax_smoothing(mut self, smoothing: f32) -> Self {
        self.softmax_smoothing = smoothing;
        self
    }

    /// Strip the end symbol from returned tokens.
    #[must_use]
    pub const fn with_exclude_eos(mut self, exclude: bool) -> Self {
        self.exclude_eos = exclude;
        self
    }

    /// Close the beam at the reference length (oracle evaluation).
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
    /// Returns a config error naming the first offending option.
    pub fn validate(&self) -> DecodeResult<()> {
        if self.beam_width < 1 {
            return Err(DecodeError::Config("beam_width must be at least 1".into()));
        }
        if self.nbest < 1 || self.nbest > self.beam_width {
            return Err(DecodeError::Config(format!(
                "nbest must be in 1..=beam_width, got {} with beam_width {}",
                self.nbest, self.beam_width
            )));
        }
        if !self.max_len_ratio.is_finite() || self.max_len_ratio <= 0.0 {
            return Err(DecodeError::Config(format!(
                "max_len_ratio must be positive and finite, got {}",
                self.max_len_ratio
            )));
        }
        if !self.min_len_ratio.is_finite()
            || self.min_len_ratio < 0.0
            || self.min_len_ratio > self.max_len_ratio
        {
            return Err(DecodeError::Config(format!(
                "min_len_ratio must be in 0..=max_len_ratio, got {}",
                self.min_len_ratio
            )));
        }
        if !self.ctc_weight.is_finite() || !(0.0..=1.0).contains(&self.ctc_weight) {
            return Err(DecodeError::Config(format!(
                "ctc_weight must be in 0..=1, got {}",
                self.ctc_weight
            )));
        }
        for (name, weight) in [
            ("lm_weight", self.lm_weight),
            ("lm_second_weight", self.lm_second_weight),
            ("lm_second_rev_weight", self.lm_second_rev_weight),
            ("length_penalty", self.length_penalty),
            ("eos_threshold", self.eos_threshold),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(DecodeError::Config(format!(
                    "{name} must be non-negative and finite, got {weight}"
                )));
            }
        }
        if !self.softmax_smoothing.is_finite() || self.softmax_smoothing <= 0.0 {
            return Err(DecodeError::Config(format!(
                "softmax_smoothing must be positive and finite, got {}",
                self.softmax_smoothing
            )));
        }
        Ok(())
    }
}

/// Placeholder language model for searches that fuse no LM at all.
///
/// Lets the engine's LM type parameter default to something concrete;
/// its prediction contract is never exercised because no instance is
/// ever attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLm;

impl LanguageModel for NullLm {
    type State = ();

    fn initial_state(&self) {}

    fn predict(&self, _last_tokens: &[u32], _states: &[&()]) -> DecodeResult<LmStep<()>> {
        Err(DecodeError::Score("no language model attached".into()))
    }
}

/// Per-parent inputs for one expansion, borrowed from the batched step.
struct StepRows<'s, C, S> {
    attn_row: &'s [f32],
    lm_row: Option<&'s [f32]>,
    caches: &'s [C],
    lm_state: Option<&'s S>,
}

/// Beam search driver over one or more score sources.
///
/// Multiple sources form an ensemble whose per-model log probabilities
/// are averaged uniformly before candidate selection. An optional
/// shallow-fusion LM scores candidates inside the loop; optional
/// second-pass LMs rescore the finished set afterwards.
#[derive(Debug)]
pub struct BeamSearch<'a, D, L = NullLm> {
    config: BeamSearchConfig,
    symbols: SpecialSymbols,
    sources: Vec<&'a D>,
    lm: Option<&'a L>,
    lm_second: Option<&'a L>,
    lm_second_rev: Option<&'a L>,
}

impl<'a, D: ScoreSource, L: LanguageModel> BeamSearch<'a, D, L> {
    /// Build a beam search over the given score sources.
    ///
    /// # Errors
    /// Returns a config error if the options or symbols are inconsistent
    /// or `sources` is empty.
    pub fn new(
        config: BeamSearchConfig,
        symbols: SpecialSymbols,
        sources: Vec<&'a D>,
    ) -> DecodeResult<Self> {
        config.validate()?;
        symbols.validate()?;
        if sources.is_empty() {
            return Err(DecodeError::Config("at least one score source is required".into()));
        }
        Ok(Self {
            config,
            symbols,
            sources,
            lm: None,
            lm_second: None,
            lm_second_rev: None,
        })
    }

    /// Attach a shallow-fusion language model.
    #[must_use]
    pub fn with_lm(mut self, lm: &'a L) -> Self {
        self.lm = Some(lm);
        self
    }

    /// Attach a forward second-pass language model.
    #[must_use]
    pub fn with_second_pass_lm(mut self, lm: &'a L) -> Self {
        self.lm_second = Some(lm);
        self
    }

    /// Attach a right-to-left second-pass language model.
    #[must_use]
    pub fn with_reverse_second_pass_lm(mut self, lm: &'a L) -> Self {
        self.lm_second_rev = Some(lm);
        self
    }

    /// The active options.
    #[must_use]
    pub const fn config(&self) -> &BeamSearchConfig {
        &self.config
    }

    /// Decode one utterance into an n-best list.
    ///
    /// `carry` threads shallow-fusion LM state across utterances of one
    /// speaker stream: the stored state seeds the root hypothesis when the
    /// speaker tag matches, and the best hypothesis' final state is written
    /// back after a successful decode.
    ///
    /// # Errors
    /// Fails fast on attachment mismatches (weights without their
    /// collaborator or vice versa, oracle without a reference, lattice and
    /// encoder frame counts disagreeing) and propagates score-source and
    /// LM failures.
    pub fn decode(
        &self,
        utt: &Utterance<'_>,
        mut carry: Option<&mut LmCarryOver<L::State>>,
    ) -> DecodeResult<Vec<FinishedHypothesis>> {
        let _span = crate::trace_enter!("beam_decode");
        self.check_attachments(utt)?;
        let eos = self.symbols.eos;

        if utt.encoded.is_empty() {
            // Degenerate input still yields a start+end hypothesis.
            return self.finalize(vec![self.minimal_hypothesis()], Vec::new(), utt.speaker, carry);
        }

        let reversed_storage = if self.config.direction.is_backward() {
            utt.ctc_lattice.map(EmissionLattice::reversed)
        } else {
            None
        };
        let lattice = reversed_storage.as_ref().or(utt.ctc_lattice);
        let ctc_scorer = match lattice {
            Some(l) => Some(CtcPrefixScorer::new(l, self.symbols)?),
            None => None,
        };

        let oracle_ref = if self.config.oracle { utt.reference } else { None };
        let budget = match oracle_ref {
            Some(r) => r.len() + 1,
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            None => {
                (utt.encoded.n_frames() as f32 * self.config.max_len_ratio).floor() as usize + 1
            }
        };

        let carried_state = match carry.as_deref() {
            Some(c) => c.state_for(utt.speaker).cloned(),
            None => None,
        };
        let lm_state0 = self.lm.map(|lm| carried_state.unwrap_or_else(|| lm.initial_state()));
        let caches0: Vec<D::Cache> = self.sources.iter().map(|s| s.initial_cache()).collect();
        let ctc_state0 = ctc_scorer.as_ref().map(CtcPrefixScorer::initial_state);

        let mut live = vec![Hypothesis::start(eos, caches0, lm_state0, ctc_state0)];
        let mut finished: Vec<Hypothesis<D::Cache, L::State>> = Vec::new();
        let started = Instant::now();

        for t in 0..budget {
            if live.is_empty() {
                break;
            }
            if let Some(deadline) = self.config.deadline {
                if t > 0 && started.elapsed() >= deadline {
                    crate::trace_event!(step = t, "beam deadline expired");
                    break;
                }
            }

            let lm_step = self.lm_rows(&live)?;
            let (attn_rows, new_caches) = self.attn_log_rows(&live, utt.encoded)?;

            let mut children = Vec::with_capacity(live.len() * self.config.beam_width);
            for (j, parent) in live.iter().enumerate() {
                let rows = StepRows {
                    attn_row: &attn_rows[j],
                    lm_row: lm_step.as_ref().map(|(lp, _)| lp[j].as_slice()),
                    caches: &new_caches[j],
                    lm_state: lm_step.as_ref().map(|(_, states)| &states[j]),
                };
                self.expand(parent, rows, ctc_scorer.as_ref(), utt.encoded.n_frames(), &mut children)?;
            }

            sort_desc_stable(&mut children);
            children.truncate(self.config.beam_width);

            let oracle_end = oracle_ref.map_or(false, |r| t == r.len());
            let mut next_live = Vec::with_capacity(children.len());
            for child in children {
                let ended = match oracle_ref {
                    Some(_) => oracle_end,
                    None => child.last_token() == Some(eos),
                };
                if ended {
                    finished.push(child);
                } else {
                    next_live.push(child);
                }
            }
            if finished.len() >= self.config.beam_width {
                finished.truncate(self.config.beam_width);
                break;
            }
            live = next_live;
        }

        self.finalize(finished, live, utt.speaker, carry.take())
    }

    /// Fail fast when weights and attachments disagree.
    fn check_attachments(&self, utt: &Utterance<'_>) -> DecodeResult<()> {
        let cfg = &self.config;
        if cfg.oracle && utt.reference.is_none() {
            return Err(DecodeError::Config(
                "oracle decoding requires a reference transcript".into(),
            ));
        }
        match (utt.ctc_lattice, cfg.ctc_weight > 0.0) {
            (Some(_), false) => {
                return Err(DecodeError::Config(
                    "ctc lattice attached but ctc_weight is zero".into(),
                ))
            }
            (None, true) => {
                return Err(DecodeError::Config(
                    "ctc_weight is positive but no ctc lattice attached".into(),
                ))
            }
            _ => {}
        }
        for (name, attached, weight) in [
            ("lm_weight", self.lm.is_some(), cfg.lm_weight),
            ("lm_second_weight", self.lm_second.is_some(), cfg.lm_second_weight),
            ("lm_second_rev_weight", self.lm_second_rev.is_some(), cfg.lm_second_rev_weight),
        ] {
            if attached && weight <= 0.0 {
                return Err(DecodeError::Config(format!(
                    "language model attached but {name} is zero"
                )));
            }
            if !attached && weight > 0.0 {
                return Err(DecodeError::Config(format!(
                    "{name} is positive but no language model attached"
                )));
            }
        }
        if let Some(lattice) = utt.ctc_lattice {
            if lattice.n_frames() != utt.encoded.n_frames() {
                return Err(DecodeError::Lattice(format!(
                    "ctc lattice has {} frames but encoder output has {}",
                    lattice.n_frames(),
                    utt.encoded.n_frames()
                )));
            }
        }
        Ok(())
    }

    /// Batched shallow-fusion LM step over the live beam.
    #[allow(clippy::type_complexity)]
    fn lm_rows(
        &self,
        live: &[Hypothesis<D::Cache, L::State>],
    ) -> DecodeResult<Option<(Vec<Vec<f32>>, Vec<L::State>)>> {
        let Some(lm) = self.lm else {
            return Ok(None);
        };
        let mut last = Vec::with_capacity(live.len());
        let mut states = Vec::with_capacity(live.len());
        for hyp in live {
            last.push(
                hyp.last_token()
                    .ok_or_else(|| DecodeError::Score("hypothesis with no tokens".into()))?,
            );
            states.push(
                hyp.lm_state
                    .as_ref()
                    .ok_or_else(|| DecodeError::Score("missing lm state on live hypothesis".into()))?,
            );
        }
        let step = lm.predict(&last, &states)?;
        step.check_batch(live.len())?;
        Ok(Some((step.log_probs, step.states)))
    }

    /// Batched decoder step: per-hypothesis ensemble-averaged log
    /// probabilities plus the updated cache column for each hypothesis.
    #[allow(clippy::type_complexity)]
    fn attn_log_rows(
        &self,
        live: &[Hypothesis<D::Cache, L::State>],
        encoded: &crate::score::EncoderOutput,
    ) -> DecodeResult<(Vec<Vec<f32>>, Vec<Vec<D::Cache>>)> {
        let histories: Vec<&[u32]> = live.iter().map(|h| h.tokens.as_slice()).collect();
        #[allow(clippy::cast_precision_loss)]
        let inv = 1.0 / self.sources.len() as f32;
        let mut rows: Vec<Vec<f32>> = Vec::with_capacity(live.len());
        let mut caches: Vec<Vec<D::Cache>> =
            (0..live.len()).map(|_| Vec::with_capacity(self.sources.len())).collect();

        for (i, source) in self.sources.iter().enumerate() {
            let cache_refs: Vec<&D::Cache> = live.iter().map(|h| &h.caches[i]).collect();
            let step = source.score_step(&histories, encoded, &cache_refs)?;
            step.check_batch(live.len())?;
            for (j, logits) in step.logits.iter().enumerate() {
                if logits.is_empty() {
                    return Err(DecodeError::Score("decoder returned an empty logits row".into()));
                }
                let lp = log_softmax_scaled(logits, self.config.softmax_smoothing);
                if i == 0 {
                    rows.push(lp.into_iter().map(|v| v * inv).collect());
                } else {
                    let row = &mut rows[j];
                    if row.len() != lp.len() {
                        return Err(DecodeError::Score(format!(
                            "ensemble members disagree on vocab width: {} vs {}",
                            row.len(),
                            lp.len()
                        )));
                    }
                    for (acc, v) in row.iter_mut().zip(lp) {
                        *acc += v * inv;
                    }
                }
            }
            for (j, cache) in step.caches.into_iter().enumerate() {
                caches[j].push(cache);
            }
        }
        Ok((rows, caches))
    }

    /// Expand one parent into gated, jointly-scored children.
    fn expand(
        &self,
        parent: &Hypothesis<D::Cache, L::State>,
        rows: StepRows<'_, D::Cache, L::State>,
        scorer: Option<&CtcPrefixScorer<'_>>,
        n_frames: usize,
        out: &mut Vec<Hypothesis<D::Cache, L::State>>,
    ) -> DecodeResult<()> {
        let cfg = &self.config;
        let eos = self.symbols.eos;
        let vocab = rows.attn_row.len();
        let k = cfg.beam_width.min(vocab);
        #[allow(clippy::cast_precision_loss)]
        let emitted_next = (parent.emitted_len() + 1) as f32;

        // Coarse selection on the cumulative attention score alone.
        let coarse: Vec<f32> = rows
            .attn_row
            .iter()
            .map(|&lp| (parent.score_attn + lp) * (1.0 - cfg.ctc_weight))
            .collect();
        let picked = top_k(&coarse, k);
        #[allow(clippy::cast_possible_truncation)]
        let mut cand_tokens: Vec<u32> = picked.iter().map(|&(i, _)| i as u32).collect();
        let mut joint: Vec<f32> = picked.iter().map(|&(_, s)| s).collect();

        // LM and length-penalty terms join after the coarse cut.
        let mut lm_cum = vec![0.0f32; cand_tokens.len()];
        if let Some(lm_row) = rows.lm_row {
            for (slot, &tok) in cand_tokens.iter().enumerate() {
                let lp = lm_row.get(tok as usize).copied().ok_or_else(|| {
                    DecodeError::Score(format!("lm row has no entry for token {tok}"))
                })?;
                lm_cum[slot] = parent.score_lm + lp;
                joint[slot] += lm_cum[slot] * cfg.lm_weight;
            }
        }
        for s in &mut joint {
            *s += emitted_next * cfg.length_penalty;
        }

        // CTC refinement re-ranks the same candidates.
        let mut ctc_abs = vec![0.0f32; cand_tokens.len()];
        let mut ctc_states = Vec::new();
        if let Some(scorer) = scorer {
            let parent_state = parent
                .ctc_state
                .as_ref()
                .ok_or_else(|| DecodeError::Score("missing ctc state on live hypothesis".into()))?;
            let (scores, states) = scorer.score(&parent.tokens, &cand_tokens, parent_state)?;
            for (slot, &s) in scores.iter().enumerate() {
                joint[slot] += s * cfg.ctc_weight;
            }
            let order = argsort_desc(&joint);
            cand_tokens = reorder(&cand_tokens, &order);
            joint = reorder(&joint, &order);
            lm_cum = reorder(&lm_cum, &order);
            ctc_abs = reorder(&scores, &order);
            ctc_states = reorder(&states, &order);
        }

        let norm = if cfg.length_norm { emitted_next } else { 1.0 };
        for slot in 0..cand_tokens.len() {
            let tok = cand_tokens[slot];
            if tok == eos {
                #[allow(clippy::cast_precision_loss)]
                let min_len = n_frames as f32 * cfg.min_len_ratio;
                #[allow(clippy::cast_precision_loss)]
                let emitted = parent.emitted_len() as f32;
                if emitted < min_len {
                    continue;
                }
                let eos_lp = rows.attn_row[tok as usize];
                let best_other = rows
                    .attn_row
                    .iter()
                    .enumerate()
                    .filter(|&(i, _)| i != tok as usize)
                    .fold(f32::NEG_INFINITY, |m, (_, &v)| m.max(v));
                if eos_lp <= cfg.eos_threshold * best_other {
                    continue;
                }
            }
            let mut tokens = Vec::with_capacity(parent.tokens.len() + 1);
            tokens.extend_from_slice(&parent.tokens);
            tokens.push(tok);
            out.push(Hypothesis {
                tokens,
                score: joint[slot] / norm,
                score_attn: parent.score_attn + rows.attn_row[tok as usize],
                score_ctc: ctc_abs[slot],
                score_lm: lm_cum[slot],
                caches: rows.caches.to_vec(),
                lm_state: rows.lm_state.cloned(),
                ctc_state: if ctc_states.is_empty() {
                    None
                } else {
                    Some(ctc_states[slot].clone())
                },
                score_lm_second: None,
                score_lm_second_rev: None,
            });
        }
        Ok(())
    }

    /// Close the decode: spill, rescore, sort, write carry-over, and cut
    /// the n-best list.
    fn finalize(
        &self,
        mut finished: Vec<Hypothesis<D::Cache, L::State>>,
        live: Vec<Hypothesis<D::Cache, L::State>>,
        speaker: Option<&str>,
        carry: Option<&mut LmCarryOver<L::State>>,
    ) -> DecodeResult<Vec<FinishedHypothesis>> {
        if finished.is_empty() {
            finished = live;
        } else if finished.len() < self.config.nbest {
            let need = self.config.nbest - finished.len();
            finished.extend(live.into_iter().take(need));
        }
        if finished.is_empty() {
            finished.push(self.minimal_hypothesis());
        }

        if let Some(lm) = self.lm_second {
            rescore(&mut finished, lm, self.config.lm_second_weight, SecondPass::Forward)?;
        }
        if let Some(lm) = self.lm_second_rev {
            rescore(&mut finished, lm, self.config.lm_second_rev_weight, SecondPass::Reverse)?;
        }

        sort_desc_stable(&mut finished);

        if self.lm.is_some() {
            if let Some(carry) = carry {
                if let Some(state) = finished.first().and_then(|h| h.lm_state.clone()) {
                    carry.update(speaker, state);
                }
            }
        }

        finished.truncate(self.config.nbest);
        while finished.len() < self.config.nbest {
            match finished.last().cloned() {
                Some(h) => finished.push(h),
                None => break,
            }
        }
        crate::trace_event!(nbest = finished.len(), "beam decode done");
        Ok(finished.into_iter().map(|h| self.postprocess(h)).collect())
    }

    /// Start+end hypothesis used when nothing else survives.
    fn minimal_hypothesis(&self) -> Hypothesis<D::Cache, L::State> {
        let mut hyp = Hypothesis::start(self.symbols.eos, Vec::new(), None, None);
        hyp.tokens.push(self.symbols.eos);
        hyp
    }

    /// Strip the start symbol, resolve direction, and drop internal state.
    fn postprocess(&self, hyp: Hypothesis<D::Cache, L::State>) -> FinishedHypothesis {
        let reached_eos = hyp.tokens.len() > 1 && hyp.last_token() == Some(self.symbols.eos);
        let mut tokens = hyp.tokens[1..].to_vec();
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
        FinishedHypothesis {
            tokens,
            score: hyp.score,
            score_attn: hyp.score_attn,
            score_ctc: hyp.score_ctc,
            score_lm: hyp.score_lm,
            score_lm_second: hyp.score_lm_second,
            score_lm_second_rev: hyp.score_lm_second_rev,
            reached_eos,
        }
    }
}

/// Log-softmax of `logits * smoothing`, stabilized by max subtraction.
fn log_softmax_scaled(logits: &[f32], smoothing: f32) -> Vec<f32> {
    let scaled: Vec<f32> = logits.iter().map(|&v| v * smoothing).collect();
    let max = scaled.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = scaled.iter().map(|&v| (v - max).exp()).sum();
    let log_sum = max + sum.ln();
    scaled.iter().map(|&v| v - log_sum).collect()
}

/// Top `k` (index, score) pairs, highest first, earlier index on ties.
fn top_k(scores: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut indexed: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    indexed.truncate(k);
    indexed
}

/// Permutation sorting `scores` descending, stable on ties.
fn argsort_desc(scores: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal));
    order
}

fn reorder<T: Clone>(values: &[T], order: &[usize]) -> Vec<T> {
    order.iter().map(|&i| values[i].clone()).collect()
}

fn sort_desc_stable<C, S>(hyps: &mut [Hypothesis<C, S>]) {
    hyps.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::{EncoderOutput, StepScores};
    use crate::search::greedy::{GreedyConfig, GreedySearch};

    /// Stateless source whose logits depend only on the last token.
    struct FnSource {
        f: fn(&[u32]) -> Vec<f32>,
    }

    impl ScoreSource for FnSource {
        type Cache = ();

        fn initial_cache(&self) {}

        fn score_step(
            &self,
            histories: &[&[u32]],
            _encoded: &EncoderOutput,
            _caches: &[&()],
        ) -> DecodeResult<StepScores<()>> {
            Ok(StepScores {
                logits: histories.iter().map(|h| (self.f)(h)).collect(),
                caches: vec![(); histories.len()],
            })
        }
    }

    /// LM with scripted rows; its state records every consumed token.
    struct FnLm {
        f: fn(u32) -> Vec<f32>,
    }

    impl LanguageModel for FnLm {
        type State = Vec<u32>;

        fn initial_state(&self) -> Vec<u32> {
            Vec::new()
        }

        fn predict(
            &self,
            last_tokens: &[u32],
            states: &[&Vec<u32>],
        ) -> DecodeResult<LmStep<Vec<u32>>> {
            let log_probs = last_tokens.iter().map(|&t| (self.f)(t)).collect();
            let states = last_tokens
                .iter()
                .zip(states)
                .map(|(&t, s)| {
                    let mut next = (*s).clone();
                    next.push(t);
                    next
                })
                .collect();
            Ok(LmStep { log_probs, states })
        }
    }

    fn encoded(frames: usize) -> EncoderOutput {
        EncoderOutput::new(vec![0.0; frames * 4], frames, 4).unwrap()
    }

    fn search(config: BeamSearchConfig, source: &FnSource) -> BeamSearch<'_, FnSource> {
        BeamSearch::new(config, SpecialSymbols::asr_default(), vec![source]).unwrap()
    }

    fn last_of(h: &[u32]) -> u32 {
        *h.last().unwrap()
    }

    // ===== Config validation =====

    #[test]
    fn test_default_config_validates() {
        assert!(BeamSearchConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_rejects_bad_ranges() {
        let bad = [
            BeamSearchConfig::default().with_beam_width(0),
            BeamSearchConfig::default().with_nbest(0),
            BeamSearchConfig::default().with_beam_width(2).with_nbest(3),
            BeamSearchConfig::default().with_max_len_ratio(0.0),
            BeamSearchConfig::default().with_min_len_ratio(-0.1),
            BeamSearchConfig::default().with_max_len_ratio(0.5).with_min_len_ratio(0.6),
            BeamSearchConfig::default().with_ctc_weight(1.5),
            BeamSearchConfig::default().with_ctc_weight(-0.1),
            BeamSearchConfig::default().with_lm_weight(-1.0),
            BeamSearchConfig::default().with_length_penalty(-0.5),
            BeamSearchConfig::default().with_eos_threshold(-1.0),
            BeamSearchConfig::default().with_softmax_smoothing(0.0),
            BeamSearchConfig::default().with_max_len_ratio(f32::NAN),
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(DecodeError::Config(_))), "{config:?}");
        }
    }

    #[test]
    fn test_new_requires_sources() {
        let result: DecodeResult<BeamSearch<'_, FnSource>> =
            BeamSearch::new(BeamSearchConfig::default(), SpecialSymbols::asr_default(), vec![]);
        assert!(matches!(result, Err(DecodeError::Config(_))));
    }

    // ===== Attachment checks =====

    #[test]
    fn test_weight_without_collaborator_rejected() {
        let source = FnSource { f: |_| vec![0.0; 5] };
        let enc = encoded(3);

        let engine = search(BeamSearchConfig::default().with_ctc_weight(0.5), &source);
        let err = engine.decode(&Utterance::new(&enc), None).unwrap_err();
        assert!(matches!(err, DecodeError::Config(_)));

        let engine = search(BeamSearchConfig::default().with_lm_weight(0.5), &source);
        let err = engine.decode(&Utterance::new(&enc), None).unwrap_err();
        assert!(matches!(err, DecodeError::Config(_)));
    }

    #[test]
    fn test_collaborator_without_weight_rejected() {
        let source = FnSource { f: |_| vec![0.0; 5] };
        let enc = encoded(3);
        let lattice = EmissionLattice::new(vec![-1.0; 15], 3, 5).unwrap();

        let engine = search(BeamSearchConfig::default(), &source);
        let utt = Utterance::new(&enc).with_ctc_lattice(&lattice);
        let err = engine.decode(&utt, None).unwrap_err();
        assert!(matches!(err, DecodeError::Config(_)));

        let lm = FnLm { f: |_| vec![0.0; 5] };
        let engine = BeamSearch::new(
            BeamSearchConfig::default(),
            SpecialSymbols::asr_default(),
            vec![&source],
        )
        .unwrap()
        .with_lm(&lm);
        let err = engine.decode(&Utterance::new(&enc), None).unwrap_err();
        assert!(matches!(err, DecodeError::Config(_)));
    }

    #[test]
    fn test_lattice_frame_mismatch_rejected() {
        let source = FnSource { f: |_| vec![0.0; 5] };
        let enc = encoded(3);
        let lattice = EmissionLattice::new(vec![-1.0; 20], 4, 5).unwrap();
        let engine = search(BeamSearchConfig::default().with_ctc_weight(0.5), &source);
        let utt = Utterance::new(&enc).with_ctc_lattice(&lattice);
        let err = engine.decode(&utt, None).unwrap_err();
        assert!(matches!(err, DecodeError::Lattice(_)));
    }

    #[test]
    fn test_oracle_without_reference_rejected() {
        let source = FnSource { f: |_| vec![0.0; 5] };
        let enc = encoded(3);
        let engine = search(BeamSearchConfig::default().with_oracle(true), &source);
        let err = engine.decode(&Utterance::new(&enc), None).unwrap_err();
        assert!(matches!(err, DecodeError::Config(_)));
    }

    // ===== Core search behavior =====

    fn two_step_rows(h: &[u32]) -> Vec<f32> {
        if last_of(h) == 2 {
            vec![0.0, 0.0, -10.0, 2.0, 5.0]
        } else {
            vec![-5.0, -5.0, 8.0, -5.0, -5.0]
        }
    }

    #[test]
    fn test_returns_exactly_nbest_ending_in_eos() {
        let source = FnSource { f: two_step_rows };
        let config = BeamSearchConfig::default().with_beam_width(3).with_nbest(2);
        let engine = search(config, &source);
        let enc = encoded(10);
        let out = engine.decode(&Utterance::new(&enc), None).unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].tokens, vec![4, 2]);
        assert_eq!(out[1].tokens, vec![3, 2]);
        assert!(out.iter().all(|h| h.reached_eos));
        assert!(out[0].score >= out[1].score);
    }

    fn forked_rows(h: &[u32]) -> Vec<f32> {
        match last_of(h) {
            2 => vec![0.0, 0.0, -10.0, 2.0, 1.9],
            4 => vec![-9.0, -9.0, 9.0, -9.0, -9.0],
            _ => vec![0.0, 0.0, 1.0, -9.0, -9.0],
        }
    }

    #[test]
    fn test_wider_beam_never_scores_worse() {
        let source = FnSource { f: forked_rows };
        let enc = encoded(4);

        let narrow = search(BeamSearchConfig::default().with_beam_width(1), &source);
        let best1 = narrow.decode(&Utterance::new(&enc), None).unwrap().remove(0);
        assert_eq!(best1.tokens, vec![3, 2]);

        let wide = search(BeamSearchConfig::default().with_beam_width(3), &source);
        let best3 = wide.decode(&Utterance::new(&enc), None).unwrap().remove(0);
        assert_eq!(best3.tokens, vec![4, 2]);
        assert!(best3.score >= best1.score);
    }

    #[test]
    fn test_single_beam_matches_greedy() {
        let source = FnSource { f: forked_rows };
        let enc = encoded(4);

        let engine = search(BeamSearchConfig::default().with_beam_width(1), &source);
        let beam_tokens = engine.decode(&Utterance::new(&enc), None).unwrap().remove(0).tokens;

        let greedy =
            GreedySearch::new(GreedyConfig::default(), SpecialSymbols::asr_default(), &source)
                .unwrap();
        let greedy_tokens = greedy.decode(&Utterance::new(&enc)).unwrap().tokens;

        assert_eq!(beam_tokens, greedy_tokens);
    }

    #[test]
    fn test_min_len_ratio_delays_eos() {
        let source = FnSource { f: |_| vec![0.0, 0.0, 9.0, 0.0, 0.0] };
        let config = BeamSearchConfig::default()
            .with_beam_width(3)
            .with_nbest(3)
            .with_min_len_ratio(0.5);
        let engine = search(config, &source);
        let enc = encoded(4);
        let out = engine.decode(&Utterance::new(&enc), None).unwrap();

        assert_eq!(out.len(), 3);
        for hyp in &out {
            assert!(hyp.reached_eos);
            // Two emitted tokens before eos satisfy 4 frames * 0.5.
            assert_eq!(hyp.tokens.len(), 3);
            assert_eq!(*hyp.tokens.last().unwrap(), 2);
        }
    }

    #[test]
    fn test_tied_scores_keep_first_enumerated_order() {
        let source = FnSource {
            f: |h| {
                if last_of(h) == 2 {
                    vec![3.0, 3.0, -10.0, 0.0, 0.0]
                } else {
                    vec![-5.0, -5.0, 8.0, -5.0, -5.0]
                }
            },
        };
        let config = BeamSearchConfig::default().with_beam_width(2).with_nbest(2);
        let engine = search(config, &source);
        let enc = encoded(6);

        let first = engine.decode(&Utterance::new(&enc), None).unwrap();
        let second = engine.decode(&Utterance::new(&enc), None).unwrap();

        assert_eq!(first[0].tokens, vec![0, 2]);
        assert_eq!(first[1].tokens, vec![1, 2]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_length_penalty_and_norm_arithmetic() {
        let source = FnSource {
            f: |h| {
                if last_of(h) == 2 {
                    vec![-20.0, -20.0, -20.0, 3.0, -20.0]
                } else {
                    vec![-20.0, -20.0, 2.0, -20.0, -20.0]
                }
            },
        };
        let config = BeamSearchConfig::default()
            .with_beam_width(1)
            .with_length_penalty(0.7)
            .with_length_norm(true);
        let engine = search(config, &source);
        let enc = encoded(3);
        let out = engine.decode(&Utterance::new(&enc), None).unwrap().remove(0);

        assert_eq!(out.tokens, vec![3, 2]);
        // Attention terms vanish; the joint is two length rewards over len 2.
        assert!((out.score - 0.7).abs() < 1e-4);
        assert!(out.score_attn.abs() < 1e-3);
    }

    #[test]
    fn test_spills_live_beam_when_budget_ends() {
        let source = FnSource { f: |_| vec![5.0, 0.0, -20.0, 0.0, 0.0] };
        let config = BeamSearchConfig::default().with_beam_width(2).with_nbest(2);
        let engine = search(config, &source);
        let enc = encoded(2);
        let out = engine.decode(&Utterance::new(&enc), None).unwrap();

        assert_eq!(out.len(), 2);
        for hyp in &out {
            assert!(!hyp.reached_eos);
            assert_eq!(hyp.tokens.len(), 3);
        }
    }

    #[test]
    fn test_zero_frames_yields_minimal_hypothesis() {
        let source = FnSource { f: |_| vec![0.0; 5] };
        let config = BeamSearchConfig::default().with_beam_width(2).with_nbest(2);
        let engine = search(config, &source);
        let enc = EncoderOutput::empty(4);
        let out = engine.decode(&Utterance::new(&enc), None).unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].tokens, vec![2]);
        assert_eq!(out[0], out[1]);
        assert!(out[0].reached_eos);
        assert_eq!(out[0].score, 0.0);

        let engine =
            search(BeamSearchConfig::default().with_exclude_eos(true), &source);
        let out = engine.decode(&Utterance::new(&enc), None).unwrap();
        assert!(out[0].tokens.is_empty());
        assert!(out[0].reached_eos);
    }

    #[test]
    fn test_pads_nbest_by_duplicating_worst() {
        let source = FnSource {
            f: |h| {
                if last_of(h) == 1 {
                    vec![2.0, -1.0]
                } else {
                    vec![-3.0, 2.0]
                }
            },
        };
        let symbols = SpecialSymbols::new(1, 0, 0, 0);
        let config = BeamSearchConfig::default().with_beam_width(3).with_nbest(3);
        let engine = BeamSearch::<'_, FnSource>::new(config, symbols, vec![&source]).unwrap();
        let enc = encoded(1);
        let out = engine.decode(&Utterance::new(&enc), None).unwrap();

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].tokens, vec![0, 1]);
        assert!(out[0].reached_eos);
        assert_eq!(out[1].tokens, vec![0, 0]);
        assert_eq!(out[1], out[2]);
    }

    #[test]
    fn test_backward_direction_restores_surface_order() {
        let source = FnSource {
            f: |h| match last_of(h) {
                2 => vec![-20.0, -20.0, -20.0, -20.0, 5.0],
                4 => vec![-20.0, -20.0, -20.0, 5.0, -20.0],
                _ => vec![-20.0, -20.0, 5.0, -20.0, -20.0],
            },
        };
        let enc = encoded(5);

        let config = BeamSearchConfig::default()
            .with_beam_width(1)
            .with_direction(Direction::Backward);
        let engine = search(config, &source);
        let out = engine.decode(&Utterance::new(&enc), None).unwrap().remove(0);
        assert_eq!(out.tokens, vec![2, 3, 4]);
        assert!(out.reached_eos);

        let config = config.with_exclude_eos(true);
        let engine = search(config, &source);
        let out = engine.decode(&Utterance::new(&enc), None).unwrap().remove(0);
        assert_eq!(out.tokens, vec![3, 4]);
    }

    #[test]
    fn test_oracle_closes_beam_at_reference_length() {
        let source = FnSource {
            f: |h| match last_of(h) {
                2 => vec![0.0, 0.0, -10.0, 1.0, 2.0],
                4 => vec![1.0, 0.0, -10.0, 2.0, 0.0],
                _ => vec![2.0, 1.0, -10.0, 0.0, 0.0],
            },
        };
        let config = BeamSearchConfig::default()
            .with_beam_width(2)
            .with_nbest(2)
            .with_oracle(true);
        let engine = search(config, &source);
        let enc = encoded(10);
        let reference = [3u32, 4];
        let utt = Utterance::new(&enc).with_reference(&reference);
        let out = engine.decode(&utt, None).unwrap();

        assert_eq!(out.len(), 2);
        for hyp in &out {
            assert_eq!(hyp.tokens.len(), 3);
            assert!(!hyp.reached_eos);
        }
    }

    #[test]
    fn test_deadline_finalizes_normally() {
        let source = FnSource { f: two_step_rows };
        let config = BeamSearchConfig::default()
            .with_beam_width(1)
            .with_deadline(Duration::ZERO);
        let engine = search(config, &source);
        let enc = encoded(10);
        let out = engine.decode(&Utterance::new(&enc), None).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tokens, vec![4]);
        assert!(!out[0].reached_eos);
    }

    // ===== Joint CTC scoring =====

    fn ab_lattice() -> EmissionLattice {
        // blank, unk, eos, A, B columns; A-dominant middle frame.
        let probs: [[f32; 5]; 3] = [
            [0.8, 1e-7, 1e-7, 0.15, 0.05],
            [0.1, 1e-7, 1e-7, 0.8, 0.1],
            [0.8, 1e-7, 1e-7, 0.15, 0.05],
        ];
        let rows: Vec<Vec<f32>> =
            probs.iter().map(|r| r.iter().map(|p| p.ln()).collect()).collect();
        EmissionLattice::from_rows(&rows).unwrap()
    }

    fn ab_rows(h: &[u32]) -> Vec<f32> {
        if last_of(h) == 2 {
            vec![-20.0, -20.0, -20.0, 0.0, 0.05]
        } else {
            vec![-20.0, -20.0, 2.0, -20.0, -20.0]
        }
    }

    #[test]
    fn test_ctc_refinement_reorders_candidates() {
        let source = FnSource { f: ab_rows };
        let enc = encoded(3);
        let lattice = ab_lattice();

        let config = BeamSearchConfig::default()
            .with_beam_width(2)
            .with_nbest(2)
            .with_ctc_weight(0.5);
        let engine = search(config, &source);
        let utt = Utterance::new(&enc).with_ctc_lattice(&lattice);
        let out = engine.decode(&utt, None).unwrap();

        // Attention alone prefers B; lattice mass flips the ranking to A.
        assert_eq!(out[0].tokens, vec![3, 2]);
        assert_eq!(out[1].tokens, vec![4, 2]);
        assert!((out[0].score_ctc - 0.746f32.ln()).abs() < 1e-2);
        assert!((out[0].score - (-0.5057)).abs() < 1e-3);

        let engine = search(BeamSearchConfig::default().with_beam_width(2), &source);
        let out = engine.decode(&Utterance::new(&enc), None).unwrap();
        assert_eq!(out[0].tokens, vec![4, 2]);
    }

    // ===== Shallow fusion =====

    #[test]
    fn test_shallow_fusion_reranks_and_accumulates() {
        let source = FnSource { f: ab_rows };
        let lm = FnLm {
            f: |t| {
                if t == 2 {
                    vec![-9.0, -9.0, -9.0, -0.1, -3.0]
                } else {
                    vec![-9.0, -9.0, -0.2, -9.0, -9.0]
                }
            },
        };
        let config = BeamSearchConfig::default()
            .with_beam_width(2)
            .with_lm_weight(1.0);
        let engine = BeamSearch::new(config, SpecialSymbols::asr_default(), vec![&source])
            .unwrap()
            .with_lm(&lm);
        let enc = encoded(3);
        let out = engine.decode(&Utterance::new(&enc), None).unwrap().remove(0);

        assert_eq!(out.tokens, vec![3, 2]);
        assert!((out.score_lm - (-0.3)).abs() < 1e-3);
    }

    #[test]
    fn test_lm_state_carries_across_same_speaker() {
        let source = FnSource { f: two_step_rows };
        let lm = FnLm { f: |_| vec![0.0; 5] };
        let config = BeamSearchConfig::default().with_beam_width(1).with_lm_weight(0.5);
        let engine = BeamSearch::new(config, SpecialSymbols::asr_default(), vec![&source])
            .unwrap()
            .with_lm(&lm);
        let enc = encoded(10);
        let mut carry = LmCarryOver::new();

        let utt = Utterance::new(&enc).with_speaker("a");
        engine.decode(&utt, Some(&mut carry)).unwrap();
        assert_eq!(carry.state_for(Some("a")), Some(&vec![2, 4]));

        engine.decode(&utt, Some(&mut carry)).unwrap();
        assert_eq!(carry.state_for(Some("a")), Some(&vec![2, 4, 2, 4]));

        let utt_b = Utterance::new(&enc).with_speaker("b");
        engine.decode(&utt_b, Some(&mut carry)).unwrap();
        assert_eq!(carry.state_for(Some("b")), Some(&vec![2, 4]));
        assert!(carry.state_for(Some("a")).is_none());
    }

    // ===== Second-pass rescoring =====

    #[test]
    fn test_second_pass_lm_moves_joint_score() {
        let source = FnSource { f: two_step_rows };
        let lm = FnLm { f: |_| vec![-0.5; 5] };
        let config = BeamSearchConfig::default()
            .with_beam_width(1)
            .with_lm_second_weight(2.0);
        let engine = BeamSearch::new(config, SpecialSymbols::asr_default(), vec![&source])
            .unwrap()
            .with_second_pass_lm(&lm);
        let enc = encoded(10);
        let out = engine.decode(&Utterance::new(&enc), None).unwrap().remove(0);

        // Raw tokens [2, 4, 2] make two LM transitions of -0.5 each.
        assert_eq!(out.tokens, vec![4, 2]);
        assert_eq!(out.score_lm_second, Some(-1.0));
        assert!((out.score - (out.score_attn + 2.0 * (-1.0))).abs() < 1e-4);
        assert!(out.score_lm_second_rev.is_none());
    }

    // ===== Ensemble =====

    #[test]
    fn test_ensemble_averages_member_scores() {
        let a = FnSource {
            f: |h| {
                if last_of(h) == 2 {
                    vec![-9.0, -9.0, -9.0, 2.0, 0.0]
                } else {
                    vec![-9.0, -9.0, 9.0, -9.0, -9.0]
                }
            },
        };
        let b = FnSource {
            f: |h| {
                if last_of(h) == 2 {
                    vec![-9.0, -9.0, -9.0, 0.0, 2.2]
                } else {
                    vec![-9.0, -9.0, 9.0, -9.0, -9.0]
                }
            },
        };
        let enc = encoded(4);

        let solo = search(BeamSearchConfig::default().with_beam_width(1), &a);
        let out = solo.decode(&Utterance::new(&enc), None).unwrap().remove(0);
        assert_eq!(out.tokens, vec![3, 2]);

        let pair: BeamSearch<'_, FnSource> = BeamSearch::new(
            BeamSearchConfig::default().with_beam_width(1),
            SpecialSymbols::asr_default(),
            vec![&a, &b],
        )
        .unwrap();
        let out = pair.decode(&Utterance::new(&enc), None).unwrap().remove(0);
        assert_eq!(out.tokens, vec![4, 2]);
    }

    // ===== NullLm =====

    #[test]
    fn test_null_lm_refuses_prediction() {
        let lm = NullLm;
        assert!(lm.predict(&[2], &[&()]).is_err());
    }
}
