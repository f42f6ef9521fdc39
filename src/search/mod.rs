//! Decoding front-ends over encoder output.
//!
//! Drives attention-style score sources (optionally fused with a CTC
//! emission lattice and a language model) to produce token sequences.
//!
//! # Modules
//!
//! - [`beam`] - Beam search with joint attention/CTC/LM scoring
//! - [`greedy`] - Single-path argmax decoding
//! - [`hypothesis`] - Beam records and finalized n-best entries
//! - [`rescore`] - Second-pass language-model rescoring

pub mod beam;
pub mod greedy;
pub mod hypothesis;
pub mod rescore;

pub use beam::{BeamSearch, BeamSearchConfig, NullLm};
pub use greedy::{GreedyConfig, GreedyOutput, GreedySearch};
pub use hypothesis::{FinishedHypothesis, Hypothesis};
pub use rescore::{rescore, SecondPass};

use crate::ctc::EmissionLattice;
use crate::score::EncoderOutput;

/// Generation order of the decoder being driven.
///
/// A backward decoder was trained right-to-left; the search feeds it a
/// time-reversed CTC lattice and restores surface order on output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    /// Left-to-right generation.
    #[default]
    Forward,
    /// Right-to-left generation.
    Backward,
}

impl Direction {
    /// Whether this is the right-to-left direction.
    #[must_use]
    pub const fn is_backward(self) -> bool {
        matches!(self, Self::Backward)
    }
}

/// One utterance worth of decode input.
///
/// Only the encoder output is mandatory; the lattice feeds joint CTC
/// scoring, the speaker tag keys LM state carry-over, and the reference
/// enables oracle decoding.
#[derive(Debug, Clone, Copy)]
pub struct Utterance<'a> {
    /// Encoder output frames.
    pub encoded: &'a EncoderOutput,
    /// CTC emission lattice aligned with `encoded`, if available.
    pub ctc_lattice: Option<&'a EmissionLattice>,
    /// Speaker tag for cross-utterance LM state carry-over.
    pub speaker: Option<&'a str>,
    /// Reference transcript (no start or end symbol) for oracle decoding.
    pub reference: Option<&'a [u32]>,
}

impl<'a> Utterance<'a> {
    /// Utterance with just encoder output.
    #[must_use]
    pub const fn new(encoded: &'a EncoderOutput) -> Self {
        Self {
            encoded,
            ctc_lattice: None,
            speaker: None,
            reference: None,
        }
    }

    /// Attach a CTC emission lattice.
    #[must_use]
    pub const fn with_ctc_lattice(mut self, lattice: &'a EmissionLattice) -> Self {
        self.ctc_lattice = Some(lattice);
        self
    }

    /// Attach a speaker tag.
    #[must_use]
    pub const fn with_speaker(mut self, speaker: &'a str) -> Self {
        self.speaker = Some(speaker);
        self
    }

    /// Attach a reference transcript.
    #[must_use]
    pub const fn with_reference(mut self, reference: &'a [u32]) -> Self {
        self.reference = Some(reference);
        self
    }
}

/// Language-model state carried across utterances of one speaker.
///
/// The beam search reads the stored state when the incoming speaker tag
/// matches the stored one, and overwrites it with the best hypothesis'
/// final state after each successful decode. A speaker change starts from
/// a fresh LM state.
#[derive(Debug, Clone)]
pub struct LmCarryOver<S> {
    speaker: Option<String>,
    state: Option<S>,
}

impl<S> LmCarryOver<S> {
    /// Empty carry-over: no speaker, no state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            speaker: None,
            state: None,
        }
    }

    /// Stored state, if it belongs to `speaker`.
    #[must_use]
    pub fn state_for(&self, speaker: Option<&str>) -> Option<&S> {
        if self.speaker.as_deref() == speaker {
            self.state.as_ref()
        } else {
            None
        }
    }

    /// Replace the stored state and its owning speaker.
    pub fn update(&mut self, speaker: Option<&str>, state: S) {
        self.speaker = speaker.map(str::to_owned);
        self.state = Some(state);
    }

    /// Drop any stored state.
    pub fn reset(&mut self) {
        self.speaker = None;
        self.state = None;
    }
}

impl<S> Default for LmCarryOver<S> {
    fn default() -> Self {
        Self::new()
    }
}
