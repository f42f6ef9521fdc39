//! # Beamfuse
//!
//! Joint attention/CTC/LM beam-search decoding core for sequence-to-sequence
//! speech recognition.
//!
//! ## Overview
//!
//! Beamfuse turns per-step decoder scores into transcripts. The model side
//! stays behind three small traits (`ScoreSource`, `LanguageModel`,
//! `Encoder`), so the engine runs against any autoregressive decoder that
//! can score one step for a batch of hypotheses:
//! - Label-synchronous beam search fusing attention, CTC prefix, and
//!   shallow LM scores, with length penalty/normalization, end-symbol
//!   gating, and n-best output
//! - CTC prefix scoring with incremental per-hypothesis state, plus full
//!   forward-algorithm sequence scoring and best-path alignment
//! - Greedy decoding, second-pass LM rescoring (forward and reverse),
//!   decoder ensembles, oracle mode, and right-to-left decoders
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use beamfuse::{BeamSearch, BeamSearchConfig, SpecialSymbols, Utterance};
//!
//! let config = BeamSearchConfig::default()
//!     .with_beam_width(10)
//!     .with_nbest(5)
//!     .with_ctc_weight(0.3);
//! let search: BeamSearch<MyDecoder> =
//!     BeamSearch::new(config, SpecialSymbols::asr_default(), vec![&decoder])?;
//! let utt = Utterance::new(&encoded).with_ctc_lattice(&lattice);
//! let nbest = search.decode(&utt, None)?;
//! println!("{:?}", nbest[0].tokens);
//! ```
//!
//! ## Features
//!
//! - `serde`: Serde derives on configuration and output types
//! - `tracing`: Decode-loop spans and events via tracing

#![warn(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod align;
pub mod ctc;
pub mod error;
pub mod eval;
pub mod score;
pub mod search;
#[macro_use]
pub mod trace;
pub mod vocab;

pub use ctc::EmissionLattice;
pub use error::{DecodeError, DecodeResult};
pub use score::{Encoder, EncoderOutput, LanguageModel, ScoreSource};
pub use search::{
    BeamSearch, BeamSearchConfig, Direction, FinishedHypothesis, GreedyConfig, GreedyOutput,
    GreedySearch, LmCarryOver, NullLm, Utterance,
};
pub use vocab::SpecialSymbols;
