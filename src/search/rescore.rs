//! Second-pass language-model rescoring.
//!
//! After the beam finishes, a stronger LM can re-read each finalized token
//! sequence in one shot and shift the joint scores before the n-best list
//! is sorted. A forward LM reads the sequence as emitted; a reverse LM,
//! trained right-to-left, reads it reversed. Both passes leave the tokens
//! untouched and record their raw log probability on the hypothesis so the
//! contributions stay inspectable.

use crate::error::DecodeResult;
use crate::score::LanguageModel;
use crate::search::hypothesis::Hypothesis;

/// Which way the second-pass LM reads the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondPass {
    /// Sequence in emitted order, for a left-to-right LM.
    Forward,
    /// Sequence reversed, for a right-to-left LM.
    Reverse,
}

/// Rescore finalized hypotheses in place.
///
/// For each hypothesis this scores the full token sequence with `lm`, adds
/// `weight * log_prob` to the joint score, and records the raw log
/// probability under the field matching `pass`. Applying a pass with
/// weight 0 records the component without moving any score.
///
/// # Errors
/// Returns the first LM failure; hypotheses before it keep their updated
/// scores.
pub fn rescore<C, S, L>(
    hyps: &mut [Hypothesis<C, S>],
    lm: &L,
    weight: f32,
    pass: SecondPass,
) -> DecodeResult<()>
where
    L: LanguageModel,
{
    for hyp in hyps.iter_mut() {
        let log_prob = match pass {
            SecondPass::Forward => lm.score_sequence(&hyp.tokens)?,
            SecondPass::Reverse => {
                let mut reversed = hyp.tokens.clone();
                reversed.reverse();
                lm.score_sequence(&reversed)?
            }
        };
        hyp.score += weight * log_prob;
        match pass {
            SecondPass::Forward => hyp.score_lm_second = Some(log_prob),
            SecondPass::Reverse => hyp.score_lm_second_rev = Some(log_prob),
        }
    }
    Ok(())
}
