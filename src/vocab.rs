//! Special-symbol table shared by every decoding component.
//!
//! The vocabulary itself is external; the decode loop only needs the handful
//! of reserved token ids. Following the original convention the end symbol
//! doubles as the start symbol: every hypothesis begins with `eos` and a
//! hypothesis is finished when it emits `eos` again.

use crate::error::{DecodeError, DecodeResult};

/// Reserved token ids used by the search and CTC scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpecialSymbols {
    /// End-of-sequence id; also used as the start symbol.
    pub eos: u32,
    /// Unknown-token id.
    pub unk: u32,
    /// Padding id (batching collaborators only; never emitted by the search).
    pub pad: u32,
    /// CTC blank id.
    pub blank: u32,
}

impl SpecialSymbols {
    /// Create a symbol table with the given reserved ids.
    #[must_use]
    pub const fn new(eos: u32, unk: u32, pad: u32, blank: u32) -> Self {
        Self { eos, unk, pad, blank }
    }

    /// The conventional layout: blank 0, unk 1, eos 2, pad 3.
    #[must_use]
    pub const fn asr_default() -> Self {
        Self { eos: 2, unk: 1, pad: 3, blank: 0 }
    }

    /// Reject tables the scorers cannot work with.
    ///
    /// The CTC prefix recursion treats blank and eos as distinct lattice
    /// roles, so they must not share an id.
    pub fn validate(&self) -> DecodeResult<()> {
        if self.blank == self.eos {
            return Err(DecodeError::Vocabulary(format!(
                "blank and eos must be distinct, both are {}",
                self.blank
            )));
        }
        Ok(())
    }
}

impl Default for SpecialSymbols {
    fn default() -> Self {
        Self::asr_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let sym = SpecialSymbols::default();
        assert_eq!(sym.blank, 0);
        assert_eq!(sym.unk, 1);
        assert_eq!(sym.eos, 2);
        assert_eq!(sym.pad, 3);
    }

    #[test]
    fn test_validate_accepts_default() {
        assert!(SpecialSymbols::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_blank_eos_collision() {
        let sym = SpecialSymbols::new(0, 1, 3, 0);
        let err = sym.validate().expect_err("collision must be rejected");
        assert!(matches!(err, DecodeError::Vocabulary(_)));
    }
}
