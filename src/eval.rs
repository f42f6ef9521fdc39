//! Decode-output evaluation: edit distance and accumulated error rates.
//!
//! The same machinery serves word- and character-level rates; callers pick
//! the token granularity before calling in.

/// Levenshtein distance between two token slices (unit costs).
#[must_use]
pub fn edit_distance<T: PartialEq>(hyp: &[T], reference: &[T]) -> usize {
    if hyp.is_empty() {
        return reference.len();
    }
    if reference.is_empty() {
        return hyp.len();
    }

    // Two-row DP over the reference axis.
    let mut prev: Vec<usize> = (0..=reference.len()).collect();
    let mut cur = vec![0usize; reference.len() + 1];
    for (i, h) in hyp.iter().enumerate() {
        cur[0] = i + 1;
        for (j, r) in reference.iter().enumerate() {
            let substitution = prev[j] + usize::from(h != r);
            let insertion = cur[j] + 1;
            let deletion = prev[j + 1] + 1;
            cur[j + 1] = substitution.min(insertion).min(deletion);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[reference.len()]
}

/// Accumulates edit errors against reference lengths across utterances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorRateMeter {
    errors: usize,
    ref_tokens: usize,
    n_utterances: usize,
}

impl ErrorRateMeter {
    /// Fresh meter with nothing observed.
    #[must_use]
    pub const fn new() -> Self {
        Self { errors: 0, ref_tokens: 0, n_utterances: 0 }
    }

    /// Score one hypothesis against its reference.
    pub fn observe<T: PartialEq>(&mut self, hyp: &[T], reference: &[T]) {
        self.errors += edit_distance(hyp, reference);
        self.ref_tokens += reference.len();
        self.n_utterances += 1;
    }

    /// Total edit errors observed.
    #[must_use]
    pub const fn errors(&self) -> usize {
        self.errors
    }

    /// Utterances observed.
    #[must_use]
    pub const fn n_utterances(&self) -> usize {
        self.n_utterances
    }

    /// Errors over total reference tokens.
    ///
    /// With no reference tokens at all, an error-free meter reads 0 and any
    /// insertion pushes the rate to infinity.
    #[must_use]
    pub fn error_rate(&self) -> f32 {
        if self.ref_tokens == 0 {
            return if self.errors == 0 { 0.0 } else { f32::INFINITY };
        }
        #[allow(clippy::cast_precision_loss)]
        {
            self.errors as f32 / self.ref_tokens as f32
        }
    }
}
