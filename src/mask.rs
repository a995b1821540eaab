//! Evaluation masks.
//!
//! A mask restricts an estimate call to the indices an objective actually
//! reads: per order, one bitset over probability indices and one over
//! back-off histories. Masks are seeded with the directly-read indices
//! and expanded by each estimator with its transitive requirements, so a
//! masked estimate reproduces the full estimate exactly at every seeded
//! index.

/// Per-order prob/bow bitsets for a smoothed n-gram model.
#[derive(Clone, Debug, Default)]
pub struct LmMask {
    /// `probs[o][i]`: probability at order `o`, index `i`, must be valid.
    pub probs: Vec<Vec<bool>>,
    /// `bows[o][h]`: back-off weight of history `h` at order `o` must be
    /// valid.
    pub bows: Vec<Vec<bool>>,
}

impl LmMask {
    pub fn new(probs: Vec<Vec<bool>>, bows: Vec<Vec<bool>>) -> Self {
        LmMask { probs, bows }
    }
}

/// Mask of an interpolated model: the merged prob/bow bitsets, the
/// per-history weight bitsets, and one expanded mask per component.
#[derive(Clone, Debug, Default)]
pub struct InterpolationMask {
    pub probs: Vec<Vec<bool>>,
    pub bows: Vec<Vec<bool>>,
    /// `weights[o][h]`: the mixture weight of history `h` at order `o`
    /// feeds a masked probability at order `o + 1`.
    pub weights: Vec<Vec<bool>>,
    pub components: Vec<LmMask>,
}

#[cfg(test)]
mod test {
    use super::LmMask;

    #[test]
    fn default_mask_is_empty() {
        let mask = LmMask::default();
        assert!(mask.probs.is_empty());
        assert!(mask.bows.is_empty());
    }
}
