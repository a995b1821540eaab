//! Probability estimators for one n-gram order.
//!
//! The set of smoothing algorithms is closed, so dispatch is a tagged
//! enum rather than a trait object and the per-order estimation loops
//! stay monomorphic. Estimators never hold a reference to the language
//! model; everything they read arrives through an [`OrderView`]
//! projection, and inadmissible parameters are signalled by returning
//! `false` so the optimizer can treat the point as infinitely bad.

mod kneser_ney;
mod max_likelihood;

pub use kneser_ney::KneserNey;
pub use max_likelihood::MaxLikelihood;

use crate::mask::LmMask;
use crate::types::{Count, NgramIdx, Param, Prob};
use crate::{Error, Result};

/// Read-only projection of one order of a language model, handed to the
/// estimators instead of a back-reference to the model itself.
pub struct OrderView<'a> {
    pub order: usize,
    pub is_top: bool,
    pub vocab_fixed: bool,
    /// Number of histories, i.e. the size of order - 1.
    pub num_hists: usize,
    pub hists: &'a [NgramIdx],
    pub backoffs: &'a [NgramIdx],
    pub counts: &'a [Count],
    /// Counts of order + 1; empty at the top order.
    pub ho_counts: &'a [Count],
    /// Back-off indices of order + 1; empty at the top order.
    pub ho_backoffs: &'a [NgramIdx],
    /// N-gram weighting feature vectors aligned with this order.
    pub features: &'a [Vec<f64>],
}

#[derive(Clone, Debug)]
pub enum Smoothing {
    MaxLikelihood(MaxLikelihood),
    KneserNey(KneserNey),
}

impl Smoothing {
    /// Parses a smoothing name: `ML`, `KN`, `ModKN`, `KN<d>`, or any of
    /// the Kneser-Ney spellings prefixed with `Fix` to freeze the
    /// discounts at their count-estimated defaults.
    pub fn parse(spec: &str) -> Result<Self> {
        if spec == "ML" {
            return Ok(Smoothing::MaxLikelihood(MaxLikelihood::default()));
        }
        let (name, tuned) = match spec.strip_prefix("Fix") {
            Some(rest) => (rest, false),
            None => (spec, true),
        };
        let disc_order = match name {
            "KN" => 1,
            "ModKN" => 3,
            _ => match name.strip_prefix("KN").and_then(|d| d.parse::<usize>().ok()) {
                Some(d) if d > 0 => d,
                _ => return Err(Error::UnknownSmoothing(spec.to_string())),
            },
        };
        Ok(Smoothing::KneserNey(KneserNey::new(disc_order, tuned)))
    }

    /// Precomputes order-local quantities: adjusted counts, history sums
    /// and default discounts.
    pub fn initialize(&mut self, view: &OrderView) {
        match self {
            Smoothing::MaxLikelihood(ml) => ml.initialize(view),
            Smoothing::KneserNey(kn) => kn.initialize(view),
        }
    }

    pub fn default_params(&self) -> &[Param] {
        match self {
            Smoothing::MaxLikelihood(ml) => ml.default_params(),
            Smoothing::KneserNey(kn) => kn.default_params(),
        }
    }

    /// Expands the mask with this order's transitive requirements.
    pub fn update_mask(&self, view: &OrderView, mask: &mut LmMask) {
        match self {
            // Maximum likelihood reads nothing below its own order.
            Smoothing::MaxLikelihood(_) => {}
            Smoothing::KneserNey(_) => {
                let order = view.order;
                let (lo_masks, hi_masks) = mask.probs.split_at_mut(order);
                let prob_mask = &hi_masks[0];
                let bo_prob_mask = &mut lo_masks[order - 1];
                let bo_bow_mask = &mut mask.bows[order - 1];
                for (i, &set) in prob_mask.iter().enumerate() {
                    if set {
                        bo_prob_mask[view.backoffs[i] as usize] = true;
                        bo_bow_mask[view.hists[i] as usize] = true;
                    }
                }
            }
        }
    }

    /// Fills `probs` (this order) and `bows` (order - 1). Returns `false`
    /// when `params` fall outside the admissible region.
    pub fn estimate(
        &mut self,
        view: &OrderView,
        params: &[Param],
        mask: Option<&LmMask>,
        lo_probs: &[Prob],
        probs: &mut [Prob],
        bows: &mut [Prob],
    ) -> bool {
        match self {
            Smoothing::MaxLikelihood(ml) => ml.estimate(view, mask, probs, bows),
            Smoothing::KneserNey(kn) => kn.estimate(view, params, mask, lo_probs, probs, bows),
        }
    }

    /// Adjusted counts, for estimators that compute them.
    pub fn eff_counts(&self) -> Option<&[Count]> {
        match self {
            Smoothing::MaxLikelihood(_) => None,
            Smoothing::KneserNey(kn) => Some(kn.eff_counts()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::Smoothing;

    #[test]
    fn parses_the_smoothing_family() {
        assert!(matches!(
            Smoothing::parse("ML").unwrap(),
            Smoothing::MaxLikelihood(_)
        ));
        for (spec, disc_order, tuned) in [
            ("KN", 1, true),
            ("ModKN", 3, true),
            ("KN2", 2, true),
            ("FixKN", 1, false),
            ("FixModKN", 3, false),
            ("FixKN4", 4, false),
        ] {
            match Smoothing::parse(spec).unwrap() {
                Smoothing::KneserNey(kn) => {
                    assert_eq!(kn.disc_order(), disc_order, "{spec}");
                    assert_eq!(kn.is_tuned(), tuned, "{spec}");
                }
                other => panic!("{spec} parsed to {other:?}"),
            }
        }
    }

    #[test]
    fn rejects_unknown_names() {
        assert!(Smoothing::parse("WB").is_err());
        assert!(Smoothing::parse("KN0").is_err());
        assert!(Smoothing::parse("FixML").is_err());
    }
}
