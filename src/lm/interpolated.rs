//! Interpolation of several component models over a merged index space.
//!
//! All component models are merged into one shared [`NgramModel`] and
//! remapped into its sorted index space, so the mixture can run as plain
//! index-aligned loops. Per history, every component receives a
//! log-linear weight from its bias and feature values; probabilities are
//! the normalized weighted sum of the component probabilities and the
//! back-off weights renormalize the leftover mass against the lower
//! order.

use std::rc::Rc;

use super::{LanguageModel, NgramLm};
use crate::features::FeatureVectors;
use crate::mask::{InterpolationMask, LmMask};
use crate::ngram::NgramModel;
use crate::types::{NgramIdx, Param, Prob};
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interpolation {
    /// Static mixture: one weight per component, constant over histories.
    Linear,
    /// Weights proportional to each component's history count; one fixed
    /// log-history-count feature per component.
    CountMerging,
    /// Arbitrary per-component features behind log-linear weights.
    GeneralizedLinear,
}

impl std::str::FromStr for Interpolation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "LI" => Ok(Interpolation::Linear),
            "CM" => Ok(Interpolation::CountMerging),
            "GLI" => Ok(Interpolation::GeneralizedLinear),
            other => Err(Error::UnknownInterpolation(other.to_string())),
        }
    }
}

pub struct InterpolatedNgramLm {
    model: Rc<NgramModel>,
    order: usize,
    lms: Vec<NgramLm>,
    probs: Vec<Vec<Prob>>,
    bows: Vec<Vec<Prob>>,
    /// `features[component][feature]` aligned with the merged model.
    features: Vec<Vec<FeatureVectors>>,
    interpolation: Interpolation,
    tie_param_order: bool,
    tie_param_lm: bool,
    /// Component parameter block boundaries within the full vector.
    param_starts: Vec<usize>,
    /// Externally visible defaults (tunable parameters only).
    def_params: Vec<Param>,
    /// Full parameter vector including fixed entries.
    param_defaults: Vec<Param>,
    /// Which entries of `param_defaults` are externally tunable.
    param_mask: Vec<bool>,
}

impl InterpolatedNgramLm {
    pub fn new(order: usize, tie_param_order: bool, tie_param_lm: bool) -> Self {
        InterpolatedNgramLm {
            model: Rc::new(NgramModel::new(order)),
            order,
            lms: Vec::new(),
            probs: vec![Vec::new(); order + 1],
            bows: vec![Vec::new(); order],
            features: Vec::new(),
            interpolation: Interpolation::Linear,
            tie_param_order,
            tie_param_lm,
            param_starts: Vec::new(),
            def_params: Vec::new(),
            param_defaults: Vec::new(),
            param_mask: Vec::new(),
        }
    }

    pub fn components(&self) -> &[NgramLm] {
        &self.lms
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    /// Merges the component models, sorts the merged model once, and
    /// remaps every component into the final index space.
    pub fn load_lms(&mut self, mut lms: Vec<NgramLm>) -> Result<()> {
        if lms.iter().any(|lm| LanguageModel::order(lm) != self.order) {
            return Err(Error::InvariantViolation(
                "every component must match the interpolation order".to_string(),
            ));
        }

        let mut model = NgramModel::new(self.order);
        let mut component_maps = Vec::with_capacity(lms.len());
        for lm in &lms {
            let (_, maps) = model.extend_model(lm.model());
            component_maps.push(maps);
        }
        let (_, sort_maps) = model.sort_model()?;
        let shared = Rc::new(model);

        for (lm, maps) in lms.iter_mut().zip(&component_maps) {
            let composed: Vec<Vec<NgramIdx>> = maps
                .iter()
                .enumerate()
                .map(|(o, map)| {
                    map.iter()
                        .map(|&i| sort_maps[o][i as usize])
                        .collect()
                })
                .collect();
            lm.set_model(Rc::clone(&shared), &composed);
        }

        self.model = shared;
        self.lms = lms;

        for o in 0..self.order {
            let len = self.model.sizes(o);
            self.probs[o] = vec![0.0; len];
            self.bows[o] = vec![0.0; len];
        }
        self.probs[self.order] = vec![0.0; self.model.sizes(self.order)];
        self.probs[0][0] = 0.0;

        // Component parameter blocks followed by the bias block.
        self.param_starts = Vec::with_capacity(self.lms.len() + 1);
        self.def_params.clear();
        self.param_starts.push(0);
        for lm in &self.lms {
            self.def_params
                .extend_from_slice(LanguageModel::default_params(lm));
            self.param_starts.push(self.def_params.len());
        }
        let num_biases = (self.lms.len() - 1) * self.orders_stride();
        self.def_params
            .extend(std::iter::repeat(0.0).take(num_biases));

        self.param_defaults = self.def_params.clone();
        self.param_mask = vec![true; self.def_params.len()];
        self.features = vec![Vec::new(); self.lms.len()];
        Ok(())
    }

    /// Selects the interpolation mode and attaches per-component feature
    /// bundles (empty for linear, exactly one per component for count
    /// merging).
    pub fn set_interpolation(
        &mut self,
        interpolation: Interpolation,
        features: Vec<Vec<FeatureVectors>>,
    ) -> Result<()> {
        self.interpolation = interpolation;
        match interpolation {
            Interpolation::Linear => {
                if features.iter().any(|f| !f.is_empty()) {
                    return Err(Error::FeatureSpecError(
                        "linear interpolation uses no features".to_string(),
                    ));
                }
                self.features = vec![Vec::new(); self.lms.len()];
            }
            Interpolation::CountMerging => {
                if features.len() != self.lms.len() || features.iter().any(|f| f.len() != 1) {
                    return Err(Error::FeatureSpecError(
                        "count merging needs exactly one feature per component".to_string(),
                    ));
                }
                self.features = features;
                // The count feature weights are fixed at 1.
                let extra = self.lms.len() * self.orders_stride();
                self.param_defaults.extend(std::iter::repeat(1.0).take(extra));
                self.param_mask.extend(std::iter::repeat(false).take(extra));
            }
            Interpolation::GeneralizedLinear => {
                if features.len() != self.lms.len() {
                    return Err(Error::FeatureSpecError(
                        "generalized linear interpolation needs one feature list per component"
                            .to_string(),
                    ));
                }
                if self.tie_param_lm {
                    let first = features[0].len();
                    if features.iter().any(|f| f.len() != first) {
                        return Err(Error::FeatureSpecError(
                            "tying across components needs the same feature count everywhere"
                                .to_string(),
                        ));
                    }
                }
                self.features = features;
                let extra = self.feats_per_order() * self.orders_stride();
                self.param_defaults.extend(std::iter::repeat(1.0).take(extra));
                self.param_mask.extend(std::iter::repeat(true).take(extra));
                self.def_params
                    .extend(std::iter::repeat(1.0).take(extra));
            }
        }
        Ok(())
    }

    /// Builds the default count-merging feature for a component: the log
    /// of each history's total completion count, in merged index space.
    pub fn count_merging_feature(component: &NgramLm) -> FeatureVectors {
        let model = component.model();
        let order = LanguageModel::order(component);
        let mut features: FeatureVectors = (0..order).map(|o| vec![0.0; model.sizes(o)]).collect();
        for o in 0..order {
            let hists = model.hists(o + 1);
            for (i, &count) in component.counts(o + 1).iter().enumerate() {
                features[o][hists[i] as usize] += count as f64;
            }
        }
        for values in features.iter_mut() {
            for v in values.iter_mut() {
                *v = (*v + 1e-99).ln();
            }
        }
        features
    }

    fn orders_stride(&self) -> usize {
        if self.tie_param_order {
            1
        } else {
            self.order
        }
    }

    fn feats_per_order(&self) -> usize {
        if self.tie_param_lm {
            self.features.first().map_or(0, |f| f.len())
        } else {
            self.features.iter().map(|f| f.len()).sum()
        }
    }

    fn bias(&self, interp_params: &[Param], order: usize, l: usize) -> Param {
        debug_assert!(l >= 1);
        let per_order = self.lms.len() - 1;
        let offset = if self.tie_param_order {
            0
        } else {
            (order - 1) * per_order
        };
        interp_params[offset + l - 1]
    }

    fn feat_param(&self, interp_params: &[Param], order: usize, l: usize, f: usize) -> Param {
        let base = (self.lms.len() - 1) * self.orders_stride();
        let per_order = self.feats_per_order();
        let order_offset = if self.tie_param_order {
            0
        } else {
            (order - 1) * per_order
        };
        let lm_offset = if self.tie_param_lm {
            0
        } else {
            self.features[..l].iter().map(|x| x.len()).sum()
        };
        interp_params[base + order_offset + lm_offset + f]
    }

    /// Estimates every component with its parameter slice, then the
    /// interpolated probabilities and back-off weights.
    pub fn estimate(&mut self, params: &[Param], mask: Option<&InterpolationMask>) -> bool {
        let mut external = params.iter();
        for (i, &tunable) in self.param_mask.iter().enumerate() {
            if tunable {
                match external.next() {
                    Some(&p) => self.param_defaults[i] = p,
                    None => return false,
                }
            }
        }

        let num_lms = self.lms.len();
        for l in 0..num_lms {
            let slice =
                self.param_defaults[self.param_starts[l]..self.param_starts[l + 1]].to_vec();
            let component_mask = mask.map(|m| &m.components[l]);
            if !self.lms[l].estimate(&slice, component_mask) {
                return false;
            }
        }

        let interp_params = self.param_defaults[self.param_starts[num_lms]..].to_vec();
        self.estimate_probs(&interp_params, mask);
        self.estimate_bows(mask);
        true
    }

    fn estimate_probs(&mut self, interp_params: &[Param], mask: Option<&InterpolationMask>) {
        for o in 1..=self.order {
            let num_hists = self.model.sizes(o - 1);
            let hists = self.model.hists(o);
            let mut weights = vec![0.0; num_hists];
            let mut tot_weights = vec![0.0; num_hists];
            let weight_mask = mask.map(|m| m.weights[o - 1].as_slice());
            let prob_mask = mask.map(|m| m.probs[o].as_slice());

            self.probs[o].fill(0.0);
            for l in 0..self.lms.len() {
                let bias = if l == 0 {
                    0.0
                } else {
                    self.bias(interp_params, o, l)
                };
                weights.fill(bias);
                for f in 0..self.features[l].len() {
                    let param = self.feat_param(interp_params, o, l, f);
                    if param == 0.0 {
                        continue;
                    }
                    let values = &self.features[l][f][o - 1];
                    for h in 0..num_hists {
                        if weight_mask.map_or(true, |m| m[h]) {
                            weights[h] += values[h] * param;
                        }
                    }
                }
                for h in 0..num_hists {
                    if weight_mask.map_or(true, |m| m[h]) {
                        weights[h] = weights[h].exp();
                        tot_weights[h] += weights[h];
                    }
                }

                let lm_probs = self.lms[l].probs(o);
                let probs = &mut self.probs[o];
                for i in 0..probs.len() {
                    if prob_mask.map_or(true, |m| m[i]) {
                        probs[i] += lm_probs[i] * weights[hists[i] as usize];
                    }
                }
            }

            let probs = &mut self.probs[o];
            for i in 0..probs.len() {
                if prob_mask.map_or(true, |m| m[i]) {
                    probs[i] /= tot_weights[hists[i] as usize];
                }
            }
        }
    }

    fn estimate_bows(&mut self, mask: Option<&InterpolationMask>) {
        for o in 1..=self.order {
            let num_hists = self.model.sizes(o - 1);
            let hists = self.model.hists(o);
            let backoffs = self.model.backoffs(o);
            let bow_mask = mask.map(|m| m.bows[o - 1].as_slice());

            let mut numerator = vec![0.0; num_hists];
            let mut denominator = vec![0.0; num_hists];
            let (lo, hi) = self.probs.split_at(o);
            let bo_probs = &lo[o - 1];
            let probs = &hi[0];
            for i in 0..probs.len() {
                let h = hists[i] as usize;
                if bow_mask.map_or(true, |m| m[h]) {
                    numerator[h] += probs[i];
                    denominator[h] += bo_probs[backoffs[i] as usize];
                }
            }
            let bows = &mut self.bows[o - 1];
            for h in 0..num_hists {
                if bow_mask.map_or(true, |m| m[h]) {
                    bows[h] = (1.0 - numerator[h]) / (1.0 - denominator[h]);
                }
            }
        }
    }

    /// Expands the seed masks with the interpolation layer's transitive
    /// requirements, then lets each component expand its own copy.
    pub fn get_mask(
        &self,
        prob_seeds: Vec<Vec<bool>>,
        bow_seeds: Vec<Vec<bool>>,
    ) -> InterpolationMask {
        let mut mask = InterpolationMask {
            probs: prob_seeds,
            bows: bow_seeds,
            weights: (0..self.order)
                .map(|o| vec![false; self.model.sizes(o)])
                .collect(),
            components: Vec::new(),
        };

        // A masked bow needs every completion probability of its history
        // at this order and their back-off probabilities below.
        for o in 1..=self.order {
            let hists = self.model.hists(o);
            let backoffs = self.model.backoffs(o);
            let (lo, hi) = mask.probs.split_at_mut(o);
            let bo_prob_mask = &mut lo[o - 1];
            let prob_mask = &mut hi[0];
            let bow_mask = &mask.bows[o - 1];
            for i in 0..prob_mask.len() {
                if bow_mask[hists[i] as usize] {
                    prob_mask[i] = true;
                    bo_prob_mask[backoffs[i] as usize] = true;
                }
            }
        }

        // A masked probability needs the mixture weight of its history.
        for o in 0..self.order {
            let ho_hists = self.model.hists(o + 1);
            let ho_prob_mask = &mask.probs[o + 1];
            for i in 0..ho_prob_mask.len() {
                if ho_prob_mask[i] {
                    mask.weights[o][ho_hists[i] as usize] = true;
                }
            }
        }

        for lm in &self.lms {
            mask.components
                .push(LanguageModel::get_mask(lm, mask.probs.clone(), mask.bows.clone()));
        }
        mask
    }
}

impl LanguageModel for InterpolatedNgramLm {
    type Mask = InterpolationMask;

    fn order(&self) -> usize {
        self.order
    }

    fn model(&self) -> &NgramModel {
        &self.model
    }

    fn probs(&self, order: usize) -> &[Prob] {
        &self.probs[order]
    }

    fn bows(&self, order: usize) -> &[Prob] {
        &self.bows[order]
    }

    fn default_params(&self) -> &[Param] {
        &self.def_params
    }

    fn get_mask(&self, prob_seeds: Vec<Vec<bool>>, bow_seeds: Vec<Vec<bool>>) -> InterpolationMask {
        InterpolatedNgramLm::get_mask(self, prob_seeds, bow_seeds)
    }

    fn estimate(&mut self, params: &[Param], mask: Option<&InterpolationMask>) -> bool {
        InterpolatedNgramLm::estimate(self, params, mask)
    }
}

#[cfg(test)]
mod test {
    use super::{Interpolation, InterpolatedNgramLm};
    use crate::lm::{LanguageModel, NgramLm};
    use crate::smooth::Smoothing;
    use approx::assert_abs_diff_eq;
    use std::io::Cursor;

    fn kn_component(corpus: &str) -> NgramLm {
        let mut lm = NgramLm::new(2);
        lm.load_corpus(Cursor::new(corpus), true).unwrap();
        lm.set_smoothings(vec![
            Smoothing::parse("ModKN").unwrap(),
            Smoothing::parse("ModKN").unwrap(),
        ]);
        lm
    }

    fn estimate_all(lm: &mut InterpolatedNgramLm) {
        let params = LanguageModel::default_params(lm).to_vec();
        assert!(lm.estimate(&params, None));
    }

    #[test]
    fn linear_mixture_with_zero_biases_averages_components() {
        let mut interp = InterpolatedNgramLm::new(2, true, false);
        interp
            .load_lms(vec![kn_component("a b\n"), kn_component("a c\n")])
            .unwrap();
        interp
            .set_interpolation(Interpolation::Linear, vec![Vec::new(), Vec::new()])
            .unwrap();
        estimate_all(&mut interp);

        // Zero biases weight both components equally everywhere.
        for i in 0..interp.model.sizes(1) {
            let expect =
                0.5 * interp.components()[0].probs(1)[i] + 0.5 * interp.components()[1].probs(1)[i];
            assert_abs_diff_eq!(LanguageModel::probs(&interp, 1)[i], expect, epsilon = 1e-12);
        }
        let total: f64 = LanguageModel::probs(&interp, 1).iter().sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn count_merging_reproduces_components_on_unique_ngrams() {
        let comp_a = kn_component("a b\na b\n");
        let comp_b = kn_component("c d\nc d\n");
        let mut interp = InterpolatedNgramLm::new(2, true, false);
        interp.load_lms(vec![comp_a, comp_b]).unwrap();
        let features = interp
            .components()
            .iter()
            .map(|lm| vec![InterpolatedNgramLm::count_merging_feature(lm)])
            .collect();
        interp
            .set_interpolation(Interpolation::CountMerging, features)
            .unwrap();
        estimate_all(&mut interp);

        // The history `a` only has counts in the first component, so the
        // count-merged mixture there is exactly the first component.
        let vocab = interp.model.vocab();
        let a = vocab.find("a");
        let b = vocab.find("b");
        let a_uni = interp.model.find_ngram(&[a]);
        let ab = interp.model.vector(2).find(a_uni, b);
        assert_ne!(ab, crate::types::INVALID);
        assert_abs_diff_eq!(
            LanguageModel::probs(&interp, 2)[ab as usize],
            interp.components()[0].probs(2)[ab as usize],
            epsilon = 1e-9
        );

        let c = vocab.find("c");
        let d = vocab.find("d");
        let c_uni = interp.model.find_ngram(&[c]);
        let cd = interp.model.vector(2).find(c_uni, d);
        assert_abs_diff_eq!(
            LanguageModel::probs(&interp, 2)[cd as usize],
            interp.components()[1].probs(2)[cd as usize],
            epsilon = 1e-9
        );
    }

    #[test]
    fn top_order_mixture_is_normalized() {
        let mut interp = InterpolatedNgramLm::new(2, true, false);
        interp
            .load_lms(vec![kn_component("a b a c\n"), kn_component("b c\n")])
            .unwrap();
        interp
            .set_interpolation(Interpolation::Linear, vec![Vec::new(), Vec::new()])
            .unwrap();
        let mut params = LanguageModel::default_params(&interp).to_vec();
        // An asymmetric mixture.
        *params.last_mut().unwrap() = 0.7;
        assert!(interp.estimate(&params, None));

        let hists = interp.model.hists(2);
        let backoffs = interp.model.backoffs(2);
        for h in hists.iter().cloned().collect::<std::collections::HashSet<_>>() {
            let mut seen = 0.0;
            let mut seen_bo = 0.0;
            for i in 0..hists.len() {
                if hists[i] == h {
                    seen += LanguageModel::probs(&interp, 2)[i];
                    seen_bo += LanguageModel::probs(&interp, 1)[backoffs[i] as usize];
                }
            }
            let bow = LanguageModel::bows(&interp, 1)[h as usize];
            let mass = seen + bow * (1.0 - seen_bo);
            assert_abs_diff_eq!(mass, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn masked_estimate_matches_full_estimate() {
        let mut interp = InterpolatedNgramLm::new(2, true, false);
        interp
            .load_lms(vec![kn_component("a b a c\n"), kn_component("b c a\n")])
            .unwrap();
        interp
            .set_interpolation(Interpolation::Linear, vec![Vec::new(), Vec::new()])
            .unwrap();
        estimate_all(&mut interp);
        let full_probs: Vec<Vec<f64>> = (0..=2)
            .map(|o| LanguageModel::probs(&interp, o).to_vec())
            .collect();
        let full_bows: Vec<Vec<f64>> = (0..2)
            .map(|o| LanguageModel::bows(&interp, o).to_vec())
            .collect();

        let mut prob_seeds: Vec<Vec<bool>> = (0..=2)
            .map(|o| vec![false; interp.model.sizes(o)])
            .collect();
        let bow_seeds: Vec<Vec<bool>> = (0..2)
            .map(|o| vec![false; interp.model.sizes(o)])
            .collect();
        prob_seeds[2][1] = true;
        let mask = InterpolatedNgramLm::get_mask(&interp, prob_seeds, bow_seeds);

        let params = LanguageModel::default_params(&interp).to_vec();
        assert!(interp.estimate(&params, Some(&mask)));
        for o in 1..=2 {
            for i in 0..interp.model.sizes(o) {
                if mask.probs[o][i] {
                    assert_abs_diff_eq!(
                        LanguageModel::probs(&interp, o)[i],
                        full_probs[o][i],
                        epsilon = 1e-12
                    );
                }
            }
        }
        for o in 0..2 {
            for h in 0..interp.model.sizes(o) {
                if mask.bows[o][h] {
                    assert_abs_diff_eq!(
                        LanguageModel::bows(&interp, o)[h],
                        full_bows[o][h],
                        epsilon = 1e-12
                    );
                }
            }
        }
    }
}
