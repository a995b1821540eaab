//! Smoothed back-off n-gram language models.
//!
//! [`NgramLm`] composes a shared [`NgramModel`] with one smoothing per
//! order and the index-aligned probability, back-off weight, count and
//! feature vectors. A model loaded from an ARPA or binary file carries no
//! smoothings; its probabilities are static and `estimate` is a no-op,
//! which is exactly what the interpolation layer needs for fixed
//! components.

mod interpolated;

pub use interpolated::{Interpolation, InterpolatedNgramLm};

use std::io::{BufRead, Read, Write};
use std::rc::Rc;

use crate::binio::{self, FileHeader};
use crate::features::FeatureVectors;
use crate::mask::LmMask;
use crate::ngram::NgramModel;
use crate::smooth::{OrderView, Smoothing};
use crate::types::{Count, NgramIdx, Param, Prob};
use crate::Result;

/// Common surface of an estimable language model, used by the
/// evaluation objectives. The mask type differs between a plain smoothed
/// model and an interpolated one, so it rides along as an associated
/// type.
pub trait LanguageModel {
    type Mask;

    fn order(&self) -> usize;
    fn model(&self) -> &NgramModel;
    fn probs(&self, order: usize) -> &[Prob];
    fn bows(&self, order: usize) -> &[Prob];
    fn default_params(&self) -> &[Param];
    fn get_mask(&self, prob_seeds: Vec<Vec<bool>>, bow_seeds: Vec<Vec<bool>>) -> Self::Mask;
    fn estimate(&mut self, params: &[Param], mask: Option<&Self::Mask>) -> bool;
}

impl LanguageModel for NgramLm {
    type Mask = LmMask;

    fn order(&self) -> usize {
        self.order
    }

    fn model(&self) -> &NgramModel {
        NgramLm::model(self)
    }

    fn probs(&self, order: usize) -> &[Prob] {
        NgramLm::probs(self, order)
    }

    fn bows(&self, order: usize) -> &[Prob] {
        NgramLm::bows(self, order)
    }

    fn default_params(&self) -> &[Param] {
        NgramLm::default_params(self)
    }

    fn get_mask(&self, prob_seeds: Vec<Vec<bool>>, bow_seeds: Vec<Vec<bool>>) -> LmMask {
        NgramLm::get_mask(self, prob_seeds, bow_seeds)
    }

    fn estimate(&mut self, params: &[Param], mask: Option<&LmMask>) -> bool {
        NgramLm::estimate(self, params, mask)
    }
}

pub struct NgramLm {
    model: Rc<NgramModel>,
    order: usize,
    probs: Vec<Vec<Prob>>,
    bows: Vec<Vec<Prob>>,
    counts: Vec<Vec<Count>>,
    /// Weighting features, `features[order][feature][index]`.
    features: Vec<Vec<Vec<f64>>>,
    smoothings: Vec<Smoothing>,
    param_starts: Vec<usize>,
    def_params: Vec<Param>,
}

impl NgramLm {
    pub fn new(order: usize) -> Self {
        NgramLm {
            model: Rc::new(NgramModel::new(order)),
            order,
            probs: vec![Vec::new(); order + 1],
            bows: vec![Vec::new(); order],
            counts: Vec::new(),
            features: vec![Vec::new(); order + 1],
            smoothings: Vec::new(),
            param_starts: Vec::new(),
            def_params: Vec::new(),
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn model(&self) -> &NgramModel {
        &self.model
    }

    pub fn shared_model(&self) -> Rc<NgramModel> {
        Rc::clone(&self.model)
    }

    pub fn probs(&self, order: usize) -> &[Prob] {
        &self.probs[order]
    }

    pub fn bows(&self, order: usize) -> &[Prob] {
        &self.bows[order]
    }

    pub fn counts(&self, order: usize) -> &[Count] {
        self.counts.get(order).map_or(&[], |c| c.as_slice())
    }

    /// Default parameter vector: the concatenation of every order's
    /// smoothing defaults.
    pub fn default_params(&self) -> &[Param] {
        &self.def_params
    }

    /// Loads a fixed vocabulary; out-of-vocabulary corpus words are
    /// dropped from then on.
    pub fn load_vocab<R: BufRead>(&mut self, reader: R) -> Result<()> {
        let model = Rc::make_mut(&mut self.model);
        model.vocab_mut().load(reader)?;
        model.vocab_mut().set_fixed(true);
        Ok(())
    }

    pub fn save_vocab<W: Write>(&self, writer: &mut W, binary: bool) -> Result<()> {
        if binary {
            FileHeader::CURRENT.write_to(writer)?;
            self.model.vocab().serialize(writer)
        } else {
            self.model.vocab().save(writer)
        }
    }

    pub fn load_corpus<R: BufRead>(&mut self, reader: R, reset: bool) -> Result<()> {
        Rc::make_mut(&mut self.model).load_corpus(&mut self.counts, reader, reset)
    }

    /// Loads counts from text or from the framed binary format, told
    /// apart by the version stamp.
    pub fn load_counts<R: BufRead>(&mut self, mut reader: R, reset: bool) -> Result<()> {
        if peek_stamp(&mut reader)? {
            FileHeader::verify(&mut reader)?;
            binio::verify_tag(&mut reader, "NgramCounts")?;
            let model = NgramModel::deserialize(&mut reader)?;
            self.order = model.order();
            self.counts.clear();
            for _ in 0..=self.order {
                self.counts.push(
                    binio::read_u32_vec(&mut reader)?,
                );
            }
            self.model = Rc::new(model);
            self.probs = vec![Vec::new(); self.order + 1];
            self.bows = vec![Vec::new(); self.order];
            self.features = vec![Vec::new(); self.order + 1];
            return Ok(());
        }
        Rc::make_mut(&mut self.model).load_counts(&mut self.counts, reader, reset)
    }

    pub fn save_counts<W: Write>(&self, writer: &mut W, binary: bool) -> Result<()> {
        if binary {
            FileHeader::CURRENT.write_to(writer)?;
            binio::write_tag(writer, "NgramCounts")?;
            self.model.serialize(writer)?;
            for counts in &self.counts {
                binio::write_u32_vec(writer, counts)?;
            }
            Ok(())
        } else {
            self.model.save_counts(&self.counts, writer, false)
        }
    }

    /// Writes the adjusted counts the smoothings actually normalize.
    pub fn save_effective_counts<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut eff: Vec<Vec<Count>> = Vec::with_capacity(self.order + 1);
        eff.push(self.counts.first().cloned().unwrap_or_else(|| vec![0]));
        for o in 1..=self.order {
            let counts = self
                .smoothings
                .get(o - 1)
                .and_then(|s| s.eff_counts())
                .unwrap_or_else(|| self.counts(o));
            eff.push(counts.to_vec());
        }
        self.model.save_counts(&eff, writer, false)
    }

    /// Loads an ARPA or framed binary language model.
    pub fn load_lm<R: BufRead>(&mut self, mut reader: R) -> Result<()> {
        if peek_stamp(&mut reader)? {
            FileHeader::verify(&mut reader)?;
            binio::verify_tag(&mut reader, "NgramLM")?;
            let model = NgramModel::deserialize(&mut reader)?;
            self.order = model.order();
            self.probs.clear();
            for _ in 0..=self.order {
                self.probs.push(binio::read_f64_vec(&mut reader)?);
            }
            self.bows.clear();
            for _ in 0..self.order {
                self.bows.push(binio::read_f64_vec(&mut reader)?);
            }
            self.model = Rc::new(model);
            self.features = vec![Vec::new(); self.order + 1];
            return Ok(());
        }
        let model = Rc::make_mut(&mut self.model);
        model.load_arpa(&mut self.probs, &mut self.bows, reader)?;
        self.order = model.order();
        self.features = vec![Vec::new(); self.order + 1];
        Ok(())
    }

    pub fn save_lm<W: Write>(&self, writer: &mut W, binary: bool) -> Result<()> {
        if binary {
            FileHeader::CURRENT.write_to(writer)?;
            binio::write_tag(writer, "NgramLM")?;
            self.model.serialize(writer)?;
            for probs in &self.probs {
                binio::write_f64_vec(writer, probs)?;
            }
            for bows in &self.bows {
                binio::write_f64_vec(writer, bows)?;
            }
            Ok(())
        } else {
            self.model.save_arpa(&self.probs, &self.bows, writer)
        }
    }

    /// Attaches per-order weighting feature bundles; `bundles[f][o]` is
    /// re-indexed to `features[o][f]`.
    pub fn set_weighting(&mut self, bundles: Vec<FeatureVectors>) {
        self.features = vec![Vec::new(); self.order + 1];
        for bundle in bundles {
            for (o, values) in bundle.into_iter().enumerate() {
                if o > 0 && o <= self.order {
                    self.features[o].push(values);
                }
            }
        }
    }

    /// Attaches one smoothing per order and precomputes everything the
    /// estimators need.
    pub fn set_smoothings(&mut self, smoothings: Vec<Smoothing>) {
        debug_assert_eq!(smoothings.len(), self.order);
        self.smoothings = smoothings;
        self.init_smoothings();
    }

    /// Re-runs smoothing initialization after counts or the model
    /// changed.
    fn init_smoothings(&mut self) {
        if self.counts.len() <= self.order {
            self.counts.resize(self.order + 1, Vec::new());
        }
        for o in 1..=self.order {
            let view = make_view(
                &self.model,
                &self.counts,
                &self.features,
                o,
                self.order,
            );
            self.smoothings[o - 1].initialize(&view);
        }

        for o in 0..self.order {
            let len = self.model.sizes(o);
            self.probs[o] = vec![0.0; len];
            self.bows[o] = vec![0.0; len];
        }
        self.probs[self.order] = vec![0.0; self.model.sizes(self.order)];

        // 0th-order probability: uniform over counted unigrams.
        let counted = self.counts[1].iter().filter(|&&c| c > 0).count();
        self.probs[0][0] = if counted > 0 { 1.0 / counted as Prob } else { 0.0 };

        self.param_starts = Vec::with_capacity(self.order + 1);
        self.def_params.clear();
        self.param_starts.push(0);
        for o in 1..=self.order {
            self.def_params
                .extend_from_slice(self.smoothings[o - 1].default_params());
            self.param_starts.push(self.def_params.len());
        }
    }

    /// Estimates all orders bottom-up, slicing `params` per order.
    /// Returns `false` as soon as any order reports inadmissible
    /// parameters.
    pub fn estimate(&mut self, params: &[Param], mask: Option<&LmMask>) -> bool {
        if self.smoothings.is_empty() {
            return true;
        }
        if params.len() != *self.param_starts.last().unwrap_or(&0) {
            return false;
        }
        for o in 1..=self.order {
            let range = self.param_starts[o - 1]..self.param_starts[o];
            let view = make_view(
                &self.model,
                &self.counts,
                &self.features,
                o,
                self.order,
            );
            let (lo, hi) = self.probs.split_at_mut(o);
            if !self.smoothings[o - 1].estimate(
                &view,
                &params[range],
                mask,
                &lo[o - 1],
                &mut hi[0],
                &mut self.bows[o - 1],
            ) {
                return false;
            }
        }
        true
    }

    /// Expands seed masks with each order's transitive requirements, top
    /// order first.
    pub fn get_mask(&self, prob_seeds: Vec<Vec<bool>>, bow_seeds: Vec<Vec<bool>>) -> LmMask {
        let mut mask = LmMask::new(prob_seeds, bow_seeds);
        for o in (1..=self.order).rev() {
            if let Some(smoothing) = self.smoothings.get(o - 1) {
                let view = make_view(
                    &self.model,
                    &self.counts,
                    &self.features,
                    o,
                    self.order,
                );
                smoothing.update_mask(&view, &mut mask);
            }
        }
        mask
    }

    /// Moves the LM onto a merged, re-sorted model, remapping every side
    /// vector through the per-order index maps.
    ///
    /// For a static (loaded) model the probabilities are remapped and
    /// n-grams new to the merged model receive their back-off estimate so
    /// the distribution stays total; for an estimated model the counts
    /// and features are remapped and the smoothings re-initialized.
    pub fn set_model(&mut self, model: Rc<NgramModel>, ngram_maps: &[Vec<NgramIdx>]) {
        if self.smoothings.is_empty() {
            for o in 1..=self.order {
                let len = model.sizes(o);
                NgramModel::apply_sort(&ngram_maps[o], &mut self.probs[o], len, 0.0);
                if o < self.order {
                    NgramModel::apply_sort(&ngram_maps[o], &mut self.bows[o], len, 1.0);
                }
            }
            self.model = model;
            for o in 1..=self.order {
                let hists = self.model.hists(o);
                let backoffs = self.model.backoffs(o);
                let (lo, hi) = self.probs.split_at_mut(o);
                let lo_probs = &lo[o - 1];
                let probs = &mut hi[0];
                let bows = &self.bows[o - 1];
                for i in 0..probs.len() {
                    if probs[i] == 0.0 {
                        probs[i] =
                            lo_probs[backoffs[i] as usize] * bows[hists[i] as usize];
                    }
                }
            }
        } else {
            for o in 1..=self.order {
                let len = model.sizes(o);
                NgramModel::apply_sort(&ngram_maps[o], &mut self.counts[o], len, 0);
                for feature in self.features[o].iter_mut() {
                    NgramModel::apply_sort(&ngram_maps[o], feature, len, 0.0);
                }
            }
            self.model = model;
            self.init_smoothings();
        }
    }
}

fn make_view<'a>(
    model: &'a NgramModel,
    counts: &'a [Vec<Count>],
    features: &'a [Vec<Vec<f64>>],
    order: usize,
    top_order: usize,
) -> OrderView<'a> {
    static NO_COUNTS: &[Count] = &[];
    let is_top = order == top_order;
    OrderView {
        order,
        is_top,
        vocab_fixed: model.vocab().is_fixed(),
        num_hists: model.sizes(order - 1),
        hists: model.hists(order),
        backoffs: model.backoffs(order),
        counts: counts.get(order).map_or(NO_COUNTS, |c| c.as_slice()),
        ho_counts: if is_top {
            NO_COUNTS
        } else {
            counts.get(order + 1).map_or(NO_COUNTS, |c| c.as_slice())
        },
        ho_backoffs: if is_top { &[] } else { model.backoffs(order + 1) },
        features: &features[order],
    }
}

fn peek_stamp<R: BufRead>(reader: &mut R) -> Result<bool> {
    let buf = reader.fill_buf()?;
    Ok(buf.len() >= 8 && FileHeader::matches(u64::from_le_bytes([
        buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
    ])))
}

#[cfg(test)]
mod test {
    use super::NgramLm;
    use crate::smooth::Smoothing;
    use approx::assert_abs_diff_eq;
    use std::io::Cursor;

    pub(crate) fn kn_bigram_lm(corpus: &str) -> NgramLm {
        let mut lm = NgramLm::new(2);
        lm.load_corpus(Cursor::new(corpus), true).unwrap();
        lm.set_smoothings(vec![
            Smoothing::parse("ModKN").unwrap(),
            Smoothing::parse("ModKN").unwrap(),
        ]);
        let params = lm.default_params().to_vec();
        assert!(lm.estimate(&params, None));
        lm
    }

    /// Total probability mass of history `h` at the top order: stored
    /// probabilities of seen words plus back-off mass for the rest.
    pub(crate) fn history_mass(lm: &NgramLm, order: usize, h: u32) -> f64 {
        let hists = lm.model().hists(order);
        let backoffs = lm.model().backoffs(order);
        let mut seen = 0.0;
        let mut seen_bo = 0.0;
        for i in 0..hists.len() {
            if hists[i] == h {
                seen += lm.probs(order)[i];
                seen_bo += lm.probs(order - 1)[backoffs[i] as usize];
            }
        }
        seen + lm.bows(order - 1)[h as usize] * (1.0 - seen_bo)
    }

    #[test]
    fn unigram_probabilities_sum_to_one() {
        let lm = kn_bigram_lm("a b a b c\n");
        let total: f64 = lm.probs(1).iter().sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn top_order_histories_are_normalized() {
        let lm = kn_bigram_lm("a b a b c\n");
        for h in 0..lm.model().sizes(1) as u32 {
            let present = lm.model().hists(2).contains(&h);
            if present {
                assert_abs_diff_eq!(history_mass(&lm, 2, h), 1.0, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn backoff_weights_renormalize_the_lower_order() {
        let lm = kn_bigram_lm("a b a b c\nb c a\n");
        // (1 - sum of seen probs) = bow * (1 - sum of seen back-off
        // probs) for every history with seen completions.
        let hists = lm.model().hists(2);
        let backoffs = lm.model().backoffs(2);
        for h in hists.iter().cloned().collect::<std::collections::HashSet<_>>() {
            let mut seen = 0.0;
            let mut seen_bo = 0.0;
            for i in 0..hists.len() {
                if hists[i] == h {
                    seen += lm.probs(2)[i];
                    seen_bo += lm.probs(1)[backoffs[i] as usize];
                }
            }
            let bow = lm.bows(1)[h as usize];
            assert_abs_diff_eq!(1.0 - seen, bow * (1.0 - seen_bo), epsilon = 1e-9);
        }
    }

    #[test]
    fn estimate_is_idempotent() {
        let mut lm = kn_bigram_lm("a b a b c\n");
        let params = lm.default_params().to_vec();
        let probs_before = lm.probs(2).to_vec();
        let bows_before = lm.bows(1).to_vec();
        assert!(lm.estimate(&params, None));
        assert_eq!(lm.probs(2), probs_before.as_slice());
        assert_eq!(lm.bows(1), bows_before.as_slice());
    }

    #[test]
    fn arpa_round_trip_preserves_probabilities() {
        let lm = kn_bigram_lm("a b a b c\n");
        let mut text = Vec::new();
        lm.save_lm(&mut text, false).unwrap();

        let mut reloaded = NgramLm::new(2);
        reloaded.load_lm(Cursor::new(&text)).unwrap();

        assert_eq!(reloaded.model().sizes(1), lm.model().sizes(1));
        assert_eq!(reloaded.model().sizes(2), lm.model().sizes(2));
        for o in 1..=2 {
            for i in 0..lm.model().sizes(o) {
                assert_abs_diff_eq!(
                    reloaded.probs(o)[i],
                    lm.probs(o)[i],
                    epsilon = 1e-5
                );
            }
        }
        for i in 0..lm.model().sizes(1) {
            assert_abs_diff_eq!(reloaded.bows(1)[i], lm.bows(1)[i], epsilon = 1e-5);
        }
    }

    #[test]
    fn binary_round_trip_is_exact() {
        let lm = kn_bigram_lm("a b a b c\n");
        let mut bin = Vec::new();
        lm.save_lm(&mut bin, true).unwrap();

        let mut reloaded = NgramLm::new(2);
        reloaded.load_lm(Cursor::new(&bin)).unwrap();
        for o in 1..=2 {
            assert_eq!(reloaded.probs(o), lm.probs(o));
        }
        assert_eq!(reloaded.bows(1), lm.bows(1));

        let mut bin2 = Vec::new();
        reloaded.save_lm(&mut bin2, true).unwrap();
        assert_eq!(bin, bin2);
    }

    #[test]
    fn counts_round_trip_is_exact() {
        let mut lm = NgramLm::new(2);
        lm.load_corpus(Cursor::new("a b a b c\n"), true).unwrap();
        let mut text = Vec::new();
        lm.save_counts(&mut text, false).unwrap();

        let mut reloaded = NgramLm::new(2);
        reloaded.load_counts(Cursor::new(&text), true).unwrap();
        for o in 1..=2 {
            assert_eq!(reloaded.counts(o), lm.counts(o), "order {o}");
        }

        let mut text2 = Vec::new();
        reloaded.save_counts(&mut text2, false).unwrap();
        assert_eq!(text, text2);
    }

    #[test]
    fn masked_estimate_matches_full_estimate() {
        let mut lm = kn_bigram_lm("a b a b c\nc a b\n");
        let params = lm.default_params().to_vec();
        let full_probs: Vec<Vec<f64>> = (0..=2).map(|o| lm.probs(o).to_vec()).collect();
        let full_bows: Vec<Vec<f64>> = (0..2).map(|o| lm.bows(o).to_vec()).collect();

        // Seed: one bigram probability and one unigram history bow.
        let mut prob_seeds: Vec<Vec<bool>> = (0..=2)
            .map(|o| vec![false; lm.model().sizes(o)])
            .collect();
        let mut bow_seeds: Vec<Vec<bool>> =
            (0..2).map(|o| vec![false; lm.model().sizes(o)]).collect();
        prob_seeds[2][0] = true;
        prob_seeds[2][lm.model().sizes(2) - 1] = true;
        bow_seeds[1][1] = true;
        let mask = lm.get_mask(prob_seeds.clone(), bow_seeds.clone());

        // Poison the vectors, then re-estimate under the mask.
        let poison = 0.123456789;
        for o in 1..=2 {
            for v in lm.probs[o].iter_mut() {
                *v = poison;
            }
        }
        for o in 0..2 {
            for v in lm.bows[o].iter_mut() {
                *v = poison;
            }
        }
        assert!(lm.estimate(&params, Some(&mask)));

        for o in 1..=2 {
            for i in 0..lm.model().sizes(o) {
                if mask.probs[o][i] {
                    assert_abs_diff_eq!(
                        lm.probs(o)[i],
                        full_probs[o][i],
                        epsilon = 1e-12
                    );
                }
            }
        }
        for o in 0..2 {
            for h in 0..lm.model().sizes(o) {
                if mask.bows[o][h] {
                    assert_abs_diff_eq!(lm.bows(o)[h], full_bows[o][h], epsilon = 1e-12);
                }
            }
        }
        // The seeded entries must be covered by the expanded mask.
        assert!(mask.probs[2][0]);
        assert!(mask.bows[1][1]);
    }
}
