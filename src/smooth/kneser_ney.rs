//! Interpolated Kneser-Ney smoothing.
//!
//! Below the top order the estimator replaces raw counts with adjusted
//! counts, the number of distinct left contexts an n-gram was observed
//! in; n-grams whose history never extends to the left (those starting
//! at the sentence boundary) keep their raw counts. Each count class up
//! to the discount order gets its own discount, either estimated from
//! count-of-count statistics or exposed as tunable parameters, and the
//! discounted mass is redistributed through the lower order via the
//! per-history back-off weight. Optional weighting features multiply the
//! adjusted counts log-linearly, in which case the history sums are
//! recomputed on every call.

use super::OrderView;
use crate::mask::LmMask;
use crate::types::{Count, Param, Prob};

#[derive(Clone, Debug)]
pub struct KneserNey {
    disc_order: usize,
    tune_params: bool,
    eff_counts: Vec<Count>,
    inv_hist_counts: Vec<Prob>,
    disc_params: Vec<Param>,
    ngram_weights: Vec<Prob>,
    def_params: Vec<Param>,
    num_features: usize,
}

impl KneserNey {
    pub fn new(disc_order: usize, tune_params: bool) -> Self {
        KneserNey {
            disc_order,
            tune_params,
            eff_counts: Vec::new(),
            inv_hist_counts: Vec::new(),
            disc_params: vec![0.0; disc_order + 1],
            ngram_weights: Vec::new(),
            def_params: Vec::new(),
            num_features: 0,
        }
    }

    pub fn disc_order(&self) -> usize {
        self.disc_order
    }

    pub fn is_tuned(&self) -> bool {
        self.tune_params
    }

    pub fn eff_counts(&self) -> &[Count] {
        &self.eff_counts
    }

    pub fn default_params(&self) -> &[Param] {
        &self.def_params
    }

    pub fn initialize(&mut self, view: &OrderView) {
        if view.is_top {
            self.eff_counts = view.counts.to_vec();
        } else {
            // Adjusted counts: distinct left contexts seen at order + 1.
            self.eff_counts = vec![0; view.counts.len()];
            for (i, &count) in view.ho_counts.iter().enumerate() {
                if count > 0 {
                    self.eff_counts[view.ho_backoffs[i] as usize] += 1;
                }
            }
            for (i, eff) in self.eff_counts.iter_mut().enumerate() {
                if *eff == 0 {
                    *eff = view.counts[i];
                }
            }
        }

        self.num_features = view.features.len();
        if self.num_features > 0 {
            // Weights change per call, so the history sums cannot be
            // precomputed.
            self.inv_hist_counts = vec![0.0; view.num_hists];
            self.ngram_weights = vec![0.0; self.eff_counts.len()];
        } else {
            let mut hist_counts = vec![0u64; view.num_hists];
            for (i, &eff) in self.eff_counts.iter().enumerate() {
                hist_counts[view.hists[i] as usize] += eff as u64;
            }
            self.inv_hist_counts = hist_counts
                .into_iter()
                .map(|c| if c == 0 { 0.0 } else { 1.0 / c as Prob })
                .collect();
            self.ngram_weights = Vec::new();
        }

        // Discount defaults from count-of-count statistics.
        let mut n = vec![0u64; self.disc_order + 2];
        for &eff in &self.eff_counts {
            if (eff as usize) < n.len() {
                n[eff as usize] += 1;
            }
        }
        let y = if n[1] + 2 * n[2] == 0 {
            0.0
        } else {
            n[1] as f64 / (n[1] + 2 * n[2]) as f64
        };
        for k in 1..=self.disc_order {
            let d = if n[k] == 0 {
                k as f64
            } else {
                k as f64 - (k + 1) as f64 * y * n[k + 1] as f64 / n[k] as f64
            };
            self.disc_params[k] = d.clamp(0.0, k as f64);
        }

        self.def_params.clear();
        if self.tune_params {
            self.def_params.extend_from_slice(&self.disc_params[1..]);
        }
        self.def_params
            .extend(std::iter::repeat(0.0).take(self.num_features));
    }

    pub fn estimate(
        &mut self,
        view: &OrderView,
        params: &[Param],
        mask: Option<&LmMask>,
        lo_probs: &[Prob],
        probs: &mut [Prob],
        bows: &mut [Prob],
    ) -> bool {
        if self.tune_params {
            for k in 0..self.disc_order {
                if !(params[k] >= 0.0 && params[k] <= (k + 1) as f64) {
                    return false;
                }
            }
            self.disc_params[1..].copy_from_slice(&params[..self.disc_order]);
        }
        let num_disc = if self.tune_params { self.disc_order } else { 0 };
        for &p in &params[num_disc..] {
            if !(p.abs() <= 100.0) {
                return false;
            }
        }

        if self.num_features > 0 {
            self.compute_weights(view, &params[num_disc..]);
            let mut sums = vec![0.0; view.num_hists];
            for (i, &eff) in self.eff_counts.iter().enumerate() {
                sums[view.hists[i] as usize] += eff as f64 * self.ngram_weights[i];
            }
            for (h, &sum) in sums.iter().enumerate() {
                self.inv_hist_counts[h] = if sum == 0.0 { 0.0 } else { 1.0 / sum };
            }
        }

        match mask {
            None => self.estimate_all(view, lo_probs, probs, bows),
            Some(mask) => self.estimate_masked(view, mask, lo_probs, probs, bows),
        }
        true
    }

    fn estimate_all(&self, view: &OrderView, lo_probs: &[Prob], probs: &mut [Prob], bows: &mut [Prob]) {
        let merge_unseen = view.order == 1 && !view.vocab_fixed;

        bows[..view.num_hists].fill(0.0);
        for (i, &eff) in self.eff_counts.iter().enumerate() {
            bows[view.hists[i] as usize] += self.weight(i) * self.discount(eff);
        }
        for (h, bow) in bows.iter_mut().enumerate().take(view.num_hists) {
            *bow = if self.inv_hist_counts[h] == 0.0 {
                1.0
            } else {
                *bow * self.inv_hist_counts[h]
            };
        }

        for (i, &eff) in self.eff_counts.iter().enumerate() {
            probs[i] = self.prob(view, i, eff, lo_probs, bows, merge_unseen);
        }
    }

    fn estimate_masked(
        &self,
        view: &OrderView,
        mask: &LmMask,
        lo_probs: &[Prob],
        probs: &mut [Prob],
        bows: &mut [Prob],
    ) {
        let merge_unseen = view.order == 1 && !view.vocab_fixed;
        let prob_mask = &mask.probs[view.order];
        let bow_mask = &mask.bows[view.order - 1];

        for (h, &set) in bow_mask.iter().enumerate() {
            if set {
                bows[h] = 0.0;
            }
        }
        for (i, &eff) in self.eff_counts.iter().enumerate() {
            let h = view.hists[i] as usize;
            if bow_mask[h] {
                bows[h] += self.weight(i) * self.discount(eff);
            }
        }
        for (h, &set) in bow_mask.iter().enumerate() {
            if set {
                bows[h] = if self.inv_hist_counts[h] == 0.0 {
                    1.0
                } else {
                    bows[h] * self.inv_hist_counts[h]
                };
            }
        }

        for (i, &eff) in self.eff_counts.iter().enumerate() {
            if prob_mask[i] {
                probs[i] = self.prob(view, i, eff, lo_probs, bows, merge_unseen);
            }
        }
    }

    fn prob(
        &self,
        view: &OrderView,
        i: usize,
        eff: Count,
        lo_probs: &[Prob],
        bows: &[Prob],
        merge_unseen: bool,
    ) -> Prob {
        let h = view.hists[i] as usize;
        let backoff = lo_probs[view.backoffs[i] as usize] * bows[h];
        if eff == 0 {
            if merge_unseen {
                0.0
            } else {
                backoff
            }
        } else {
            let discounted = self.weight(i) * (eff as f64 - self.discount(eff));
            discounted.max(0.0) * self.inv_hist_counts[h] + backoff
        }
    }

    fn compute_weights(&mut self, view: &OrderView, feat_params: &[Param]) {
        self.ngram_weights.fill(0.0);
        for (f, &param) in feat_params.iter().enumerate() {
            if param == 0.0 {
                continue;
            }
            for (i, weight) in self.ngram_weights.iter_mut().enumerate() {
                *weight += view.features[f][i] * param;
            }
        }
        for weight in self.ngram_weights.iter_mut() {
            *weight = weight.exp();
        }
    }

    fn discount(&self, eff: Count) -> Param {
        self.disc_params[std::cmp::min(eff as usize, self.disc_order)]
    }

    fn weight(&self, i: usize) -> Prob {
        if self.ngram_weights.is_empty() {
            1.0
        } else {
            self.ngram_weights[i]
        }
    }
}

#[cfg(test)]
mod test {
    use super::KneserNey;
    use crate::smooth::OrderView;
    use approx::assert_abs_diff_eq;

    fn unigram_view<'a>(
        hists: &'a [u32],
        backoffs: &'a [u32],
        counts: &'a [u32],
    ) -> OrderView<'a> {
        OrderView {
            order: 1,
            is_top: true,
            vocab_fixed: false,
            num_hists: 1,
            hists,
            backoffs,
            counts,
            ho_counts: &[],
            ho_backoffs: &[],
            features: &[],
        }
    }

    #[test]
    fn default_discount_follows_count_statistics() {
        let hists = [0, 0, 0];
        let backoffs = [0, 0, 0];
        let counts = [2, 1, 1];
        let view = unigram_view(&hists, &backoffs, &counts);
        let mut kn = KneserNey::new(1, false);
        kn.initialize(&view);
        // n1 = 2, n2 = 1: Y = 0.5, d1 = 1 - 2 * 0.5 * n2 / n1 = 0.5.
        assert!(kn.default_params().is_empty());
        let mut probs = vec![0.0; 3];
        let mut bows = vec![0.0; 1];
        let lo_probs = vec![1.0 / 3.0];
        assert!(kn.estimate(&view, &[], None, &lo_probs, &mut probs, &mut bows));
        assert_abs_diff_eq!(bows[0], 0.375, epsilon = 1e-12);
        let total: f64 = probs.iter().sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn tuned_discounts_are_bounded() {
        let hists = [0, 0];
        let backoffs = [0, 0];
        let counts = [2, 1];
        let view = unigram_view(&hists, &backoffs, &counts);
        let mut kn = KneserNey::new(1, true);
        kn.initialize(&view);
        assert_eq!(kn.default_params().len(), 1);

        let mut probs = vec![0.0; 2];
        let mut bows = vec![0.0; 1];
        let lo_probs = vec![0.5];
        assert!(!kn.estimate(&view, &[-0.1], None, &lo_probs, &mut probs, &mut bows));
        assert!(!kn.estimate(&view, &[1.5], None, &lo_probs, &mut probs, &mut bows));
        assert!(kn.estimate(&view, &[0.7], None, &lo_probs, &mut probs, &mut bows));
    }

    #[test]
    fn adjusted_counts_count_left_contexts() {
        // Bigram layer: entries (h0, w0) (h0, w1); unigram layer has two
        // entries. Bigram counts feed the unigram adjusted counts through
        // the bigram back-off indices.
        let hists = [0u32, 0];
        let backoffs = [0u32, 0];
        let counts = [5u32, 3];
        let ho_counts = [2u32, 0, 1];
        let ho_backoffs = [0u32, 0, 1];
        let view = OrderView {
            order: 1,
            is_top: false,
            vocab_fixed: false,
            num_hists: 1,
            hists: &hists,
            backoffs: &backoffs,
            counts: &counts,
            ho_counts: &ho_counts,
            ho_backoffs: &ho_backoffs,
            features: &[],
        };
        let mut kn = KneserNey::new(1, false);
        kn.initialize(&view);
        // Entry 0 is the left context of one counted higher-order n-gram,
        // entry 1 of one (the zero-count one does not contribute).
        assert_eq!(kn.eff_counts(), &[1, 1]);
    }
}
