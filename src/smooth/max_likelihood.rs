//! Maximum-likelihood estimation: raw counts normalized per history, unit
//! back-off weights, no tunable parameters.

use super::OrderView;
use crate::mask::LmMask;
use crate::types::{Param, Prob};

#[derive(Clone, Debug, Default)]
pub struct MaxLikelihood {
    inv_hist_counts: Vec<Prob>,
}

impl MaxLikelihood {
    pub fn initialize(&mut self, view: &OrderView) {
        let mut hist_counts = vec![0u64; view.num_hists];
        for (i, &count) in view.counts.iter().enumerate() {
            hist_counts[view.hists[i] as usize] += count as u64;
        }
        self.inv_hist_counts = hist_counts
            .into_iter()
            .map(|c| if c == 0 { 0.0 } else { 1.0 / c as Prob })
            .collect();
    }

    pub fn default_params(&self) -> &[Param] {
        &[]
    }

    pub fn estimate(
        &self,
        view: &OrderView,
        mask: Option<&LmMask>,
        probs: &mut [Prob],
        bows: &mut [Prob],
    ) -> bool {
        match mask {
            None => {
                for (i, &count) in view.counts.iter().enumerate() {
                    probs[i] = count as Prob * self.inv_hist_counts[view.hists[i] as usize];
                }
                bows.fill(1.0);
            }
            Some(mask) => {
                let prob_mask = &mask.probs[view.order];
                for (i, &count) in view.counts.iter().enumerate() {
                    if prob_mask[i] {
                        probs[i] = count as Prob * self.inv_hist_counts[view.hists[i] as usize];
                    }
                }
                for (h, &set) in mask.bows[view.order - 1].iter().enumerate() {
                    if set {
                        bows[h] = 1.0;
                    }
                }
            }
        }
        true
    }
}
