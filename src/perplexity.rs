//! Perplexity objective over a held-out corpus.
//!
//! The corpus is loaded once into the model's index space as prob/bow
//! usage counts; every objective evaluation is then a masked re-estimate
//! followed by two dot products with the log probabilities, which is
//! what makes parameter optimization over thousands of function calls
//! tractable.

use std::io::BufRead;

use crate::lm::LanguageModel;
use crate::optimize::{self, Technique};
use crate::types::{Count, Param};
use crate::Result;

/// Entropy returned for inadmissible parameters, steering the minimizer
/// away (perplexity ~ 1100).
const OUT_OF_BOUNDS_ENTROPY: f64 = 7.0;

pub struct PerplexityOptimizer<'a, L: LanguageModel> {
    lm: &'a mut L,
    prob_counts: Vec<Vec<Count>>,
    bow_counts: Vec<Vec<Count>>,
    num_oov: usize,
    num_words: usize,
    num_zero_probs: usize,
    num_calls: usize,
    mask: Option<L::Mask>,
}

impl<'a, L: LanguageModel> PerplexityOptimizer<'a, L> {
    pub fn new(lm: &'a mut L) -> Self {
        PerplexityOptimizer {
            lm,
            prob_counts: Vec::new(),
            bow_counts: Vec::new(),
            num_oov: 0,
            num_words: 0,
            num_zero_probs: 0,
            num_calls: 0,
            mask: None,
        }
    }

    /// Counts how often each prob/bow index scores a corpus position and
    /// builds the evaluation mask from the touched indices.
    pub fn load_corpus<R: BufRead>(&mut self, reader: R) -> Result<()> {
        let vocab_mask = vec![true; self.lm.model().sizes(1)];
        let (num_oov, num_words) = self.lm.model().load_eval_corpus(
            &mut self.prob_counts,
            &mut self.bow_counts,
            &vocab_mask,
            reader,
        )?;
        self.num_oov = num_oov;
        self.num_words = num_words;

        let prob_seeds = self
            .prob_counts
            .iter()
            .map(|counts| counts.iter().map(|&c| c > 0).collect())
            .collect();
        let bow_seeds = self
            .bow_counts
            .iter()
            .map(|counts| counts.iter().map(|&c| c > 0).collect())
            .collect();
        self.mask = Some(self.lm.get_mask(prob_seeds, bow_seeds));
        Ok(())
    }

    /// Entropy of the evaluation corpus under `params`. Zero-probability
    /// positions are tallied and excluded from the denominator.
    pub fn compute_entropy(&mut self, params: &[Param]) -> f64 {
        self.num_calls += 1;
        if !self.lm.estimate(params, self.mask.as_ref()) {
            return OUT_OF_BOUNDS_ENTROPY;
        }

        let order = self.lm.order();
        let mut tot_log_prob = 0.0;
        self.num_zero_probs = 0;
        for o in 0..=order {
            let probs = self.lm.probs(o);
            for (i, &count) in self.prob_counts[o].iter().enumerate() {
                if count > 0 {
                    if probs[i] == 0.0 {
                        self.num_zero_probs += count as usize;
                    } else {
                        tot_log_prob += probs[i].ln() * count as f64;
                    }
                }
            }
        }
        for o in 0..order {
            let bows = self.lm.bows(o);
            for (i, &count) in self.bow_counts[o].iter().enumerate() {
                if count > 0 && bows[i] > 0.0 {
                    tot_log_prob += bows[i].ln() * count as f64;
                }
            }
        }

        -tot_log_prob / (self.num_words - self.num_zero_probs) as f64
    }

    pub fn compute_perplexity(&mut self, params: &[Param]) -> f64 {
        self.compute_entropy(params).exp()
    }

    /// Minimizes the entropy over `params` in place and returns the final
    /// entropy.
    pub fn optimize(&mut self, params: &mut [Param], technique: Technique) -> f64 {
        self.num_calls = 0;
        let (entropy, iterations) = optimize::minimize(technique, |p| self.compute_entropy(p), params);
        tracing::info!(
            iterations,
            func_evals = self.num_calls,
            perplexity = entropy.exp(),
            num_oov = self.num_oov,
            num_zero_probs = self.num_zero_probs,
            "perplexity optimization finished"
        );
        entropy
    }

    pub fn num_calls(&self) -> usize {
        self.num_calls
    }

    pub fn num_oov(&self) -> usize {
        self.num_oov
    }

    pub fn num_words(&self) -> usize {
        self.num_words
    }

    pub fn num_zero_probs(&self) -> usize {
        self.num_zero_probs
    }
}
