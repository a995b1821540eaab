//! Lattice-based objectives: word error rate and discriminative margin.
//!
//! The model is re-estimated under a mask seeded from the arc-resolved
//! prob/bow references of every loaded lattice, the lattices are
//! re-scored through their `update_weights` hook, and the scalar
//! objective goes to the same black-box minimizers as perplexity.

use std::io::{BufRead, Write};

use itertools::Itertools;

use crate::lattice::Lattice;
use crate::lm::LanguageModel;
use crate::optimize::{self, Technique};
use crate::types::Param;
use crate::zio;
use crate::Result;

pub struct WordErrorRateOptimizer<'a, L: LanguageModel> {
    lm: &'a mut L,
    lattices: Vec<Lattice>,
    mask: Option<L::Mask>,
    num_calls: usize,
    worst_margin: f64,
}

impl<'a, L: LanguageModel> WordErrorRateOptimizer<'a, L> {
    pub fn new(lm: &'a mut L) -> Self {
        WordErrorRateOptimizer {
            lm,
            lattices: Vec::new(),
            mask: None,
            num_calls: 0,
            worst_margin: -100.0,
        }
    }

    /// Loads an index file with one `tag lattice-file reference...` line
    /// per utterance, then builds the evaluation mask from all arcs.
    pub fn load_lattices<R: BufRead>(&mut self, reader: R) -> Result<()> {
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split_ascii_whitespace();
            let (Some(tag), Some(file)) = (tokens.next(), tokens.next()) else {
                continue;
            };
            let reference = tokens.join(" ");
            tracing::debug!(tag, file, "loading lattice");
            let mut lattice = Lattice::load(&*self.lm, zio::open_reader(file)?, tag)?;
            lattice.set_reference(&*self.lm, &reference);
            self.lattices.push(lattice);
        }
        self.rebuild_mask();
        Ok(())
    }

    /// Adds an already-loaded lattice; call after the last one to refresh
    /// the mask.
    pub fn add_lattice(&mut self, lattice: Lattice) {
        self.lattices.push(lattice);
        self.rebuild_mask();
    }

    pub fn lattices(&self) -> &[Lattice] {
        &self.lattices
    }

    fn rebuild_mask(&mut self) {
        let order = self.lm.order();
        let mut prob_seeds: Vec<Vec<bool>> = (0..=order)
            .map(|o| vec![false; self.lm.model().sizes(o)])
            .collect();
        let mut bow_seeds: Vec<Vec<bool>> = (0..order)
            .map(|o| vec![false; self.lm.model().sizes(o)])
            .collect();
        for lattice in &self.lattices {
            lattice.seed_mask(&mut prob_seeds, &mut bow_seeds);
        }
        self.mask = Some(self.lm.get_mask(prob_seeds, bow_seeds));
    }

    /// Word error rate (percent) of the best paths under `params`.
    /// Inadmissible parameters return 100.
    pub fn compute_wer(&mut self, params: &[Param]) -> f64 {
        self.num_calls += 1;
        if !self.lm.estimate(params, self.mask.as_ref()) {
            return 100.0;
        }
        let mut num_errors = 0usize;
        let mut tot_words = 0usize;
        for lattice in self.lattices.iter_mut() {
            lattice.update_weights(&*self.lm);
            num_errors += lattice.compute_wer();
            tot_words += lattice.ref_words().len();
        }
        num_errors as f64 / tot_words as f64 * 100.0
    }

    /// Average margin between each oracle path and its best competitor.
    pub fn compute_margin(&mut self, params: &[Param]) -> f64 {
        self.num_calls += 1;
        if !self.lm.estimate(params, self.mask.as_ref()) {
            return self.worst_margin - 10.0;
        }
        let mut tot_margin = 0.0;
        for lattice in self.lattices.iter_mut() {
            lattice.update_weights(&*self.lm);
            tot_margin += lattice.compute_margin();
        }
        let margin = tot_margin / self.lattices.len() as f64;
        if margin < self.worst_margin {
            self.worst_margin = margin;
        }
        margin
    }

    /// Error rate of the oracle paths, the floor of any rescoring.
    pub fn compute_oracle_wer(&self) -> f64 {
        let mut num_errors = 0usize;
        let mut tot_words = 0usize;
        for lattice in &self.lattices {
            num_errors += lattice.oracle_wer();
            tot_words += lattice.ref_words().len();
        }
        num_errors as f64 / tot_words as f64 * 100.0
    }

    pub fn optimize_wer(&mut self, params: &mut [Param], technique: Technique) -> f64 {
        self.num_calls = 0;
        let (wer, iterations) = optimize::minimize(technique, |p| self.compute_wer(p), params);
        tracing::info!(iterations, func_evals = self.num_calls, wer, "WER optimization finished");
        wer
    }

    pub fn optimize_margin(&mut self, params: &mut [Param], technique: Technique) -> f64 {
        self.num_calls = 0;
        let (neg_margin, iterations) =
            optimize::minimize(technique, |p| -self.compute_margin(p), params);
        tracing::info!(
            iterations,
            func_evals = self.num_calls,
            margin = -neg_margin,
            "margin optimization finished"
        );
        -neg_margin
    }

    /// Writes the best-path words of every lattice, one tagged line each.
    pub fn save_transcript<W: Write>(&self, writer: &mut W) -> Result<()> {
        let vocab = self.lm.model().vocab();
        for lattice in &self.lattices {
            let words = lattice
                .best_path_words()
                .into_iter()
                .map(|w| vocab.word(w))
                .join(" ");
            writeln!(writer, "{} {}", lattice.tag(), words)?;
        }
        Ok(())
    }

    /// Writes `tag<TAB>ref-length<TAB>errors` per lattice.
    pub fn save_wer<W: Write>(&self, writer: &mut W) -> Result<()> {
        for lattice in &self.lattices {
            writeln!(
                writer,
                "{}\t{}\t{}",
                lattice.tag(),
                lattice.ref_words().len(),
                lattice.compute_wer()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::WordErrorRateOptimizer;
    use crate::lattice::Lattice;
    use crate::lm::NgramLm;
    use crate::smooth::Smoothing;
    use std::io::Cursor;

    const LATTICE: &str = "#FSTBasic MinPlus\nI 0\nT 0 1 a a\nT 0 1 b b\nT 1 2 b b\nF 2\n";

    fn unigram_lm() -> NgramLm {
        let mut lm = NgramLm::new(1);
        lm.load_corpus(Cursor::new("a a a b\nb a\n"), true).unwrap();
        lm.set_smoothings(vec![Smoothing::parse("ModKN").unwrap()]);
        let params = lm.default_params().to_vec();
        assert!(lm.estimate(&params, None));
        lm
    }

    #[test]
    fn rescoring_prefers_the_likelier_word() {
        let mut lm = unigram_lm();
        let params = lm.default_params().to_vec();
        let lattice = {
            let mut lattice = Lattice::load(&lm, Cursor::new(LATTICE), "utt1").unwrap();
            lattice.set_reference(&lm, "a b");
            lattice
        };

        let mut optimizer = WordErrorRateOptimizer::new(&mut lm);
        optimizer.add_lattice(lattice);

        // `a` outweighs `b` in the training corpus, so the best path
        // matches the reference exactly.
        let wer = optimizer.compute_wer(&params);
        assert_eq!(wer, 0.0);
        assert_eq!(optimizer.compute_oracle_wer(), 0.0);
        let margin = optimizer.compute_margin(&params);
        assert!(margin > 0.0, "margin = {margin}");
    }

    #[test]
    fn out_of_bounds_parameters_hit_the_sentinels() {
        let mut lm = unigram_lm();
        let lattice = {
            let mut lattice = Lattice::load(&lm, Cursor::new(LATTICE), "utt1").unwrap();
            lattice.set_reference(&lm, "a b");
            lattice
        };
        let mut optimizer = WordErrorRateOptimizer::new(&mut lm);
        optimizer.add_lattice(lattice);
        assert_eq!(optimizer.compute_wer(&[-1.0, -1.0, -1.0]), 100.0);
        assert!(optimizer.compute_margin(&[-1.0, -1.0, -1.0]) <= -100.0);
    }

    #[test]
    fn transcripts_carry_the_best_path() {
        let mut lm = unigram_lm();
        let params = lm.default_params().to_vec();
        let lattice = Lattice::load(&lm, Cursor::new(LATTICE), "utt1").unwrap();
        let mut optimizer = WordErrorRateOptimizer::new(&mut lm);
        optimizer.add_lattice(lattice);
        optimizer.compute_wer(&params);

        let mut out = Vec::new();
        optimizer.save_transcript(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "utt1 a b\n");
    }
}
