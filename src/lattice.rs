//! Word lattices for language-model rescoring.
//!
//! A lattice arrives as a topologically sorted FST in the text format
//! `#FSTBasic MinPlus`; every arc weight is a cost. During loading each
//! arc is resolved against the model's trie: the longest n-gram ending
//! in the arc word that exists in the model contributes a probability
//! reference, and every history traversed while backing off to it
//! contributes a back-off weight reference. Rescoring is then just
//! `base weight - ln(prob) - ln(bows...)` per arc, and the references
//! double as the seed of the evaluation mask.

use std::collections::HashSet;
use std::io::{BufRead, Write};

use crate::binio;
use crate::lm::LanguageModel;
use crate::types::{NgramIdx, WordId, INVALID};
use crate::vocab::Vocab;
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq)]
struct ArcNgramRef {
    arc: usize,
    order: usize,
    index: NgramIdx,
}

#[derive(Debug)]
pub struct Lattice {
    tag: String,
    final_node: usize,
    arc_starts: Vec<u32>,
    arc_ends: Vec<u32>,
    arc_words: Vec<WordId>,
    arc_base_weights: Vec<f64>,
    arc_weights: Vec<f64>,
    ref_words: Vec<WordId>,
    oracle_path: Vec<usize>,
    oracle_wer: usize,
    arc_probs: Vec<ArcNgramRef>,
    arc_bows: Vec<ArcNgramRef>,
}

impl Lattice {
    /// Parses the text FST format and resolves every arc against the
    /// model.
    pub fn load<L: LanguageModel, R: BufRead>(lm: &L, reader: R, tag: &str) -> Result<Lattice> {
        const FINAL_SENTINEL: u32 = u32::MAX;

        let mut lines = reader.lines();
        match lines.next().transpose()? {
            Some(line) if line.trim() == "#FSTBasic MinPlus" => {}
            _ => {
                return Err(Error::LatticeFormatError(
                    "missing #FSTBasic MinPlus header".to_string(),
                ))
            }
        }
        match lines.next().transpose()? {
            Some(line) if line.trim() == "I 0" => {}
            _ => {
                return Err(Error::LatticeFormatError(
                    "initial state must be `I 0`".to_string(),
                ))
            }
        }

        let vocab = lm.model().vocab();
        let mut arcs: Vec<(u32, u32, WordId, f64)> = Vec::new();
        for line in lines {
            let line = line?;
            let tokens: Vec<&str> = line.split_ascii_whitespace().collect();
            match tokens.first() {
                Some(&"T") => {
                    if tokens.len() < 4 {
                        return Err(Error::LatticeFormatError(line));
                    }
                    let start: u32 = tokens[1]
                        .parse()
                        .map_err(|_| Error::LatticeFormatError(line.clone()))?;
                    let end: u32 = tokens[2]
                        .parse()
                        .map_err(|_| Error::LatticeFormatError(line.clone()))?;
                    if start >= end {
                        return Err(Error::LatticeNotSorted);
                    }
                    let weight: f64 = match tokens.get(4) {
                        Some(w) => w
                            .parse()
                            .map_err(|_| Error::LatticeFormatError(line.clone()))?,
                        None => 0.0,
                    };
                    let word = vocab.find(tokens[3]);
                    if word == INVALID {
                        return Err(Error::LatticeOovWord(tokens[3].to_string()));
                    }
                    arcs.push((start, end, word, weight));
                }
                Some(&"F") => {
                    if tokens.len() < 2 {
                        return Err(Error::LatticeFormatError(line));
                    }
                    let start: u32 = tokens[1]
                        .parse()
                        .map_err(|_| Error::LatticeFormatError(line.clone()))?;
                    let weight: f64 = match tokens.get(2) {
                        Some(w) => w
                            .parse()
                            .map_err(|_| Error::LatticeFormatError(line.clone()))?,
                        None => 0.0,
                    };
                    arcs.push((start, FINAL_SENTINEL, Vocab::END_OF_SENTENCE, weight));
                }
                Some(&"P") | None => continue,
                Some(_) => return Err(Error::LatticeFormatError(line)),
            }
        }
        if arcs.is_empty() {
            return Err(Error::LatticeFormatError("lattice has no arcs".to_string()));
        }

        arcs.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        let final_node = arcs.last().map(|a| a.0 as usize + 1).unwrap_or(0);

        let num_arcs = arcs.len();
        let mut lattice = Lattice {
            tag: tag.to_string(),
            final_node,
            arc_starts: arcs.iter().map(|a| a.0).collect(),
            arc_ends: arcs
                .iter()
                .map(|a| {
                    if a.1 == FINAL_SENTINEL {
                        final_node as u32
                    } else {
                        a.1
                    }
                })
                .collect(),
            arc_words: arcs.iter().map(|a| a.2).collect(),
            arc_base_weights: arcs.iter().map(|a| a.3).collect(),
            arc_weights: vec![0.0; num_arcs],
            ref_words: Vec::new(),
            oracle_path: Vec::new(),
            oracle_wer: 0,
            arc_probs: Vec::new(),
            arc_bows: Vec::new(),
        };
        lattice.compute_arc_ngram_mapping(lm)?;
        lattice.update_weights(lm);
        Ok(lattice)
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn ref_words(&self) -> &[WordId] {
        &self.ref_words
    }

    pub fn oracle_wer(&self) -> usize {
        self.oracle_wer
    }

    pub fn arc_weights(&self) -> &[f64] {
        &self.arc_weights
    }

    /// Rescores every arc from the model's current probabilities.
    pub fn update_weights<L: LanguageModel>(&mut self, lm: &L) {
        self.arc_weights.clear();
        self.arc_weights.extend_from_slice(&self.arc_base_weights);
        for r in &self.arc_probs {
            self.arc_weights[r.arc] -= lm.probs(r.order)[r.index as usize].ln();
        }
        for r in &self.arc_bows {
            self.arc_weights[r.arc] -= lm.bows(r.order)[r.index as usize].ln();
        }
    }

    /// Marks every prob/bow index this lattice reads.
    pub fn seed_mask(&self, prob_seeds: &mut [Vec<bool>], bow_seeds: &mut [Vec<bool>]) {
        for r in &self.arc_probs {
            prob_seeds[r.order][r.index as usize] = true;
        }
        for r in &self.arc_bows {
            bow_seeds[r.order][r.index as usize] = true;
        }
    }

    /// Lowest-cost path from the initial to the final node, as arc
    /// indices.
    pub fn best_path(&self) -> (f64, Vec<usize>) {
        let num_nodes = self.final_node + 1;
        let mut best = vec![f64::INFINITY; num_nodes];
        let mut back: Vec<Option<usize>> = vec![None; num_nodes];
        best[0] = 0.0;
        for i in 0..self.arc_starts.len() {
            let start = self.arc_starts[i] as usize;
            let end = self.arc_ends[i] as usize;
            let score = best[start] + self.arc_weights[i];
            if score < best[end] {
                best[end] = score;
                back[end] = Some(i);
            }
        }

        let mut path = Vec::new();
        let mut node = self.final_node;
        while let Some(arc) = back[node] {
            path.push(arc);
            node = self.arc_starts[arc] as usize;
        }
        path.reverse();
        (best[self.final_node], path)
    }

    /// Words along the best path, without the closing boundary token.
    pub fn best_path_words(&self) -> Vec<WordId> {
        let (_, path) = self.best_path();
        path.iter()
            .map(|&arc| self.arc_words[arc])
            .filter(|&w| w != Vocab::END_OF_SENTENCE)
            .collect()
    }

    /// Attaches the reference transcription (tokens starting with `<`
    /// are tags and skipped) and finds the oracle path.
    pub fn set_reference<L: LanguageModel>(&mut self, lm: &L, text: &str) {
        self.ref_words = text
            .split_ascii_whitespace()
            .filter(|t| !t.starts_with('<'))
            .map(|t| lm.model().vocab().find(t))
            .collect();
        self.find_oracle_path();
    }

    /// Edit distance of the current best path against the reference.
    pub fn compute_wer(&self) -> usize {
        edit_distance(&self.best_path_words(), &self.ref_words)
    }

    /// Margin between the oracle path and its best competitor: positive
    /// when every other path costs more than the oracle.
    pub fn compute_margin(&self) -> f64 {
        let oracle_score: f64 = self.oracle_path.iter().map(|&a| self.arc_weights[a]).sum();
        let oracle_arcs: HashSet<usize> = self.oracle_path.iter().cloned().collect();

        let num_nodes = self.final_node + 1;
        let mut forward = vec![f64::INFINITY; num_nodes];
        forward[0] = 0.0;
        for i in 0..self.arc_starts.len() {
            let start = self.arc_starts[i] as usize;
            let end = self.arc_ends[i] as usize;
            forward[end] = forward[end].min(forward[start] + self.arc_weights[i]);
        }
        let mut backward = vec![f64::INFINITY; num_nodes];
        backward[self.final_node] = 0.0;
        for i in (0..self.arc_starts.len()).rev() {
            let start = self.arc_starts[i] as usize;
            let end = self.arc_ends[i] as usize;
            backward[start] = backward[start].min(self.arc_weights[i] + backward[end]);
        }

        // The best path through any non-oracle arc is the best competitor:
        // two distinct full paths always differ in at least one arc.
        let mut competitor = f64::INFINITY;
        for i in 0..self.arc_starts.len() {
            if !oracle_arcs.contains(&i) {
                let start = self.arc_starts[i] as usize;
                let end = self.arc_ends[i] as usize;
                competitor =
                    competitor.min(forward[start] + self.arc_weights[i] + backward[end]);
            }
        }
        competitor - oracle_score
    }

    pub fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        binio::write_tag(writer, "Lattice")?;
        binio::write_string(writer, &self.tag)?;
        binio::write_u64(writer, self.final_node as u64)?;
        binio::write_u32_vec(writer, &self.arc_starts)?;
        binio::write_u32_vec(writer, &self.arc_ends)?;
        binio::write_u32_vec(writer, &self.arc_words)?;
        binio::write_f64_vec(writer, &self.arc_base_weights)?;
        binio::write_u32_vec(writer, &self.ref_words)?;
        let pack = |refs: &[ArcNgramRef]| -> (Vec<u32>, Vec<u32>, Vec<u32>) {
            (
                refs.iter().map(|r| r.arc as u32).collect(),
                refs.iter().map(|r| r.order as u32).collect(),
                refs.iter().map(|r| r.index).collect(),
            )
        };
        for refs in [&self.arc_probs, &self.arc_bows] {
            let (arcs, orders, indices) = pack(refs);
            binio::write_u32_vec(writer, &arcs)?;
            binio::write_u32_vec(writer, &orders)?;
            binio::write_u32_vec(writer, &indices)?;
        }
        Ok(())
    }

    pub fn deserialize<L: LanguageModel, R: std::io::Read>(
        lm: &L,
        reader: &mut R,
    ) -> Result<Lattice> {
        binio::verify_tag(reader, "Lattice")?;
        let tag = binio::read_string(reader)?;
        let final_node = binio::read_u64(reader)? as usize;
        let arc_starts = binio::read_u32_vec(reader)?;
        let arc_ends = binio::read_u32_vec(reader)?;
        let arc_words = binio::read_u32_vec(reader)?;
        let arc_base_weights = binio::read_f64_vec(reader)?;
        let ref_words = binio::read_u32_vec(reader)?;
        let mut unpack = || -> Result<Vec<ArcNgramRef>> {
            let arcs = binio::read_u32_vec(reader)?;
            let orders = binio::read_u32_vec(reader)?;
            let indices = binio::read_u32_vec(reader)?;
            Ok(arcs
                .into_iter()
                .zip(orders)
                .zip(indices)
                .map(|((arc, order), index)| ArcNgramRef {
                    arc: arc as usize,
                    order: order as usize,
                    index,
                })
                .collect())
        };
        let arc_probs = unpack()?;
        let arc_bows = unpack()?;

        let num_arcs = arc_starts.len();
        let mut lattice = Lattice {
            tag,
            final_node,
            arc_starts,
            arc_ends,
            arc_words,
            arc_base_weights,
            arc_weights: vec![0.0; num_arcs],
            ref_words,
            oracle_path: Vec::new(),
            oracle_wer: 0,
            arc_probs,
            arc_bows,
        };
        lattice.update_weights(lm);
        if !lattice.ref_words.is_empty() {
            lattice.find_oracle_path();
        }
        Ok(lattice)
    }

    /// Resolves every arc to the longest model n-gram ending in its
    /// word, recording the back-off histories passed on the way down.
    fn compute_arc_ngram_mapping<L: LanguageModel>(&mut self, lm: &L) -> Result<()> {
        let order = lm.order();
        let model = lm.model();

        // node_maps[o - 1][node]: index of the order-o n-gram history
        // carried by the node; unique per node by construction.
        let mut node_maps: Vec<Vec<NgramIdx>> = Vec::new();
        for o in 1..order {
            let vector = model.vector(o);
            let mut map = vec![INVALID; self.final_node];
            let hist0 = if o == 1 {
                0
            } else {
                node_maps[o - 2][0]
            };
            map[0] = if hist0 == INVALID {
                INVALID
            } else {
                vector.find(hist0, Vocab::END_OF_SENTENCE)
            };
            for i in 0..self.arc_words.len() {
                let start = self.arc_starts[i] as usize;
                let hist = if o == 1 { 0 } else { node_maps[o - 2][start] };
                let index = if hist == INVALID {
                    INVALID
                } else {
                    vector.find(hist, self.arc_words[i])
                };
                let node = self.arc_ends[i] as usize;
                if node == self.final_node {
                    continue;
                }
                if map[node] == INVALID {
                    map[node] = index;
                } else if map[node] != index {
                    return Err(Error::LatticeAmbiguousHistory);
                }
            }
            node_maps.push(map);
        }

        self.arc_probs.clear();
        self.arc_bows.clear();
        for i in 0..self.arc_starts.len() {
            let start = self.arc_starts[i] as usize;
            let end = self.arc_ends[i] as usize;
            for o in (1..=order).rev() {
                let hist = if o == 1 { 0 } else { node_maps[o - 2][start] };
                if hist == INVALID {
                    continue;
                }
                let index = if o < order && end != self.final_node {
                    node_maps[o - 1][end]
                } else {
                    model.vector(o).find(hist, self.arc_words[i])
                };
                if index == INVALID {
                    self.arc_bows.push(ArcNgramRef {
                        arc: i,
                        order: o - 1,
                        index: hist,
                    });
                } else {
                    self.arc_probs.push(ArcNgramRef {
                        arc: i,
                        order: o,
                        index,
                    });
                    break;
                }
            }
        }
        Ok(())
    }

    /// Dynamic program over (node, reference position) minimizing
    /// (errors, score) lexicographically.
    fn find_oracle_path(&mut self) {
        #[derive(Clone, Copy, PartialEq)]
        enum Back {
            None,
            Delete,
            Arc { arc: usize, prev_j: usize },
        }

        let num_nodes = self.final_node + 1;
        let n_ref = self.ref_words.len();
        let inf = (usize::MAX / 2, f64::INFINITY);
        let mut cost = vec![vec![inf; n_ref + 1]; num_nodes];
        let mut back = vec![vec![Back::None; n_ref + 1]; num_nodes];
        cost[0][0] = (0, 0.0);

        let better = |a: (usize, f64), b: (usize, f64)| a.0 < b.0 || (a.0 == b.0 && a.1 < b.1);

        let mut arc_cursor = 0;
        for u in 0..num_nodes {
            // Deletions consume reference words without moving.
            for j in 0..n_ref {
                let (wer, score) = cost[u][j];
                let cand = (wer + 1, score);
                if better(cand, cost[u][j + 1]) {
                    cost[u][j + 1] = cand;
                    back[u][j + 1] = Back::Delete;
                }
            }

            while arc_cursor < self.arc_starts.len() && self.arc_starts[arc_cursor] as usize == u {
                let i = arc_cursor;
                arc_cursor += 1;
                let v = self.arc_ends[i] as usize;
                let word = self.arc_words[i];
                let weight = self.arc_weights[i];
                let structural = word == Vocab::END_OF_SENTENCE;
                for j in 0..=n_ref {
                    let (wer, score) = cost[u][j];
                    if wer >= usize::MAX / 2 {
                        continue;
                    }
                    if j < n_ref && !structural {
                        // Substitution or match.
                        let errors = wer + usize::from(word != self.ref_words[j]);
                        let cand = (errors, score + weight);
                        if better(cand, cost[v][j + 1]) {
                            cost[v][j + 1] = cand;
                            back[v][j + 1] = Back::Arc { arc: i, prev_j: j };
                        }
                    }
                    // Insertion; the boundary arc is free.
                    let cand = (wer + usize::from(!structural), score + weight);
                    if better(cand, cost[v][j]) {
                        cost[v][j] = cand;
                        back[v][j] = Back::Arc { arc: i, prev_j: j };
                    }
                }
            }
        }

        self.oracle_wer = cost[self.final_node][n_ref].0;
        self.oracle_path.clear();
        let mut node = self.final_node;
        let mut j = n_ref;
        loop {
            match back[node][j] {
                Back::None => break,
                Back::Delete => j -= 1,
                Back::Arc { arc, prev_j } => {
                    self.oracle_path.push(arc);
                    node = self.arc_starts[arc] as usize;
                    j = prev_j;
                }
            }
        }
        self.oracle_path.reverse();
    }
}

fn edit_distance(a: &[WordId], b: &[WordId]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, &wa) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, &wb) in b.iter().enumerate() {
            let sub = prev[j] + usize::from(wa != wb);
            cur[j + 1] = sub.min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

#[cfg(test)]
mod test {
    use super::{edit_distance, Lattice};
    use crate::lm::{LanguageModel, NgramLm};
    use crate::smooth::Smoothing;
    use approx::assert_abs_diff_eq;
    use std::io::Cursor;

    const LATTICE: &str = "#FSTBasic MinPlus\nI 0\nT 0 1 a a\nT 0 1 b b 0.5\nT 1 2 b b\nF 2\n";

    fn unigram_lm() -> NgramLm {
        let mut lm = NgramLm::new(1);
        lm.load_corpus(Cursor::new("a b\nb a a\n"), true).unwrap();
        lm.set_smoothings(vec![Smoothing::parse("ModKN").unwrap()]);
        let params = lm.default_params().to_vec();
        assert!(lm.estimate(&params, None));
        lm
    }

    #[test]
    fn rejects_bad_headers() {
        let lm = unigram_lm();
        let err = Lattice::load(&lm, Cursor::new("nope\n"), "t").unwrap_err();
        assert!(matches!(err, crate::Error::LatticeFormatError(_)));
    }

    #[test]
    fn rejects_unsorted_topologies() {
        let lm = unigram_lm();
        let text = "#FSTBasic MinPlus\nI 0\nT 1 0 a a\nF 1\n";
        let err = Lattice::load(&lm, Cursor::new(text), "t").unwrap_err();
        assert!(matches!(err, crate::Error::LatticeNotSorted));
    }

    #[test]
    fn rejects_oov_words() {
        let lm = unigram_lm();
        let text = "#FSTBasic MinPlus\nI 0\nT 0 1 zebra zebra\nF 1\n";
        let err = Lattice::load(&lm, Cursor::new(text), "t").unwrap_err();
        assert!(matches!(err, crate::Error::LatticeOovWord(_)));
    }

    // A unigram model rescoring: every arc weight must equal the base
    // weight minus the word's unigram log probability.
    #[test]
    fn unigram_rescoring_shifts_base_weights()
    {
        let lm = unigram_lm();
        let lattice = Lattice::load(&lm, Cursor::new(LATTICE), "utt1").unwrap();
        let vocab = lm.model().vocab();
        let a = vocab.find("a") as usize;
        let b = vocab.find("b") as usize;
        let p = |w: usize| lm.probs(1)[lm.model().find_ngram(&[w as u32]) as usize];

        // Arcs are sorted by (start, end); both 0 -> 1 arcs come first.
        assert_abs_diff_eq!(lattice.arc_weights()[0], -p(a).ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(lattice.arc_weights()[1], 0.5 - p(b).ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(lattice.arc_weights()[2], -p(b).ln(), epsilon = 1e-12);
        // The final arc scores the boundary token.
        assert_abs_diff_eq!(lattice.arc_weights()[3], -lm.probs(1)[0].ln(), epsilon = 1e-12);
    }

    #[test]
    fn best_path_ordering_is_scale_invariant() {
        let lm = unigram_lm();
        let mut lattice = Lattice::load(&lm, Cursor::new(LATTICE), "utt1").unwrap();
        let (_, path) = lattice.best_path();
        for w in lattice.arc_weights.iter_mut() {
            *w *= 3.5;
        }
        let (_, scaled_path) = lattice.best_path();
        assert_eq!(path, scaled_path);
    }

    #[test]
    fn oracle_and_wer_follow_the_reference() {
        let lm = unigram_lm();
        let mut lattice = Lattice::load(&lm, Cursor::new(LATTICE), "utt1").unwrap();
        lattice.set_reference(&lm, "a b");
        assert_eq!(lattice.oracle_wer(), 0);

        // The margin compares the oracle against the competing first arc.
        let margin = lattice.compute_margin();
        let w_a = lattice.arc_weights()[0];
        let w_b = lattice.arc_weights()[1];
        assert_abs_diff_eq!(margin, w_b - w_a, epsilon = 1e-12);

        lattice.set_reference(&lm, "b b");
        assert_eq!(lattice.oracle_wer(), 0);
    }

    #[test]
    fn binary_round_trip() {
        let lm = unigram_lm();
        let mut lattice = Lattice::load(&lm, Cursor::new(LATTICE), "utt1").unwrap();
        lattice.set_reference(&lm, "a b");
        let mut buf = Vec::new();
        lattice.serialize(&mut buf).unwrap();
        let reloaded = Lattice::deserialize(&lm, &mut Cursor::new(&buf)).unwrap();
        assert_eq!(reloaded.tag(), "utt1");
        assert_eq!(reloaded.arc_weights(), lattice.arc_weights());
        assert_eq!(reloaded.oracle_wer(), lattice.oracle_wer());
        assert_eq!(reloaded.compute_wer(), lattice.compute_wer());
    }

    #[test]
    fn edit_distance_is_levenshtein() {
        assert_eq!(edit_distance(&[1, 2, 3], &[1, 2, 3]), 0);
        assert_eq!(edit_distance(&[1, 2, 3], &[1, 3]), 1);
        assert_eq!(edit_distance(&[], &[1, 2]), 2);
        assert_eq!(edit_distance(&[1, 2], &[2, 1]), 2);
    }
}
