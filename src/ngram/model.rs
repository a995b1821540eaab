//! The multi-order n-gram model: one [`NgramVector`] per order plus the
//! vocabulary and the per-order back-off index arrays.
//!
//! Slot 0 holds a single sentinel n-gram carrying the 0th-order total, so
//! `vectors[o]` stores the o-grams and `hists` at order o index into
//! order o-1. All loaders accumulate into index-aligned side vectors and
//! finish by sorting the model: after `sort_model` the n-grams of every
//! order are lexicographic in `(hist, word)` and the back-off arrays
//! satisfy `vectors(o-1).find(backoffs(o-1)[hists[i]], words[i]) ==
//! backoffs(o)[i]`.

use std::io::{BufRead, Read, Write};

use itertools::Itertools;

use super::NgramVector;
use crate::binio;
use crate::reader::arpa::ArpaReader;
use crate::types::{Count, NgramIdx, Prob, WordId, INVALID};
use crate::vocab::Vocab;
use crate::{Error, Result};

#[derive(Clone, Debug)]
pub struct NgramModel {
    pub(crate) vocab: Vocab,
    pub(crate) vectors: Vec<NgramVector>,
    pub(crate) backoffs: Vec<Vec<NgramIdx>>,
}

impl NgramModel {
    pub fn new(order: usize) -> Self {
        let mut vectors = vec![NgramVector::new(); order + 1];
        vectors[0].add(0, 0);
        NgramModel {
            vocab: Vocab::new(),
            vectors,
            backoffs: Vec::new(),
        }
    }

    /// Highest n-gram length stored by the model.
    pub fn order(&self) -> usize {
        self.vectors.len() - 1
    }

    pub fn set_order(&mut self, order: usize) {
        self.vectors.resize_with(order + 1, NgramVector::new);
    }

    pub fn sizes(&self, order: usize) -> usize {
        self.vectors[order].len()
    }

    pub fn words(&self, order: usize) -> &[WordId] {
        self.vectors[order].words()
    }

    pub fn hists(&self, order: usize) -> &[NgramIdx] {
        self.vectors[order].hists()
    }

    /// Index in order `order - 1` of the suffix n-gram of every entry.
    pub fn backoffs(&self, order: usize) -> &[NgramIdx] {
        &self.backoffs[order]
    }

    pub fn vector(&self, order: usize) -> &NgramVector {
        &self.vectors[order]
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    pub fn vocab_mut(&mut self) -> &mut Vocab {
        &mut self.vocab
    }

    /// Walks the trie for the given word sequence; the empty sequence
    /// yields the 0th-order sentinel index.
    pub fn find_ngram(&self, words: &[WordId]) -> NgramIdx {
        let mut index: NgramIdx = 0;
        for (i, &word) in words.iter().enumerate() {
            if index == INVALID {
                return INVALID;
            }
            index = self.vectors[i + 1].find(index, word);
        }
        index
    }

    /// Remaps an index-aligned side vector through a sort permutation,
    /// filling entries that had no source with `default`.
    pub fn apply_sort<T: Copy>(map: &[NgramIdx], data: &mut Vec<T>, len: usize, default: T) {
        let mut sorted = vec![default; len];
        for (old, &new) in map.iter().enumerate() {
            if old < data.len() {
                sorted[new as usize] = data[old];
            }
        }
        *data = sorted;
    }

    /// Accumulates n-gram counts from whitespace-tokenized text, one
    /// sentence per line.
    ///
    /// Sentences are bracketed by the boundary token on both sides, so
    /// the begin context and the end-of-sentence target share word id 0.
    /// `<DOC ...>` / `</DOC>` markers are ignored here (the feature
    /// loaders consume them). The model is sorted afterwards and all
    /// count vectors are remapped into the sorted index space.
    pub fn load_corpus<R: BufRead>(
        &mut self,
        counts: &mut Vec<Vec<Count>>,
        reader: R,
        reset: bool,
    ) -> Result<()> {
        let order = self.order();
        Self::prepare_counts(counts, order, reset);

        let mut hists: Vec<NgramIdx> = vec![INVALID; order + 1];
        let mut words: Vec<WordId> = Vec::with_capacity(256);
        for line in reader.lines() {
            let line = line?;
            if line.starts_with("<DOC ") || line.trim_end() == "</DOC>" {
                continue;
            }

            words.clear();
            words.push(Vocab::END_OF_SENTENCE);
            for token in line.split_ascii_whitespace() {
                words.push(self.vocab.add(token));
            }
            words.push(Vocab::END_OF_SENTENCE);

            hists[1] = self.vectors[1].add(0, Vocab::END_OF_SENTENCE);
            for i in 1..words.len() {
                let word = words[i];
                let mut hist: NgramIdx = 0;
                for j in 1..std::cmp::min(i + 2, order + 1) {
                    if word != INVALID && hist != INVALID {
                        let (index, _) = self.vectors[j].add_new(hist, word);
                        if index as usize >= counts[j].len() {
                            counts[j].resize(index as usize + 1, 0);
                        }
                        counts[j][index as usize] += 1;
                        hist = hists[j];
                        hists[j] = index;
                    } else {
                        hist = hists[j];
                        hists[j] = INVALID;
                    }
                }
            }
        }

        // Give every vocabulary word a unigram entry, counted or not.
        if self.vectors[1].len() != self.vocab.len() {
            for id in 0..self.vocab.len() as WordId {
                self.vectors[1].add(0, id);
            }
        }

        self.finish_load(counts)
    }

    /// Accumulates counts from a counts file: `word_1 ... word_k<TAB>count`
    /// per line, `#` comments, an optional leading order-0 total line.
    pub fn load_counts<R: BufRead>(
        &mut self,
        counts: &mut Vec<Vec<Count>>,
        reader: R,
        reset: bool,
    ) -> Result<()> {
        let order = self.order();
        Self::prepare_counts(counts, order, reset);

        let mut ids: Vec<WordId> = Vec::with_capacity(order);
        for (line_index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let tokens: Vec<&str> = line.split_ascii_whitespace().collect();
            let Some((&count_token, word_tokens)) = tokens.split_last() else {
                continue;
            };
            let count: Count =
                count_token
                    .parse()
                    .map_err(|_| Error::CountsFormatError {
                        line: line_index + 1,
                        reason: format!("`{count_token}` is not a count"),
                    })?;

            if word_tokens.is_empty() {
                // Order-0 total.
                counts[0][0] += count;
                continue;
            }
            if word_tokens.len() > order {
                continue;
            }

            ids.clear();
            for token in word_tokens {
                ids.push(self.vocab.add(token));
            }
            if ids.contains(&INVALID) {
                continue;
            }

            let n = ids.len();
            let mut index: NgramIdx = 0;
            for (i, &id) in ids[..n - 1].iter().enumerate() {
                index = self.vectors[i + 1].add(index, id);
            }
            let (index, _) = self.vectors[n].add_new(index, ids[n - 1]);
            if index as usize >= counts[n].len() {
                counts[n].resize(index as usize + 1, 0);
            }
            counts[n][index as usize] += count;
        }

        self.finish_load(counts)
    }

    /// Writes counts as text, n-grams in index order.
    pub fn save_counts<W: Write>(
        &self,
        counts: &[Vec<Count>],
        writer: &mut W,
        include_zero_order: bool,
    ) -> Result<()> {
        if include_zero_order && counts[0].len() == 1 {
            writeln!(writer, "\t{}", counts[0][0])?;
        }
        for o in 1..counts.len() {
            for (i, &count) in counts[o].iter().enumerate() {
                let ngram = self.ngram_words(o, i as NgramIdx).into_iter().join(" ");
                writeln!(writer, "{ngram}\t{count}")?;
            }
        }
        Ok(())
    }

    /// Loads an ARPA back-off model, interning all words and n-grams.
    ///
    /// The `<s>` unigram line is the boundary context: its probability is
    /// a placeholder and its back-off weight lands on the id-0 unigram,
    /// which is the history of every sentence-initial n-gram.
    pub fn load_arpa<R: BufRead>(
        &mut self,
        probs: &mut Vec<Vec<Prob>>,
        bows: &mut Vec<Vec<Prob>>,
        reader: R,
    ) -> Result<()> {
        let mut arpa = ArpaReader::new(reader)?;
        let order = arpa.order();
        self.set_order(order);

        probs.clear();
        probs.resize(order + 1, Vec::new());
        probs[0] = vec![0.0];
        bows.clear();
        bows.resize(order.max(1), Vec::new());
        bows[0] = vec![0.0];
        for o in 1..=order {
            probs[o] = vec![0.0; arpa.counts()[o - 1]];
            if o < order {
                bows[o] = vec![1.0; arpa.counts()[o - 1]];
            }
        }

        while let Some(entry) = arpa.next_ngram()? {
            let o = entry.order;
            let mut index: NgramIdx = 0;
            let mut word: WordId = INVALID;
            for (i, token) in entry.ngram.split_ascii_whitespace().enumerate() {
                word = self.vocab.add(token);
                if word == INVALID {
                    index = INVALID;
                    break;
                }
                index = self.vectors[i + 1].add(index, word);
            }
            if index == INVALID {
                tracing::debug!(ngram = %entry.ngram, "skipping out-of-vocabulary n-gram");
                continue;
            }

            let prob = pow10(entry.log_prob);
            if o == 1 && word == Vocab::END_OF_SENTENCE {
                if entry.ngram == "<s>" {
                    // Boundary context: `-99` probability placeholder, the
                    // back-off weight belongs to the id-0 history.
                    if order > 1 {
                        grow(&mut bows[1], index, 1.0);
                        bows[1][index as usize] = entry.log_bow.map(pow10).unwrap_or(1.0);
                    }
                } else {
                    grow(&mut probs[1], index, 0.0);
                    probs[1][index as usize] = prob;
                    if entry.log_bow.is_some() {
                        tracing::warn!("ignoring back-off weight on the </s> unigram");
                    }
                }
                continue;
            }

            grow(&mut probs[o], index, 0.0);
            probs[o][index as usize] = prob;
            if o < order {
                grow(&mut bows[o], index, 1.0);
                bows[o][index as usize] = entry.log_bow.map(pow10).unwrap_or(1.0);
            }
        }

        let (_, maps) = self.sort_model()?;
        for o in 1..=order {
            let len = self.sizes(o);
            Self::apply_sort(&maps[o], &mut probs[o], len, 0.0);
            if o < order {
                Self::apply_sort(&maps[o], &mut bows[o], len, 1.0);
            }
        }
        Ok(())
    }

    /// Writes the model in the text ARPA format.
    pub fn save_arpa<W: Write>(
        &self,
        probs: &[Vec<Prob>],
        bows: &[Vec<Prob>],
        writer: &mut W,
    ) -> Result<()> {
        let order = self.order();
        for o in 1..=order {
            if probs[o].iter().any(|p| p.is_nan())
                || (o < order && bows[o].iter().any(|b| b.is_nan()))
            {
                return Err(Error::InvariantViolation(format!(
                    "NaN in order-{o} probabilities"
                )));
            }
        }

        writeln!(writer)?;
        writeln!(writer, "\\data\\")?;
        writeln!(writer, "ngram 1={}", self.sizes(1) + 1)?;
        for o in 2..=order {
            writeln!(writer, "ngram {o}={}", self.sizes(o))?;
        }

        for o in 1..=order {
            writeln!(writer)?;
            writeln!(writer, "\\{o}-grams:")?;
            let has_bow = o < order;
            let mut start = 0;
            if o == 1 {
                // The id-0 unigram doubles as </s> target and <s> context.
                writeln!(writer, "{}\t</s>", lprob(probs[1][0]))?;
                if has_bow {
                    writeln!(writer, "-99\t<s>\t{}", lprob(bows[1][0]))?;
                } else {
                    writeln!(writer, "-99\t<s>")?;
                }
                start = 1;
            }
            for i in start..self.sizes(o) {
                let ngram = self.ngram_words(o, i as NgramIdx).into_iter().join(" ");
                write!(writer, "{}\t{}", lprob(probs[o][i]), ngram)?;
                if has_bow && bows[o][i] != 1.0 {
                    write!(writer, "\t{}", lprob(bows[o][i]))?;
                }
                writeln!(writer)?;
            }
        }

        writeln!(writer)?;
        writeln!(writer, "\\end\\")?;
        Ok(())
    }

    /// Counts, for every running position of an evaluation corpus, which
    /// probability index scores it and which history indices are
    /// traversed while backing off to reach that probability.
    pub fn load_eval_corpus<R: BufRead>(
        &self,
        prob_counts: &mut Vec<Vec<Count>>,
        bow_counts: &mut Vec<Vec<Count>>,
        vocab_mask: &[bool],
        reader: R,
    ) -> Result<(usize, usize)> {
        let order = self.order();
        prob_counts.clear();
        bow_counts.clear();
        for o in 0..=order {
            prob_counts.push(vec![0; self.sizes(o)]);
        }
        for o in 0..order {
            bow_counts.push(vec![0; self.sizes(o)]);
        }

        let mut num_oov = 0;
        let mut num_words = 0;
        let mut words: Vec<WordId> = Vec::with_capacity(256);
        for line in reader.lines() {
            let line = line?;
            if line.starts_with("<DOC ") || line.trim_end() == "</DOC>" {
                continue;
            }

            words.clear();
            words.push(Vocab::END_OF_SENTENCE);
            for token in line.split_ascii_whitespace() {
                words.push(self.vocab.find(token));
            }
            words.push(Vocab::END_OF_SENTENCE);

            let mut ngram_order = std::cmp::min(2, order);
            for i in 1..words.len() {
                let word = words[i];
                let in_vocab = word != INVALID
                    && vocab_mask.get(word as usize).copied().unwrap_or(false);
                if !in_vocab {
                    // Out-of-vocabulary position resets the context.
                    ngram_order = 1;
                    num_oov += 1;
                    continue;
                }
                let mut bo_order = ngram_order;
                let index = loop {
                    let index = self.find_ngram(&words[i + 1 - bo_order..=i]);
                    if index != INVALID {
                        break index;
                    }
                    bo_order -= 1;
                    let hist = self.find_ngram(&words[i - bo_order..i]);
                    if hist != INVALID {
                        bow_counts[bo_order][hist as usize] += 1;
                    }
                };
                ngram_order = std::cmp::min(ngram_order + 1, order);
                prob_counts[bo_order][index as usize] += 1;
                num_words += 1;
            }
        }
        Ok((num_oov, num_words))
    }

    /// Words of the n-gram at `(order, index)`, oldest first. A leading
    /// id-0 word is the sentence-begin context and prints as `<s>`.
    pub fn ngram_words(&self, order: usize, index: NgramIdx) -> Vec<&str> {
        let mut words = vec![""; order];
        let mut index = index as usize;
        let mut word = INVALID;
        for o in (1..=order).rev() {
            let v = &self.vectors[o];
            word = v.words()[index];
            words[o - 1] = self.vocab.word(word);
            index = v.hists()[index] as usize;
        }
        if word == Vocab::END_OF_SENTENCE {
            words[0] = "<s>";
        }
        words
    }

    /// Merges all n-grams of `other` into this model, returning the
    /// vocabulary and per-order index maps from `other` into the merge.
    /// Call [`sort_model`](Self::sort_model) once all components are in.
    pub fn extend_model(&mut self, other: &NgramModel) -> (Vec<WordId>, Vec<Vec<NgramIdx>>) {
        let mut vocab_map = vec![INVALID; other.vocab.len()];
        for id in 0..other.vocab.len() as WordId {
            vocab_map[id as usize] = self.vocab.add(other.vocab.word(id));
        }

        if self.vectors.len() < other.vectors.len() {
            self.set_order(other.order());
        }
        let mut maps: Vec<Vec<NgramIdx>> = vec![Vec::new(); other.vectors.len()];
        maps[0] = vec![0];
        for o in 1..other.vectors.len() {
            let words = other.vectors[o].words();
            let hists = other.vectors[o].hists();
            maps[o] = vec![INVALID; words.len()];
            for i in 0..words.len() {
                let hist = maps[o - 1][hists[i] as usize];
                let word = vocab_map[words[i] as usize];
                maps[o][i] = self.vectors[o].add(hist, word);
            }
        }
        (vocab_map, maps)
    }

    /// Sorts the vocabulary and every order, recomputes back-off indices
    /// and returns the vocabulary map plus the per-order index maps.
    pub fn sort_model(&mut self) -> Result<(Vec<WordId>, Vec<Vec<NgramIdx>>)> {
        let vocab_map = self.vocab.sort();
        let mut maps: Vec<Vec<NgramIdx>> = Vec::with_capacity(self.vectors.len());
        let mut hist_map: Vec<NgramIdx> = vec![0];
        for o in 0..self.vectors.len() {
            let map = self.vectors[o].sort(&vocab_map, &hist_map);
            hist_map.clone_from(&map);
            maps.push(map);
        }
        self.compute_backoffs()?;
        Ok((vocab_map, maps))
    }

    pub fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        binio::write_tag(writer, "NgramModel")?;
        self.vocab.serialize(writer)?;
        binio::write_u64(writer, self.vectors.len() as u64)?;
        for vector in &self.vectors {
            vector.serialize(writer)?;
        }
        Ok(())
    }

    pub fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        binio::verify_tag(reader, "NgramModel")?;
        let vocab = Vocab::deserialize(reader)?;
        let num_vectors = binio::read_u64(reader)? as usize;
        let mut vectors = Vec::with_capacity(num_vectors);
        for _ in 0..num_vectors {
            vectors.push(NgramVector::deserialize(reader)?);
        }
        let mut model = NgramModel {
            vocab,
            vectors,
            backoffs: Vec::new(),
        };
        model.compute_backoffs()?;
        Ok(model)
    }

    fn prepare_counts(counts: &mut Vec<Vec<Count>>, order: usize, reset: bool) {
        counts.resize(order + 1, Vec::new());
        if reset {
            for c in counts.iter_mut() {
                c.clear();
            }
        }
        if counts[0].is_empty() {
            counts[0] = vec![0];
        }
    }

    /// Sorts the model and remaps the accumulated counts.
    fn finish_load(&mut self, counts: &mut Vec<Vec<Count>>) -> Result<()> {
        let (_, maps) = self.sort_model()?;
        for o in 0..counts.len() {
            let len = self.sizes(o);
            Self::apply_sort(&maps[o], &mut counts[o], len, 0);
        }
        Ok(())
    }

    /// Recomputes the suffix links: unigrams back off to the sentinel,
    /// bigrams to the unigram of their word, higher orders through the
    /// back-off of their history.
    fn compute_backoffs(&mut self) -> Result<()> {
        let num = self.vectors.len();
        self.backoffs = vec![Vec::new(); num];
        self.backoffs[0] = vec![0; self.vectors[0].len()];
        if num > 1 {
            self.backoffs[1] = vec![0; self.vectors[1].len()];
        }

        if num > 2 {
            let words = self.vectors[2].words();
            let mut backoffs = vec![INVALID; words.len()];
            for (i, &word) in words.iter().enumerate() {
                backoffs[i] = self.vectors[1].find(0, word);
            }
            self.backoffs[2] = backoffs;
        }

        for o in 3..num {
            let words = self.vectors[o].words();
            let hists = self.vectors[o].hists();
            let mut backoffs = vec![INVALID; words.len()];
            for i in 0..words.len() {
                let lo_hist = self.backoffs[o - 1][hists[i] as usize];
                backoffs[i] = self.vectors[o - 1].find(lo_hist, words[i]);
            }
            self.backoffs[o] = backoffs;
        }

        for o in 2..num {
            if self.backoffs[o].contains(&INVALID) {
                return Err(Error::InvariantViolation(format!(
                    "unreachable back-off at order {o}"
                )));
            }
        }
        Ok(())
    }
}

fn pow10(log_prob: f64) -> Prob {
    10f64.powf(log_prob)
}

fn lprob(prob: Prob) -> String {
    if prob == 0.0 {
        "-99".to_string()
    } else {
        format!("{:.6}", prob.log10())
    }
}

fn grow<T: Copy>(data: &mut Vec<T>, index: NgramIdx, default: T) {
    if index as usize >= data.len() {
        data.resize(index as usize + 1, default);
    }
}

#[cfg(test)]
mod test {
    use super::NgramModel;
    use crate::types::INVALID;
    use std::io::Cursor;

    fn trigram_model(corpus: &str) -> (NgramModel, Vec<Vec<u32>>) {
        let mut model = NgramModel::new(3);
        let mut counts = Vec::new();
        model
            .load_corpus(&mut counts, Cursor::new(corpus), true)
            .unwrap();
        (model, counts)
    }

    #[test]
    fn corpus_counts_are_accumulated() {
        let (model, counts) = trigram_model("a b a b c\n");
        let vocab = model.vocab();
        let a = vocab.find("a");
        let b = vocab.find("b");

        // One sentence: </s> is counted once, as the closing boundary.
        assert_eq!(counts[1][0], 1);
        assert_eq!(counts[1][model.find_ngram(&[a]) as usize], 2);
        assert_eq!(counts[1][model.find_ngram(&[b]) as usize], 2);

        // The begin context shares id 0 with </s>.
        assert_eq!(counts[2][model.find_ngram(&[0, a]) as usize], 1);
        assert_eq!(counts[2][model.find_ngram(&[a, b]) as usize], 2);
        assert_eq!(counts[3][model.find_ngram(&[a, b, a]) as usize], 1);
        assert_eq!(model.find_ngram(&[b, b]), INVALID);
    }

    #[test]
    fn sorted_indices_are_lexicographic() {
        let (model, _) = trigram_model("c a b\nb a c\na c b\n");
        for o in 1..=3 {
            let hists = model.hists(o);
            let words = model.words(o);
            for i in 1..model.sizes(o) {
                assert!(
                    (hists[i - 1], words[i - 1]) < (hists[i], words[i]),
                    "order {o} not sorted at {i}"
                );
            }
        }
    }

    #[test]
    fn backoff_links_are_consistent() {
        let (model, _) = trigram_model("a b c a b\nc b a\n");
        for o in 2..=3 {
            let hists = model.hists(o);
            let words = model.words(o);
            let backoffs = model.backoffs(o);
            let lo_backoffs = model.backoffs(o - 1);
            for i in 0..model.sizes(o) {
                let suffix_hist = lo_backoffs[hists[i] as usize];
                assert_eq!(
                    model.vector(o - 1).find(suffix_hist, words[i]),
                    backoffs[i],
                    "order {o} index {i}"
                );
            }
        }
    }

    #[test]
    fn eval_corpus_counts_probs_and_bows() {
        let (model, _) = trigram_model("a b c\n");
        let mut prob_counts = Vec::new();
        let mut bow_counts = Vec::new();
        let vocab_mask = vec![true; model.sizes(1)];
        let (num_oov, num_words) = model
            .load_eval_corpus(
                &mut prob_counts,
                &mut bow_counts,
                &vocab_mask,
                Cursor::new("a b c\na c\n"),
            )
            .unwrap();
        assert_eq!(num_oov, 0);
        // Four words plus two sentence ends.
        assert_eq!(num_words, 6);
        let total_probs: u32 = prob_counts.iter().flatten().sum();
        assert_eq!(total_probs as usize, num_words);
        // The unseen bigram (a, c) forces at least one back-off.
        let total_bows: u32 = bow_counts.iter().flatten().sum();
        assert!(total_bows > 0);
    }

    #[test]
    fn oov_words_reset_the_context() {
        let (model, _) = trigram_model("a b c\n");
        let mut prob_counts = Vec::new();
        let mut bow_counts = Vec::new();
        let vocab_mask = vec![true; model.sizes(1)];
        let (num_oov, num_words) = model
            .load_eval_corpus(
                &mut prob_counts,
                &mut bow_counts,
                &vocab_mask,
                Cursor::new("a zebra c\n"),
            )
            .unwrap();
        assert_eq!(num_oov, 1);
        assert_eq!(num_words, 3);
    }

    #[test]
    fn ngram_words_prints_the_begin_context() {
        let (model, _) = trigram_model("a b\n");
        let a = model.vocab().find("a");
        let begin_bigram = model.find_ngram(&[0, a]);
        assert_eq!(model.ngram_words(2, begin_bigram), vec!["<s>", "a"]);
        let end_bigram = model.find_ngram(&[model.vocab().find("b"), 0]);
        assert_eq!(model.ngram_words(2, end_bigram), vec!["b", "</s>"]);
    }

    #[test]
    fn extend_model_merges_index_spaces() {
        let (mut merged, _) = trigram_model("a b\n");
        let (other, _) = trigram_model("b c\n");
        let (vocab_map, maps) = merged.extend_model(&other);
        merged.sort_model().unwrap();

        // Every n-gram of `other` has a pre-sort image in the merge.
        assert_eq!(vocab_map.len(), other.vocab().len());
        for o in 1..=3 {
            assert_eq!(maps[o].len(), other.sizes(o));
            assert!(maps[o].iter().all(|&i| i != INVALID));
        }
        assert!(merged.vocab().len() >= other.vocab().len());
        assert!(merged.sizes(1) >= other.sizes(1));
    }

    #[test]
    fn binary_round_trip_is_byte_exact() {
        let (model, _) = trigram_model("a b c a\n");
        let mut buf = Vec::new();
        model.serialize(&mut buf).unwrap();
        let reloaded = NgramModel::deserialize(&mut Cursor::new(&buf)).unwrap();
        let mut buf2 = Vec::new();
        reloaded.serialize(&mut buf2).unwrap();
        assert_eq!(buf, buf2);
        assert_eq!(reloaded.sizes(2), model.sizes(2));
    }
}
