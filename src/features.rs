//! Per-order n-gram feature bundles.
//!
//! A feature bundle is one dense vector per order, index-aligned with the
//! model. Values come from a feature file (`word_1 ... word_k<TAB>value`
//! per line) or are computed from a document-marked corpus (document
//! frequency or normalized document entropy), and can be piped through a
//! chain of pointwise transforms written `func1:func2:path` and applied
//! innermost-first.

use std::io::BufRead;
use std::str::FromStr;

use itertools::Itertools;

use crate::ngram::NgramModel;
use crate::types::{Count, NgramIdx, WordId, INVALID};
use crate::zio;
use crate::{Error, Result};

/// One dense feature vector per order; index 0 is the 0th-order slot.
pub type FeatureVectors = Vec<Vec<f64>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transform {
    Log,
    Log1p,
    Pow2,
    Pow3,
    Norm,
    SumHist,
}

impl FromStr for Transform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "log" => Ok(Transform::Log),
            "log1p" => Ok(Transform::Log1p),
            "pow2" => Ok(Transform::Pow2),
            "pow3" => Ok(Transform::Pow3),
            "norm" => Ok(Transform::Norm),
            "sumhist" => Ok(Transform::SumHist),
            other => Err(Error::UnknownFeatureTransform(other.to_string())),
        }
    }
}

/// Sums `values` into bins selected by `bins`: `out[bins[i]] += values[i]`.
pub(crate) fn bin_weight(bins: &[NgramIdx], values: &[f64], out_len: usize) -> Vec<f64> {
    let mut out = vec![0.0; out_len];
    for (i, &bin) in bins.iter().enumerate() {
        out[bin as usize] += values[i];
    }
    out
}

impl NgramModel {
    /// Loads one feature value per n-gram line; n-grams absent from the
    /// model are skipped with a warning.
    pub fn load_features<R: BufRead>(
        &self,
        features: &mut FeatureVectors,
        reader: R,
        max_order: usize,
    ) -> Result<()> {
        let max_order = clamp_order(max_order, self.order());
        features.clear();
        for o in 0..=max_order {
            features.push(vec![0.0; self.sizes(o)]);
        }

        let mut ids: Vec<WordId> = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let tokens: Vec<&str> = line.split_ascii_whitespace().collect();
            let Some((&value_token, word_tokens)) = tokens.split_last() else {
                continue;
            };
            if word_tokens.len() > max_order {
                continue;
            }
            let Ok(value) = value_token.parse::<f64>() else {
                tracing::warn!(line = %line, "feature value could not be parsed, skipped");
                continue;
            };
            if word_tokens.is_empty() {
                features[0][0] = value;
                continue;
            }

            ids.clear();
            for token in word_tokens {
                ids.push(self.vocab.find(token));
            }
            let index = if ids.contains(&INVALID) {
                INVALID
            } else {
                self.find_ngram(&ids)
            };
            if index == INVALID {
                tracing::warn!(line = %line, "feature n-gram not in model, skipped");
                continue;
            }
            features[word_tokens.len()][index as usize] = value;
        }
        Ok(())
    }

    /// Loads a feature bundle from a `func1:func2:path` specification.
    ///
    /// The innermost function may be `freq` or `entropy`, in which case
    /// the path is a document-marked corpus; every other function is a
    /// pointwise transform applied innermost-first after loading.
    pub fn load_computed_features(
        &self,
        features: &mut FeatureVectors,
        spec: &str,
        max_order: usize,
    ) -> Result<()> {
        let max_order = clamp_order(max_order, self.order());
        let parts: Vec<&str> = spec.split(':').collect();
        let Some((&path, funcs)) = parts.split_last() else {
            return Err(Error::FeatureSpecError(spec.to_string()));
        };
        if path.is_empty() {
            return Err(Error::FeatureSpecError(spec.to_string()));
        }
        let mut funcs = funcs.to_vec();

        let reader = zio::open_reader(path)?;
        match funcs.last() {
            Some(&"freq") => {
                self.doc_frequency(features, reader, max_order)?;
                funcs.pop();
            }
            Some(&"entropy") => {
                self.doc_entropy(features, reader, max_order)?;
                funcs.pop();
            }
            _ => self.load_features(features, reader, max_order)?,
        }

        for func in funcs.iter().rev() {
            self.apply_transform(features, Transform::from_str(func)?);
        }

        for (o, values) in features.iter().enumerate() {
            if values.iter().any(|v| v.abs() > 20.0) {
                tracing::warn!(spec, order = o, "feature values exceed 20.0");
                break;
            }
        }
        Ok(())
    }

    pub fn apply_transform(&self, features: &mut FeatureVectors, transform: Transform) {
        match transform {
            Transform::Log => {
                for values in features.iter_mut() {
                    for v in values.iter_mut() {
                        *v = (*v + 1e-99).ln();
                    }
                }
            }
            Transform::Log1p => {
                for values in features.iter_mut() {
                    for v in values.iter_mut() {
                        *v = (*v + 1.0).ln();
                    }
                }
            }
            Transform::Pow2 => {
                for values in features.iter_mut() {
                    for v in values.iter_mut() {
                        *v = *v * *v;
                    }
                }
            }
            Transform::Pow3 => {
                for values in features.iter_mut() {
                    for v in values.iter_mut() {
                        *v = *v * *v * *v;
                    }
                }
            }
            Transform::Norm => {
                for values in features.iter_mut() {
                    let max = values.iter().cloned().fold(f64::MIN, f64::max);
                    if max != 0.0 && max != f64::MIN {
                        for v in values.iter_mut() {
                            *v /= max;
                        }
                    }
                }
            }
            Transform::SumHist => {
                // Lift order-o features to order o-1 by summing over the
                // completions of every history; the top order is dropped.
                for o in 0..features.len() - 1 {
                    let lifted = bin_weight(self.hists(o + 1), &features[o + 1], self.sizes(o));
                    features[o] = lifted;
                }
                features.pop();
            }
        }
    }

    /// Fraction of documents containing each n-gram. Documents are
    /// delimited by `</DOC>` lines.
    pub fn doc_frequency<R: BufRead>(
        &self,
        features: &mut FeatureVectors,
        reader: R,
        max_order: usize,
    ) -> Result<()> {
        let max_order = clamp_order(max_order, self.order());
        let mut counts: Vec<Vec<Count>> = (0..=max_order).map(|o| vec![0; self.sizes(o)]).collect();
        features.clear();
        for o in 0..=max_order {
            features.push(vec![0.0; self.sizes(o)]);
        }

        let mut num_docs = 0usize;
        self.scan_documents(reader, max_order, &mut counts, |counts, features| {
            num_docs += 1;
            for o in 1..counts.len() {
                for (i, count) in counts[o].iter_mut().enumerate() {
                    if *count > 0 {
                        features[o][i] += 1.0;
                        *count = 0;
                    }
                }
            }
        }, features)?;

        if num_docs > 0 {
            for values in features.iter_mut().skip(1) {
                for v in values.iter_mut() {
                    *v /= num_docs as f64;
                }
            }
        }
        Ok(())
    }

    /// Normalized entropy of the per-document count distribution of each
    /// n-gram.
    pub fn doc_entropy<R: BufRead>(
        &self,
        features: &mut FeatureVectors,
        reader: R,
        max_order: usize,
    ) -> Result<()> {
        let max_order = clamp_order(max_order, self.order());
        let mut counts: Vec<Vec<Count>> = (0..=max_order).map(|o| vec![0; self.sizes(o)]).collect();
        let mut totals: Vec<Vec<Count>> = counts.clone();
        features.clear();
        for o in 0..=max_order {
            features.push(vec![0.0; self.sizes(o)]);
        }

        let mut num_docs = 0usize;
        self.scan_documents(reader, max_order, &mut counts, |counts, features| {
            num_docs += 1;
            for o in 1..counts.len() {
                for (i, count) in counts[o].iter_mut().enumerate() {
                    let c = *count;
                    if c > 0 {
                        totals[o][i] += c;
                        features[o][i] += c as f64 * (c as f64).ln();
                        *count = 0;
                    }
                }
            }
        }, features)?;

        if num_docs > 1 {
            let inv_log_docs = 1.0 / (num_docs as f64).ln();
            for o in 1..features.len() {
                for (i, v) in features[o].iter_mut().enumerate() {
                    let tot = totals[o][i] as f64;
                    *v = if tot == 0.0 {
                        0.0
                    } else {
                        (*v / -tot + tot.ln()) * inv_log_docs
                    };
                }
            }
        } else {
            // A single document carries no distributional information.
            for values in features.iter_mut().skip(1) {
                values.iter_mut().for_each(|v| *v = 0.0);
            }
        }
        Ok(())
    }

    /// Walks a document-marked corpus accumulating per-document n-gram
    /// counts, invoking `flush` at every `</DOC>` marker and at the end.
    fn scan_documents<R, F>(
        &self,
        reader: R,
        max_order: usize,
        counts: &mut Vec<Vec<Count>>,
        mut flush: F,
        features: &mut FeatureVectors,
    ) -> Result<()>
    where
        R: BufRead,
        F: FnMut(&mut Vec<Vec<Count>>, &mut FeatureVectors),
    {
        let mut hists: Vec<NgramIdx> = vec![INVALID; max_order + 1];
        let mut words: Vec<WordId> = Vec::with_capacity(256);
        let mut saw_tokens = false;
        for line in reader.lines() {
            let line = line?;
            if line.trim_end() == "</DOC>" {
                flush(counts, features);
                saw_tokens = false;
                continue;
            }
            if line.starts_with("<DOC ") {
                continue;
            }
            saw_tokens = true;

            words.clear();
            words.push(crate::vocab::Vocab::END_OF_SENTENCE);
            for token in line.split_ascii_whitespace() {
                words.push(self.vocab.find(token));
            }
            words.push(crate::vocab::Vocab::END_OF_SENTENCE);

            hists[1] = self.vector(1).find(0, crate::vocab::Vocab::END_OF_SENTENCE);
            for i in 1..words.len() {
                let word = words[i];
                let mut hist: NgramIdx = 0;
                for j in 1..std::cmp::min(i + 2, max_order + 1) {
                    if word != INVALID {
                        let index = self.vector(j).find(hist, word);
                        if index != INVALID {
                            counts[j][index as usize] += 1;
                        } else {
                            tracing::warn!("document statistic skipped an unseen n-gram");
                        }
                        hist = hists[j];
                        hists[j] = index;
                    } else {
                        hist = hists[j];
                        hists[j] = INVALID;
                    }
                }
            }
        }
        if saw_tokens {
            // Corpus without a trailing </DOC> still forms one document.
            flush(counts, features);
        }
        Ok(())
    }

    /// Writes a feature bundle as text, n-grams in index order.
    pub fn save_features<W: std::io::Write>(
        &self,
        features: &FeatureVectors,
        writer: &mut W,
    ) -> Result<()> {
        if features[0].len() == 1 {
            writeln!(writer, "\t{:.6}", features[0][0])?;
        }
        for o in 1..features.len() {
            for (i, value) in features[o].iter().enumerate() {
                let ngram = self.ngram_words(o, i as NgramIdx).into_iter().join(" ");
                writeln!(writer, "{ngram}\t{value:.6}")?;
            }
        }
        Ok(())
    }
}

fn clamp_order(max_order: usize, model_order: usize) -> usize {
    if max_order == 0 || max_order > model_order {
        model_order
    } else {
        max_order
    }
}

#[cfg(test)]
mod test {
    use super::{FeatureVectors, Transform};
    use crate::ngram::NgramModel;
    use approx::assert_abs_diff_eq;
    use std::io::Cursor;

    fn bigram_model(corpus: &str) -> NgramModel {
        let mut model = NgramModel::new(2);
        let mut counts = Vec::new();
        model
            .load_corpus(&mut counts, Cursor::new(corpus), true)
            .unwrap();
        model
    }

    #[test]
    fn loads_feature_file() {
        let model = bigram_model("a b\n");
        let mut features: FeatureVectors = Vec::new();
        model
            .load_features(&mut features, Cursor::new("a\t2.5\na b\t0.5\nzz\t1.0\n"), 0)
            .unwrap();
        let a = model.vocab().find("a");
        assert_abs_diff_eq!(features[1][a as usize], 2.5);
        let ab = model.find_ngram(&[a, model.vocab().find("b")]);
        assert_abs_diff_eq!(features[2][ab as usize], 0.5);
    }

    #[test]
    fn doc_frequency_counts_documents() {
        let corpus = "<DOC 1>\na b\n</DOC>\n<DOC 2>\na a\n</DOC>\n";
        let model = bigram_model("a b\na a\n");
        let mut features: FeatureVectors = Vec::new();
        model
            .doc_frequency(&mut features, Cursor::new(corpus), 0)
            .unwrap();
        let a = model.vocab().find("a") as usize;
        let b = model.vocab().find("b") as usize;
        // `a` appears in both documents, `b` in one.
        assert_abs_diff_eq!(features[1][a], 1.0);
        assert_abs_diff_eq!(features[1][b], 0.5);
    }

    #[test]
    fn entropy_is_zero_for_single_document_ngrams() {
        let corpus = "<DOC 1>\na b\n</DOC>\n<DOC 2>\na a\n</DOC>\n";
        let model = bigram_model("a b\na a\n");
        let mut features: FeatureVectors = Vec::new();
        model
            .doc_entropy(&mut features, Cursor::new(corpus), 0)
            .unwrap();
        let b = model.vocab().find("b") as usize;
        // `b` occurs in a single document: zero entropy.
        assert_abs_diff_eq!(features[1][b], 0.0, epsilon = 1e-12);
        let a = model.vocab().find("a") as usize;
        // `a` occurs once in one document and twice in the other.
        let expect = ((3.0f64.ln() - (2.0 * 2.0f64.ln()) / 3.0) / 2.0f64.ln()) / 1.0;
        assert_abs_diff_eq!(features[1][a], expect, epsilon = 1e-9);
    }

    #[test]
    fn sumhist_lifts_and_drops_the_top_order() {
        let model = bigram_model("a b\n");
        let mut features: FeatureVectors = vec![
            vec![0.0],
            vec![0.0; model.sizes(1)],
            vec![1.0; model.sizes(2)],
        ];
        model.apply_transform(&mut features, Transform::SumHist);
        assert_eq!(features.len(), 2);
        // Every unigram history receives the number of its completions.
        let total: f64 = features[1].iter().sum();
        assert_abs_diff_eq!(total, model.sizes(2) as f64);
    }

    #[test]
    fn log_transform_handles_zeros() {
        let model = bigram_model("a b\n");
        let mut features: FeatureVectors = vec![vec![0.0], vec![0.0, 1.0]];
        model.apply_transform(&mut features, Transform::Log);
        assert!(features[1][0] < -200.0);
        assert_abs_diff_eq!(features[1][1], 0.0);
    }
}
