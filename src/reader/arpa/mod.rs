//! Streaming reader for the text ARPA back-off format.
//!
//! An ARPA file contains multiple sections, each terminated by an empty
//! line. The `\data\` section lists one `ngram <order>=<count>` line per
//! order. It is followed by one `\<order>-grams:` section per order, each
//! holding exactly the announced number of lines of the form
//! `log10prob\tword_1 ... word_k[\tlog10bow]`; the top-order section
//! carries no back-off column. A `\end\` marker closes the file.
//!
//! The reader yields one [`ArpaNgram`] per line with its section order
//! attached, so the caller can intern words and fill its index-aligned
//! probability vectors on the fly.

use std::io::{BufRead, Lines};

#[derive(thiserror::Error, Debug)]
pub enum ArpaReadError {
    #[error("The \\data\\ header is missing")]
    DataHeaderMissing,
    #[error("An n-gram count line in the \\data\\ section could not be parsed")]
    NgramCountsBroken,
    #[error("N-gram counts are missing in the \\data\\ section")]
    NgramCountsMissing,
    #[error("An n-gram section is missing its header")]
    SectionHeaderMissing,
    #[error("An n-gram section header mismatch. Got: {0}; Expected: {1}")]
    SectionHeaderMismatch(String, String),
    #[error("An n-gram line is malformed: {0}")]
    BadNgramLine(String),
    #[error("A boundary between sections is missing. An empty line is expected")]
    SectionBoundaryMissing,
    #[error("The \\end\\ marker is missing")]
    EndMarkerMissing,
    #[error("An IO error occurred while reading the arpa file: {0}")]
    IoError(#[from] std::io::Error),
}

/// One parsed n-gram line.
#[derive(Debug, Clone, PartialEq)]
pub struct ArpaNgram {
    pub order: usize,
    pub log_prob: f64,
    /// Whitespace-separated words of the n-gram.
    pub ngram: String,
    pub log_bow: Option<f64>,
}

#[derive(Debug)]
pub struct ArpaReader<B> {
    lines: Lines<B>,
    counts: Vec<usize>,
    cur_section: usize,
    remaining: usize,
    in_section: bool,
    finished: bool,
}

impl<B: BufRead> ArpaReader<B> {
    const DATA_HEADER: &'static str = "\\data\\";
    const END_MARKER: &'static str = "\\end\\";
    const NGRAM_KEY: &'static str = "ngram ";

    /// Constructs the reader and parses the `\data\` count header.
    ///
    /// Lines before the header are skipped, mirroring the permissiveness
    /// of other toolkits that emit a leading blank line.
    pub fn new(reader: B) -> Result<Self, ArpaReadError> {
        let mut lines = reader.lines();
        loop {
            match lines.next().transpose()? {
                Some(line) if line.trim() == Self::DATA_HEADER => break,
                Some(_) => continue,
                None => return Err(ArpaReadError::DataHeaderMissing),
            }
        }

        let mut counts = Vec::new();
        while let Some(line) = lines.next().transpose()? {
            if line.trim().is_empty() {
                break;
            }
            if let Some(suffix) = line.strip_prefix(Self::NGRAM_KEY) {
                let mut pieces = suffix.split('=');
                let order: usize = pieces
                    .next()
                    .and_then(|p| p.trim().parse().ok())
                    .ok_or(ArpaReadError::NgramCountsBroken)?;
                let count: usize = pieces
                    .next()
                    .and_then(|p| p.trim().parse().ok())
                    .ok_or(ArpaReadError::NgramCountsBroken)?;
                if order != counts.len() + 1 {
                    return Err(ArpaReadError::NgramCountsBroken);
                }
                counts.push(count);
            }
        }
        if counts.is_empty() {
            return Err(ArpaReadError::NgramCountsMissing);
        }

        Ok(Self {
            lines,
            counts,
            cur_section: 0,
            remaining: 0,
            in_section: false,
            finished: false,
        })
    }

    /// Highest n-gram order announced by the count header.
    pub fn order(&self) -> usize {
        self.counts.len()
    }

    /// Announced number of n-grams per order, index 0 holding order 1.
    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// Returns the next n-gram entry, or `None` once the `\end\` marker
    /// has been consumed.
    pub fn next_ngram(&mut self) -> Result<Option<ArpaNgram>, ArpaReadError> {
        loop {
            if self.finished {
                return Ok(None);
            }
            if self.in_section && self.remaining == 0 {
                // Section exhausted: expect the blank separator line.
                match self.lines.next().transpose()? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(_) => return Err(ArpaReadError::SectionBoundaryMissing),
                    None => return Err(ArpaReadError::SectionBoundaryMissing),
                }
                self.in_section = false;
            }
            if !self.in_section {
                if self.cur_section == self.counts.len() {
                    self.read_footer()?;
                    self.finished = true;
                    return Ok(None);
                }
                self.read_section_header()?;
                continue;
            }

            let line = self
                .lines
                .next()
                .transpose()?
                .ok_or_else(|| ArpaReadError::BadNgramLine("unexpected end of file".into()))?;
            self.remaining -= 1;
            return Ok(Some(self.parse_ngram_line(&line)?));
        }
    }

    fn read_section_header(&mut self) -> Result<(), ArpaReadError> {
        let order = self.cur_section + 1;
        let expected = format!("\\{order}-grams:");
        let line = self
            .lines
            .next()
            .transpose()?
            .ok_or(ArpaReadError::SectionHeaderMissing)?;
        if line.trim() != expected {
            return Err(ArpaReadError::SectionHeaderMismatch(line, expected));
        }
        self.remaining = self.counts[self.cur_section];
        self.cur_section = order;
        self.in_section = true;
        Ok(())
    }

    fn read_footer(&mut self) -> Result<(), ArpaReadError> {
        while let Some(line) = self.lines.next().transpose()? {
            if line.trim() == Self::END_MARKER {
                return Ok(());
            }
        }
        Err(ArpaReadError::EndMarkerMissing)
    }

    fn parse_ngram_line(&self, line: &str) -> Result<ArpaNgram, ArpaReadError> {
        let order = self.cur_section;
        let bad = || ArpaReadError::BadNgramLine(line.to_string());

        let mut pieces = line.split_ascii_whitespace();
        let log_prob: f64 = pieces.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
        let tokens: Vec<&str> = pieces.collect();
        let log_bow = match tokens.len() {
            n if n == order => None,
            n if n == order + 1 => Some(tokens[order].parse().map_err(|_| bad())?),
            _ => return Err(bad()),
        };

        Ok(ArpaNgram {
            order,
            log_prob,
            ngram: tokens[..order].join(" "),
            log_bow,
        })
    }
}

#[cfg(test)]
mod test {
    use super::{ArpaNgram, ArpaReadError, ArpaReader};
    use std::io::Cursor;

    const SMALL_ARPA: &str = "\n\\data\\\nngram 1=3\nngram 2=2\n\n\\1-grams:\n-0.522879\t</s>\n-99\t<s>\t-0.30103\n-0.522879\ta\t-0.154902\n\n\\2-grams:\n-0.30103\t<s> a\n-0.154902\ta </s>\n\n\\end\\\n";

    #[test]
    fn reads_counts_and_entries() {
        let mut reader = ArpaReader::new(Cursor::new(SMALL_ARPA)).unwrap();
        assert_eq!(reader.order(), 2);
        assert_eq!(reader.counts(), &[3, 2]);

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_ngram().unwrap() {
            entries.push(entry);
        }
        assert_eq!(entries.len(), 5);
        assert_eq!(
            entries[1],
            ArpaNgram {
                order: 1,
                log_prob: -99.0,
                ngram: "<s>".to_string(),
                log_bow: Some(-0.30103),
            }
        );
        assert_eq!(
            entries[4],
            ArpaNgram {
                order: 2,
                log_prob: -0.154902,
                ngram: "a </s>".to_string(),
                log_bow: None,
            }
        );
    }

    #[test]
    fn missing_data_header_is_reported() {
        let err = ArpaReader::new(Cursor::new("no header here\n")).unwrap_err();
        assert!(matches!(err, ArpaReadError::DataHeaderMissing));
    }

    #[test]
    fn missing_counts_are_reported() {
        let err = ArpaReader::new(Cursor::new("\\data\\\n\n")).unwrap_err();
        assert!(matches!(err, ArpaReadError::NgramCountsMissing));
    }

    #[test]
    fn section_header_mismatch_is_reported() {
        let text = "\\data\\\nngram 1=1\n\n\\2-grams:\n";
        let mut reader = ArpaReader::new(Cursor::new(text)).unwrap();
        let err = reader.next_ngram().unwrap_err();
        assert!(matches!(err, ArpaReadError::SectionHeaderMismatch(_, _)));
    }

    #[test]
    fn missing_end_marker_is_reported() {
        let text = "\\data\\\nngram 1=1\n\n\\1-grams:\n-0.1\ta\n\n";
        let mut reader = ArpaReader::new(Cursor::new(text)).unwrap();
        assert!(reader.next_ngram().unwrap().is_some());
        let err = reader.next_ngram().unwrap_err();
        assert!(matches!(err, ArpaReadError::EndMarkerMissing));
    }

    #[test]
    fn malformed_ngram_line_is_reported() {
        let text = "\\data\\\nngram 1=1\n\n\\1-grams:\nnot-a-float a\n\n\\end\\\n";
        let mut reader = ArpaReader::new(Cursor::new(text)).unwrap();
        let err = reader.next_ngram().unwrap_err();
        assert!(matches!(err, ArpaReadError::BadNgramLine(_)));
    }
}
