//! Word interning.
//!
//! Words live in one packed string buffer addressed by per-entry
//! (offset, len) spans; an open-address hash table with quadratic probing
//! maps a word back to its dense id. The end-of-sentence marker `</s>` is
//! pre-registered at id 0 and doubles as the sentence-begin context, so
//! `<s>` is an alias of id 0 rather than a separate entry. An optional
//! unknown marker `<unk>` can be registered at id 1 before anything else
//! is added.

use std::io::{BufRead, Read, Write};

use crate::binio;
use crate::hash::string_hash;
use crate::types::{WordId, INVALID};
use crate::Result;

#[derive(Clone, Copy, Debug, Default)]
struct Span {
    offset: u32,
    len: u32,
}

#[derive(Clone, Debug)]
pub struct Vocab {
    buffer: String,
    spans: Vec<Span>,
    indices: Vec<WordId>,
    hash_mask: usize,
    capacity: usize,
    fixed: bool,
    unk: WordId,
}

impl Default for Vocab {
    fn default() -> Self {
        Self::new()
    }
}

impl Vocab {
    pub const END_OF_SENTENCE: WordId = 0;
    pub const INVALID: WordId = INVALID;

    const END_OF_SENTENCE_STR: &'static str = "</s>";
    const BEGIN_OF_SENTENCE_STR: &'static str = "<s>";
    const UNKNOWN_STR: &'static str = "<unk>";

    pub fn new() -> Self {
        Self::with_capacity(1 << 8)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut vocab = Vocab {
            buffer: String::new(),
            spans: Vec::new(),
            indices: Vec::new(),
            hash_mask: 0,
            capacity: 0,
            fixed: false,
            unk: INVALID,
        };
        vocab.reserve(capacity.max(2));
        let eos = vocab.add(Self::END_OF_SENTENCE_STR);
        debug_assert_eq!(eos, Self::END_OF_SENTENCE);
        vocab
    }

    /// Registers `<unk>` at id 1 and routes missed lookups to it.
    ///
    /// Must be called before any regular word is added and before the
    /// vocabulary is fixed.
    pub fn use_unknown(&mut self) -> WordId {
        debug_assert!(!self.fixed);
        if self.unk == INVALID {
            self.unk = self.add(Self::UNKNOWN_STR);
            debug_assert_eq!(self.unk, 1);
        }
        self.unk
    }

    pub fn unknown(&self) -> Option<WordId> {
        (self.unk != INVALID).then_some(self.unk)
    }

    /// Once fixed, `add` behaves as `find`.
    pub fn set_fixed(&mut self, fixed: bool) {
        self.fixed = fixed;
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn word(&self, id: WordId) -> &str {
        let span = self.spans[id as usize];
        &self.buffer[span.offset as usize..(span.offset + span.len) as usize]
    }

    /// Returns the id of the word, the unknown id if one is registered, or
    /// the invalid sentinel.
    pub fn find(&self, word: &str) -> WordId {
        if word == Self::BEGIN_OF_SENTENCE_STR {
            return Self::END_OF_SENTENCE;
        }
        let index = self.indices[self.probe(word)];
        if index == INVALID {
            self.unk
        } else {
            index
        }
    }

    /// Interns the word and returns its id.
    ///
    /// If the word is already present (or the vocabulary is fixed) this is
    /// a lookup; a miss on a fixed vocabulary yields the unknown id or the
    /// invalid sentinel.
    pub fn add(&mut self, word: &str) -> WordId {
        if word == Self::BEGIN_OF_SENTENCE_STR {
            return Self::END_OF_SENTENCE;
        }
        let mut pos = self.probe(word);
        if self.indices[pos] == INVALID && !self.fixed {
            if self.spans.len() >= self.capacity {
                self.reserve(std::cmp::max(1 << 16, self.capacity * 2));
                pos = self.probe(word);
            }
            let id = self.spans.len() as WordId;
            self.spans.push(Span {
                offset: self.buffer.len() as u32,
                len: word.len() as u32,
            });
            self.buffer.push_str(word);
            self.indices[pos] = id;
            return id;
        }
        if self.indices[pos] == INVALID {
            self.unk
        } else {
            self.indices[pos]
        }
    }

    /// Sorts all non-sentinel words lexicographically and returns the
    /// old-to-new id permutation.
    ///
    /// `</s>` keeps id 0 and `<unk>` (when registered) keeps id 1. The
    /// result is the identity permutation when the vocabulary is already
    /// sorted.
    pub fn sort(&mut self) -> Vec<WordId> {
        let num_fixed = if self.unk == INVALID { 1 } else { 2 };
        let mut order: Vec<WordId> = (0..self.len() as WordId).collect();
        order[num_fixed..].sort_by(|&a, &b| self.word(a).cmp(self.word(b)));

        let mut map = vec![INVALID; self.len()];
        let mut buffer = String::with_capacity(self.buffer.len());
        let mut spans = Vec::with_capacity(self.len());
        for (new_id, &old_id) in order.iter().enumerate() {
            let word = self.word(old_id);
            spans.push(Span {
                offset: buffer.len() as u32,
                len: word.len() as u32,
            });
            buffer.push_str(word);
            map[old_id as usize] = new_id as WordId;
        }
        self.buffer = buffer;
        self.spans = spans;
        self.reindex(self.indices.len());
        map
    }

    /// Loads words from text, one per non-`#` line.
    pub fn load<R: BufRead>(&mut self, reader: R) -> Result<()> {
        for line in reader.lines() {
            let line = line?;
            let word = line.trim();
            if !word.is_empty() && !word.starts_with('#') {
                self.add(word);
            }
        }
        Ok(())
    }

    /// Saves words as text, one per line in id order.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        for id in 0..self.len() as WordId {
            writeln!(writer, "{}", self.word(id))?;
        }
        Ok(())
    }

    pub fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        binio::write_tag(writer, "Vocab")?;
        let offsets: Vec<u32> = self.spans.iter().map(|s| s.offset).collect();
        let lens: Vec<u32> = self.spans.iter().map(|s| s.len).collect();
        binio::write_u32_vec(writer, &offsets)?;
        binio::write_u32_vec(writer, &lens)?;
        binio::write_u32_vec(writer, &self.indices)?;
        binio::write_string(writer, &self.buffer)?;
        binio::write_u64(writer, self.unk as u64)?;
        Ok(())
    }

    pub fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        binio::verify_tag(reader, "Vocab")?;
        let offsets = binio::read_u32_vec(reader)?;
        let lens = binio::read_u32_vec(reader)?;
        let indices = binio::read_u32_vec(reader)?;
        let buffer = binio::read_string(reader)?;
        let unk = binio::read_u64(reader)? as WordId;
        let capacity = offsets.len();
        let hash_mask = indices.len() - 1;
        Ok(Vocab {
            buffer,
            spans: offsets
                .into_iter()
                .zip(lens)
                .map(|(offset, len)| Span { offset, len })
                .collect(),
            indices,
            hash_mask,
            capacity,
            fixed: false,
            unk,
        })
    }

    fn probe(&self, word: &str) -> usize {
        let mut skip = 0;
        let mut pos = string_hash(word.as_bytes()) as usize & self.hash_mask;
        loop {
            let index = self.indices[pos];
            if index == INVALID || self.word(index) == word {
                return pos;
            }
            skip += 1;
            pos = (pos + skip) & self.hash_mask;
        }
    }

    fn reserve(&mut self, capacity: usize) {
        if capacity != self.capacity {
            self.capacity = capacity;
            self.reindex((capacity + capacity / 4).next_power_of_two());
        }
    }

    fn reindex(&mut self, table_size: usize) {
        debug_assert!(table_size >= self.len() && table_size.is_power_of_two());
        self.indices.clear();
        self.indices.resize(table_size, INVALID);
        self.hash_mask = table_size - 1;
        for id in 0..self.len() as WordId {
            let pos = self.probe(self.word(id));
            self.indices[pos] = id;
        }
    }
}
