//! Per-order n-gram trie storage.
//!
//! [`NgramVector`] holds one order of the trie: for every n-gram it keeps
//! the index of its history in the next-lower order and the id of its
//! target word, as two parallel dense arrays. An open-address hash table
//! with quadratic probing maps `(hist, word)` back to the n-gram index in
//! constant time, so derived quantities can live in plain index-aligned
//! vectors.

mod model;

pub use model::NgramModel;

use std::io::{Read, Write};

use crate::binio;
use crate::hash::pair_hash;
use crate::types::{NgramIdx, WordId, INVALID};
use crate::Result;

#[derive(Clone, Debug)]
pub struct NgramVector {
    words: Vec<WordId>,
    hists: Vec<NgramIdx>,
    indices: Vec<NgramIdx>,
    hash_mask: usize,
    capacity: usize,
}

impl Default for NgramVector {
    fn default() -> Self {
        Self::new()
    }
}

impl NgramVector {
    pub const INVALID: NgramIdx = INVALID;

    pub fn new() -> Self {
        let mut vector = NgramVector {
            words: Vec::new(),
            hists: Vec::new(),
            indices: Vec::new(),
            hash_mask: 0,
            capacity: 0,
        };
        vector.reserve(1 << 4);
        vector
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[WordId] {
        &self.words
    }

    pub fn hists(&self) -> &[NgramIdx] {
        &self.hists
    }

    /// Returns the index of `(hist, word)`, or the invalid sentinel.
    pub fn find(&self, hist: NgramIdx, word: WordId) -> NgramIdx {
        self.indices[self.probe(hist, word)]
    }

    /// Adds `(hist, word)` and returns its index; an existing n-gram keeps
    /// its index.
    pub fn add(&mut self, hist: NgramIdx, word: WordId) -> NgramIdx {
        self.add_new(hist, word).0
    }

    /// Like [`add`](Self::add), also reporting whether the n-gram was
    /// newly inserted.
    pub fn add_new(&mut self, hist: NgramIdx, word: WordId) -> (NgramIdx, bool) {
        let mut pos = self.probe(hist, word);
        if self.indices[pos] != INVALID {
            return (self.indices[pos], false);
        }
        if self.len() >= self.capacity {
            self.reserve(std::cmp::max(1 << 16, self.capacity * 2));
            pos = self.probe(hist, word);
        }
        let index = self.len() as NgramIdx;
        self.indices[pos] = index;
        self.words.push(word);
        self.hists.push(hist);
        (index, true)
    }

    /// Remaps words and histories, sorts by `(hist, word)` and returns the
    /// old-to-new index permutation.
    ///
    /// After the sort, iterating in index order visits each history's
    /// n-grams contiguously, which the estimators rely on.
    pub fn sort(&mut self, vocab_map: &[WordId], hist_map: &[NgramIdx]) -> Vec<NgramIdx> {
        for i in 0..self.len() {
            self.words[i] = vocab_map[self.words[i] as usize];
            self.hists[i] = hist_map[self.hists[i] as usize];
        }

        let mut order: Vec<NgramIdx> = (0..self.len() as NgramIdx).collect();
        order.sort_by_key(|&i| (self.hists[i as usize], self.words[i as usize]));

        let mut map = vec![INVALID; self.len()];
        let mut words = Vec::with_capacity(self.len());
        let mut hists = Vec::with_capacity(self.len());
        for (new_index, &old_index) in order.iter().enumerate() {
            words.push(self.words[old_index as usize]);
            hists.push(self.hists[old_index as usize]);
            map[old_index as usize] = new_index as NgramIdx;
        }
        self.words = words;
        self.hists = hists;
        self.reindex(self.indices.len());
        map
    }

    pub fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        binio::write_u64(writer, self.len() as u64)?;
        binio::write_u32_vec(writer, &self.words)?;
        binio::write_u32_vec(writer, &self.hists)?;
        binio::write_u32_vec(writer, &self.indices)?;
        Ok(())
    }

    pub fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        let len = binio::read_u64(reader)? as usize;
        let words = binio::read_u32_vec(reader)?;
        let hists = binio::read_u32_vec(reader)?;
        let indices = binio::read_u32_vec(reader)?;
        debug_assert_eq!(words.len(), len);
        let hash_mask = indices.len() - 1;
        Ok(NgramVector {
            words,
            hists,
            indices,
            hash_mask,
            capacity: len,
        })
    }

    fn probe(&self, hist: NgramIdx, word: WordId) -> usize {
        let mut skip = 0;
        let mut pos = pair_hash(hist, word) as usize & self.hash_mask;
        loop {
            let index = self.indices[pos];
            if index == INVALID
                || (self.words[index as usize] == word && self.hists[index as usize] == hist)
            {
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
        for i in 0..self.len() {
            let pos = self.probe(self.hists[i], self.words[i]);
            self.indices[pos] = i as NgramIdx;
        }
    }
}

#[cfg(test)]
mod test {
    use super::NgramVector;
    use crate::types::INVALID;

    #[test]
    fn indices_are_dense_and_stable() {
        let mut v = NgramVector::new();
        assert_eq!(v.add(0, 7), 0);
        assert_eq!(v.add(0, 3), 1);
        assert_eq!(v.add(1, 7), 2);
        assert_eq!(v.add(0, 7), 0);
        assert_eq!(v.len(), 3);
        assert_eq!(v.find(0, 3), 1);
        assert_eq!(v.find(2, 2), INVALID);
    }

    #[test]
    fn add_reports_insertion() {
        let mut v = NgramVector::new();
        assert_eq!(v.add_new(0, 1), (0, true));
        assert_eq!(v.add_new(0, 1), (0, false));
    }

    #[test]
    fn sort_orders_by_hist_then_word() {
        let mut v = NgramVector::new();
        v.add(1, 5);
        v.add(0, 9);
        v.add(1, 2);
        v.add(0, 4);
        let len = 10;
        let vocab_map: Vec<u32> = (0..len).collect();
        let hist_map: Vec<u32> = (0..len).collect();
        let map = v.sort(&vocab_map, &hist_map);

        // New order: (0,4) (0,9) (1,2) (1,5).
        assert_eq!(v.hists(), &[0, 0, 1, 1]);
        assert_eq!(v.words(), &[4, 9, 2, 5]);
        assert_eq!(map, vec![3, 1, 2, 0]);
        for i in 0..v.len() {
            assert_eq!(v.find(v.hists()[i], v.words()[i]), i as u32);
        }
    }

    #[test]
    fn sort_applies_remaps_before_ordering() {
        let mut v = NgramVector::new();
        v.add(0, 0);
        v.add(0, 1);
        // Swap the two words through the vocabulary map.
        let map = v.sort(&[1, 0, 2], &[0]);
        assert_eq!(v.words(), &[0, 1]);
        assert_eq!(map, vec![1, 0]);
    }

    #[test]
    fn survives_table_growth() {
        let mut v = NgramVector::new();
        for hist in 0..200u32 {
            for word in 0..10u32 {
                v.add(hist, word);
            }
        }
        assert_eq!(v.len(), 2000);
        for hist in 0..200u32 {
            for word in 0..10u32 {
                assert_eq!(v.find(hist, word), hist * 10 + word);
            }
        }
    }

    #[test]
    fn binary_round_trip() {
        let mut v = NgramVector::new();
        v.add(0, 3);
        v.add(1, 1);
        let mut buf = Vec::new();
        v.serialize(&mut buf).unwrap();
        let reloaded = NgramVector::deserialize(&mut std::io::Cursor::new(&buf)).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.find(0, 3), 0);
        assert_eq!(reloaded.find(1, 1), 1);
        assert_eq!(reloaded.find(0, 1), INVALID);
    }
}
