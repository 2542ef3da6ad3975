// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

/// The packet header vector: the fields extracted from one packet, as seen
/// by one pass through the match-action pipeline.
///
/// The id is unique to one pass.  Lookups that see the same id are looking
/// at the same packet, and may reuse each other's results.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Phv {
    id: u64,
    words: Vec<u32>,
}

impl Phv {
    pub fn new(id: u64, words: Vec<u32>) -> Self {
        Phv { id, words }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn word(&self, index: usize) -> Option<u32> {
        self.words.get(index).copied()
    }

    pub fn set_word(&mut self, index: usize, value: u32) {
        if index >= self.words.len() {
            self.words.resize(index + 1, 0);
        }
        self.words[index] = value;
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

#[test]
fn test_set_word_grows() {
    let mut phv = Phv::new(1, vec![]);
    assert!(phv.is_empty());
    phv.set_word(3, 0xabcd);
    assert_eq!(phv.len(), 4);
    assert_eq!(phv.word(3), Some(0xabcd));
    assert_eq!(phv.word(0), Some(0));
    assert_eq!(phv.word(4), None);
}
