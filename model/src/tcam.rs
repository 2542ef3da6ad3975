// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Physical TCAM banks.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use bitvec::vec::BitVec;

use crate::phv::Phv;
use crate::topology::TcamRowTopology;
use crate::ModelError;
use crate::ModelResult;

/// Entries in one physical TCAM bank
pub const TCAM_ENTRIES: usize = 512;

/// Width of the entry index within a match address
pub const MATCH_ADDR_SHIFT: u32 = 9;

/// In bitmap mode, each group of this many physical entries produces one
/// logical result.
pub const BITMAP_GROUP_ENTRIES: usize = 4;

/// One bit per TCAM entry
pub type HitVector = BitVec;

/// Build the hardware match address for entry `index` of a bank with the
/// given virtual page number.
pub fn make_match_address(vpn: u32, index: usize) -> u32 {
    (vpn << MATCH_ADDR_SHIFT) | (index as u32 & ((1 << MATCH_ADDR_SHIFT) - 1))
}

/// The pipeline a TCAM bank has been assigned to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Gress {
    Ingress,
    Egress,
    /// Ghost threads borrow ingress resources
    Ghost,
}

impl Gress {
    pub fn serves(self, ingress: bool) -> bool {
        match self {
            Gress::Ingress | Gress::Ghost => ingress,
            Gress::Egress => !ingress,
        }
    }
}

/// How a bank's entries are carved up for one logical TCAM
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LtcamResultInfo {
    /// First entry belonging to the logical TCAM
    pub start: usize,
    pub entries: usize,
    /// Entries are grouped, and the result is the group rather than the
    /// entry
    pub bitmap: bool,
}

impl LtcamResultInfo {
    /// Inclusive range of entries, clamped to the bank.  `None` if empty.
    pub fn range(&self) -> Option<(usize, usize)> {
        if self.entries == 0 || self.start >= TCAM_ENTRIES {
            return None;
        }
        let hi = (self.start + self.entries - 1).min(TCAM_ENTRIES - 1);
        Some((self.start, hi))
    }

    pub fn covers_bank(&self) -> bool {
        self.start == 0 && self.entries >= TCAM_ENTRIES
    }
}

/// The operations a logical TCAM needs from one of the physical banks behind
/// it.  Where an entry index is returned, a larger index is a higher
/// priority entry.
#[cfg_attr(test, mockall::automock)]
pub trait TcamBank: Send + Sync {
    /// Bank priority within the logical TCAM
    fn priority(&self) -> u32;
    fn vpn(&self) -> u32;
    fn head(&self) -> u32;
    /// `None` if the bank is powered down
    fn gress(&self) -> Option<Gress>;
    /// Whether this bank's result feeds the next row in
    fn chain_out(&self) -> bool;
    /// The bus the bank drives directly, if any
    fn output_bus(&self) -> Option<usize>;
    fn ltcam_result_info(&self, ltcam: usize) -> Option<LtcamResultInfo>;
    fn hit_address(&self, ltcam: usize, hit: usize) -> u32;
    /// The highest priority matching entry in `lo..=hi`
    fn lookup(&self, phv: &Phv, hi: usize, lo: usize) -> Option<usize>;
    /// The highest priority matching entry in the whole bank
    fn lookup_index(&self, phv: &Phv) -> Option<usize>;
    /// Every matching entry in `lo..=hi`
    fn lookup_hits(&self, phv: &Phv, hi: usize, lo: usize) -> HitVector;
    fn attach_ltcam(&self, ltcam: usize);
    fn detach_ltcam(&self, ltcam: usize);
    fn attached_ltcams(&self) -> Vec<usize>;
}

/// The physical banks of one stage, by position
pub struct TcamBanks {
    topology: TcamRowTopology,
    banks: Vec<Arc<dyn TcamBank>>,
}

impl TcamBanks {
    pub fn from_fn<F>(topology: TcamRowTopology, mut f: F) -> Self
    where
        F: FnMut(usize, usize) -> Arc<dyn TcamBank>,
    {
        let mut banks = Vec::with_capacity(topology.rows() * topology.cols());
        for row in 0..topology.rows() {
            for col in 0..topology.cols() {
                banks.push(f(row, col));
            }
        }
        TcamBanks { topology, banks }
    }

    pub fn topology(&self) -> &TcamRowTopology {
        &self.topology
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&Arc<dyn TcamBank>> {
        if !self.topology.contains(row, col) {
            return None;
        }
        self.banks.get(row * self.topology.cols() + col)
    }
}

/// One ternary entry.  Bits set in `mask` must match `value`; the rest are
/// don't-care.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TcamEntry {
    pub value: u32,
    pub mask: u32,
}

impl TcamEntry {
    pub fn new(value: u32, mask: u32) -> Self {
        TcamEntry { value, mask }
    }

    pub fn matches(&self, word: u32) -> bool {
        (word ^ self.value) & self.mask == 0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TcamConfig {
    pub priority: u32,
    pub vpn: u32,
    pub head: u32,
    pub gress: Option<Gress>,
    pub chain_out: bool,
    pub output_bus: Option<usize>,
    /// PHV word the bank matches against
    pub input_word: usize,
    pub ltcams: BTreeMap<usize, LtcamResultInfo>,
}

struct MauTcamInner {
    config: TcamConfig,
    entries: Vec<Option<TcamEntry>>,
    attached: BTreeSet<usize>,
}

impl MauTcamInner {
    fn matches(&self, word: u32, index: usize) -> bool {
        self.entries[index].is_some_and(|e| e.matches(word))
    }
}

/// A physical TCAM bank
pub struct MauTcam {
    row: usize,
    col: usize,
    inner: Mutex<MauTcamInner>,
}

impl MauTcam {
    pub fn new(row: usize, col: usize) -> Self {
        MauTcam {
            row,
            col,
            inner: Mutex::new(MauTcamInner {
                config: TcamConfig::default(),
                entries: vec![None; TCAM_ENTRIES],
                attached: BTreeSet::new(),
            }),
        }
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn col(&self) -> usize {
        self.col
    }

    pub fn config(&self) -> TcamConfig {
        self.inner.lock().unwrap().config.clone()
    }

    /// Replace the bank's configuration.  Any logical TCAM using the bank
    /// must be told afterwards.
    pub fn set_config(&self, config: TcamConfig) {
        self.inner.lock().unwrap().config = config;
    }

    pub fn set_entry(&self, index: usize, entry: TcamEntry) -> ModelResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner
            .entries
            .get_mut(index)
            .ok_or(ModelError::EntryOutOfRange(index))?;
        *slot = Some(entry);
        Ok(())
    }

    pub fn clear_entry(&self, index: usize) -> ModelResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner
            .entries
            .get_mut(index)
            .ok_or(ModelError::EntryOutOfRange(index))?;
        *slot = None;
        Ok(())
    }
}

impl TcamBank for MauTcam {
    fn priority(&self) -> u32 {
        self.inner.lock().unwrap().config.priority
    }

    fn vpn(&self) -> u32 {
        self.inner.lock().unwrap().config.vpn
    }

    fn head(&self) -> u32 {
        self.inner.lock().unwrap().config.head
    }

    fn gress(&self) -> Option<Gress> {
        self.inner.lock().unwrap().config.gress
    }

    fn chain_out(&self) -> bool {
        self.inner.lock().unwrap().config.chain_out
    }

    fn output_bus(&self) -> Option<usize> {
        self.inner.lock().unwrap().config.output_bus
    }

    fn ltcam_result_info(&self, ltcam: usize) -> Option<LtcamResultInfo> {
        self.inner.lock().unwrap().config.ltcams.get(&ltcam).copied()
    }

    fn hit_address(&self, _ltcam: usize, hit: usize) -> u32 {
        make_match_address(self.vpn(), hit)
    }

    fn lookup(&self, phv: &Phv, hi: usize, lo: usize) -> Option<usize> {
        let inner = self.inner.lock().unwrap();
        let word = phv.word(inner.config.input_word)?;
        let hi = hi.min(TCAM_ENTRIES - 1);
        if lo > hi {
            return None;
        }
        (lo..=hi).rev().find(|i| inner.matches(word, *i))
    }

    fn lookup_index(&self, phv: &Phv) -> Option<usize> {
        self.lookup(phv, TCAM_ENTRIES - 1, 0)
    }

    fn lookup_hits(&self, phv: &Phv, hi: usize, lo: usize) -> HitVector {
        let mut hits = HitVector::repeat(false, TCAM_ENTRIES);
        let inner = self.inner.lock().unwrap();
        let Some(word) = phv.word(inner.config.input_word) else {
            return hits;
        };
        let hi = hi.min(TCAM_ENTRIES - 1);
        for i in lo..=hi {
            if inner.matches(word, i) {
                hits.set(i, true);
            }
        }
        hits
    }

    fn attach_ltcam(&self, ltcam: usize) {
        self.inner.lock().unwrap().attached.insert(ltcam);
    }

    fn detach_ltcam(&self, ltcam: usize) {
        self.inner.lock().unwrap().attached.remove(&ltcam);
    }

    fn attached_ltcams(&self) -> Vec<usize> {
        self.inner.lock().unwrap().attached.iter().copied().collect()
    }
}
