// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Ternary-indirect (TIND) SRAMs.  A TIND SRAM is indexed by the match
//! address of a TCAM hit, and supplies the next table and action data for
//! the matched entry.

use std::sync::Mutex;

use crate::ModelError;
use crate::ModelResult;

/// Words in one SRAM
pub const SRAM_WORDS: usize = 1024;
/// Width of the word index within a TIND address
pub const SRAM_ADDR_BITS: u32 = 10;
/// Low bits of a match address select the entry within an SRAM word
pub const TIND_ENTRY_BITS: u32 = 1;
pub const TIND_ENTRIES_PER_WORD: usize = 1 << TIND_ENTRY_BITS;
/// A TIND entry carries its next-table id in the top byte
pub const TIND_NEXT_TABLE_SHIFT: u32 = 56;

/// A match address, split the way a TIND SRAM sees it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TindAddress {
    pub vpn: u32,
    pub word: usize,
    pub entry: usize,
}

impl TindAddress {
    pub fn from_match_address(addr: u32) -> Self {
        TindAddress {
            vpn: addr >> (TIND_ENTRY_BITS + SRAM_ADDR_BITS),
            word: ((addr >> TIND_ENTRY_BITS) as usize) & (SRAM_WORDS - 1),
            entry: (addr as usize) & (TIND_ENTRIES_PER_WORD - 1),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TindOutput {
    pub bus: usize,
    pub next_table: u8,
    pub data: u64,
}

#[cfg_attr(test, mockall::automock)]
pub trait TindSram: Send + Sync {
    /// Is this a TIND SRAM holding page `vpn` of `logical_table`?
    fn matches_type_vpn_table(&self, vpn: u32, logical_table: usize) -> bool;
    fn tind_output(&self, match_address: u32) -> TindOutput;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TindConfig {
    pub vpn: u32,
    pub logical_table: usize,
    pub bus: usize,
}

struct MauSramInner {
    // `None` unless the SRAM is in use as a TIND
    tind: Option<TindConfig>,
    words: Vec<[u64; TIND_ENTRIES_PER_WORD]>,
}

pub struct MauSram {
    index: usize,
    inner: Mutex<MauSramInner>,
}

impl MauSram {
    pub fn new(index: usize) -> Self {
        MauSram {
            index,
            inner: Mutex::new(MauSramInner {
                tind: None,
                words: vec![[0; TIND_ENTRIES_PER_WORD]; SRAM_WORDS],
            }),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn set_tind_config(&self, config: Option<TindConfig>) {
        self.inner.lock().unwrap().tind = config;
    }

    /// Store the TIND entry for the given match address
    pub fn set_tind_entry(
        &self,
        match_address: u32,
        next_table: u8,
        data: u64,
    ) -> ModelResult<()> {
        if data >> TIND_NEXT_TABLE_SHIFT != 0 {
            return Err(ModelError::InvalidConfig(format!(
                "TIND data {data:#x} overlaps the next-table field"
            )));
        }
        let addr = TindAddress::from_match_address(match_address);
        let mut inner = self.inner.lock().unwrap();
        inner.words[addr.word][addr.entry] =
            (u64::from(next_table) << TIND_NEXT_TABLE_SHIFT) | data;
        Ok(())
    }
}

impl TindSram for MauSram {
    fn matches_type_vpn_table(&self, vpn: u32, logical_table: usize) -> bool {
        self.inner
            .lock()
            .unwrap()
            .tind
            .is_some_and(|t| t.vpn == vpn && t.logical_table == logical_table)
    }

    fn tind_output(&self, match_address: u32) -> TindOutput {
        let addr = TindAddress::from_match_address(match_address);
        let inner = self.inner.lock().unwrap();
        let raw = inner.words[addr.word][addr.entry];
        TindOutput {
            bus: inner.tind.map(|t| t.bus).unwrap_or_default(),
            next_table: (raw >> TIND_NEXT_TABLE_SHIFT) as u8,
            data: raw & ((1 << TIND_NEXT_TABLE_SHIFT) - 1),
        }
    }
}
