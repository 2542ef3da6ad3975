// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The logical TCAM: one ternary match resource, backed by some set of
//! physical banks in a stage.
//!
//! Banks are searched in priority order and the first hit wins.  A bank may
//! be searched on its own, as part of a chain of rows forming one wide
//! match, or in bitmap mode where groups of entries collapse into a single
//! result.  A hit's match address then selects an entry in the TIND SRAMs
//! for the logical table, if it has any.
//!
//! The physical banks backing the engine are only re-resolved between
//! packets.  Configuration changes just advance a pending sequence number,
//! and the next lookup on a new PHV rebuilds the bank list.

use std::collections::BTreeMap;
use std::sync::Arc;

use slog::{debug, error, o, trace};

use crate::phv::Phv;
use crate::sram::TindAddress;
use crate::sram::TindOutput;
use crate::sram::TindSram;
use crate::tcam::Gress;
use crate::tcam::HitVector;
use crate::tcam::LtcamResultInfo;
use crate::tcam::TcamBank;
use crate::tcam::TcamBanks;
use crate::tcam::BITMAP_GROUP_ENTRIES;
use crate::tcam::TCAM_ENTRIES;
use crate::topology::Half;
use crate::topology::TcamRowTopology;

/// The TIND SRAMs of a stage, by index
pub type TindSrams = Vec<Arc<dyn TindSram>>;

/// A successful ternary match
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcamHit {
    pub row: usize,
    pub col: usize,
    /// Entry index within the bank, after any bitmap compaction
    pub index: usize,
    pub address: u32,
    /// Where the result goes: the TIND's bus if there is a TIND entry, else
    /// the bank's own output bus
    pub bus: Option<usize>,
    pub next_table: Option<u8>,
    pub tind_data: Option<u64>,
}

/// `None` is a miss
pub type MatchResult = Option<TcamHit>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LtcamCounters {
    pub hits: u64,
    pub misses: u64,
    pub cache_hits: u64,
    /// Lookups that found more than one TIND entry
    pub tind_multi_hits: u64,
}

// Row, head, vpn, gress and result info of one bank in a chain
type ChainMember = (usize, u32, u32, Option<Gress>, Option<LtcamResultInfo>);

struct LookupCache {
    phv_id: u64,
    ingress: bool,
    result: MatchResult,
}

// A bank backing this logical TCAM, with the parts of its configuration the
// lookup needs, as of the last rebuild
struct AttachedTcam {
    row: usize,
    col: usize,
    bank: Arc<dyn TcamBank>,
    priority: u32,
    gress: Option<Gress>,
    output_bus: Option<usize>,
    info: LtcamResultInfo,
    // Rows chained with this one, or 0
    chain: u32,
    // Part of a chain, but not the row that produces its result
    feeder: bool,
}

pub struct MauLogicalTcam {
    log: slog::Logger,
    index: usize,
    enabled: bool,
    banks: Arc<TcamBanks>,
    srams: Arc<TindSrams>,
    // Member rows, per column
    table_map: Vec<u32>,
    attached: Vec<AttachedTcam>,
    // SRAMs holding TIND entries, per logical table
    tind_srams: BTreeMap<usize, u64>,
    cache: Option<LookupCache>,
    config_sequence: u64,
    pending_sequence: u64,
    counters: LtcamCounters,
}

impl MauLogicalTcam {
    pub fn new(
        log: &slog::Logger,
        index: usize,
        banks: Arc<TcamBanks>,
        srams: Arc<TindSrams>,
    ) -> Self {
        let cols = banks.topology().cols();
        MauLogicalTcam {
            log: log.new(o!("unit" => "ltcam", "ltcam" => index)),
            index,
            enabled: true,
            banks,
            srams,
            table_map: vec![0; cols],
            attached: Vec::new(),
            tind_srams: BTreeMap::new(),
            cache: None,
            config_sequence: 0,
            pending_sequence: 0,
            counters: LtcamCounters::default(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.cache = None;
    }

    pub fn counters(&self) -> LtcamCounters {
        self.counters
    }

    fn topology(&self) -> &TcamRowTopology {
        self.banks.topology()
    }

    pub fn table_map(&self, col: usize) -> u32 {
        self.table_map.get(col).copied().unwrap_or(0)
    }

    /// Positions of the banks searched by the last lookup, in search order
    pub fn attached(&self) -> Vec<(usize, usize)> {
        self.attached.iter().map(|t| (t.row, t.col)).collect()
    }

    pub fn has_pending_config(&self) -> bool {
        self.pending_sequence > self.config_sequence
    }

    /// The rows of column `col` that belong to this logical TCAM have
    /// changed.  Banks joining or leaving are told about it, and the bank
    /// list is rebuilt before the next lookup.
    pub fn tcam_table_map_updated(
        &mut self,
        col: usize,
        new_map: u32,
        old_map: u32,
    ) {
        let Some(current) = self.table_map.get_mut(col) else {
            error!(self.log, "table map update for invalid column";
                "col" => col);
            return;
        };
        *current = new_map;

        let changed = new_map ^ old_map;
        let topology = *self.banks.topology();
        for row in topology.rows_in(changed) {
            let Some(bank) = self.banks.get(row, col) else {
                continue;
            };
            if new_map & topology.row_bit(row) != 0 {
                bank.attach_ltcam(self.index);
            } else {
                bank.detach_ltcam(self.index);
            }
        }
        debug!(self.log, "table map updated";
            "col" => col,
            "old" => format!("{old_map:#x}"),
            "new" => format!("{new_map:#x}"));
        self.pending_sequence += 1;
    }

    /// Some bank backing this logical TCAM has been reconfigured
    pub fn tcam_config_changed(&mut self) {
        self.pending_sequence += 1;
    }

    pub fn set_tind_srams(&mut self, logical_table: usize, bitmap: u64) {
        if bitmap == 0 {
            self.tind_srams.remove(&logical_table);
        } else {
            self.tind_srams.insert(logical_table, bitmap);
        }
        self.cache = None;
    }

    /// Pick up any configuration changes.  Must only be called between
    /// PHVs.
    pub fn reset_resources(&mut self) {
        if !self.has_pending_config() {
            return;
        }
        let topology = *self.topology();
        let mut attached = Vec::new();
        for (col, map) in self.table_map.iter().enumerate() {
            for row in topology.rows_in(*map) {
                let Some(bank) = self.banks.get(row, col) else {
                    error!(self.log, "no TCAM at row {row} col {col}");
                    continue;
                };
                let Some(info) = bank.ltcam_result_info(self.index) else {
                    debug!(self.log, "bank has no result info";
                        "row" => row,
                        "col" => col);
                    continue;
                };
                let chain = self.find_chain(row, col);
                let feeder = chain != 0 && bank.chain_out();
                if chain != 0 && !feeder {
                    self.sanity_check_chain(col, chain);
                }
                attached.push(AttachedTcam {
                    row,
                    col,
                    bank: bank.clone(),
                    priority: bank.priority(),
                    gress: bank.gress(),
                    output_bus: bank.output_bus(),
                    info,
                    chain,
                    feeder,
                });
            }
        }
        attached.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.row.cmp(&a.row))
                .then(a.col.cmp(&b.col))
        });

        debug!(self.log, "rebuilt bank list";
            "banks" => attached.len(),
            "sequence" => self.pending_sequence);
        self.attached = attached;
        self.config_sequence = self.pending_sequence;
        self.cache = None;
    }

    fn chains_out(&self, row: usize, col: usize) -> bool {
        self.banks.get(row, col).is_some_and(|b| b.chain_out())
    }

    // `row`, plus every row further from the midpoint that chains into it
    fn outer_chain(&self, row: usize, col: usize) -> u32 {
        let topology = self.topology();
        let mut chain = topology.row_bit(row);
        let mut r = row;
        while let Some(next) = topology.outer_neighbor(r) {
            if !self.chains_out(next, col) {
                break;
            }
            chain |= topology.row_bit(next);
            r = next;
        }
        chain
    }

    /// The rows chained together with `row` in column `col`, as a bitmap
    /// that includes `row` itself.  0 if `row` isn't chained to anything.
    pub fn find_chain(&self, row: usize, col: usize) -> u32 {
        let topology = *self.topology();
        if !topology.contains(row, col) {
            return 0;
        }

        let mut chain = self.outer_chain(row, col);
        let mut end = row;
        while self.chains_out(end, col) {
            match topology.inner_neighbor(end) {
                Some(next) => {
                    chain |= topology.row_bit(next);
                    end = next;
                }
                None => break,
            }
        }

        let half = topology.half_of(row);
        if end == topology.boundary_row(half) {
            let across = topology.boundary_row(half.other());
            if self.chains_out(end, col) || self.chains_out(across, col) {
                chain |= self.outer_chain(across, col);
            }
        }

        if chain == topology.row_bit(row) {
            0
        } else {
            chain
        }
    }

    /// Check that every bank of a chain is configured the same way.
    /// Disagreements are logged, and lookups carry on regardless.
    pub fn sanity_check_chain(&self, col: usize, chain: u32) -> bool {
        let topology = *self.topology();
        let mut first: Option<ChainMember> = None;
        let mut ok = true;
        for row in topology.rows_in(chain) {
            let Some(bank) = self.banks.get(row, col) else {
                error!(self.log, "chain includes missing TCAM";
                    "row" => row,
                    "col" => col);
                ok = false;
                continue;
            };
            let this = (
                row,
                bank.head(),
                bank.vpn(),
                bank.gress(),
                bank.ltcam_result_info(self.index),
            );
            let Some(expected) = first else {
                first = Some(this);
                continue;
            };
            if this.1 != expected.1 {
                error!(self.log, "chained TCAMs disagree on head";
                    "row" => row, "col" => col,
                    "head" => this.1, "expected" => expected.1,
                    "first_row" => expected.0);
                ok = false;
            }
            if this.2 != expected.2 {
                error!(self.log, "chained TCAMs disagree on vpn";
                    "row" => row, "col" => col,
                    "vpn" => this.2, "expected" => expected.2,
                    "first_row" => expected.0);
                ok = false;
            }
            if this.3 != expected.3 {
                error!(self.log, "chained TCAMs disagree on gress";
                    "row" => row, "col" => col,
                    "gress" => ?this.3, "expected" => ?expected.3,
                    "first_row" => expected.0);
                ok = false;
            }
            if this.4 != expected.4 {
                error!(self.log, "chained TCAMs disagree on result info";
                    "row" => row, "col" => col,
                    "info" => ?this.4, "expected" => ?expected.4,
                    "first_row" => expected.0);
                ok = false;
            }
        }
        ok
    }

    /// Look up a wide match spread across the rows of `chain`.  Each half
    /// of the chain is searched separately, narrowing a candidate set down
    /// to the entries that matched in every row.  A chain crossing the
    /// midpoint needs a hit in both halves.  The highest priority surviving
    /// entry is the hit.
    pub fn lookup_chain_simple(
        &self,
        phv: &Phv,
        col: usize,
        chain: u32,
        info: &LtcamResultInfo,
    ) -> Option<usize> {
        let topology = *self.topology();
        let (lo, hi) = info.range()?;

        let mut result: Option<HitVector> = None;
        for half in [Half::Lower, Half::Upper] {
            let rows = chain & topology.half_mask(half);
            if rows == 0 {
                continue;
            }
            let mut candidates = HitVector::repeat(true, TCAM_ENTRIES);
            for row in topology.rows_in(rows) {
                let bank = self.banks.get(row, col)?;
                let hits = bank.lookup_hits(phv, hi, lo);
                candidates &= hits.as_bitslice();
            }
            result = Some(match result {
                None => candidates,
                Some(mut other) => {
                    other &= candidates.as_bitslice();
                    other
                }
            });
        }
        result?.last_one()
    }

    fn lookup_bank(&self, phv: &Phv, tcam: &AttachedTcam) -> Option<usize> {
        let info = &tcam.info;
        if info.bitmap {
            let chain = match tcam.chain {
                0 => self.topology().row_bit(tcam.row),
                c => c,
            };
            let hit = self.lookup_chain_simple(phv, tcam.col, chain, info)?;
            return Some(
                info.start + hit.saturating_sub(info.start) / BITMAP_GROUP_ENTRIES,
            );
        }
        if tcam.chain != 0 {
            return self.lookup_chain_simple(phv, tcam.col, tcam.chain, info);
        }
        if !info.covers_bank() {
            let (lo, hi) = info.range()?;
            return tcam.bank.lookup(phv, hi, lo);
        }
        tcam.bank.lookup_index(phv)
    }

    fn tind_lookup(
        &self,
        address: u32,
        logical_table: usize,
        eval_all: bool,
    ) -> Vec<TindOutput> {
        let bitmap = self.tind_srams.get(&logical_table).copied().unwrap_or(0);
        let vpn = TindAddress::from_match_address(address).vpn;
        let mut found = Vec::new();
        for (i, sram) in self.srams.iter().enumerate().take(u64::BITS as usize)
        {
            if bitmap & (1 << i) == 0 {
                continue;
            }
            if sram.matches_type_vpn_table(vpn, logical_table) {
                found.push(sram.tind_output(address));
                if !eval_all {
                    break;
                }
            }
        }
        found
    }

    /// Search the logical TCAM for the given PHV.
    ///
    /// `logical_table` selects the TIND entries to apply to a hit.  Passing
    /// `None` asks for a diagnostic lookup, which skips TIND.  With
    /// `eval_all`, the search continues past the first hit so that
    /// conflicting TIND entries can be reported.  The first hit is still the
    /// one returned.  Only a plain lookup on a logical table reads or fills
    /// the cache.
    pub fn lookup(
        &mut self,
        phv: &Phv,
        logical_table: Option<usize>,
        ingress: bool,
        eval_all: bool,
    ) -> MatchResult {
        if !self.enabled {
            return None;
        }

        let cacheable = logical_table.is_some() && !eval_all;

        // Logical tables sharing this resource see a single physical lookup
        // per packet.
        if let Some(cache) = self.cache.as_ref().filter(|_| cacheable) {
            if cache.phv_id == phv.id() && cache.ingress == ingress {
                trace!(self.log, "cached result"; "phv" => phv.id());
                self.counters.cache_hits += 1;
                return cache.result;
            }
        }

        self.reset_resources();

        let mut result: MatchResult = None;
        let mut tind_hits = 0;
        for tcam in &self.attached {
            if tcam.feeder || !tcam.gress.is_some_and(|g| g.serves(ingress)) {
                continue;
            }
            let Some(index) = self.lookup_bank(phv, tcam) else {
                continue;
            };
            let address = tcam.bank.hit_address(self.index, index);
            let tind = match logical_table {
                Some(table) => self.tind_lookup(address, table, eval_all),
                None => Vec::new(),
            };
            tind_hits += tind.len();

            if result.is_none() {
                let hit = match tind.first() {
                    Some(out) => TcamHit {
                        row: tcam.row,
                        col: tcam.col,
                        index,
                        address,
                        bus: Some(out.bus),
                        next_table: Some(out.next_table),
                        tind_data: Some(out.data),
                    },
                    None => TcamHit {
                        row: tcam.row,
                        col: tcam.col,
                        index,
                        address,
                        bus: tcam.output_bus,
                        next_table: None,
                        tind_data: None,
                    },
                };
                trace!(self.log, "hit";
                    "phv" => phv.id(),
                    "row" => tcam.row,
                    "col" => tcam.col,
                    "index" => index,
                    "address" => format!("{address:#x}"));
                result = Some(hit);
            }
            if !eval_all {
                break;
            }
        }

        if tind_hits > 1 {
            error!(self.log, "multiple TIND hits";
                "phv" => phv.id(),
                "hits" => tind_hits,
                "logical_table" => ?logical_table);
            self.counters.tind_multi_hits += 1;
        }
        match result {
            Some(_) => self.counters.hits += 1,
            None => self.counters.misses += 1,
        }

        // Misses are cached too, so every logical table sharing the
        // resource sees the same answer for this packet.
        if cacheable {
            self.cache = Some(LookupCache {
                phv_id: phv.id(),
                ingress,
                result,
            });
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sram::MockTindSram;
    use crate::tcam::make_match_address;
    use crate::tcam::MockTcamBank;
    use pretty_assertions::assert_eq;

    const LTCAM: usize = 0;

    fn full_bank() -> LtcamResultInfo {
        LtcamResultInfo {
            start: 0,
            entries: TCAM_ENTRIES,
            bitmap: false,
        }
    }

    // A bank that only answers configuration queries
    fn idle_bank(chain_out: bool) -> MockTcamBank {
        let mut bank = MockTcamBank::new();
        bank.expect_chain_out().return_const(chain_out);
        bank.expect_attach_ltcam().return_const(());
        bank.expect_detach_ltcam().return_const(());
        bank.expect_ltcam_result_info()
            .return_const(None::<LtcamResultInfo>);
        bank.expect_priority().return_const(0u32);
        bank.expect_vpn().return_const(0u32);
        bank.expect_head().return_const(0u32);
        bank.expect_gress().return_const(Some(Gress::Ingress));
        bank.expect_output_bus().return_const(None::<usize>);
        bank.expect_lookup().times(0);
        bank.expect_lookup_index().times(0);
        bank.expect_lookup_hits().times(0);
        bank
    }

    // A full-bank member that hits entry `hit` exactly `lookups` times
    fn hitting_bank(
        priority: u32,
        vpn: u32,
        hit: Option<usize>,
        lookups: usize,
    ) -> MockTcamBank {
        let mut bank = MockTcamBank::new();
        bank.expect_chain_out().return_const(false);
        bank.expect_attach_ltcam().return_const(());
        bank.expect_detach_ltcam().return_const(());
        bank.expect_ltcam_result_info().return_const(Some(full_bank()));
        bank.expect_priority().return_const(priority);
        bank.expect_vpn().return_const(vpn);
        bank.expect_head().return_const(0u32);
        bank.expect_gress().return_const(Some(Gress::Ingress));
        bank.expect_output_bus().return_const(Some(2usize));
        bank.expect_hit_address()
            .returning(move |_, index| make_match_address(vpn, index));
        bank.expect_lookup_index().times(lookups).return_const(hit);
        bank.expect_lookup().times(0);
        bank
    }

    fn ltcam_with<F>(mut f: F) -> MauLogicalTcam
    where
        F: FnMut(usize, usize) -> MockTcamBank,
    {
        let topology = TcamRowTopology::tofino();
        let banks = TcamBanks::from_fn(topology, |row, col| {
            Arc::new(f(row, col)) as Arc<dyn TcamBank>
        });
        MauLogicalTcam::new(
            &common::logging::discard(),
            LTCAM,
            Arc::new(banks),
            Arc::new(Vec::new()),
        )
    }

    // Chain maps, keyed by the rows whose chain_out is set
    fn chain_ltcam(chaining_rows: &[usize]) -> MauLogicalTcam {
        let rows = chaining_rows.to_vec();
        ltcam_with(move |row, col| idle_bank(col == 0 && rows.contains(&row)))
    }

    #[test]
    fn test_find_chain_solitary() {
        let ltcam = chain_ltcam(&[]);
        for row in 0..12 {
            assert_eq!(ltcam.find_chain(row, 0), 0);
        }
        // Chaining elsewhere in the column leaves row 3 alone
        let ltcam = chain_ltcam(&[9]);
        assert_eq!(ltcam.find_chain(3, 0), 0);
    }

    #[test]
    fn test_find_chain_within_half() {
        // Rows 1 and 2 feed row 3
        let ltcam = chain_ltcam(&[1, 2]);
        let chain = 0b1110;
        assert_eq!(ltcam.find_chain(1, 0), chain);
        assert_eq!(ltcam.find_chain(2, 0), chain);
        assert_eq!(ltcam.find_chain(3, 0), chain);
        assert_eq!(ltcam.find_chain(0, 0), 0);
        assert_eq!(ltcam.find_chain(4, 0), 0);
        // Column 1 has no chaining at all
        assert_eq!(ltcam.find_chain(3, 1), 0);
    }

    #[test]
    fn test_find_chain_upper_half() {
        // Rows 10 and 9 feed row 8, moving toward the midpoint
        let ltcam = chain_ltcam(&[9, 10]);
        assert_eq!(ltcam.find_chain(8, 0), 0x700);
        assert_eq!(ltcam.find_chain(10, 0), 0x700);
        assert_eq!(ltcam.find_chain(11, 0), 0);
    }

    #[test]
    fn test_find_chain_across_midpoint() {
        // 4 -> 5 -> 6 <- 7
        let ltcam = chain_ltcam(&[4, 5, 7]);
        let chain = 0b1111 << 4;
        assert_eq!(ltcam.find_chain(4, 0), chain);
        assert_eq!(ltcam.find_chain(6, 0), chain);
        assert_eq!(ltcam.find_chain(7, 0), chain);
        assert_eq!(ltcam.find_chain(3, 0), 0);
        assert_eq!(ltcam.find_chain(8, 0), 0);
    }

    #[test]
    fn test_find_chain_out_of_range() {
        let ltcam = chain_ltcam(&[4, 5]);
        assert_eq!(ltcam.find_chain(12, 0), 0);
        assert_eq!(ltcam.find_chain(4, 2), 0);
    }

    #[test]
    fn test_cache_shared_across_tables() {
        let mut ltcam = ltcam_with(|row, col| match (row, col) {
            (3, 0) => hitting_bank(1, 2, Some(40), 1),
            _ => idle_bank(false),
        });
        ltcam.tcam_table_map_updated(0, 1 << 3, 0);
        let phv = Phv::new(77, vec![]);

        let first = ltcam.lookup(&phv, Some(1), true, false);
        let second = ltcam.lookup(&phv, Some(2), true, false);
        assert!(first.is_some());
        assert_eq!(first, second);
        assert_eq!(ltcam.counters().cache_hits, 1);
        assert_eq!(ltcam.counters().hits, 1);
    }

    #[test]
    fn test_cache_respects_gress() {
        let mut ltcam = ltcam_with(|row, col| match (row, col) {
            (3, 0) => hitting_bank(1, 2, Some(40), 1),
            _ => idle_bank(false),
        });
        ltcam.tcam_table_map_updated(0, 1 << 3, 0);
        let phv = Phv::new(77, vec![]);

        assert!(ltcam.lookup(&phv, Some(1), true, false).is_some());
        // Same packet, but now egress.  The only bank is ingress, so this
        // must rescan and miss rather than reuse the ingress hit.
        assert!(ltcam.lookup(&phv, Some(1), false, false).is_none());
        assert_eq!(ltcam.counters().cache_hits, 0);
        assert_eq!(ltcam.counters().misses, 1);
    }

    #[test]
    fn test_diagnostic_lookup_not_cached() {
        let mut ltcam = ltcam_with(|row, col| match (row, col) {
            (3, 0) => hitting_bank(1, 2, Some(40), 2),
            _ => idle_bank(false),
        });
        ltcam.tcam_table_map_updated(0, 1 << 3, 0);
        let phv = Phv::new(5, vec![]);
        assert!(ltcam.lookup(&phv, None, true, true).is_some());
        assert!(ltcam.lookup(&phv, Some(0), true, false).is_some());
        assert_eq!(ltcam.counters().cache_hits, 0);
    }

    #[test]
    fn test_diagnostic_lookup_ignores_cache() {
        let mut ltcam = ltcam_with(|row, col| match (row, col) {
            (3, 0) => hitting_bank(1, 2, Some(40), 3),
            _ => idle_bank(false),
        });
        ltcam.tcam_table_map_updated(0, 1 << 3, 0);
        let phv = Phv::new(6, vec![]);

        assert!(ltcam.lookup(&phv, Some(0), true, false).is_some());
        // Neither diagnostic form may answer from the cache
        assert!(ltcam.lookup(&phv, None, true, true).is_some());
        assert!(ltcam.lookup(&phv, Some(0), true, true).is_some());
        assert_eq!(ltcam.counters().cache_hits, 0);

        // ... nor replace what the real lookup left there
        assert!(ltcam.lookup(&phv, Some(1), true, false).is_some());
        assert_eq!(ltcam.counters().cache_hits, 1);
    }

    #[test]
    fn test_priority_order() {
        let mut ltcam = ltcam_with(|row, col| match (row, col) {
            (2, 0) => hitting_bank(5, 1, Some(8), 1),
            (9, 1) => hitting_bank(1, 3, Some(100), 0),
            _ => idle_bank(false),
        });
        ltcam.tcam_table_map_updated(0, 1 << 2, 0);
        ltcam.tcam_table_map_updated(1, 1 << 9, 0);

        let hit = ltcam
            .lookup(&Phv::new(1, vec![]), Some(0), true, false)
            .unwrap();
        assert_eq!((hit.row, hit.col, hit.index), (2, 0, 8));
        assert_eq!(hit.address, make_match_address(1, 8));
        assert_eq!(hit.bus, Some(2));
        assert_eq!(ltcam.attached(), vec![(2, 0), (9, 1)]);
    }

    #[test]
    fn test_disabled() {
        let mut ltcam = ltcam_with(|row, col| match (row, col) {
            (3, 0) => hitting_bank(1, 2, Some(40), 0),
            _ => idle_bank(false),
        });
        ltcam.tcam_table_map_updated(0, 1 << 3, 0);
        ltcam.disable();
        assert!(ltcam.lookup(&Phv::new(1, vec![]), Some(0), true, false).is_none());
        assert_eq!(ltcam.counters(), LtcamCounters::default());
    }

    #[test]
    fn test_rebuild_is_deferred() {
        let mut ltcam = ltcam_with(|_, _| idle_bank(false));
        ltcam.tcam_table_map_updated(1, 0b11, 0);
        assert!(ltcam.has_pending_config());
        assert!(ltcam.attached().is_empty());
        ltcam.reset_resources();
        assert!(!ltcam.has_pending_config());
    }

    #[test]
    fn test_multiple_tind_hits() {
        let mut ltcam = ltcam_with(|row, col| match (row, col) {
            (3, 0) => hitting_bank(1, 0, Some(40), 1),
            _ => idle_bank(false),
        });
        let mut srams: TindSrams = Vec::new();
        for bus in 0..2 {
            let mut sram = MockTindSram::new();
            sram.expect_matches_type_vpn_table()
                .withf(|vpn, table| *vpn == 0 && *table == 4)
                .return_const(true);
            sram.expect_tind_output().return_const(TindOutput {
                bus,
                next_table: 7,
                data: 0x10 + bus as u64,
            });
            srams.push(Arc::new(sram));
        }
        ltcam.srams = Arc::new(srams);
        ltcam.set_tind_srams(4, 0b11);
        ltcam.tcam_table_map_updated(0, 1 << 3, 0);

        let hit = ltcam
            .lookup(&Phv::new(1, vec![]), Some(4), true, true)
            .unwrap();
        assert_eq!(hit.bus, Some(0));
        assert_eq!(hit.next_table, Some(7));
        assert_eq!(hit.tind_data, Some(0x10));
        assert_eq!(ltcam.counters().tind_multi_hits, 1);
    }
}
