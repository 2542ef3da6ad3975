// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::sync::Arc;

use slog::{debug, o};

use crate::logical_tcam::LtcamCounters;
use crate::logical_tcam::MatchResult;
use crate::logical_tcam::MauLogicalTcam;
use crate::logical_tcam::TindSrams;
use crate::phv::Phv;
use crate::tcam::TcamBanks;
use crate::topology::Half;
use crate::topology::TcamRowTopology;
use crate::ModelError;
use crate::ModelResult;

/// The ternary match resources of one MAU stage: its physical TCAM banks,
/// its TIND SRAMs, and the logical TCAMs built from them.
pub struct MauTcamArray {
    log: slog::Logger,
    banks: Arc<TcamBanks>,
    ltcams: Vec<MauLogicalTcam>,
}

impl MauTcamArray {
    pub fn new(
        log: &slog::Logger,
        banks: TcamBanks,
        srams: TindSrams,
        ltcam_count: usize,
    ) -> Self {
        let log = log.new(o!("unit" => "tcam_array"));
        let banks = Arc::new(banks);
        let srams = Arc::new(srams);
        let ltcams = (0..ltcam_count)
            .map(|i| MauLogicalTcam::new(&log, i, banks.clone(), srams.clone()))
            .collect();
        MauTcamArray {
            log,
            banks,
            ltcams,
        }
    }

    pub fn topology(&self) -> &TcamRowTopology {
        self.banks.topology()
    }

    pub fn ltcam(&self, ltcam: usize) -> ModelResult<&MauLogicalTcam> {
        self.ltcams
            .get(ltcam)
            .ok_or(ModelError::NoSuchLogicalTcam(ltcam))
    }

    pub fn ltcam_mut(
        &mut self,
        ltcam: usize,
    ) -> ModelResult<&mut MauLogicalTcam> {
        self.ltcams
            .get_mut(ltcam)
            .ok_or(ModelError::NoSuchLogicalTcam(ltcam))
    }

    /// Make the rows in `map` of column `col` the members of `ltcam`
    pub fn set_tcam_table_map(
        &mut self,
        ltcam: usize,
        col: usize,
        map: u32,
    ) -> ModelResult<()> {
        let topology = *self.topology();
        if col >= topology.cols() {
            return Err(ModelError::InvalidConfig(format!(
                "column {col} out of range"
            )));
        }
        let all_rows =
            topology.half_mask(Half::Lower) | topology.half_mask(Half::Upper);
        if map & !all_rows != 0 {
            return Err(ModelError::InvalidConfig(format!(
                "row map {map:#x} names rows past {}",
                topology.rows() - 1
            )));
        }

        let lt = self.ltcam_mut(ltcam)?;
        let old = lt.table_map(col);
        if old != map {
            lt.tcam_table_map_updated(col, map, old);
        }
        Ok(())
    }

    /// The configuration of the bank at (`row`, `col`) has changed.  Every
    /// logical TCAM using it picks up the change before its next lookup.
    pub fn bank_config_changed(
        &mut self,
        row: usize,
        col: usize,
    ) -> ModelResult<()> {
        let bank = self
            .banks
            .get(row, col)
            .ok_or(ModelError::NoSuchTcam { row, col })?;
        for i in bank.attached_ltcams() {
            match self.ltcams.get_mut(i) {
                Some(lt) => lt.tcam_config_changed(),
                None => {
                    debug!(self.log, "bank attached to unknown ltcam";
                        "row" => row, "col" => col, "ltcam" => i);
                }
            }
        }
        Ok(())
    }

    pub fn set_tind_srams(
        &mut self,
        ltcam: usize,
        logical_table: usize,
        bitmap: u64,
    ) -> ModelResult<()> {
        self.ltcam_mut(ltcam)?.set_tind_srams(logical_table, bitmap);
        Ok(())
    }

    pub fn lookup(
        &mut self,
        ltcam: usize,
        phv: &Phv,
        logical_table: usize,
        ingress: bool,
    ) -> ModelResult<MatchResult> {
        Ok(self
            .ltcam_mut(ltcam)?
            .lookup(phv, Some(logical_table), ingress, false))
    }

    /// Search every bank of `ltcam` without touching its cache.  With a
    /// `logical_table`, every TIND entry for each hit is read, and more than
    /// one is counted as a TIND conflict.  With `None`, no TIND is read.
    pub fn evaluate_all(
        &mut self,
        ltcam: usize,
        phv: &Phv,
        logical_table: Option<usize>,
        ingress: bool,
    ) -> ModelResult<MatchResult> {
        Ok(self.ltcam_mut(ltcam)?.lookup(phv, logical_table, ingress, true))
    }

    /// Apply pending configuration to every logical TCAM.  Must only be
    /// called between PHVs.
    pub fn reset_resources(&mut self) {
        for lt in self.ltcams.iter_mut() {
            lt.reset_resources();
        }
    }

    pub fn counters(&self, ltcam: usize) -> ModelResult<LtcamCounters> {
        self.ltcam(ltcam).map(|lt| lt.counters())
    }
}
