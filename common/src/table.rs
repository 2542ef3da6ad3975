// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum TableError {
    #[error("No such table type: {0}")]
    NoSuchTableType(String),
}

/// The kinds of table exposed by the BF-RT runtime.  Only a subset of them
/// support the asynchronous sync/hit-state operations.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub enum TableType {
    MatchDirect,
    MatchIndirect,
    MatchIndirectSelector,
    ActionProfile,
    Selector,
    Counter,
    Meter,
    Register,
    Lpf,
    Wred,
    PortConfig,
}

impl TableType {
    /// Match-action tables own their direct resources (counters, registers,
    /// idle timers) and are the only tables that track hit state.
    pub fn is_match_table(&self) -> bool {
        matches!(
            self,
            TableType::MatchDirect
                | TableType::MatchIndirect
                | TableType::MatchIndirectSelector
        )
    }
}

/// Returns every table type, in declaration order.
pub fn get_table_types() -> Vec<TableType> {
    vec![
        TableType::MatchDirect,
        TableType::MatchIndirect,
        TableType::MatchIndirectSelector,
        TableType::ActionProfile,
        TableType::Selector,
        TableType::Counter,
        TableType::Meter,
        TableType::Register,
        TableType::Lpf,
        TableType::Wred,
        TableType::PortConfig,
    ]
}

// This matches the "table_type" strings found in bf-rt.json, so that the
// two can be compared directly when debugging.
impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                TableType::MatchDirect => "MatchAction_Direct",
                TableType::MatchIndirect => "MatchAction_Indirect",
                TableType::MatchIndirectSelector =>
                    "MatchAction_Indirect_Selector",
                TableType::ActionProfile => "Action",
                TableType::Selector => "Selector",
                TableType::Counter => "Counter",
                TableType::Meter => "Meter",
                TableType::Register => "Register",
                TableType::Lpf => "Lpf",
                TableType::Wred => "Wred",
                TableType::PortConfig => "PortConfigure",
            }
        )
    }
}

impl TryFrom<&str> for TableType {
    type Error = TableError;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        let name = name.to_lowercase();
        match name.as_str() {
            "matchaction_direct" => Ok(TableType::MatchDirect),
            "matchaction_indirect" => Ok(TableType::MatchIndirect),
            "matchaction_indirect_selector" => {
                Ok(TableType::MatchIndirectSelector)
            }
            "action" => Ok(TableType::ActionProfile),
            "selector" => Ok(TableType::Selector),
            "counter" => Ok(TableType::Counter),
            "meter" => Ok(TableType::Meter),
            "register" => Ok(TableType::Register),
            "lpf" => Ok(TableType::Lpf),
            "wred" => Ok(TableType::Wred),
            "portconfigure" => Ok(TableType::PortConfig),
            _ => Err(TableError::NoSuchTableType(name)),
        }
    }
}

#[test]
fn test_name_roundtrip() {
    for t in get_table_types() {
        let name = t.to_string();
        assert_eq!(TableType::try_from(name.as_str()).unwrap(), t);
    }
    assert!(TableType::try_from("no_such_table").is_err());
}

#[test]
fn test_match_tables() {
    let matches: Vec<TableType> = get_table_types()
        .into_iter()
        .filter(|t| t.is_match_table())
        .collect();
    assert_eq!(
        matches,
        vec![
            TableType::MatchDirect,
            TableType::MatchIndirect,
            TableType::MatchIndirectSelector
        ]
    );
}
