//! Simple data models for the ingestion pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use uuid::Uuid;

use crate::sink::WriteSummary;
use crate::table::Table;

// ---

/// An independently scheduled ingestion target with its own table set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityFamily {
    Clients,
    DeviceStatus,
    AccessPoints,
    SwitchInterfaces,
}

impl EntityFamily {
    pub const ALL: [EntityFamily; 4] = [
        EntityFamily::Clients,
        EntityFamily::DeviceStatus,
        EntityFamily::AccessPoints,
        EntityFamily::SwitchInterfaces,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityFamily::Clients => "clients",
            EntityFamily::DeviceStatus => "device-status",
            EntityFamily::AccessPoints => "aps",
            EntityFamily::SwitchInterfaces => "switch-interfaces",
        }
    }

    /// Tables written by this family, parents first.
    pub fn tables(self) -> &'static [Table] {
        match self {
            EntityFamily::Clients => &[Table::Clients],
            EntityFamily::DeviceStatus => &[Table::DeviceStatus],
            EntityFamily::AccessPoints => &[
                Table::Ap,
                Table::ApRadio,
                Table::ApWlan,
                Table::ApPort,
                Table::ApModem,
            ],
            EntityFamily::SwitchInterfaces => &[Table::SwitchInterface],
        }
    }
}

impl fmt::Display for EntityFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "clients" => Ok(EntityFamily::Clients),
            "device-status" | "devices" => Ok(EntityFamily::DeviceStatus),
            "aps" | "access-points" => Ok(EntityFamily::AccessPoints),
            "switch-interfaces" | "switches" => Ok(EntityFamily::SwitchInterfaces),
            other => Err(format!("unknown entity family '{other}'")),
        }
    }
}

/// Run lifecycle. `Failed` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Init,
    Fetching,
    Normalizing,
    Persisting,
    Done,
    Failed,
}

/// Why a run ended in [`RunState::Failed`].
#[derive(Debug, Clone, Serialize)]
pub struct RunFailure {
    /// State the run was in when it failed.
    pub stage: RunState,
    pub kind: &'static str,
    pub message: String,
}

/// Per-run report handed back to the trigger.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub family: EntityFamily,
    pub state: RunState,
    /// Raw entities received from the API.
    pub fetched: u64,
    /// Rows produced by the normalizer, across all tables.
    pub normalized: u64,
    /// Rows inserted or updated.
    pub persisted: u64,
    /// Rows dropped before or during persistence.
    pub skipped: u64,
    /// Non-fatal item errors plus the fatal one, if any.
    pub errors: u64,
    pub mapping_gaps: u64,
    pub tables: BTreeMap<&'static str, WriteSummary>,
    pub failure: Option<RunFailure>,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn new(family: EntityFamily) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            family,
            state: RunState::Init,
            fetched: 0,
            normalized: 0,
            persisted: 0,
            skipped: 0,
            errors: 0,
            mapping_gaps: 0,
            tables: family
                .tables()
                .iter()
                .map(|t| (t.name(), WriteSummary::default()))
                .collect(),
            failure: None,
            duration_ms: 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.state == RunState::Failed
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_family_round_trips_through_str() {
        // ---
        for family in EntityFamily::ALL {
            assert_eq!(family.as_str().parse::<EntityFamily>(), Ok(family));
        }
    }

    #[test]
    fn test_family_aliases() {
        // ---
        assert_eq!("device_status".parse(), Ok(EntityFamily::DeviceStatus));
        assert_eq!(" APs ".parse(), Ok(EntityFamily::AccessPoints));
        assert!("routers".parse::<EntityFamily>().is_err());
    }

    #[test]
    fn test_summary_serializes_state_and_family() {
        // ---
        let summary = RunSummary::new(EntityFamily::SwitchInterfaces);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["state"], "INIT");
        assert_eq!(json["family"], "switch-interfaces");
        assert_eq!(json["tables"]["switch_interfacedetails"]["inserted"], 0);
        assert!(!summary.is_failed());
    }
}
