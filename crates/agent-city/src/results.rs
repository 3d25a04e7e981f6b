//! Run records for negotiations.
//!
//! A record captures everything needed to replay or inspect a run:
//! the maps before and after, the full history ledger, one summary per
//! proposing phase and the terrain counts of the final map.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use negotiation_kernel::{
    count_by_terrain, Grid, NegotiationConfig, NegotiationOutcome, PhaseOutcome, PhaseRecord,
    Role, TerminationCause,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened in one proposing phase, in serializable form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub round: usize,
    pub role: Role,
    /// Whether the proposal was drawn onto the map
    pub applied: bool,
    /// Cells of an applied proposal
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cells: Vec<(usize, usize)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
    /// Why the proposal was rejected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&PhaseRecord> for PhaseSummary {
    fn from(record: &PhaseRecord) -> Self {
        match &record.outcome {
            PhaseOutcome::Applied { proposal } => Self {
                round: record.round,
                role: record.role,
                applied: true,
                cells: proposal.validated.cells().to_vec(),
                justification: proposal.justification.clone(),
                error: None,
            },
            PhaseOutcome::Fallback { error } => Self {
                round: record.round,
                role: record.role,
                applied: false,
                cells: Vec::new(),
                justification: None,
                error: Some(error.to_string()),
            },
        }
    }
}

/// Full record of a single negotiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationRecord {
    pub negotiation_id: Uuid,
    /// Oracle that produced the rationale ("heuristic" or a model name)
    pub oracle: String,
    /// City seed for procedural maps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub config: NegotiationConfig,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub cause: TerminationCause,
    /// Rounds started, including a round cut short by termination
    pub rounds_played: usize,
    pub base_grid: Grid,
    pub final_grid: Grid,
    pub history: Vec<String>,
    pub phases: Vec<PhaseSummary>,
    /// Cell count per terrain name on the final map
    pub final_counts: BTreeMap<String, usize>,
}

impl NegotiationRecord {
    pub fn from_outcome(
        outcome: &NegotiationOutcome,
        config: &NegotiationConfig,
        oracle: impl Into<String>,
        seed: Option<u64>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let state = &outcome.state;
        let rounds_played = match outcome.cause {
            TerminationCause::RoundsExhausted => state.round(),
            TerminationCause::Developer | TerminationCause::Resident => state.round() + 1,
        };
        let final_counts = count_by_terrain(state.current_grid())
            .into_iter()
            .map(|(terrain, count)| (terrain.name().to_string(), count))
            .collect();

        Self {
            negotiation_id: state.negotiation_id(),
            oracle: oracle.into(),
            seed,
            config: config.clone(),
            started_at,
            ended_at: Utc::now(),
            cause: outcome.cause,
            rounds_played,
            base_grid: state.base_grid().clone(),
            final_grid: state.current_grid().clone(),
            history: state.history().entries().to_vec(),
            phases: state.records().iter().map(PhaseSummary::from).collect(),
            final_counts,
        }
    }

    /// Proposals drawn onto the map.
    pub fn applied_count(&self) -> usize {
        self.phases.iter().filter(|p| p.applied).count()
    }

    /// Proposals rejected and replaced by a fallback entry.
    pub fn fallback_count(&self) -> usize {
        self.phases.len() - self.applied_count()
    }

    /// Save the record to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Load a record from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let record = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(record)
    }
}

/// Generate a timestamped output path from the given path.
/// e.g., "negotiation.json" -> "negotiation-20260108-010530.json"
pub fn timestamped_path(path: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d-%H%M%S");
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("negotiation");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("json");
    let parent = path.parent().unwrap_or(Path::new("."));
    parent.join(format!("{}-{}.{}", stem, timestamp, ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use negotiation_kernel::{ProposalError, ProposalValidator, ValidationMode};

    #[test]
    fn test_timestamped_path() {
        let path = timestamped_path(Path::new("out/run.json"));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("run-"));
        assert!(name.ends_with(".json"));
        // run-YYYYmmdd-HHMMSS.json
        assert_eq!(name.len(), "run-".len() + 15 + ".json".len());
        assert_eq!(path.parent().unwrap(), Path::new("out"));

        let bare = timestamped_path(Path::new("record"));
        assert!(bare.to_str().unwrap().ends_with(".json"));
    }

    #[test]
    fn test_phase_summary_from_records() {
        let grid = Grid::from_rows(&[vec![0; 4], vec![0; 4]]).unwrap();
        let raw = r#"{"cells": [[0,0],[0,1],[0,2],[0,3],[1,0],[1,1],[1,2],[1,3]], "justification": "all of it"}"#;
        let proposal = ProposalValidator::new(ValidationMode::Strict)
            .check(&grid, Role::Developer, raw)
            .unwrap();

        let applied = PhaseSummary::from(&PhaseRecord {
            round: 0,
            role: Role::Developer,
            outcome: PhaseOutcome::Applied { proposal },
        });
        assert!(applied.applied);
        assert_eq!(applied.cells.len(), 8);
        assert_eq!(applied.justification.as_deref(), Some("all of it"));

        let rejected = PhaseSummary::from(&PhaseRecord {
            round: 1,
            role: Role::Resident,
            outcome: PhaseOutcome::Fallback {
                error: ProposalError::DuplicateCell { row: 0, col: 0 },
            },
        });
        assert!(!rejected.applied);
        assert!(rejected.cells.is_empty());
        assert!(rejected.error.unwrap().contains("[0, 0]"));
    }
}
