//! Housing proposals: parsing untrusted oracle output, validating it against a
//! grid, and materializing it as a new grid.
//!
//! Validation order is fixed: cardinality, then duplicates, then bounds, then
//! (strict mode only) terrain. The first failing check wins.

use std::collections::HashSet;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grid::{Grid, GridDims, TerrainCode};

/// Number of cells in every housing block.
pub const PROPOSAL_CELLS: usize = 8;

/// The two negotiating parties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Wants the block on grass near existing houses and water.
    Developer,
    /// Wants the block as far from existing houses as possible.
    Resident,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Developer => write!(f, "Developer"),
            Self::Resident => write!(f, "Resident"),
        }
    }
}

/// A `(row, col)` pair exactly as the oracle produced it. Signed so that
/// negative coordinates surface as bounds errors instead of parse errors.
pub type CandidateCell = (i64, i64);

/// Structured proposal as parsed from oracle output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateProposal {
    pub cells: Vec<CandidateCell>,
    #[serde(default)]
    pub justification: Option<String>,
}

/// Reasons a candidate proposal is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProposalError {
    #[error("could not parse proposal: {0}")]
    Parse(String),

    #[error("expected exactly {expected} cells, got {actual}")]
    WrongCardinality { expected: usize, actual: usize },

    #[error("duplicate cell [{row}, {col}]")]
    DuplicateCell { row: i64, col: i64 },

    #[error("cell [{row}, {col}] is outside the {rows}x{cols} grid")]
    OutOfBounds {
        row: i64,
        col: i64,
        rows: usize,
        cols: usize,
    },

    #[error("cell [{row}, {col}] is {terrain} and cannot be built on")]
    ForbiddenTerrain {
        row: usize,
        col: usize,
        terrain: TerrainCode,
    },
}

/// How strictly proposals are checked against the terrain they cover.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Bounds, uniqueness and cardinality only. Target cells are overwritten
    /// whatever their terrain.
    #[default]
    Permissive,
    /// Additionally rejects cells on forest, river or existing houses.
    Strict,
}

/// A proposal that passed validation. Only [`ProposalValidator`] builds these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedProposal {
    cells: Vec<(usize, usize)>,
    dims: GridDims,
}

impl ValidatedProposal {
    /// Target cells in the order they were proposed.
    pub fn cells(&self) -> &[(usize, usize)] {
        &self.cells
    }

    /// Dimensions of the grid the proposal was validated against.
    pub fn dims(&self) -> GridDims {
        self.dims
    }
}

/// A validated proposal with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Proposal {
    pub role: Role,
    pub validated: ValidatedProposal,
    pub justification: Option<String>,
}

/// Checks candidate cells against a grid.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProposalValidator {
    mode: ValidationMode,
}

impl ProposalValidator {
    pub fn new(mode: ValidationMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// Validate candidate cells: cardinality, duplicates, bounds, then terrain
    /// when strict.
    pub fn validate(
        &self,
        grid: &Grid,
        cells: &[CandidateCell],
    ) -> Result<ValidatedProposal, ProposalError> {
        if cells.len() != PROPOSAL_CELLS {
            return Err(ProposalError::WrongCardinality {
                expected: PROPOSAL_CELLS,
                actual: cells.len(),
            });
        }

        let mut seen = HashSet::with_capacity(cells.len());
        for &(row, col) in cells {
            if !seen.insert((row, col)) {
                return Err(ProposalError::DuplicateCell { row, col });
            }
        }

        let dims = grid.dims();
        let mut checked = Vec::with_capacity(cells.len());
        for &(row, col) in cells {
            let in_bounds = usize::try_from(row)
                .ok()
                .zip(usize::try_from(col).ok())
                .filter(|&(r, c)| grid.contains(r, c));
            match in_bounds {
                Some(cell) => checked.push(cell),
                None => {
                    return Err(ProposalError::OutOfBounds {
                        row,
                        col,
                        rows: dims.rows,
                        cols: dims.cols,
                    })
                }
            }
        }

        if self.mode == ValidationMode::Strict {
            for &(row, col) in &checked {
                if let Some(terrain) = grid.get(row, col).filter(|t| t.is_protected()) {
                    return Err(ProposalError::ForbiddenTerrain { row, col, terrain });
                }
            }
        }

        Ok(ValidatedProposal {
            cells: checked,
            dims,
        })
    }

    /// Parse raw oracle output and validate it in one step.
    pub fn check(&self, grid: &Grid, role: Role, raw: &str) -> Result<Proposal, ProposalError> {
        let candidate = parse_candidate(raw)?;
        let validated = self.validate(grid, &candidate.cells)?;
        Ok(Proposal {
            role,
            validated,
            justification: candidate
                .justification
                .map(|j| j.trim().to_string())
                .filter(|j| !j.is_empty()),
        })
    }
}

/// Return a new grid equal to `grid` except that the proposal's cells are
/// [`TerrainCode::ProposedHouse`]. The input grid is untouched.
pub fn materialize(grid: &Grid, proposal: &ValidatedProposal) -> Grid {
    debug_assert_eq!(grid.dims(), proposal.dims);
    let cells: Vec<(usize, usize)> = proposal
        .cells
        .iter()
        .copied()
        .filter(|&(row, col)| grid.contains(row, col))
        .collect();
    grid.with_cells(&cells, TerrainCode::ProposedHouse)
}

/// Parse `{"cells": [[r, c], ...], "justification": "..."}` from oracle output.
///
/// Tolerates surrounding prose or code fences by falling back to the outermost
/// `{...}` span.
pub fn parse_candidate(raw: &str) -> Result<CandidateProposal, ProposalError> {
    let trimmed = raw.trim();
    match serde_json::from_str::<CandidateProposal>(trimmed) {
        Ok(candidate) => Ok(candidate),
        Err(direct) => {
            let object = Regex::new(r"(?s)\{.*\}")
                .ok()
                .and_then(|re| re.find(trimmed).map(|m| m.as_str()));
            let Some(object) = object else {
                return Err(ProposalError::Parse(direct.to_string()));
            };
            serde_json::from_str::<CandidateProposal>(object)
                .map_err(|e| ProposalError::Parse(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridDims;

    fn grass(rows: usize, cols: usize) -> Grid {
        Grid::filled(GridDims::new(rows, cols), TerrainCode::Grass)
    }

    fn block() -> Vec<CandidateCell> {
        vec![
            (0, 0),
            (0, 1),
            (0, 2),
            (0, 3),
            (1, 0),
            (1, 1),
            (1, 2),
            (1, 3),
        ]
    }

    #[test]
    fn test_validate_accepts_eight_distinct_cells() {
        let grid = grass(10, 20);
        let validated = ProposalValidator::default().validate(&grid, &block()).unwrap();
        assert_eq!(validated.cells().len(), PROPOSAL_CELLS);
        assert_eq!(validated.cells()[0], (0, 0));
    }

    #[test]
    fn test_wrong_cardinality() {
        let grid = grass(10, 20);
        let validator = ProposalValidator::default();

        let mut short = block();
        short.pop();
        assert_eq!(
            validator.validate(&grid, &short),
            Err(ProposalError::WrongCardinality {
                expected: 8,
                actual: 7
            })
        );

        assert!(matches!(
            validator.validate(&grid, &[]),
            Err(ProposalError::WrongCardinality { actual: 0, .. })
        ));
    }

    #[test]
    fn test_duplicate_cell_reports_first_repeat() {
        let grid = grass(2, 2);
        let cells = vec![
            (0, 0),
            (0, 1),
            (1, 0),
            (1, 1),
            (0, 0),
            (1, 1),
            (0, 1),
            (1, 0),
        ];
        assert_eq!(
            ProposalValidator::default().validate(&grid, &cells),
            Err(ProposalError::DuplicateCell { row: 0, col: 0 })
        );
    }

    #[test]
    fn test_out_of_bounds_including_negative() {
        let grid = grass(10, 20);
        let validator = ProposalValidator::default();

        let mut cells = block();
        cells[3] = (10, 0);
        assert_eq!(
            validator.validate(&grid, &cells),
            Err(ProposalError::OutOfBounds {
                row: 10,
                col: 0,
                rows: 10,
                cols: 20
            })
        );

        let mut cells = block();
        cells[0] = (-1, 4);
        assert!(matches!(
            validator.validate(&grid, &cells),
            Err(ProposalError::OutOfBounds { row: -1, col: 4, .. })
        ));
    }

    #[test]
    fn test_check_order_cardinality_before_duplicates_before_bounds() {
        let grid = grass(2, 2);
        let validator = ProposalValidator::default();

        // Duplicates and out of bounds, but only 3 cells.
        let cells = vec![(0, 0), (0, 0), (5, 5)];
        assert!(matches!(
            validator.validate(&grid, &cells),
            Err(ProposalError::WrongCardinality { .. })
        ));

        // Eight cells, out-of-bounds entry precedes the duplicate.
        let cells = vec![
            (9, 9),
            (0, 0),
            (0, 1),
            (1, 0),
            (1, 1),
            (0, 0),
            (7, 7),
            (8, 8),
        ];
        assert_eq!(
            validator.validate(&grid, &cells),
            Err(ProposalError::DuplicateCell { row: 0, col: 0 })
        );
    }

    #[test]
    fn test_permissive_mode_allows_protected_terrain() {
        let grid = Grid::filled(GridDims::new(2, 4), TerrainCode::River);
        let validated = ProposalValidator::new(ValidationMode::Permissive)
            .validate(&grid, &block())
            .unwrap();
        let next = materialize(&grid, &validated);
        assert!(next.positions_of(TerrainCode::River).next().is_none());
    }

    #[test]
    fn test_strict_mode_rejects_protected_terrain() {
        let mut rows = vec![vec![0; 4]; 2];
        rows[1][2] = 1;
        let grid = Grid::from_rows(&rows).unwrap();
        assert_eq!(
            ProposalValidator::new(ValidationMode::Strict).validate(&grid, &block()),
            Err(ProposalError::ForbiddenTerrain {
                row: 1,
                col: 2,
                terrain: TerrainCode::Forest
            })
        );
    }

    #[test]
    fn test_materialize_changes_exactly_target_cells() {
        let mut rows = vec![vec![0; 20]; 10];
        rows[5][5] = 3;
        rows[9][19] = 2;
        rows[0][1] = 1;
        let grid = Grid::from_rows(&rows).unwrap();
        let validated = ProposalValidator::default().validate(&grid, &block()).unwrap();

        let next = materialize(&grid, &validated);
        let targets: HashSet<_> = validated.cells().iter().copied().collect();
        for row in 0..grid.rows() {
            for col in 0..grid.cols() {
                if targets.contains(&(row, col)) {
                    assert_eq!(next.get(row, col), Some(TerrainCode::ProposedHouse));
                } else {
                    assert_eq!(next.get(row, col), grid.get(row, col));
                }
            }
        }

        // Input untouched, repeated application identical.
        assert_eq!(grid.get(0, 1), Some(TerrainCode::Forest));
        assert_eq!(materialize(&grid, &validated), next);
        assert_eq!(materialize(&next, &validated), next);
    }

    #[test]
    fn test_parse_candidate_plain_json() {
        let raw = r#"{"cells": [[0,1],[2,3]], "justification": "near the river"}"#;
        let candidate = parse_candidate(raw).unwrap();
        assert_eq!(candidate.cells, vec![(0, 1), (2, 3)]);
        assert_eq!(candidate.justification.as_deref(), Some("near the river"));
    }

    #[test]
    fn test_parse_candidate_fenced_json() {
        let raw = "Here you go:\n```json\n{\"cells\": [[4, 5]]}\n```";
        let candidate = parse_candidate(raw).unwrap();
        assert_eq!(candidate.cells, vec![(4, 5)]);
        assert_eq!(candidate.justification, None);
    }

    #[test]
    fn test_parse_candidate_failures() {
        assert!(matches!(parse_candidate("no json here"), Err(ProposalError::Parse(_))));
        assert!(matches!(
            parse_candidate(r#"{"justification": "missing cells"}"#),
            Err(ProposalError::Parse(_))
        ));
        assert!(matches!(
            parse_candidate(r#"{"cells": [[1, 2, 3]]}"#),
            Err(ProposalError::Parse(_))
        ));
        assert!(matches!(
            parse_candidate(r#"{"cells": [["a", "b"]]}"#),
            Err(ProposalError::Parse(_))
        ));
    }

    #[test]
    fn test_check_trims_justification() {
        let grid = grass(2, 4);
        let raw = serde_json::json!({
            "cells": block(),
            "justification": "   "
        })
        .to_string();
        let proposal = ProposalValidator::default()
            .check(&grid, Role::Resident, &raw)
            .unwrap();
        assert_eq!(proposal.role, Role::Resident);
        assert_eq!(proposal.justification, None);
    }
}
