//! Rule-based oracle for offline runs and demos.
//!
//! Each role scores open cells (grass, or cells currently under proposal):
//! the Developer likes cells close to existing houses and to the river, the
//! Residents like cells far from existing houses. A role proposes the best
//! contiguous 2×4 (or 4×2) block of open cells and falls back to the best
//! eight scattered cells when no block fits.
//!
//! The Developer concedes a little more each turn, pulling its preference
//! toward the Residents' latest proposal, and agrees once the two are within
//! `agreement_distance` of each other.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use negotiation_kernel::{
    Grid, GridDims, Oracle, OracleError, Role, TerrainCode, PROPOSAL_CELLS, TERMINATION_TOKEN,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

/// Block shapes tried, as (rows, cols).
const BLOCK_SHAPES: [(usize, usize); 2] = [(2, 4), (4, 2)];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicConfig {
    /// Manhattan distance between block centres at which the Developer agrees
    pub agreement_distance: f64,
    /// Weight added per Developer turn to the pull toward the Residents' block
    pub concession_step: f64,
    /// Token emitted when agreeing
    pub termination_token: String,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            agreement_distance: 3.0,
            concession_step: 0.5,
            termination_token: TERMINATION_TOKEN.to_string(),
        }
    }
}

/// A chosen set of cells with its centre and score.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub cells: Vec<(usize, usize)>,
    pub centre: (f64, f64),
    pub score: f64,
}

/// Offline oracle driven by distance heuristics.
pub struct HeuristicOracle {
    config: HeuristicConfig,
    developer_turns: AtomicUsize,
}

impl HeuristicOracle {
    pub fn new(config: HeuristicConfig) -> Self {
        Self {
            config,
            developer_turns: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &HeuristicConfig {
        &self.config
    }

    fn developer_pull(&self, grid: &Grid, turn: usize) -> Option<((f64, f64), f64)> {
        proposed_centre(grid).map(|centre| (centre, self.config.concession_step * turn as f64))
    }

    fn developer_rationale(&self, grid: &Grid, turn: usize) -> String {
        let pull = self.developer_pull(grid, turn);
        let Some(own) = best_placement(grid, Role::Developer, pull) else {
            return "- There is not enough open grass left for eight new houses.\n\
                    We cannot recommend a location."
                .to_string();
        };
        let area = describe_area(own.centre, grid.dims());
        let (to_houses, to_water) = distances_from(grid, &own.cells);

        match proposed_centre(grid) {
            None => format!(
                "- Open grass in the {area} sits {to_houses} cells from existing homes.\n\
                 - The river is {to_water} cells away, so buyers get a view of the water.\n\
                 We recommend the housing block goes in the {area}."
            ),
            Some(theirs) if manhattan(own.centre, theirs) <= self.config.agreement_distance => {
                format!(
                    "- The residents' proposal in the {} is close enough to what we need.\n\
                     We agree and propose the same location. {}",
                    describe_area(theirs, grid.dims()),
                    self.config.termination_token
                )
            }
            Some(theirs) => format!(
                "- The residents want the houses in the {}, far from services and the river.\n\
                 - We can move toward them, but the {area} keeps the block {to_houses} cells from \
                 existing homes and {to_water} from the water.\n\
                 We recommend the housing block goes in the {area}.",
                describe_area(theirs, grid.dims())
            ),
        }
    }

    fn resident_rationale(&self, grid: &Grid) -> String {
        let Some(own) = best_placement(grid, Role::Resident, None) else {
            return "- We see no open grass left that would spare our homes.\n\
                    We ask the developer to reconsider building at all."
                .to_string();
        };
        let area = describe_area(own.centre, grid.dims());
        let (to_houses, _) = distances_from(grid, &own.cells);

        let proposed: Vec<(usize, usize)> = grid.positions_of(TerrainCode::ProposedHouse).collect();
        if proposed.is_empty() {
            return format!(
                "- We want the new houses well away from our homes.\n\
                 We propose the {area}, {to_houses} cells from the nearest existing house."
            );
        }
        let (theirs, _) = distances_from(grid, &proposed);
        format!(
            "- The developer's block is only {theirs} cells from our homes.\n\
             - We want to protect our houses, the forest and the river.\n\
             We propose the new houses go in the {area} instead, {to_houses} cells from the nearest \
             existing house."
        )
    }
}

impl Default for HeuristicOracle {
    fn default() -> Self {
        Self::new(HeuristicConfig::default())
    }
}

#[async_trait]
impl Oracle for HeuristicOracle {
    async fn reason(
        &self,
        role: Role,
        grid: &Grid,
        _history: &str,
        _is_first_turn: bool,
    ) -> Result<String, OracleError> {
        let text = match role {
            Role::Developer => {
                let turn = self.developer_turns.fetch_add(1, Ordering::SeqCst);
                self.developer_rationale(grid, turn)
            }
            Role::Resident => self.resident_rationale(grid),
        };
        debug!(role = %role, "Heuristic rationale: {}", text);
        Ok(text)
    }

    async fn propose(
        &self,
        role: Role,
        grid: &Grid,
        rationale: &str,
    ) -> Result<String, OracleError> {
        let pull = match role {
            Role::Developer => {
                let turn = self.developer_turns.load(Ordering::SeqCst).saturating_sub(1);
                self.developer_pull(grid, turn)
            }
            Role::Resident => None,
        };
        let cells: Vec<[usize; 2]> = best_placement(grid, role, pull)
            .map(|p| p.cells.into_iter().map(|(r, c)| [r, c]).collect())
            .unwrap_or_default();
        let justification = rationale.lines().last().unwrap_or_default();
        Ok(json!({ "cells": cells, "justification": justification }).to_string())
    }
}

/// Cells a new house may go on.
fn is_open(terrain: TerrainCode) -> bool {
    matches!(terrain, TerrainCode::Grass | TerrainCode::ProposedHouse)
}

fn manhattan(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - b.0).abs() + (a.1 - b.1).abs()
}

fn centre_of(cells: &[(usize, usize)]) -> (f64, f64) {
    let n = cells.len().max(1) as f64;
    let (rs, cs) = cells
        .iter()
        .fold((0.0, 0.0), |(rs, cs), &(r, c)| (rs + r as f64, cs + c as f64));
    (rs / n, cs / n)
}

/// Centre of the proposal currently drawn on the grid.
fn proposed_centre(grid: &Grid) -> Option<(f64, f64)> {
    let cells: Vec<(usize, usize)> = grid.positions_of(TerrainCode::ProposedHouse).collect();
    (!cells.is_empty()).then(|| centre_of(&cells))
}

/// Nearest Manhattan distance from `(r, c)` to any of `targets`.
fn nearest(r: usize, c: usize, targets: &[(usize, usize)], fallback: usize) -> usize {
    targets
        .iter()
        .map(|&(tr, tc)| r.abs_diff(tr) + c.abs_diff(tc))
        .min()
        .unwrap_or(fallback)
}

/// Smallest distance from a set of cells to existing houses and to the river.
fn distances_from(grid: &Grid, cells: &[(usize, usize)]) -> (usize, usize) {
    let far = grid.rows() + grid.cols();
    let houses: Vec<_> = grid.positions_of(TerrainCode::House).collect();
    let river: Vec<_> = grid.positions_of(TerrainCode::River).collect();
    let to_houses = cells
        .iter()
        .map(|&(r, c)| nearest(r, c, &houses, far))
        .min()
        .unwrap_or(far);
    let to_water = cells
        .iter()
        .map(|&(r, c)| nearest(r, c, &river, far))
        .min()
        .unwrap_or(far);
    (to_houses, to_water)
}

/// Per-cell desirability for a role, indexed row-major. `None` for closed cells.
fn cell_scores(grid: &Grid, role: Role) -> Vec<Option<f64>> {
    let far = grid.rows() + grid.cols();
    let houses: Vec<_> = grid.positions_of(TerrainCode::House).collect();
    let river: Vec<_> = grid.positions_of(TerrainCode::River).collect();

    let mut scores = Vec::with_capacity(grid.dims().cell_count());
    for (r, row) in grid.iter_rows().enumerate() {
        for (c, terrain) in row.iter().enumerate() {
            if !is_open(*terrain) {
                scores.push(None);
                continue;
            }
            let to_houses = nearest(r, c, &houses, far) as f64;
            let score = match role {
                Role::Developer => {
                    let to_water = nearest(r, c, &river, far) as f64;
                    -(to_houses + 0.5 * to_water)
                }
                Role::Resident => to_houses,
            };
            scores.push(Some(score));
        }
    }
    scores
}

/// Best placement for `role`, optionally pulled toward a point with a weight.
pub fn best_placement(
    grid: &Grid,
    role: Role,
    pull: Option<((f64, f64), f64)>,
) -> Option<Placement> {
    let scores = cell_scores(grid, role);
    let cols = grid.cols();
    let penalty = |centre: (f64, f64)| {
        pull.map(|(target, weight)| weight * manhattan(centre, target) * PROPOSAL_CELLS as f64)
            .unwrap_or(0.0)
    };

    let mut best: Option<Placement> = None;
    for (height, width) in BLOCK_SHAPES {
        if height > grid.rows() || width > cols {
            continue;
        }
        for top in 0..=grid.rows() - height {
            for left in 0..=cols - width {
                let cells: Vec<(usize, usize)> = (top..top + height)
                    .flat_map(|r| (left..left + width).map(move |c| (r, c)))
                    .collect();
                let Some(sum) = cells
                    .iter()
                    .map(|&(r, c)| scores[r * cols + c])
                    .sum::<Option<f64>>()
                else {
                    continue;
                };
                let centre = centre_of(&cells);
                let score = sum - penalty(centre);
                if best.as_ref().map_or(true, |b| score > b.score) {
                    best = Some(Placement {
                        cells,
                        centre,
                        score,
                    });
                }
            }
        }
    }
    if best.is_some() {
        return best;
    }

    // No block fits: take the best scattered cells.
    let mut open: Vec<((usize, usize), f64)> = scores
        .iter()
        .enumerate()
        .filter_map(|(idx, s)| s.map(|s| ((idx / cols, idx % cols), s)))
        .collect();
    if open.is_empty() {
        return None;
    }
    open.sort_by(|a, b| b.1.total_cmp(&a.1));
    let cells: Vec<(usize, usize)> = open.iter().take(PROPOSAL_CELLS).map(|(p, _)| *p).collect();
    let score = open.iter().take(PROPOSAL_CELLS).map(|(_, s)| s).sum();
    Some(Placement {
        centre: centre_of(&cells),
        cells,
        score,
    })
}

/// Compass description of a point, e.g. "north-east" or "centre".
pub fn describe_area(centre: (f64, f64), dims: GridDims) -> String {
    let third = |value: f64, extent: usize| {
        let t = value / extent.max(1) as f64;
        if t < 1.0 / 3.0 {
            0
        } else if t < 2.0 / 3.0 {
            1
        } else {
            2
        }
    };
    let vertical = ["north", "", "south"][third(centre.0 + 0.5, dims.rows)];
    let horizontal = ["west", "", "east"][third(centre.1 + 0.5, dims.cols)];
    match (vertical.is_empty(), horizontal.is_empty()) {
        (true, true) => "centre".to_string(),
        (true, false) => horizontal.to_string(),
        (false, true) => vertical.to_string(),
        (false, false) => format!("{vertical}-{horizontal}"),
    }
}
