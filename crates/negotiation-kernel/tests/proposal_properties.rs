//! Properties of proposal validation and materialization over random cell
//! sets on a random 6×7 map.

use std::collections::HashSet;

use negotiation_kernel::{
    materialize, CandidateCell, Grid, ProposalError, ProposalValidator, RawGrid, TerrainCode,
    ValidationMode, PROPOSAL_CELLS,
};
use proptest::prelude::*;

const ROWS: usize = 6;
const COLS: usize = 7;

fn raw_grid() -> impl Strategy<Value = RawGrid> {
    prop::collection::vec(prop::collection::vec(0i64..=4, COLS), ROWS)
}

/// Cells that may fall just outside the grid on any side.
fn any_cell() -> impl Strategy<Value = CandidateCell> {
    (-2i64..(ROWS as i64 + 2), -2i64..(COLS as i64 + 2))
}

fn mode() -> impl Strategy<Value = ValidationMode> {
    prop_oneof![Just(ValidationMode::Permissive), Just(ValidationMode::Strict)]
}

fn distinct_in_bounds_cells() -> impl Strategy<Value = Vec<CandidateCell>> {
    let all: Vec<CandidateCell> = (0..ROWS as i64)
        .flat_map(|r| (0..COLS as i64).map(move |c| (r, c)))
        .collect();
    prop::sample::subsequence(all, PROPOSAL_CELLS).prop_shuffle()
}

fn in_bounds(&(row, col): &CandidateCell) -> bool {
    (0..ROWS as i64).contains(&row) && (0..COLS as i64).contains(&col)
}

fn terrain_at(grid: &Grid, &(row, col): &CandidateCell) -> Option<TerrainCode> {
    grid.get(row as usize, col as usize)
}

proptest! {
    #[test]
    fn test_wrong_cardinality_always_rejected(
        raw in raw_grid(),
        cells in prop::collection::vec(any_cell(), 0..16),
        mode in mode(),
    ) {
        prop_assume!(cells.len() != PROPOSAL_CELLS);
        let grid = Grid::from_rows(&raw).unwrap();

        let err = ProposalValidator::new(mode).validate(&grid, &cells).unwrap_err();
        prop_assert_eq!(
            err,
            ProposalError::WrongCardinality {
                expected: PROPOSAL_CELLS,
                actual: cells.len(),
            }
        );
    }

    #[test]
    fn test_eight_cells_classified_in_check_order(
        raw in raw_grid(),
        cells in prop::collection::vec(any_cell(), PROPOSAL_CELLS),
        mode in mode(),
    ) {
        let grid = Grid::from_rows(&raw).unwrap();
        let result = ProposalValidator::new(mode).validate(&grid, &cells);

        let distinct: HashSet<_> = cells.iter().collect();
        let has_duplicate = distinct.len() != cells.len();
        let has_outside = !cells.iter().all(in_bounds);
        let has_protected = cells
            .iter()
            .filter(|c| in_bounds(c))
            .filter_map(|c| terrain_at(&grid, c))
            .any(TerrainCode::is_protected);

        if has_duplicate {
            let is_duplicate = matches!(result, Err(ProposalError::DuplicateCell { .. }));
            prop_assert!(is_duplicate);
        } else if has_outside {
            let is_out_of_bounds = matches!(result, Err(ProposalError::OutOfBounds { .. }));
            prop_assert!(is_out_of_bounds);
        } else if mode == ValidationMode::Strict && has_protected {
            let is_forbidden = matches!(result, Err(ProposalError::ForbiddenTerrain { .. }));
            prop_assert!(is_forbidden);
        } else {
            prop_assert!(result.is_ok());
        }
    }

    #[test]
    fn test_materialize_marks_exactly_the_proposed_cells(
        raw in raw_grid(),
        cells in distinct_in_bounds_cells(),
    ) {
        let grid = Grid::from_rows(&raw).unwrap();
        let before = grid.clone();
        let validated = ProposalValidator::new(ValidationMode::Permissive)
            .validate(&grid, &cells)
            .unwrap();

        let updated = materialize(&grid, &validated);
        prop_assert_eq!(&grid, &before);
        prop_assert_eq!(updated.dims(), grid.dims());

        let proposed: HashSet<(usize, usize)> = cells
            .iter()
            .map(|&(r, c)| (r as usize, c as usize))
            .collect();
        for row in 0..ROWS {
            for col in 0..COLS {
                let expected = if proposed.contains(&(row, col)) {
                    Some(TerrainCode::ProposedHouse)
                } else {
                    grid.get(row, col)
                };
                prop_assert_eq!(updated.get(row, col), expected);
            }
        }
    }
}
