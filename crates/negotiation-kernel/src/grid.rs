//! Terrain grids: the immutable map the negotiating roles argue over.
//!
//! A [`Grid`] can only be obtained through validation ([`validate_grid`] or
//! [`Grid::from_rows`]), so every value of the type is rectangular and holds
//! only known [`TerrainCode`]s. Grids are never edited in place; changes
//! produce a new grid (see [`crate::proposal::materialize`]).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Untrusted numeric grid as produced by a city builder or read from JSON.
pub type RawGrid = Vec<Vec<i64>>;

/// Terrain classification for a single cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum TerrainCode {
    Grass,
    Forest,
    River,
    House,
    /// A cell claimed by the proposal currently on the table.
    ProposedHouse,
}

impl TerrainCode {
    /// Every terrain code, in numeric order.
    pub const ALL: [TerrainCode; 5] = [
        TerrainCode::Grass,
        TerrainCode::Forest,
        TerrainCode::River,
        TerrainCode::House,
        TerrainCode::ProposedHouse,
    ];

    /// Numeric code used on the wire and in prompts.
    pub fn code(self) -> i64 {
        match self {
            Self::Grass => 0,
            Self::Forest => 1,
            Self::River => 2,
            Self::House => 3,
            Self::ProposedHouse => 10,
        }
    }

    /// Terrain that new housing is not supposed to replace.
    pub fn is_protected(self) -> bool {
        matches!(self, Self::Forest | Self::River | Self::House)
    }

    /// Lowercase name used in legends.
    pub fn name(self) -> &'static str {
        match self {
            Self::Grass => "grass",
            Self::Forest => "forest",
            Self::River => "river",
            Self::House => "house",
            Self::ProposedHouse => "proposed new house",
        }
    }
}

impl fmt::Display for TerrainCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value outside the terrain vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid terrain code {0}")]
pub struct InvalidTerrainCode(pub i64);

impl TryFrom<i64> for TerrainCode {
    type Error = InvalidTerrainCode;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Grass),
            1 => Ok(Self::Forest),
            2 => Ok(Self::River),
            3 => Ok(Self::House),
            10 => Ok(Self::ProposedHouse),
            other => Err(InvalidTerrainCode(other)),
        }
    }
}

impl From<TerrainCode> for i64 {
    fn from(terrain: TerrainCode) -> Self {
        terrain.code()
    }
}

/// Grid dimensions (rows × columns).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridDims {
    pub rows: usize,
    pub cols: usize,
}

impl GridDims {
    /// The 10 × 20 map size the city builders produce.
    pub const REFERENCE: GridDims = GridDims { rows: 10, cols: 20 };

    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    pub fn cell_count(self) -> usize {
        self.rows * self.cols
    }
}

impl Default for GridDims {
    fn default() -> Self {
        Self::REFERENCE
    }
}

impl fmt::Display for GridDims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

/// Why a raw grid was rejected. All variants describe a malformed grid and
/// name the first offending position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("malformed grid: grid has no cells")]
    Empty,

    #[error("malformed grid: expected {expected} rows, found {found}")]
    RowCount { expected: usize, found: usize },

    #[error("malformed grid: row {row} has {found} columns, expected {expected}")]
    ColumnCount {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("malformed grid: invalid terrain code {value} at row {row}, column {col}")]
    InvalidTerrain { row: usize, col: usize, value: i64 },
}

/// Immutable rectangular terrain map, stored row-major.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawGrid", into = "RawGrid")]
pub struct Grid {
    dims: GridDims,
    cells: Vec<TerrainCode>,
}

impl Grid {
    /// A grid of the given size filled with one terrain.
    pub fn filled(dims: GridDims, terrain: TerrainCode) -> Self {
        Self {
            dims,
            cells: vec![terrain; dims.cell_count()],
        }
    }

    /// Validate a raw grid, inferring dimensions from its first row.
    pub fn from_rows(rows: &[Vec<i64>]) -> Result<Self, GridError> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        validate_grid(rows, GridDims::new(rows.len(), cols))
    }

    pub fn dims(&self) -> GridDims {
        self.dims
    }

    pub fn rows(&self) -> usize {
        self.dims.rows
    }

    pub fn cols(&self) -> usize {
        self.dims.cols
    }

    /// Whether `(row, col)` lies inside the grid.
    pub fn contains(&self, row: usize, col: usize) -> bool {
        row < self.dims.rows && col < self.dims.cols
    }

    pub fn get(&self, row: usize, col: usize) -> Option<TerrainCode> {
        if self.contains(row, col) {
            Some(self.cells[row * self.dims.cols + col])
        } else {
            None
        }
    }

    /// Iterate rows as slices.
    pub fn iter_rows(&self) -> impl Iterator<Item = &[TerrainCode]> {
        self.cells.chunks(self.dims.cols.max(1))
    }

    /// Coordinates of every cell holding `terrain`, row-major.
    pub fn positions_of(&self, terrain: TerrainCode) -> impl Iterator<Item = (usize, usize)> + '_ {
        let cols = self.dims.cols;
        self.cells
            .iter()
            .enumerate()
            .filter(move |(_, cell)| **cell == terrain)
            .map(move |(idx, _)| (idx / cols, idx % cols))
    }

    /// Numeric rows, as sent to an oracle.
    pub fn to_rows(&self) -> RawGrid {
        self.iter_rows()
            .map(|row| row.iter().map(|cell| cell.code()).collect())
            .collect()
    }

    /// Copy of this grid with the given in-bounds cells set to `terrain`.
    ///
    /// Callers guarantee the coordinates are inside the grid.
    pub(crate) fn with_cells(&self, cells: &[(usize, usize)], terrain: TerrainCode) -> Self {
        let mut next = self.clone();
        for &(row, col) in cells {
            next.cells[row * self.dims.cols + col] = terrain;
        }
        next
    }
}

impl TryFrom<RawGrid> for Grid {
    type Error = GridError;

    fn try_from(rows: RawGrid) -> Result<Self, Self::Error> {
        Grid::from_rows(&rows)
    }
}

impl From<Grid> for RawGrid {
    fn from(grid: Grid) -> Self {
        grid.to_rows()
    }
}

/// Nested-list form, e.g. `[[0, 1], [2, 3]]`.
impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (r, row) in self.iter_rows().enumerate() {
            if r > 0 {
                f.write_str(", ")?;
            }
            f.write_str("[")?;
            for (c, cell) in row.iter().enumerate() {
                if c > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", cell.code())?;
            }
            f.write_str("]")?;
        }
        f.write_str("]")
    }
}

/// Check a raw grid against the expected dimensions and terrain vocabulary.
///
/// Checks run row by row: row count first, then for each row its length and
/// its values, so the error names the first offending row/column.
pub fn validate_grid(rows: &[Vec<i64>], dims: GridDims) -> Result<Grid, GridError> {
    if dims.rows == 0 || dims.cols == 0 {
        return Err(GridError::Empty);
    }
    if rows.len() != dims.rows {
        return Err(GridError::RowCount {
            expected: dims.rows,
            found: rows.len(),
        });
    }

    let mut cells = Vec::with_capacity(dims.cell_count());
    for (row, values) in rows.iter().enumerate() {
        if values.len() != dims.cols {
            return Err(GridError::ColumnCount {
                row,
                expected: dims.cols,
                found: values.len(),
            });
        }
        for (col, &value) in values.iter().enumerate() {
            let terrain = TerrainCode::try_from(value)
                .map_err(|_| GridError::InvalidTerrain { row, col, value })?;
            cells.push(terrain);
        }
    }

    Ok(Grid { dims, cells })
}

/// Number of cells per terrain code. Every code is present, zero counts included.
pub fn count_by_terrain(grid: &Grid) -> BTreeMap<TerrainCode, usize> {
    let mut counts: BTreeMap<TerrainCode, usize> =
        TerrainCode::ALL.iter().map(|t| (*t, 0)).collect();
    for cell in &grid.cells {
        *counts.entry(*cell).or_default() += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rows() -> RawGrid {
        vec![vec![0, 1, 2], vec![3, 0, 10]]
    }

    #[test]
    fn test_terrain_codes_round_trip() {
        for terrain in TerrainCode::ALL {
            assert_eq!(TerrainCode::try_from(terrain.code()), Ok(terrain));
        }
        assert_eq!(TerrainCode::try_from(4), Err(InvalidTerrainCode(4)));
        assert_eq!(TerrainCode::try_from(-1), Err(InvalidTerrainCode(-1)));
    }

    #[test]
    fn test_validate_grid_accepts_well_formed() {
        let grid = validate_grid(&sample_rows(), GridDims::new(2, 3)).unwrap();
        assert_eq!(grid.rows(), 2);
        assert_eq!(grid.cols(), 3);
        assert_eq!(grid.get(1, 2), Some(TerrainCode::ProposedHouse));
        assert_eq!(grid.get(2, 0), None);
        assert_eq!(grid.to_rows(), sample_rows());
    }

    #[test]
    fn test_validate_grid_row_count() {
        let err = validate_grid(&sample_rows(), GridDims::REFERENCE).unwrap_err();
        assert_eq!(
            err,
            GridError::RowCount {
                expected: 10,
                found: 2
            }
        );
    }

    #[test]
    fn test_validate_grid_ragged_row() {
        let rows = vec![vec![0, 0, 0], vec![0, 0]];
        let err = validate_grid(&rows, GridDims::new(2, 3)).unwrap_err();
        assert_eq!(
            err,
            GridError::ColumnCount {
                row: 1,
                expected: 3,
                found: 2
            }
        );
    }

    #[test]
    fn test_validate_grid_reports_first_invalid_code() {
        let rows = vec![vec![0, 0, 0], vec![0, 7, 9]];
        let err = validate_grid(&rows, GridDims::new(2, 3)).unwrap_err();
        assert_eq!(
            err,
            GridError::InvalidTerrain {
                row: 1,
                col: 1,
                value: 7
            }
        );
        assert!(err.to_string().contains("row 1, column 1"));
    }

    #[test]
    fn test_from_rows_rejects_empty() {
        assert_eq!(Grid::from_rows(&[]), Err(GridError::Empty));
        assert_eq!(Grid::from_rows(&[vec![]]), Err(GridError::Empty));
    }

    #[test]
    fn test_count_by_terrain_includes_zero_counts() {
        let grid = Grid::from_rows(&sample_rows()).unwrap();
        let counts = count_by_terrain(&grid);
        assert_eq!(counts.len(), TerrainCode::ALL.len());
        assert_eq!(counts[&TerrainCode::Grass], 2);
        assert_eq!(counts[&TerrainCode::ProposedHouse], 1);

        let empty = Grid::filled(GridDims::new(2, 2), TerrainCode::Grass);
        let counts = count_by_terrain(&empty);
        assert_eq!(counts[&TerrainCode::Grass], 4);
        assert_eq!(counts[&TerrainCode::House], 0);
    }

    #[test]
    fn test_display_matches_nested_list() {
        let grid = Grid::from_rows(&sample_rows()).unwrap();
        assert_eq!(grid.to_string(), "[[0, 1, 2], [3, 0, 10]]");
    }

    #[test]
    fn test_positions_of() {
        let grid = Grid::from_rows(&sample_rows()).unwrap();
        let grass: Vec<_> = grid.positions_of(TerrainCode::Grass).collect();
        assert_eq!(grass, vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn test_serde_uses_numeric_rows() {
        let grid = Grid::from_rows(&sample_rows()).unwrap();
        let json = serde_json::to_string(&grid).unwrap();
        assert_eq!(json, "[[0,1,2],[3,0,10]]");

        let back: Grid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, grid);

        assert!(serde_json::from_str::<Grid>("[[0,5]]").is_err());
    }
}
