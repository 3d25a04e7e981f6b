//! City map builders.
//!
//! [`LlmCityBuilder`] asks a language model for a map. [`ProceduralCityBuilder`]
//! draws one from a seeded RNG so runs can be reproduced offline.

use anyhow::{Context, Result};
use async_trait::async_trait;
use negotiation_kernel::{CityBuilder, GridDims, OracleError, RawGrid, TerrainCode};
use rand::prelude::*;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::chat_client::{ChatClient, ChatRequestOptions, DEFAULT_MODEL};

/// System prompt for the map-building agent.
pub fn city_prompt(dims: GridDims) -> String {
    format!(
        r#"Imagine a grid-based city with a river, forest, grassland and houses.
Generate a compact city map.

Legend (numeric codes):
0 = grass
1 = forest
2 = river
3 = house

There should be a roughly equal proportion of grassland and forest.
The river should be continuous and natural-looking, at least two cells wide, and must connect to at least one edge of the map.

Return STRICT JSON only (no code fences, no prose):
{{ "grid": [[row0], [row1], ..., [row{last_row}]] }}

Rules:
- Grid size exactly {rows} rows x {cols} columns.
- Each row is a list of {cols} integers using only the codes 0, 1, 2, 3.
- Houses must be clustered together, not scattered, about 10 houses in total.
- The river must form a continuous course of at least 15 cells."#,
        rows = dims.rows,
        cols = dims.cols,
        last_row = dims.rows.saturating_sub(1),
    )
}

#[derive(Deserialize)]
struct CityResponse {
    grid: Option<RawGrid>,
}

/// Pull the `grid` array out of a model response.
///
/// Shape and terrain are not checked here; the orchestrator validates the
/// grid before any negotiation starts.
pub fn parse_city_response(raw: &str) -> Result<RawGrid> {
    let trimmed = raw.trim();
    let parsed: CityResponse = match serde_json::from_str(trimmed) {
        Ok(parsed) => parsed,
        Err(_) => {
            let object = Regex::new(r"(?s)\{.*\}")
                .ok()
                .and_then(|re| re.find(trimmed).map(|m| m.as_str()))
                .context("City response contains no JSON object")?;
            serde_json::from_str(object).context("Failed to parse city response")?
        }
    };
    parsed.grid.context("City response has no \"grid\" array")
}

/// Builds the map with one chat completion.
pub struct LlmCityBuilder {
    client: ChatClient,
    model: String,
    dims: GridDims,
    temperature: f32,
}

impl LlmCityBuilder {
    pub fn new(client: ChatClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            dims: GridDims::REFERENCE,
            temperature: 1.0,
        }
    }

    pub fn with_dims(mut self, dims: GridDims) -> Self {
        self.dims = dims;
        self
    }

    async fn request(&self) -> Result<RawGrid> {
        info!(model = %self.model, dims = %self.dims, "Building city map");
        let completion = self
            .client
            .complete(ChatRequestOptions {
                model: self.model.clone(),
                system_prompt: city_prompt(self.dims),
                user_prompt: "Return the JSON now.".to_string(),
                temperature: self.temperature,
                max_tokens: None,
                json_object: true,
            })
            .await?;
        debug!("City response: {}", completion.content);
        parse_city_response(&completion.content)
    }
}

impl Default for LlmCityBuilder {
    fn default() -> Self {
        Self::new(ChatClient::from_env(), DEFAULT_MODEL)
    }
}

#[async_trait]
impl CityBuilder for LlmCityBuilder {
    async fn build_city(&self) -> Result<RawGrid, OracleError> {
        self.request().await.map_err(OracleError::transport)
    }
}

/// Configuration for procedural maps.
#[derive(Debug, Clone)]
pub struct CityGenConfig {
    pub dims: GridDims,
    /// Houses in the existing cluster
    pub house_count: usize,
    /// Share of non-river cells to cover with forest
    pub forest_share: f64,
    /// Random seed for reproducibility (None for random)
    pub seed: Option<u64>,
}

impl Default for CityGenConfig {
    fn default() -> Self {
        Self {
            dims: GridDims::REFERENCE,
            house_count: 10,
            forest_share: 0.3,
            seed: None,
        }
    }
}

/// Offline map generator.
///
/// A two-cell-wide river enters at the top edge and meanders to the bottom,
/// forest grows in one or two patches, and the houses form a single cluster.
pub struct ProceduralCityBuilder {
    config: CityGenConfig,
}

impl ProceduralCityBuilder {
    pub fn new(config: CityGenConfig) -> Self {
        Self { config }
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(CityGenConfig {
            seed: Some(seed),
            ..Default::default()
        })
    }

    /// Generate a map.
    pub fn generate(&self) -> RawGrid {
        let mut rng: Box<dyn RngCore> = match self.config.seed {
            Some(seed) => Box::new(StdRng::seed_from_u64(seed)),
            None => Box::new(rand::rng()),
        };

        let GridDims { rows, cols } = self.config.dims;
        let mut cells = vec![vec![TerrainCode::Grass; cols]; rows];
        if rows == 0 || cols == 0 {
            return Vec::new();
        }

        carve_river(&mut cells, &mut rng);
        plant_forest(&mut cells, self.config.forest_share, &mut rng);
        place_houses(&mut cells, self.config.house_count, &mut rng);

        cells
            .into_iter()
            .map(|row| row.into_iter().map(TerrainCode::code).collect())
            .collect()
    }
}

impl Default for ProceduralCityBuilder {
    fn default() -> Self {
        Self::new(CityGenConfig::default())
    }
}

#[async_trait]
impl CityBuilder for ProceduralCityBuilder {
    async fn build_city(&self) -> Result<RawGrid, OracleError> {
        Ok(self.generate())
    }
}

fn carve_river(cells: &mut [Vec<TerrainCode>], rng: &mut impl Rng) {
    let cols = cells[0].len();
    let width = cols.min(2);
    let max_col = cols - width;
    // Keep clear of the edges so there is room to meander
    let mut col = if max_col >= 4 {
        rng.random_range(max_col / 4..=max_col * 3 / 4)
    } else {
        rng.random_range(0..=max_col)
    };

    for row in cells.iter_mut() {
        for cell in row.iter_mut().skip(col).take(width) {
            *cell = TerrainCode::River;
        }
        // Shifts of one column keep consecutive rows overlapping
        col = match rng.random_range(0..4) {
            0 => col.saturating_sub(1),
            1 => (col + 1).min(max_col),
            _ => col,
        };
    }
}

fn plant_forest(cells: &mut [Vec<TerrainCode>], share: f64, rng: &mut impl Rng) {
    let rows = cells.len();
    let cols = cells[0].len();
    let open = cells
        .iter()
        .flatten()
        .filter(|c| **c == TerrainCode::Grass)
        .count();
    let target = (open as f64 * share.clamp(0.0, 1.0)).round() as usize;
    let patches = rng.random_range(1..=2);
    let per_patch = target.div_ceil(patches);

    let mut planted = 0;
    for _ in 0..patches {
        let Some(&start) = grass_cells(cells).choose(rng) else {
            return;
        };
        let mut frontier = vec![start];
        let mut grown = 0;
        while grown < per_patch && planted < target {
            if frontier.is_empty() {
                break;
            }
            let idx = rng.random_range(0..frontier.len());
            let (r, c) = frontier.swap_remove(idx);
            if cells[r][c] != TerrainCode::Grass {
                continue;
            }
            cells[r][c] = TerrainCode::Forest;
            grown += 1;
            planted += 1;
            frontier.extend(neighbours(r, c, rows, cols));
        }
    }
}

fn place_houses(cells: &mut [Vec<TerrainCode>], count: usize, rng: &mut impl Rng) {
    if count == 0 {
        return;
    }
    let rows = cells.len();
    let cols = cells[0].len();
    // Start inside the largest open area so the cluster has room to grow
    let Some(&start) = largest_grass_region(cells).choose(rng) else {
        return;
    };

    let mut cluster = vec![start];
    cells[start.0][start.1] = TerrainCode::House;
    while cluster.len() < count {
        let candidates: Vec<(usize, usize)> = cluster
            .iter()
            .flat_map(|&(r, c)| neighbours(r, c, rows, cols))
            .filter(|&(r, c)| cells[r][c] == TerrainCode::Grass)
            .collect();
        let Some(&(r, c)) = candidates.choose(rng) else {
            break;
        };
        cells[r][c] = TerrainCode::House;
        cluster.push((r, c));
    }
}

fn grass_cells(cells: &[Vec<TerrainCode>]) -> Vec<(usize, usize)> {
    cells
        .iter()
        .enumerate()
        .flat_map(|(r, row)| {
            row.iter()
                .enumerate()
                .filter(|(_, cell)| **cell == TerrainCode::Grass)
                .map(move |(c, _)| (r, c))
        })
        .collect()
}

fn largest_grass_region(cells: &[Vec<TerrainCode>]) -> Vec<(usize, usize)> {
    let rows = cells.len();
    let cols = cells[0].len();
    let mut seen = vec![vec![false; cols]; rows];
    let mut best = Vec::new();

    for (r, c) in grass_cells(cells) {
        if seen[r][c] {
            continue;
        }
        seen[r][c] = true;
        let mut region = Vec::new();
        let mut stack = vec![(r, c)];
        while let Some((r, c)) = stack.pop() {
            region.push((r, c));
            for (nr, nc) in neighbours(r, c, rows, cols) {
                if !seen[nr][nc] && cells[nr][nc] == TerrainCode::Grass {
                    seen[nr][nc] = true;
                    stack.push((nr, nc));
                }
            }
        }
        if region.len() > best.len() {
            best = region;
        }
    }
    best
}

fn neighbours(r: usize, c: usize, rows: usize, cols: usize) -> Vec<(usize, usize)> {
    let mut out = Vec::with_capacity(4);
    if r > 0 {
        out.push((r - 1, c));
    }
    if r + 1 < rows {
        out.push((r + 1, c));
    }
    if c > 0 {
        out.push((r, c - 1));
    }
    if c + 1 < cols {
        out.push((r, c + 1));
    }
    out
}
