//! Console rendering of maps and negotiation progress.

use negotiation_kernel::{Grid, Phase, Presenter, Role, TerrainCode};

/// Banner printed before a negotiation starts.
pub const HEADING: &str = r#"
AGENT CITY
==========

A map builder generates a city with houses, grassland, trees and water.

Two agents, a developer and the existing residents, then negotiate over
where to place a new 8-cell housing block.

The developer wants to build near existing houses and near water.
The residents want the new houses kept away from existing houses.
"#;

/// Emoji for a single terrain cell.
pub fn terrain_emoji(terrain: TerrainCode) -> &'static str {
    match terrain {
        TerrainCode::Grass => "🟩",
        TerrainCode::Forest => "🌳",
        TerrainCode::River => "🟦",
        TerrainCode::House => "🏠",
        TerrainCode::ProposedHouse => "🟥",
    }
}

/// Render a grid as emoji rows joined by newlines.
pub fn to_emoji(grid: &Grid) -> String {
    grid.iter_rows()
        .map(|row| row.iter().map(|t| terrain_emoji(*t)).collect::<String>())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Legend line shown under maps.
pub fn legend() -> String {
    TerrainCode::ALL
        .iter()
        .map(|t| format!("{} {}", terrain_emoji(*t), t.name()))
        .collect::<Vec<_>>()
        .join("  ")
}

/// Prints rationale and maps to stdout as they happen.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsolePresenter {
    /// Print the legend under every map
    pub show_legend: bool,
}

impl ConsolePresenter {
    pub fn new() -> Self {
        Self { show_legend: true }
    }

    pub fn heading(&self) {
        println!("{HEADING}");
    }
}

impl Presenter for ConsolePresenter {
    fn announce(&self, role: Role, phase: Phase, text: &str) {
        let author = match phase {
            Phase::DeveloperReasoning | Phase::ResidentReasoning => format!("{role} (reasoning)"),
            Phase::DeveloperProposing | Phase::ResidentProposing => format!("{role} (proposal)"),
            _ => role.to_string(),
        };
        println!("\n=== {author} ===");
        println!("{text}");
    }

    fn grid_updated(&self, caption: &str, grid: &Grid) {
        println!("\n--- {caption} ---");
        println!("{}", to_emoji(grid));
        if self.show_legend {
            println!("{}", legend());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_emoji() {
        let grid = Grid::from_rows(&[vec![0, 1, 2], vec![3, 10, 0]]).unwrap();
        assert_eq!(to_emoji(&grid), "🟩🌳🟦\n🏠🟥🟩");
    }

    #[test]
    fn test_legend_lists_every_terrain() {
        let legend = legend();
        for terrain in TerrainCode::ALL {
            assert!(legend.contains(terrain.name()));
        }
    }
}
