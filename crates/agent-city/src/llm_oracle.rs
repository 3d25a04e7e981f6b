//! Language-model backed negotiation oracle.
//!
//! Each role gets its own system prompt. Reasoning calls return plain prose;
//! proposal calls run at low temperature in JSON mode and return the raw
//! `{"cells": ..., "justification": ...}` document for the kernel to validate.

use async_trait::async_trait;
use negotiation_kernel::{Grid, Oracle, OracleError, Role, TerrainCode, PROPOSAL_CELLS};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::chat_client::{ChatClient, ChatRequestOptions, DEFAULT_MODEL};

/// History text shown to the Developer on the opening move.
pub const NO_PREVIOUS_PROPOSALS: &str = "There have not been any previous proposals";

/// Sampling settings for the three prompt families.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmOracleConfig {
    pub model: String,
    pub developer_temperature: f32,
    pub resident_temperature: f32,
    pub proposal_temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for LlmOracleConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            developer_temperature: 1.0,
            resident_temperature: 1.0,
            proposal_temperature: 0.2,
            max_tokens: None,
        }
    }
}

/// Prompt templates for each agent.
pub struct PromptTemplates;

impl PromptTemplates {
    pub fn developer_system() -> String {
        r#"You are a planning-savvy developer agent. You receive a 2D grid map with values:
0=grass, 1=forest, 2=river, 3=house, 10=proposed new house.
Your task: verbally explain the best place for a contiguous 8-cell housing block on grass, close to existing houses, and with views of rivers and forests.

Output requirements:
- Reply in plain language only (no JSON, no coordinates, no code fences).
- Use concise bullet points, then a 1-2 sentence recommendation.
- You cannot place houses in forested areas; you are not allowed to build there.
- You cannot place houses on river cells; you are not allowed to build there.
- Prefer cells close to water. Buyers prefer views of water.
- Try to build near existing housing. Buyers want good access.
- Do not mention the number system.
- Make explicit reference to previous resident proposals in the negotiation history and the proposal grid.
- If previous proposals seem acceptable, agree to them: state that you agree, propose the same location and include the word TERMINATE.
- Answer as a housing developer. If previous proposals exist, bargain with the residents to get the best deal you can."#
            .to_string()
    }

    pub fn resident_system() -> String {
        r#"You are a resident of a small village. You are given a 2D grid map of the village with values:
0=grass, 1=forest, 2=river, 3=house, 10=proposed new house.
Your task: verbally explain the best place for a contiguous 8-cell housing block in your village.
Keep the proposed houses away from existing houses, and take the previous proposals in the negotiation history into account.

Output requirements:
- Reply in plain language only (no JSON, no coordinates, no code fences).
- Concise bullet points, then a 1-2 sentence recommendation.
- Do not mention the numbering scheme.
- Speak as concerned residents protecting forest, rivers and above all existing houses, using "we".
- Make explicit reference to previous developer proposals in the negotiation history.
- Bargain with the developer to get the new houses as far from existing houses as possible.
- Always be explicit about where the new houses should go. Never just say "where it was previously".
- If the developer's latest proposal is acceptable, say so and include the word TERMINATE.

Example: if the new houses sit directly beside the existing ones you might say:
"This proposal is unacceptable, the houses are too close to existing houses, which will be adversely affected. We propose the new houses go in the top left corner, as far as possible from existing houses.""#
            .to_string()
    }

    pub fn proposal_system(rows: usize, cols: usize) -> String {
        format!(
            r#"You generate housing proposals on a {rows}x{cols} grid.
Return STRICT JSON only, with this structure:

{{
  "cells": [[row, col], [row, col], ...],
  "justification": "why these cells were chosen"
}}

Rules:
- "cells" must contain exactly {count} unique [row, col] pairs.
- Rows are 0 to {max_row}, columns are 0 to {max_col}.
- "justification" must explain why these cells were chosen.
- Do not include any text outside the JSON object."#,
            rows = rows,
            cols = cols,
            count = PROPOSAL_CELLS,
            max_row = rows.saturating_sub(1),
            max_col = cols.saturating_sub(1),
        )
    }
}

fn legend() -> Value {
    let mut legend = serde_json::Map::new();
    for terrain in TerrainCode::ALL {
        legend.insert(terrain.code().to_string(), json!(terrain.name()));
    }
    Value::Object(legend)
}

/// User message for a reasoning call.
pub fn reasoning_payload(role: Role, grid: &Grid, history: &str, is_first_turn: bool) -> Value {
    let rows = grid.to_rows();
    match role {
        Role::Developer => {
            let history = if is_first_turn {
                NO_PREVIOUS_PROPOSALS
            } else {
                history
            };
            json!({
                "legend": legend(),
                "grid_shape": [grid.rows(), grid.cols()],
                "proposal_grid": rows,
                "negotiation_history": history,
                "constraints": {
                    "place_on": TerrainCode::Grass.code(),
                    "avoid": [
                        TerrainCode::Forest.code(),
                        TerrainCode::River.code(),
                        TerrainCode::House.code(),
                    ],
                    "prefer_near_houses": true,
                    "prefer_near_rivers": true,
                }
            })
        }
        Role::Resident => json!({
            "legend": legend(),
            "grid_shape": [grid.rows(), grid.cols()],
            "proposed_grid": rows,
            "negotiation_history": history,
            "constraints": {
                "place_on": TerrainCode::Grass.code(),
                "avoid": [
                    TerrainCode::Forest.code(),
                    TerrainCode::River.code(),
                    TerrainCode::House.code(),
                ],
                "prefer_away_from_existing_houses": true,
            }
        }),
    }
}

/// User message for a proposal call.
pub fn proposal_payload(role: Role, grid: &Grid, rationale: &str) -> Value {
    json!({
        "task": format!(
            "Propose {PROPOSAL_CELLS} cells for new houses following the {} rationale. \
             Never place houses on river cells or existing houses.",
            role.to_string().to_lowercase()
        ),
        "legend": legend(),
        "grid_shape": [grid.rows(), grid.cols()],
        "grid": grid.to_rows(),
        "constraints": {
            "cells_required": PROPOSAL_CELLS,
            "place_on": TerrainCode::Grass.code(),
            "avoid": [
                TerrainCode::Forest.code(),
                TerrainCode::River.code(),
                TerrainCode::House.code(),
            ],
            "clustered": true,
            "avoid_river_cells": true,
        },
        "context_from_reasoning_agent": rationale,
    })
}

/// Oracle backed by a chat completions server.
pub struct LlmOracle {
    client: ChatClient,
    config: LlmOracleConfig,
}

impl LlmOracle {
    pub fn new(client: ChatClient, config: LlmOracleConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &LlmOracleConfig {
        &self.config
    }

    async fn ask(
        &self,
        system_prompt: String,
        payload: Value,
        temperature: f32,
        json_object: bool,
    ) -> Result<String, OracleError> {
        let completion = self
            .client
            .complete(ChatRequestOptions {
                model: self.config.model.clone(),
                system_prompt,
                user_prompt: payload.to_string(),
                temperature,
                max_tokens: self.config.max_tokens,
                json_object,
            })
            .await
            .map_err(OracleError::transport)?;
        debug!(
            prompt_tokens = completion.prompt_tokens,
            completion_tokens = completion.completion_tokens,
            "Oracle response: {}",
            completion.content
        );
        Ok(completion.content)
    }
}

#[async_trait]
impl Oracle for LlmOracle {
    async fn reason(
        &self,
        role: Role,
        grid: &Grid,
        history: &str,
        is_first_turn: bool,
    ) -> Result<String, OracleError> {
        let (system, temperature) = match role {
            Role::Developer => (
                PromptTemplates::developer_system(),
                self.config.developer_temperature,
            ),
            Role::Resident => (
                PromptTemplates::resident_system(),
                self.config.resident_temperature,
            ),
        };
        let payload = reasoning_payload(role, grid, history, is_first_turn);
        self.ask(system, payload, temperature, false).await
    }

    async fn propose(
        &self,
        role: Role,
        grid: &Grid,
        rationale: &str,
    ) -> Result<String, OracleError> {
        let system = PromptTemplates::proposal_system(grid.rows(), grid.cols());
        let payload = proposal_payload(role, grid, rationale);
        self.ask(system, payload, self.config.proposal_temperature, true)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use negotiation_kernel::GridDims;

    fn grass() -> Grid {
        Grid::filled(GridDims::new(2, 3), TerrainCode::Grass)
    }

    #[test]
    fn test_first_turn_hides_history() {
        let payload = reasoning_payload(Role::Developer, &grass(), "Initial city map: [[0]]", true);
        assert_eq!(payload["negotiation_history"], NO_PREVIOUS_PROPOSALS);

        let payload =
            reasoning_payload(Role::Developer, &grass(), "Initial city map: [[0]]", false);
        assert_eq!(payload["negotiation_history"], "Initial city map: [[0]]");
    }

    #[test]
    fn test_resident_payload_shape() {
        let payload = reasoning_payload(Role::Resident, &grass(), "history", false);
        assert_eq!(payload["grid_shape"], json!([2, 3]));
        assert_eq!(payload["proposed_grid"], json!([[0, 0, 0], [0, 0, 0]]));
        assert_eq!(payload["constraints"]["prefer_away_from_existing_houses"], true);
        assert_eq!(payload["legend"]["10"], TerrainCode::ProposedHouse.name());
    }

    #[test]
    fn test_proposal_prompt_mentions_bounds() {
        let prompt = PromptTemplates::proposal_system(10, 20);
        assert!(prompt.contains("10x20"));
        assert!(prompt.contains("exactly 8 unique"));
        assert!(prompt.contains("columns are 0 to 19"));

        let payload = proposal_payload(Role::Resident, &grass(), "far away please");
        assert_eq!(payload["constraints"]["cells_required"], 8);
        assert_eq!(payload["context_from_reasoning_agent"], "far away please");
        assert!(payload["task"].as_str().unwrap().contains("resident"));
    }

    #[test]
    fn test_prompts_carry_termination_token() {
        assert!(PromptTemplates::developer_system().contains("TERMINATE"));
        assert!(PromptTemplates::resident_system().contains("TERMINATE"));
    }

    #[test]
    fn test_default_config() {
        let config = LlmOracleConfig::default();
        assert_eq!(config.model, "gpt-4o-mini");
        assert!((config.proposal_temperature - 0.2).abs() < f32::EPSILON);
    }
}
