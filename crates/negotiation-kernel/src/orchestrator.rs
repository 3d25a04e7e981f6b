//! The negotiation state machine.
//!
//! One run walks `Init → rounds → Terminated`. Each round is strictly ordered:
//!
//! 1. Developer reasons (history entry appended)
//! 2. Termination check on the Developer's rationale
//! 3. Developer proposes; the proposal is validated and materialized
//! 4. Resident reasons (history entry appended)
//! 5. Termination check on the Resident's rationale
//! 6. Resident proposes; the resulting grid is appended to the history
//! 7. Round counter advances; the run ends when it reaches `max_rounds`
//!
//! Oracle calls are awaited one at a time. The grid and history are only
//! touched after a call has fully resolved, so a failed or timed-out call
//! leaves both as they were.
//!
//! ## Usage
//!
//! ```ignore
//! let orchestrator = NegotiationOrchestrator::new(config, &oracle)
//!     .with_presenter(&presenter);
//! let outcome = orchestrator.run(&city_builder).await?;
//! println!("ended by {}", outcome.cause);
//! ```

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, NegotiationConfig, ProposalAnchor};
use crate::grid::{validate_grid, Grid, GridError, RawGrid};
use crate::history::HistoryLedger;
use crate::oracle::{CityBuilder, NullPresenter, Oracle, OracleError, Presenter};
use crate::proposal::{materialize, Proposal, ProposalError, ProposalValidator, Role};

/// Prefix of the history entry written when a proposal cannot be used.
pub const FALLBACK_PREFIX: &str = "⚠️ Failed to parse proposal";

/// Position of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Init,
    DeveloperReasoning,
    DeveloperProposing,
    ResidentReasoning,
    ResidentProposing,
    Terminated,
}

impl Phase {
    fn reasoning(role: Role) -> Self {
        match role {
            Role::Developer => Self::DeveloperReasoning,
            Role::Resident => Self::ResidentReasoning,
        }
    }

    fn proposing(role: Role) -> Self {
        match role {
            Role::Developer => Self::DeveloperProposing,
            Role::Resident => Self::ResidentProposing,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::DeveloperReasoning => "developer reasoning",
            Self::DeveloperProposing => "developer proposing",
            Self::ResidentReasoning => "resident reasoning",
            Self::ResidentProposing => "resident proposing",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Why a negotiation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationCause {
    /// The Developer's rationale contained the termination token.
    Developer,
    /// The Resident's rationale contained the termination token.
    Resident,
    /// `max_rounds` rounds were played without a termination token.
    RoundsExhausted,
}

impl TerminationCause {
    /// The role that ended the negotiation, if any.
    pub fn role(self) -> Option<Role> {
        match self {
            Self::Developer => Some(Role::Developer),
            Self::Resident => Some(Role::Resident),
            Self::RoundsExhausted => None,
        }
    }

    fn requested_by(role: Role) -> Self {
        match role {
            Role::Developer => Self::Developer,
            Role::Resident => Self::Resident,
        }
    }
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Developer => write!(f, "developer"),
            Self::Resident => write!(f, "resident"),
            Self::RoundsExhausted => write!(f, "rounds exhausted"),
        }
    }
}

/// Result of a proposing phase: either the proposal was drawn onto the grid,
/// or it was unusable and the grid was kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    Applied { proposal: Proposal },
    Fallback { error: ProposalError },
}

impl PhaseOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// What happened in one proposing phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseRecord {
    pub round: usize,
    pub role: Role,
    pub outcome: PhaseOutcome,
}

/// Errors that end a run. Proposal problems never appear here; they are
/// recovered as [`PhaseOutcome::Fallback`].
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error("refusing to negotiate on city map: {0}")]
    MalformedGrid(#[from] GridError),

    #[error("city builder unavailable: {0}")]
    CityUnavailable(#[source] OracleError),

    #[error("{role} oracle unavailable during {phase}: {source}")]
    OracleUnavailable {
        role: Role,
        phase: Phase,
        #[source]
        source: OracleError,
    },
}

/// Session state for one negotiation, owned and mutated only by the
/// orchestrator running it.
#[derive(Debug, Clone)]
pub struct NegotiationState {
    negotiation_id: Uuid,
    base_grid: Grid,
    current_grid: Grid,
    round: usize,
    is_first_turn: bool,
    phase: Phase,
    history: HistoryLedger,
    terminated: bool,
    terminated_by: Option<Role>,
    records: Vec<PhaseRecord>,
}

impl NegotiationState {
    fn new(city: Grid) -> Self {
        Self {
            negotiation_id: Uuid::new_v4(),
            current_grid: city.clone(),
            base_grid: city,
            round: 0,
            is_first_turn: true,
            phase: Phase::Init,
            history: HistoryLedger::new(),
            terminated: false,
            terminated_by: None,
            records: Vec::new(),
        }
    }

    pub fn negotiation_id(&self) -> Uuid {
        self.negotiation_id
    }

    /// The city map as generated. Never overwritten.
    pub fn base_grid(&self) -> &Grid {
        &self.base_grid
    }

    /// Latest working grid.
    pub fn current_grid(&self) -> &Grid {
        &self.current_grid
    }

    /// Zero-based round counter. Equals `max_rounds` after exhaustion.
    pub fn round(&self) -> usize {
        self.round
    }

    pub fn is_first_turn(&self) -> bool {
        self.is_first_turn
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn history(&self) -> &HistoryLedger {
        &self.history
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn terminated_by(&self) -> Option<Role> {
        self.terminated_by
    }

    /// One record per proposing phase that ran, in order.
    pub fn records(&self) -> &[PhaseRecord] {
        &self.records
    }
}

/// Terminal result of a run.
#[derive(Debug, Clone)]
pub struct NegotiationOutcome {
    pub state: NegotiationState,
    pub cause: TerminationCause,
}

impl NegotiationOutcome {
    pub fn final_grid(&self) -> &Grid {
        self.state.current_grid()
    }

    pub fn history(&self) -> &HistoryLedger {
        self.state.history()
    }
}

/// Drives one negotiation to completion.
///
/// Consumed by [`run`](Self::run); construct a new one for another run.
pub struct NegotiationOrchestrator<'a> {
    config: NegotiationConfig,
    oracle: &'a dyn Oracle,
    presenter: &'a dyn Presenter,
    validator: ProposalValidator,
}

impl<'a> NegotiationOrchestrator<'a> {
    pub fn new(config: NegotiationConfig, oracle: &'a dyn Oracle) -> Self {
        let validator = ProposalValidator::new(config.validation_mode);
        Self {
            config,
            oracle,
            presenter: &NullPresenter,
            validator,
        }
    }

    pub fn with_presenter(mut self, presenter: &'a dyn Presenter) -> Self {
        self.presenter = presenter;
        self
    }

    pub fn config(&self) -> &NegotiationConfig {
        &self.config
    }

    /// Ask the city builder for a map, then negotiate over it.
    pub async fn run(
        self,
        city: &dyn CityBuilder,
    ) -> Result<NegotiationOutcome, NegotiationError> {
        self.config.validate()?;
        let raw = self
            .bounded(city.build_city())
            .await
            .map_err(NegotiationError::CityUnavailable)?;
        self.run_with_grid(raw).await
    }

    /// Negotiate over an already generated map.
    pub async fn run_with_grid(
        self,
        raw: RawGrid,
    ) -> Result<NegotiationOutcome, NegotiationError> {
        self.config.validate()?;
        let city = validate_grid(&raw, self.config.dims)?;
        let mut state = NegotiationState::new(city);

        info!(
            negotiation = %state.negotiation_id,
            dims = %self.config.dims,
            max_rounds = self.config.max_rounds,
            mode = ?self.config.validation_mode,
            "Starting negotiation"
        );

        state
            .history
            .append(format!("Initial city map: {}", state.base_grid));
        self.presenter.grid_updated("Initial city map", &state.base_grid);

        while state.round < self.config.max_rounds {
            if let Some(cause) = self.play_round(&mut state).await? {
                return Ok(self.finish(state, cause));
            }
            state.round += 1;
        }

        Ok(self.finish(state, TerminationCause::RoundsExhausted))
    }

    /// Play one round. Returns a cause when a role asked to stop.
    async fn play_round(
        &self,
        state: &mut NegotiationState,
    ) -> Result<Option<TerminationCause>, NegotiationError> {
        let round = state.round;
        debug!(round, "Round start");

        // Developer
        let first_turn = state.is_first_turn;
        let rationale = self.reason(state, Role::Developer, first_turn).await?;
        if self.requests_termination(&rationale) {
            info!(round, role = %Role::Developer, "Termination requested");
            return Ok(Some(TerminationCause::requested_by(Role::Developer)));
        }
        self.propose(state, Role::Developer, &rationale, false).await?;
        state.is_first_turn = false;

        // Resident
        let rationale = self.reason(state, Role::Resident, false).await?;
        if self.requests_termination(&rationale) {
            info!(round, role = %Role::Resident, "Termination requested");
            return Ok(Some(TerminationCause::requested_by(Role::Resident)));
        }
        self.propose(state, Role::Resident, &rationale, true).await?;

        Ok(None)
    }

    async fn reason(
        &self,
        state: &mut NegotiationState,
        role: Role,
        is_first_turn: bool,
    ) -> Result<String, NegotiationError> {
        let phase = Phase::reasoning(role);
        state.phase = phase;

        let history = state.history.render();
        let rationale = self
            .bounded(
                self.oracle
                    .reason(role, &state.current_grid, &history, is_first_turn),
            )
            .await
            .map_err(|source| NegotiationError::OracleUnavailable {
                role,
                phase,
                source,
            })?
            .trim()
            .to_string();

        if rationale.is_empty() {
            warn!(round = state.round, role = %role, "Blank rationale, continuing");
        } else {
            debug!(round = state.round, role = %role, chars = rationale.len(), "Rationale received");
        }
        state
            .history
            .append(format!("{role} reasoning round {}: {rationale}", state.round));
        self.presenter.announce(role, phase, &rationale);

        Ok(rationale)
    }

    async fn propose(
        &self,
        state: &mut NegotiationState,
        role: Role,
        rationale: &str,
        log_grid: bool,
    ) -> Result<(), NegotiationError> {
        let phase = Phase::proposing(role);
        state.phase = phase;
        let round = state.round;

        let raw = self
            .bounded(self.oracle.propose(role, &state.current_grid, rationale))
            .await
            .map_err(|source| NegotiationError::OracleUnavailable {
                role,
                phase,
                source,
            })?;

        let outcome = match self.validator.check(&state.current_grid, role, &raw) {
            Ok(proposal) => {
                let anchor = match self.config.anchor {
                    ProposalAnchor::BaseGrid => &state.base_grid,
                    ProposalAnchor::CurrentGrid => &state.current_grid,
                };
                state.current_grid = materialize(anchor, &proposal.validated);
                info!(round, role = %role, cells = ?proposal.validated.cells(), "Proposal applied");

                if log_grid {
                    // Label kept as-is: this entry records the grid after the
                    // Resident's proposal.
                    state.history.append(format!(
                        "Developer proposal grid round {round}: {}",
                        state.current_grid
                    ));
                }
                self.presenter.grid_updated(
                    &format!("{role} proposal, round {round}"),
                    &state.current_grid,
                );
                PhaseOutcome::Applied { proposal }
            }
            Err(error) => {
                warn!(round, role = %role, error = %error, "Proposal rejected, keeping current grid");
                let entry = format!("{role} proposal round {round}: {FALLBACK_PREFIX}: {error}");
                self.presenter.announce(role, phase, &entry);
                state.history.append(entry);
                PhaseOutcome::Fallback { error }
            }
        };

        state.records.push(PhaseRecord {
            round,
            role,
            outcome,
        });
        Ok(())
    }

    fn requests_termination(&self, rationale: &str) -> bool {
        rationale.contains(self.config.termination_token.as_str())
    }

    /// Await a collaborator call under the configured timeout.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, OracleError>>,
    ) -> Result<T, OracleError> {
        match self.config.oracle_timeout() {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| OracleError::Timeout(limit))?,
            None => call.await,
        }
    }

    fn finish(&self, mut state: NegotiationState, cause: TerminationCause) -> NegotiationOutcome {
        state.phase = Phase::Terminated;
        state.terminated = true;
        state.terminated_by = cause.role();

        let applied = state.records.iter().filter(|r| r.outcome.is_applied()).count();
        info!(
            negotiation = %state.negotiation_id,
            cause = %cause,
            rounds = state.round,
            applied,
            fallbacks = state.records.len() - applied,
            "Negotiation finished"
        );

        NegotiationOutcome { state, cause }
    }
}
