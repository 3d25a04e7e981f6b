//! Negotiation Kernel: turn-based spatial negotiation over a terrain grid.
//!
//! Two adversarial roles, a Developer and the Residents, take turns reasoning
//! about and proposing an 8-cell housing block on a shared map. The kernel
//! owns the protocol around those proposals:
//!
//! - `grid`: terrain vocabulary, validated immutable grids
//! - `proposal`: parsing, validation and materialization of housing blocks
//! - `history`: the append-only ledger both roles read
//! - `orchestrator`: the bounded round state machine and termination protocol
//! - `oracle`: collaborator traits (reasoning oracle, city builder, presenter)
//!
//! What the oracle says is not the kernel's concern; only the structure of
//! its answers is.

pub mod config;
pub mod grid;
pub mod history;
pub mod oracle;
pub mod orchestrator;
pub mod proposal;

pub use config::{NegotiationConfig, ProposalAnchor, DEFAULT_MAX_ROUNDS, TERMINATION_TOKEN};
pub use grid::{count_by_terrain, validate_grid, Grid, GridDims, GridError, RawGrid, TerrainCode};
pub use history::HistoryLedger;
pub use oracle::{CityBuilder, NullPresenter, Oracle, OracleError, Presenter, StaticCity};
pub use orchestrator::{
    NegotiationError, NegotiationOrchestrator, NegotiationOutcome, NegotiationState, Phase,
    PhaseOutcome, PhaseRecord, TerminationCause,
};
pub use proposal::{
    materialize, parse_candidate, CandidateCell, Proposal, ProposalError, ProposalValidator, Role,
    ValidatedProposal, ValidationMode, PROPOSAL_CELLS,
};
