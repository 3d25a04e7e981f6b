//! Collaborator interfaces consumed by the orchestrator.
//!
//! The kernel never talks to a language model, a map generator or a console
//! directly. It sees them only through these traits:
//!
//! - [`CityBuilder`]: produces the initial map once, before round 0
//! - [`Oracle`]: produces free-text rationale and structured proposals
//! - [`Presenter`]: one-way notifications for display
//!
//! Oracle calls are the only suspension points of a negotiation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::grid::{Grid, RawGrid};
use crate::orchestrator::Phase;
use crate::proposal::Role;

/// Boxed transport error from a collaborator implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure talking to a collaborator. Never retried by the kernel.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle transport failed: {0}")]
    Transport(#[source] BoxError),

    #[error("oracle call timed out after {0:?}")]
    Timeout(Duration),
}

impl OracleError {
    pub fn transport(err: impl Into<BoxError>) -> Self {
        Self::Transport(err.into())
    }
}

/// Source of rationale and proposals for both roles.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Explain, in free text, where the role wants the housing block.
    ///
    /// `history` is the full rendered ledger. `is_first_turn` is true only for
    /// the Developer's opening move.
    async fn reason(
        &self,
        role: Role,
        grid: &Grid,
        history: &str,
        is_first_turn: bool,
    ) -> Result<String, OracleError>;

    /// Turn a rationale into structured cells, returned as raw text:
    /// `{"cells": [[row, col], ...], "justification": "..."}`.
    async fn propose(&self, role: Role, grid: &Grid, rationale: &str)
        -> Result<String, OracleError>;
}

/// Produces the initial city map.
#[async_trait]
pub trait CityBuilder: Send + Sync {
    /// Return a raw numeric grid. The orchestrator validates it.
    async fn build_city(&self) -> Result<RawGrid, OracleError>;
}

/// Receives display notifications. Implementations must not fail.
pub trait Presenter: Send + Sync {
    /// A role produced rationale text during `phase`.
    fn announce(&self, _role: Role, _phase: Phase, _text: &str) {}

    /// The working grid changed (or was first created).
    fn grid_updated(&self, _caption: &str, _grid: &Grid) {}
}

/// Presenter that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPresenter;

impl Presenter for NullPresenter {}

#[async_trait]
impl<T: Oracle + ?Sized> Oracle for Arc<T> {
    async fn reason(
        &self,
        role: Role,
        grid: &Grid,
        history: &str,
        is_first_turn: bool,
    ) -> Result<String, OracleError> {
        (**self).reason(role, grid, history, is_first_turn).await
    }

    async fn propose(
        &self,
        role: Role,
        grid: &Grid,
        rationale: &str,
    ) -> Result<String, OracleError> {
        (**self).propose(role, grid, rationale).await
    }
}

#[async_trait]
impl<T: CityBuilder + ?Sized> CityBuilder for Arc<T> {
    async fn build_city(&self) -> Result<RawGrid, OracleError> {
        (**self).build_city().await
    }
}

/// Fixed map, for tests and for replaying a saved city.
#[derive(Debug, Clone)]
pub struct StaticCity(pub RawGrid);

#[async_trait]
impl CityBuilder for StaticCity {
    async fn build_city(&self) -> Result<RawGrid, OracleError> {
        Ok(self.0.clone())
    }
}
