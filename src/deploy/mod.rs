//! Deployment core: planning, swap strategies, backup retention and the
//! orchestrator that drives them through a [`crate::remote::RemoteExecutor`].

mod error;
mod orchestrator;
pub mod planner;
pub mod retention;
pub mod strategy;

pub use error::{DeployError, RemoteCommandWarning};
pub use orchestrator::DeploymentOrchestrator;
pub use planner::{ArtifactStrategy, EffectiveSettings, ResolvedPlan};
pub use strategy::SwapStrategy;
