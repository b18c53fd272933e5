//! Scenario provider abstraction.
//!
//! The orchestrator treats scenario lookup, prompt generation, response
//! validation, success evaluation, and result persistence as an opaque
//! collaborator behind [`ScenarioProvider`]. [`catalog::ScenarioCatalog`]
//! is the file-backed implementation used by the binary.

pub mod catalog;

use std::future::Future;
use std::pin::Pin;

use crate::models::result::TrainingResult;
use crate::models::scenario::{Prompt, PromptPhase, Scenario, ValidationResult};
use crate::models::session::ResponseRecord;
use crate::Result;

pub use catalog::ScenarioCatalog;

/// Source of scenarios, prompts, and verdicts for the test loop.
pub trait ScenarioProvider: Send + Sync {
    /// Resolve a scenario identifier. `Ok(None)` means the scenario is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup itself fails.
    fn resolve(
        &self,
        scenario_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Scenario>>> + Send + '_>>;

    /// Produce the next prompt for `phase`. `Ok(None)` means no prompt exists.
    ///
    /// # Errors
    ///
    /// Returns an error if prompt generation fails.
    fn next_prompt(
        &self,
        scenario_id: &str,
        phase: PromptPhase,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Prompt>>> + Send + '_>>;

    /// Validate one response. Rule failures are returned as results, not errors.
    ///
    /// # Errors
    ///
    /// Returns an error only if validation could not be carried out.
    fn validate(
        &self,
        scenario_id: &str,
        prompt_id: &str,
        response: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ValidationResult>>> + Send + '_>>;

    /// Decide whether the accumulated history satisfies the scenario.
    ///
    /// # Errors
    ///
    /// Returns an error if evaluation could not be carried out.
    fn evaluate_success<'a>(
        &'a self,
        scenario_id: &'a str,
        history: &'a [ResponseRecord],
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

    /// Persist a terminal result.
    ///
    /// # Errors
    ///
    /// Returns an error if the result could not be stored.
    fn record_result(
        &self,
        result: TrainingResult,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
