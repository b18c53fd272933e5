//! File-backed scenario catalog.
//!
//! Scenarios are TOML documents discovered with the glob `<dir>/*.toml`.
//! Each document declares its prompts per phase, a list of validation
//! rules, and a success criterion evaluated over the validated response
//! history. Terminal results are forwarded to an optional [`ResultSink`].

use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::ScenarioProvider;
use crate::models::result::TrainingResult;
use crate::models::scenario::{Prompt, PromptPhase, Scenario, ValidationResult};
use crate::models::session::ResponseRecord;
use crate::result_log::ResultSink;
use crate::{AppError, Result};

/// Prompt entry in a scenario file.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptDefinition {
    /// Prompt identifier.
    pub id: String,
    /// Phase the prompt is issued in.
    pub phase: PromptPhase,
    /// Prompt text.
    pub content: String,
}

/// Rule check kinds.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCheck {
    /// Response must match `pattern`.
    MustMatch {
        /// Regular expression.
        pattern: String,
    },
    /// Response must not match `pattern`.
    MustNotMatch {
        /// Regular expression.
        pattern: String,
    },
    /// Response must be at most `max` characters long.
    MaxLength {
        /// Character limit.
        max: usize,
    },
}

/// Validation rule entry in a scenario file.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleDefinition {
    /// Rule name reported in [`ValidationResult::rule`].
    pub name: String,
    /// Restrict the rule to these prompt ids; empty applies to every prompt.
    #[serde(default)]
    pub prompt_ids: Vec<String>,
    /// What the rule checks.
    #[serde(flatten)]
    pub check: RuleCheck,
}

/// How the validated history is judged.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SuccessCriteria {
    /// The most recent response passed every rule.
    #[default]
    LatestPasses,
    /// Any response so far passed every rule.
    AnyPasses,
    /// The last `count` responses all passed every rule.
    ConsecutivePasses {
        /// Required run length.
        count: u32,
    },
}

impl SuccessCriteria {
    /// Evaluate the criterion over `history`.
    #[must_use]
    pub fn is_satisfied(self, history: &[ResponseRecord]) -> bool {
        match self {
            Self::LatestPasses => history.last().is_some_and(ResponseRecord::all_passed),
            Self::AnyPasses => history.iter().any(ResponseRecord::all_passed),
            Self::ConsecutivePasses { count } => {
                let needed = count.max(1) as usize;
                history.len() >= needed
                    && history
                        .iter()
                        .rev()
                        .take(needed)
                        .all(ResponseRecord::all_passed)
            }
        }
    }
}

/// Scenario file as written on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioDefinition {
    /// Scenario identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Prompts by phase.
    pub prompts: Vec<PromptDefinition>,
    /// Validation rules.
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
    /// Success criterion.
    #[serde(default)]
    pub success: SuccessCriteria,
}

#[derive(Debug)]
enum CompiledCheck {
    MustMatch(Regex),
    MustNotMatch(Regex),
    MaxLength(usize),
}

#[derive(Debug)]
struct CompiledRule {
    name: String,
    prompt_ids: Vec<String>,
    check: CompiledCheck,
}

impl CompiledRule {
    fn compile(scenario_id: &str, def: RuleDefinition) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|err| {
                AppError::Scenario(format!(
                    "scenario '{scenario_id}' rule '{}': invalid pattern: {err}",
                    def.name
                ))
            })
        };
        let check = match &def.check {
            RuleCheck::MustMatch { pattern } => CompiledCheck::MustMatch(compile(pattern)?),
            RuleCheck::MustNotMatch { pattern } => CompiledCheck::MustNotMatch(compile(pattern)?),
            RuleCheck::MaxLength { max } => CompiledCheck::MaxLength(*max),
        };
        Ok(Self {
            name: def.name,
            prompt_ids: def.prompt_ids,
            check,
        })
    }

    fn applies_to(&self, prompt_id: &str) -> bool {
        self.prompt_ids.is_empty() || self.prompt_ids.iter().any(|id| id == prompt_id)
    }

    fn check(&self, response: &str) -> ValidationResult {
        match &self.check {
            CompiledCheck::MustMatch(re) if re.is_match(response) => {
                ValidationResult::pass(&self.name)
            }
            CompiledCheck::MustMatch(re) => {
                ValidationResult::fail(&self.name, format!("expected match for /{re}/"))
            }
            CompiledCheck::MustNotMatch(re) if re.is_match(response) => {
                ValidationResult::fail(&self.name, format!("unexpected match for /{re}/"))
            }
            CompiledCheck::MustNotMatch(_) => ValidationResult::pass(&self.name),
            CompiledCheck::MaxLength(max) => {
                let len = response.chars().count();
                if len <= *max {
                    ValidationResult::pass(&self.name)
                } else {
                    ValidationResult::fail(&self.name, format!("{len} chars exceeds {max}"))
                }
            }
        }
    }
}

#[derive(Debug)]
struct CatalogEntry {
    scenario: Scenario,
    prompts: Vec<Prompt>,
    rules: Vec<CompiledRule>,
    success: SuccessCriteria,
}

impl CatalogEntry {
    fn compile(def: ScenarioDefinition) -> Result<Self> {
        if def.id.trim().is_empty() {
            return Err(AppError::Scenario("scenario id must not be empty".into()));
        }
        if !def.prompts.iter().any(|p| p.phase == PromptPhase::Initial) {
            return Err(AppError::Scenario(format!(
                "scenario '{}' has no initial prompt",
                def.id
            )));
        }

        let rules = def
            .rules
            .into_iter()
            .map(|rule| CompiledRule::compile(&def.id, rule))
            .collect::<Result<Vec<_>>>()?;
        let prompts = def
            .prompts
            .into_iter()
            .map(|p| Prompt {
                id: p.id,
                phase: p.phase,
                content: p.content,
            })
            .collect();

        Ok(Self {
            scenario: Scenario {
                id: def.id,
                name: def.name,
                description: def.description,
            },
            prompts,
            rules,
            success: def.success,
        })
    }

    fn prompt_for(&self, phase: PromptPhase) -> Option<&Prompt> {
        self.prompts
            .iter()
            .find(|p| p.phase == phase)
            .or_else(|| self.prompts.iter().find(|p| p.phase == PromptPhase::Initial))
    }
}

/// In-memory catalog of compiled scenarios.
pub struct ScenarioCatalog {
    entries: HashMap<String, CatalogEntry>,
    sink: Option<Arc<dyn ResultSink>>,
}

impl ScenarioCatalog {
    /// Build a catalog from parsed definitions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Scenario` for duplicate ids, missing initial
    /// prompts, or invalid rule patterns.
    pub fn from_definitions(definitions: Vec<ScenarioDefinition>) -> Result<Self> {
        let mut entries = HashMap::with_capacity(definitions.len());
        for def in definitions {
            let entry = CatalogEntry::compile(def)?;
            let id = entry.scenario.id.clone();
            if entries.contains_key(&id) {
                return Err(AppError::Scenario(format!("duplicate scenario id '{id}'")));
            }
            entries.insert(id, entry);
        }
        Ok(Self {
            entries,
            sink: None,
        })
    }

    /// Parse a single scenario document.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Scenario` if the TOML is invalid.
    pub fn parse_definition(raw: &str) -> Result<ScenarioDefinition> {
        toml::from_str(raw).map_err(|err| AppError::Scenario(format!("invalid scenario: {err}")))
    }

    /// Load every `*.toml` file in `dir`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Scenario` if the directory pattern is invalid or
    /// any file fails to parse or compile, and `AppError::Io` if a file
    /// cannot be read.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let pattern = dir.join("*.toml");
        let pattern = pattern.to_string_lossy();
        let paths = glob::glob(&pattern)
            .map_err(|err| AppError::Scenario(format!("invalid scenario dir pattern: {err}")))?;

        let mut files = paths
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|err| AppError::Io(format!("failed to read scenario dir: {err}")))?;
        files.sort();

        let mut definitions = Vec::with_capacity(files.len());
        for path in files {
            let raw = fs::read_to_string(&path)?;
            let def = Self::parse_definition(&raw).map_err(|err| {
                AppError::Scenario(format!("{}: {err}", path.display()))
            })?;
            debug!(path = %path.display(), scenario_id = def.id, "scenario file parsed");
            definitions.push(def);
        }

        let catalog = Self::from_definitions(definitions)?;
        info!(dir = %dir.display(), count = catalog.len(), "scenario catalog loaded");
        Ok(catalog)
    }

    /// Forward terminal results to `sink`.
    #[must_use]
    pub fn with_result_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sorted scenario identifiers.
    #[must_use]
    pub fn scenario_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of scenarios in the catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog holds no scenarios.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, scenario_id: &str) -> Result<&CatalogEntry> {
        self.entries
            .get(scenario_id)
            .ok_or_else(|| AppError::ScenarioNotFound(scenario_id.to_owned()))
    }
}

impl ScenarioProvider for ScenarioCatalog {
    fn resolve(
        &self,
        scenario_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Scenario>>> + Send + '_>> {
        let found = self.entries.get(scenario_id).map(|e| e.scenario.clone());
        Box::pin(async move { Ok(found) })
    }

    fn next_prompt(
        &self,
        scenario_id: &str,
        phase: PromptPhase,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Prompt>>> + Send + '_>> {
        let prompt = self
            .entry(scenario_id)
            .map(|entry| entry.prompt_for(phase).cloned());
        Box::pin(async move { prompt })
    }

    fn validate(
        &self,
        scenario_id: &str,
        prompt_id: &str,
        response: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ValidationResult>>> + Send + '_>> {
        let results = self.entry(scenario_id).map(|entry| {
            entry
                .rules
                .iter()
                .filter(|rule| rule.applies_to(prompt_id))
                .map(|rule| rule.check(response))
                .collect()
        });
        Box::pin(async move { results })
    }

    fn evaluate_success<'a>(
        &'a self,
        scenario_id: &'a str,
        history: &'a [ResponseRecord],
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            let entry = self.entry(scenario_id)?;
            Ok(entry.success.is_satisfied(history))
        })
    }

    fn record_result(
        &self,
        result: TrainingResult,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            match &self.sink {
                Some(sink) => sink.record(&result),
                None => {
                    warn!(
                        session_id = result.session_id,
                        "no result sink configured, result not persisted"
                    );
                    Ok(())
                }
            }
        })
    }
}
