pub mod determinant;
pub mod types;
pub mod validate;

pub use determinant::NextDeterminant;
pub use types::{
    Question, QuestionId, QuestionKind, QuestionOption, RespondentId, SelectionMode, Survey,
    SurveyId,
};

use crate::flow::FlowError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Load and schema-check all survey TOML files from the given directory.
/// Returns a map of survey_id -> Survey.
///
/// If the directory does not exist, returns an empty map (not an error).
/// If any file fails to parse or validate, returns an error listing all of them.
pub fn load_surveys(surveys_dir: &Path) -> anyhow::Result<HashMap<SurveyId, Survey>> {
    if !surveys_dir.exists() {
        tracing::debug!("surveys directory does not exist: {}", surveys_dir.display());
        return Ok(HashMap::new());
    }

    let mut surveys = HashMap::new();
    let mut all_errors = Vec::new();

    let entries = std::fs::read_dir(surveys_dir)
        .map_err(|e| anyhow::anyhow!("failed to read surveys directory: {e}"))?;

    let mut paths: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("toml"))
        .collect();
    paths.sort();

    for path in paths {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;

        let def: types::SurveyDefinitionToml = match toml::from_str(&content) {
            Ok(def) => def,
            Err(e) => {
                all_errors.push(format!("failed to parse {}: {e}", path.display()));
                continue;
            }
        };

        match validate::build_survey(&def) {
            Ok(survey) => {
                if surveys.contains_key(&survey.id) {
                    all_errors.push(format!(
                        "duplicate survey id {} in {}",
                        survey.id,
                        path.display()
                    ));
                } else {
                    tracing::info!(
                        "loaded survey {} '{}' from {}",
                        survey.id,
                        survey.title,
                        path.display()
                    );
                    surveys.insert(survey.id, survey);
                }
            }
            Err(errors) => {
                for e in errors {
                    all_errors.push(format!("{} ({})", e, path.display()));
                }
            }
        }
    }

    if !all_errors.is_empty() {
        anyhow::bail!("survey load errors:\n  {}", all_errors.join("\n  "));
    }

    Ok(surveys)
}

/// Read-only access to survey definitions.
///
/// Implementations hand out immutable snapshots; a structural edit must
/// publish a new `Arc<Survey>` rather than mutate one in place.
#[async_trait]
pub trait SurveyStore: Send + Sync {
    async fn load_survey(&self, survey_id: SurveyId) -> anyhow::Result<Option<Arc<Survey>>>;
}

/// In-memory survey store.
#[derive(Default)]
pub struct SurveyCatalog {
    surveys: RwLock<HashMap<SurveyId, Arc<Survey>>>,
}

impl SurveyCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_surveys(surveys: impl IntoIterator<Item = Survey>) -> Self {
        let catalog = Self::new();
        for survey in surveys {
            catalog.insert(survey);
        }
        catalog
    }

    /// Publish a survey snapshot, replacing any previous one with the same id.
    pub fn insert(&self, survey: Survey) -> Arc<Survey> {
        let snapshot = Arc::new(survey);
        self.surveys
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(snapshot.id, Arc::clone(&snapshot));
        snapshot
    }

    pub fn get(&self, survey_id: SurveyId) -> Option<Arc<Survey>> {
        self.surveys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&survey_id)
            .cloned()
    }

    pub fn ids(&self) -> Vec<SurveyId> {
        let mut ids: Vec<_> = self
            .surveys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Run the activation gate and publish the activated snapshot.
    /// The stored survey is left untouched when the gate refuses.
    pub fn activate(&self, survey_id: SurveyId) -> Result<Arc<Survey>, FlowError> {
        let current = self
            .get(survey_id)
            .ok_or(FlowError::SurveyNotFound(survey_id))?;
        let mut next = (*current).clone();
        next.activate()?;
        Ok(self.insert(next))
    }
}

#[async_trait]
impl SurveyStore for SurveyCatalog {
    async fn load_survey(&self, survey_id: SurveyId) -> anyhow::Result<Option<Arc<Survey>>> {
        Ok(self.get(survey_id))
    }
}
