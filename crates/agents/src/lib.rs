mod completion;

use std::sync::Arc;
use std::time::Instant;

use promptly_core::{
    classify, render, ClassificationResult, ConfidenceBand, Intent, PromptRecord,
    RenderedTemplate,
};
use promptly_observability::AppMetrics;
use promptly_storage::PromptRepository;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub use completion::{
    Completer, CompletionClient, CompletionConfig, CompletionError, HttpCompletionClient,
};

pub const DEFAULT_HISTORY_LIMIT: usize = 10;
pub const DEFAULT_OWNER: &str = "anonymous";

#[derive(Debug, Clone)]
pub struct PromptInput {
    pub text: String,
    pub owner_id: Option<String>,
}

/// A stored prompt together with the detection shown next to it.
#[derive(Debug, Clone, Serialize)]
pub struct PromptOutcome {
    pub record: PromptRecord,
    pub classification: ClassificationResult,
    pub display_name: &'static str,
    pub icon: &'static str,
    pub band: ConfidenceBand,
    pub confidence_percent: u8,
}

impl PromptOutcome {
    fn new(record: PromptRecord, classification: ClassificationResult) -> Self {
        Self {
            display_name: classification.intent.display_name(),
            icon: classification.intent.icon(),
            band: classification.band(),
            confidence_percent: classification.confidence_percent(),
            record,
            classification,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("prompt text is empty")]
    EmptyPrompt,

    #[error("prompt {0} not found")]
    RecordNotFound(String),

    #[error("completion endpoint is not configured")]
    CompletionUnavailable,

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// classify → render → persist, plus intent overrides and AI completions on
/// stored prompts.
pub struct PromptWorkflow<S, C>
where
    S: PromptRepository,
    C: CompletionClient,
{
    store: Arc<S>,
    completer: Arc<C>,
    metrics: Arc<AppMetrics>,
    history_limit: usize,
}

impl<S, C> Clone for PromptWorkflow<S, C>
where
    S: PromptRepository,
    C: CompletionClient,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            completer: self.completer.clone(),
            metrics: self.metrics.clone(),
            history_limit: self.history_limit,
        }
    }
}

impl<S, C> PromptWorkflow<S, C>
where
    S: PromptRepository,
    C: CompletionClient,
{
    pub fn new(store: Arc<S>, completer: Arc<C>, metrics: Arc<AppMetrics>) -> Self {
        Self {
            store,
            completer,
            metrics,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit.max(1);
        self
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub fn completion_enabled(&self) -> bool {
        self.completer.is_configured()
    }

    pub fn preview(&self, text: &str) -> (ClassificationResult, RenderedTemplate) {
        let classification = classify(text);
        let template = render(text, classification.intent);
        (classification, template)
    }

    #[instrument(skip(self, input))]
    pub async fn submit(&self, input: PromptInput) -> Result<PromptOutcome, WorkflowError> {
        let started = Instant::now();
        if input.text.trim().is_empty() {
            return Err(WorkflowError::EmptyPrompt);
        }

        let owner_id = resolve_owner(input.owner_id.as_deref());
        let (classification, template) = self.preview(&input.text);
        let record = PromptRecord::new(Uuid::new_v4().to_string(), owner_id, &input.text, template);

        self.store.upsert_prompt(&record).await?;
        let pruned = self
            .store
            .prune_owner(&record.owner_id, self.history_limit)
            .await?;

        self.metrics.inc_prompt();
        if classification.is_fallback() {
            self.metrics.inc_fallback();
        }
        self.metrics.observe_latency(started.elapsed());

        info!(
            record_id = %record.id,
            owner_id = %record.owner_id,
            intent = %classification.intent,
            confidence = classification.confidence,
            keywords = classification.matched_keywords.len(),
            pruned,
            "prompt structured"
        );

        Ok(PromptOutcome::new(record, classification))
    }

    #[instrument(skip(self))]
    pub async fn override_intent(
        &self,
        record_id: &str,
        intent: Intent,
    ) -> Result<PromptOutcome, WorkflowError> {
        let mut record = self.load(record_id).await?;
        let detected = classify(&record.plain_text);
        let previous = record.intent;

        record.apply_template(render(&record.plain_text, intent));
        self.store.upsert_prompt(&record).await?;
        self.metrics.inc_override();

        info!(
            record_id = %record.id,
            from = %previous,
            to = %intent,
            "prompt intent overridden"
        );

        Ok(PromptOutcome::new(record, detected.with_intent(intent)))
    }

    /// Reloads a stored prompt with fresh detection. The headline intent is the
    /// one the stored template was rendered with.
    pub async fn recall(&self, record_id: &str) -> Result<PromptOutcome, WorkflowError> {
        let record = self.load(record_id).await?;
        let classification = classify(&record.plain_text).with_intent(record.intent);
        Ok(PromptOutcome::new(record, classification))
    }

    pub async fn history(
        &self,
        owner_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PromptRecord>, WorkflowError> {
        let owner_id = resolve_owner(owner_id);
        let limit = limit.clamp(1, self.history_limit);
        Ok(self.store.recent_prompts(&owner_id, limit).await?)
    }

    #[instrument(skip(self))]
    pub async fn generate_completion(&self, record_id: &str) -> Result<PromptRecord, WorkflowError> {
        let mut record = self.load(record_id).await?;
        if !self.completer.is_configured() {
            return Err(WorkflowError::CompletionUnavailable);
        }

        let response = match self.completer.complete(&record.markup).await {
            Ok(response) => response,
            Err(err) => {
                self.metrics.inc_completion_failure();
                warn!(record_id = %record.id, error = %err, "completion failed");
                return Err(err.into());
            }
        };

        record.ai_response = Some(response);
        self.store.upsert_prompt(&record).await?;
        self.metrics.inc_completion();

        info!(
            record_id = %record.id,
            intent = %record.intent,
            "completion stored"
        );

        Ok(record)
    }

    async fn load(&self, record_id: &str) -> Result<PromptRecord, WorkflowError> {
        self.store
            .load_prompt(record_id)
            .await?
            .ok_or_else(|| WorkflowError::RecordNotFound(record_id.to_string()))
    }
}

/// Trimmed owner id, or [`DEFAULT_OWNER`] when it is missing or blank.
pub fn resolve_owner(owner_id: Option<&str>) -> String {
    owner_id
        .map(str::trim)
        .filter(|owner| !owner.is_empty())
        .unwrap_or(DEFAULT_OWNER)
        .to_string()
}
