//! Message preprocessing pipeline.
//!
//! Preprocessor plugins transform the chat message list before it
//! reaches the model. Stages run in registration order; a failing stage
//! is logged and the list it received is forwarded unchanged to the
//! next stage.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use vcphub_types::VcpResult;

/// One transformation stage over the message list.
#[async_trait]
pub trait MessagePreprocessor: Send + Sync {
    fn name(&self) -> &str;
    async fn process(&self, messages: Vec<serde_json::Value>)
        -> VcpResult<Vec<serde_json::Value>>;
}

/// Ordered chain of preprocessors.
#[derive(Default)]
pub struct PreprocessPipeline {
    stages: Vec<Arc<dyn MessagePreprocessor>>,
}

impl PreprocessPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: Arc<dyn MessagePreprocessor>) {
        self.stages.push(stage);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order. Never fails: a stage error leaves its
    /// input untouched for the next stage.
    pub async fn run(&self, messages: Vec<serde_json::Value>) -> Vec<serde_json::Value> {
        run_stages(&self.stages, messages).await
    }
}

impl std::fmt::Debug for PreprocessPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreprocessPipeline")
            .field("stages", &self.stages.len())
            .finish()
    }
}

/// Shared driver used by the pipeline and the plugin runtime.
pub(crate) async fn run_stages(
    stages: &[Arc<dyn MessagePreprocessor>],
    mut messages: Vec<serde_json::Value>,
) -> Vec<serde_json::Value> {
    for stage in stages {
        match stage.process(messages.clone()).await {
            Ok(next) => messages = next,
            Err(e) => {
                warn!(
                    preprocessor = stage.name(),
                    error = %e,
                    "preprocessor failed; forwarding messages unchanged"
                );
            }
        }
    }
    messages
}
