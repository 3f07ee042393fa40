//! One submission, start to finish: normalize the image, then ask for a critique.

use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::critique::{CritiqueRequestBuilder, SPOCK_PERSONA};
use crate::error::PipelineError;
use crate::normalize::{ImageNormalizer, ImageReference, NormalizedImagePayload};

/// What the page shows for a submission.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CritiqueResult {
    Text(String),
    Failure(String),
}

impl From<Result<String, PipelineError>> for CritiqueResult {
    fn from(result: Result<String, PipelineError>) -> Self {
        match result {
            Ok(text) => CritiqueResult::Text(text),
            Err(e) => CritiqueResult::Failure(e.to_string()),
        }
    }
}

pub struct Critic {
    normalizer: ImageNormalizer,
    builder: CritiqueRequestBuilder,
    persona: String,
}

impl Critic {
    pub fn new(normalizer: ImageNormalizer, builder: CritiqueRequestBuilder) -> Self {
        Self {
            normalizer,
            builder,
            persona: SPOCK_PERSONA.to_string(),
        }
    }

    pub async fn run(&self, reference: ImageReference) -> Result<String, PipelineError> {
        let kind = reference.kind();
        let start = Instant::now();

        let payload = self.normalizer.normalize(reference).await?;
        let encoded = match &payload {
            NormalizedImagePayload::RemoteUrl(_) => 0,
            NormalizedImagePayload::InlineData { data, .. } => data.len(),
        };
        info!(kind, encoded, "image ready for critique");

        let text = self.builder.critique(&payload, &self.persona).await?;
        info!(
            kind,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "critique complete"
        );
        Ok(text)
    }

    /// Like [`Critic::run`], but every failure becomes a displayable message.
    pub async fn critique_image(&self, reference: ImageReference) -> CritiqueResult {
        let result = self.run(reference).await;
        if let Err(e) = &result {
            warn!(error = %e, "critique failed");
        }
        result.into()
    }
}
