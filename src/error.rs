//! Error taxonomy for the critique pipeline.
//!
//! Every variant renders to a message that is safe to show to the user as-is.

/// The operator has not provided what a request needs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("OpenAI API key is not set. Please set OPENAI_API_KEY in your environment variables.")]
    MissingCredential,
}

/// Failures turning an image reference into a transport-ready payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizationError {
    #[error("no image data was provided")]
    EmptyInput,

    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("encoded image is {bytes} bytes, over the {limit} byte limit")]
    TooLarge { bytes: usize, limit: usize },

    #[error("could not fetch image: {0}")]
    Fetch(String),

    #[error("could not encode image: {0}")]
    Encode(String),
}

/// Failures talking to the chat-completion provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CritiqueError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("could not reach the model provider: {0}")]
    Transport(String),

    #[error("the model provider rejected the credential: {0}")]
    Authentication(String),

    #[error("the model provider is rate limiting requests: {0}")]
    RateLimited(String),

    #[error("the model provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response from the model provider: {0}")]
    MalformedResponse(String),
}

/// Anything that can go wrong between receiving an image and returning text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Normalization(#[from] NormalizationError),

    #[error(transparent)]
    Critique(#[from] CritiqueError),
}
