//! Logical art critiques of user-supplied images.
//!
//! An image arrives as a URL or an upload, is normalized into a bounded JPEG
//! payload, and is sent with a fixed persona prompt to a vision-capable chat
//! model. The web form in [`server`] is a thin shell around [`pipeline::Critic`].

pub mod config;
pub mod critique;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod server;

use std::sync::Arc;

use config::Config;
use critique::{CritiqueRequestBuilder, CritiqueSettings, OpenAiChat};
use normalize::ImageNormalizer;
use pipeline::Critic;

/// Wires a [`Critic`] against the OpenAI-compatible endpoint in `config`.
pub fn critic_from_config(config: &Config) -> Critic {
    let settings = CritiqueSettings {
        api_key: config.api_key.clone(),
        model: config.model.clone(),
        max_tokens: config.max_tokens,
    };
    let backend = Arc::new(OpenAiChat::new(config.api_base.clone()));
    Critic::new(
        ImageNormalizer::new(config.url_mode),
        CritiqueRequestBuilder::new(settings, backend),
    )
}
