//! The web form: one page, one submit route.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{Html, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::normalize::{ImageReference, MAX_DOWNLOAD_BYTES};
use crate::pipeline::{Critic, CritiqueResult};

pub const BODY_LIMIT: usize = MAX_DOWNLOAD_BYTES;

struct AppState {
    critic: Critic,
}

#[derive(Serialize, Debug)]
pub struct CritiqueResponse {
    pub result: CritiqueResult,
    /// Set for URL submissions so the page can show the image again.
    pub image_url: Option<String>,
    pub processing_time_ms: u128,
}

type Rejection = (StatusCode, Json<CritiqueResponse>);

fn reject(status: StatusCode, message: impl Into<String>) -> Rejection {
    (
        status,
        Json(CritiqueResponse {
            result: CritiqueResult::Failure(message.into()),
            image_url: None,
            processing_time_ms: 0,
        }),
    )
}

pub fn router(critic: Critic) -> Router {
    let state = Arc::new(AppState { critic });
    Router::new()
        .route("/", get(index))
        .route("/critique", post(critique))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Default)]
struct Submission {
    url: Option<String>,
    upload: Option<(String, Vec<u8>)>,
}

impl Submission {
    async fn read(multipart: &mut Multipart) -> Result<Self, Rejection> {
        let mut submission = Submission::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| reject(StatusCode::BAD_REQUEST, e.body_text()))?
        {
            let name = field.name().map(str::to_string);
            match name.as_deref() {
                Some("url") => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| reject(StatusCode::BAD_REQUEST, e.body_text()))?;
                    let text = text.trim();
                    if !text.is_empty() {
                        submission.url = Some(text.to_string());
                    }
                }
                Some("file") => {
                    let file_name = field.file_name().unwrap_or_default().to_string();
                    let data = field
                        .bytes()
                        .await
                        .map_err(|e| reject(StatusCode::BAD_REQUEST, e.body_text()))?;
                    if !data.is_empty() {
                        submission.upload = Some((file_name, data.to_vec()));
                    }
                }
                other => debug!(field = ?other, "ignoring form field"),
            }
        }
        Ok(submission)
    }

    /// Uploads win over URLs when both are supplied.
    fn into_reference(
        self,
    ) -> Result<Option<(ImageReference, Option<String>)>, CritiqueResult> {
        match (self.upload, self.url) {
            (Some((name, data)), _) => ImageReference::from_upload(&name, data)
                .map(|r| Some((r, None)))
                .map_err(|e| CritiqueResult::Failure(e.to_string())),
            (None, Some(url)) => Ok(Some((ImageReference::Url(url.clone()), Some(url)))),
            (None, None) => Ok(None),
        }
    }
}

async fn critique(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<CritiqueResponse>, Rejection> {
    let start = std::time::Instant::now();

    let submission = Submission::read(&mut multipart).await?;
    let (result, image_url) = match submission.into_reference() {
        Ok(Some((reference, image_url))) => {
            (state.critic.critique_image(reference).await, image_url)
        }
        Ok(None) => {
            return Err(reject(
                StatusCode::BAD_REQUEST,
                "Enter an image URL or upload a .jpg, .jpeg or .png file.",
            ))
        }
        Err(failure) => (failure, None),
    };

    Ok(Json(CritiqueResponse {
        result,
        image_url,
        processing_time_ms: start.elapsed().as_millis(),
    }))
}

async fn index() -> Html<&'static str> {
    Html(
        r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Spock Art Critique</title>
    <style>
        .spinner {
            border: 4px solid #f3f3f3;
            border-top: 4px solid #667eea;
            border-radius: 50%;
            width: 40px;
            height: 40px;
            animation: spin 1s linear infinite;
        }

        @keyframes spin {
            0% { transform: rotate(0deg); }
            100% { transform: rotate(360deg); }
        }
    </style>
</head>
<body>
    <h1>Spock Art Critique</h1>
    <p>Share an image URL or upload an image and a logical critique will appear below.</p>

    <form id="inputForm">
        <label>Image URL<br><textarea name="url" rows="2" cols="60"></textarea></label><br>
        <label>Or upload an image file <input type="file" name="file" accept=".jpg,.jpeg,.png"></label><br>
        <button type="submit" id="submitButton">Submit</button>
    </form>

    <div id="loading" hidden>
        <div class="spinner"></div>
        <p>Analyzing...</p>
    </div>

    <p id="error" hidden></p>

    <div id="result" hidden>
        <img id="previewImage" alt="Submitted image" style="max-width: 480px">
        <pre id="critiqueText" style="white-space: pre-wrap"></pre>
    </div>

    <script>
        const form = document.getElementById('inputForm');
        const submitButton = document.getElementById('submitButton');
        const loading = document.getElementById('loading');
        const errorText = document.getElementById('error');
        const result = document.getElementById('result');
        const previewImage = document.getElementById('previewImage');
        const critiqueText = document.getElementById('critiqueText');

        form.addEventListener('submit', async (e) => {
            e.preventDefault();
            const formData = new FormData(form);
            const file = formData.get('file');

            submitButton.disabled = true;
            loading.hidden = false;
            result.hidden = true;
            errorText.hidden = true;

            try {
                const response = await fetch('/critique', { method: 'POST', body: formData });
                const body = await response.json();

                if (body.result.text !== undefined) {
                    if (body.image_url) {
                        previewImage.src = body.image_url;
                    } else if (file && file.size > 0) {
                        previewImage.src = URL.createObjectURL(file);
                    }
                    critiqueText.textContent = body.result.text;
                    result.hidden = false;
                } else {
                    errorText.textContent = 'Error: ' + body.result.failure;
                    errorText.hidden = false;
                }
            } catch (error) {
                errorText.textContent = 'Error: ' + error.message;
                errorText.hidden = false;
            } finally {
                loading.hidden = true;
                submitButton.disabled = false;
            }
        });
    </script>
</body>
</html>
        "#,
    )
}
