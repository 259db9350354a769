use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, Path, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use super::{HealthResponse, TtsResponse};
use crate::api::routes::AppState;
use crate::error::AppError;

/// Fields of a `POST /api/tts` form.
#[derive(Debug, Default)]
struct TtsForm {
    audio: Option<Vec<u8>>,
    text: Option<String>,
    language: Option<String>,
}

impl TtsForm {
    async fn read(mut multipart: Multipart, max_upload_bytes: usize) -> Result<Self, AppError> {
        let mut form = Self::default();
        let read_error = |context: String, e: MultipartError| {
            if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                AppError::PayloadTooLarge(format!(
                    "Upload too large (max {} bytes)",
                    max_upload_bytes
                ))
            } else {
                AppError::BadRequest(format!("{}: {}", context, e.body_text()))
            }
        };

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| read_error("Invalid multipart body".to_string(), e))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "audio" => {
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| read_error("Failed to read audio file".to_string(), e))?;
                    form.audio = Some(bytes.to_vec());
                }
                "text" | "language" => {
                    let value = field
                        .text()
                        .await
                        .map_err(|e| read_error(format!("Failed to read field '{}'", name), e))?;
                    if name == "text" {
                        form.text = Some(value);
                    } else {
                        form.language = Some(value);
                    }
                }
                other => tracing::debug!("Ignoring unknown form field '{}'", other),
            }
        }

        Ok(form)
    }
}

pub async fn generate_speech(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<TtsResponse>, AppError> {
    if !state.tts.is_loaded() {
        return Err(AppError::ModelNotLoaded);
    }

    let multipart =
        multipart.map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?;
    let form = TtsForm::read(multipart, state.max_upload_bytes).await?;

    // Validate input
    let audio = form
        .audio
        .filter(|audio| !audio.is_empty())
        .ok_or_else(|| AppError::BadRequest("No audio file provided".into()))?;

    let text = form.text.unwrap_or_default().trim().to_string();
    if text.is_empty() {
        return Err(AppError::BadRequest("No text provided".into()));
    }

    if text.chars().count() > state.max_text_chars {
        return Err(AppError::BadRequest(format!(
            "Text too long (max {} chars)",
            state.max_text_chars
        )));
    }

    let language = form
        .language
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| state.default_language.clone());

    // Save uploaded reference audio
    let job = state.store.new_job();
    state.store.save_reference(&job, &audio).await?;

    tracing::info!(
        "Generating speech for job {} ({}): {}...",
        job.id,
        language,
        text.chars().take(50).collect::<String>()
    );

    // Inference is CPU-bound; keep it off the async workers
    let worker_state = Arc::clone(&state);
    let worker_job = job.clone();
    tokio::task::spawn_blocking(move || {
        worker_state.tts.synthesize_to_file(
            &text,
            &worker_job.reference_path,
            &language,
            &worker_job.output_path,
        )
    })
    .await
    .map_err(|e| AppError::TtsError(format!("Synthesis task failed: {}", e)))??;

    tracing::info!("Speech generated for job {}", job.id);

    Ok(Json(TtsResponse {
        success: true,
        file_id: job.id.to_string(),
        message: "Speech generated successfully".to_string(),
    }))
}

pub async fn get_audio(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
) -> Result<Response, AppError> {
    let path = state
        .store
        .find_output(&file_id)
        .ok_or_else(|| AppError::NotFound("Audio file not found".into()))?;

    let wav = tokio::fs::read(&path).await?;

    Ok((StatusCode::OK, [(header::CONTENT_TYPE, "audio/wav")], wav).into_response())
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        model_loaded: state.tts.is_loaded(),
        model: state.tts.model_name().map(str::to_string),
        voice_cloning: state.tts.supports_cloning(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::create_router;
    use crate::storage::JobStore;
    use crate::tts::{testing, Speech, SynthesisRequest, Synthesizer, TtsService};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::sync::Mutex;
    use tower::ServiceExt;

    const BOUNDARY: &str = "voice-clone-test-boundary";

    enum Part<'a> {
        File(&'a str, &'a [u8]),
        Text(&'a str, &'a str),
    }

    fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match part {
                Part::File(name, data) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"ref.wav\"\r\nContent-Type: audio/wav\r\n\r\n",
                            name
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(data);
                }
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                            .as_bytes(),
                    );
                    body.extend_from_slice(value.as_bytes());
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn tts_request(parts: &[Part<'_>]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/tts")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    struct TestApp {
        _dir: tempfile::TempDir,
        router: axum::Router,
    }

    impl TestApp {
        fn new(tts: TtsService) -> Self {
            Self::with_upload_limit(tts, 1024 * 1024)
        }

        fn with_upload_limit(tts: TtsService, max_upload_bytes: usize) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store =
                JobStore::open(dir.path().join("uploads"), dir.path().join("outputs")).unwrap();
            let state = Arc::new(AppState {
                tts,
                store,
                default_language: "tr".to_string(),
                max_text_chars: 100,
                max_upload_bytes,
            });
            let router = create_router(state, dir.path().join("static"));
            Self { _dir: dir, router }
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let body = response.into_body().collect().await.unwrap().to_bytes();
            (status, body.to_vec())
        }

        async fn send_json(&self, request: Request<Body>) -> (StatusCode, Value) {
            let (status, body) = self.send(request).await;
            (status, serde_json::from_slice(&body).unwrap())
        }
    }

    /// Remembers the language of the last request.
    struct RecordingSynthesizer {
        language: Mutex<Option<String>>,
    }

    impl Synthesizer for RecordingSynthesizer {
        fn name(&self) -> &str {
            "recording"
        }

        fn supports_cloning(&self) -> bool {
            false
        }

        fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<Speech, AppError> {
            *self.language.lock().unwrap() = Some(request.language.to_string());
            Ok(Speech {
                samples: vec![0.0; 160],
                sample_rate: 16000,
            })
        }
    }

    #[tokio::test]
    async fn test_health_reports_loaded_model() {
        let app = TestApp::new(TtsService::with_model(testing::working()));
        let (status, body) = app.send_json(get("/api/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["model_loaded"], true);
        assert_eq!(body["model"], "fake");
        assert_eq!(body["voice_cloning"], true);
    }

    #[tokio::test]
    async fn test_health_reports_missing_model() {
        let app = TestApp::new(TtsService::unloaded());
        let (status, body) = app.send_json(get("/api/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["model_loaded"], false);
        assert!(body["model"].is_null());
    }

    #[tokio::test]
    async fn test_tts_without_model() {
        let app = TestApp::new(TtsService::unloaded());
        let (status, body) = app
            .send_json(tts_request(&[
                Part::File("audio", b"RIFF"),
                Part::Text("text", "Merhaba"),
            ]))
            .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "TTS model failed to load");
        assert_eq!(body["code"], "MODEL_NOT_LOADED");
    }

    #[tokio::test]
    async fn test_tts_missing_audio() {
        let app = TestApp::new(TtsService::with_model(testing::working()));
        let (status, body) = app
            .send_json(tts_request(&[Part::Text("text", "Merhaba")]))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No audio file provided");
    }

    #[tokio::test]
    async fn test_tts_empty_audio() {
        let app = TestApp::new(TtsService::with_model(testing::working()));
        let (status, body) = app
            .send_json(tts_request(&[
                Part::File("audio", b""),
                Part::Text("text", "Merhaba"),
            ]))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No audio file provided");
    }

    #[tokio::test]
    async fn test_tts_missing_text() {
        let app = TestApp::new(TtsService::with_model(testing::working()));

        let (status, body) = app
            .send_json(tts_request(&[Part::File("audio", b"RIFF")]))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No text provided");

        let (status, body) = app
            .send_json(tts_request(&[
                Part::File("audio", b"RIFF"),
                Part::Text("text", "   "),
            ]))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No text provided");
    }

    #[tokio::test]
    async fn test_tts_text_too_long() {
        let app = TestApp::new(TtsService::with_model(testing::working()));
        let text = "ş".repeat(101);
        let (status, body) = app
            .send_json(tts_request(&[
                Part::File("audio", b"RIFF"),
                Part::Text("text", &text),
            ]))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_tts_upload_too_large() {
        let app = TestApp::with_upload_limit(TtsService::with_model(testing::working()), 1024);
        let audio = vec![0u8; 4096];
        let (status, body) = app
            .send_json(tts_request(&[
                Part::Text("text", "Merhaba"),
                Part::File("audio", &audio),
            ]))
            .await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["code"], "PAYLOAD_TOO_LARGE");
        assert_eq!(body["error"], "Upload too large (max 1024 bytes)");
    }

    #[tokio::test]
    async fn test_tts_rejects_non_multipart() {
        let app = TestApp::new(TtsService::with_model(testing::working()));
        let request = Request::builder()
            .method("POST")
            .uri("/api/tts")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"text":"Merhaba"}"#))
            .unwrap();

        let (status, body) = app.send_json(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_tts_then_download() {
        let app = TestApp::new(TtsService::with_model(testing::working()));
        let (status, body) = app
            .send_json(tts_request(&[
                Part::File("audio", b"RIFF reference"),
                Part::Text("text", "Merhaba dünya"),
                Part::Text("language", "tr"),
            ]))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Speech generated successfully");
        let file_id = body["file_id"].as_str().unwrap().to_string();
        assert!(uuid::Uuid::parse_str(&file_id).is_ok());

        let (status, wav) = app.send(get(&format!("/api/audio/{}", file_id))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(wav.starts_with(b"RIFF"));

        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
    }

    #[tokio::test]
    async fn test_audio_content_type() {
        let app = TestApp::new(TtsService::with_model(testing::working()));
        let (_, body) = app
            .send_json(tts_request(&[
                Part::File("audio", b"RIFF"),
                Part::Text("text", "Merhaba"),
            ]))
            .await;
        let file_id = body["file_id"].as_str().unwrap().to_string();

        let response = app
            .router
            .clone()
            .oneshot(get(&format!("/api/audio/{}", file_id)))
            .await
            .unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/wav");
    }

    #[tokio::test]
    async fn test_language_defaults_to_turkish() {
        let synthesizer = Arc::new(RecordingSynthesizer {
            language: Mutex::new(None),
        });
        let app = TestApp::new(TtsService::with_model(synthesizer.clone()));

        let (status, _) = app
            .send_json(tts_request(&[
                Part::File("audio", b"RIFF"),
                Part::Text("text", "Merhaba"),
            ]))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(synthesizer.language.lock().unwrap().as_deref(), Some("tr"));

        let (status, _) = app
            .send_json(tts_request(&[
                Part::File("audio", b"RIFF"),
                Part::Text("text", "Hello"),
                Part::Text("language", "en"),
            ]))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(synthesizer.language.lock().unwrap().as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn test_tts_synthesis_failure() {
        let app = TestApp::new(TtsService::with_model(testing::failing(
            "Language 'xx' is not supported",
        )));
        let (status, body) = app
            .send_json(tts_request(&[
                Part::File("audio", b"RIFF"),
                Part::Text("text", "Merhaba"),
                Part::Text("language", "xx"),
            ]))
            .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Language 'xx' is not supported");
        assert_eq!(body["code"], "TTS_ERROR");
    }

    #[tokio::test]
    async fn test_unknown_audio() {
        let app = TestApp::new(TtsService::with_model(testing::working()));

        let (status, body) = app
            .send_json(get(&format!("/api/audio/{}", uuid::Uuid::new_v4())))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Audio file not found");

        let (status, _) = app.send_json(get("/api/audio/not-a-file-id")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_audio_only_served_under_issued_id() {
        let app = TestApp::new(TtsService::with_model(testing::working()));
        let (_, body) = app
            .send_json(tts_request(&[
                Part::File("audio", b"RIFF"),
                Part::Text("text", "Merhaba"),
            ]))
            .await;
        let file_id = uuid::Uuid::parse_str(body["file_id"].as_str().unwrap()).unwrap();

        let (status, _) = app
            .send(get(&format!("/api/audio/{}", file_id.simple())))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app.send(get(&format!("/api/audio/{}", file_id))).await;
        assert_eq!(status, StatusCode::OK);
    }
}
