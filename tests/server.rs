use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tempfile::{tempdir, TempDir};
use tower::ServiceExt;

use audio_studio_ai::{
    create_router, AppState, CloneRequest, Result, SeparationResult, ServiceConfig, ServiceError,
    StemSeparator, VoiceCloner,
};

const BOUNDARY: &str = "audio-studio-test-boundary";

#[derive(Default)]
struct FakeCloner {
    output: Vec<u8>,
    fail_with: Option<String>,
    seen: Mutex<Option<CloneRequest>>,
}

impl VoiceCloner for FakeCloner {
    fn languages(&self) -> Vec<String> {
        vec!["en".into()]
    }

    fn tts_to_file(&self, req: &CloneRequest) -> Result<PathBuf> {
        *self.seen.lock().unwrap() = Some(req.clone());
        if let Some(msg) = &self.fail_with {
            return Err(ServiceError::Inference(msg.clone()));
        }
        if !self.output.is_empty() {
            fs::write(&req.file_path, &self.output)?;
        }
        Ok(req.file_path.clone())
    }
}

struct FakeSeparator {
    stems: Vec<&'static str>,
    fail_with: Option<String>,
}

impl Default for FakeSeparator {
    fn default() -> Self {
        Self {
            stems: vec!["vocals", "accompaniment"],
            fail_with: None,
        }
    }
}

impl StemSeparator for FakeSeparator {
    fn stems(&self) -> Vec<String> {
        self.stems.iter().map(|s| s.to_string()).collect()
    }

    fn separate_to_file(&self, input: &Path, output_dir: &Path) -> Result<SeparationResult> {
        if let Some(msg) = &self.fail_with {
            return Err(ServiceError::Inference(msg.clone()));
        }
        let stem = input.file_stem().unwrap().to_string_lossy().to_string();
        let stem_dir = output_dir.join(stem);
        fs::create_dir_all(&stem_dir)?;
        let mut stems = Vec::new();
        for name in self.stems() {
            let p = stem_dir.join(format!("{name}.wav"));
            fs::write(&p, format!("{name}-bytes"))?;
            stems.push((name, p));
        }
        Ok(SeparationResult { stem_dir, stems })
    }
}

fn config(dir: &TempDir) -> ServiceConfig {
    let cfg = ServiceConfig::new(dir.path());
    cfg.layout.create_dirs().unwrap();
    cfg
}

fn ready_app(dir: &TempDir, cloner: Arc<FakeCloner>) -> Router {
    create_router(AppState::with_models(
        config(dir),
        cloner,
        Arc::new(FakeSeparator::default()),
    ))
}

fn multipart(fields: &[(&str, Option<&str>, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, file_name, data) in fields {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match file_name {
            Some(f) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(data.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn post(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::HOST, "studio.local:8000")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn home_reports_online() {
    let dir = tempdir().unwrap();
    let app = ready_app(&dir, Arc::new(FakeCloner::default()));
    let resp = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = json_body(resp).await;
    assert_eq!(v["status"], "online");
    assert_eq!(v["message"], "Audio.io AI Service Running");
}

#[tokio::test]
async fn clone_voice_while_loading_returns_error_object() {
    let dir = tempdir().unwrap();
    let app = create_router(AppState::new(config(&dir)));
    let body = multipart(&[("text", None, "hi"), ("audio_file", Some("v.wav"), "RIFF")]);

    let resp = app.oneshot(post("/clone-voice", body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = json_body(resp).await;
    assert_eq!(v["error"], "Model is still loading, please wait.");
}

#[tokio::test]
async fn clone_voice_returns_wav_attachment() {
    let dir = tempdir().unwrap();
    let cloner = Arc::new(FakeCloner {
        output: b"RIFF-generated".to_vec(),
        ..Default::default()
    });
    let app = ready_app(&dir, cloner.clone());
    let body = multipart(&[
        ("text", None, "Hello there. How are you?"),
        ("audio_file", Some("voice.wav"), "reference-bytes"),
    ]);

    let resp = app.oneshot(post("/clone-voice", body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "audio/wav");
    assert!(resp.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("filename=\"cloned_voice.wav\""));
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"RIFF-generated");

    let staged = dir.path().join("temp_uploads/voice.wav");
    assert_eq!(fs::read(&staged).unwrap(), b"reference-bytes");
    assert!(dir.path().join("generated_audio/output_voice.wav.wav").exists());

    let seen = cloner.seen.lock().unwrap().clone().unwrap();
    assert_eq!(seen.text, "Hello there. How are you?");
    assert_eq!(seen.language, "en");
    assert!(seen.split_sentences);
    assert!(seen.speaker_wav.is_absolute());
    assert_eq!(seen.speaker_wav, fs::canonicalize(&staged).unwrap());
}

#[tokio::test]
async fn clone_voice_language_field_overrides_default() {
    let dir = tempdir().unwrap();
    let cloner = Arc::new(FakeCloner {
        output: b"x".to_vec(),
        ..Default::default()
    });
    let app = ready_app(&dir, cloner.clone());
    let body = multipart(&[
        ("text", None, "Hola"),
        ("language", None, "es"),
        ("audio_file", Some("v.wav"), "ref"),
    ]);

    app.oneshot(post("/clone-voice", body)).await.unwrap();
    assert_eq!(cloner.seen.lock().unwrap().as_ref().unwrap().language, "es");
}

#[tokio::test]
async fn clone_voice_missing_text_is_an_error_object() {
    let dir = tempdir().unwrap();
    let app = ready_app(&dir, Arc::new(FakeCloner::default()));
    let body = multipart(&[("audio_file", Some("v.wav"), "ref")]);

    let v = json_body(app.oneshot(post("/clone-voice", body)).await.unwrap()).await;
    assert_eq!(v["error"], "Missing form field `text`");
}

#[tokio::test]
async fn clone_voice_without_output_reports_tts_failure() {
    let dir = tempdir().unwrap();
    let app = ready_app(&dir, Arc::new(FakeCloner::default()));
    let body = multipart(&[("text", None, "hi"), ("audio_file", Some("v.wav"), "ref")]);

    let v = json_body(app.oneshot(post("/clone-voice", body)).await.unwrap()).await;
    assert_eq!(v["error"], "TTS failed to create audio file");
}

#[tokio::test]
async fn clone_voice_engine_error_is_relayed() {
    let dir = tempdir().unwrap();
    let app = ready_app(
        &dir,
        Arc::new(FakeCloner {
            fail_with: Some("graph exploded".into()),
            ..Default::default()
        }),
    );
    let body = multipart(&[("text", None, "hi"), ("audio_file", Some("v.wav"), "ref")]);

    let v = json_body(app.oneshot(post("/clone-voice", body)).await.unwrap()).await;
    assert_eq!(v["error"], "Inference error: graph exploded");
}

#[tokio::test]
async fn non_multipart_request_is_an_error_object() {
    let dir = tempdir().unwrap();
    let app = ready_app(&dir, Arc::new(FakeCloner::default()));
    let req = Request::builder()
        .method("POST")
        .uri("/separate-vocals")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = json_body(resp).await;
    assert!(v["error"].as_str().unwrap().starts_with("Invalid multipart payload"));
}

#[tokio::test]
async fn separate_vocals_returns_stem_urls_and_serves_them() {
    let dir = tempdir().unwrap();
    let app = ready_app(&dir, Arc::new(FakeCloner::default()));
    let body = multipart(&[("audio_file", Some("song.mp3"), "mixture")]);

    let resp = app.clone().oneshot(post("/separate-vocals", body)).await.unwrap();
    let v = json_body(resp).await;
    assert_eq!(v["status"], "success");
    assert_eq!(
        v["vocals"],
        "http://studio.local:8000/generated_audio/stems/song/vocals.wav"
    );
    assert_eq!(
        v["music"],
        "http://studio.local:8000/generated_audio/stems/song/accompaniment.wav"
    );
    assert!(dir.path().join("temp_uploads/song.mp3").exists());

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/generated_audio/stems/song/vocals.wav")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"vocals-bytes");
}

#[tokio::test]
async fn separate_vocals_uses_configured_public_url() {
    let dir = tempdir().unwrap();
    let mut cfg = config(&dir);
    cfg.public_url = Some("https://cdn.example.com/".into());
    let app = create_router(AppState::with_models(
        cfg,
        Arc::new(FakeCloner::default()),
        Arc::new(FakeSeparator::default()),
    ));
    let body = multipart(&[("audio_file", Some("../mix.wav"), "mixture")]);

    let v = json_body(app.oneshot(post("/separate-vocals", body)).await.unwrap()).await;
    assert_eq!(
        v["vocals"],
        "https://cdn.example.com/generated_audio/stems/mix/vocals.wav"
    );
    assert!(dir.path().join("temp_uploads/mix.wav").exists());
}

#[tokio::test]
async fn separate_vocals_reports_load_failure() {
    let dir = tempdir().unwrap();
    let state = AppState::new(config(&dir));
    state.separator.set_failed("checksum mismatch");
    let app = create_router(state);
    let body = multipart(&[("audio_file", Some("song.wav"), "mixture")]);

    let v = json_body(app.oneshot(post("/separate-vocals", body)).await.unwrap()).await;
    assert_eq!(v["error"], "Model failed to load: checksum mismatch");
}

fn separator_app(dir: &TempDir, separator: FakeSeparator) -> Router {
    create_router(AppState::with_models(
        config(dir),
        Arc::new(FakeCloner::default()),
        Arc::new(separator),
    ))
}

#[tokio::test]
async fn separate_vocals_engine_error_is_relayed() {
    let dir = tempdir().unwrap();
    let app = separator_app(
        &dir,
        FakeSeparator {
            fail_with: Some("mask shape mismatch".into()),
            ..Default::default()
        },
    );
    let body = multipart(&[("audio_file", Some("song.wav"), "mixture")]);

    let resp = app.oneshot(post("/separate-vocals", body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = json_body(resp).await;
    assert_eq!(v["error"], "Inference error: mask shape mismatch");
    assert!(v.get("status").is_none());
}

#[tokio::test]
async fn separate_vocals_without_expected_stems_is_an_error_object() {
    let dir = tempdir().unwrap();
    let app = separator_app(
        &dir,
        FakeSeparator {
            stems: vec!["drums", "bass"],
            ..Default::default()
        },
    );
    let body = multipart(&[("audio_file", Some("song.wav"), "mixture")]);

    let v = json_body(app.oneshot(post("/separate-vocals", body)).await.unwrap()).await;
    assert_eq!(v["error"], "Separator did not produce a `vocals` stem");
    assert!(v.get("vocals").is_none());
}
