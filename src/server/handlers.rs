// HTTP request handlers

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;

use super::DigitServer;
use crate::data;
use crate::models::{device_label, format_param_count, get_device, MnistClassifier};
use crate::training::{epoch_progress, train_classifier, TrainingParams, TrainingReport};

/// Create the main application router
pub fn create_router(server: Arc<DigitServer>) -> Router {
    // Body limit sits above the upload cap so oversized uploads reach the
    // handler and get the documented 400 instead of a framework 413.
    let body_limit = server.config().max_upload_bytes * 2 + 1024;

    Router::new()
        .route("/", get(index))
        .route("/model-status", get(model_status))
        .route("/predict-digit", post(predict_digit))
        .route("/random-test-image", get(random_test_image))
        .route("/train-mnist", post(train_mnist))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(server)
}

/// Handle GET / - the classifier UI
async fn index() -> Html<&'static str> {
    Html(include_str!("../../assets/index.html"))
}

/// Model half of the status response
#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub status: &'static str,
    pub accuracy: f64,
    pub parameters: String,
    pub device: String,
}

/// Response body for GET /model-status
#[derive(Debug, Serialize)]
pub struct ModelStatusResponse {
    pub model: ModelInfo,
    pub training: TrainingReport,
}

/// Handle GET /model-status - model metadata plus a training snapshot
async fn model_status(State(server): State<Arc<DigitServer>>) -> Json<ModelStatusResponse> {
    let model = {
        let classifier = server.classifier().read().await;
        ModelInfo {
            status: if classifier.is_trained() {
                "trained"
            } else {
                "not_trained"
            },
            accuracy: classifier.test_accuracy(),
            parameters: format_param_count(classifier.parameter_count()),
            device: device_label(classifier.device()).to_string(),
        }
    };

    Json(ModelStatusResponse {
        model,
        training: server.orchestrator().snapshot(),
    })
}

/// One entry of the top-3 ranking
#[derive(Debug, Serialize)]
pub struct TopPrediction {
    pub digit: u8,
    pub probability: f32,
}

/// Response body for POST /predict-digit
#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub digit: u8,
    pub confidence: f32,
    pub inference_time_ms: f64,
    pub top_predictions: Vec<TopPrediction>,
    pub all_probabilities: Vec<f32>,
}

/// Handle POST /predict-digit - one-shot inference on an uploaded image
async fn predict_digit(
    State(server): State<Arc<DigitServer>>,
    mut multipart: Multipart,
) -> Result<Json<PredictResponse>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {e}")))?
    {
        if field.name() == Some("image") {
            let filename = field.file_name().unwrap_or_default().to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("Failed to read image field: {e}")))?;
            upload = Some((filename, bytes));
            break;
        }
    }

    let (filename, bytes) = upload.ok_or_else(|| ApiError::bad_request("No image provided"))?;
    if filename.is_empty() {
        return Err(ApiError::bad_request("No selected file"));
    }
    if bytes.len() > server.config().max_upload_bytes {
        return Err(ApiError::bad_request("File too large (max 5MB)"));
    }

    let gray = data::decode_image(&bytes).map_err(|_| ApiError::bad_request("Invalid image file"))?;

    let classifier = server.classifier().read().await;
    let start = Instant::now();
    let input = data::to_tensor(&gray, classifier.device())?;
    let prediction = classifier.predict(&input)?;
    let inference_time_ms = start.elapsed().as_secs_f64() * 1000.0;

    let probabilities = prediction.probabilities;
    let confidence = probabilities.iter().copied().fold(0f32, f32::max);

    // Stable descending sort: equal probabilities keep ascending-digit order.
    let mut ranked: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    let top_predictions = ranked
        .iter()
        .take(3)
        .map(|&(digit, probability)| TopPrediction {
            digit: digit as u8,
            probability,
        })
        .collect();

    tracing::info!(
        digit = prediction.digit,
        confidence,
        inference_time_ms,
        "Classified upload"
    );

    Ok(Json(PredictResponse {
        digit: prediction.digit,
        confidence,
        inference_time_ms,
        top_predictions,
        all_probabilities: probabilities,
    }))
}

/// Response body for GET /random-test-image
#[derive(Debug, Serialize)]
pub struct RandomImageResponse {
    /// Base64-encoded PNG
    pub image: String,
    pub label: u8,
}

/// Handle GET /random-test-image - one held-out sample with its label
async fn random_test_image(
    State(server): State<Arc<DigitServer>>,
) -> Result<Json<RandomImageResponse>, ApiError> {
    let test_set = server.test_set().await?;
    let sample = test_set.random_sample()?;

    Ok(Json(RandomImageResponse {
        image: sample.png_base64,
        label: sample.label,
    }))
}

/// Request body for POST /train-mnist
#[derive(Debug, Default, Deserialize)]
pub struct TrainRequest {
    #[serde(default)]
    pub epochs: Option<usize>,
    #[serde(default)]
    pub learning_rate: Option<f64>,
}

/// Response body for POST /train-mnist
#[derive(Debug, Serialize)]
pub struct TrainResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub epochs: usize,
    pub learning_rate: f64,
}

/// Handle POST /train-mnist - start one background training run
async fn train_mnist(
    State(server): State<Arc<DigitServer>>,
    body: Bytes,
) -> Result<Json<TrainResponse>, ApiError> {
    let request: TrainRequest = if body.is_empty() {
        TrainRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {e}")))?
    };

    let params = TrainingParams::resolve(
        request.epochs,
        request.learning_rate,
        &server.config().training,
    );

    server
        .orchestrator()
        .try_start()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    tracing::info!(
        epochs = params.epochs,
        learning_rate = params.learning_rate,
        "Starting background training run"
    );
    spawn_training(Arc::clone(&server), params);

    Ok(Json(TrainResponse {
        status: "training_started",
        message: "Training started in background",
        epochs: params.epochs,
        learning_rate: params.learning_rate,
    }))
}

/// Spawn the background training task plus its supervisor. This is the one
/// place in the service that backgrounds work; the caller must already hold
/// the orchestrator's run slot.
fn spawn_training(server: Arc<DigitServer>, params: TrainingParams) {
    let worker = Arc::clone(&server);
    let join = tokio::task::spawn_blocking(move || run_training(&worker, params));

    let orchestrator = Arc::clone(server.orchestrator());
    let supervisor = tokio::spawn(async move {
        match join.await {
            Ok(Ok(accuracy)) => {
                tracing::info!(test_accuracy = accuracy, "Training run finished");
            }
            Ok(Err(e)) => {
                // Already recorded in the status record by run_training.
                tracing::error!(error = %e, "Training run failed");
            }
            Err(e) => {
                tracing::error!(error = %e, "Training task aborted");
                orchestrator.fail(format!("Training task aborted: {e}"));
            }
        }
    });
    server.orchestrator().supervise(supervisor);
}

/// Blocking body of a training run: load data, train a fresh model, persist
/// it, swap it into the served handle. Records the outcome in the status
/// record on both paths and releases the run slot there.
fn run_training(server: &Arc<DigitServer>, params: TrainingParams) -> anyhow::Result<f64> {
    let result = train_and_swap(server, params);
    let orchestrator = server.orchestrator();
    match &result {
        Ok(accuracy) => orchestrator.complete(
            format!("Training completed! Test accuracy: {accuracy:.2}%"),
            HashMap::from([("test_accuracy".to_string(), *accuracy)]),
        ),
        Err(e) => orchestrator.fail(format!("Training failed: {e}")),
    }
    result
}

fn train_and_swap(server: &Arc<DigitServer>, params: TrainingParams) -> anyhow::Result<f64> {
    let orchestrator = server.orchestrator();
    orchestrator.update(5, "Loading and preparing data...", HashMap::new());

    let dataset = data::load_mnist(&server.config().data_dir)?;
    let mut model = MnistClassifier::new(get_device()?)?;

    let summary = train_classifier(&mut model, &dataset, &params, |epoch, total, metrics| {
        orchestrator.update(
            epoch_progress(epoch, total),
            format!("Epoch {}/{}", epoch + 1, total),
            HashMap::from([
                ("epoch".to_string(), metrics.epoch as f64),
                ("train_loss".to_string(), metrics.train_loss),
                ("test_accuracy".to_string(), metrics.test_accuracy),
            ]),
        );
    })?;

    server.checkpoints().save_after_training(&model)?;
    *server.classifier().blocking_write() = model;

    Ok(summary.test_accuracy)
}

/// Application error with an HTTP status, rendered as `{"error": "..."}`.
pub enum ApiError {
    /// Client input problem, 400
    BadRequest(String),
    /// Everything else, 500
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Internal(error) => {
                tracing::error!(error = ?error, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Internal(err.into())
    }
}
