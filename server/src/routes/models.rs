//! Model management, training and inference endpoints

use std::collections::BTreeMap;
use std::path::PathBuf;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use backbone_hub::inference::{evaluate, predict_directory, Evaluation, Prediction};
use backbone_hub::training::{
    JsonLinesTracker, MetricLog, DEFAULT_BATCH_SIZE, DEFAULT_EPOCHS, DEFAULT_LEARNING_RATE,
    DEFAULT_VALIDATION_FRACTION,
};
use backbone_hub::{
    BackboneKind, DatasetSplit, DeviceKind, HubError, ModelState, ModelSummary, OptimizerKind,
    SplitConfig, TrainingConfig, TrainingReport, TrainingSession,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{blocking, ApiError, ApiResult, StatusMessage};
use crate::state::SharedState;

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AddModelRequest {
    pub name: String,
    pub backbone_type: String,
    #[serde(default = "default_device")]
    pub device: String,
}

fn default_device() -> String {
    "cpu".to_string()
}

#[derive(Debug, Serialize)]
pub struct AddModelResponse {
    pub status: &'static str,
    pub message: String,
    pub model: ModelSummary,
}

#[derive(Debug, Serialize)]
pub struct ListModelsResponse {
    pub models: Vec<ModelSummary>,
    pub count: usize,
    pub capacity: usize,
}

#[derive(Debug, Deserialize)]
pub struct TrainRequest {
    pub model_name: String,
    pub dataset_path: PathBuf,
    #[serde(default = "default_valid_part")]
    pub valid_part: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_optimizer")]
    pub optimizer_name: String,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default)]
    pub freeze_backbone: bool,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    pub project_name: Option<String>,
    pub experiment_name: Option<String>,
}

fn default_valid_part() -> f64 {
    DEFAULT_VALIDATION_FRACTION
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_optimizer() -> String {
    OptimizerKind::Adam.to_string()
}

fn default_learning_rate() -> f64 {
    DEFAULT_LEARNING_RATE
}

fn default_epochs() -> usize {
    DEFAULT_EPOCHS
}

impl TrainRequest {
    fn training_config(&self) -> Result<TrainingConfig, HubError> {
        let config = TrainingConfig {
            optimizer: self.optimizer_name.parse()?,
            learning_rate: self.learning_rate,
            freeze_backbone: self.freeze_backbone,
            batch_size: self.batch_size,
            epochs: self.epochs,
            validation_fraction: self.valid_part,
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Serialize)]
pub struct TrainResponse {
    pub status: &'static str,
    pub message: String,
    pub report: TrainingReport,
}

#[derive(Debug, Deserialize)]
pub struct TestQuery {
    pub name: String,
    pub dataset_path: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct TestResponse {
    pub status: &'static str,
    pub message: String,
    pub evaluation: Evaluation,
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub name: String,
    pub dataset_path: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub status: &'static str,
    /// File name to predicted label
    pub result: BTreeMap<String, String>,
    pub predictions: Vec<Prediction>,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub name: String,
    pub state: ModelState,
    pub last_record: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_accuracy: Option<f64>,
    pub metrics: MetricLog,
}

#[derive(Debug, Deserialize)]
pub struct CheckpointRequest {
    pub name: String,
    /// Defaults to the configured models directory
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct CheckpointResponse {
    pub status: &'static str,
    pub message: String,
    pub path: PathBuf,
    pub epoch: usize,
    pub accuracy: f64,
}

#[derive(Debug, Deserialize)]
pub struct NameQuery {
    pub name: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /models/list - Summaries of all registered models
pub async fn list_models(State(state): State<SharedState>) -> Json<ListModelsResponse> {
    let models = state.registry.list();
    Json(ListModelsResponse {
        count: models.len(),
        capacity: state.registry.capacity(),
        models,
    })
}

/// POST /models/add - Register a new backbone
pub async fn add_model(
    State(state): State<SharedState>,
    Json(request): Json<AddModelRequest>,
) -> ApiResult<(StatusCode, Json<AddModelResponse>)> {
    let kind: BackboneKind = request.backbone_type.parse()?;
    let device: DeviceKind = request.device.parse()?;

    let registry_state = state.clone();
    let name = request.name.clone();
    let summary = blocking(move || registry_state.registry.add(&name, kind, device)).await?;

    Ok((
        StatusCode::CREATED,
        Json(AddModelResponse {
            status: "OK",
            message: format!("Model {} added", summary.name),
            model: summary,
        }),
    ))
}

/// POST /models/train - Train a model on an image folder
pub async fn train_model(
    State(state): State<SharedState>,
    Json(request): Json<TrainRequest>,
) -> ApiResult<Json<TrainResponse>> {
    let config = request.training_config()?;
    let slot = state.registry.get(&request.model_name)?;
    let split_config = SplitConfig::new(config.validation_fraction, state.config.split_seed);
    let image_size = state.config.image_size;
    let tracker_root = state.tracker_root();

    let report = blocking(move || {
        let split = DatasetSplit::from_folder(&request.dataset_path, &split_config, image_size)?;

        let project = request
            .project_name
            .as_deref()
            .unwrap_or(&request.model_name);
        let mut tracker = tracker_root.and_then(|root| {
            match JsonLinesTracker::create(&root, project, request.experiment_name.as_deref()) {
                Ok(tracker) => Some(tracker),
                Err(e) => {
                    warn!("Tracking disabled for this run: {}", e);
                    None
                }
            }
        });

        slot.with_entry(|entry| {
            let mut session = TrainingSession::new(config);
            if let Some(tracker) = tracker.as_mut() {
                session = session.with_tracker(tracker);
            }
            session.run(entry, &split)
        })
    })
    .await?;

    Ok(Json(TrainResponse {
        status: "OK",
        message: format!("Best train score {}", report.last_record),
        report,
    }))
}

/// GET /models/test - Accuracy of a model on a labeled folder
pub async fn test_model(
    State(state): State<SharedState>,
    Query(query): Query<TestQuery>,
) -> ApiResult<Json<TestResponse>> {
    let slot = state.registry.get(&query.name)?;
    let image_size = state.config.image_size;
    let batch_size = state.config.predict_batch_size;

    let evaluation = blocking(move || {
        slot.with_entry(|entry| evaluate(entry, &query.dataset_path, image_size, batch_size))
    })
    .await?;

    Ok(Json(TestResponse {
        status: "OK",
        message: format!("Test score {}", evaluation.accuracy),
        evaluation,
    }))
}

/// POST /models/predict - Predict labels for every image of a folder
pub async fn predict(
    State(state): State<SharedState>,
    Json(request): Json<PredictRequest>,
) -> ApiResult<Json<PredictResponse>> {
    let slot = state.registry.get(&request.name)?;
    let image_size = state.config.image_size;
    let batch_size = state.config.predict_batch_size;

    let predictions = blocking(move || {
        slot.with_entry(|entry| {
            predict_directory(entry, &request.dataset_path, image_size, batch_size)
        })
    })
    .await?;

    let result = predictions
        .iter()
        .map(|p| (p.file.clone(), p.label.clone()))
        .collect();

    Ok(Json(PredictResponse {
        status: "OK",
        result,
        predictions,
    }))
}

/// GET /models/:name/metrics - Per-phase metric log of the last run
pub async fn model_metrics(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> ApiResult<Json<MetricsResponse>> {
    let slot = state.registry.get(&name)?;

    let response = blocking(move || {
        Ok(slot.with_entry(|entry| MetricsResponse {
            name: entry.name.clone(),
            state: entry.state,
            last_record: entry.last_record,
            test_accuracy: entry.test_accuracy,
            metrics: entry.metrics.clone(),
        }))
    })
    .await?;

    Ok(Json(response))
}

/// POST /models/checkpoint - Write the best checkpoint to disk
pub async fn save_checkpoint(
    State(state): State<SharedState>,
    Json(request): Json<CheckpointRequest>,
) -> ApiResult<Json<CheckpointResponse>> {
    let slot = state.registry.get(&request.name)?;
    let dir = request
        .dir
        .unwrap_or_else(|| state.config.models_dir.clone());
    let name = request.name;

    let saved = blocking(move || {
        slot.with_entry(|entry| match entry.checkpoint.as_ref() {
            Some(checkpoint) => {
                let path = checkpoint.save(&dir, &entry.name)?;
                Ok(Some((path, checkpoint.epoch, checkpoint.accuracy)))
            }
            None => Ok(None),
        })
    })
    .await?;

    let Some((path, epoch, accuracy)) = saved else {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "no_checkpoint",
            format!("model '{}' has no checkpoint", name),
        ));
    };

    Ok(Json(CheckpointResponse {
        status: "OK",
        message: format!("Checkpoint of {} saved", name),
        path,
        epoch,
        accuracy,
    }))
}

/// DELETE /models/remove - Unregister a model
pub async fn remove_model(
    State(state): State<SharedState>,
    Query(query): Query<NameQuery>,
) -> ApiResult<Json<StatusMessage>> {
    state.registry.remove(&query.name)?;
    Ok(Json(StatusMessage::ok(format!(
        "Model {} removed",
        query.name
    ))))
}

#[cfg(test)]
mod tests {
    use std::path::Path as FsPath;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use axum::Router;
    use backbone_hub::HubConfig;
    use image::{Rgb, RgbImage};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::routes::router;
    use crate::state::AppState;

    fn app(capacity: usize, root: &FsPath) -> Router {
        let config = HubConfig {
            capacity,
            image_size: 32,
            predict_batch_size: 2,
            models_dir: root.join("models"),
            tracker_dir: root.join("runs"),
            ..HubConfig::default()
        };
        router(Arc::new(AppState::new(config)))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn add(app: &Router, name: &str) -> (StatusCode, Value) {
        send(
            app,
            Method::POST,
            "/models/add",
            Some(json!({"name": name, "backbone_type": "resnet18", "device": "cpu"})),
        )
        .await
    }

    fn write_images(dir: &FsPath, color: [u8; 3], count: usize) {
        std::fs::create_dir_all(dir).unwrap();
        for i in 0..count {
            RgbImage::from_pixel(8, 8, Rgb(color))
                .save(dir.join(format!("{:03}.png", i)))
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_health() {
        let tmp = TempDir::new().unwrap();
        let app = app(2, tmp.path());
        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["capacity"], 2);
        assert_eq!(body["tracking_enabled"], false);
    }

    #[tokio::test]
    async fn test_add_list_remove() {
        let tmp = TempDir::new().unwrap();
        let app = app(2, tmp.path());

        let (status, body) = add(&app, "pets").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["model"]["state"], "uninitialized");
        assert!(body["model"].get("num_classes").is_none());

        let (status, body) = add(&app, "pets").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["status"], "Failed");

        let (status, body) = send(&app, Method::GET, "/models/list", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["models"][0]["name"], "pets");
        assert_eq!(body["models"][0]["backbone_kind"], "resnet18");

        let (status, _) = send(&app, Method::DELETE, "/models/remove?name=pets", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, Method::DELETE, "/models/remove?name=pets", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_add_rejects_bad_requests() {
        let tmp = TempDir::new().unwrap();
        let app = app(1, tmp.path());

        let (status, _) = send(
            &app,
            Method::POST,
            "/models/add",
            Some(json!({"name": "m", "backbone_type": "vgg16", "device": "cpu"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            Method::POST,
            "/models/add",
            Some(json!({"name": "m", "backbone_type": "resnet18", "device": "gpu"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(add(&app, "first").await.0, StatusCode::CREATED);
        let (status, _) = add(&app, "second").await;
        assert_eq!(status, StatusCode::INSUFFICIENT_STORAGE);
    }

    #[tokio::test]
    async fn test_untrained_model_cannot_predict() {
        let tmp = TempDir::new().unwrap();
        let app = app(1, tmp.path());
        let inputs = tmp.path().join("inputs");
        write_images(&inputs, [10, 20, 30], 2);
        add(&app, "m").await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/models/predict",
            Some(json!({"name": "m", "dataset_path": inputs})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "not_initialized");

        let (status, _) = send(
            &app,
            Method::POST,
            "/models/checkpoint",
            Some(json!({"name": "m"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_train_rejects_unknown_optimizer() {
        let tmp = TempDir::new().unwrap();
        let app = app(1, tmp.path());
        add(&app, "m").await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/models/train",
            Some(json!({
                "model_name": "m",
                "dataset_path": tmp.path(),
                "optimizer_name": "Lion",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "unsupported_optimizer_kind");

        let (status, _) = send(
            &app,
            Method::POST,
            "/models/train",
            Some(json!({"model_name": "missing", "dataset_path": tmp.path()})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_train_test_predict_flow() {
        let tmp = TempDir::new().unwrap();
        let app = app(2, tmp.path());

        let data = tmp.path().join("data");
        write_images(&data.join("cat"), [250, 10, 10], 4);
        write_images(&data.join("dog"), [10, 10, 250], 4);
        let inputs = tmp.path().join("inputs");
        write_images(&inputs, [200, 30, 30], 3);

        let (status, body) = send(
            &app,
            Method::POST,
            "/tracker/enable",
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "OK");

        add(&app, "pets").await;
        let (status, body) = send(
            &app,
            Method::POST,
            "/models/train",
            Some(json!({
                "model_name": "pets",
                "dataset_path": data,
                "valid_part": 0.5,
                "batch_size": 2,
                "optimizer_name": "SGD",
                "learning_rate": 0.001,
                "freeze_backbone": true,
                "epochs": 1,
                "experiment_name": "smoke",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["report"]["label_set"], json!(["cat", "dog"]));
        assert_eq!(body["report"]["tracking"]["project"], "pets");
        assert!(tmp.path().join("runs/pets/smoke.jsonl").exists());
        let best_epoch = body["report"]["best_epoch"].clone();

        let (status, body) = send(&app, Method::GET, "/models/list", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["models"][0]["state"], "trained");
        assert_eq!(body["models"][0]["num_classes"], 2);
        assert_eq!(body["models"][0]["busy"], false);

        let (status, body) = send(&app, Method::GET, "/models/pets/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["metrics"].as_array().unwrap().len(), 2);

        let uri = format!(
            "/models/test?name=pets&dataset_path={}",
            data.to_str().unwrap()
        );
        let (status, body) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["evaluation"]["total"], 8);

        let (status, body) = send(
            &app,
            Method::POST,
            "/models/predict",
            Some(json!({"name": "pets", "dataset_path": inputs})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let result = body["result"].as_object().unwrap();
        assert_eq!(result.len(), 3);
        for label in result.values() {
            assert!(label == "cat" || label == "dog");
        }

        let (status, body) = send(
            &app,
            Method::POST,
            "/models/checkpoint",
            Some(json!({"name": "pets"})),
        )
        .await;
        if best_epoch.is_null() {
            assert_eq!(status, StatusCode::CONFLICT);
        } else {
            assert_eq!(status, StatusCode::OK);
            assert!(FsPath::new(body["path"].as_str().unwrap()).exists());
        }
    }
}
