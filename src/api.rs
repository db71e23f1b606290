use axum::{
    body::Bytes,
    extract::{Multipart, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::chat::{application_context, ChatAssistant};
use crate::error::{ApiError, PipelineError};
use crate::features::RequestedMode;
use crate::model::ModelVariant;
use crate::pipeline::Pipeline;
use crate::store::{parse_rating, FeedbackStore, PredictionHistory, ReviewStore};

// ---------- Server state ----------

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub history: Arc<PredictionHistory>,
    pub feedback: Arc<FeedbackStore>,
    pub reviews: Arc<ReviewStore>,
    pub chat: Arc<ChatAssistant>,
}

impl AppState {
    pub fn new(pipeline: Pipeline, history: PredictionHistory, chat: ChatAssistant) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            history: Arc::new(history),
            feedback: Arc::new(FeedbackStore::default()),
            reviews: Arc::new(ReviewStore::default()),
            chat: Arc::new(chat),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/predict/day", post(predict_day))
        .route("/predict/hour", post(predict_hour))
        .route("/upload-predict", post(upload_predict))
        .route("/predict/upload", post(upload_csv))
        .route("/predictions/history", get(prediction_history))
        .route("/dashboard/summary", get(dashboard_summary))
        .route("/feedback", get(list_feedback).post(submit_feedback))
        .route("/api/reviews", get(list_reviews).post(submit_review))
        .route("/api/reviews/all", get(all_reviews))
        .route("/chat", post(chat))
        .route("/chat/status", get(chat_status))
        .route("/chat/reset", post(chat_reset))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------- Body helpers ----------

/// Parse a JSON body regardless of content type. Empty bodies are "no body".
fn json_body(body: &Bytes) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(PipelineError::EmptyBody.into());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))
}

fn str_field<'a>(payload: &'a Value, key: &str) -> &'a str {
    payload.get(key).and_then(Value::as_str).map(str::trim).unwrap_or("")
}

struct Upload {
    filename: String,
    data: Bytes,
}

/// Pull the `file` part and any `mode` field out of a multipart form.
async fn read_upload(mut multipart: Multipart) -> Result<(Option<Upload>, Option<String>), ApiError> {
    let mut upload = None;
    let mut mode = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        match field.name() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?;
                upload = Some(Upload { filename, data });
            }
            Some("mode") => {
                mode = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(format!("Invalid mode field: {}", e)))?,
                );
            }
            _ => {}
        }
    }
    Ok((upload, mode))
}

fn require_file(upload: Option<Upload>) -> Result<Upload, ApiError> {
    let upload = upload.ok_or_else(|| ApiError::BadRequest("No file uploaded".into()))?;
    if upload.filename.is_empty() {
        return Err(ApiError::BadRequest("No file selected".into()));
    }
    Ok(upload)
}

fn has_extension(filename: &str, ext: &str) -> bool {
    filename.to_lowercase().ends_with(ext)
}

fn utf8(data: &Bytes, kind: &str) -> Result<String, ApiError> {
    String::from_utf8(data.to_vec())
        .map_err(|_| ApiError::BadRequest(format!("Error parsing {} file: not valid UTF-8", kind)))
}

// ---------- Handlers ----------

async fn health(State(state): State<AppState>) -> Json<Value> {
    let models = state.pipeline.models();
    Json(json!({
        "status": "ok",
        "day_model_loaded": models.is_loaded(ModelVariant::Daily),
        "day_feature_count": models.feature_count(ModelVariant::Daily),
        "hour_model_loaded": models.is_loaded(ModelVariant::Hourly),
        "hour_feature_count": models.feature_count(ModelVariant::Hourly),
        "chatbot_available": state.chat.is_available(),
    }))
}

async fn predict_day(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let payload = json_body(&body)?;
    let record = state.pipeline.predict_daily(&payload, &state.history)?;
    Ok(Json(json!({ "prediction": record.predicted_demand })))
}

async fn predict_hour(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let payload = json_body(&body)?;
    let record = state.pipeline.predict_hourly(&payload, &state.history)?;
    Ok(Json(json!({ "prediction": record.predicted_demand })))
}

async fn upload_predict(State(state): State<AppState>, multipart: Multipart) -> Result<Json<Value>, ApiError> {
    let (upload, mode) = read_upload(multipart).await?;
    let upload = require_file(upload)?;
    if !has_extension(&upload.filename, ".txt") {
        return Err(ApiError::BadRequest("Invalid file type. Only .txt files are supported".into()));
    }
    let requested: RequestedMode = mode.as_deref().unwrap_or("auto").trim().parse()?;
    let content = utf8(&upload.data, "TXT")?;

    let out = state.pipeline.predict_from_text(&content, requested)?;
    tracing::info!(file = %upload.filename, mode = out.variant.mode(), prediction = out.prediction, "text upload scored");
    Ok(Json(json!({
        "mode": out.variant.mode(),
        "parsed_inputs": out.parsed_inputs,
        "prediction": out.prediction,
    })))
}

async fn upload_csv(State(state): State<AppState>, multipart: Multipart) -> Result<Json<Value>, ApiError> {
    let (upload, _) = read_upload(multipart).await?;
    let upload = require_file(upload)?;
    if has_extension(&upload.filename, ".txt") {
        return Err(ApiError::BadRequest("TXT format supported only for structured key:value data".into()));
    }
    if !has_extension(&upload.filename, ".csv") {
        return Err(ApiError::BadRequest(
            "Invalid file type. Only .csv and .txt files are supported".into(),
        ));
    }
    let content = utf8(&upload.data, "CSV")?;

    let predicted_demand = state.pipeline.predict_from_csv(&content)?;
    Ok(Json(json!({ "predicted_demand": predicted_demand, "source": "file_upload" })))
}

#[derive(Deserialize, Default)]
struct HistoryQuery {
    limit: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

async fn prediction_history(State(state): State<AppState>, Query(q): Query<HistoryQuery>) -> Json<Value> {
    // Unparseable or non-positive limits mean "everything".
    let limit = q
        .limit
        .and_then(|l| l.trim().parse::<i64>().ok())
        .filter(|l| *l > 0)
        .map(|l| l as usize)
        .unwrap_or(0);
    let kind = q.kind.filter(|k| !k.is_empty());
    let predictions = state.history.list(kind.as_deref(), limit);
    Json(json!({
        "total": state.history.len(),
        "returned": predictions.len(),
        "predictions": predictions,
    }))
}

async fn dashboard_summary(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.history.last()))
}

async fn submit_feedback(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let payload = json_body(&body)?;
    let rating = payload.get("rating").filter(|r| !r.is_null());
    let comment = str_field(&payload, "comment");
    let rating = match rating {
        Some(r) if !comment.is_empty() => r,
        _ => return Err(ApiError::BadRequest("Missing rating or comment".into())),
    };
    let rating = parse_rating(rating).map_err(ApiError::BadRequest)?;

    state.feedback.submit(rating, comment);
    Ok((StatusCode::CREATED, Json(json!({ "status": "success" }))))
}

async fn list_feedback(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "feedback": state.feedback.all() }))
}

async fn submit_review(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let payload = json_body(&body)?;
    let user_email = str_field(&payload, "user_email");
    let comment = str_field(&payload, "comment");
    let rating = payload.get("rating").filter(|r| !r.is_null());
    let rating = match rating {
        Some(r) if !user_email.is_empty() && !comment.is_empty() => r,
        _ => {
            return Err(ApiError::BadRequest(
                "Missing user_email, rating, or comment".into(),
            ))
        }
    };
    let rating = parse_rating(rating).map_err(ApiError::BadRequest)?;

    let review_id = state.reviews.submit(user_email, rating, comment);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "success", "review_id": review_id })),
    ))
}

#[derive(Deserialize)]
struct ReviewQuery {
    user_email: Option<String>,
}

async fn list_reviews(
    State(state): State<AppState>,
    Query(q): Query<ReviewQuery>,
) -> Result<Json<Value>, ApiError> {
    let user_email = q.user_email.unwrap_or_default();
    let user_email = user_email.trim();
    if user_email.is_empty() {
        return Err(ApiError::BadRequest("user_email query parameter required".into()));
    }
    Ok(Json(json!({ "reviews": state.reviews.for_user(user_email) })))
}

async fn all_reviews(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "reviews": state.reviews.all() }))
}

async fn chat(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    if !state.chat.is_available() {
        return Err(crate::chat::ChatError::Unavailable.into());
    }
    let payload = json_body(&body)?;
    let message = str_field(&payload, "message");
    let context = application_context(state.pipeline.models(), &state.history);

    let reply = state.chat.reply(message, &context).await?;
    tracing::info!("chat response generated");
    Ok(Json(json!({ "reply": reply })))
}

async fn chat_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "available": state.chat.is_available(),
        "message": state.chat.status_message(),
    }))
}

async fn chat_reset(State(state): State<AppState>) -> Json<Value> {
    state.chat.reset();
    tracing::info!("chat history reset");
    Json(json!({ "status": "success", "message": "Chat history cleared" }))
}
