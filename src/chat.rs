use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::error::ApiError;
use crate::model::{ModelRegistry, ModelVariant};
use crate::store::PredictionHistory;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

const REQUEST_FAILED: &str = "Chatbot is temporarily unavailable. Please try again later.";
const EMPTY_REPLY: &str = "Sorry, I couldn't generate a response. Please try again.";
const RECENT_IN_CONTEXT: usize = 10;

const GREETINGS: [&str; 3] = ["hello", "hi", "hey"];
const GREETING_PHRASES: [&str; 3] = ["good morning", "good afternoon", "good evening"];

/// Words that pull the application context into a greeting.
const APP_KEYWORDS: &[&str] = &[
    "dashboard", "prediction", "predict", "upload", "file", "chatbot", "profile", "page",
    "feature", "how", "what", "where", "which", "why", "data", "statistics", "latest", "recent",
    "show", "tell", "explain", "history", "past", "previous", "endpoint", "chart", "summary",
    "review", "feedback", "mode", "hourly", "daily", "weather", "temperature", "humidity",
    "season", "working", "holiday", "help", "guide", "available",
];

const SYSTEM_PROMPT: &str = "You are the assistant for a bike-sharing demand prediction app. \
The app forecasts bike rentals with two trained models: an hourly model and a daily model. \
Users can predict from a form, upload a key:value text file or a CSV, browse their prediction \
history on the dashboard, and leave reviews.\n\
Answer in a friendly, conversational tone: one to three sentences for greetings, two to five \
for explanations, short bullet lists for step-by-step instructions. \
Use only the application information supplied with the question when talking about \
predictions, history or model status, and say so when that information does not cover the question.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: ChatRole::User, text: text.into() }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self { role: ChatRole::Model, text: text.into() }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChatError {
    #[error("API key rejected: {0}")]
    Auth(String),
    #[error("quota exceeded: {0}")]
    Quota(String),
    #[error("generator request failed: {0}")]
    Request(String),
    #[error("no reply generator configured")]
    Unavailable,
    #[error("Message required")]
    EmptyMessage,
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::EmptyMessage => ApiError::BadRequest(err.to_string()),
            ChatError::Unavailable => ApiError::Unavailable(
                "Chatbot is unavailable. Set GEMINI_API_KEY to enable it.".into(),
            ),
            ChatError::Auth(_) => ApiError::Unavailable(
                "API key is invalid or missing. Please check your configuration.".into(),
            ),
            ChatError::Quota(_) => ApiError::TooManyRequests(
                "API quota exceeded. Please try again in a few minutes.".into(),
            ),
            ChatError::Request(detail) => {
                tracing::error!(error = %detail, "chat request failed");
                ApiError::Internal(REQUEST_FAILED.into())
            }
        }
    }
}

/// Produces the next model turn for a transcript.
pub trait ReplyGenerator: Send + Sync {
    fn generate<'a>(&'a self, turns: &'a [ChatTurn]) -> BoxFuture<'a, Result<String, ChatError>>;
}

#[derive(Serialize, Deserialize, Default)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
struct Content<'a> {
    role: ChatRole,
    parts: [PartRef<'a>; 1],
}

#[derive(Serialize)]
struct PartRef<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

/// Generative Language REST client (`models/{model}:generateContent`).
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn send(&self, turns: &[ChatTurn]) -> Result<String, ChatError> {
        let contents: Vec<Content<'_>> = turns
            .iter()
            .map(|t| Content { role: t.role, parts: [PartRef { text: &t.text }] })
            .collect();
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&json!({ "contents": contents }))
            .send()
            .await
            .map_err(|e| ChatError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ChatError::Request(e.to_string()))?;
        if status >= 400 {
            return Err(classify_failure(status, text));
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&text).map_err(|e| ChatError::Request(e.to_string()))?;
        let reply: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();
        if reply.trim().is_empty() {
            Ok(EMPTY_REPLY.to_string())
        } else {
            Ok(reply)
        }
    }
}

fn classify_failure(status: u16, body: String) -> ChatError {
    let lower = body.to_lowercase();
    if status == 401 || status == 403 || body.contains("API_KEY") || lower.contains("api key") {
        ChatError::Auth(body)
    } else if status == 429 || lower.contains("quota") || lower.contains("rate limit") {
        ChatError::Quota(body)
    } else {
        ChatError::Request(format!("status {}: {}", status, body))
    }
}

impl ReplyGenerator for GeminiClient {
    fn generate<'a>(&'a self, turns: &'a [ChatTurn]) -> BoxFuture<'a, Result<String, ChatError>> {
        Box::pin(self.send(turns))
    }
}

fn words(lower: &str) -> impl Iterator<Item = &str> {
    lower.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty())
}

fn mentions_greeting(lower: &str) -> bool {
    words(lower).any(|w| GREETINGS.contains(&w))
        || GREETING_PHRASES.iter().any(|p| lower.contains(p))
}

fn mentions_app_keyword(lower: &str) -> bool {
    APP_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Greetings skip the application context unless they also ask about the app.
pub fn wants_context(message: &str) -> bool {
    let lower = message.to_lowercase();
    !mentions_greeting(&lower) || mentions_app_keyword(&lower)
}

/// Conversation state plus the generator that extends it.
///
/// There is one shared transcript, so replies are taken one at a time:
/// a second message waits until the first exchange has been appended.
pub struct ChatAssistant {
    generator: Option<Box<dyn ReplyGenerator>>,
    transcript: Mutex<Vec<ChatTurn>>,
    turn: tokio::sync::Mutex<()>,
}

impl ChatAssistant {
    pub fn new(generator: Box<dyn ReplyGenerator>) -> Self {
        Self::with_generator(Some(generator))
    }

    pub fn disabled() -> Self {
        Self::with_generator(None)
    }

    fn with_generator(generator: Option<Box<dyn ReplyGenerator>>) -> Self {
        Self {
            generator,
            transcript: Mutex::new(Vec::new()),
            turn: tokio::sync::Mutex::new(()),
        }
    }

    pub fn is_available(&self) -> bool {
        self.generator.is_some()
    }

    pub fn status_message(&self) -> &'static str {
        if self.is_available() {
            "Chatbot is ready"
        } else {
            "Chatbot is unavailable. Set GEMINI_API_KEY to enable it."
        }
    }

    pub fn transcript(&self) -> Vec<ChatTurn> {
        self.transcript.lock().clone()
    }

    pub fn reset(&self) {
        self.transcript.lock().clear();
    }

    /// Send `message` with the prior transcript. `context` describes the
    /// current application state and is attached unless the message is a
    /// bare greeting. Quota failures are answered from canned replies.
    pub async fn reply(&self, message: &str, context: &str) -> Result<String, ChatError> {
        let generator = self.generator.as_ref().ok_or(ChatError::Unavailable)?;
        let message = message.trim();
        if message.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let _turn = self.turn.lock().await;
        let mut turns = self.transcript();
        let mut prefix = String::new();
        if turns.is_empty() {
            prefix.push_str(SYSTEM_PROMPT);
            prefix.push_str("\n\n");
        }
        if wants_context(message) {
            prefix.push_str("APPLICATION INFORMATION:\n");
            prefix.push_str(context);
            prefix.push_str("\n\n");
        }
        turns.push(if prefix.is_empty() {
            ChatTurn::user(message)
        } else {
            ChatTurn::user(format!("{}User: {}", prefix, message))
        });

        let reply = match generator.generate(&turns).await {
            Ok(reply) => reply,
            Err(ChatError::Quota(detail)) => {
                tracing::warn!(error = %detail, "generator quota exceeded, using canned reply");
                fallback_reply(message, context)
            }
            Err(e) => {
                tracing::error!(error = %e, "chat generation failed");
                return Err(e);
            }
        };

        let mut transcript = self.transcript.lock();
        transcript.push(ChatTurn::user(message));
        transcript.push(ChatTurn::model(reply.clone()));
        Ok(reply)
    }
}

/// Plain-text snapshot of pages, endpoints, models and recent predictions.
pub fn application_context(models: &ModelRegistry, history: &PredictionHistory) -> String {
    let mut out = vec![
        "PAGES".to_string(),
        "- Dashboard (/dashboard): latest prediction summary, demand and weather charts, recent reviews.".into(),
        "- Prediction (/prediction): hourly or daily form with date, season, hour, weather, temperature, humidity and working day.".into(),
        "- Upload (/upload): predict from a .txt file of key:value pairs (auto, hour or day mode) or a CSV.".into(),
        "- Chatbot (/chatbot): this assistant.".into(),
        "- Profile (/profile): user details and reviews.".into(),
        String::new(),
        "CURRENT STATE".to_string(),
    ];

    let last = history.last();
    match (last.predicted_demand, last.prediction_type) {
        (Some(demand), Some(kind)) => {
            out.push(format!("- Last prediction: {} mode, {} bikes.", kind, demand));
            out.push(format!(
                "- Weather impact: {}, peak status: {}.",
                last.weather_impact.unwrap_or("N/A"),
                last.peak_status.unwrap_or("N/A")
            ));
            if let Some(ts) = last.timestamp {
                out.push(format!("- Predicted at {}.", ts.format("%Y-%m-%d %H:%M:%S")));
            }
        }
        _ => out.push("- No predictions made yet.".into()),
    }

    let stats = history.stats();
    if stats.total == 0 {
        out.push("- No prediction history available yet.".into());
    } else {
        out.push(format!("- Prediction history: total of {} predictions.", stats.total));
        out.push(format!("- Breakdown: {} hourly, {} daily.", stats.hourly, stats.daily));
        out.push(format!("- Average predicted demand: {} bikes.", stats.average_demand));
        out.push(format!("Recent predictions (last {}):", RECENT_IN_CONTEXT));
        for p in history.recent(RECENT_IN_CONTEXT) {
            let hour = p.hour.map(|h| format!(" for hour {}", h)).unwrap_or_default();
            let date = match &p.date {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.push(format!(
                "  ID {}: {} prediction{} on {}, {} bikes (weather: {}, peak: {})",
                p.id, p.prediction_type, hour, date, p.predicted_demand, p.weather_impact, p.peak_status
            ));
        }
    }

    out.push(String::new());
    out.push("MODELS".into());
    for variant in [ModelVariant::Daily, ModelVariant::Hourly] {
        out.push(format!(
            "- {} model: {}, {} features.",
            variant.label(),
            if models.is_loaded(variant) { "loaded" } else { "not loaded" },
            models.feature_count(variant)
        ));
    }

    out.push(String::new());
    out.push("ENDPOINTS".into());
    for line in [
        "GET /health", "POST /predict/day", "POST /predict/hour", "POST /upload-predict",
        "POST /predict/upload", "GET /predictions/history", "GET /dashboard/summary",
        "GET|POST /feedback", "GET|POST /api/reviews", "GET /api/reviews/all",
        "POST /chat", "GET /chat/status", "POST /chat/reset",
    ] {
        out.push(format!("- {}", line));
    }
    out.join("\n")
}

/// Keyword-matched reply used when the generator is out of quota.
pub fn fallback_reply(message: &str, context: &str) -> String {
    let lower = message.to_lowercase();
    let has = |k: &str| lower.contains(k);

    if mentions_greeting(&lower) {
        return "Hi! I'm under heavy load right now, but I can still answer basic questions about the app.".into();
    }
    if has("dashboard") {
        return "The Dashboard shows your latest prediction (demand, type, weather impact, peak status), \
demand and weather charts, and recent reviews. It refreshes automatically."
            .into();
    }
    if (has("prediction") && has("page")) || (has("how") && has("predict")) {
        return "Open the Prediction page, pick hourly or daily mode, fill in date, season, weather, \
temperature, humidity and working day (plus the hour in hourly mode), then press Predict."
            .into();
    }
    if has("upload") || has("file") {
        return "On the Upload page choose a .txt file with lines like temp:25, hum:60, weather:1, \
pick auto, hour or day mode, and submit. CSV files with temp, hum, weathersit and workingday \
columns are accepted too."
            .into();
    }
    if has("chat") {
        return "You're using the chatbot now. Ask about any page, feature or your prediction history.".into();
    }
    if has("profile") {
        return "The Profile page shows your account details and the reviews you've left.".into();
    }
    if has("feature") || has("what can") {
        return "The app has a Dashboard, hourly and daily Prediction, file Upload, this Chatbot, \
and a Profile page, all reachable from the navigation menu."
            .into();
    }
    if has("history") || has("past prediction") {
        let lines: Vec<&str> = context
            .lines()
            .filter(|l| l.contains("total of") || l.trim_start().starts_with("ID "))
            .take(5)
            .collect();
        if !lines.is_empty() {
            return format!("Based on your prediction history:\n{}", lines.join("\n"));
        }
        return "Your prediction history keeps the latest predictions you've made; the dashboard shows the most recent one.".into();
    }
    "I'm under heavy load right now. The app has Dashboard, Prediction, Upload, Chatbot and \
Profile pages; please try again in a few minutes for a fuller answer."
        .into()
}
