//! In-memory stores owned by the serving process: prediction history with
//! its last-prediction summary, user feedback, and per-user reviews.
//! Nothing here outlives the process.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};

use crate::model::ModelVariant;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Integer view of a JSON value: floats truncate, strings must hold an integer.
fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// 1 clear → Low, 2 mist → Medium, anything worse → High.
pub fn weather_impact(weathersit: &Value) -> &'static str {
    match as_integer(weathersit) {
        Some(1) => "Low",
        Some(2) | None => "Medium",
        Some(_) => "High",
    }
}

pub fn peak_status(demand: f64) -> &'static str {
    let demand = demand.trunc();
    if demand > 400.0 {
        "Peak"
    } else if demand > 200.0 {
        "Normal"
    } else {
        "Off-Peak"
    }
}

/// What the pipeline knows about a finished prediction; the store adds id and time.
#[derive(Debug, Clone)]
pub struct PredictionDraft {
    pub variant: ModelVariant,
    pub predicted_demand: f64,
    pub date: Value,
    pub hour: Option<i64>,
    pub season: Value,
    pub weathersit: Value,
    pub temp: Value,
    pub hum: Value,
    pub workingday: Value,
    pub holiday: Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PredictionRecord {
    pub id: u64,
    pub predicted_demand: f64,
    pub prediction_type: &'static str,
    pub date: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hour: Option<i64>,
    pub season: Value,
    pub weathersit: Value,
    pub weather_impact: &'static str,
    pub temp: Value,
    pub hum: Value,
    pub workingday: Value,
    pub holiday: Value,
    pub peak_status: &'static str,
    pub timestamp: DateTime<Local>,
    pub date_readable: String,
}

/// Dashboard summary of the most recent prediction; all `null` before the first.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct LastPrediction {
    pub predicted_demand: Option<f64>,
    pub prediction_type: Option<&'static str>,
    pub weather_impact: Option<&'static str>,
    pub peak_status: Option<&'static str>,
    pub timestamp: Option<DateTime<Local>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HistoryStats {
    pub total: usize,
    pub hourly: usize,
    pub daily: usize,
    pub average_demand: f64,
}

struct HistoryInner {
    records: VecDeque<PredictionRecord>,
    next_id: u64,
    last: LastPrediction,
}

/// Bounded FIFO of predictions. Append, evict and summary update share one lock.
pub struct PredictionHistory {
    capacity: usize,
    inner: Mutex<HistoryInner>,
}

impl Default for PredictionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl PredictionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(HistoryInner {
                records: VecDeque::with_capacity(capacity),
                next_id: 1,
                last: LastPrediction::default(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self, draft: PredictionDraft) -> PredictionRecord {
        let now = Local::now();
        let mut inner = self.inner.lock();

        let record = PredictionRecord {
            id: inner.next_id,
            predicted_demand: draft.predicted_demand,
            prediction_type: draft.variant.label(),
            date: draft.date,
            hour: draft.hour,
            season: draft.season,
            weather_impact: weather_impact(&draft.weathersit),
            weathersit: draft.weathersit,
            temp: draft.temp,
            hum: draft.hum,
            workingday: draft.workingday,
            holiday: draft.holiday,
            peak_status: peak_status(draft.predicted_demand),
            timestamp: now,
            date_readable: now.format("%Y-%m-%d %H:%M:%S").to_string(),
        };
        inner.next_id += 1;

        inner.last = LastPrediction {
            predicted_demand: Some(record.predicted_demand),
            prediction_type: Some(record.prediction_type),
            weather_impact: Some(record.weather_impact),
            peak_status: Some(record.peak_status),
            timestamp: Some(now),
        };
        inner.records.push_back(record.clone());
        while inner.records.len() > self.capacity {
            inner.records.pop_front();
        }
        record
    }

    /// Newest first, optionally filtered by `prediction_type`; `limit` 0 means all.
    pub fn list(&self, prediction_type: Option<&str>, limit: usize) -> Vec<PredictionRecord> {
        let inner = self.inner.lock();
        let matching = inner
            .records
            .iter()
            .rev()
            .filter(|r| prediction_type.map_or(true, |t| r.prediction_type == t))
            .cloned();
        if limit > 0 {
            matching.take(limit).collect()
        } else {
            matching.collect()
        }
    }

    pub fn recent(&self, n: usize) -> Vec<PredictionRecord> {
        let inner = self.inner.lock();
        let skip = inner.records.len().saturating_sub(n);
        inner.records.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> LastPrediction {
        self.inner.lock().last.clone()
    }

    pub fn stats(&self) -> HistoryStats {
        let inner = self.inner.lock();
        let total = inner.records.len();
        let hourly = inner
            .records
            .iter()
            .filter(|r| r.prediction_type == ModelVariant::Hourly.label())
            .count();
        let sum: f64 = inner.records.iter().map(|r| r.predicted_demand).sum();
        HistoryStats {
            total,
            hourly,
            daily: total - hourly,
            average_demand: if total == 0 { 0.0 } else { sum / total as f64 },
        }
    }
}

/// Accepts ints, integral-or-not floats (truncated) and numeric strings.
pub fn parse_rating(value: &Value) -> Result<u8, String> {
    let rating = as_integer(value).ok_or_else(|| "Rating must be an integer".to_string())?;

    if !(1..=5).contains(&rating) {
        return Err("Rating must be between 1 and 5".to_string());
    }
    Ok(rating as u8)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FeedbackEntry {
    pub rating: u8,
    pub comment: String,
    pub timestamp: DateTime<Local>,
}

#[derive(Default)]
pub struct FeedbackStore {
    entries: Mutex<Vec<FeedbackEntry>>,
}

impl FeedbackStore {
    pub fn submit(&self, rating: u8, comment: &str) -> FeedbackEntry {
        let entry = FeedbackEntry {
            rating,
            comment: comment.to_string(),
            timestamp: Local::now(),
        };
        self.entries.lock().push(entry.clone());
        tracing::info!(rating, comment = %comment.chars().take(50).collect::<String>(), "feedback received");
        entry
    }

    pub fn all(&self) -> Vec<FeedbackEntry> {
        self.entries.lock().clone()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReviewEntry {
    pub id: u64,
    pub rating: u8,
    pub comment: String,
    pub timestamp: DateTime<Local>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserReview {
    pub user_email: String,
    #[serde(flatten)]
    pub review: ReviewEntry,
}

/// Reviews keyed by user email; ids count from 1 per user.
#[derive(Default)]
pub struct ReviewStore {
    by_user: Mutex<BTreeMap<String, Vec<ReviewEntry>>>,
}

impl ReviewStore {
    pub fn submit(&self, user_email: &str, rating: u8, comment: &str) -> u64 {
        let mut by_user = self.by_user.lock();
        let reviews = by_user.entry(user_email.to_string()).or_default();
        let id = reviews.len() as u64 + 1;
        reviews.push(ReviewEntry {
            id,
            rating,
            comment: comment.to_string(),
            timestamp: Local::now(),
        });
        tracing::info!(user = %user_email, rating, review_id = id, "review received");
        id
    }

    pub fn for_user(&self, user_email: &str) -> Vec<ReviewEntry> {
        self.by_user.lock().get(user_email).cloned().unwrap_or_default()
    }

    /// Every review, newest first.
    pub fn all(&self) -> Vec<UserReview> {
        let by_user = self.by_user.lock();
        let mut all: Vec<UserReview> = by_user
            .iter()
            .flat_map(|(email, reviews)| {
                reviews.iter().map(move |r| UserReview {
                    user_email: email.clone(),
                    review: r.clone(),
                })
            })
            .collect();
        all.sort_by(|a, b| b.review.timestamp.cmp(&a.review.timestamp));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn draft(variant: ModelVariant, demand: f64) -> PredictionDraft {
        PredictionDraft {
            variant,
            predicted_demand: demand,
            date: json!("2024-07-04"),
            hour: (variant == ModelVariant::Hourly).then_some(8),
            season: json!(2),
            weathersit: json!(1),
            temp: json!(28),
            hum: json!(55),
            workingday: json!(1),
            holiday: json!(0),
        }
    }

    #[test]
    fn labels() {
        assert_eq!(weather_impact(&json!(1)), "Low");
        assert_eq!(weather_impact(&json!("2")), "Medium");
        assert_eq!(weather_impact(&json!(3)), "High");
        assert_eq!(weather_impact(&json!(4)), "High");
        assert_eq!(weather_impact(&json!("storm")), "Medium");
        assert_eq!(weather_impact(&json!(1.0)), "Low");
        assert_eq!(peak_status(401.0), "Peak");
        assert_eq!(peak_status(400.9), "Normal");
        assert_eq!(peak_status(200.5), "Off-Peak");
        assert_eq!(peak_status(0.0), "Off-Peak");
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let history = PredictionHistory::new(3);
        for i in 0..5 {
            history.record(draft(ModelVariant::Daily, i as f64));
        }
        assert_eq!(history.len(), 3);
        let ids: Vec<u64> = history.list(None, 0).iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![5, 4, 3]);
    }

    #[test]
    fn ids_stay_monotonic_after_eviction() {
        let history = PredictionHistory::new(1);
        let a = history.record(draft(ModelVariant::Daily, 1.0));
        let b = history.record(draft(ModelVariant::Daily, 2.0));
        assert!(b.id > a.id);
    }

    #[test]
    fn list_filters_and_limits() {
        let history = PredictionHistory::default();
        history.record(draft(ModelVariant::Daily, 100.0));
        history.record(draft(ModelVariant::Hourly, 250.0));
        history.record(draft(ModelVariant::Hourly, 500.0));

        let hourly = history.list(Some("Hourly"), 0);
        assert_eq!(hourly.len(), 2);
        assert_eq!(hourly[0].predicted_demand, 500.0);
        assert_eq!(hourly[0].hour, Some(8));
        assert_eq!(history.list(None, 1).len(), 1);
        assert!(history.list(Some("Weekly"), 0).is_empty());

        let stats = history.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.hourly, 2);
        assert_eq!(stats.daily, 1);
        assert!((stats.average_demand - 283.333).abs() < 0.01);
    }

    #[test]
    fn last_prediction_tracks_latest_record() {
        let history = PredictionHistory::default();
        assert_eq!(history.last(), LastPrediction::default());
        history.record(draft(ModelVariant::Hourly, 450.0));
        let last = history.last();
        assert_eq!(last.predicted_demand, Some(450.0));
        assert_eq!(last.prediction_type, Some("Hourly"));
        assert_eq!(last.peak_status, Some("Peak"));
        assert_eq!(last.weather_impact, Some("Low"));
    }

    #[test]
    fn concurrent_writers_keep_length_bounded() {
        let history = Arc::new(PredictionHistory::new(50));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let h = history.clone();
                std::thread::spawn(move || {
                    for _ in 0..40 {
                        h.record(draft(ModelVariant::Daily, 10.0));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(history.len(), 50);
        let ids: Vec<u64> = history.list(None, 0).iter().map(|r| r.id).collect();
        assert_eq!(ids[0], 320);
        assert!(ids.windows(2).all(|w| w[0] == w[1] + 1));
    }

    #[test]
    fn serialized_record_omits_hour_for_daily() {
        let history = PredictionHistory::default();
        let rec = history.record(draft(ModelVariant::Daily, 12.5));
        let v = serde_json::to_value(&rec).unwrap();
        assert!(v.get("hour").is_none());
        assert_eq!(v["prediction_type"], "Daily");
        assert_eq!(v["weather_impact"], "Low");
    }

    #[test]
    fn rating_parsing() {
        assert_eq!(parse_rating(&json!(5)), Ok(5));
        assert_eq!(parse_rating(&json!("3")), Ok(3));
        assert_eq!(parse_rating(&json!(4.7)), Ok(4));
        assert_eq!(parse_rating(&json!(0)), Err("Rating must be between 1 and 5".into()));
        assert_eq!(parse_rating(&json!("great")), Err("Rating must be an integer".into()));
        assert_eq!(parse_rating(&json!(null)), Err("Rating must be an integer".into()));
    }

    #[test]
    fn reviews_are_numbered_per_user() {
        let store = ReviewStore::default();
        assert_eq!(store.submit("a@x.io", 5, "great"), 1);
        assert_eq!(store.submit("a@x.io", 4, "good"), 2);
        assert_eq!(store.submit("b@x.io", 3, "ok"), 1);
        assert_eq!(store.for_user("a@x.io").len(), 2);
        assert!(store.for_user("nobody@x.io").is_empty());

        let all = store.all();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].review.timestamp >= w[1].review.timestamp));
    }

    #[test]
    fn feedback_appends() {
        let store = FeedbackStore::default();
        store.submit(5, "love it");
        store.submit(2, "slow");
        let all = store.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].comment, "slow");
    }
}
