use serde_json::Value;

use super::columns::*;
use super::contract::PredictionRequest;
use super::date::{DateFeatures, HourFeatures};
use super::derived::DerivedFeatures;
use crate::error::PipelineError;
use crate::model::FeatureSchema;

/// Columns coerced to numbers before reindexing.
pub const NUMERIC_COLUMNS: [&str; 24] = [
    SEASON, HOLIDAY, WORKINGDAY, WEATHERSIT, TEMP, ATEMP, HUM, WINDSPEED, HR,
    YR, MNTH, WEEKDAY, QUARTER, IS_WEEKEND,
    MNTH_SIN, MNTH_COS, WEEKDAY_SIN, WEEKDAY_COS, HR_SIN, HR_COS,
    IS_PEAK_SEASON, TEMP_HUMIDITY, TEMP_WINDSPEED, WEATHER_SEVERITY,
];

/// Numbers pass through, numeric strings are parsed, booleans map to 1/0.
pub fn coerce_numeric(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    n.filter(|x| x.is_finite())
}

/// Never fails: anything that is not a finite number becomes 0.
pub fn coerce_numeric_or_zero(value: &Value) -> f64 {
    coerce_numeric(value).unwrap_or(0.0)
}

/// Narrow to the model's f32 input; values beyond f32 range become 0 too.
fn to_feature(value: &Value) -> f32 {
    let x = coerce_numeric_or_zero(value) as f32;
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

/// Named columns gathered for one prediction, before reindexing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureRecord {
    columns: Vec<(String, Value)>,
}

impl FeatureRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_request(request: &PredictionRequest) -> Self {
        let mut record = Self::new();
        for (name, value) in request.iter() {
            record.insert(name, value.clone());
        }
        record
    }

    /// Insert or overwrite, keeping the first insertion position.
    pub fn insert(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.columns.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let idx = self.columns.iter().position(|(k, _)| k == name)?;
        Some(self.columns.remove(idx).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(k, _)| k.as_str())
    }

    pub fn add_date(&mut self, date: &DateFeatures) {
        self.insert(YR, date.yr);
        self.insert(MNTH, date.mnth);
        self.insert(WEEKDAY, date.weekday);
        self.insert(QUARTER, date.quarter);
        self.insert(IS_WEEKEND, date.is_weekend);
        self.insert(MNTH_SIN, date.mnth_sin);
        self.insert(MNTH_COS, date.mnth_cos);
        self.insert(WEEKDAY_SIN, date.weekday_sin);
        self.insert(WEEKDAY_COS, date.weekday_cos);
    }

    pub fn add_hour(&mut self, hour: &HourFeatures) {
        self.insert(HR_SIN, hour.hr_sin);
        self.insert(HR_COS, hour.hr_cos);
    }

    pub fn add_derived(&mut self, derived: &DerivedFeatures) {
        self.insert(IS_PEAK_SEASON, derived.is_peak_season);
        self.insert(TEMP_HUMIDITY, derived.temp_humidity);
        if let Some(windspeed) = derived.windspeed {
            self.insert(WINDSPEED, windspeed);
        }
        self.insert(TEMP_WINDSPEED, derived.temp_windspeed);
        self.insert(WEATHER_SEVERITY, derived.weather_severity.clone());
    }

    /// Replace each listed column that is present with its numeric value (or 0).
    pub fn coerce_columns<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            if let Some(slot) = self.columns.iter_mut().find(|(k, _)| k == name) {
                slot.1 = Value::from(coerce_numeric_or_zero(&slot.1));
            }
        }
    }
}

/// What to do with a schema column the record does not carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillPolicy {
    #[default]
    Zero,
    /// Leave the column out; the length check then fails.
    Disabled,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureVectorAssembler {
    fill: FillPolicy,
}

impl FeatureVectorAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fill_policy(fill: FillPolicy) -> Self {
        Self { fill }
    }

    pub fn fill_policy(&self) -> FillPolicy {
        self.fill
    }

    /// Drop the raw date, coerce numeric columns, and reindex to `schema`.
    /// Extra columns are ignored; the result is always `schema.len()` long.
    pub fn assemble(&self, mut record: FeatureRecord, schema: &FeatureSchema) -> Result<Vec<f32>, PipelineError> {
        record.remove(DTEDAY);
        record.coerce_columns(NUMERIC_COLUMNS);

        let mut vector = Vec::with_capacity(schema.len());
        for name in schema.names() {
            match (record.get(name), self.fill) {
                (Some(v), _) => vector.push(to_feature(v)),
                (None, FillPolicy::Zero) => vector.push(0.0),
                (None, FillPolicy::Disabled) => {}
            }
        }

        if vector.len() != schema.len() {
            return Err(PipelineError::FeatureAlignment {
                prepared: vector.len(),
                expected: schema.len(),
            });
        }
        Ok(vector)
    }
}
