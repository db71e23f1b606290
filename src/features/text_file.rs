use serde_json::{Map, Number, Value};
use std::str::FromStr;

use super::columns::*;
use crate::error::PipelineError;
use crate::model::ModelVariant;

/// User-friendly key -> model column.
const KEY_SYNONYMS: [(&str, &str); 10] = [
    ("hour", HR),
    ("humidity", HUM),
    ("weather", WEATHERSIT),
    ("working_day", WORKINGDAY),
    ("temperature", TEMP),
    ("season", SEASON),
    ("holiday", HOLIDAY),
    ("workingday", WORKINGDAY),
    ("windspeed", WINDSPEED),
    ("atemp", ATEMP),
];

/// Keys every upload must carry, whatever the mode.
const ALWAYS_REQUIRED: [&str; 3] = [TEMP, HUM, WEATHERSIT];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestedMode {
    #[default]
    Auto,
    Hour,
    Day,
}

impl FromStr for RequestedMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(RequestedMode::Auto),
            "hour" => Ok(RequestedMode::Hour),
            "day" => Ok(RequestedMode::Day),
            other => Err(PipelineError::InvalidMode(other.to_string())),
        }
    }
}

/// Parsed upload: resolved variant plus normalized `key -> number` inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct TextPayload {
    pub variant: ModelVariant,
    pub inputs: Map<String, Value>,
}

/// Lowercase, trim, then map through the synonym table.
pub fn normalize_key(raw: &str) -> String {
    let key = raw.trim().to_lowercase();
    KEY_SYNONYMS
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, column)| column.to_string())
        .unwrap_or(key)
}

fn parse_number(raw: &str) -> Option<Value> {
    let x: f64 = raw.trim().parse().ok()?;
    if !x.is_finite() {
        return None;
    }
    if x.fract() == 0.0 && x.abs() < i64::MAX as f64 {
        return Some(Value::from(x as i64));
    }
    Number::from_f64(x).map(Value::Number)
}

/// Parse newline-delimited `key:value` pairs. Any bad line fails the whole payload.
pub fn parse_key_values(content: &str) -> Result<Map<String, Value>, PipelineError> {
    let mut parsed = Map::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| PipelineError::Format("Invalid TXT format. Use key:value pairs only.".into()))?;
        let value = parse_number(value)
            .ok_or_else(|| PipelineError::Format("Invalid TXT format. Values must be numeric.".into()))?;
        parsed.insert(normalize_key(key), value);
    }

    if parsed.is_empty() {
        return Err(PipelineError::Format(
            "TXT file is empty or contains no valid key:value pairs".into(),
        ));
    }
    Ok(parsed)
}

/// `auto` infers hourly from the presence of `hr`. An explicit `day` drops `hr`.
pub fn resolve_mode(
    requested: RequestedMode,
    inputs: Map<String, Value>,
) -> Result<TextPayload, PipelineError> {
    let has_hour = inputs.contains_key(HR);
    let (variant, inputs) = match requested {
        RequestedMode::Auto if has_hour => (ModelVariant::Hourly, inputs),
        RequestedMode::Auto => (ModelVariant::Daily, inputs),
        RequestedMode::Hour if !has_hour => {
            return Err(PipelineError::Format(
                "Hourly mode selected but no hour (hr) provided in file".into(),
            ))
        }
        RequestedMode::Hour => (ModelVariant::Hourly, inputs),
        RequestedMode::Day => (
            ModelVariant::Daily,
            inputs.into_iter().filter(|(k, _)| k != HR).collect(),
        ),
    };
    Ok(TextPayload { variant, inputs })
}

pub fn check_required(payload: &TextPayload) -> Result<(), PipelineError> {
    let hour_key = (payload.variant == ModelVariant::Hourly).then_some(HR);
    let missing: Vec<String> = ALWAYS_REQUIRED
        .iter()
        .copied()
        .chain(hour_key)
        .filter(|k| !payload.inputs.contains_key(*k))
        .map(str::to_string)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::MissingFeatures {
            mode: payload.variant.mode(),
            missing,
        })
    }
}

/// Parse, resolve the mode, and check required keys.
pub fn parse_text_payload(content: &str, requested: RequestedMode) -> Result<TextPayload, PipelineError> {
    let inputs = parse_key_values(content)?;
    let payload = resolve_mode(requested, inputs)?;
    check_required(&payload)?;
    Ok(payload)
}
