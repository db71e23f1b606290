use serde_json::Value;

use super::columns::*;
use crate::error::{PipelineError, ValidationError};
use crate::model::ModelVariant;

/// Exactly the 8 daily UI inputs.
pub const DAILY_FIELDS: [&str; 8] = [DTEDAY, SEASON, HOLIDAY, WORKINGDAY, WEATHERSIT, TEMP, ATEMP, HUM];

/// Daily inputs plus hour of day.
pub const HOURLY_FIELDS: [&str; 9] = [DTEDAY, HR, SEASON, HOLIDAY, WORKINGDAY, WEATHERSIT, TEMP, ATEMP, HUM];

/// The field set an interactive entry point accepts.
#[derive(Debug, Clone, Copy)]
pub struct InputContract {
    variant: ModelVariant,
    fields: &'static [&'static str],
}

impl InputContract {
    pub fn daily() -> Self {
        Self {
            variant: ModelVariant::Daily,
            fields: &DAILY_FIELDS,
        }
    }

    pub fn hourly() -> Self {
        Self {
            variant: ModelVariant::Hourly,
            fields: &HOURLY_FIELDS,
        }
    }

    pub fn for_variant(variant: ModelVariant) -> Self {
        match variant {
            ModelVariant::Hourly => Self::hourly(),
            ModelVariant::Daily => Self::daily(),
        }
    }

    pub fn variant(&self) -> ModelVariant {
        self.variant
    }

    pub fn fields(&self) -> &'static [&'static str] {
        self.fields
    }

    /// Keep only contract fields and report every missing one.
    pub fn validate(&self, payload: &Value) -> Result<PredictionRequest, PipelineError> {
        let body = match payload.as_object() {
            Some(map) if !map.is_empty() => map,
            _ => return Err(PipelineError::EmptyBody),
        };

        let mut values = Vec::with_capacity(self.fields.len());
        let mut missing = Vec::new();
        for &field in self.fields {
            match body.get(field) {
                Some(v) if !is_missing(v) => values.push((field, v.clone())),
                _ => missing.push(field.to_string()),
            }
        }

        if !missing.is_empty() {
            return Err(ValidationError { missing }.into());
        }
        Ok(PredictionRequest {
            variant: self.variant,
            values,
        })
    }
}

fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Validated contract fields, in contract order.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRequest {
    variant: ModelVariant,
    values: Vec<(&'static str, Value)>,
}

impl PredictionRequest {
    pub fn variant(&self) -> ModelVariant {
        self.variant
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.iter().find(|(k, _)| *k == field).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn daily_payload() -> Value {
        json!({
            "dteday": "2024-07-04", "season": 2, "holiday": 0, "workingday": 0,
            "weathersit": 1, "temp": 28, "atemp": 30, "hum": 55
        })
    }

    #[test]
    fn daily_contract_has_eight_fields() {
        assert_eq!(InputContract::daily().fields().len(), 8);
        assert_eq!(InputContract::hourly().fields().len(), 9);
        assert!(InputContract::hourly().fields().contains(&"hr"));
        assert!(!InputContract::daily().fields().contains(&"hr"));
    }

    #[test]
    fn missing_hum_is_named_exactly() {
        let mut payload = daily_payload();
        payload.as_object_mut().unwrap().remove("hum");
        match InputContract::daily().validate(&payload) {
            Err(PipelineError::Validation(e)) => assert_eq!(e.missing, vec!["hum".to_string()]),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn null_and_blank_count_as_missing() {
        let payload = json!({
            "dteday": "  ", "hr": null, "season": 1, "holiday": 0, "workingday": 1,
            "weathersit": "", "temp": 10, "atemp": 9, "hum": 40
        });
        match InputContract::hourly().validate(&payload) {
            Err(PipelineError::Validation(e)) => {
                assert_eq!(e.missing, vec!["dteday", "hr", "weathersit"]);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn zero_is_not_missing() {
        let req = InputContract::daily().validate(&daily_payload()).unwrap();
        assert_eq!(req.get("holiday"), Some(&json!(0)));
    }

    #[test]
    fn extra_fields_are_dropped() {
        let mut payload = daily_payload();
        payload["windspeed"] = json!(12);
        payload["hr"] = json!(9);
        let req = InputContract::daily().validate(&payload).unwrap();
        assert!(req.get("windspeed").is_none());
        assert!(req.get("hr").is_none());
        assert_eq!(req.iter().count(), 8);
        assert_eq!(req.variant(), ModelVariant::Daily);
    }

    #[test]
    fn empty_body_is_rejected() {
        assert_eq!(InputContract::daily().validate(&json!({})), Err(PipelineError::EmptyBody));
        assert_eq!(InputContract::daily().validate(&Value::Null), Err(PipelineError::EmptyBody));
        assert_eq!(InputContract::daily().validate(&json!([1, 2])), Err(PipelineError::EmptyBody));
    }
}
