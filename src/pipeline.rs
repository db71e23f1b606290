use serde_json::{Map, Value};

use crate::error::PipelineError;
use crate::features::columns::*;
use crate::features::date::parse_date_value;
use crate::features::{
    coerce_numeric, coerce_numeric_or_zero, parse_date, parse_text_payload, DateFeatures,
    DerivedFeatures, FeatureRecord, FeatureVectorAssembler, HourFeatures, InputContract,
    PredictionRequest, RequestedMode, FALLBACK_DATE,
};
use crate::model::{LoadedModel, ModelRegistry, ModelVariant};
use crate::store::{PredictionDraft, PredictionHistory, PredictionRecord};

static NULL: Value = Value::Null;

/// Date and defaults substituted on the CSV upload path, which carries neither.
pub const CSV_DEFAULT_DATE: &str = "2024-01-01";
const CSV_DEFAULT_SEASON: i64 = 1;
const CSV_DEFAULT_HOLIDAY: i64 = 0;
const CSV_REQUIRED_COLUMNS: [&str; 4] = [TEMP, HUM, WEATHERSIT, WORKINGDAY];

/// Hour used when an interactive request's `hr` is not numeric.
const INTERACTIVE_HOUR_DEFAULT: f64 = 0.0;
/// Hour used when an uploaded file's `hr` is not numeric.
const TEXT_HOUR_DEFAULT: f64 = 12.0;

#[derive(Debug, Clone, PartialEq)]
pub struct TextPrediction {
    pub variant: ModelVariant,
    pub parsed_inputs: Map<String, Value>,
    pub prediction: f64,
}

/// Clamp at zero, round to two decimals.
pub fn finalize_prediction(raw: f64) -> f64 {
    (raw.max(0.0) * 100.0).round() / 100.0
}

/// Add calendar, hour and composite columns to `record`.
/// `hour` is only consulted for the hourly variant.
pub fn derive_features(
    variant: ModelVariant,
    record: &mut FeatureRecord,
    date: &DateFeatures,
    hour: f64,
) {
    record.add_date(date);
    if variant == ModelVariant::Hourly {
        record.add_hour(&HourFeatures::derive(hour));
    }
    let derived = DerivedFeatures::compute(
        variant,
        record.get(TEMP).unwrap_or(&NULL),
        record.get(HUM).unwrap_or(&NULL),
        record.get(WEATHERSIT).unwrap_or(&NULL),
        date,
    );
    record.add_derived(&derived);
}

/// Interactive requests truncate the hour; non-numeric becomes 0.
fn interactive_hour(value: Option<&Value>) -> f64 {
    value.map(coerce_numeric_or_zero).unwrap_or(INTERACTIVE_HOUR_DEFAULT).trunc()
}

/// Uploaded files use the hour as given; non-numeric becomes 12.
fn text_hour(value: Option<&Value>) -> f64 {
    value.and_then(coerce_numeric).unwrap_or(TEXT_HOUR_DEFAULT)
}

/// Shared feature pipeline behind the daily, hourly and upload entry points.
pub struct Pipeline {
    models: ModelRegistry,
    assembler: FeatureVectorAssembler,
    log_vectors: bool,
}

impl Pipeline {
    pub fn new(models: ModelRegistry) -> Self {
        Self {
            models,
            assembler: FeatureVectorAssembler::new(),
            log_vectors: false,
        }
    }

    pub fn with_assembler(mut self, assembler: FeatureVectorAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn with_vector_logging(mut self, enabled: bool) -> Self {
        self.log_vectors = enabled;
        self
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    fn model(&self, variant: ModelVariant) -> Result<&LoadedModel, PipelineError> {
        self.models
            .get(variant)
            .ok_or(PipelineError::ModelUnavailable(variant))
    }

    /// Validate an interactive payload and build its feature vector.
    pub fn prepare(
        &self,
        variant: ModelVariant,
        payload: &Value,
    ) -> Result<(PredictionRequest, Vec<f32>), PipelineError> {
        let request = InputContract::for_variant(variant).validate(payload)?;
        let model = self.model(variant)?;

        let date = parse_date_value(request.get(DTEDAY).unwrap_or(&NULL))?;
        let mut record = FeatureRecord::from_request(&request);
        let hour = interactive_hour(request.get(HR));
        derive_features(variant, &mut record, &DateFeatures::derive(date), hour);

        let vector = self.assembler.assemble(record, &model.schema)?;
        Ok((request, vector))
    }

    pub fn predict_daily(
        &self,
        payload: &Value,
        history: &PredictionHistory,
    ) -> Result<PredictionRecord, PipelineError> {
        self.predict_interactive(ModelVariant::Daily, payload, history)
    }

    pub fn predict_hourly(
        &self,
        payload: &Value,
        history: &PredictionHistory,
    ) -> Result<PredictionRecord, PipelineError> {
        self.predict_interactive(ModelVariant::Hourly, payload, history)
    }

    fn predict_interactive(
        &self,
        variant: ModelVariant,
        payload: &Value,
        history: &PredictionHistory,
    ) -> Result<PredictionRecord, PipelineError> {
        let (request, vector) = self.prepare(variant, payload)?;
        let predicted_demand = self.score(variant, &vector)?;

        let field = |name: &str| request.get(name).cloned().unwrap_or(Value::Null);
        let hour = match variant {
            ModelVariant::Hourly => Some(interactive_hour(request.get(HR)) as i64),
            ModelVariant::Daily => None,
        };
        Ok(history.record(PredictionDraft {
            variant,
            predicted_demand,
            date: field(DTEDAY),
            hour,
            season: field(SEASON),
            weathersit: field(WEATHERSIT),
            temp: field(TEMP),
            hum: field(HUM),
            workingday: field(WORKINGDAY),
            holiday: field(HOLIDAY),
        }))
    }

    /// Predict from an uploaded `key:value` text file. Not recorded in history.
    pub fn predict_from_text(
        &self,
        content: &str,
        requested: RequestedMode,
    ) -> Result<TextPrediction, PipelineError> {
        let payload = parse_text_payload(content, requested)?;
        let variant = payload.variant;
        let model = self.model(variant)?;

        let date = DateFeatures::derive(parse_date(FALLBACK_DATE)?);
        let mut record = FeatureRecord::new();
        for (k, v) in &payload.inputs {
            record.insert(k, v.clone());
        }
        let hour = text_hour(record.get(HR));
        derive_features(variant, &mut record, &date, hour);
        record.coerce_columns(model.schema.names().iter().map(String::as_str));

        let vector = self.assembler.assemble(record, &model.schema)?;
        let prediction = self.score(variant, &vector)?;
        Ok(TextPrediction {
            variant,
            parsed_inputs: payload.inputs,
            prediction,
        })
    }

    /// Predict from the first data row of a CSV upload with the daily model.
    pub fn predict_from_csv(&self, content: &str) -> Result<f64, PipelineError> {
        let row = parse_csv_first_row(content)?;
        let missing: Vec<String> = CSV_REQUIRED_COLUMNS
            .iter()
            .filter(|c| !row.contains_key(**c))
            .map(|c| c.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::Format(format!("Missing required columns: {:?}", missing)));
        }

        let int_col = |name: &str| -> Result<i64, PipelineError> {
            let raw = &row[name];
            raw.parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(|f| f.trunc() as i64)
                .ok_or_else(|| csv_value_error(name, raw))
        };
        let float_col = |name: &str| -> Result<f64, PipelineError> {
            let raw = &row[name];
            raw.parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .ok_or_else(|| csv_value_error(name, raw))
        };

        let temp = float_col(TEMP)?;
        let mut record = FeatureRecord::new();
        record.insert(DTEDAY, CSV_DEFAULT_DATE);
        record.insert(SEASON, CSV_DEFAULT_SEASON);
        record.insert(HOLIDAY, CSV_DEFAULT_HOLIDAY);
        record.insert(WORKINGDAY, int_col(WORKINGDAY)?);
        record.insert(WEATHERSIT, int_col(WEATHERSIT)?);
        record.insert(TEMP, temp);
        record.insert(ATEMP, temp);
        record.insert(HUM, float_col(HUM)?);
        if row.contains_key(WINDSPEED) {
            record.insert(WINDSPEED, float_col(WINDSPEED)?);
        }

        let variant = ModelVariant::Daily;
        let model = self.model(variant)?;
        let date = DateFeatures::derive(parse_date(CSV_DEFAULT_DATE)?);
        derive_features(variant, &mut record, &date, INTERACTIVE_HOUR_DEFAULT);

        let vector = self.assembler.assemble(record, &model.schema)?;
        self.score(variant, &vector)
    }

    fn score(&self, variant: ModelVariant, vector: &[f32]) -> Result<f64, PipelineError> {
        let model = self.model(variant)?;
        if self.log_vectors {
            log_vector(variant, model.schema.names(), vector);
        }
        let raw = model
            .predict(vector)
            .map_err(|e| PipelineError::Prediction(format!("{:#}", e)))?;
        let prediction = finalize_prediction(raw);
        tracing::info!(variant = variant.label(), in_dim = vector.len(), raw, prediction, "prediction");
        Ok(prediction)
    }
}

fn csv_value_error(column: &str, raw: &str) -> PipelineError {
    PipelineError::Format(format!(
        "Error parsing CSV file: column {} has non-numeric value {:?}",
        column, raw
    ))
}

/// Header plus first data row as `column -> raw cell`.
fn parse_csv_first_row(content: &str) -> Result<std::collections::HashMap<String, String>, PipelineError> {
    let content = content.trim_start_matches('\u{feff}');
    let mut lines = content.lines().map(str::trim).filter(|l| !l.is_empty());
    let header = lines
        .next()
        .ok_or_else(|| PipelineError::Format("CSV file is empty".into()))?;
    let row = lines
        .next()
        .ok_or_else(|| PipelineError::Format("CSV file is empty".into()))?;

    let cells = |line: &str| -> Vec<String> {
        line.split(',')
            .map(|c| c.trim().trim_matches('"').trim().to_string())
            .collect()
    };
    Ok(cells(header).into_iter().zip(cells(row)).collect())
}

/// Summary stats for spotting all-zero or misordered vectors.
fn log_vector(variant: ModelVariant, names: &[String], vec: &[f32]) {
    let nz = vec.iter().filter(|x| **x != 0.0).count();
    let mean = if vec.is_empty() { 0.0 } else { vec.iter().sum::<f32>() / (vec.len() as f32) };
    let std = if vec.len() < 2 {
        0.0
    } else {
        (vec.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / (vec.len() as f32)).sqrt()
    };
    let sample: Vec<String> = names
        .iter()
        .zip(vec)
        .take(6)
        .map(|(name, v)| format!("{}={:.3}", name, v))
        .collect();
    tracing::info!(
        "vector variant={} in_dim={} nonzero={} mean={:.3} std={:.3} sample=[{}]",
        variant.label(),
        vec.len(),
        nz,
        mean,
        std,
        sample.join(", ")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FillPolicy;
    use crate::model::{FeatureSchema, LoadedModel, Regressor};
    use anyhow::bail;
    use serde_json::json;

    struct Constant(f64);

    impl Regressor for Constant {
        fn predict(&self, _x: &[f32]) -> anyhow::Result<f64> {
            Ok(self.0)
        }
    }

    struct Failing;

    impl Regressor for Failing {
        fn predict(&self, _x: &[f32]) -> anyhow::Result<f64> {
            bail!("out of memory")
        }
    }

    fn daily_schema() -> FeatureSchema {
        FeatureSchema::new([
            "season", "yr", "mnth", "holiday", "weekday", "workingday", "weathersit", "temp",
            "atemp", "hum", "quarter", "is_weekend", "mnth_sin", "mnth_cos", "weekday_sin",
            "weekday_cos", "is_peak_season", "temp_humidity", "temp_windspeed", "weather_severity",
        ])
    }

    fn pipeline_with(daily: Box<dyn Regressor>) -> Pipeline {
        Pipeline::new(ModelRegistry::new(None, Some(LoadedModel::new(daily_schema(), daily))))
    }

    fn july_fourth() -> Value {
        json!({
            "dteday": "2024-07-04", "season": 2, "holiday": 0, "workingday": 0,
            "weathersit": 1, "temp": 28, "atemp": 30, "hum": 55
        })
    }

    #[test]
    fn finalize_clamps_and_rounds() {
        assert_eq!(finalize_prediction(-12.0), 0.0);
        assert_eq!(finalize_prediction(123.456), 123.46);
        assert_eq!(finalize_prediction(f64::NAN), 0.0);
    }

    #[test]
    fn hour_defaults_differ_by_path() {
        assert_eq!(interactive_hour(Some(&json!("7.9"))), 7.0);
        assert_eq!(interactive_hour(Some(&json!("noon"))), 0.0);
        assert_eq!(text_hour(Some(&json!(7.5))), 7.5);
        assert_eq!(text_hour(None), 12.0);
    }

    #[test]
    fn daily_vector_matches_schema_positions() {
        let pipeline = pipeline_with(Box::new(Constant(1.0)));
        let (_, v) = pipeline.prepare(ModelVariant::Daily, &july_fourth()).unwrap();
        let schema = daily_schema();
        assert_eq!(v.len(), schema.len());
        let at = |name: &str| v[schema.position(name).unwrap()];
        assert_eq!(at("yr"), 2024.0);
        assert_eq!(at("mnth"), 7.0);
        assert_eq!(at("weekday"), 3.0);
        assert_eq!(at("is_weekend"), 0.0);
        assert_eq!(at("is_peak_season"), 1.0);
        assert_eq!(at("temp_humidity"), 1540.0);
        assert_eq!(at("temp_windspeed"), 0.0);
        assert_eq!(at("weather_severity"), 1.0);
    }

    #[test]
    fn missing_model_is_reported_after_validation() {
        let pipeline = pipeline_with(Box::new(Constant(1.0)));
        let history = PredictionHistory::default();
        let err = pipeline.predict_hourly(&json!({"hr": 3}), &history).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));

        let mut payload = july_fourth();
        payload["hr"] = json!(8);
        let err = pipeline.predict_hourly(&payload, &history).unwrap_err();
        assert_eq!(err, PipelineError::ModelUnavailable(ModelVariant::Hourly));
        assert!(history.is_empty());
    }

    #[test]
    fn bad_date_is_a_user_error() {
        let pipeline = pipeline_with(Box::new(Constant(1.0)));
        let mut payload = july_fourth();
        payload["dteday"] = json!("yesterday");
        let err = pipeline.predict_daily(&payload, &PredictionHistory::default()).unwrap_err();
        assert!(matches!(err, PipelineError::DateParse(_)));
        assert!(err.is_user_error());
    }

    #[test]
    fn model_failure_maps_to_prediction_error() {
        let pipeline = pipeline_with(Box::new(Failing));
        let err = pipeline.predict_daily(&july_fourth(), &PredictionHistory::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Prediction(ref m) if m.contains("out of memory")));
    }

    #[test]
    fn daily_prediction_is_recorded() {
        let pipeline = pipeline_with(Box::new(Constant(-5.0)));
        let history = PredictionHistory::default();
        let rec = pipeline.predict_daily(&july_fourth(), &history).unwrap();
        assert_eq!(rec.predicted_demand, 0.0);
        assert_eq!(rec.prediction_type, "Daily");
        assert_eq!(rec.date, json!("2024-07-04"));
        assert_eq!(rec.peak_status, "Off-Peak");
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn disabled_fill_surfaces_alignment_error() {
        let schema = FeatureSchema::new(["temp", "pressure"]);
        let pipeline = Pipeline::new(ModelRegistry::new(
            None,
            Some(LoadedModel::new(schema, Box::new(Constant(1.0)))),
        ))
        .with_assembler(FeatureVectorAssembler::with_fill_policy(FillPolicy::Disabled));
        let err = pipeline.prepare(ModelVariant::Daily, &july_fourth()).unwrap_err();
        assert_eq!(err, PipelineError::FeatureAlignment { prepared: 1, expected: 2 });
    }

    #[test]
    fn csv_first_row_is_used() {
        let pipeline = pipeline_with(Box::new(Constant(42.424)));
        let csv = "temp,hum,weathersit,workingday,windspeed\n20,50,2,1,7\n30,90,3,0,1\n";
        assert_eq!(pipeline.predict_from_csv(csv).unwrap(), 42.42);
    }

    #[test]
    fn csv_with_bom_is_accepted() {
        let pipeline = pipeline_with(Box::new(Constant(7.0)));
        let csv = "\u{feff}temp,hum,weathersit,workingday\n20,50,1,1\n";
        assert_eq!(pipeline.predict_from_csv(csv).unwrap(), 7.0);
    }

    #[test]
    fn csv_errors() {
        let pipeline = pipeline_with(Box::new(Constant(1.0)));
        assert_eq!(
            pipeline.predict_from_csv("temp,hum\n").unwrap_err().to_string(),
            "CSV file is empty"
        );
        assert_eq!(
            pipeline.predict_from_csv("temp,hum\n1,2\n").unwrap_err().to_string(),
            r#"Missing required columns: ["weathersit", "workingday"]"#
        );
        assert!(pipeline
            .predict_from_csv("temp,hum,weathersit,workingday\nwarm,2,1,1\n")
            .is_err());
    }
}
