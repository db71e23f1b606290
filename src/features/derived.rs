use serde_json::Value;

use super::assembler::coerce_numeric_or_zero;
use super::date::DateFeatures;
use crate::model::ModelVariant;

/// Northern-hemisphere summer. Fixed policy, not configurable.
pub const PEAK_SEASON_MONTHS: [u32; 3] = [6, 7, 8];

pub fn is_peak_season(mnth: u32) -> u8 {
    u8::from(PEAK_SEASON_MONTHS.contains(&mnth))
}

pub fn temp_humidity(temp: &Value, hum: &Value) -> f64 {
    coerce_numeric_or_zero(temp) * coerce_numeric_or_zero(hum)
}

/// Always zero: windspeed is not collected, daily sends a constant and
/// hourly sends `temp * 0`.
// FIXME: should multiply by windspeed once the UI collects it.
pub fn temp_windspeed(variant: ModelVariant, temp: &Value) -> f64 {
    match variant {
        ModelVariant::Daily => 0.0,
        ModelVariant::Hourly => coerce_numeric_or_zero(temp) * 0.0,
    }
}

/// Alias of `weathersit`, passed through untouched.
pub fn weather_severity(weathersit: &Value) -> Value {
    weathersit.clone()
}

#[derive(Debug, Clone, PartialEq)]
pub struct DerivedFeatures {
    pub is_peak_season: u8,
    pub temp_humidity: f64,
    pub temp_windspeed: f64,
    pub weather_severity: Value,
    /// Hourly mode only: windspeed placeholder sent as 0.
    pub windspeed: Option<f64>,
}

impl DerivedFeatures {
    pub fn compute(
        variant: ModelVariant,
        temp: &Value,
        hum: &Value,
        weathersit: &Value,
        date: &DateFeatures,
    ) -> Self {
        Self {
            is_peak_season: is_peak_season(date.mnth),
            temp_humidity: temp_humidity(temp, hum),
            temp_windspeed: temp_windspeed(variant, temp),
            weather_severity: weather_severity(weathersit),
            windspeed: match variant {
                ModelVariant::Hourly => Some(0.0),
                ModelVariant::Daily => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::date::{parse_date, DateFeatures};
    use serde_json::json;

    #[test]
    fn peak_season_is_june_to_august() {
        let peak: Vec<u32> = (1..=12).filter(|m| is_peak_season(*m) == 1).collect();
        assert_eq!(peak, vec![6, 7, 8]);
    }

    #[test]
    fn temp_humidity_coerces_bad_inputs_to_zero() {
        assert_eq!(temp_humidity(&json!(28), &json!(55)), 1540.0);
        assert_eq!(temp_humidity(&json!("20.5"), &json!(2)), 41.0);
        assert_eq!(temp_humidity(&json!("warm"), &json!(55)), 0.0);
    }

    #[test]
    fn temp_windspeed_is_zero_in_both_modes() {
        assert_eq!(temp_windspeed(ModelVariant::Daily, &json!(30)), 0.0);
        assert_eq!(temp_windspeed(ModelVariant::Hourly, &json!(30)), 0.0);
        assert_eq!(temp_windspeed(ModelVariant::Hourly, &json!("n/a")), 0.0);
    }

    #[test]
    fn weather_severity_mirrors_code_verbatim() {
        assert_eq!(weather_severity(&json!(3)), json!(3));
        assert_eq!(weather_severity(&json!("2")), json!("2"));
    }

    #[test]
    fn compute_for_july_daily() {
        let date = DateFeatures::derive(parse_date("2024-07-04").unwrap());
        let d = DerivedFeatures::compute(ModelVariant::Daily, &json!(28), &json!(55), &json!(1), &date);
        assert_eq!(d.is_peak_season, 1);
        assert_eq!(d.temp_humidity, 1540.0);
        assert_eq!(d.temp_windspeed, 0.0);
        assert_eq!(d.weather_severity, json!(1));
        assert_eq!(d.windspeed, None);

        let h = DerivedFeatures::compute(ModelVariant::Hourly, &json!(28), &json!(55), &json!(1), &date);
        assert_eq!(h.windspeed, Some(0.0));
    }
}
