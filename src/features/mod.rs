//! Feature derivation for the demand models.
//!
//! Raw contract fields are validated (`contract`), expanded with calendar
//! features (`date`) and composite features (`derived`), then reindexed to a
//! model's schema (`assembler`). The text upload path has its own parser
//! (`text_file`) that feeds the same assembler.

pub mod assembler;
pub mod contract;
pub mod date;
pub mod derived;
pub mod text_file;

pub use assembler::{coerce_numeric, coerce_numeric_or_zero, FeatureRecord, FeatureVectorAssembler, FillPolicy};
pub use contract::{InputContract, PredictionRequest};
pub use date::{cyclical, parse_date, DateFeatures, HourFeatures, FALLBACK_DATE};
pub use derived::DerivedFeatures;
pub use text_file::{parse_text_payload, RequestedMode, TextPayload};

/// Column names shared by the contract, the derivations and the model schemas.
pub mod columns {
    pub const DTEDAY: &str = "dteday";
    pub const HR: &str = "hr";
    pub const SEASON: &str = "season";
    pub const HOLIDAY: &str = "holiday";
    pub const WORKINGDAY: &str = "workingday";
    pub const WEATHERSIT: &str = "weathersit";
    pub const TEMP: &str = "temp";
    pub const ATEMP: &str = "atemp";
    pub const HUM: &str = "hum";
    pub const WINDSPEED: &str = "windspeed";

    pub const YR: &str = "yr";
    pub const MNTH: &str = "mnth";
    pub const WEEKDAY: &str = "weekday";
    pub const QUARTER: &str = "quarter";
    pub const IS_WEEKEND: &str = "is_weekend";
    pub const MNTH_SIN: &str = "mnth_sin";
    pub const MNTH_COS: &str = "mnth_cos";
    pub const WEEKDAY_SIN: &str = "weekday_sin";
    pub const WEEKDAY_COS: &str = "weekday_cos";
    pub const HR_SIN: &str = "hr_sin";
    pub const HR_COS: &str = "hr_cos";

    pub const IS_PEAK_SEASON: &str = "is_peak_season";
    pub const TEMP_HUMIDITY: &str = "temp_humidity";
    pub const TEMP_WINDSPEED: &str = "temp_windspeed";
    pub const WEATHER_SEVERITY: &str = "weather_severity";
}
