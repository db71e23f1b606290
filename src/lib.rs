//! Bike-sharing demand prediction service.
//!
//! Raw form, text-file and CSV inputs are turned into feature vectors that
//! line up with a trained model's `feat_list`, scored, and kept in a bounded
//! in-memory history. `api` exposes it all over HTTP.

pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod features;
pub mod model;
pub mod pipeline;
pub mod store;

pub use error::{ApiError, PipelineError, ValidationError};
pub use model::{FeatureSchema, LoadedModel, ModelRegistry, ModelVariant, Regressor};
pub use pipeline::Pipeline;
