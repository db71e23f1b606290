use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, sync::Arc};

use crate::config::ModelPaths;

#[derive(Deserialize)]
struct MetaJson {
    feat_list: Vec<String>,
    in_dim: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelVariant {
    Hourly,
    Daily,
}

impl ModelVariant {
    /// History / dashboard label: "Hourly" or "Daily".
    pub fn label(self) -> &'static str {
        match self {
            ModelVariant::Hourly => "Hourly",
            ModelVariant::Daily => "Daily",
        }
    }

    /// Upload mode name: "hour" or "day".
    pub fn mode(self) -> &'static str {
        match self {
            ModelVariant::Hourly => "hour",
            ModelVariant::Daily => "day",
        }
    }
}

/// Ordered feature names a trained model expects. Authoritative input order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    names: Vec<String>,
}

impl FeatureSchema {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// Read `feat_list` from a model's meta.json.
pub fn load_schema(meta_path: &Path) -> Result<FeatureSchema> {
    let meta_txt = fs::read_to_string(meta_path)
        .with_context(|| format!("failed to read meta at {}", meta_path.display()))?;
    let meta: MetaJson =
        serde_json::from_str(&meta_txt).with_context(|| "failed to parse meta.json")?;

    if meta.feat_list.is_empty() {
        bail!("meta at {} has an empty feat_list", meta_path.display());
    }
    if let Some(in_dim) = meta.in_dim {
        if in_dim != meta.feat_list.len() {
            tracing::warn!(
                "meta.in_dim ({}) != feat_list.len() ({}); using feat_list.len()",
                in_dim,
                meta.feat_list.len()
            );
        }
    }
    Ok(FeatureSchema::new(meta.feat_list))
}

/// A trained regressor: ordered feature vector in, one demand value out.
pub trait Regressor: Send + Sync {
    fn predict(&self, x: &[f32]) -> Result<f64>;
}

#[derive(Deserialize)]
struct LinearJson {
    coefficients: Vec<f64>,
    intercept: f64,
}

/// Linear model exported as `{ "coefficients": [...], "intercept": f }`.
///
/// The artifact is written from a fitted linear model's `coef_` and
/// `intercept_`, with coefficients in the same order as the `feat_list`
/// of the variant's `meta.json`. The vector handed to `predict` is already
/// reindexed to that order.
#[derive(Debug, Clone)]
pub struct LinearRegressor {
    coefficients: Vec<f64>,
    intercept: f64,
}

impl LinearRegressor {
    pub fn new(coefficients: Vec<f64>, intercept: f64) -> Self {
        Self {
            coefficients,
            intercept,
        }
    }

    pub fn load(path: &Path, in_dim: usize) -> Result<Self> {
        let txt = fs::read_to_string(path)
            .with_context(|| format!("failed to read linear model {}", path.display()))?;
        let raw: LinearJson = serde_json::from_str(&txt)
            .with_context(|| format!("failed to parse linear model {}", path.display()))?;
        if raw.coefficients.len() != in_dim {
            bail!(
                "linear model has {} coefficients, schema expects {}",
                raw.coefficients.len(),
                in_dim
            );
        }
        Ok(Self::new(raw.coefficients, raw.intercept))
    }
}

impl Regressor for LinearRegressor {
    fn predict(&self, x: &[f32]) -> Result<f64> {
        if x.len() != self.coefficients.len() {
            bail!(
                "feature length mismatch: got {}, expected {}",
                x.len(),
                self.coefficients.len()
            );
        }
        let dot: f64 = self
            .coefficients
            .iter()
            .zip(x)
            .map(|(c, v)| c * f64::from(*v))
            .sum();
        Ok(dot + self.intercept)
    }
}

#[cfg(feature = "torch")]
pub use torch::TorchRegressor;

#[cfg(feature = "torch")]
mod torch {
    use super::Regressor;
    use anyhow::{bail, Context, Result};
    use std::path::Path;
    use tch::{kind::Kind, CModule, Device, Tensor};

    /// TorchScript regressor; output is expected to hold a single value.
    pub struct TorchRegressor {
        model: CModule,
        device: Device,
        in_dim: usize,
    }

    impl TorchRegressor {
        pub fn load(path: &Path, in_dim: usize) -> Result<Self> {
            let device = Device::Cpu;
            let model = CModule::load_on_device(path, device)
                .with_context(|| format!("failed to load TorchScript {}", path.display()))?;

            // Check output shape with a dummy forward
            let dummy = Tensor::zeros([1, in_dim as i64], (Kind::Float, device));
            let t = model.forward_ts(&[dummy])?;
            if t.numel() != 1 {
                bail!("unexpected model output size: {:?}", t.size());
            }
            Ok(Self {
                model,
                device,
                in_dim,
            })
        }
    }

    impl Regressor for TorchRegressor {
        fn predict(&self, x: &[f32]) -> Result<f64> {
            if x.len() != self.in_dim {
                bail!("expected {} features, got {}", self.in_dim, x.len());
            }
            let input = Tensor::from_slice(x)
                .reshape([1, self.in_dim as i64])
                .to_device(self.device);
            let t = self.model.forward_ts(&[input])?;
            Ok(t.to_kind(Kind::Double).reshape([-1]).double_value(&[0]))
        }
    }

}

/// A variant's schema paired with its regressor.
pub struct LoadedModel {
    pub schema: Arc<FeatureSchema>,
    regressor: Box<dyn Regressor>,
}

impl LoadedModel {
    pub fn new(schema: FeatureSchema, regressor: Box<dyn Regressor>) -> Self {
        Self {
            schema: Arc::new(schema),
            regressor,
        }
    }

    /// Load meta.json plus the model artifact it describes.
    /// `.json` artifacts are linear models; anything else is TorchScript.
    pub fn load(model_path: &Path, meta_path: &Path) -> Result<Self> {
        let schema = load_schema(meta_path)?;
        let in_dim = schema.len();
        let is_json = model_path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let regressor: Box<dyn Regressor> = if is_json {
            Box::new(LinearRegressor::load(model_path, in_dim)?)
        } else {
            load_torch(model_path, in_dim)?
        };

        let model = Self::new(schema, regressor);
        // Warmup to make sure the artifact accepts the schema's width
        model
            .predict(&vec![0.0; in_dim])
            .with_context(|| format!("warmup forward failed for {}", model_path.display()))?;
        Ok(model)
    }

    pub fn predict(&self, x: &[f32]) -> Result<f64> {
        if x.len() != self.schema.len() {
            bail!(
                "feature length mismatch: got {}, expected {}",
                x.len(),
                self.schema.len()
            );
        }
        self.regressor.predict(x)
    }
}

#[cfg(feature = "torch")]
fn load_torch(path: &Path, in_dim: usize) -> Result<Box<dyn Regressor>> {
    Ok(Box::new(TorchRegressor::load(path, in_dim)?))
}

#[cfg(not(feature = "torch"))]
fn load_torch(path: &Path, _in_dim: usize) -> Result<Box<dyn Regressor>> {
    bail!(
        "{} looks like a TorchScript model but the `torch` feature is disabled",
        path.display()
    )
}

/// Both model variants; a variant that failed to load stays `None`.
#[derive(Default)]
pub struct ModelRegistry {
    hourly: Option<LoadedModel>,
    daily: Option<LoadedModel>,
}

impl ModelRegistry {
    pub fn new(hourly: Option<LoadedModel>, daily: Option<LoadedModel>) -> Self {
        Self { hourly, daily }
    }

    /// Load both variants, degrading instead of failing when one is missing.
    pub fn load(hourly: &ModelPaths, daily: &ModelPaths) -> Self {
        Self {
            hourly: load_variant(ModelVariant::Hourly, hourly),
            daily: load_variant(ModelVariant::Daily, daily),
        }
    }

    pub fn get(&self, variant: ModelVariant) -> Option<&LoadedModel> {
        match variant {
            ModelVariant::Hourly => self.hourly.as_ref(),
            ModelVariant::Daily => self.daily.as_ref(),
        }
    }

    pub fn is_loaded(&self, variant: ModelVariant) -> bool {
        self.get(variant).is_some()
    }

    pub fn feature_count(&self, variant: ModelVariant) -> usize {
        self.get(variant).map(|m| m.schema.len()).unwrap_or(0)
    }
}

fn load_variant(variant: ModelVariant, paths: &ModelPaths) -> Option<LoadedModel> {
    if !paths.model.exists() {
        tracing::warn!(
            variant = variant.label(),
            path = %paths.model.display(),
            "model not found, variant disabled"
        );
        return None;
    }
    match LoadedModel::load(&paths.model, &paths.meta) {
        Ok(model) => {
            tracing::info!(
                variant = variant.label(),
                "loaded model; feat_list[{}]: {:?}",
                model.schema.len(),
                model.schema.names()
            );
            Some(model)
        }
        Err(e) => {
            tracing::warn!(variant = variant.label(), error = %format!("{:#}", e), "failed to load model, variant disabled");
            None
        }
    }
}
