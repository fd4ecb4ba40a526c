use anyhow::Result;
use log::debug;
use polars::frame::DataFrame;

use crate::aggregate::MonthlyBucket;
use crate::clean::CleanReport;
use crate::cluster::VaccineClusters;
use crate::config::Config;
use crate::forecast::{ForecastPoint, TrendStrategy};
use crate::model::{EvalMetrics, TrainedPipeline};

// Re-exports
pub use column_names as COL;

// Modules
pub mod aggregate;
pub mod clean;
pub mod cluster;
pub mod column_names;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod forecast;
pub mod model;

/// Type for vaxtrend data and API
pub struct Vaxtrend {
    pub config: Config,
}

impl Default for Vaxtrend {
    fn default() -> Self {
        Self::new()
    }
}

impl Vaxtrend {
    /// Setup the Vaxtrend object with default configuration
    pub fn new() -> Self {
        Self::new_with_config(Config::default())
    }

    /// Setup the Vaxtrend object with custom configuration
    pub fn new_with_config(config: Config) -> Self {
        debug!("config: {config:?}");
        Self { config }
    }

    /// Clean the raw registry export into the configured cleaned file.
    pub fn clean(&self) -> Result<CleanReport> {
        clean::clean_registry(&self.config.raw_path, &self.config.clean_path)
    }

    /// Load the cleaned registry produced by [`Vaxtrend::clean`].
    pub fn load_clean(&self) -> Result<DataFrame> {
        clean::read_registry(&self.config.clean_path)
    }

    /// Monthly totals of the cleaned registry, chronologically ordered.
    pub fn monthly(&self) -> Result<Vec<MonthlyBucket>> {
        aggregate::monthly_series(&self.load_clean()?)
    }

    /// Project vaccination volume `horizon` months ahead.
    pub fn forecast(&self, horizon: usize, strategy: TrendStrategy) -> Result<Vec<ForecastPoint>> {
        forecast::forecast_monthly(&self.monthly()?, horizon, strategy)
    }

    /// Train the scaler + forest pipeline with a chronological hold-out and
    /// persist the artifacts under the configured models directory.
    pub fn train(&self) -> Result<(TrainedPipeline, EvalMetrics)> {
        model::train_and_save(&self.monthly()?, &self.config.models_dir)
    }

    /// Group vaccine names by textual similarity.
    pub fn cluster(&self, k: usize, seed: u64) -> Result<VaccineClusters> {
        cluster::cluster_vaccine_names(&self.load_clean()?, k, seed)
    }

    /// Render the chart dashboard from the cleaned registry.
    pub fn render_dashboard(&self, horizon: usize) -> Result<()> {
        dashboard::write_dashboard(
            &self.load_clean()?,
            &self.config.dashboard_path,
            horizon,
        )
    }
}
