use std::str::FromStr;

use clap::{command, Args, Parser, Subcommand};
use enum_dispatch::enum_dispatch;
use log::info;
use spinners::{Spinner, Spinners};
use vaxtrend::config::Config;
use vaxtrend::forecast::{self, TrendStrategy, DEFAULT_HORIZON};
use vaxtrend::{aggregate, cluster, Vaxtrend, COL};

use crate::display::{
    display_clusters, display_forecast, display_group_forecasts, display_location_forecasts,
    display_metrics, display_monthly_series, display_summary_counts,
};
use crate::error::VaxtrendCliResult;

const DEFAULT_PROGRESS_SPINNER: Spinners = Spinners::Dots;
const COMPLETE_PROGRESS_STRING: &str = "✔";
const RUNNING_TAIL_STRING: &str = "...";
const TRAINING_STRING: &str = "Training forecast model";

const TOP_N: usize = 10;

/// Trait that defines what to run when a given subcommand is invoked.
#[enum_dispatch]
pub trait RunCommand {
    fn run(&self, config: Config) -> VaxtrendCliResult<()>;
}

/// The `clean` command turns the raw registry export into the cleaned file
/// every other command reads.
#[derive(Args, Debug)]
pub struct CleanCommand {
    #[arg(short = 'i', long, help = "Raw registry CSV (defaults to the configured path)")]
    input: Option<String>,
    #[arg(short = 'o', long, help = "Cleaned output CSV (defaults to the configured path)")]
    output: Option<String>,
}

impl RunCommand for CleanCommand {
    fn run(&self, config: Config) -> VaxtrendCliResult<()> {
        info!("Running `clean` subcommand");
        let input = self.input.clone().unwrap_or(config.raw_path.clone());
        let output = self.output.clone().unwrap_or(config.clean_path.clone());
        let report = vaxtrend::clean::clean_registry(&input, &output)?;
        println!(
            "Cleaned {} rows into {} ({} rows removed)",
            report.rows_read,
            output,
            report.rows_read - report.rows_written
        );
        Ok(())
    }
}

/// The `train` command fits the scaler + random-forest pipeline with a
/// chronological hold-out and persists the artifacts.
#[derive(Args, Debug)]
pub struct TrainCommand {
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for TrainCommand {
    fn run(&self, config: Config) -> VaxtrendCliResult<()> {
        info!("Running `train` subcommand");
        let sp = (!self.quiet).then(|| {
            Spinner::with_timer(
                DEFAULT_PROGRESS_SPINNER,
                TRAINING_STRING.to_string() + RUNNING_TAIL_STRING,
            )
        });
        let vaxtrend = Vaxtrend::new_with_config(config);
        let (_, metrics) = vaxtrend.train()?;
        if let Some(mut s) = sp {
            s.stop_with_symbol(COMPLETE_PROGRESS_STRING);
        }
        println!(
            "Model artifacts written to {}",
            vaxtrend.config.models_dir
        );
        display_metrics(&metrics);
        Ok(())
    }
}

/// The `forecast` command projects vaccination volume for the coming
/// months, with per-group and per-site breakdowns.
#[derive(Args, Debug)]
pub struct ForecastCommand {
    #[arg(
        short = 's',
        long,
        value_name = "linear|forest",
        default_value = "linear",
        help = "Fitting strategy for the aggregate projection"
    )]
    strategy: String,
    #[arg(
        long,
        default_value_t = DEFAULT_HORIZON,
        help = "Number of months to project"
    )]
    horizon: usize,
    #[arg(long, default_value_t = false, help = "Also project per priority group")]
    groups: bool,
    #[arg(long, default_value_t = false, help = "Also project per vaccination site")]
    locations: bool,
}

impl RunCommand for ForecastCommand {
    fn run(&self, config: Config) -> VaxtrendCliResult<()> {
        info!("Running `forecast` subcommand");
        let strategy = TrendStrategy::from_str(&self.strategy)
            .map_err(|_| anyhow::anyhow!("unknown strategy: {}", self.strategy))?;
        let vaxtrend = Vaxtrend::new_with_config(config);
        let buckets = vaxtrend.monthly()?;
        let points = forecast::forecast_monthly(&buckets, self.horizon, strategy)?;
        display_monthly_series(&buckets);
        display_forecast(&points);

        if self.groups || self.locations {
            let df = vaxtrend.load_clean()?;
            if self.groups {
                display_group_forecasts(&forecast::forecast_by_group(&df, &points)?);
            }
            if self.locations {
                display_location_forecasts(&forecast::forecast_by_location(&df, self.horizon)?);
            }
        }
        Ok(())
    }
}

/// The `cluster` command groups vaccine names by textual similarity.
#[derive(Args, Debug)]
pub struct ClusterCommand {
    #[arg(short = 'k', long = "clusters", default_value_t = cluster::DEFAULT_K, help = "Number of clusters")]
    k: usize,
    #[arg(long, default_value_t = cluster::DEFAULT_SEED, help = "Random seed")]
    seed: u64,
}

impl RunCommand for ClusterCommand {
    fn run(&self, config: Config) -> VaxtrendCliResult<()> {
        info!("Running `cluster` subcommand");
        let vaxtrend = Vaxtrend::new_with_config(config);
        let clusters = vaxtrend.cluster(self.k, self.seed)?;
        display_clusters(&clusters, TOP_N);
        Ok(())
    }
}

/// The `summary` command shows the cleaned registry's distributions.
#[derive(Args, Debug)]
pub struct SummaryCommand {
    #[arg(long, default_value_t = TOP_N, help = "Rows shown per distribution")]
    max_results: usize,
}

impl RunCommand for SummaryCommand {
    fn run(&self, config: Config) -> VaxtrendCliResult<()> {
        info!("Running `summary` subcommand");
        let vaxtrend = Vaxtrend::new_with_config(config);
        let df = vaxtrend.load_clean()?;
        display_monthly_series(&aggregate::monthly_series(&df)?);
        display_summary_counts(&[
            (
                "Vaccine",
                aggregate::top_categories(&df, COL::VACINA, self.max_results)?,
            ),
            (
                "Sex",
                aggregate::top_categories(&df, COL::SEXO, self.max_results)?,
            ),
            (
                "Priority group",
                aggregate::top_categories(&df, COL::GRUPO, self.max_results)?,
            ),
            (
                "Vaccination site",
                aggregate::top_categories(&df, COL::LOCAL_VACINACAO, self.max_results)?,
            ),
            (
                "Dose",
                aggregate::top_categories(&df, COL::DOSE_TIPO, self.max_results)?,
            ),
        ]);
        Ok(())
    }
}

/// The `dashboard` command renders every chart into a static HTML page.
#[derive(Args, Debug)]
pub struct DashboardCommand {
    #[arg(short = 'o', long, help = "Output page (defaults to the configured path)")]
    output: Option<String>,
    #[arg(
        long,
        default_value_t = DEFAULT_HORIZON,
        help = "Number of months to project in the forecast charts"
    )]
    horizon: usize,
}

impl RunCommand for DashboardCommand {
    fn run(&self, config: Config) -> VaxtrendCliResult<()> {
        info!("Running `dashboard` subcommand");
        let vaxtrend = Vaxtrend::new_with_config(config);
        let output = self
            .output
            .clone()
            .unwrap_or(vaxtrend.config.dashboard_path.clone());
        let df = vaxtrend.load_clean()?;
        vaxtrend::dashboard::write_dashboard(&df, &output, self.horizon)?;
        println!("Dashboard written to {output}");
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(version, about = "vaxtrend: vaccination registry analytics", long_about = None, name = "vaxtrend")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
    #[arg(
        short = 'q',
        long = "quiet",
        help = "Do not print progress to stdout. Results and logs (when `RUST_LOG` is set)\nwill still be printed.",
        global = true
    )]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
#[enum_dispatch(RunCommand)]
pub enum Commands {
    /// Clean the raw registry export
    Clean(CleanCommand),
    /// Train the forecast model and report hold-out metrics
    Train(TrainCommand),
    /// Project vaccination volume for the coming months
    Forecast(ForecastCommand),
    /// Group vaccine names by textual similarity
    Cluster(ClusterCommand),
    /// Show distributions of the cleaned registry
    Summary(SummaryCommand),
    /// Render the chart dashboard to a static HTML page
    Dashboard(DashboardCommand),
}
