use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use advocacy_analytics::api::{ApiClient, Dataset};
use advocacy_analytics::classify::Classifier;
use advocacy_analytics::config::AppConfig;
use advocacy_analytics::export::{self, ExportOutcome};
use advocacy_analytics::models::fields;
use advocacy_analytics::pipeline::{self, SortDirection, ViewState};
use advocacy_analytics::report;
use advocacy_analytics::settings::{
    validate_settings, ChampionSettings, OutlierSettings, SegmentSettings, SettingsCategory,
    SettingsStore,
};

#[derive(Parser)]
#[command(name = "advocacy-analytics")]
#[command(about = "Advocate and brand performance analytics over the advocacy API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or change classification thresholds
    Settings {
        #[arg(value_enum)]
        category: Category,
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Fetch, classify, filter and page through a dataset
    List {
        #[arg(value_enum)]
        dataset: Dataset,
        #[command(flatten)]
        view: ViewArgs,
        /// Write the filtered, sorted rows to CSV
        #[arg(long = "export")]
        export_csv: bool,
    },
    /// Generate a markdown performance report
    Report {
        #[arg(value_enum, default_value = "accounts")]
        dataset: Dataset,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Category {
    Champion,
    Outlier,
    Segment,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print the stored settings (defaults when none are stored)
    Show,
    /// Check the stored settings
    Validate,
    /// Restore and persist the defaults
    Reset,
    /// Update one field, e.g. `overall.salesWeight 0.5`
    Set { path: String, value: f64 },
}

#[derive(Args)]
struct ViewArgs {
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    min_engagement: Option<f64>,
    #[arg(long)]
    max_engagement: Option<f64>,
    #[arg(long)]
    min_sales: Option<f64>,
    #[arg(long)]
    max_sales: Option<f64>,
    /// Tier label, e.g. Gold
    #[arg(long)]
    tier: Option<String>,
    /// Activity segment label, e.g. "Highly Active"
    #[arg(long)]
    activity: Option<String>,
    #[arg(long)]
    sort: Option<String>,
    #[arg(long)]
    desc: bool,
    #[arg(long, default_value_t = 1)]
    page: usize,
    #[arg(long, default_value_t = 25)]
    page_size: usize,
}

impl ViewArgs {
    fn to_view(&self, dataset: Dataset) -> ViewState {
        let mut view = ViewState::new(self.page_size);
        if let Some(query) = &self.search {
            view.set_search(query.as_str(), dataset.search_fields().iter().copied());
        }
        view.set_range(fields::ENGAGEMENT, self.min_engagement, self.max_engagement);
        view.set_range(fields::SALES, self.min_sales, self.max_sales);
        view.set_category("tier", self.tier.clone());
        view.set_category("activity_segment", self.activity.clone());
        if let Some(field) = &self.sort {
            let direction = if self.desc {
                SortDirection::Desc
            } else {
                SortDirection::Asc
            };
            view.set_sort(field, direction);
        }
        view.set_page(self.page);
        view
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn settings_command<C>(store: &SettingsStore, action: SettingsAction) -> anyhow::Result<()>
where
    C: SettingsCategory,
{
    match action {
        SettingsAction::Show => {
            let cfg: C = store.load();
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }
        SettingsAction::Validate => {
            let violations = validate_settings(&store.load::<C>());
            if violations.is_empty() {
                println!("Settings valid.");
            } else {
                for violation in &violations {
                    println!("- {violation}");
                }
                anyhow::bail!("{} settings violation(s)", violations.len());
            }
        }
        SettingsAction::Reset => {
            let cfg: C = store.reset()?;
            println!("Defaults restored:");
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }
        SettingsAction::Set { path, value } => {
            let mut cfg: C = store.load();
            cfg.update_field(&path, value)?;
            let violations = validate_settings(&cfg);
            if !violations.is_empty() {
                for violation in &violations {
                    println!("- {violation}");
                }
                anyhow::bail!("settings not saved");
            }
            store.save(&cfg)?;
            println!("Saved {path} = {value}.");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::from_env().context("invalid configuration")?;
    init_tracing(config.log_json);

    let store = SettingsStore::new(&config.settings_path);

    match cli.command {
        Commands::Settings { category, action } => match category {
            Category::Champion => settings_command::<ChampionSettings>(&store, action)?,
            Category::Outlier => settings_command::<OutlierSettings>(&store, action)?,
            Category::Segment => settings_command::<SegmentSettings>(&store, action)?,
        },
        Commands::List {
            dataset,
            view,
            export_csv,
        } => {
            let classifier = Classifier::from_store(&store);
            let client = ApiClient::new(&config.api_url, config.http_timeout)
                .context("failed to build HTTP client")?;
            let mut records = client
                .fetch_dataset(dataset, &classifier)
                .await
                .with_context(|| format!("failed to fetch {}", dataset.slug()))?;
            if dataset.per_advocate() {
                classifier.annotate(&mut records);
            }

            let view = view.to_view(dataset);
            let result = pipeline::run(&records, &view);
            let columns = export::columns_for(dataset);

            if result.page.is_empty() {
                println!("No rows on this page.");
            } else {
                let labels: Vec<&str> = columns.iter().map(|c| c.label).collect();
                println!("{}", labels.join(" | "));
                for record in &result.page {
                    let cells: Vec<String> =
                        columns.iter().map(|c| c.cell(record).to_string()).collect();
                    println!("{}", cells.join(" | "));
                }
            }
            println!(
                "Page {} of {} ({} matching of {} fetched)",
                view.page_index(),
                result.total_pages,
                result.filtered_count,
                records.len()
            );

            if export_csv {
                let rows = pipeline::filter_and_sort(&records, &view);
                let today = Utc::now().date_naive();
                match export::export_dataset(dataset, &rows, &config.export_dir, today)? {
                    ExportOutcome::Written { path, rows } => {
                        println!("Exported {rows} rows to {}.", path.display());
                    }
                    ExportOutcome::Empty => println!("{}", export::EMPTY_NOTICE),
                }
            }
        }
        Commands::Report { dataset, out } => {
            let classifier = Classifier::from_store(&store);
            let client = ApiClient::new(&config.api_url, config.http_timeout)
                .context("failed to build HTTP client")?;
            let records = client
                .fetch_dataset(dataset, &classifier)
                .await
                .with_context(|| format!("failed to fetch {}", dataset.slug()))?;
            let report = report::build_report(
                dataset.slug(),
                Utc::now().date_naive(),
                &records,
                &classifier,
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
