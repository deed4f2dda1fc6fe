//! Command-line surface: argument parsing and dispatch to the analytical views.

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::entities::adverse_event::{
    self, DEFAULT_RECENT_REPORTS, DEFAULT_REPORT_SOURCES, DEFAULT_SERIOUS_OUTCOMES,
    DEFAULT_TOP_EVENTS,
};
use crate::entities::filter::{AgeRange, DateRange, QueryFilter, Sex, TimeGranularity};
use crate::render;
use crate::sources::openfda::OpenFdaClient;
use crate::transform::aggregate::AnalyticalResult;
use crate::transform::drug_name;

pub mod health;

pub(crate) const OVERVIEW: &str = "\
# faers-lens

Adverse event analytics over FDA FAERS reports, served by openFDA.
Brand names are mapped to generic names before querying (Tylenol -> acetaminophen).

## Commands

- `top-events -d <drug> [-n 10]` most frequently reported adverse events
- `serious-outcomes -d <drug> [-n 6]` death, hospitalization and other serious outcomes
- `event-stats -d <drug> -e <event>` share of a drug's reports that mention an event
- `time-series -d <drug> -e <event> [--aggregation yearly|quarterly]` reports per period
- `report-sources -d <drug> [-n 5]` who filed the reports
- `reports -d <drug> [-e <event>] [-n 20]` individual recent reports with tallies
- `normalize <name>` show the generic name a brand maps to
- `health` check openFDA connectivity

Population filters on every analytical command: `--sex all|male|female|unknown`,
`--min-age`, `--max-age`, `--since`, `--until` (YYYY, YYYY-MM or YYYY-MM-DD).
Add `--json` for machine-readable output.

Counts come from spontaneous reports and are not incidence rates.
";

#[derive(Parser, Debug)]
#[command(
    name = "faers-lens",
    version,
    about = "FAERS adverse event analytics over openFDA",
    after_help = "Spontaneous reports do not prove causation. Consult a healthcare professional."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Print JSON instead of markdown
    #[arg(long, global = true)]
    pub json: bool,
}

/// Patient and receipt-date constraints shared by the analytical commands.
#[derive(Args, Debug, Clone)]
pub struct PopulationArgs {
    /// Patient sex: all, male, female, unknown
    #[arg(long, default_value = "all")]
    pub sex: String,

    /// Minimum onset age in years
    #[arg(long, default_value_t = 0)]
    pub min_age: u32,

    /// Maximum onset age in years
    #[arg(long, default_value_t = 120)]
    pub max_age: u32,

    /// Earliest FDA receipt date (YYYY, YYYY-MM, YYYY-MM-DD)
    #[arg(long)]
    pub since: Option<String>,

    /// Latest FDA receipt date (YYYY, YYYY-MM, YYYY-MM-DD)
    #[arg(long)]
    pub until: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Most frequently reported adverse events for a drug
    TopEvents {
        /// Drug brand or generic name
        #[arg(short, long)]
        drug: String,
        /// Number of events to show (1-1000)
        #[arg(short = 'n', long, default_value_t = DEFAULT_TOP_EVENTS)]
        top_n: usize,
        #[command(flatten)]
        population: PopulationArgs,
    },
    /// Serious outcome breakdown among a drug's serious reports
    SeriousOutcomes {
        #[arg(short, long)]
        drug: String,
        #[arg(short = 'n', long, default_value_t = DEFAULT_SERIOUS_OUTCOMES)]
        top_n: usize,
        #[command(flatten)]
        population: PopulationArgs,
    },
    /// How often an adverse event is reported with a drug
    EventStats {
        #[arg(short, long)]
        drug: String,
        /// Adverse event term (MedDRA preferred term, e.g. headache)
        #[arg(short, long)]
        event: String,
        #[command(flatten)]
        population: PopulationArgs,
    },
    /// Drug-event reports per year or quarter
    TimeSeries {
        #[arg(short, long)]
        drug: String,
        #[arg(short, long)]
        event: String,
        /// yearly or quarterly
        #[arg(long, default_value = "yearly")]
        aggregation: String,
        #[command(flatten)]
        population: PopulationArgs,
    },
    /// Reporter types (physician, consumer, ...) for a drug's reports
    ReportSources {
        #[arg(short, long)]
        drug: String,
        #[arg(short = 'n', long, default_value_t = DEFAULT_REPORT_SOURCES)]
        top_n: usize,
        #[command(flatten)]
        population: PopulationArgs,
    },
    /// Individual reports for a drug, optionally narrowed to one event
    Reports {
        #[arg(short, long)]
        drug: String,
        #[arg(short, long)]
        event: Option<String>,
        /// Number of reports to fetch (1-1000)
        #[arg(short = 'n', long, default_value_t = DEFAULT_RECENT_REPORTS)]
        limit: usize,
        #[command(flatten)]
        population: PopulationArgs,
    },
    /// Show the generic name used for a drug name
    Normalize {
        /// Brand or generic drug name
        name: String,
    },
    /// Check openFDA connectivity
    Health,
    /// Run the MCP server over stdio
    Mcp,
    /// Alias for `mcp`
    Serve,
    /// Run the MCP server over HTTP (SSE transport)
    ServeHttp {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

fn filter_for(drug: &str, population: &PopulationArgs) -> anyhow::Result<QueryFilter> {
    Ok(QueryFilter::new(drug)
        .with_sex(Sex::from_flag(&population.sex)?)
        .with_ages(AgeRange::new(population.min_age, population.max_age))
        .with_dates(DateRange::new(
            population.since.as_deref(),
            population.until.as_deref(),
        )))
}

fn render_analysis(result: &AnalyticalResult, json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(render::json::analysis_json(result)?);
    }
    Ok(render::markdown::analysis_markdown(result)?)
}

#[derive(Serialize)]
struct NormalizedOutput<'a> {
    input: &'a str,
    normalized: String,
    mapped: bool,
}

fn normalize_output(name: &str, json: bool) -> anyhow::Result<String> {
    let normalized = drug_name::normalize(name);
    let mapped = normalized != drug_name::normalize_event(name);
    if json {
        return Ok(render::json::to_pretty(&NormalizedOutput {
            input: name,
            normalized: normalized.to_string(),
            mapped,
        })?);
    }
    if normalized.is_empty() {
        anyhow::bail!("Invalid drug name: a drug name is required (e.g. 'ibuprofen' or 'Advil')");
    }
    Ok(if mapped {
        format!("{} -> {normalized} (brand name mapped to generic)", name.trim())
    } else {
        format!("{normalized} (no brand mapping; queried as entered)")
    })
}

fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
    token
}

/// Runs a parsed command; Ctrl-C cancels in-flight backend calls.
pub async fn run(cli: Cli) -> anyhow::Result<String> {
    run_with(cli, interrupt_token()).await
}

/// Parses `args` (including the binary name) and runs the command, as the MCP shell tool does.
pub async fn execute(args: Vec<String>) -> anyhow::Result<String> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err)
            if matches!(
                err.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            return Ok(err.to_string());
        }
        Err(err) => return Err(err.into()),
    };
    run_with(cli, CancellationToken::new()).await
}

async fn run_with(cli: Cli, cancel: CancellationToken) -> anyhow::Result<String> {
    let json = cli.json;
    let client = || -> anyhow::Result<OpenFdaClient> {
        Ok(OpenFdaClient::new()?.with_cancellation(cancel.clone()))
    };

    match cli.command {
        Commands::TopEvents {
            drug,
            top_n,
            population,
        } => {
            let filter = filter_for(&drug, &population)?.with_limit(top_n);
            let result = adverse_event::top_adverse_events(&client()?, &filter).await?;
            render_analysis(&result, json)
        }
        Commands::SeriousOutcomes {
            drug,
            top_n,
            population,
        } => {
            let filter = filter_for(&drug, &population)?.with_limit(top_n);
            let result = adverse_event::serious_outcomes(&client()?, &filter).await?;
            render_analysis(&result, json)
        }
        Commands::EventStats {
            drug,
            event,
            population,
        } => {
            let filter = filter_for(&drug, &population)?.with_event(&event);
            let result = adverse_event::drug_event_stats(&client()?, &filter).await?;
            render_analysis(&result, json)
        }
        Commands::TimeSeries {
            drug,
            event,
            aggregation,
            population,
        } => {
            let granularity = TimeGranularity::from_flag(&aggregation)?;
            let filter = filter_for(&drug, &population)?.with_event(&event);
            let result = adverse_event::time_series(&client()?, &filter, granularity).await?;
            render_analysis(&result, json)
        }
        Commands::ReportSources {
            drug,
            top_n,
            population,
        } => {
            let filter = filter_for(&drug, &population)?.with_limit(top_n);
            let result = adverse_event::report_sources(&client()?, &filter).await?;
            render_analysis(&result, json)
        }
        Commands::Reports {
            drug,
            event,
            limit,
            population,
        } => {
            let mut filter = filter_for(&drug, &population)?.with_limit(limit);
            if let Some(event) = event.as_deref().filter(|e| !e.trim().is_empty()) {
                filter = filter.with_event(event);
            }
            let digest = adverse_event::recent_reports(&client()?, &filter).await?;
            if json {
                return Ok(render::json::to_pretty(&digest)?);
            }
            Ok(render::markdown::reports_markdown(&digest)?)
        }
        Commands::Normalize { name } => normalize_output(&name, json),
        Commands::Health => {
            let report = health::check().await?;
            if json {
                return Ok(render::json::to_pretty(&report)?);
            }
            Ok(report.to_markdown())
        }
        Commands::Mcp | Commands::Serve | Commands::ServeHttp { .. } => {
            anyhow::bail!("MCP server commands run from the faers-lens binary, not from a tool call")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_population_flags_and_defaults() {
        let cli = Cli::try_parse_from([
            "faers-lens",
            "top-events",
            "-d",
            "Tylenol",
            "--sex",
            "female",
            "--min-age",
            "18",
            "--since",
            "2020",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        let Commands::TopEvents {
            drug,
            top_n,
            population,
        } = cli.command
        else {
            panic!("expected top-events");
        };
        assert_eq!(drug, "Tylenol");
        assert_eq!(top_n, DEFAULT_TOP_EVENTS);
        assert_eq!(population.max_age, 120);

        let filter = filter_for(&drug, &population).unwrap();
        assert_eq!(filter.drug().as_str(), "acetaminophen");
        assert_eq!(filter.sex(), Sex::Female);
        assert_eq!(filter.dates().start.as_deref(), Some("2020"));
    }

    #[test]
    fn view_defaults_follow_each_command() {
        let cli = Cli::try_parse_from(["faers-lens", "serious-outcomes", "-d", "x"]).unwrap();
        assert!(matches!(cli.command, Commands::SeriousOutcomes { top_n: 6, .. }));
        let cli = Cli::try_parse_from(["faers-lens", "report-sources", "-d", "x"]).unwrap();
        assert!(matches!(cli.command, Commands::ReportSources { top_n: 5, .. }));
        let cli = Cli::try_parse_from(["faers-lens", "reports", "-d", "x"]).unwrap();
        assert!(matches!(cli.command, Commands::Reports { limit: 20, .. }));
    }

    #[test]
    fn invalid_sex_flag_is_rejected() {
        let population = PopulationArgs {
            sex: "robot".into(),
            min_age: 0,
            max_age: 120,
            since: None,
            until: None,
        };
        let err = filter_for("ibuprofen", &population).unwrap_err();
        assert!(err.to_string().contains("Invalid sex"));
    }

    #[tokio::test]
    async fn normalize_command_reports_brand_mapping() {
        let out = execute(vec!["faers-lens".into(), "normalize".into(), "Advil".into()])
            .await
            .unwrap();
        assert_eq!(out, "Advil -> ibuprofen (brand name mapped to generic)");

        let out = execute(vec![
            "faers-lens".into(),
            "--json".into(),
            "normalize".into(),
            "metformin".into(),
        ])
        .await
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["normalized"], "metformin");
        assert_eq!(value["mapped"], false);
    }

    #[tokio::test]
    async fn help_is_returned_as_output() {
        let out = execute(vec!["faers-lens".into(), "--help".into()])
            .await
            .unwrap();
        assert!(out.contains("top-events"));
    }

    #[tokio::test]
    async fn invalid_granularity_fails_before_any_request() {
        let err = execute(vec![
            "faers-lens".into(),
            "time-series".into(),
            "-d".into(),
            "ibuprofen".into(),
            "-e".into(),
            "headache".into(),
            "--aggregation".into(),
            "monthly".into(),
        ])
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Invalid aggregation"));
    }

    #[test]
    fn overview_lists_every_analytical_command() {
        for cmd in [
            "top-events",
            "serious-outcomes",
            "event-stats",
            "time-series",
            "report-sources",
            "reports",
        ] {
            assert!(OVERVIEW.contains(&format!("`{cmd} ")), "{cmd} missing");
        }
    }
}
