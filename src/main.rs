use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use eyre::{Result, WrapErr};

use waferyield::config::{api_key_from_env, PipelineConfig};
use waferyield::pipeline::{BatchOutcome, Pipeline};
use waferyield::ranking::ViewKind;
use waferyield::reports::{ReportCatalog, ReportProfile};
use waferyield::schema::{load_schema, SchemaSource};
use waferyield::table::Table;

#[derive(Parser)]
#[command(
    name = "waferyield",
    version,
    about = "Wafer yield prediction dashboard and batch scorer."
)]
struct Cli {
    /// Classifier artifact (overrides WAFERYIELD_MODEL and the default search)
    #[arg(long, global = true)]
    model: Option<PathBuf>,

    /// Feature schema artifact (overrides WAFERYIELD_SCHEMA and the default search)
    #[arg(long, global = true)]
    schema: Option<PathBuf>,

    /// Directory holding pre-generated report artifacts
    #[arg(long, global = true)]
    reports_dir: Option<PathBuf>,

    /// Report artifacts to show: basic or full (overrides WAFERYIELD_REPORT_PROFILE)
    #[arg(long, global = true)]
    report_profile: Option<ReportProfile>,

    /// Passes listed when a batch has no predicted fails
    #[arg(long, global = true, value_parser = parse_positive)]
    watch_list_size: Option<usize>,

    /// Schema fields offered for manual entry in single-record mode
    #[arg(long, global = true, value_parser = parse_positive)]
    manual_fields: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Summary,
    Json,
    Csv,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP dashboard
    Serve {
        /// Address to bind to
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,

        /// Rate limit in requests per minute per IP (0 = no limit)
        #[arg(long, default_value_t = 120)]
        rate_limit: u32,

        /// Path for JSONL access log
        #[arg(long, default_value = "waferyield-access.jsonl")]
        access_log: String,

        /// Directory for persisted usage metrics
        #[arg(long, default_value = waferyield::server::DEFAULT_CACHE_DIR)]
        cache_dir: String,
    },

    /// Score one record from a few manually entered fields
    Predict {
        /// Field value as name=value; repeatable. Unset fields default to 0.0
        #[arg(long = "set", value_parser = parse_assignment)]
        values: Vec<(String, f64)>,

        /// Output format: summary or json
        #[arg(long, value_enum, default_value_t = OutputFormat::Summary)]
        format: OutputFormat,
    },

    /// Score a CSV batch and rank the riskiest records
    Batch {
        /// CSV file with a header row containing every schema field
        #[arg(long)]
        input: PathBuf,

        /// Write full results (every record) to this CSV file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write the ranking view to this CSV file
        #[arg(long)]
        ranked: Option<PathBuf>,

        /// Output format: summary, json, or csv (full results on stdout)
        #[arg(long, value_enum, default_value_t = OutputFormat::Summary)]
        format: OutputFormat,

        /// Number of fails to rank
        #[arg(long)]
        top_n: Option<usize>,
    },

    /// Show the active feature schema
    Schema {
        /// Print every field instead of just the manual-entry prefix
        #[arg(long)]
        all: bool,
    },

    /// List report artifacts and whether they have been generated
    Reports {
        /// Shorthand for --report-profile basic
        #[arg(long)]
        basic: bool,
    },
}

fn parse_assignment(s: &str) -> std::result::Result<(String, f64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{s}'"))?;
    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("'{value}' is not a number: {e}"))?;
    Ok((name.trim().to_string(), value))
}

fn parse_positive(s: &str) -> std::result::Result<usize, String> {
    match s.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("expected a positive integer, got '{s}'")),
    }
}

fn pipeline_config(cli: &Cli) -> PipelineConfig {
    let mut config = PipelineConfig::from_env();
    if let Some(ref path) = cli.model {
        config.model_candidates = vec![path.clone()];
    }
    if let Some(ref path) = cli.schema {
        config.schema_candidates = vec![path.clone()];
    }
    if let Some(ref dir) = cli.reports_dir {
        config.reports_dir = dir.clone();
    }
    if let Some(profile) = cli.report_profile {
        config.report_profile = profile;
    }
    if let Some(n) = cli.watch_list_size {
        config.ranking.watch_list_size = n;
    }
    if let Some(n) = cli.manual_fields {
        config.manual_fields = n;
    }
    config
}

fn cmd_serve(
    config: PipelineConfig,
    bind: String,
    rate_limit: u32,
    access_log: String,
    cache_dir: String,
) -> Result<()> {
    use waferyield::server::{run_server, ServerConfig};

    let bind_addr = bind
        .parse()
        .wrap_err_with(|| format!("Invalid bind address: {}", bind))?;

    let server_config = ServerConfig {
        bind_addr,
        rate_limit_rpm: rate_limit,
        access_log_path: access_log,
        api_key: api_key_from_env(),
        cache_dir,
        ..Default::default()
    };

    eprintln!("Starting wafer yield dashboard on http://{bind_addr} ...");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_server(server_config, config))?;

    Ok(())
}

fn cmd_predict(config: PipelineConfig, values: Vec<(String, f64)>, format: OutputFormat) -> Result<()> {
    let pipeline = Pipeline::load(config).wrap_err("failed to load prediction pipeline")?;
    let values: BTreeMap<String, f64> = values.into_iter().collect();
    let single = pipeline.predict_single(&values)?;

    match format {
        OutputFormat::Json => {
            let result = serde_json::json!({
                "success": true,
                "result": single,
                "model_hash": pipeline.model_hash(),
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            println!("Single Record Prediction");
            println!("========================");
            println!("Prediction:  {}", single.prediction.label.as_str());
            println!("Confidence:  {:.2}%", single.prediction.score * 100.0);
            if single.needs_review {
                println!("Review:      close to the decision boundary");
            }
            println!("Provided:    {} field(s)", single.record.provided.len());
            println!("Defaulted:   {} field(s) set to 0.0", single.record.defaulted_fields);
            println!();
            println!("Note: {}", single.notice);
            println!("Model Hash: {}", pipeline.model_hash());
        }
    }
    Ok(())
}

fn format_summary(outcome: &BatchOutcome, model_hash: &str) -> String {
    let s = &outcome.report.summary;
    let mut out = String::new();
    out.push_str("Wafer Yield Batch Report\n");
    out.push_str("========================\n\n");
    out.push_str(&format!("Records:        {}\n", s.total));
    out.push_str(&format!("Predicted fail: {}\n", s.fail_count));
    out.push_str(&format!("Predicted pass: {}\n", s.pass_count));
    out.push_str(&format!("Fail rate:      {:.1}%\n", s.fail_rate * 100.0));
    out.push_str(&format!("Yield:          {:.1}%\n", s.yield_rate * 100.0));
    out.push_str(&format!("Needs review:   {}\n", outcome.review_count()));
    out.push_str(&format!("Model hash:     {}\n\n", model_hash));

    for notice in &outcome.report.notices {
        out.push_str(&format!("Note: {}\n\n", notice.message()));
    }
    if !outcome.extra_columns.is_empty() {
        out.push_str(&format!(
            "Ignored columns: {}\n\n",
            outcome.extra_columns.join(", ")
        ));
    }

    let view = &outcome.report.view;
    if !view.rows.is_empty() {
        match view.kind {
            ViewKind::FailRanking => out.push_str(&format!("Top {} highest-risk records:\n", view.rows.len())),
            ViewKind::WatchList => out.push_str("Watch list (least confident passes):\n"),
        }
        out.push_str(&format!("{:<6} {:<8} {:<8} {}\n", "RANK", "ROW", "LABEL", "SCORE"));
        out.push_str(&"-".repeat(36));
        out.push('\n');
        for (rank, r) in view.rows.iter().enumerate() {
            out.push_str(&format!(
                "{:<6} {:<8} {:<8} {:.4}\n",
                rank + 1,
                r.index + 1,
                r.label.as_str(),
                r.score
            ));
        }
    }
    out
}

fn cmd_batch(
    config: PipelineConfig,
    input: PathBuf,
    output: Option<PathBuf>,
    ranked: Option<PathBuf>,
    format: OutputFormat,
    top_n: Option<usize>,
) -> Result<i32> {
    let pipeline = Pipeline::load(config).wrap_err("failed to load prediction pipeline")?;
    let text = fs::read_to_string(&input)
        .wrap_err_with(|| format!("failed to read {}", input.display()))?;
    let table = Table::parse_csv(&text)?;

    let mut ranking = pipeline.config().ranking;
    if let Some(n) = top_n.filter(|n| *n > 0) {
        ranking.top_n = n;
    }
    let outcome = pipeline.predict_batch_with(table, &ranking)?;

    if let Some(path) = output {
        fs::write(&path, outcome.export_full())
            .wrap_err_with(|| format!("failed to write {}", path.display()))?;
        eprintln!("Full results written to {}", path.display());
    }
    if let Some(path) = ranked {
        fs::write(&path, outcome.export_ranked())
            .wrap_err_with(|| format!("failed to write {}", path.display()))?;
        eprintln!("Ranking written to {}", path.display());
    }

    match format {
        OutputFormat::Json => {
            let result = serde_json::json!({
                "success": true,
                "summary": outcome.report.summary,
                "view": outcome.report.view,
                "notices": outcome.report.notices,
                "predictions": outcome.predictions,
                "extra_columns": outcome.extra_columns,
                "model_hash": pipeline.model_hash(),
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Csv => print!("{}", outcome.export_full()),
        OutputFormat::Summary => print!("{}", format_summary(&outcome, pipeline.model_hash())),
    }

    // Non-zero when any unit is predicted to fail, so scripts can gate on it.
    Ok(if outcome.report.summary.fail_count > 0 { 1 } else { 0 })
}

fn cmd_schema(config: PipelineConfig, all: bool) -> Result<()> {
    let load = load_schema(&config.schema_candidates);
    match &load.source {
        SchemaSource::Artifact { path } => println!("Schema: {} ({} fields)", path.display(), load.schema.len()),
        SchemaSource::Fallback => println!("Schema: synthetic fallback ({} fields)", load.schema.len()),
    }
    let fields = if all {
        load.schema.fields()
    } else {
        waferyield::align::manual_fields(&load.schema, config.manual_fields)
    };
    for (i, f) in fields.iter().enumerate() {
        println!("{:>5}  {}", i + 1, f);
    }
    if !all && fields.len() < load.schema.len() {
        println!("  ... {} more (use --all)", load.schema.len() - fields.len());
    }
    Ok(())
}

fn cmd_reports(config: PipelineConfig, basic: bool) -> Result<()> {
    let profile = if basic { ReportProfile::Basic } else { config.report_profile };
    let catalog = ReportCatalog::scan(&config.reports_dir, profile);
    println!(
        "Reports in {} ({}/{} generated)",
        config.reports_dir.display(),
        catalog.present_count(),
        catalog.entries.len()
    );
    for e in &catalog.entries {
        let status = if e.present { "ok" } else { "missing" };
        println!("  [{:<7}] {:<24} {}", status, e.title, e.file_name);
        if let Some(ref notice) = e.notice {
            println!("            {}", notice);
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = pipeline_config(&cli);

    let result = match cli.command {
        Commands::Serve {
            bind,
            rate_limit,
            access_log,
            cache_dir,
        } => cmd_serve(config, bind, rate_limit, access_log, cache_dir),
        Commands::Predict { values, format } => cmd_predict(config, values, format),
        Commands::Batch {
            input,
            output,
            ranked,
            format,
            top_n,
        } => match cmd_batch(config, input, output, ranked, format, top_n) {
            Ok(code) => {
                if code != 0 {
                    std::process::exit(code);
                }
                Ok(())
            }
            Err(e) => Err(e),
        },
        Commands::Schema { all } => cmd_schema(config, all),
        Commands::Reports { basic } => cmd_reports(config, basic),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:?}");
        std::process::exit(2);
    }
}
