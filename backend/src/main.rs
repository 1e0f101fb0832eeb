//! rostersync CLI - Reconcile roster spreadsheets into the employee registry
//!
//! # Main Commands
//!
//! ```bash
//! rostersync serve                        # Start HTTP server (port 3000)
//! rostersync sync roster.xlsx             # Reconcile a roster into the registry
//! rostersync sync roster.xlsx --dry-run   # Show the diff without writing
//! rostersync export -o registry.xlsx      # Export the registry
//! rostersync archive                      # Copy the registry into history
//! ```
//!
//! # Inspection Commands
//!
//! ```bash
//! rostersync parse roster.xlsx            # Parse a roster to JSON
//! rostersync preview roster.xlsx -o p.xlsx  # Registry as a sync would leave it
//! rostersync lookups                      # Show the lookup tables in use
//! ```

use clap::{Parser, Subcommand};
use rostersync::api::logs::LOG_BROADCASTER;
use rostersync::export::{self, ExportFormat};
use rostersync::pipeline::warn_if_unconfirmed;
use rostersync::{
    AppConfig, ApplyStrategy, LookupTables, RosterService, SnapshotParser, SystemClock,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "rostersync")]
#[command(about = "Reconcile roster spreadsheets into the employee registry", long_about = None)]
struct Cli {
    /// Registry database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Lookup tables file (overrides the embedded tables)
    #[arg(long, global = true)]
    lookups: Option<PathBuf>,

    /// Minimum snapshot size a sync accepts
    #[arg(long, global = true)]
    min_records: Option<usize>,

    /// Apply strategy: set-based or full-replace
    #[arg(long, global = true)]
    strategy: Option<ApplyStrategy>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a roster file and output the snapshot as JSON
    Parse {
        /// Input roster (.xlsx, .xls, .ods or .csv)
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only print the parse report
        #[arg(long)]
        report_only: bool,
    },

    /// Reconcile a roster into the registry
    Sync {
        /// Input roster (.xlsx, .xls, .ods or .csv)
        input: PathBuf,

        /// Compute and print the diff without writing
        #[arg(long)]
        dry_run: bool,

        /// Output file for the JSON summary (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write the registry as a sync of this roster would leave it
    Preview {
        /// Input roster (.xlsx, .xls, .ods or .csv)
        input: PathBuf,

        /// Output file (.xlsx or .csv)
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Export the registry
    Export {
        /// Output file, .xlsx or .csv (default: colaboradores_<timestamp>.xlsx)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Copy every registry row into the history table
    Archive,

    /// Show the lookup tables in use
    Lookups,

    /// Start HTTP server
    Serve {
        /// Port to listen on (default: PORT or 3000)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // stdout carries command output; progress goes to stderr
    if !matches!(cli.command, Commands::Serve { .. }) {
        LOG_BROADCASTER.echo_to_stderr(true);
    }

    let result = match load_config(&cli) {
        Ok(config) => run(cli.command, config).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::from_env()?
        .with_database_url(cli.database_url.clone())
        .with_lookups(cli.lookups.clone())
        .with_min_records(cli.min_records)
        .with_strategy(cli.strategy))
}

async fn run(command: Commands, config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Parse {
            input,
            output,
            report_only,
        } => cmd_parse(&config, &input, output.as_deref(), report_only),

        Commands::Sync {
            input,
            dry_run,
            output,
        } => cmd_sync(&config, &input, dry_run, output.as_deref()).await,

        Commands::Preview { input, output } => cmd_preview(&config, &input, &output).await,

        Commands::Export { output } => cmd_export(&config, output).await,

        Commands::Archive => cmd_archive(&config).await,

        Commands::Lookups => cmd_lookups(&config),

        Commands::Serve { port } => cmd_serve(config.with_port(port)).await,
    }
}

fn cmd_parse(
    config: &AppConfig,
    input: &Path,
    output: Option<&Path>,
    report_only: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Parsing roster: {}", input.display());

    let tables = LookupTables::load_or_embedded(config.lookups.as_deref())?;
    warn_if_unconfirmed(&tables);

    let grid = rostersync::read_grid(input)?;
    eprintln!("   Sheet: {} ({} rows, {} columns)", grid.sheet, grid.height(), grid.width());

    let parsed = SnapshotParser::new(&tables, &SystemClock).parse(&grid);
    let report = &parsed.report;
    eprintln!("   Companies: {}", report.companies.join(", "));
    if !report.unknown_companies.is_empty() {
        eprintln!("   ⚠️  Unknown companies: {}", report.unknown_companies.join(", "));
    }
    if !report.unmapped_titles.is_empty() {
        eprintln!("   ⚠️  {} job titles without classification", report.unmapped_titles.len());
    }
    eprintln!(
        "✅ Parsed {} employees ({} terminated, {} rejected)",
        parsed.records.len(),
        report.terminated_count(),
        report.skipped.len() - report.terminated_count()
    );

    let json = if report_only {
        serde_json::to_string_pretty(report)?
    } else {
        serde_json::to_string_pretty(&serde_json::json!({
            "report": report,
            "records": parsed.records,
        }))?
    };
    write_output(&json, output)?;

    Ok(())
}

async fn cmd_sync(
    config: &AppConfig,
    input: &Path,
    dry_run: bool,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Processing: {}", input.display());

    let service = RosterService::from_config(config).await?;
    let parsed = service.parse_file(input)?;
    let outcome = service.sync_snapshot(parsed, None, dry_run).await?;

    let s = &outcome.summary;
    eprintln!("\n📊 Summary ({})", outcome.strategy);
    eprintln!("   Snapshot:  {}", s.snapshot_size);
    eprintln!("   Registry:  {}", s.registry_size);
    eprintln!("   New:       {}", s.inserted);
    eprintln!("   Updated:   {}", s.updated);
    eprintln!("   Removed:   {}", s.deleted);

    let json = serde_json::to_string_pretty(&outcome)?;
    write_output(&json, output)?;

    match &outcome.apply {
        Some(report) if report.rolled_back => {
            return Err("apply rolled back; registry unchanged".into());
        }
        Some(report) if !report.failures.is_empty() => {
            eprintln!("\n⚠️  {} keys failed to apply", report.failures.len());
        }
        _ => eprintln!("\n✨ Done!"),
    }

    Ok(())
}

async fn cmd_preview(
    config: &AppConfig,
    input: &Path,
    output: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let format = ExportFormat::from_path(output)?;
    eprintln!("📄 Previewing: {}", input.display());

    let service = RosterService::from_config(config).await?;
    let parsed = service.parse_file(input)?;
    let rows = service.preview_snapshot(&parsed).await?;

    fs::write(output, export::to_bytes(&export::rows_from(&rows), format)?)?;
    eprintln!("💾 {} employees written to: {}", rows.len(), output.display());
    Ok(())
}

async fn cmd_export(
    config: &AppConfig,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = RosterService::from_config(config).await?;
    let output = output.unwrap_or_else(|| {
        PathBuf::from(export::file_name("colaboradores", service.now(), ExportFormat::Xlsx))
    });

    let rows = service.export_registry().await?;
    export::write_file(&output, &export::rows_from(&rows))?;
    eprintln!("💾 {} employees written to: {}", rows.len(), output.display());
    Ok(())
}

async fn cmd_archive(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let service = RosterService::from_config(config).await?;
    let outcome = service.archive().await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn cmd_lookups(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let tables = LookupTables::load_or_embedded(config.lookups.as_deref())?;
    let (companies, classifications, functions, situations) = tables.counts();

    let source = config
        .lookups
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "embedded".to_string());

    println!("📚 Lookup tables v{} ({})\n", tables.version(), source);
    println!("   Companies:           {}", companies);
    println!("   Classifications:     {}", classifications);
    println!("   Executing functions: {}", functions);
    println!("   Situations:          {}", situations);
    println!(
        "   Defaults:            class '{}', prefix '{}', {} hours",
        tables.other_classification(),
        tables.unknown_company_prefix(),
        tables.hours_worked()
    );
    println!();
    println!(
        "Situations{}:",
        if tables.situations_confirmed() { "" } else { " (unconfirmed)" }
    );
    for (code, label) in tables.situations() {
        let marker = if tables.is_terminated(code) { "  [excluded]" } else { "" };
        println!("  {:>3}  {}{}", code, label, marker);
    }

    Ok(())
}

async fn cmd_serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let service = RosterService::from_config(&config).await?;
    rostersync::server::start_server(Arc::new(service), config.port).await
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
