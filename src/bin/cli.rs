use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use sfdrift::{
    CommandExecutor, ConnectionConfig, DeploymentReport, FailurePolicy, MaskingConfig,
    MaskingDeployment, MockWarehouse, OutcomeStatus, Result, ScriptLoader, ScriptRunner,
    SessionContext, SfDriftError, SqlApiChannel, StatementSplitter, TokenType, DEFAULT_DATABASE,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing::{error, info_span, Instrument};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sfdrift")]
#[command(version)]
#[command(about = "Reconcile Snowflake masking policies and deploy SQL scripts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Run against an in-memory warehouse instead of Snowflake
    #[arg(long, global = true)]
    mock: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text", value_enum)]
    format: OutputFormat,

    /// Environment label attached to log output
    #[arg(long, global = true, default_value = "dev")]
    environment: String,

    #[command(flatten)]
    connection: ConnectionArgs,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Account identifier (or full https:// base URL)
    #[arg(long, global = true, env = "SNOWFLAKE_ACCOUNT")]
    account: Option<String>,

    #[arg(long, global = true, env = "SNOWFLAKE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// OAUTH, KEYPAIR_JWT or PROGRAMMATIC_ACCESS_TOKEN
    #[arg(long, global = true, env = "SNOWFLAKE_TOKEN_TYPE", default_value = "OAUTH")]
    token_type: String,

    #[arg(
        long,
        global = true,
        env = "SNOWFLAKE_ROLE",
        default_value = sfdrift::config::DEFAULT_ROLE
    )]
    role: String,

    #[arg(
        long,
        global = true,
        env = "SNOWFLAKE_WAREHOUSE",
        default_value = sfdrift::config::DEFAULT_WAREHOUSE
    )]
    warehouse: String,

    #[arg(long, global = true, env = "SNOWFLAKE_DATABASE", default_value = DEFAULT_DATABASE)]
    database: String,

    /// Per-statement timeout in seconds
    #[arg(long, global = true, default_value_t = sfdrift::config::DEFAULT_TIMEOUT_SECS)]
    timeout: u64,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile masking policies and their column bindings, then verify
    Policies {
        /// Desired-state YAML (defaults to <config dir>/sfdrift/masking.yaml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long)]
        skip_verify: bool,
    },

    /// Compare the warehouse against the desired state without changing it
    Verify {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Deploy SQL files or directories in the given order
    Scripts {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Skip the rest of a script after its first failing statement
        #[arg(long)]
        stop_on_failure: bool,
    },

    /// Show how a SQL file is split into statements
    Split { file: PathBuf },
}

#[derive(Tabled)]
struct TallyRow {
    #[tabled(rename = "Phase")]
    phase: String,
    #[tabled(rename = "Attempted")]
    attempted: usize,
    #[tabled(rename = "Succeeded")]
    succeeded: usize,
    #[tabled(rename = "Failed")]
    failed: usize,
}

impl ConnectionArgs {
    fn resolve(&self, database: &str) -> Result<ConnectionConfig> {
        let token_type: TokenType = self.token_type.parse().map_err(SfDriftError::Config)?;
        let config = ConnectionConfig {
            account: self.account.clone().unwrap_or_default(),
            token: self.token.clone().unwrap_or_default(),
            token_type,
            role: self.role.clone(),
            warehouse: self.warehouse.clone(),
            database: database.to_string(),
            timeout: Duration::from_secs(self.timeout),
        };
        config.validate()?;
        Ok(config)
    }

    fn context(&self, database: &str) -> SessionContext {
        SessionContext::new(&self.role, &self.warehouse, database)
    }
}

fn build_executor(cli: &Cli, database: &str) -> Result<CommandExecutor> {
    if cli.mock {
        let warehouse = if database.eq_ignore_ascii_case(DEFAULT_DATABASE) {
            MockWarehouse::public_health()
        } else {
            MockWarehouse::new(database)
        };
        return Ok(CommandExecutor::new(Arc::new(warehouse)));
    }

    let config = cli.connection.resolve(database)?;
    let channel = SqlApiChannel::new(
        &config.account,
        config.token.clone(),
        config.token_type,
        config.timeout,
    )
    .map_err(|e| SfDriftError::Connection(e.to_string()))?;
    Ok(CommandExecutor::new(Arc::new(channel)))
}

fn status_mark(status: OutcomeStatus) -> colored::ColoredString {
    match status {
        OutcomeStatus::Applied => "✓".green(),
        OutcomeStatus::NoOp => "·".dimmed(),
        OutcomeStatus::AlreadySatisfied => "=".cyan(),
        OutcomeStatus::Skipped => "-".yellow(),
        OutcomeStatus::Failed => "✗".red(),
    }
}

fn render_report(report: &DeploymentReport, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", report.to_json()?);
        return Ok(());
    }

    for outcome in report.outcomes() {
        let phase = format!("[{}]", outcome.phase);
        println!(
            "{} {} {}",
            status_mark(outcome.status),
            phase.dimmed(),
            outcome.description
        );
        if let Some(err) = &outcome.error_excerpt {
            println!("    {}", err.red());
        } else if let Some(note) = &outcome.note {
            println!("    {}", note.dimmed());
        }
    }

    let rows: Vec<TallyRow> = report
        .tallies()
        .into_iter()
        .map(|(phase, tally)| TallyRow {
            phase: phase.to_string(),
            attempted: tally.attempted,
            succeeded: tally.succeeded,
            failed: tally.failed(),
        })
        .collect();
    if !rows.is_empty() {
        println!();
        println!("{}", Table::new(rows).with(Style::rounded()));
    }

    if let Some(summary) = &report.verification {
        println!();
        for count in &summary.policies_per_schema {
            let shown = count
                .count
                .map_or_else(|| "unknown".to_string(), |n| n.to_string());
            println!("  {} masking policies: {}", count.schema, shown);
        }
        let line = format!(
            "Policies {}/{}, bindings {}/{} ({} check)",
            summary.expected_policies_found,
            summary.expected_policies,
            summary.expected_bindings_found,
            summary.expected_bindings,
            summary.binding_check
        );
        if summary.is_complete() {
            println!("{}", line.green().bold());
        } else {
            println!("{}", line.yellow().bold());
        }
    }

    let failures = report.failures().count();
    let summary = format!(
        "Run {}: {} outcomes, {} failed",
        report.run_id,
        report.outcomes().len(),
        failures
    );
    if failures == 0 {
        println!("{}", summary.green());
    } else {
        println!("{}", summary.red());
    }
    Ok(())
}

fn cmd_split(file: &Path, format: OutputFormat) -> Result<()> {
    let script = ScriptLoader::load_file(file)?;
    let statements = StatementSplitter::split(&script);

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&statements)?);
        return Ok(());
    }
    for statement in &statements {
        let header = format!(
            "-- [{}/{}] {}",
            statement.position + 1,
            statements.len(),
            if statement.is_procedure_body() {
                "procedure body"
            } else {
                "statement"
            }
        );
        println!("{}", header.cyan());
        println!("{}\n", statement.sql);
    }
    Ok(())
}

async fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Policies {
            config,
            skip_verify,
        } => {
            let masking = MaskingConfig::resolve(config.as_deref())?;
            let database = masking
                .database
                .clone()
                .unwrap_or_else(|| cli.connection.database.clone());
            let deployment = MaskingDeployment::new(
                build_executor(cli, &database)?,
                cli.connection.context(&database),
                masking.options(),
            );
            let report = deployment
                .run(&masking.desired_state(), !*skip_verify)
                .await?;
            render_report(&report, cli.format)
        }
        Commands::Verify { config } => {
            let masking = MaskingConfig::resolve(config.as_deref())?;
            let database = masking
                .database
                .clone()
                .unwrap_or_else(|| cli.connection.database.clone());
            let deployment = MaskingDeployment::new(
                build_executor(cli, &database)?,
                cli.connection.context(&database),
                masking.options(),
            );
            let report = deployment.verify_only(&masking.desired_state()).await?;
            render_report(&report, cli.format)
        }
        Commands::Scripts {
            paths,
            stop_on_failure,
        } => {
            let database = &cli.connection.database;
            let policy = if *stop_on_failure {
                FailurePolicy::StopScript
            } else {
                FailurePolicy::Continue
            };
            let runner = ScriptRunner::new(
                build_executor(cli, database)?,
                cli.connection.context(database),
            )
            .with_failure_policy(policy);
            let report = runner.deploy_paths(paths).await?;
            render_report(&report, cli.format)
        }
        Commands::Split { file } => cmd_split(file, cli.format),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sfdrift=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let span = info_span!("sfdrift", environment = %cli.environment);
    match run(&cli).instrument(span).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, fatal = e.is_fatal(), "run aborted");
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
