//! dpconsole command line.
//!
//! `dpconsole serve` hosts the ledger and alert service; every other command
//! is a client of the collaborators at `api.base_url`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use futures::future::try_join_all;
use owo_colors::OwoColorize;
use tokio::net::TcpListener;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use dpconsole::alerts::{AlertEvent, AlertMonitor, AlertRule, LogNotifier, UsageBand};
use dpconsole::api::{
    AlertApi, BudgetAmount, Dataset, DatasetApi, HttpClient, JobExecutor, LedgerApi, NewAlert,
    NewScope,
};
use dpconsole::ledger::DEFAULT_TOTAL_DELTA;
use dpconsole::preview::{PreviewEvent, PreviewRequest, PreviewTicket};
use dpconsole::server::{self, AppState};
use dpconsole::wizard::JobResult;
use dpconsole::{
    BudgetScope, ConsoleConfig, ConsoleError, ConsoleResult, JobWizard, Mechanism, Metric,
    PreviewEngine,
};

const DEFAULT_LOG_FILTER: &str = "info,dpconsole=debug";

#[derive(Parser)]
#[command(name = "dpconsole")]
#[command(version)]
#[command(about = "Privacy budget ledger and DP job console", long_about = None)]
struct Cli {
    /// Configuration file (TOML). Defaults to ./dpconsole.toml when present.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Collaborator base URL, overriding `api.base_url`
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the local ledger and alert service
    Serve {
        /// Address to bind, overriding `server.bind`
        #[arg(long)]
        bind: Option<String>,

        /// Ledger data directory, overriding `ledger.data_dir`
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Inspect and manage budget scopes
    #[command(subcommand)]
    Scopes(ScopesCommand),

    /// Manage usage alerts
    #[command(subcommand)]
    Alerts(AlertsCommand),

    /// Browse the dataset catalog
    #[command(subcommand)]
    Datasets(DatasetsCommand),

    /// Preview the private and actual value of one metric
    Preview {
        #[arg(long)]
        dataset: String,

        #[arg(long)]
        column: String,

        #[arg(long, value_parser = parse_metric)]
        metric: Metric,

        #[arg(long)]
        epsilon: f64,
    },

    /// Submit and inspect jobs
    #[command(subcommand)]
    Job(JobCommand),

    /// Inspect configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum ScopesCommand {
    /// List every scope with its usage band
    List,

    /// Show one scope
    Show { id: String },

    /// Create a scope
    Create {
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        epsilon: f64,

        #[arg(long, default_value_t = DEFAULT_TOTAL_DELTA)]
        delta: f64,
    },

    /// Add budget to a scope
    Allocate {
        id: String,

        #[arg(long)]
        epsilon: f64,

        #[arg(long, default_value_t = 0.0)]
        delta: f64,
    },

    /// Zero a scope's consumption. Cannot be undone.
    Reset {
        id: String,

        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum AlertsCommand {
    /// List the alert rules of a scope
    List { scope: String },

    /// Notify TARGET once usage reaches THRESHOLD percent
    Add {
        scope: String,

        #[arg(long)]
        threshold: f64,

        #[arg(long)]
        target: String,
    },

    /// Remove an alert rule
    Remove { id: u64 },
}

#[derive(Subcommand)]
enum DatasetsCommand {
    /// List the datasets available for jobs
    List,

    /// Show a dataset's columns
    Show { id: String },
}

#[derive(Subcommand)]
enum JobCommand {
    /// Walk the job wizard non-interactively and submit
    Submit(SubmitArgs),

    /// Show a job
    Show { id: String },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
}

#[derive(Args)]
struct SubmitArgs {
    #[arg(long)]
    dataset: String,

    /// Column to include (repeatable). None means all numeric columns.
    #[arg(long = "column")]
    columns: Vec<String>,

    /// Metric to compute (repeatable)
    #[arg(long = "metric", value_parser = parse_metric, required = true)]
    metrics: Vec<Metric>,

    #[arg(long)]
    epsilon: f64,

    /// Delta for the gaussian mechanism
    #[arg(long)]
    delta: Option<f64>,

    #[arg(long, value_parser = parse_mechanism, default_value = "laplace")]
    mechanism: Mechanism,

    /// Budget scope to check remaining budget against
    #[arg(long)]
    scope: Option<String>,
}

fn parse_metric(value: &str) -> Result<Metric, String> {
    value.parse().map_err(|e: ConsoleError| e.to_string())
}

fn parse_mechanism(value: &str) -> Result<Mechanism, String> {
    value.parse().map_err(|e: ConsoleError| e.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {}", "error:".red().bold(), err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ConsoleResult<()> {
    let mut config = ConsoleConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.api_url {
        config = config.with_base_url(url);
    }

    match cli.command {
        Command::Serve { bind, data_dir } => serve(config, bind, data_dir).await,
        Command::Scopes(command) => scopes(&config, command).await,
        Command::Alerts(command) => alerts(&config, command).await,
        Command::Datasets(command) => datasets(&config, command).await,
        Command::Preview {
            dataset,
            column,
            metric,
            epsilon,
        } => preview(&config, PreviewRequest::new(dataset, column, metric, epsilon)).await,
        Command::Job(JobCommand::Submit(args)) => submit_job(&config, args).await,
        Command::Job(JobCommand::Show { id }) => {
            let client = HttpClient::from_config(&config)?;
            print_job(&client.get_job(&id).await?)
        }
        Command::Config(ConfigCommand::Show) => {
            print!("{}", config.to_toml());
            Ok(())
        }
    }
}

async fn serve(
    mut config: ConsoleConfig,
    bind: Option<String>,
    data_dir: Option<PathBuf>,
) -> ConsoleResult<()> {
    if let Some(dir) = data_dir {
        config = config.with_data_dir(dir);
    }
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());

    let state = match &config.ledger.data_dir {
        Some(dir) => AppState::open(dir)?,
        None => {
            tracing::warn!("no ledger data directory configured; budgets are kept in memory only");
            AppState::in_memory()
        }
    };

    let (monitor, mut alert_events) =
        AlertMonitor::new(Arc::clone(&state.alerts), Arc::new(LogNotifier));
    monitor.start(state.ledger.subscribe()).await;
    let drain = tokio::spawn(async move {
        while let Some(event) = alert_events.recv().await {
            match event {
                AlertEvent::Raised { rule, usage_pct } => {
                    tracing::info!(rule_id = rule.id, scope_id = %rule.scope_id, usage_pct, "alert raised")
                }
                AlertEvent::Cleared { rule, usage_pct } => {
                    tracing::info!(rule_id = rule.id, scope_id = %rule.scope_id, usage_pct, "alert cleared")
                }
            }
        }
    });

    let listener = TcpListener::bind(bind.as_str()).await?;
    server::serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutting down");
    })
    .await?;

    monitor.stop().await;
    drain.abort();
    Ok(())
}

async fn scopes(config: &ConsoleConfig, command: ScopesCommand) -> ConsoleResult<()> {
    let client = HttpClient::from_config(config)?;
    match command {
        ScopesCommand::List => {
            let scopes = client.list_scopes().await?;
            if scopes.is_empty() {
                println!("No budget scopes.");
                return Ok(());
            }
            let rules = try_join_all(scopes.iter().map(|scope| client.list_alerts(&scope.id))).await?;
            for (scope, rules) in scopes.iter().zip(rules) {
                print_scope_line(scope, &rules);
            }
        }
        ScopesCommand::Show { id } => print_scope(&client.get_scope(&id).await?),
        ScopesCommand::Create {
            id,
            name,
            epsilon,
            delta,
        } => {
            let scope = client
                .create_scope(&NewScope {
                    name: name.unwrap_or_else(|| id.clone()),
                    id,
                    total_epsilon: epsilon,
                    total_delta: delta,
                })
                .await?;
            print_scope(&scope);
        }
        ScopesCommand::Allocate { id, epsilon, delta } => {
            print_scope(&client.allocate(&id, BudgetAmount { epsilon, delta }).await?)
        }
        ScopesCommand::Reset { id, yes } => {
            if !yes {
                return Err(ConsoleError::Validation(format!(
                    "resetting '{}' cannot be undone; pass --yes to confirm",
                    id
                )));
            }
            print_scope(&client.reset(&id).await?);
        }
    }
    Ok(())
}

async fn alerts(config: &ConsoleConfig, command: AlertsCommand) -> ConsoleResult<()> {
    let client = HttpClient::from_config(config)?;
    match command {
        AlertsCommand::List { scope } => {
            let rules = client.list_alerts(&scope).await?;
            if rules.is_empty() {
                println!("No alert rules for {}.", scope);
            }
            for rule in rules {
                print_rule(&rule);
            }
        }
        AlertsCommand::Add {
            scope,
            threshold,
            target,
        } => {
            let rule = client
                .create_alert(&scope, &NewAlert { threshold, target })
                .await?;
            print_rule(&rule);
        }
        AlertsCommand::Remove { id } => {
            client.delete_alert(id).await?;
            println!("Removed alert rule {}.", id);
        }
    }
    Ok(())
}

async fn datasets(config: &ConsoleConfig, command: DatasetsCommand) -> ConsoleResult<()> {
    let client = HttpClient::from_config(config)?;
    match command {
        DatasetsCommand::List => {
            let datasets = client.list_datasets().await?;
            if datasets.is_empty() {
                println!("No datasets.");
            }
            for dataset in datasets {
                let rows = dataset
                    .row_count
                    .map(|rows| rows.to_string())
                    .unwrap_or_else(|| "?".to_string());
                println!(
                    "{:<12} {:<24} {:>10} rows  {} columns",
                    dataset.id,
                    dataset.name,
                    rows,
                    dataset.columns.len()
                );
            }
        }
        DatasetsCommand::Show { id } => print_dataset(&client.get_dataset(&id).await?),
    }
    Ok(())
}

async fn preview(config: &ConsoleConfig, request: PreviewRequest) -> ConsoleResult<()> {
    let client = Arc::new(HttpClient::from_config(config)?);
    let (engine, mut events) = PreviewEngine::from_config(client, config);

    if let PreviewTicket::Skipped { reason } = engine.request(request) {
        return Err(ConsoleError::Validation(reason.to_string()));
    }
    match events.recv().await {
        Some(PreviewEvent::Ready(result)) => {
            println!("{}", result.channel.bold());
            println!("  epsilon        {}", result.epsilon);
            println!("  actual value   {:.4}", result.actual_value);
            println!("  private value  {:.4}", result.private_value);
            Ok(())
        }
        Some(PreviewEvent::Failed { error, .. }) => Err(ConsoleError::Transport(error)),
        Some(PreviewEvent::Cleared { .. }) | None => Err(ConsoleError::Transport(
            "preview produced no result".to_string(),
        )),
    }
}

async fn submit_job(config: &ConsoleConfig, args: SubmitArgs) -> ConsoleResult<()> {
    let client = Arc::new(HttpClient::from_config(config)?);
    let wizard = JobWizard::from_config(client.clone(), config)
        .with_ledger(client.clone())
        .with_datasets(client);

    let dataset = wizard.choose_dataset(&args.dataset).await?;
    if args.columns.is_empty() {
        let numeric: Vec<&str> = dataset.numeric_columns().map(|c| c.name.as_str()).collect();
        println!("Columns: all numeric ({})", numeric.join(", "));
    }
    wizard.set_columns(args.columns)?;
    wizard.next()?;
    wizard.set_metrics(args.metrics)?;
    wizard.set_epsilon(args.epsilon)?;
    wizard.set_mechanism(args.mechanism)?;
    if let Some(delta) = args.delta {
        wizard.set_delta(delta)?;
    }
    wizard.bind_scope(args.scope.as_deref())?;

    if let Some(scope) = wizard.bound_scope().await? {
        println!(
            "Budget scope {}: {:.4} epsilon remaining",
            scope.id.bold(),
            scope.remaining().epsilon
        );
    }
    wizard.next()?;

    let result = wizard.submit().await?;
    print_job(&result)
}

fn paint(band: UsageBand) -> String {
    match band {
        UsageBand::Healthy => band.green().to_string(),
        UsageBand::Moderate => band.yellow().to_string(),
        UsageBand::HighUsage => band.bright_red().to_string(),
        UsageBand::Critical => band.red().bold().to_string(),
    }
}

fn print_scope_line(scope: &BudgetScope, rules: &[AlertRule]) {
    let usage = scope.usage_ratio();
    let triggered = rules.iter().filter(|rule| rule.triggered).count();
    println!(
        "{:<20} {:>8.3}/{:<8.3} eps {:>5.1}%  delta {:>5.1}%  {:<10}  alerts {}/{}",
        scope.id,
        scope.consumed_epsilon,
        scope.total_epsilon,
        usage.epsilon_pct,
        usage.delta_pct,
        paint(scope.status().overall),
        triggered,
        rules.len()
    );
}

fn print_scope(scope: &BudgetScope) {
    let remaining = scope.remaining();
    let usage = scope.usage_ratio();
    let status = scope.status();

    println!("{} ({})", scope.id.bold(), scope.name);
    println!(
        "  epsilon  {:.4} of {:.4} used ({:.1}%)  {}",
        scope.consumed_epsilon, scope.total_epsilon, usage.epsilon_pct, paint(status.epsilon)
    );
    println!(
        "  delta    {:.2e} of {:.2e} used ({:.1}%)  {}",
        scope.consumed_delta, scope.total_delta, usage.delta_pct, paint(status.delta)
    );
    println!(
        "  remaining epsilon {:.4}, delta {:.2e}",
        remaining.epsilon, remaining.delta
    );
    println!("  status   {}", paint(status.overall));
    println!("  created  {}", scope.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
}

fn print_dataset(dataset: &Dataset) {
    println!("{} ({})", dataset.id.bold(), dataset.name);
    if let Some(description) = &dataset.description {
        println!("  {}", description);
    }
    for column in &dataset.columns {
        let kind = if column.is_numeric() { "numeric" } else { "categorical" };
        let pii = if column.is_pii { "  pii".red().to_string() } else { String::new() };
        println!("  {:<20} {:<10} {}{}", column.name, column.dtype, kind, pii);
    }
}

fn print_rule(rule: &AlertRule) {
    let state = if rule.triggered {
        "triggered".red().to_string()
    } else {
        "armed".green().to_string()
    };
    println!(
        "#{:<4} {:<16} at {:>5.1}%  -> {}  [{}]",
        rule.id, rule.scope_id, rule.threshold, rule.target, state
    );
}

fn print_job(result: &JobResult) -> ConsoleResult<()> {
    println!("Job {} {}", result.id.bold(), result.status);
    for item in &result.results {
        println!("{}", serde_json::to_string_pretty(item)?);
    }
    Ok(())
}
