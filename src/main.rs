//! hrnotify - Date-driven HR email notifications.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use hrnotify::cli::{Cli, Command, LogFormat, SendArgs};
use hrnotify::config::{Config, RuntimeConfig, StoreConfig};
use hrnotify::notify::{LogTransport, MailTransport};
use hrnotify::{
    Clock, DispatchSettings, Dispatcher, FileLedger, FixedClock, JsonDirStore, Layout, Mailer,
    RecordStore, RetryPolicy, SystemClock, TextfileExporter, transport_from_config,
};

/// Initialize the tracing subscriber with the specified log format.
///
/// Logs go to stderr; stdout carries the JSON results only.
fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .flatten_event(true)
                .with_env_filter(filter)
                .init();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.log_format);

    info!(config_path = %cli.config.display(), "Loading configuration");

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, path = %cli.config.display(), "Failed to load configuration");
            std::process::exit(1);
        }
    };

    // Fail fast: nothing runs on an invalid configuration.
    if let Err(errors) = config.validate() {
        for e in &errors {
            error!(error = %e, "Configuration validation error");
        }
        error!(
            error_count = errors.len(),
            "Configuration validation failed"
        );
        std::process::exit(1);
    }

    if cli.validate {
        println!("Configuration is valid: {}", cli.config.display());
        println!("  Timezone: {}", config.timezone);
        match &config.store {
            StoreConfig::JsonDir { path } => println!("  Store: json_dir ({})", path.display()),
        }
        println!("  Transport: {}", config.transport.kind());
        println!(
            "  Layout: {}",
            config
                .dispatch
                .layout_template_file
                .as_deref()
                .unwrap_or("none")
        );
        println!(
            "  Ledger: {}",
            if config.dispatch.ledger_path.is_some() {
                "enabled"
            } else {
                "disabled"
            }
        );
        return Ok(());
    }

    let runtime_config = config.compile()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(runtime_config, cli))
}

/// One dispatch pass, or a single ad-hoc email under `send`.
async fn run(config: RuntimeConfig, cli: Cli) -> Result<()> {
    let exporter = match &config.metrics.textfile_path {
        Some(_) => Some(TextfileExporter::install()?),
        None => None,
    };

    let clock: Arc<dyn Clock> = match cli.date {
        Some(date) => {
            info!(date = %date, "Evaluating rules for a fixed date");
            Arc::new(FixedClock::new(date))
        }
        None => Arc::new(SystemClock::new(config.timezone)),
    };
    let today = clock.today();

    let store: Arc<dyn RecordStore> = match &config.store {
        StoreConfig::JsonDir { path } => Arc::new(JsonDirStore::new(path.clone())),
    };

    let transport: Arc<dyn MailTransport> = if cli.dry_run {
        info!("Dry run, emails are logged instead of sent");
        Arc::new(LogTransport)
    } else {
        let http_client = reqwest::Client::builder()
            .timeout(config.dispatch.send_timeout)
            .build()?;
        transport_from_config(&config.transport, http_client)?
    };
    let mailer = Mailer::new(
        transport,
        RetryPolicy::new(config.dispatch.max_attempts, config.dispatch.send_timeout),
    );

    let mut dispatcher = Dispatcher::new(store, mailer, clock).with_settings(DispatchSettings {
        sender_email: config.dispatch.sender_email.clone(),
        max_concurrent_rules: config.dispatch.max_concurrent_rules,
        html_dump_path: config.dispatch.html_dump_path.clone(),
    });
    if let Some(source) = &config.layout_source {
        dispatcher = dispatcher.with_layout(Layout::new(source.as_str())?);
    }

    if let Some(Command::Send(args)) = &cli.command {
        let outcome = send(&dispatcher, args).await;
        write_metrics(exporter.as_ref(), &config);
        return outcome;
    }

    // A dry run must not mark anything as delivered.
    if let Some(path) = &config.dispatch.ledger_path
        && !cli.dry_run
    {
        let ledger = FileLedger::open(path, today).await?;
        dispatcher = dispatcher.with_ledger(Arc::new(ledger));
    }

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c signal");
            return;
        }
        info!("Received shutdown signal, skipping rules not yet started");
        cancel_clone.cancel();
    });

    let outcome = dispatcher.run(cancel).await;

    write_metrics(exporter.as_ref(), &config);

    match outcome {
        Ok(results) => {
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Dispatch run aborted");
            Err(anyhow::anyhow!("Dispatch error: {}", e))
        }
    }
}

/// Ad-hoc email; fails when the sender is unknown or any recipient failed.
async fn send(dispatcher: &Dispatcher, args: &SendArgs) -> Result<()> {
    let html = tokio::fs::read_to_string(&args.html)
        .await
        .with_context(|| format!("failed to read email body {}", args.html.display()))?;

    let reports = dispatcher
        .send_message(args.from.as_deref(), &args.to, &args.subject, &html)
        .await
        .map_err(|e| anyhow::anyhow!("Send error: {}", e))?;
    println!("{}", serde_json::to_string_pretty(&reports)?);

    let failed = reports.iter().filter(|r| !r.ok).count();
    if failed > 0 {
        anyhow::bail!("{} of {} recipients failed", failed, reports.len());
    }
    Ok(())
}

fn write_metrics(exporter: Option<&TextfileExporter>, config: &RuntimeConfig) {
    if let (Some(exporter), Some(path)) = (exporter, &config.metrics.textfile_path)
        && let Err(e) = exporter.write(path)
    {
        warn!(error = %e, "Failed to write metrics textfile");
    }
}
