// Copyright 2026 Tanuki Notifier Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tanuki_notifier::acquisition::http_client::ShopClient;
use tanuki_notifier::catalog::Extractor;
use tanuki_notifier::config::{resolve_config_path, RuntimeConfig, Settings};
use tanuki_notifier::logging::{self, DEFAULT_LOG_FILE};
use tanuki_notifier::notify::telegram::TelegramNotifier;
use tanuki_notifier::reconcile::ReconcileEngine;
use tanuki_notifier::scheduler::PollScheduler;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "tanuki-notifier",
    about = "Announce Tanuki special offers to a Telegram channel",
    version
)]
struct Cli {
    /// Settings file (default: $TANUKI_CONFIG, then ./config.json)
    #[arg(long)]
    config: Option<String>,

    /// Append logs to this file
    #[arg(long, default_value = DEFAULT_LOG_FILE)]
    log_file: PathBuf,

    /// Log to stderr only
    #[arg(long, conflicts_with = "log_file")]
    no_log_file: bool,

    /// Enable debug logging
    #[arg(long, short)]
    verbose: bool,

    /// Emit stderr logs as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_file = (!cli.no_log_file).then_some(cli.log_file.as_path());
    logging::init(cli.verbose, cli.json, log_file)?;

    let runtime = RuntimeConfig::from_env()?;
    let config_path = resolve_config_path(cli.config.as_deref());
    let settings = Settings::load_or_prompt(&config_path)?;

    let shop = ShopClient::new(runtime.origin.clone(), runtime.request_timeout)?;
    let extractor = Extractor::new(shop.origin().clone());
    let engine = ReconcileEngine::new(shop.clone(), extractor);
    let notifier = TelegramNotifier::new(
        &runtime.telegram_api,
        settings.bot_token.as_str(),
        runtime.request_timeout,
    )?;

    let mut scheduler =
        PollScheduler::new(shop, engine, notifier, settings.channel, runtime.backoff);

    info!(origin = %runtime.origin, "starting");
    tokio::select! {
        result = scheduler.run() => {
            if let Err(e) = &result {
                if e.is_rejected_credential() {
                    error!(error = %e, "bot credential rejected");
                } else {
                    error!(error = %e, "could not verify bot credential");
                }
            }
            result.context("failed to start notifier")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    Ok(())
}
