use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use env_logger::Env;
use sqlx::postgres::PgPoolOptions;

use helpdesk_ingest::MIGRATOR;
use helpdesk_ingest::config::AppConfig;
use helpdesk_ingest::ingest::{Processor, worker::Worker};
use helpdesk_ingest::mail::ImapSmtpGateway;
use helpdesk_ingest::template::DirTemplates;

/// Bridge between a support mailbox and the ticket store.
#[derive(Parser)]
#[command(name = "helpdesk-ingest")]
struct Args {
    /// Run a single processing cycle and exit.
    #[arg(long)]
    once: bool,
    /// Apply database migrations and exit.
    #[arg(long)]
    migrate_only: bool,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            log::error!("{}", err);
            std::process::exit(2);
        }
    };

    let pool = match PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
    {
        Ok(pool) => pool,
        Err(err) => {
            log::error!("failed to connect to database: {}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = MIGRATOR.run(&pool).await {
        log::error!("database migrations failed: {}", err);
        std::process::exit(1);
    }
    log::info!("database migrations successful");

    if args.migrate_only {
        return;
    }

    let gateway = match ImapSmtpGateway::new(&config.mail) {
        Ok(gateway) => gateway,
        Err(err) => {
            log::error!("failed to initialize mail gateway: {}", err);
            std::process::exit(1);
        }
    };

    let templates = DirTemplates::new(config.processor.template_dir.clone());

    let processor = Processor::new(
        pool,
        Arc::new(gateway),
        Arc::new(templates),
        config.processor.clone(),
    );

    if args.once {
        let shutdown = AtomicBool::new(false);
        match processor.run_cycle(&shutdown).await {
            Ok(stats) => log::info!(
                "cycle complete: {} fetched, {} created, {} attached, {} duplicates, {} failures",
                stats.fetched,
                stats.created,
                stats.attached,
                stats.duplicates,
                stats.failures
            ),
            Err(err) => {
                log::error!("processing cycle failed: {}", err);
                std::process::exit(1);
            }
        }
        return;
    }

    let worker = Worker::new(processor, config.cadence.clone());

    let shutdown = worker.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("shutdown signal received");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    worker.run().await;
}
