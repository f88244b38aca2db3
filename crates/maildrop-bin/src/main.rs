//! maildropd - the maildrop delivery dispatcher daemon.

mod app;
mod logging;

use clap::Parser;
use delivery_dispatcher::{Dispatcher, DispatcherConfig, DispatcherPorts};
use mail_transport::{HttpMailer, MailerConfig};
use maildrop_database::{AsyncDatabase, SqliteStores};
use send_rate_limiter::{
    CounterStore, InMemoryCounterStore, RateLimiter, RateLimiterConfig, RedisCounterStore,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// maildropd command-line interface.
#[derive(Parser, Debug)]
#[command(name = "maildropd")]
#[command(about = "Email delivery dispatcher daemon")]
#[command(version)]
struct Args {
    /// SQLite database path
    #[arg(long, env = "MAILDROP_DB_PATH", default_value = "maildrop.db")]
    db_path: PathBuf,

    /// Redis URL for shared rate counters (empty = in-process counters)
    #[arg(long, env = "MAILDROP_REDIS_URL", default_value = "")]
    redis_url: String,

    /// Send API base URL
    #[arg(long, env = "MAILDROP_MAIL_API_URL", default_value = "https://mail.maildrop.dev")]
    mail_api_url: String,

    /// Send API bearer token
    #[arg(long, env = "MAILDROP_MAIL_API_TOKEN", default_value = "")]
    mail_api_token: String,

    /// Per-second send ceiling
    #[arg(long, env = "MAILDROP_PER_SECOND", default_value_t = 10)]
    per_second: u64,

    /// Per-minute send ceiling
    #[arg(long, env = "MAILDROP_PER_MINUTE", default_value_t = 300)]
    per_minute: u64,

    /// Maximum tasks claimed per batch
    #[arg(long, env = "MAILDROP_BATCH_SIZE", default_value_t = 50)]
    batch_size: u64,

    /// Maximum tasks processed concurrently
    #[arg(long, env = "MAILDROP_MAX_PARALLELISM", default_value_t = 10)]
    max_parallelism: usize,

    /// HTTP listen address
    #[arg(long, env = "MAILDROP_HTTP_ADDR", default_value = "127.0.0.1:8383")]
    http_addr: SocketAddr,

    /// Built-in scheduler tick in seconds (0 = external triggers only)
    #[arg(long, env = "MAILDROP_INTERVAL_SECS", default_value_t = 0)]
    interval_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "MAILDROP_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting maildropd");

    let db = AsyncDatabase::open(&args.db_path).await?;
    let stores = Arc::new(SqliteStores::new(db.clone()));

    let counter_store: Arc<dyn CounterStore> = if args.redis_url.is_empty() {
        warn!("No Redis URL configured, rate counters are process-local");
        Arc::new(InMemoryCounterStore::new())
    } else {
        Arc::new(RedisCounterStore::connect(&args.redis_url).await?)
    };
    let limiter = RateLimiter::new(
        counter_store,
        RateLimiterConfig {
            per_second: args.per_second,
            per_minute: args.per_minute,
        },
    );

    let transport = Arc::new(HttpMailer::new(
        MailerConfig {
            api_url: args.mail_api_url.clone(),
            timeout_secs: 30,
        },
        &args.mail_api_token,
    ));

    let ports = DispatcherPorts {
        tasks: stores.clone(),
        projects: stores.clone(),
        triggers: stores.clone(),
        campaigns: stores.clone(),
        receipts: stores,
        transport,
    };
    let dispatcher = Dispatcher::new(
        ports,
        limiter,
        DispatcherConfig {
            batch_size: args.batch_size,
            max_parallelism: args.max_parallelism,
        },
    );

    let router = app::build_router(app::AppState {
        dispatcher: dispatcher.clone(),
        db: db.clone(),
    });
    let listener = tokio::net::TcpListener::bind(args.http_addr).await?;
    info!(addr = %args.http_addr, "HTTP surface listening");

    let server = tokio::spawn(async move { axum::serve(listener, router).await });

    if args.interval_secs > 0 {
        info!(interval_secs = args.interval_secs, "Built-in scheduler enabled");
        tokio::spawn(scheduler_loop(dispatcher, args.interval_secs));
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server => {
            match result {
                Ok(Err(e)) => error!(error = %e, "HTTP server exited with error"),
                Err(e) => error!(error = %e, "HTTP server task panicked"),
                Ok(Ok(())) => {}
            }
        }
    }

    db.close().await?;
    info!("maildropd stopped");
    Ok(())
}

/// Run one batch per tick. Errors are logged and the loop continues; a
/// broken store on one tick must not kill the scheduler.
async fn scheduler_loop(dispatcher: Dispatcher, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        match dispatcher.run_batch().await {
            Ok(summary) => {
                if summary.processed > 0 || summary.rate_limited {
                    info!(
                        processed = summary.processed,
                        rate_limited = summary.rate_limited,
                        "Batch complete"
                    );
                }
            }
            Err(e) => {
                error!(error = %e, "Batch failed");
            }
        }
    }
}
