//! End-to-end demo: a scheduler with a few representative trading tasks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};
use tradeloop_core::{
    Market, Task, TaskError, TaskScheduler, TradingCalendar, async_action, blocking_action,
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    info!("starting scheduler demo");

    let calendar = TradingCalendar::default();
    let now = Utc::now();
    info!(
        moex_open = calendar.is_market_open(Market::Moex, now),
        nyse_open = calendar.is_market_open(Market::Nyse, now),
        trading_day = calendar.is_trading_day(now.date_naive()),
        "calendar state"
    );
    info!(
        suggested = %calendar.optimal_run_time("market_data_refresh", Some(Market::Moex), now),
        "next suggested market-data refresh"
    );

    let scheduler = Arc::new(TaskScheduler::new(calendar));

    scheduler
        .add(
            Task::builder(
                "market_data_refresh",
                async_action(|| async {
                    info!("refreshing market data");
                    Ok(())
                }),
                Duration::from_secs(2),
            )
            .priority(10)
            .market(Market::Moex)
            .build(),
        )
        .unwrap();

    scheduler
        .add(
            Task::builder(
                "news_fetch",
                async_action(|| async {
                    info!("fetching news feeds");
                    Ok(())
                }),
                Duration::from_secs(3),
            )
            .priority(5)
            .build(),
        )
        .unwrap();

    scheduler
        .add(
            Task::builder(
                "indicators_calc",
                blocking_action(|| {
                    info!("recalculating indicators");
                    Ok(())
                }),
                Duration::from_secs(5),
            )
            .priority(1)
            .dependencies(["market_data_refresh"])
            .build(),
        )
        .unwrap();

    // A task that exhausts its error budget, to show backoff and parking.
    scheduler
        .add(
            Task::builder(
                "broken_endpoint",
                async_action(|| async { Err(TaskError::retryable("connection refused")) }),
                Duration::from_secs(2),
            )
            .max_errors(2)
            .build(),
        )
        .unwrap();

    scheduler.start();
    sleep(Duration::from_secs(10)).await;

    let status = scheduler.status();
    info!(
        total = status.total_tasks,
        enabled = status.enabled_tasks,
        failed = status.failed_tasks,
        "scheduler status"
    );
    match serde_json::to_string_pretty(&status) {
        Ok(json) => println!("{json}"),
        Err(err) => info!(%err, "status not serializable"),
    }

    info!("shutting down scheduler");
    scheduler.stop().await;
}
