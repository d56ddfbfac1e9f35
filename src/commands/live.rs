use crate::broker::{RestVenue, VenueCredentials};
use crate::config::RunConfig;
use crate::live::{poll_bar_feed, LiveCoordinator, LiveSettings};
use crate::strategy::EmaCrossStrategy;
use anyhow::Result;
use log::{info, warn};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub struct LiveArgs {
    pub symbol: String,
    pub base_url: String,
    pub poll_secs: u64,
    pub state_file: PathBuf,
    /// Cancel orders not acknowledged within this many seconds; off by
    /// default so orders are watched until the venue resolves them.
    pub order_timeout_secs: Option<u64>,
}

pub async fn run(args: LiveArgs, config: RunConfig) -> Result<()> {
    config.validate()?;
    let creds = VenueCredentials::from_env(args.base_url.clone())?;

    // Separate clients so the bar feed and the coordinator never contend
    // for one connection's rate-limit delay.
    let trading_venue = RestVenue::new(&creds, &args.symbol)?;
    let feed_venue = RestVenue::new(&creds, &args.symbol)?;

    let settings = LiveSettings {
        poll_interval: Duration::from_secs(args.poll_secs),
        state_path: args.state_file,
        history_bars: config.warmup_bars().max(200),
        order_timeout: args.order_timeout_secs.map(Duration::from_secs),
    };
    let strategy = EmaCrossStrategy::from_config(&config);
    let coordinator = LiveCoordinator::new(trading_venue, strategy, config, settings.clone());

    let (bar_tx, bar_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received; requesting shutdown");
            let _ = signal_tx.send(true);
        }
    });

    info!(
        "Starting live trading for {} (poll every {}s)",
        args.symbol, args.poll_secs
    );
    let feed = poll_bar_feed(
        &feed_venue,
        settings.poll_interval,
        bar_tx,
        shutdown_rx.clone(),
    );
    // Whichever side finishes first flips the shutdown flag so the other
    // side winds down instead of waiting on a dead channel.
    let coordinator_task = async {
        let result = coordinator.run(bar_rx, shutdown_rx).await;
        let _ = shutdown_tx.send(true);
        result
    };
    let (run_result, feed_result) = tokio::join!(coordinator_task, feed);
    feed_result?;
    run_result
}
