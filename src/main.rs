use anyhow::Result;
use barsim::commands::{backtest, live, optimize};
use barsim::config::{GridSpec, RunConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "barsim")]
#[command(about = "EMA crossover backtesting, parameter search and live execution")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct StrategyArgs {
    /// Fast EMA period
    #[arg(long)]
    fast: Option<usize>,
    /// Slow EMA period
    #[arg(long)]
    slow: Option<usize>,
    /// Take-profit distance as a fraction of entry price (e.g. 0.003)
    #[arg(long)]
    take_profit: Option<f64>,
    /// Stop-loss distance as a fraction of entry price (e.g. 0.003)
    #[arg(long)]
    stop_loss: Option<f64>,
    /// Starting capital
    #[arg(long)]
    capital: Option<f64>,
    /// Disable the RSI entry filter
    #[arg(long)]
    no_rsi_filter: bool,
}

impl StrategyArgs {
    fn apply(&self, mut config: RunConfig) -> RunConfig {
        if let Some(fast) = self.fast {
            config.fast_period = fast;
        }
        if let Some(slow) = self.slow {
            config.slow_period = slow;
        }
        if let Some(tp) = self.take_profit {
            config.take_profit_pct = tp;
        }
        if let Some(sl) = self.stop_loss {
            config.stop_loss_pct = sl;
        }
        if let Some(capital) = self.capital {
            config.initial_capital = capital;
        }
        if self.no_rsi_filter {
            config.use_rsi_filter = false;
        }
        config
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single backtest over a CSV bar file
    Backtest {
        /// Path to the bar CSV (timestamp,open,high,low,close,volume)
        data_file: PathBuf,
        #[command(flatten)]
        strategy: StrategyArgs,
        /// Write the closed trade ledger to this CSV file
        #[arg(long = "trades-out", value_name = "PATH")]
        trades_out: Option<PathBuf>,
    },
    /// Search the parameter grid in parallel and rank results by Sharpe
    Optimize {
        /// Path to the bar CSV
        data_file: PathBuf,
        #[command(flatten)]
        strategy: StrategyArgs,
        /// Number of top configurations to print
        #[arg(long, default_value_t = 10)]
        top: usize,
        /// Write the full ranking to this CSV file
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Trade live against the venue REST API
    Live {
        /// Trading symbol, e.g. BTCUSDT
        symbol: String,
        /// Venue REST base URL
        #[arg(long = "base-url")]
        base_url: String,
        #[command(flatten)]
        strategy: StrategyArgs,
        /// Seconds between bar polls
        #[arg(long = "poll-secs", default_value_t = 60)]
        poll_secs: u64,
        /// Path for the persisted live state snapshot
        #[arg(long = "state-file", default_value = "live-state.json")]
        state_file: PathBuf,
        /// Cancel an order not acknowledged within this many seconds
        /// (unset: wait until the venue resolves it)
        #[arg(long = "order-timeout-secs")]
        order_timeout_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Backtest {
            data_file,
            strategy,
            trades_out,
        } => {
            let config = strategy.apply(RunConfig::default());
            backtest::run(&data_file, config, trades_out.as_deref())
        }
        Commands::Optimize {
            data_file,
            strategy,
            top,
            output,
        } => {
            let config = strategy.apply(RunConfig::default());
            optimize::run(&data_file, config, GridSpec::default(), top, output.as_deref())
        }
        Commands::Live {
            symbol,
            base_url,
            strategy,
            poll_secs,
            state_file,
            order_timeout_secs,
        } => {
            let config = strategy.apply(RunConfig::default());
            live::run(
                live::LiveArgs {
                    symbol,
                    base_url,
                    poll_secs,
                    state_file,
                    order_timeout_secs,
                },
                config,
            )
            .await
        }
    }
}
