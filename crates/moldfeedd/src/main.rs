//! moldfeedd: MoldUDP64 feed handler.
//!
//! Live mode joins the multicast group and decodes until the message cap
//! or Ctrl-C. Gap-fill mode (`-g`) learns the session from the live feed,
//! then downloads a sequence range from the rerequest server.

use std::process::ExitCode;

use anyhow::{Context, Result};

use moldfeed_core::config::FeedConfig;
use moldfeed_services::{
    LiveFeed, MulticastChannel, Pipeline, RecoveryEngine, RecoveryPlan, TypeFilter,
    UnicastChannel,
};

mod cli;
mod report;

use cli::{Command, Options};
use report::ConsoleSink;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let opts = match cli::parse(std::env::args().skip(1)) {
        Ok(Command::Run(opts)) => opts,
        Ok(Command::Help) => {
            cli::print_usage();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("moldfeedd: {e:#}");
            eprintln!("Run 'moldfeedd -h' for usage.");
            return ExitCode::FAILURE;
        }
    };

    let default_level = if opts.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(opts).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(opts: Options) -> Result<ExitCode> {
    let config = FeedConfig::load().context("failed to load config")?;
    let table = config
        .load_layout()
        .with_context(|| format!("failed to load layout {}", config.layout_path.display()))?;
    tracing::info!(
        layout = %config.layout_path.display(),
        message_types = table.len(),
        "layout loaded"
    );

    let filter = (!opts.types.is_empty()).then(|| TypeFilter::new(opts.types.iter().copied()));

    let pipeline = Pipeline::new(&table, filter, opts.max_messages);

    if opts.gap_fill {
        run_recovery(&config, &opts, pipeline).await
    } else {
        run_live(&config, &opts, pipeline).await
    }
}

async fn run_live(config: &FeedConfig, opts: &Options, pipeline: Pipeline<'_>) -> Result<ExitCode> {
    let target = config.multicast()?;
    let channel = MulticastChannel::connect(&target, config.recovery_settings.receive_buffer_bytes)?;
    if let Ok(bytes) = channel.receive_buffer_size() {
        tracing::debug!(bytes, "receive buffer");
    }

    let mut sink = ConsoleSink::stdout(opts.verbose);
    let mut feed = LiveFeed::new(channel, pipeline);

    tokio::select! {
        _ = feed.run(&mut sink) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, stopping");
        }
    }

    let summary = feed.summary();
    tracing::info!(packets = summary.packets, decoded = summary.decoded, "live feed stopped");
    Ok(ExitCode::SUCCESS)
}

async fn run_recovery(
    config: &FeedConfig,
    opts: &Options,
    pipeline: Pipeline<'_>,
) -> Result<ExitCode> {
    let settings = &config.recovery_settings;
    let target = config.multicast()?;
    let rerequester = config.rerequester()?;

    let live = MulticastChannel::connect(&target, settings.receive_buffer_bytes)?;
    let replay = UnicastChannel::open(rerequester, settings.receive_buffer_bytes, settings.reply_timeout())
        .context("failed to open rerequest channel")?;

    let plan = RecoveryPlan {
        start: opts.start_sequence,
        total: opts.recovery_total(),
        chunk_size: settings.chunk_size(),
        session_timeout: settings.session_timeout(),
    };

    let mut sink = ConsoleSink::stdout(opts.verbose);
    let report = RecoveryEngine::new(live, replay, pipeline, plan)
        .run(&mut sink)
        .await
        .context("recovery failed")?;

    Ok(if report.outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
