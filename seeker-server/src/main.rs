//! Seeker process entry point: load and validate configuration, parse the
//! expected-components topology, bring up the proxy fabric listeners and
//! the operator surface, then hand control to the activity strategy.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use seeker_config::{load_config, SeekerArgs};
use seeker_core::ExpectedTopology;
use seeker_server::admin::{self, AdminContext};
use seeker_server::site::Site;
use seeker_server::strategy::ActivityStrategy;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let args = SeekerArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_filter())),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "failed to build runtime");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "seeker exited with error");
            ExitCode::from(1)
        }
    }
}

async fn run(args: SeekerArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if args.no_database {
        config.database.use_database = false;
    }
    if let Some(path) = &args.expected_components {
        config.topology.expected_components_file = path.display().to_string();
    }

    let topology =
        ExpectedTopology::parse_file(Path::new(&config.topology.expected_components_file))?;
    info!(
        site = %config.server.site_name,
        file = %config.topology.expected_components_file,
        "expected components loaded"
    );

    let site = Arc::new(Site::new(&config, topology).await?);
    site.spawn_listeners(&config).await?;

    let mut strategy = ActivityStrategy::new(Arc::clone(&site), config.clone())?;

    // Rebuild per-target coverage from the observation history.
    if let Some(history) = &site.obs_history {
        let rows = history.full_coverage().await?;
        strategy.scheduler_mut().update_observed_freqs(rows);
    }

    let (scheduler_stop, stop_rx) = watch::channel(false);
    let admin_ctx = AdminContext {
        site: Arc::clone(&site),
        current_activity: strategy.current_activity_slot(),
        scheduler_stop: scheduler_stop.clone(),
    };
    admin::serve(admin_ctx, config.server.admin_port).await?;

    let strategy_task = tokio::spawn(async move {
        strategy.run(stop_rx).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = scheduler_stop.send(true);
    strategy_task.abort();
    let _ = strategy_task.await;
    Ok(())
}
