//! mvirt-router daemon: diverts control-plane protocols to host TAP devices.
//!
//! This binary has no packet I/O of its own. It builds the in-process
//! dataplane from the config file, provisions and pairs the host TAPs, and
//! mirrors host namespace changes. The packet worker runs only to apply
//! main-context requests (link admin state); no frame source feeds it here.
//! A dataplane driver embedding the library pushes frames through
//! [`WorkItem`] on the worker input and consumes [`Output`].

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use arc_swap::ArcSwap;
use clap::Parser;
use tokio::runtime::Handle;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mvirt_router::config::DEFAULT_CONFIG_PATH;
use mvirt_router::hooks::InputHooks;
use mvirt_router::main_context::main_context;
use mvirt_router::worker::{Output, WorkItem};
use mvirt_router::{
    DisabledSource, HostTapProvisioner, InjectCounters, InterfaceId, MappingDirectory,
    NamespaceSource, NetlinkSource, RouterConfig, SyncBridge, TapInject, Worker, WorkerConfig,
    spawn_worker,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the router config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Do not mirror host namespace changes into the dataplane
    #[arg(long)]
    no_netns: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    info!(config = %args.config.display(), "mvirt-router starting...");

    let config = RouterConfig::load(&args.config).context("Failed to load config")?;
    let dataplane = Arc::new(
        config
            .build_dataplane()
            .context("Failed to build dataplane")?,
    );
    info!(interfaces = config.interfaces.len(), "Dataplane initialized");

    let directory = Arc::new(MappingDirectory::new());
    let hooks = Arc::new(ArcSwap::from_pointee(InputHooks::default()));
    let counters = Arc::new(InjectCounters::new());
    let (main_handle, main_ctx) = main_context();

    let namespace: Box<dyn NamespaceSource> = if args.no_netns {
        Box::new(DisabledSource)
    } else {
        let bridge = Arc::new(SyncBridge::new(
            Arc::clone(&directory),
            Arc::clone(&dataplane),
            main_handle,
        ));
        Box::new(NetlinkSource::new(Handle::current(), bridge))
    };

    let router = TapInject::new(
        Arc::clone(&directory),
        Arc::clone(&dataplane),
        Arc::clone(&hooks),
        HostTapProvisioner::new(Arc::clone(&dataplane)),
        namespace,
    );

    for iface in &config.interfaces {
        router.interface_added(InterfaceId(iface.id));
    }

    for entry in &config.inject {
        let result = entry
            .resolve(dataplane.as_ref())
            .map_err(mvirt_router::Error::from)
            .and_then(|request| router.enable(&request));
        match result {
            Ok(tap) => info!(from = %entry.from, tap = %entry.tap, host_index = tap.host_index, "tap inject enabled"),
            Err(e) => error!(from = %entry.from, tap = %entry.tap, error = %e, "tap inject failed"),
        }
    }

    // No frame source in this binary: the input sender is held only so the
    // worker keeps running and applying main-context requests.
    let (frames_tx, frames_rx) = crossbeam_channel::unbounded::<WorkItem>();
    let (output_tx, output_rx) = crossbeam_channel::unbounded::<Output>();

    let worker = Worker::new(WorkerConfig {
        directory: Arc::clone(&directory),
        dataplane: Arc::clone(&dataplane),
        hooks: Arc::clone(&hooks),
        counters: Arc::clone(&counters),
        main: main_ctx,
        input: frames_rx,
        output: output_tx,
    });
    let worker = spawn_worker(worker).context("Failed to start packet worker")?;

    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;

    info!("mvirt-router running");
    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
    }

    worker.stop();
    drop(frames_tx);
    if let Err(e) = worker.join() {
        warn!(error = %e, "Packet worker did not exit cleanly");
    }
    let pending = output_rx.try_iter().count();
    if pending > 0 {
        warn!(pending, "Discarding undelivered worker output");
    }

    for (name, count) in counters.snapshot() {
        info!(counter = name, count, "Injection counter");
    }

    info!("mvirt-router stopped");
    Ok(())
}
