use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use rtt_arbiter::{
    ArbiterConfig, ArbiterHandle, ArbiterService, ArbiterSnapshot, ChannelSink, ClientId,
    MacAddress, Notification, RangingTarget, SimulatedDriver,
};

mod cli;

use cli::{Cli, Commands, SimulateArgs};

#[derive(Serialize)]
struct Delivery {
    client: ClientId,
    #[serde(flatten)]
    notification: Notification,
}

#[derive(Serialize)]
struct Report {
    notifications: Vec<Delivery>,
    snapshot: ArbiterSnapshot,
}

fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout carries the JSON report
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Receive until `count` replies matching `done` have arrived
async fn collect(
    rx: &mut UnboundedReceiver<(ClientId, Notification)>,
    log: &mut Vec<Delivery>,
    count: usize,
    done: impl Fn(&Notification) -> bool,
) -> Result<Vec<Delivery>> {
    let mut matched = Vec::new();
    while matched.len() < count {
        let Some((client, notification)) = rx.recv().await else {
            bail!("arbiter stopped with {} replies outstanding", count - matched.len());
        };
        debug!(%client, key = notification.key(), "notification received");

        if done(&notification) {
            matched.push(Delivery {
                client,
                notification: notification.clone(),
            });
        }
        log.push(Delivery {
            client,
            notification,
        });
    }
    Ok(matched)
}

async fn run_responders(
    handle: &ArbiterHandle,
    rx: &mut UnboundedReceiver<(ClientId, Notification)>,
    log: &mut Vec<Delivery>,
    responders: u32,
) -> Result<()> {
    let clients: Vec<ClientId> = (0..responders).map(|_| ClientId::new()).collect();
    for client in &clients {
        handle.enable_responder(*client, 1, true)?;
    }

    let replies = collect(rx, log, clients.len(), |n| {
        matches!(n, Notification::ResponderEnabled { .. } | Notification::Failed { .. })
    })
    .await?;
    let enabled: Vec<ClientId> = replies
        .iter()
        .filter(|d| matches!(d.notification, Notification::ResponderEnabled { .. }))
        .map(|d| d.client)
        .collect();
    info!(enabled = enabled.len(), "responder leases granted");

    for client in &enabled {
        handle.disable_responder(*client, 1)?;
    }
    collect(rx, log, enabled.len(), |n| {
        matches!(n, Notification::ResponderDisableAcknowledged { .. })
    })
    .await?;
    Ok(())
}

async fn simulate(config: ArbiterConfig, args: SimulateArgs) -> Result<()> {
    let service = ArbiterService::new(config);
    let handle = service.handle();
    let driver = SimulatedDriver::new(
        &handle,
        Duration::from_millis(args.delay_ms),
        args.reject_rate,
    );
    let (sink, mut rx) = ChannelSink::new();
    let task = service.spawn(Arc::new(driver), Arc::new(sink));

    handle.driver_loaded().context("Failed to load simulated driver")?;

    let targets: Vec<RangingTarget> = (1..=args.targets)
        .map(|n| RangingTarget::new(MacAddress([0x02, 0x00, 0x00, 0x00, 0x00, n])))
        .collect();
    let clients: Vec<ClientId> = (0..args.clients).map(|_| ClientId::new()).collect();
    for key in 1..=args.requests {
        for client in &clients {
            handle.start_ranging(*client, key, targets.clone(), true)?;
        }
    }
    info!(clients = clients.len(), requests = args.requests, "ranging requests posted");

    let mut log = Vec::new();
    let expected = clients.len() * usize::try_from(args.requests)?;
    collect(&mut rx, &mut log, expected, Notification::is_terminal)
        .await
        .context("Ranging did not finish")?;

    if args.responders > 0 {
        run_responders(&handle, &mut rx, &mut log, args.responders)
            .await
            .context("Responder round did not finish")?;
    }

    let snapshot = handle.snapshot().await.context("Failed to read arbiter state")?;
    handle.shutdown()?;
    task.await.context("Arbiter task failed")?;

    let report = Report {
        notifications: log,
        snapshot,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbosity);

    let config = ArbiterConfig::load(cli.config.as_deref()).context("Failed to load config")?;

    match cli.command {
        Commands::Simulate(args) => simulate(config, args).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
