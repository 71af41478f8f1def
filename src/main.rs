use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use pve_tunnel::cli::Cli;
use pve_tunnel::{init_logging, Orchestrator, RunEvent, RunEventEmitter, SshConnector};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level());
    let json = cli.json;

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(1);
        }
    };

    let (emitter, mut events) = RunEventEmitter::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event, json);
        }
    });

    // Ctrl-C ends the run; teardown still happens inside the orchestrator
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, closing tunnel");
            trigger.cancel();
        }
    });

    let orchestrator = Orchestrator::new(SshConnector, config).with_emitter(emitter);
    let result = orchestrator.run(&cancel).await;
    drop(orchestrator);
    let _ = printer.await;

    match result {
        Ok(outcome) => ExitCode::from(outcome.exit_code() as u8),
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::from(1)
        }
    }
}

fn print_event(event: &RunEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => error!("Failed to encode event: {}", e),
        }
        return;
    }

    match event {
        RunEvent::Connected { host } => println!("Connected to {}", host),
        RunEvent::ForwardingActive {
            local_addr,
            destination,
        } => println!("Tunnel active: {} -> {}", local_addr, destination),
        RunEvent::LaunchStarted { command } => println!("Starting migration: {}", command),
        RunEvent::LaunchFailed {
            exit_status,
            stderr,
        } => {
            let status = exit_status.map_or_else(|| "none".to_string(), |s| s.to_string());
            println!("Migration command failed (exit status {})", status);
            if !stderr.trim().is_empty() {
                println!("{}", stderr.trim());
            }
        }
        RunEvent::Poll {
            attempt,
            max_attempts,
        } => println!("Checking migration status ({}/{})...", attempt, max_attempts),
        RunEvent::Completed { polls } => {
            println!("Migration completed (confirmed after {} checks)", polls)
        }
        RunEvent::TimedOut { polls } => println!(
            "Migration not confirmed after {} checks; verify its state manually",
            polls
        ),
        RunEvent::HoldingTunnel => println!("Tunnel held open, press Ctrl-C to close it"),
        RunEvent::Cancelled => println!("Interrupted"),
        RunEvent::Aborted { error } => println!("Aborted: {}", error),
        RunEvent::TornDown => println!("Tunnel closed"),
    }
}
