//! Roomhop - multi-room meeting console
//!
//! Runs a host and a handful of simulated participants against the loopback
//! media backend, with the room directory carried over in-process pub/sub
//! or a local TCP hub.

use clap::Parser;
use roomhop_core::CoordinatorConfig;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod console;
mod error;
mod meeting;
mod network;
mod observer;

use cli::Args;
use meeting::{Flow, Meeting};

fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    tracing::info!(name = %args.name, guests = args.guests, tcp = args.tcp, "Starting Roomhop");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(args)) {
        tracing::error!("Roomhop failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> error::Result<()> {
    let config = CoordinatorConfig::load_or_default(args.config.as_deref())?;
    config.validate()?;

    let mut meeting = Meeting::start(&args, config).await?;
    println!(
        "{} with {} participant(s) over {}; type help for commands",
        args.name,
        args.guests,
        meeting.transport().describe()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match meeting.handle_line(&line).await {
                    Flow::Continue(out) => println!("{}", out),
                    Flow::Quit => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    meeting.shutdown().await;
    Ok(())
}
