// ABOUTME: Minimal client binary: connects, runs the bootstrap sequence, and exits
// ABOUTME: Demonstrates waycore::client::Display driving get_registry + sync

use argh::FromArgs;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use waycore::client::Display;

/// Minimal client exercising the wire-protocol core's bootstrap sequence.
#[derive(FromArgs)]
struct CliArgs {
    /// whether or not to enable debug logging
    #[argh(switch, short = 'd')]
    debugging: bool,
}

fn main() -> waycore::Result<()> {
    let cli_args: CliArgs = argh::from_env();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli_args.debugging {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut display = Display::connect()?;
    info!("connected");

    display.get_registry()?;
    display.roundtrip()?;
    info!("bootstrap complete: registry bound, first sync fired");

    Ok(())
}
