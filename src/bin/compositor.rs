// ABOUTME: Minimal compositor binary: binds the server socket and advertises the core globals
// ABOUTME: Demonstrates waycore::server::Display driving a single-threaded poll loop

use argh::FromArgs;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use waycore::generated::{compositor, seat, shell};
use waycore::server::Display;
use waycore::shm::Shm;

/// Minimal compositor exercising the wire-protocol core's server half.
#[derive(FromArgs)]
struct CliArgs {
    /// whether or not to enable debug logging
    #[argh(switch, short = 'd')]
    debugging: bool,

    /// how many milliseconds to wait per poll iteration (default: 1000)
    #[argh(option)]
    poll_timeout_ms: Option<u16>,
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

    let mut display = Display::bind()?;
    display.add_global("wl_compositor", 4, |id| {
        Box::new(compositor::CompositorResource::new(id))
    });
    display.add_global("wl_shm", 1, |id| Box::new(Shm::new(id)));
    display.add_global("wl_seat", 5, |id| Box::new(seat::SeatResource::new(id)));
    display.add_global("wl_shell", 1, |id| Box::new(shell::ShellResource::new(id)));

    info!(socket = %display.socket_name(), "compositor ready");

    let timeout_ms = cli_args.poll_timeout_ms.unwrap_or(1000);
    loop {
        display.run_once(timeout_ms)?;
    }
}
