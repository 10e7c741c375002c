use anyhow::{Context, Result};
use lib_livefeed::feed::LiveFeedClient;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

mod watch_logic;
use watch_logic::{config, logger, screen};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let config = config::load_config();
    logger::setup_logging(&config.log_dir(), config.log_level())?;

    let feed_config = config.to_feed_config()?;
    log::info!("Watching {}", feed_config.stream_url);
    let client = LiveFeedClient::connect(&feed_config, screen::Screen::default())
        .context("Failed to start the live feed")?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    // Wait for shutdown signal; Enter forces a reconnect
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Ctrl-C received, initiating shutdown.");
                break;
            }
            _ = terminate() => {
                log::info!("SIGTERM received, initiating shutdown.");
                break;
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(_)) => {
                    log::info!("Manual retry ({} after {} attempts).", client.status(), client.attempt_count());
                    client.retry();
                }
                // stdin closed; keep watching until a signal arrives
                Ok(None) | Err(_) => stdin_open = false,
            },
        }
    }

    client.disconnect();
    log::info!("Shutdown complete.");
    Ok(())
}

async fn terminate() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(e) => {
                log::warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        // On non-unix platforms, just wait forever.
        std::future::pending::<()>().await;
    }
}
