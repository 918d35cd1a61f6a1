//! Display surface for machines without a usable terminal: one log line per second.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Screen;

pub async fn run(mut screen: watch::Receiver<Screen>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let snapshot = screen.borrow_and_update().clone();
        let Some(peer) = snapshot.peer else {
            debug!("no signal");
            continue;
        };

        match snapshot.resolution() {
            Some((width, height)) => info!(%peer, fps = snapshot.fps, width, height, skipped = snapshot.skipped, "receiving"),
            None => info!(%peer, "connected, waiting for the first frame"),
        }
    }
}
