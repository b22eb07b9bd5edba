use crate::storage::UserStorage;
use crate::store::SimulationStore;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Stop after this many ticks; run until Ctrl-C when unset.
    pub ticks: Option<u64>,
}

/// Runs the store on its own timer without a UI.
///
/// Sleeps until each deadline of the store's ticker and polls it. On return
/// the store is paused, so its timer is disarmed whatever ended the run.
/// Returns the number of ticks completed.
pub async fn run_headless<S: UserStorage>(
    store: &mut SimulationStore<S>,
    options: RunOptions,
) -> u64 {
    let mut completed = 0;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut listen_for_signal = true;

    store.start(Instant::now());
    info!(
        interval_ms = store.config().tick_interval_ms,
        limit = ?options.ticks,
        "Headless run started"
    );

    loop {
        if options.ticks.is_some_and(|limit| completed >= limit) {
            break;
        }
        let Some(due) = store.next_due() else {
            break;
        };

        tokio::select! {
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(due)) => {
                if store.poll(Instant::now()) {
                    completed += 1;
                }
            }
            result = &mut ctrl_c, if listen_for_signal => {
                match result {
                    Ok(()) => {
                        info!("Interrupted, stopping simulation");
                        break;
                    }
                    Err(err) => {
                        warn!("Cannot listen for Ctrl-C: {err}");
                        listen_for_signal = false;
                    }
                }
            }
        }
    }

    store.pause();
    info!(ticks = completed, "Headless run finished");
    completed
}
