use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::utils::clock::Clock;

pub const TICK_FREQUENCY: Duration = Duration::from_secs(1);

/// One beat of the ticker. Consumers read the time from their own clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick;

/// Emits a [Tick] every `frequency` until cancelled. Ticks are scheduled against the start
/// instant, so a slow consumer doesn't make them drift.
pub struct Ticker {
    next: mpsc::Sender<Tick>,
    shutdown: CancellationToken,
    frequency: Duration,
    clock: Arc<dyn Clock>,
}

impl Ticker {
    pub fn new(
        next: mpsc::Sender<Tick>,
        shutdown: CancellationToken,
        frequency: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            next,
            shutdown,
            frequency,
            clock,
        }
    }

    /// Executes the tick loop.
    pub async fn run(self) -> Result<()> {
        let mut tick_point = self.clock.instant();
        loop {
            tick_point += self.frequency;

            tokio::select! {
                // Dropping the sender on return ends the consumer's loop as well.
                _ = self.shutdown.cancelled() => {
                    debug!("Ticker cancelled");
                    return Ok(())
                }
                _ = self.clock.sleep_until(tick_point) => ()
            }

            trace!("Tick");
            if self.next.send(Tick).await.is_err() {
                debug!("Tick consumer went away");
                return Ok(());
            }
        }
    }
}
