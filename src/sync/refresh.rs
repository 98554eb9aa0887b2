use std::{sync::Arc, time::Duration};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{storage::SharedSlots, utils::clock::Clock};

pub const REFRESH_SLOT: &str = "refresh-signal";

/// How long a published marker stays in the slot.
pub const MARKER_LIFETIME: Duration = Duration::from_secs(5);

/// "Records changed" notice left by the instance named in `source_page`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshMarker {
    /// Epoch milliseconds of the change.
    pub timestamp: i64,
    pub source_page: String,
}

/// Advisory signal between instances sharing the slot directory. Last write wins and nothing is
/// guaranteed to be delivered; a missed marker only means a later reload.
#[derive(Clone)]
pub struct RefreshChannel {
    slots: Arc<dyn SharedSlots>,
    clock: Arc<dyn Clock>,
    origin: Arc<str>,
    poll_interval: Duration,
}

impl RefreshChannel {
    pub fn new(
        slots: Arc<dyn SharedSlots>,
        clock: Arc<dyn Clock>,
        origin: &str,
        poll_interval: Duration,
    ) -> Self {
        Self {
            slots,
            clock,
            origin: origin.into(),
            poll_interval,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    fn is_expired(&self, marker: &RefreshMarker) -> bool {
        self.clock.time().timestamp_millis() - marker.timestamp > MARKER_LIFETIME.as_millis() as i64
    }

    /// Removes the marker if it outlived [MARKER_LIFETIME]. The expiry scheduled by
    /// [RefreshChannel::publish] dies with its runtime, so a command that exits right after a
    /// change leaves its marker behind for the next reader to clear. Returns whether a marker was
    /// removed.
    pub async fn sweep_expired(&self) -> Result<bool> {
        let Some(raw) = self.slots.read(REFRESH_SLOT).await? else {
            return Ok(false);
        };
        match serde_json::from_str::<RefreshMarker>(&raw) {
            Ok(marker) if self.is_expired(&marker) => {
                self.slots.remove(REFRESH_SLOT).await?;
                debug!("Removed expired refresh marker {marker:?}");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Writes a fresh marker and schedules its removal after [MARKER_LIFETIME]. A marker written
    /// by someone else in the meantime is left alone.
    pub async fn publish(&self) -> Result<RefreshMarker> {
        let marker = RefreshMarker {
            timestamp: self.clock.time().timestamp_millis(),
            source_page: self.origin.to_string(),
        };
        let raw = serde_json::to_string(&marker)?;
        self.slots.write(REFRESH_SLOT, &raw).await?;
        debug!("Published refresh marker {marker:?}");

        let slots = self.slots.clone();
        let clock = self.clock.clone();
        tokio::spawn(async move {
            clock.sleep(MARKER_LIFETIME).await;
            match slots.read(REFRESH_SLOT).await {
                Ok(Some(current)) if current == raw => {
                    if let Err(e) = slots.remove(REFRESH_SLOT).await {
                        warn!("Failed to expire refresh marker {e:?}");
                    }
                }
                Ok(_) => debug!("Refresh marker was replaced before expiring"),
                Err(e) => warn!("Failed to check refresh marker {e:?}"),
            }
        });

        Ok(marker)
    }

    /// Starts polling the slot. Markers from other instances arrive on the returned receiver, each
    /// at most once. Polling stops on `shutdown` or when the receiver is dropped.
    pub fn subscribe(&self, shutdown: CancellationToken) -> mpsc::Receiver<RefreshMarker> {
        let (sender, receiver) = mpsc::channel(8);
        let poller = RefreshPoller {
            channel: self.clone(),
            next: sender,
            shutdown,
            last_raw: None,
        };
        tokio::spawn(async move {
            if let Err(e) = poller.run().await {
                warn!("Refresh poller stopped {e:?}");
            }
        });
        receiver
    }
}

struct RefreshPoller {
    channel: RefreshChannel,
    next: mpsc::Sender<RefreshMarker>,
    shutdown: CancellationToken,
    last_raw: Option<String>,
}

impl RefreshPoller {
    async fn poll(&mut self) -> Option<RefreshMarker> {
        let raw = match self.channel.slots.read(REFRESH_SLOT).await {
            Ok(Some(v)) => v,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read refresh slot {e:?}");
                return None;
            }
        };
        if self.last_raw.as_ref() == Some(&raw) {
            return None;
        }
        self.last_raw = Some(raw.clone());

        let marker = match serde_json::from_str::<RefreshMarker>(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!("Ignoring unparseable refresh marker {raw:?}: {e}");
                return None;
            }
        };
        if self.channel.is_expired(&marker) {
            debug!("Skipping expired refresh marker {marker:?}");
            if let Err(e) = self.channel.sweep_expired().await {
                warn!("Failed to remove expired refresh marker {e:?}");
            }
            return None;
        }
        if marker.source_page == *self.channel.origin {
            return None;
        }
        Some(marker)
    }

    async fn run(mut self) -> Result<()> {
        let mut poll_point = self.channel.clock.instant();
        loop {
            poll_point += self.channel.poll_interval;

            if let Some(marker) = self.poll().await {
                info!("Records changed in {}", marker.source_page);
                if self.next.send(marker).await.is_err() {
                    debug!("Refresh subscriber went away");
                    return Ok(());
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Ok(())
                }
                _ = self.channel.clock.sleep_until(poll_point) => ()
            }
        }
    }
}
