use crate::csv_log::CsvLog;
use crate::error::ForwarderError;
use crate::poller::Poller;
use crate::sink::Sink;
use crate::types::{ForwarderStats, Reading};
use chrono::Utc;
use log::{error, info, warn};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

/// Long-lived state of the poll-and-forward loop.
pub struct Forwarder<P, S> {
    poller: P,
    log: CsvLog,
    sink: S,
    device_id: String,
    interval: Duration,
}

impl<P: Poller, S: Sink> Forwarder<P, S> {
    pub fn new(poller: P, log: CsvLog, sink: S, device_id: String, interval: Duration) -> Self {
        Self {
            poller,
            log,
            sink,
            device_id,
            interval,
        }
    }

    /// One iteration: poll, write the local log, push to the sink.
    ///
    /// A failed poll skips both writes. A failed local append skips the push.
    /// The local row is not rolled back when the push fails.
    pub async fn run_once(&mut self) -> Result<Reading, ForwarderError> {
        let sample = self.poller.poll().await?;
        info!("Device data: {:?}", sample);

        let reading = Reading::new(sample, &self.device_id, Utc::now());
        self.log.append(&reading).await?;

        let key = self.sink.push(&reading).await?;
        info!("Reading {} stored locally and pushed as {}", reading.timestamp, key);

        Ok(reading)
    }

    /// Runs iterations until `shutdown` turns true or its sender is dropped.
    ///
    /// The flag is checked before every iteration and also interrupts the
    /// sleep; an iteration in progress always completes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> ForwarderStats {
        let mut stats = ForwarderStats::default();
        info!(
            "Forwarding readings of {} to {:?} and the sink every {:?}",
            self.device_id,
            self.log.path(),
            self.interval
        );

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            match self.run_once().await {
                Ok(_) => stats.forwarded += 1,
                Err(e) => {
                    report(&e);
                    stats.record_failure(&e);
                }
            }

            tokio::select! {
                _ = sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(
            "Forwarder stopped: {} forwarded, {} failed",
            stats.forwarded,
            stats.failed()
        );
        stats
    }
}

fn report(err: &ForwarderError) {
    match err {
        ForwarderError::TransientNetwork(_) => warn!("Device request failed: {}", err),
        ForwarderError::MalformedResponse(_) => error!("Discarding device response: {}", err),
        ForwarderError::LocalLog(_) => error!("Reading dropped: {}", err),
        ForwarderError::SinkWrite(_) => error!("Reading kept locally only: {}", err),
    }
}
