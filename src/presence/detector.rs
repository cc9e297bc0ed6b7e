use super::tracker::{PresenceEvent, PresenceTracker, Thresholds};
use crate::backoff::Backoff;
use crate::config::{PresenceConfig, SensorConfig};
use crate::events::{EventBus, TreelightEvent};
use crate::sensor::DistanceSource;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counters kept by the polling loop
#[derive(Debug, Default)]
pub struct DetectorStats {
    samples: AtomicU64,
    timeouts: AtomicU64,
    approaches: AtomicU64,
    departures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorStatsSnapshot {
    pub samples: u64,
    pub timeouts: u64,
    pub approaches: u64,
    pub departures: u64,
}

impl DetectorStats {
    pub fn snapshot(&self) -> DetectorStatsSnapshot {
        DetectorStatsSnapshot {
            samples: self.samples.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            approaches: self.approaches.load(Ordering::Relaxed),
            departures: self.departures.load(Ordering::Relaxed),
        }
    }
}

/// Polls a distance source and reports approach/leave transitions
pub struct PresenceDetector {
    source: Arc<dyn DistanceSource>,
    thresholds: Thresholds,
    sensor_timeout: Duration,
    poll_interval: Duration,
    max_poll_interval: Duration,
    stats: Arc<DetectorStats>,
    event_bus: Option<EventBus>,
}

impl PresenceDetector {
    pub fn new(
        source: Arc<dyn DistanceSource>,
        presence: &PresenceConfig,
        sensor: &SensorConfig,
    ) -> Self {
        Self {
            source,
            thresholds: Thresholds::from_config(presence, sensor),
            sensor_timeout: sensor.timeout(),
            poll_interval: presence.poll_interval(),
            max_poll_interval: presence.max_poll_interval(),
            stats: Arc::new(DetectorStats::default()),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn stats(&self) -> Arc<DetectorStats> {
        Arc::clone(&self.stats)
    }

    /// Run until cancelled or until the event receiver is dropped.
    ///
    /// Sensor failures never end the loop: the poll interval doubles up to
    /// its ceiling and returns to the base interval after the next good
    /// reading.
    pub async fn run(self, tx: mpsc::Sender<PresenceEvent>, cancel: CancellationToken) {
        let mut tracker = PresenceTracker::new(self.thresholds);
        let mut backoff = Backoff::new(self.poll_interval, 2, self.max_poll_interval);

        info!(
            "Presence detector started (show<{:.0}cm, noshow>{:.0}cm, every {:?})",
            self.thresholds.show_cm, self.thresholds.noshow_cm, self.poll_interval
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let reading = tokio::select! {
                _ = cancel.cancelled() => break,
                reading = self.source.measure(self.sensor_timeout) => reading,
            };

            let wait = match reading {
                Ok(sample) => {
                    self.stats.samples.fetch_add(1, Ordering::Relaxed);
                    backoff.reset();

                    if let Some(event) = tracker.observe(&sample) {
                        let timestamp = SystemTime::now();
                        let bus_event = match event {
                            PresenceEvent::Approached { distance_cm } => {
                                self.stats.approaches.fetch_add(1, Ordering::Relaxed);
                                info!("Person approached ({:.1}cm)", distance_cm);
                                TreelightEvent::PersonApproached {
                                    distance_cm,
                                    timestamp,
                                }
                            }
                            PresenceEvent::Left { distance_cm } => {
                                self.stats.departures.fetch_add(1, Ordering::Relaxed);
                                info!("Person left ({:.1}cm)", distance_cm);
                                TreelightEvent::PersonLeft {
                                    distance_cm,
                                    timestamp,
                                }
                            }
                        };
                        if let Some(bus) = &self.event_bus {
                            bus.emit(bus_event);
                        }
                        let sent = tokio::select! {
                            _ = cancel.cancelled() => break,
                            sent = tx.send(event) => sent,
                        };
                        if sent.is_err() {
                            debug!("Presence event receiver dropped, stopping detector");
                            break;
                        }
                    }
                    self.poll_interval
                }
                Err(e) => {
                    if e.is_timeout() {
                        self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                    }
                    let delay = backoff.next_delay();
                    warn!("Distance reading failed: {} (retrying in {:?})", e, delay);
                    delay
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!("Presence detector stopped");
    }
}
