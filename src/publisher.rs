//! Background publisher emitting the occupancy flag on a fixed timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{NotifierError, Result};
use crate::occupancy::OccupancyCell;
use crate::transport::{MessageBus, StatusPayload};

pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(1);

/// Where and how often the flag is published.
#[derive(Clone, Debug)]
pub struct PublisherConfig {
    pub topic: String,
    pub interval: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            topic: crate::transport::DEFAULT_TOPIC.to_string(),
            interval: DEFAULT_PUBLISH_INTERVAL,
        }
    }
}

/// Running publisher thread. Dropping the handle without `stop` leaves the
/// thread running until the process exits.
#[derive(Debug)]
pub struct PublisherHandle {
    keep_running: Arc<AtomicBool>,
    join: Option<JoinHandle<u64>>,
}

impl PublisherHandle {
    /// Start publishing `cell` to `bus` every `config.interval`.
    pub fn spawn(
        cell: OccupancyCell,
        bus: Arc<dyn MessageBus>,
        config: PublisherConfig,
    ) -> Result<Self> {
        if config.interval.is_zero() {
            return Err(NotifierError::Configuration(
                "publish interval must be greater than zero".to_string(),
            ));
        }
        let keep_running = Arc::new(AtomicBool::new(true));
        let flag = keep_running.clone();
        let join = std::thread::Builder::new()
            .name("occupancy-publisher".to_string())
            .spawn(move || run_publisher(cell, bus.as_ref(), &config, &flag))
            .map_err(|e| NotifierError::Transport(format!("spawn publisher: {}", e)))?;
        Ok(Self {
            keep_running,
            join: Some(join),
        })
    }

    pub fn is_running(&self) -> bool {
        self.keep_running.load(Ordering::SeqCst)
    }

    /// Clear the keep-running flag and join. Returns the number of messages
    /// the thread published.
    pub fn stop(mut self) -> Result<u64> {
        self.keep_running.store(false, Ordering::SeqCst);
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| NotifierError::transport("publisher thread panicked")),
            None => Ok(0),
        }
    }
}

fn run_publisher(
    cell: OccupancyCell,
    bus: &dyn MessageBus,
    config: &PublisherConfig,
    keep_running: &AtomicBool,
) -> u64 {
    let mut published = 0u64;
    loop {
        std::thread::sleep(config.interval);
        if !keep_running.load(Ordering::SeqCst) {
            break;
        }
        let payload = StatusPayload::from_occupied(cell.load());
        let sent = payload
            .to_bytes()
            .and_then(|body| bus.publish(&config.topic, &body));
        match sent {
            Ok(()) => {
                published += 1;
                log::debug!("published Person={} to {}", payload.person, config.topic);
            }
            Err(err) => log::warn!("occupancy publish failed: {}", err),
        }
    }
    log::info!("occupancy publisher stopped after {} messages", published);
    published
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RecordingBus;
    use std::time::Instant;

    fn fast_config() -> PublisherConfig {
        PublisherConfig {
            topic: "zone/test".to_string(),
            interval: Duration::from_millis(20),
        }
    }

    #[test]
    fn publishes_current_flag_each_interval() {
        let bus = Arc::new(RecordingBus::new());
        let cell = OccupancyCell::new(false);
        let handle = PublisherHandle::spawn(cell.clone(), bus.clone(), fast_config()).unwrap();

        std::thread::sleep(Duration::from_millis(90));
        cell.store(true);
        std::thread::sleep(Duration::from_millis(90));
        let sent = handle.stop().unwrap();

        let statuses = bus.statuses();
        assert_eq!(statuses.len() as u64, sent);
        assert_eq!(statuses.first(), Some(&StatusPayload { person: 0 }));
        assert_eq!(statuses.last(), Some(&StatusPayload { person: 1 }));
        assert!(bus.published().iter().all(|(topic, _)| topic == "zone/test"));
    }

    #[test]
    fn stop_joins_within_one_interval() {
        let bus = Arc::new(RecordingBus::new());
        let config = PublisherConfig {
            interval: Duration::from_millis(100),
            ..fast_config()
        };
        let handle = PublisherHandle::spawn(OccupancyCell::default(), bus.clone(), config).unwrap();
        std::thread::sleep(Duration::from_millis(150));

        let before_stop = bus.published().len();
        let started = Instant::now();
        handle.stop().unwrap();
        assert!(started.elapsed() < Duration::from_millis(200));
        assert!(bus.published().len() <= before_stop + 1);
    }

    #[test]
    fn publish_failures_do_not_stop_the_loop() {
        let bus = Arc::new(RecordingBus::new());
        bus.set_fail_publish(true);
        let handle =
            PublisherHandle::spawn(OccupancyCell::default(), bus.clone(), fast_config()).unwrap();
        std::thread::sleep(Duration::from_millis(70));
        assert!(handle.is_running());
        bus.set_fail_publish(false);
        std::thread::sleep(Duration::from_millis(70));
        handle.stop().unwrap();

        assert!(!bus.statuses().is_empty());
        assert!(bus.statuses().iter().all(|s| s.person == 1));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = PublisherConfig {
            interval: Duration::ZERO,
            ..fast_config()
        };
        let err = PublisherHandle::spawn(
            OccupancyCell::default(),
            Arc::new(RecordingBus::new()),
            config,
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
