use crate::assembler::Assembler;
use crate::publish::SnapshotSink;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Sampling,
    Publishing,
}

/// Drives assemble → publish → sleep until stopped.
pub struct Poller {
    assembler: Assembler,
    sink: Box<dyn SnapshotSink>,
    interval: Duration,
    max_cycles: Option<u64>,
    state: PollState,
}

impl Poller {
    pub fn new(assembler: Assembler, sink: Box<dyn SnapshotSink>, interval: Duration) -> Self {
        Self {
            assembler,
            sink,
            interval,
            max_cycles: None,
            state: PollState::Idle,
        }
    }

    /// Stops after `cycles` published snapshots.
    pub fn with_max_cycles(mut self, cycles: u64) -> Self {
        self.max_cycles = Some(cycles);
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> PollState {
        self.state
    }

    fn enter(&mut self, state: PollState) {
        trace!(from = ?self.state, to = ?state, "poll state");
        self.state = state;
    }

    /// Runs until `shutdown` flips to true, the sender goes away, or the
    /// cycle limit is reached. Returns the number of completed cycles.
    ///
    /// A change on `redetect` makes the next cycle enumerate GPUs again.
    pub async fn run(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
        mut redetect: watch::Receiver<()>,
    ) -> u64 {
        let mut cycles = 0_u64;
        loop {
            if *shutdown.borrow() {
                break;
            }
            if redetect.has_changed().unwrap_or(false) {
                redetect.borrow_and_update();
                self.assembler.request_gpu_redetect();
            }

            // Provider reads are blocking and sequential; one cycle owns the task.
            self.enter(PollState::Sampling);
            let snapshot = self.assembler.assemble();

            self.enter(PollState::Publishing);
            if let Err(err) = self.sink.publish(&snapshot) {
                warn!(error = %err, "failed to publish snapshot");
            }
            cycles += 1;
            self.enter(PollState::Idle);
            debug!(cycle = cycles, "poll cycle done");

            if self.max_cycles.is_some_and(|max| cycles >= max) {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!(cycles = cycles, "poll loop stopped");
        cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::test_support::*;
    use crate::collectors::selector::{GpuDevice, GpuVendor};
    use crate::publish::PublishError;
    use crate::state::Snapshot;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    #[derive(Clone, Default)]
    struct MemorySink {
        published: Arc<Mutex<Vec<Snapshot>>>,
    }

    impl SnapshotSink for MemorySink {
        fn publish(&mut self, snapshot: &Snapshot) -> Result<(), PublishError> {
            self.published.lock().unwrap().push(snapshot.clone());
            Ok(())
        }
    }

    struct FailingSink {
        attempts: Arc<Mutex<u32>>,
    }

    impl SnapshotSink for FailingSink {
        fn publish(&mut self, _snapshot: &Snapshot) -> Result<(), PublishError> {
            *self.attempts.lock().unwrap() += 1;
            Err(PublishError::Write {
                path: "/read-only/hardware-stats.yaml".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            })
        }
    }

    fn assembler(net: GrowingNet) -> Assembler {
        let gpu = FixedGpu::new(vec![GpuDevice::new(
            "Radeon RX 6600",
            GpuVendor::Amd,
            "/sys/class/drm/card0",
            true,
        )]);
        Assembler::new(
            sensor_set(Box::new(FixedCpu), Box::new(gpu), Box::new(net)),
            "eth0",
            0.1,
        )
    }

    fn channels() -> (
        (watch::Sender<bool>, watch::Receiver<bool>),
        (watch::Sender<()>, watch::Receiver<()>),
    ) {
        (watch::channel(false), watch::channel(()))
    }

    #[tokio::test]
    async fn fixed_stubs_yield_identical_snapshots() {
        let sink = MemorySink::default();
        let published = sink.published.clone();
        let ((_stop_tx, stop_rx), (_hup_tx, hup_rx)) = channels();

        let started = Instant::now();
        let mut poller = Poller::new(
            assembler(fixed_net()),
            Box::new(sink),
            Duration::from_millis(100),
        )
        .with_max_cycles(3);
        let cycles = poller.run(stop_rx, hup_rx).await;

        assert_eq!(cycles, 3);
        assert_eq!(poller.state(), PollState::Idle);
        // Two sleeps between three cycles, none after the last one.
        assert!(started.elapsed() >= Duration::from_millis(200));

        let published = published.lock().unwrap();
        assert_eq!(published.len(), 3);
        assert!(published.iter().all(|s| *s == published[0]));
    }

    #[tokio::test]
    async fn growing_counters_never_decrease() {
        let sink = MemorySink::default();
        let published = sink.published.clone();
        let ((_stop_tx, stop_rx), (_hup_tx, hup_rx)) = channels();
        let net = GrowingNet {
            sent: 0,
            received: 0,
            step_sent: 100,
            step_received: 1_000,
        };

        let mut poller =
            Poller::new(assembler(net), Box::new(sink), Duration::from_millis(100)).with_max_cycles(3);
        poller.run(stop_rx, hup_rx).await;

        let published = published.lock().unwrap();
        assert_eq!(published.len(), 3);
        for pair in published.windows(2) {
            assert!(pair[1].net.uploaded_bytes >= pair[0].net.uploaded_bytes);
            assert!(pair[1].net.downloaded_bytes >= pair[0].net.downloaded_bytes);
        }
        assert_eq!(published[0].net.upload_rate_bps, 0.0);
        assert!((published[2].net.upload_rate_bps - 1_000.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn publish_failures_do_not_stop_the_loop() {
        let attempts = Arc::new(Mutex::new(0));
        let sink = FailingSink {
            attempts: attempts.clone(),
        };
        let ((_stop_tx, stop_rx), (_hup_tx, hup_rx)) = channels();
        let mut poller =
            Poller::new(assembler(fixed_net()), Box::new(sink), Duration::from_millis(10)).with_max_cycles(4);

        assert_eq!(poller.run(stop_rx, hup_rx).await, 4);
        assert_eq!(*attempts.lock().unwrap(), 4);
    }

    #[tokio::test]
    async fn shutdown_interrupts_the_sleep() {
        let sink = MemorySink::default();
        let published = sink.published.clone();
        let ((stop_tx, stop_rx), (_hup_tx, hup_rx)) = channels();
        let mut poller = Poller::new(
            assembler(fixed_net()),
            Box::new(sink),
            Duration::from_secs(3600),
        );

        let handle = tokio::spawn(async move { poller.run(stop_rx, hup_rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();

        let cycles = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop stops promptly")
            .unwrap();
        assert_eq!(cycles, 1);
        assert_eq!(published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stopped_before_start_runs_nothing() {
        let sink = MemorySink::default();
        let ((stop_tx, stop_rx), (_hup_tx, hup_rx)) = channels();
        stop_tx.send(true).unwrap();
        let mut poller = Poller::new(assembler(fixed_net()), Box::new(sink), Duration::from_millis(10));
        assert_eq!(poller.run(stop_rx, hup_rx).await, 0);
    }
}
