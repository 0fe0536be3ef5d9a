use log::{debug, error, info, warn};
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::bus::{BusSupervisor, BusTransport, ConnectionState, MqttTransport, SessionOptions, SupervisorSettings, Topics};
use crate::config::Config;
use crate::devices::{FrameReader, Reading, ReadingParser};
use crate::serial::{LineChannel, SerialLineChannel};
use crate::utils::error::{BusError, FrameError};

const CHANNEL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Exit status when the bridge stops without being asked to.
pub const UNEXPECTED_STOP_STATUS: i32 = 1;

/// Outcome counters for the acquisition path. Failures never stop the
/// loop, so these are the only place they add up.
#[derive(Debug, Default)]
pub struct AcquisitionStats {
    frames: AtomicU64,
    read_timeouts: AtomicU64,
    channel_errors: AtomicU64,
    parse_errors: AtomicU64,
    readings_published: AtomicU64,
    readings_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames: u64,
    pub read_timeouts: u64,
    pub channel_errors: u64,
    pub parse_errors: u64,
    pub readings_published: u64,
    pub readings_dropped: u64,
}

impl AcquisitionStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            read_timeouts: self.read_timeouts.load(Ordering::Relaxed),
            channel_errors: self.channel_errors.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            readings_published: self.readings_published.load(Ordering::Relaxed),
            readings_dropped: self.readings_dropped.load(Ordering::Relaxed),
        }
    }
}

enum BusEvent {
    Reading(Option<Reading>),
    Tick(Result<(), BusError>),
}

/// Runs acquisition and the bus event loop side by side until cancelled.
pub struct BridgeService<C: LineChannel + 'static, T: BusTransport> {
    reader: FrameReader<C>,
    parser: ReadingParser,
    supervisor: BusSupervisor<T>,
    stats: Arc<AcquisitionStats>,
    reading_interval: Option<Duration>,
}

impl BridgeService<SerialLineChannel, MqttTransport> {
    pub fn from_config(config: &Config) -> Self {
        let reader = FrameReader::new(SerialLineChannel::from_config(&config.serial));
        let transport = MqttTransport::new(SessionOptions::from_config(config));
        let supervisor = BusSupervisor::new(
            transport,
            Topics::from_config(&config.mqtt),
            SupervisorSettings::from_config(config),
        );
        Self::new(reader, supervisor, config.timing.reading_interval())
    }
}

impl<C: LineChannel + 'static, T: BusTransport> BridgeService<C, T> {
    pub fn new(reader: FrameReader<C>, supervisor: BusSupervisor<T>, reading_interval: Option<Duration>) -> Self {
        Self {
            reader,
            parser: ReadingParser::new(),
            supervisor,
            stats: Arc::new(AcquisitionStats::default()),
            reading_interval,
        }
    }

    pub fn stats(&self) -> Arc<AcquisitionStats> {
        self.stats.clone()
    }

    /// Runs until `shutdown` resolves with a signal number, then cancels and
    /// waits for the disconnect sequence. Returns the process exit status,
    /// which is the signal number.
    pub async fn run_until<F>(self, shutdown: F) -> io::Result<i32>
    where
        F: Future<Output = io::Result<i32>>,
    {
        let cancel = CancellationToken::new();
        let bridge = self.run(cancel.clone());
        tokio::pin!(bridge);

        let signal = tokio::select! {
            signal = shutdown => Some(signal),
            stats = &mut bridge => {
                error!("Bridge stopped unexpectedly: {:?}", stats);
                None
            }
        };
        let Some(signal) = signal else {
            return Ok(UNEXPECTED_STOP_STATUS);
        };

        cancel.cancel();
        match &signal {
            Ok(signum) => info!("🛑 Received signal {}, shutting down", signum),
            Err(e) => error!("Shutdown signal wait failed: {}, shutting down", e),
        }
        bridge.await;
        signal
    }

    /// Returns once `cancel` fires and the disconnect sequence has run.
    pub async fn run(self, cancel: CancellationToken) -> StatsSnapshot {
        let BridgeService {
            reader,
            parser,
            mut supervisor,
            stats,
            reading_interval,
        } = self;

        info!("🚀 Starting bridge on serial port {}", reader.port_name());

        // Capacity 1: at most one reading waits for the bus, never a backlog
        let (reading_tx, mut reading_rx) = mpsc::channel::<Reading>(1);
        let acquisition = tokio::spawn(acquisition_loop(
            reader,
            parser,
            supervisor.subscribe_state(),
            reading_tx,
            stats.clone(),
            cancel.clone(),
            reading_interval,
        ));

        let mut acquisition_open = true;
        if supervisor.connect(&cancel).await.is_ok() {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    reading = reading_rx.recv(), if acquisition_open => BusEvent::Reading(reading),
                    result = supervisor.tick() => BusEvent::Tick(result),
                };

                match event {
                    BusEvent::Reading(Some(reading)) => match supervisor.publish_reading(&reading).await {
                        Ok(count) => {
                            AcquisitionStats::bump(&stats.readings_published);
                            debug!("Published reading as {} messages", count);
                        }
                        Err(e) => {
                            AcquisitionStats::bump(&stats.readings_dropped);
                            warn!("Dropping reading: {}", e);
                        }
                    },
                    BusEvent::Reading(None) => {
                        warn!("Acquisition stopped; continuing to service the bus");
                        acquisition_open = false;
                    }
                    BusEvent::Tick(Ok(())) => {}
                    BusEvent::Tick(Err(e)) => {
                        if let Err(BusError::Cancelled) = supervisor.recover(e, &cancel).await {
                            break;
                        }
                        discard_stale_readings(&mut reading_rx, &stats);
                    }
                }
            }
        }

        supervisor.disconnect().await;

        // A blocked serial read is not interrupted; the worker notices the
        // cancellation after its current read returns.
        drop(reading_rx);
        acquisition.abort();

        let snapshot = stats.snapshot();
        info!("📊 Bridge stopped: {:?}", snapshot);
        snapshot
    }
}

/// Readings queued while the link was down describe the past; they are
/// dropped rather than published as retained state after the reconnect.
fn discard_stale_readings(reading_rx: &mut mpsc::Receiver<Reading>, stats: &AcquisitionStats) -> usize {
    let mut discarded = 0;
    while let Ok(reading) = reading_rx.try_recv() {
        AcquisitionStats::bump(&stats.readings_dropped);
        debug!("Discarding reading received at {} during reconnect", reading.received_at);
        discarded += 1;
    }
    if discarded > 0 {
        warn!("Dropped {} reading(s) queued while the bus was down", discarded);
    }
    discarded
}

async fn acquisition_loop<C: LineChannel + 'static>(
    mut reader: FrameReader<C>,
    parser: ReadingParser,
    mut state_rx: watch::Receiver<ConnectionState>,
    reading_tx: mpsc::Sender<Reading>,
    stats: Arc<AcquisitionStats>,
    cancel: CancellationToken,
    reading_interval: Option<Duration>,
) {
    info!("📡 Acquisition started");

    loop {
        // Only read while the bus can take the result
        let connected = tokio::select! {
            _ = cancel.cancelled() => false,
            result = state_rx.wait_for(ConnectionState::is_connected) => result.is_ok(),
        };
        if !connected {
            break;
        }

        let joined = tokio::task::spawn_blocking(move || {
            let outcome = reader.read_frame();
            (reader, outcome)
        })
        .await;
        let outcome = match joined {
            Ok((returned, outcome)) => {
                reader = returned;
                outcome
            }
            Err(e) => {
                error!("❌ Serial worker failed: {}", e);
                return;
            }
        };
        if cancel.is_cancelled() {
            break;
        }

        let frame = match outcome {
            Ok(frame) => frame,
            Err(FrameError::Timeout(e)) => {
                AcquisitionStats::bump(&stats.read_timeouts);
                warn!("Dropping cycle: {}", e);
                continue;
            }
            Err(FrameError::Channel(e)) => {
                AcquisitionStats::bump(&stats.channel_errors);
                warn!("Dropping cycle, serial channel error on {}: {}", reader.port_name(), e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(CHANNEL_RETRY_DELAY) => continue,
                }
            }
        };
        AcquisitionStats::bump(&stats.frames);

        let reading = match parser.parse(&frame) {
            Ok(reading) => reading,
            Err(e) => {
                AcquisitionStats::bump(&stats.parse_errors);
                warn!("Dropping cycle, unparseable frame: {}", e);
                debug!("Frame was: {}", frame);
                continue;
            }
        };
        debug!("Reading received at {}:\n{}", reading.received_at, reading);

        if reading_tx.send(reading).await.is_err() {
            break;
        }

        if let Some(interval) = reading_interval {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    reader.close();
    info!("📡 Acquisition stopped");
}
