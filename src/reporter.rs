//! Asynchronous span reporting.
//!
//! [`RemoteReporter`] decouples "a span finished" from "a span was
//! transmitted": `report()` only enqueues onto a bounded channel and a
//! dedicated worker thread drives the injected [`Sender`]. When the queue is
//! full the span is dropped with a metric rather than blocking the
//! application thread.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TrySendError};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use crate::metrics::TracerMetrics;
use crate::sender::Sender;
use crate::span::SpanData;
use crate::{TraceError, TraceResult};

const DEFAULT_MAX_QUEUE_SIZE: usize = 100;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(1000);
const DEFAULT_CLOSE_ENQUEUE_TIMEOUT: Duration = Duration::from_millis(1000);

/// How long close() sleeps between attempts to enqueue the Close command.
const CLOSE_RETRY_BACKOFF: Duration = Duration::from_millis(10);

const RUNNING: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// Receives finished spans.
pub trait Reporter: Send + Sync + fmt::Debug {
    /// Hand a finished span over for transmission. Must never block.
    fn report(&self, span: SpanData);

    /// Ask for buffered spans to be transmitted soon. Best-effort.
    fn flush(&self) -> TraceResult<()>;

    /// Flush outstanding spans and release resources.
    fn close(&self) -> TraceResult<()>;
}

/// A [`Reporter`] that discards every span.
#[derive(Clone, Debug, Default)]
pub struct NoopReporter;

impl Reporter for NoopReporter {
    fn report(&self, _span: SpanData) {}

    fn flush(&self) -> TraceResult<()> {
        Ok(())
    }

    fn close(&self) -> TraceResult<()> {
        Ok(())
    }
}

/// Commands consumed by the worker thread, strictly in enqueue order.
#[derive(Debug)]
enum Command {
    Append(SpanData),
    Flush,
    Close,
}

#[derive(Debug)]
struct Shared {
    sender: Mutex<Box<dyn Sender>>,
    metrics: TracerMetrics,
    // Appends currently sitting in the channel; sampled onto the queue
    // gauge when a Flush executes.
    queue_depth: AtomicUsize,
    dropped: AtomicU64,
    drop_warning_logged: AtomicBool,
}

impl Shared {
    fn run_worker(&self, commands: mpsc::Receiver<Command>) {
        while let Ok(command) = commands.recv() {
            match command {
                Command::Append(span) => {
                    self.queue_depth.fetch_sub(1, Ordering::Relaxed);
                    match self.sender.lock() {
                        Ok(mut sender) => match sender.append(span) {
                            Ok(flushed) if flushed > 0 => {
                                self.metrics.reporter_success.incr(flushed as u64)
                            }
                            Ok(_) => {}
                            Err(err) => {
                                self.metrics.reporter_failure.incr(1);
                                tracing::debug!(error = %err, "failed to append span");
                            }
                        },
                        Err(_) => return,
                    }
                }
                Command::Flush => {
                    self.metrics
                        .reporter_queue_length
                        .update(self.queue_depth.load(Ordering::Relaxed) as i64);
                    match self.sender.lock() {
                        Ok(mut sender) => match sender.flush() {
                            Ok(flushed) if flushed > 0 => {
                                self.metrics.reporter_success.incr(flushed as u64)
                            }
                            Ok(_) => {}
                            Err(err) => {
                                self.metrics.reporter_failure.incr(1);
                                tracing::debug!(error = %err, "failed to flush spans");
                            }
                        },
                        Err(_) => return,
                    }
                }
                // The closing thread invokes Sender::close() after joining
                // us, so the worker just stops consuming.
                Command::Close => return,
            }
        }
    }
}

/// Builder for [`RemoteReporter`].
#[derive(Debug)]
pub struct RemoteReporterBuilder {
    sender: Box<dyn Sender>,
    max_queue_size: usize,
    flush_interval: Duration,
    close_enqueue_timeout: Duration,
    metrics: TracerMetrics,
}

impl RemoteReporterBuilder {
    /// Queue capacity in commands. Defaults to 100.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size.max(1);
        self
    }

    /// Period of the automatic flush timer. Defaults to 1 second.
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// How long close() keeps trying to enqueue its Close command before
    /// giving up on draining the queue. Defaults to 1 second.
    pub fn with_close_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.close_enqueue_timeout = timeout;
        self
    }

    /// Instruments for reporting outcomes.
    pub fn with_metrics(mut self, metrics: TracerMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Start the worker and flush-timer threads.
    pub fn build(self) -> TraceResult<RemoteReporter> {
        let (command_tx, command_rx) = mpsc::sync_channel(self.max_queue_size);
        let shared = Arc::new(Shared {
            sender: Mutex::new(self.sender),
            metrics: self.metrics,
            queue_depth: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
            drop_warning_logged: AtomicBool::new(false),
        });

        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("jaeger-reporter".to_string())
                .spawn(move || shared.run_worker(command_rx))
                .map_err(|err| TraceError::Other(Box::new(err)))?
        };

        let (timer_tx, timer_rx) = mpsc::channel::<()>();
        let timer = {
            let command_tx = command_tx.clone();
            let flush_interval = self.flush_interval;
            thread::Builder::new()
                .name("jaeger-reporter-timer".to_string())
                .spawn(move || loop {
                    match timer_rx.recv_timeout(flush_interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            // A full queue already flushes by pressure; the
                            // periodic flush is best-effort.
                            let _ = command_tx.try_send(Command::Flush);
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    }
                })
                .map_err(|err| TraceError::Other(Box::new(err)))?
        };

        Ok(RemoteReporter {
            shared,
            command_tx,
            close_enqueue_timeout: self.close_enqueue_timeout,
            state: AtomicU8::new(RUNNING),
            worker: Mutex::new(Some(worker)),
            timer_stop: timer_tx,
            timer: Mutex::new(Some(timer)),
        })
    }
}

/// A [`Reporter`] that transmits spans through an injected [`Sender`] from a
/// dedicated worker thread.
///
/// One timer thread enqueues a Flush on a fixed period; commands execute
/// strictly in enqueue order. See the builder for the tuning knobs.
#[derive(Debug)]
pub struct RemoteReporter {
    shared: Arc<Shared>,
    command_tx: mpsc::SyncSender<Command>,
    close_enqueue_timeout: Duration,
    state: AtomicU8,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    timer_stop: mpsc::Sender<()>,
    timer: Mutex<Option<thread::JoinHandle<()>>>,
}

impl RemoteReporter {
    /// Start building a reporter around the given sender.
    pub fn builder(sender: Box<dyn Sender>) -> RemoteReporterBuilder {
        RemoteReporterBuilder {
            sender,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            close_enqueue_timeout: DEFAULT_CLOSE_ENQUEUE_TIMEOUT,
            metrics: TracerMetrics::noop(),
        }
    }

    /// Spans dropped so far because the queue was full or the reporter
    /// closed.
    pub fn dropped_spans(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    fn drop_span(&self) {
        self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        self.shared.metrics.reporter_dropped.incr(1);
        if !self.shared.drop_warning_logged.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                "reporter queue is full, dropping spans; \
                 further drops will only be counted"
            );
        }
    }
}

impl Reporter for RemoteReporter {
    fn report(&self, span: SpanData) {
        if self.state.load(Ordering::SeqCst) != RUNNING {
            self.drop_span();
            return;
        }
        self.shared.queue_depth.fetch_add(1, Ordering::Relaxed);
        if self.command_tx.try_send(Command::Append(span)).is_err() {
            self.shared.queue_depth.fetch_sub(1, Ordering::Relaxed);
            self.drop_span();
        }
    }

    /// Enqueue a flush command without waiting for it to execute.
    fn flush(&self) -> TraceResult<()> {
        if self.state.load(Ordering::SeqCst) != RUNNING {
            return Err(TraceError::AlreadyClosed);
        }
        self.command_tx
            .try_send(Command::Flush)
            .map_err(|_| TraceError::from("reporter queue full"))
    }

    /// Best-effort shutdown.
    ///
    /// Tries to enqueue a Close command within the close-enqueue timeout so
    /// the worker drains everything reported before this call; if the queue
    /// stays too full, gives up on the drain. Either way the flush timer is
    /// stopped and `Sender::close()` runs, which performs a final flush of
    /// whatever the sender has buffered.
    fn close(&self) -> TraceResult<()> {
        if self
            .state
            .compare_exchange(RUNNING, CLOSING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(TraceError::AlreadyClosed);
        }

        let _ = self.timer_stop.send(());
        if let Ok(mut timer) = self.timer.lock() {
            if let Some(handle) = timer.take() {
                let _ = handle.join();
            }
        }

        let deadline = Instant::now() + self.close_enqueue_timeout;
        let mut enqueued = false;
        loop {
            match self.command_tx.try_send(Command::Close) {
                Ok(()) => {
                    enqueued = true;
                    break;
                }
                Err(TrySendError::Disconnected(_)) => break,
                Err(TrySendError::Full(_)) => {
                    if Instant::now() >= deadline {
                        tracing::warn!(
                            timeout_ms = self.close_enqueue_timeout.as_millis() as u64,
                            "timed out enqueueing reporter close, queue not drained"
                        );
                        break;
                    }
                    thread::sleep(CLOSE_RETRY_BACKOFF);
                }
            }
        }

        if enqueued {
            if let Ok(mut worker) = self.worker.lock() {
                if let Some(handle) = worker.take() {
                    let _ = handle.join();
                }
            }
        }

        // The final flush happens inside the sender regardless of whether
        // the queue drained. If the worker is wedged mid-command it holds
        // the sender lock, so the wait for it is bounded too.
        let lock_deadline = Instant::now() + self.close_enqueue_timeout;
        let close_result = loop {
            match self.shared.sender.try_lock() {
                Ok(mut sender) => break sender.close().map(Some),
                Err(TryLockError::Poisoned(err)) => break Err(TraceError::from(err)),
                Err(TryLockError::WouldBlock) => {
                    // Logged, not escalated: shutdown stays best-effort.
                    if Instant::now() >= lock_deadline {
                        tracing::warn!(
                            "sender still busy at close timeout, skipping final flush"
                        );
                        break Ok(None);
                    }
                    thread::sleep(CLOSE_RETRY_BACKOFF);
                }
            }
        };
        match &close_result {
            Ok(Some(flushed)) if *flushed > 0 => {
                self.shared.metrics.reporter_success.incr(*flushed as u64)
            }
            Ok(_) => {}
            Err(_) => self.shared.metrics.reporter_failure.incr(1),
        }

        self.state.store(CLOSED, Ordering::SeqCst);
        let dropped = self.shared.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            tracing::warn!(dropped, "reporter dropped spans during its lifetime");
        }
        close_result.map(|_| ())
    }
}

impl Drop for RemoteReporter {
    fn drop(&mut self) {
        if self.state.load(Ordering::SeqCst) == RUNNING {
            let _ = self.close();
        }
    }
}
