//! A logger specialized for the simulation kernel (§6): it stamps every record with simulated
//! time, worker and host identity (via the thread-local context in [`context`]) in addition to the
//! usual level/file/line, and offloads formatting and I/O to a dedicated thread so logging from a
//! busy worker never blocks on stdout.

pub mod context;
mod record;

use std::cell::RefCell;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use crossbeam::queue::ArrayQueue;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use once_cell::sync::{Lazy, OnceCell};

pub use context::LogContext;
use record::LogRecord;

/// Trigger an asynchronous flush when this many lines are queued.
const ASYNC_FLUSH_QD_LINES_THRESHOLD: usize = 100_000;

/// Performs a *synchronous* flush when this many lines are queued. If producers are still
/// outrunning the flush thread once we've already asked for an async flush, block rather than let
/// the queue grow without bound.
const SYNC_FLUSH_QD_LINES_THRESHOLD: usize = 10 * ASYNC_FLUSH_QD_LINES_THRESHOLD;

/// The flush thread wakes up and flushes at least this often even if nothing asked it to.
const MIN_FLUSH_FREQUENCY: Duration = Duration::from_secs(10);

static SIM_LOGGER: Lazy<SimLogger> = Lazy::new(SimLogger::new);
static START: OnceCell<Instant> = OnceCell::new();

/// Install the logger as the global `log` backend and spawn its flush thread.
///
/// `max_log_level` is the default filter used for any thread that hasn't published a per-host
/// override via [`context::set`]. Idempotent calls after the first return `Err`, matching
/// `log::set_logger`'s own contract.
pub fn init(max_log_level: LevelFilter, log_errors_to_stderr: bool) -> Result<(), SetLoggerError> {
    START.set(Instant::now()).ok();
    SIM_LOGGER.set_max_level(max_log_level);
    SIM_LOGGER.set_log_errors_to_stderr(log_errors_to_stderr);

    log::set_logger(&*SIM_LOGGER)?;
    // We do our own filtering in `enabled` (it can vary per host), so ask the facade to hand us
    // everything and let us decide.
    log::set_max_level(LevelFilter::Trace);

    std::thread::Builder::new()
        .name("sim-logger".to_string())
        .spawn(move || SIM_LOGGER.flush_loop())
        .expect("failed to spawn logger flush thread");

    let default_panic_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        SIM_LOGGER.flush_records(None).ok();
        default_panic_hook(info);
    }));

    Ok(())
}

/// When disabled, every record triggers its own async flush instead of waiting for the queue to
/// fill or the periodic timer to fire. Useful for a scenario that crashes early and needs every
/// line on screen.
pub fn set_buffering_enabled(enabled: bool) {
    SIM_LOGGER.set_buffering_enabled(enabled);
}

enum LoggerCommand {
    Flush(Option<Sender<()>>),
}

struct SimLogger {
    command_sender: Mutex<Sender<LoggerCommand>>,
    command_receiver: Mutex<Receiver<LoggerCommand>>,
    records: ArrayQueue<LogRecord>,
    buffering_enabled: RwLock<bool>,
    max_log_level: OnceCell<LevelFilter>,
    log_errors_to_stderr: OnceCell<bool>,
}

thread_local!(static SENDER: RefCell<Option<Sender<LoggerCommand>>> = const { RefCell::new(None) });

impl SimLogger {
    fn new() -> Self {
        let (sender, receiver) = std::sync::mpsc::channel();
        Self {
            command_sender: Mutex::new(sender),
            command_receiver: Mutex::new(receiver),
            records: ArrayQueue::new(SYNC_FLUSH_QD_LINES_THRESHOLD),
            buffering_enabled: RwLock::new(true),
            max_log_level: OnceCell::new(),
            log_errors_to_stderr: OnceCell::new(),
        }
    }

    fn flush_loop(&self) {
        let receiver = self.command_receiver.lock().unwrap();
        loop {
            use std::sync::mpsc::RecvTimeoutError;
            match receiver.recv_timeout(MIN_FLUSH_FREQUENCY) {
                Ok(LoggerCommand::Flush(done)) => self.flush_records(done).unwrap(),
                Err(RecvTimeoutError::Timeout) => self.flush_records(None).unwrap(),
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    fn flush_records(&self, done: Option<Sender<()>>) -> std::io::Result<()> {
        use std::io::Write;

        // Only drain what's already queued; records that arrive mid-flush wait for the next pass,
        // so a synchronous caller isn't kept waiting indefinitely.
        let mut remaining = self.records.len();
        let stdout = std::io::stdout();
        let mut out = std::io::BufWriter::new(stdout.lock());

        while remaining > 0 {
            let Some(record) = self.records.pop() else {
                break;
            };
            remaining -= 1;

            if record.level <= Level::Error && *self.log_errors_to_stderr.get().unwrap_or(&false) {
                let stderr = std::io::stderr();
                let mut err = std::io::BufWriter::new(stderr.lock());
                let line = format!("{record}");
                write!(out, "{line}")?;
                write!(err, "{line}")?;
            } else {
                write!(out, "{record}")?;
            }
        }
        out.flush()?;

        if let Some(done) = done {
            done.send(()).unwrap_or_else(|e| {
                eprintln!("sim-logger: flush completion receiver already gone: {e}");
            });
        }
        Ok(())
    }

    fn set_buffering_enabled(&self, enabled: bool) {
        *self.buffering_enabled.write().unwrap() = enabled;
    }

    fn max_level(&self) -> LevelFilter {
        self.max_log_level.get().copied().unwrap_or(LevelFilter::Info)
    }

    fn set_max_level(&self, level: LevelFilter) {
        self.max_log_level.set(level).ok();
    }

    fn set_log_errors_to_stderr(&self, val: bool) {
        self.log_errors_to_stderr.set(val).ok();
    }

    fn flush_sync(&self) {
        let (tx, rx) = std::sync::mpsc::channel();
        self.send_command(LoggerCommand::Flush(Some(tx)));
        rx.recv().ok();
    }

    fn flush_async(&self) {
        self.send_command(LoggerCommand::Flush(None));
    }

    fn send_command(&self, cmd: LoggerCommand) {
        SENDER.with(|cell| {
            if cell.borrow().is_none() {
                let sender = self.command_sender.lock().unwrap().clone();
                *cell.borrow_mut() = Some(sender);
            }
            cell.borrow()
                .as_ref()
                .unwrap()
                .send(cmd)
                .unwrap_or_else(|e| eprintln!("sim-logger: flush thread gone: {e}"));
        });
    }
}

impl Log for SimLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        let filter = context::current()
            .and_then(|ctx| ctx.log_level)
            .unwrap_or_else(|| self.max_level());
        metadata.level() <= filter
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut entry = LogRecord {
            level: record.level(),
            file: record.file_static(),
            line: record.line(),
            module_path: record.module_path_static(),
            message: std::fmt::format(*record.args()),
            wall_time: START.get().map(|start| start.elapsed()).unwrap_or_default(),
            ctx: context::current(),
            thread_name: std::thread::current().name().map(str::to_owned).unwrap_or_default(),
        };

        loop {
            match self.records.push(entry) {
                Ok(()) => break,
                Err(rejected) => {
                    entry = rejected;
                    self.flush_sync();
                }
            }
        }

        if record.level() == Level::Error {
            // Flush synchronously: we're likely about to crash one way or another and want the
            // error on screen before that happens.
            self.flush_sync();
        } else if self.records.len() > ASYNC_FLUSH_QD_LINES_THRESHOLD || !*self.buffering_enabled.read().unwrap() {
            self.flush_async();
        }
    }

    fn flush(&self) {
        self.flush_sync();
    }
}
