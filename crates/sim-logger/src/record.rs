use std::fmt;
use std::time::Duration;

use log::Level;

use crate::context::LogContext;

/// One fully-materialized log line, captured off the hot path so formatting and I/O can happen on
/// the logger's own thread.
pub(crate) struct LogRecord {
    pub level: Level,
    pub file: Option<&'static str>,
    pub line: Option<u32>,
    pub module_path: Option<&'static str>,
    pub message: String,
    pub wall_time: Duration,
    pub ctx: Option<LogContext>,
    pub thread_name: String,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.wall_time.as_secs();
        write!(
            f,
            "{:02}:{:02}:{:02}.{:06}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60,
            self.wall_time.subsec_micros()
        )?;
        write!(f, " [{}]", self.thread_name)?;

        match self.ctx.as_ref().and_then(|c| c.sim_time) {
            Some(t) => write!(f, " {t}")?,
            None => write!(f, " n/a")?,
        }
        write!(f, " [{}]", self.level)?;

        match self.ctx.as_ref().and_then(|c| c.host_name.as_deref()) {
            Some(name) => {
                let ip = self.ctx.as_ref().and_then(|c| c.host_ip.as_deref()).unwrap_or("n/a");
                write!(f, " [{name}:{ip}]")?;
            }
            None => write!(f, " [n/a]")?,
        }

        let file = self
            .file
            .map(|f| f.rsplit('/').next().unwrap_or(f))
            .unwrap_or("n/a");
        let line = self.line.map(|l| l.to_string()).unwrap_or_else(|| "n/a".to_string());
        writeln!(
            f,
            " [{file}:{line}] [{module}] {msg}",
            module = self.module_path.unwrap_or("n/a"),
            msg = self.message
        )
    }
}
