use crate::qemu_trace;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// A [`Log`] sink that writes `"[LEVEL] target: message"` lines to the QEMU
/// debug console.
///
/// Lives in a `static`, so it can be installed before any allocator exists.
pub struct QemuLogger {
    max_level: LevelFilter,
}

impl QemuLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Install this logger as the global `log` sink. Call once during early init.
    ///
    /// # Errors
    /// Fails if a logger has already been installed.
    pub fn init(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.max_level);
        Ok(())
    }
}

impl Log for QemuLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        qemu_trace!(
            "[{}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn filters_by_max_level() {
        let logger = QemuLogger::new(LevelFilter::Info);
        let info = Metadata::builder().level(Level::Info).target("kernel_mm").build();
        let trace = Metadata::builder().level(Level::Trace).target("kernel_mm").build();
        assert!(logger.enabled(&info));
        assert!(!logger.enabled(&trace));
    }
}
