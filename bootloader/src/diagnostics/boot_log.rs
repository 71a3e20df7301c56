//! Boot log backend
//!
//! Routes the `log` facade to the VGA terminal so module-level tracing
//! (`log::debug!` in the filesystem and loader paths) is visible during
//! boot. Installed once from the entry point; tests leave the facade
//! uninitialized and the macros become no-ops.

use core::fmt::Write;

use log::{LevelFilter, Log, Metadata, Record};
use spin::{Mutex, Once};

use crate::drivers::vga::VgaTerminal;

struct BootLogger {
    terminal: Mutex<VgaTerminal>,
}

impl BootLogger {
    const fn new() -> Self {
        Self {
            terminal: Mutex::new(VgaTerminal::new()),
        }
    }
}

impl Log for BootLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut terminal = self.terminal.lock();
        let _ = writeln!(terminal, "[{}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: BootLogger = BootLogger::new();
static INSTALL: Once<()> = Once::new();

/// Install the VGA-backed logger
///
/// Safe to call more than once; only the first call takes effect.
pub fn init(level: LevelFilter) {
    INSTALL.call_once(|| {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(level);
        }
    });
}
