//! Console + file logging.
//!
//! Every record goes to stdout and is appended to `logs/gridwatch.log` as
//! `[HH:MM:SS.mmm] LEVEL target: message`. `RUST_LOG` overrides the level.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use chrono::Local;
use log::LevelFilter;

use crate::paths;

/// Writes everything to both sinks. Errors from the second sink are ignored
/// so a full disk never silences the console.
struct Tee<A, B> {
    primary: A,
    secondary: Option<B>,
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.primary.write_all(buf)?;
        if let Some(secondary) = self.secondary.as_mut() {
            if secondary.write_all(buf).is_err() {
                self.secondary = None;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(secondary) = self.secondary.as_mut() {
            let _ = secondary.flush();
        }
        self.primary.flush()
    }
}

fn open_log_file(path: &Path) -> Option<File> {
    OpenOptions::new().create(true).append(true).open(path).ok()
}

/// Installs the global logger. `verbose` lowers the default level to debug.
pub fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let file = open_log_file(&paths::get_log_file());
    let missing_file = file.is_none();

    let target = Tee {
        primary: io::stdout(),
        secondary: file,
    };

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {:<5} {}: {}",
                Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(target)))
        .init();

    if missing_file {
        log::warn!(
            "Could not open {}; logging to console only",
            paths::get_log_file().display()
        );
    }
}

/// Routes panics from any thread into the log before the default report.
pub fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        let location = panic_info
            .location()
            .map(|loc| format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_default();
        let thread = std::thread::current();
        log::error!(
            "[PANIC] thread '{}'{}: {}",
            thread.name().unwrap_or("unnamed"),
            location,
            msg
        );
        default_hook(panic_info);
    }));
}
