//! Logger wiring for the solver entry points: terminal output always,
//! optionally mirrored into a file.
use chrono::Local;
use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger,
};
use std::fs::File;

/// 0 silences everything, 1 gives run summaries, 2 and above adds
/// per-step diagnostics.
pub fn level_from_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Off,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    }
}

/// Timestamped default name for the log file.
pub fn default_log_name() -> String {
    let date_and_time = Local::now().format("%Y-%m-%d_%H-%M-%S");
    format!("dae_log_{}.txt", date_and_time)
}

/// Installs the global logger. Repeated calls are tolerated: the first
/// successful installation wins, later ones are no-ops.
pub fn init_logger(verbosity: u8, log_file: Option<&str>) {
    let level = level_from_verbosity(verbosity);
    if level == LevelFilter::Off {
        return;
    }

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let Some(filename) = log_file {
        if let Ok(file) = File::create(filename) {
            loggers.push(WriteLogger::new(level, Config::default(), file));
        }
    }
    let _ = CombinedLogger::init(loggers);
}
