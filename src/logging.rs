use std::path::Path;

use log::warn;
use simplelog::{
    ColorChoice, CombinedLogger, LevelFilter, SharedLogger, TermLogger, TerminalMode, WriteLogger,
};

use crate::config::Config;

/// Parse a level name (`off`, `error`, `warn`, `info`, `debug`, `trace`).
pub fn level_filter(name: &str) -> Option<LevelFilter> {
    name.trim().parse().ok()
}

/// Install the global logger: stderr at `warn` (or quieter when the
/// configured level is), plus an append-only log file at the configured
/// level when `logging.file` is set.
///
/// Best-effort: a log file that cannot be opened only costs the file
/// logger, and a second call keeps the first logger.
pub fn init(config: &Config) {
    let parsed = level_filter(&config.logging.level);
    let level = parsed.unwrap_or(LevelFilter::Warn);
    let log_config = simplelog::ConfigBuilder::new()
        .set_target_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off)
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level.min(LevelFilter::Warn),
        log_config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];

    let mut open_error = None;
    if let Some(path) = config.log_path() {
        match open_log(&path) {
            Ok(file) => loggers.push(WriteLogger::new(level, log_config, file)),
            Err(err) => open_error = Some((path, err)),
        }
    }

    let _ = CombinedLogger::init(loggers);

    if parsed.is_none() {
        warn!("unknown log level {:?}, using warn", config.logging.level);
    }
    if let Some((path, err)) = open_error {
        warn!("cannot open log file {}: {err}", path.display());
    }
}

fn open_log(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(dir) = path.parent() {
        let _ = std::fs::create_dir_all(dir);
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names() {
        assert_eq!(level_filter("debug"), Some(LevelFilter::Debug));
        assert_eq!(level_filter(" INFO "), Some(LevelFilter::Info));
        assert_eq!(level_filter("off"), Some(LevelFilter::Off));
        assert_eq!(level_filter("loud"), None);
    }
}
