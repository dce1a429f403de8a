//! opsh: demo operational shell.
//!
//! Usage:
//!   opsh [--config FILE]              interactive shell
//!   opsh [--config FILE] -c LINE      run one line and exit
//!   opsh [--config FILE] SCRIPT       run a script file and exit
//!
//! Exits non-zero when a one-shot line or script had any failing command.

use std::path::PathBuf;

use clap::Parser;
use log::error;

use opsh::commands::Registry;
use opsh::config::Config;
use opsh::repl::{EditorReader, Session};

/// Demo operational shell.
#[derive(Parser, Debug)]
#[command(name = "opsh", version, about = "Line-oriented operational shell")]
struct Args {
    /// User configuration file, overlaid on the built-in defaults.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run one line and exit.
    #[arg(short = 'c', value_name = "LINE", conflicts_with = "script")]
    command: Option<String>,

    /// Run a script file and exit.
    script: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    let loaded = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!("opsh: config error: {e}");
            std::process::exit(1);
        }
    };
    opsh::logging::init(&config);

    let history = config.history_path();
    let mut session = Session::new(config, Registry::standard());

    let ok = match (args.command, args.script) {
        (Some(line), _) => session.run_source(&line).is_ok(),
        (None, Some(path)) => match std::fs::read_to_string(&path) {
            Ok(text) => session.run_source(&text).is_ok(),
            Err(e) => {
                eprintln!("opsh: {}: {e}", path.display());
                false
            }
        },
        (None, None) => {
            let mut reader = match EditorReader::new(history) {
                Ok(reader) => reader,
                Err(e) => {
                    eprintln!("opsh: cannot open terminal: {e}");
                    std::process::exit(1);
                }
            };
            match session.run(&mut reader) {
                Ok(()) => true,
                Err(e) => {
                    error!("{e}");
                    false
                }
            }
        }
    };

    if !ok {
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_line_with_config() {
        let args = Args::try_parse_from(["opsh", "-c", "seq 3", "--config", "x.toml"]).unwrap();
        assert_eq!(args.command.as_deref(), Some("seq 3"));
        assert_eq!(args.config, Some(PathBuf::from("x.toml")));
        assert!(args.script.is_none());
    }

    #[test]
    fn script_path_is_positional() {
        let args = Args::try_parse_from(["opsh", "run.opsh"]).unwrap();
        assert_eq!(args.script, Some(PathBuf::from("run.opsh")));
        assert!(args.command.is_none());
    }

    #[test]
    fn line_and_script_conflict() {
        assert!(Args::try_parse_from(["opsh", "-c", "pwd", "run.opsh"]).is_err());
        assert!(Args::try_parse_from(["opsh", "--bogus"]).is_err());
        assert!(Args::try_parse_from(["opsh", "-c"]).is_err());
    }
}
