//! The `-v` / `-q` flags of the CLI.
//!
//! Without either flag, warnings are shown. This is where rate limit hits and
//! global lockouts are reported.
//! - `-q` only errors
//! - `-v` info
//! - `-vv` debug, which includes every handler admission
//! - `-vvv` trace

use std::fmt;

use log::{Level, LevelFilter};
use serde::Deserialize;

#[derive(clap::Args, Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Verbosity {
    /// Pass many times for more log output
    ///
    /// By default, warnings are shown, which includes every rate limit hit.
    /// `-v` enables info logging, `-vv` debug, and `-vvv` trace.
    #[arg(
        long,
        short = 'v',
        action = clap::ArgAction::Count,
        global = true,
        conflicts_with = "quiet",
    )]
    verbose: u8,

    /// Less output per occurrence
    #[arg(
        long,
        short = 'q',
        action = clap::ArgAction::Count,
        global = true,
        conflicts_with = "verbose",
    )]
    quiet: u8,
}

impl Verbosity {
    /// Get the log level filter.
    ///
    /// `-qq` and beyond turn logging off.
    pub(crate) fn log_level_filter(&self) -> LevelFilter {
        match self.verbosity() {
            i8::MIN..=-1 => LevelFilter::Off,
            value => level_enum(value).to_level_filter(),
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    const fn verbosity(&self) -> i8 {
        level_value(Level::Warn) - (self.quiet as i8) + (self.verbose as i8)
    }
}

// Deserialized from a level name like "warn", "warning" or "Debug"
impl<'de> Deserialize<'de> for Verbosity {
    #[allow(clippy::cast_sign_loss)]
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let (verbose, quiet) = match s.to_lowercase().as_str() {
            "off" => (0, 2),
            "error" => (0, 1),
            "warn" | "warning" => (0, 0),
            "info" => (1, 0),
            "debug" => (2, 0),
            "trace" => (3, 0),
            level => {
                return Err(serde::de::Error::custom(format!(
                    "invalid log level `{level}`"
                )));
            }
        };
        Ok(Verbosity { verbose, quiet })
    }
}

const fn level_value(level: Level) -> i8 {
    match level {
        Level::Error => 0,
        Level::Warn => 1,
        Level::Info => 2,
        Level::Debug => 3,
        Level::Trace => 4,
    }
}

const fn level_enum(verbosity: i8) -> Level {
    match verbosity {
        i8::MIN..=0 => Level::Error,
        1 => Level::Warn,
        2 => Level::Info,
        3 => Level::Debug,
        _ => Level::Trace,
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.log_level_filter())
    }
}
