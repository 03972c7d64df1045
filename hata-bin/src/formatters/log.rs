use std::io::Write;

use env_logger::{Builder, Env};
use log::LevelFilter;

use crate::formatters::{color::color_for_level, supports_color};
use crate::verbosity::Verbosity;

/// Width of the widest level prefix, `[ERROR]`
const LEVEL_WIDTH: usize = 7;

/// Initialize the logging system with the given verbosity level.
pub(crate) fn init_logging(verbose: &Verbosity) {
    // Other crates only log warnings unless RUST_LOG says otherwise
    let env = Env::default().filter_or("RUST_LOG", "warn");

    let mut builder = Builder::from_env(env);
    builder
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false);

    if std::env::var("RUST_LOG").is_err() {
        let level_filter = verbose.log_level_filter();
        builder.filter_level(LevelFilter::Warn.min(level_filter));
        builder
            .filter_module("hata", level_filter)
            .filter_module("hata_lib", level_filter);
    }

    if supports_color() {
        builder.format(|buf, record| {
            let level = record.level();
            let prefix = format!("{:>LEVEL_WIDTH$}", format!("[{level}]"));
            writeln!(
                buf,
                "{} {}",
                color_for_level(level).apply_to(prefix),
                record.args()
            )
        });
    } else {
        builder.format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()));
    }

    builder.init();
}
