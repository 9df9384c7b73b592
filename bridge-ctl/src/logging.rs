use console::style;
use env_logger::{Builder, Target};
use log::{Level, LevelFilter};
use std::io::Write;

/// Log target used by the launcher for spawn and status lines
const STATUS_TARGET: &str = "external_start";

fn level_tag(level: Level) -> String {
    match level {
        Level::Error => style("ERROR").red().bold().to_string(),
        Level::Warn => style("WARN ").yellow().bold().to_string(),
        Level::Info => style("INFO ").green().to_string(),
        Level::Debug => style("DEBUG").cyan().to_string(),
        Level::Trace => style("TRACE").dim().to_string(),
    }
}

/// Initialize logging on stderr, keeping stdout for the bridged stream.
///
/// Status lines are always shown; `--verbose` adds debug output and
/// `RUST_LOG` overrides both.
pub fn init_logger(verbose: bool) {
    let mut builder = Builder::new();
    builder
        .filter_level(if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
        .filter_module(STATUS_TARGET, LevelFilter::Info)
        .target(Target::Stderr)
        .format(|buf, record| {
            let tag = level_tag(record.level());
            if record.target() == STATUS_TARGET {
                writeln!(buf, "{} {}", tag, style(record.args()).bold())
            } else {
                writeln!(
                    buf,
                    "{} {} {}",
                    tag,
                    style(record.target()).dim(),
                    record.args()
                )
            }
        });

    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }
    builder.init();
}
