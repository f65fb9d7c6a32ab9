use chrono::Utc;
use env_logger::{Builder, Env};
use log::LevelFilter;
use std::io::Write;

/// Installs the process-wide logger. `RUST_LOG` wins over `log_level`.
///
/// Calling this twice is harmless; the second call is ignored.
pub fn init(log_level: &str) {
    let env = Env::default().filter_or("RUST_LOG", normalize(log_level));

    let _ = Builder::from_env(env)
        .format(|buf, record| writeln!(buf, "{}", format_log(record)))
        .try_init();
}

pub fn format_log(record: &log::Record) -> String {
    let target = if record.target().is_empty() {
        record.module_path().unwrap_or("unknown")
    } else {
        record.target()
    };

    format!(
        "[{}] {:<5} [{}] {}",
        Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        record.level(),
        target,
        record.args()
    )
}

/// Unknown levels fall back to `info`.
pub fn parse_log_level(level: &str) -> LevelFilter {
    match level.trim().to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" | "warning" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

fn normalize(level: &str) -> String {
    parse_log_level(level).to_string().to_lowercase()
}
