// Logger setup driven by the [logging] settings
use chrono::{SecondsFormat, Utc};
use env_logger::{Builder, Env};
use std::io::Write;

use crate::settings::{LogFormat, LoggingSettings};

/// Render one record as a single JSON line
fn json_line(record: &log::Record<'_>) -> String {
    serde_json::json!({
        "time": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "level": record.level().as_str().to_lowercase(),
        "target": record.target(),
        "msg": record.args().to_string(),
    })
    .to_string()
}

/// Render one record as a plain text line with a UTC timestamp
fn text_line(record: &log::Record<'_>) -> String {
    format!(
        "time=\"{}\" level={} target={} msg=\"{}\"",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        record.level().as_str().to_lowercase(),
        record.target(),
        record.args()
    )
}

/// Build a logger for `settings`
///
/// `RUST_LOG` wins over the configured level.
#[must_use]
pub fn build_logger(settings: &LoggingSettings) -> Builder {
    let mut builder = Builder::from_env(Env::default().default_filter_or(settings.level.as_str()));
    match settings.format {
        LogFormat::Text => builder.format(|buf, record| writeln!(buf, "{}", text_line(record))),
        LogFormat::Json => builder.format(|buf, record| writeln!(buf, "{}", json_line(record))),
    };
    builder
}

/// Install the global logger once
///
/// # Errors
///
/// Returns an error if a logger is already installed
pub fn init_logger(settings: &LoggingSettings) -> Result<(), log::SetLoggerError> {
    build_logger(settings).try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_line(format: fn(&log::Record<'_>) -> String, message: &str) -> String {
        format(
            &log::Record::builder()
                .args(format_args!("{message}"))
                .level(log::Level::Warn)
                .target("oidc_gateway::test")
                .build(),
        )
    }

    #[test]
    fn test_json_line_is_valid_json() {
        let line = record_line(json_line, "cookie \"rejected\"");
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["level"], "warn");
        assert_eq!(value["msg"], "cookie \"rejected\"");
        assert!(value["time"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_text_line_fields() {
        let line = record_line(text_line, "started");
        assert!(line.contains("level=warn"));
        assert!(line.contains("target=oidc_gateway::test"));
        assert!(line.ends_with("msg=\"started\""));
    }
}
