use tracing_subscriber::fmt::{self, format::FmtSpan};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::core::config::Settings;

/// `RUST_LOG` wins over `GRADER_LOG_LEVEL` when both are set.
pub fn init_tracing(settings: &Settings) -> anyhow::Result<()> {
    let telemetry = settings.telemetry();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(&telemetry.log_level)))?;

    let (json, plain) = if telemetry.json {
        let layer = fmt::layer().json().with_current_span(true).with_span_events(FmtSpan::CLOSE);
        (Some(layer), None)
    } else {
        let layer = fmt::layer().with_target(false).with_span_events(FmtSpan::CLOSE);
        (None, Some(layer))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(plain)
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))
}

fn default_directives(level: &str) -> String {
    format!("{level},sqlx=warn,aws_config=warn,aws_smithy_runtime=warn,hyper=warn,pdf_extract=error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives_parse() {
        let directives = default_directives("debug");
        assert!(directives.starts_with("debug,"));
        assert!(EnvFilter::try_new(directives).is_ok());
    }
}
