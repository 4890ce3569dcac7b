use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// OTLP/HTTP collector for request spans. `OTEL_EXPORTER_OTLP_ENDPOINT` takes precedence.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl LoggingConfig {
    pub fn otlp_endpoint(&self) -> Option<String> {
        std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .filter(|endpoint| !endpoint.is_empty())
            .or_else(|| self.otlp_endpoint.clone())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            otlp_endpoint: None,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
