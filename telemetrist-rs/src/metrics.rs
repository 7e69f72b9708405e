//! Timing metrics
//!
//! Timings go through the `metrics` facade and are exposed for scraping by the
//! Prometheus exporter. Without an installed recorder they are discarded, so
//! nothing here can fail a request.

use std::time::Duration;

use config_rs::MetricsConfig;
use metrics::Label;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::TelemetristError;

/// Install the Prometheus exporter with `service` and `env` attached to every series.
///
/// Returns `Ok(false)` when no listener address is configured.
pub fn init_metrics(config: &MetricsConfig, service_name: &str) -> Result<bool, TelemetristError> {
    let Some(addr) = config.prometheus_addr else {
        return Ok(false);
    };

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .add_global_label("service", service_name)
        .add_global_label("env", config.environment.as_str())
        .install()
        .map_err(|e| TelemetristError::Init(format!("prometheus exporter on {}: {}", addr, e)))?;

    log::info!("Serving Prometheus metrics on {}", addr);
    Ok(true)
}

/// Record one timing in seconds under `name`
pub(crate) fn record_timing<'a, I>(name: &'static str, elapsed: Duration, labels: I, error: bool)
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut labels: Vec<Label> = labels
        .into_iter()
        .map(|(k, v)| Label::new(k.clone(), v.clone()))
        .collect();
    labels.push(Label::new("error", if error { "true" } else { "false" }));

    metrics::histogram!(name, elapsed.as_secs_f64(), labels);
}
