use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Port the Prometheus scrape endpoint listens on.
const METRICS_PORT: u16 = 9000;

/// Installs the global metrics recorder and serves it on `[::]:9000/metrics`.
///
/// Every series carries an `execution_id` label so that concurrent runs exporting the
/// same tables can be told apart.
pub fn init_metrics(execution_id: &str) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::new(
            IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            METRICS_PORT,
        ))
        .add_global_label("execution_id", execution_id)
        .install()
}
