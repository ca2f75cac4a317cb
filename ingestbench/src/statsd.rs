//! StatsD timing sink.
//!
//! Samples are queued and sent from a background thread,
//! so a slow or missing StatsD daemon never stalls a batch chain.

use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket},
    time::Duration,
};

use cadence::{QueuingMetricSink, StatsdClient, Timed as _, UdpMetricSink};
use rama::{
    error::{ErrorContext as _, OpaqueError},
    telemetry::tracing,
};

/// Receiver of timing samples.
pub trait TimingSink: Send + Sync + 'static {
    fn timing(&self, name: &str, value: Duration);
}

/// Reports timings as StatsD `ms` metrics over UDP.
pub struct StatsdSink {
    client: StatsdClient,
}

impl StatsdSink {
    /// Create a sink sending to `addr`.
    ///
    /// A non-empty `prefix` is joined to every metric name with a dot.
    pub fn try_new(addr: SocketAddr, prefix: &str) -> Result<Self, OpaqueError> {
        let bind_ip = if addr.is_ipv4() {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        };

        let socket =
            UdpSocket::bind(SocketAddr::new(bind_ip, 0)).context("bind statsd udp socket")?;
        socket
            .set_nonblocking(true)
            .context("set statsd udp socket non-blocking")?;

        let udp_sink = UdpMetricSink::from(addr, socket)
            .with_context(|| format!("create statsd udp sink for {addr}"))?;
        let client = StatsdClient::from_sink(prefix, QueuingMetricSink::from(udp_sink));

        tracing::debug!(%addr, %prefix, "statsd timing sink ready");
        Ok(Self { client })
    }
}

impl TimingSink for StatsdSink {
    fn timing(&self, name: &str, value: Duration) {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        if let Err(err) = self.client.time(name, millis) {
            tracing::debug!("failed to queue statsd timing '{name}': {err}");
        }
    }
}
