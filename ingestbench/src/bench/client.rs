use rama::{
    Service,
    error::{ErrorContext as _, OpaqueError},
    http::{
        Request, Response, Version,
        client::{EasyHttpWebClient, HttpPooledConnectorConfig},
    },
};

/// Pool limits for a run with `batch_count` chains.
///
/// Every chain has at most one request in flight and reuses its
/// keep-alive connection, so one connection per chain is all a run needs.
/// Chains never wait on the pool for a free slot.
pub fn pool_config(batch_count: usize) -> HttpPooledConnectorConfig {
    let connections = batch_count.max(1);
    HttpPooledConnectorConfig {
        max_total: connections,
        max_active: connections,
        ..Default::default()
    }
}

/// Web client posting batches to the ingestion endpoint,
/// with a connection pool sized to the number of batch chains.
pub fn new_ingest_client(
    batch_count: usize,
) -> Result<impl Service<Request, Output = Response, Error = OpaqueError> + Clone, OpaqueError> {
    let client = EasyHttpWebClient::connector_builder()
        .with_default_transport_connector()
        .without_tls_proxy_support()
        .without_proxy_support()
        .with_tls_support_using_boringssl_and_default_http_version(None, Version::HTTP_11)
        .with_default_http_connector()
        .try_with_connection_pool(pool_config(batch_count))
        .with_context(|| format!("create ingest connection pool for {batch_count} chains"))?
        .build_client();
    Ok(client)
}
