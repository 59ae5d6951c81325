//! Read-only status endpoint for front-ends and health checks.

use anyhow::Result;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use usbgate_core::{DevicePlatform, Gate};

/// Body served by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub authenticated: bool,
    pub registered: usize,
    pub registry_stale: bool,
}

impl StatusReport {
    pub fn capture<P: DevicePlatform>(gate: &Gate<P>) -> Self {
        Self {
            authenticated: gate.is_authenticated(),
            registered: gate.registered_count(),
            registry_stale: gate.registry_stale(),
        }
    }
}

pub fn http_response(report: &StatusReport) -> String {
    let body = serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string());
    format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

/// How long a client may take to send its request before it is answered anyway.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn serve<P>(gate: Arc<Gate<P>>, addr: SocketAddr) -> Result<()>
where
    P: DevicePlatform + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!("status endpoint listening on http://{addr}");
    serve_on(listener, gate).await
}

/// Accept loop. Each connection gets its own task so a silent client cannot
/// hold up the others.
async fn serve_on<P>(listener: TcpListener, gate: Arc<Gate<P>>) -> Result<()>
where
    P: DevicePlatform + 'static,
{
    loop {
        let (stream, peer) = listener.accept().await?;
        tokio::spawn(respond(stream, peer, Arc::clone(&gate)));
    }
}

async fn respond<P>(mut stream: TcpStream, peer: SocketAddr, gate: Arc<Gate<P>>)
where
    P: DevicePlatform,
{
    // Consume the request head so closing the socket does not reset the peer.
    let mut request = [0u8; 1024];
    match timeout(REQUEST_TIMEOUT, stream.read(&mut request)).await {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => {
            warn!("failed to read request from {peer}: {err}");
            return;
        }
        Err(_) => debug!("no request from {peer} within {REQUEST_TIMEOUT:?}; answering anyway"),
    }

    let response = http_response(&StatusReport::capture(&gate));
    if let Err(err) = stream.write_all(response.as_bytes()).await {
        warn!("failed to respond to {peer}: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use usbgate_core::{
        AuthorizationRegistry, DeviceEvent, DeviceId, Enforcer, GateResult, IdentityPolicy,
    };

    #[test]
    fn response_carries_json_body_with_length() {
        let report = StatusReport {
            authenticated: true,
            registered: 2,
            registry_stale: false,
        };
        let response = http_response(&report);
        let (head, body) = response.split_once("\r\n\r\n").unwrap();

        assert!(head.starts_with("HTTP/1.1 200 OK"));
        assert!(head.contains(&format!("content-length: {}", body.len())));
        let parsed: StatusReport = serde_json::from_str(body).unwrap();
        assert_eq!(parsed, report);
    }

    struct NullPlatform;

    impl Enforcer for NullPlatform {
        fn on_grant(&self, _device: &DeviceId) -> GateResult<()> {
            Ok(())
        }

        fn on_deny(&self, _device: Option<&DeviceId>) -> GateResult<()> {
            Ok(())
        }

        fn on_revoke(&self, _device: &DeviceId) -> GateResult<()> {
            Ok(())
        }
    }

    impl DevicePlatform for NullPlatform {
        fn enumerate_removable_devices(&self) -> GateResult<Vec<DeviceEvent>> {
            Ok(Vec::new())
        }

        fn enforcer(&self) -> &dyn Enforcer {
            self
        }
    }

    #[tokio::test]
    async fn idle_client_does_not_block_other_requests() {
        let dir = tempdir().unwrap();
        let mut registry = AuthorizationRegistry::load(dir.path().join("devices.txt"));
        registry.register(DeviceId::new("SN1").unwrap());
        let gate = Arc::new(Gate::new(
            registry,
            IdentityPolicy::default(),
            true,
            NullPlatform,
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_on(listener, gate));

        let _idle = TcpStream::connect(addr).await.unwrap();

        let exchange = async {
            let mut client = TcpStream::connect(addr).await.unwrap();
            client.write_all(b"GET /status HTTP/1.0\r\n\r\n").await.unwrap();
            let mut response = String::new();
            client.read_to_string(&mut response).await.unwrap();
            response
        };
        let response = timeout(Duration::from_secs(1), exchange)
            .await
            .expect("status request answered while another client idles");

        let (_, body) = response.split_once("\r\n\r\n").unwrap();
        let report: StatusReport = serde_json::from_str(body).unwrap();
        assert_eq!(report.registered, 1);
        assert!(!report.authenticated);
        server.abort();
    }
}
