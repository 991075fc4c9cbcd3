//! Accept loop and connection supervision: one task per connection, at
//! most one live connection per peer IP, blacklisted IPs rejected before
//! any NNTP dialog begins (§4.6).

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use socket2::TcpKeepalive;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::backend::Backend;
use crate::cache::CooldownCache;
use crate::error::Result;
use crate::protocol;

/// Tracks the task handle of the current live connection per IP, so a new
/// connection from the same address can displace the old one.
type ConnectionRegistry = Mutex<HashMap<IpAddr, JoinHandle<()>>>;

pub struct ListenerConfig {
    pub addr: String,
    pub server_name: String,
    pub throttle_window: Duration,
    pub throttle_interval: Duration,
    pub cooldown_capacity: usize,
}

/// Runs the accept loop forever (until the process is asked to shut down).
pub async fn serve(backend: Arc<Backend>, config: ListenerConfig) -> Result<()> {
    let listener = TcpListener::bind(&config.addr).await?;
    info!(addr = %config.addr, "listening");

    let cooldowns = crate::posting::new_cooldown_cache(config.cooldown_capacity);
    let registry: Arc<ConnectionRegistry> = Arc::new(Mutex::new(HashMap::new()));

    loop {
        let (socket, peer) = listener.accept().await?;
        tune_socket(&socket);
        let peer_ip = peer.ip();

        if backend.is_blacklisted(peer_ip).await {
            warn!(peer = %peer_ip, "rejecting connection from blacklisted IP");
            drop(socket);
            continue;
        }

        let backend = backend.clone();
        let cooldowns = cooldowns.clone();
        let registry_for_task = registry.clone();
        let server_name = config.server_name.clone();
        let throttle_window = config.throttle_window;
        let throttle_interval = config.throttle_interval;

        let handle = tokio::spawn(async move {
            let result = protocol::run_connection(
                socket,
                backend,
                cooldowns,
                peer_ip,
                server_name,
                throttle_window,
                throttle_interval,
            )
            .await;
            if let Err(e) = result {
                warn!(peer = %peer_ip, error = %e, "connection ended with error");
            }
            let mut registry = registry_for_task.lock().await;
            registry.remove(&peer_ip);
        });

        let mut registry_guard = registry.lock().await;
        if let Some(previous) = registry_guard.insert(peer_ip, handle) {
            previous.abort();
        }
    }
}

/// Set `TCP_NODELAY` for the request/response pattern NNTP uses, and a
/// keepalive so dead peers are reaped instead of pinning a connection slot
/// forever.
fn tune_socket(socket: &tokio::net::TcpStream) {
    let sock_ref = socket2::SockRef::from(socket);
    if let Err(e) = sock_ref.set_nodelay(true) {
        warn!(error = %e, "failed to set TCP_NODELAY");
    }
    let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(60));
    if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
        warn!(error = %e, "failed to set TCP keepalive");
    }
}
