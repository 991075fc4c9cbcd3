//! The NNTP protocol dispatcher: session state machine, command table, and
//! the I/O boundary where dot-stuffing is applied (§4.5).

pub mod commands;
pub mod response;
pub mod session;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::backend::Backend;
use crate::cache::CooldownCache;
use crate::error::Result;

pub use session::Session;

/// Drives one connection end to end: greeting, read-dispatch-write loop
/// until `QUIT`, a protocol error, or EOF.
#[instrument(skip_all, fields(peer = %peer_ip))]
pub async fn run_connection<S>(
    socket: S,
    backend: Arc<Backend>,
    cooldowns: Arc<Mutex<CooldownCache>>,
    peer_ip: IpAddr,
    server_name: String,
    throttle_window: Duration,
    throttle_interval: Duration,
) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (read_half, mut write_half) = tokio::io::split(socket);
    let mut reader = BufReader::new(read_half);
    let mut session = Session::new(backend, cooldowns, peer_ip, server_name);

    response::write_line(&mut write_half, "200 Hello!").await?;

    loop {
        let line = match response::read_line(&mut reader).await {
            Ok(line) => line,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }
        session.throttle(throttle_window, throttle_interval).await;

        let mut parts = line.splitn(2, ' ');
        let cmd = parts.next().unwrap_or("").trim();
        let args = parts.next().unwrap_or("").trim();

        match commands::dispatch(&mut session, cmd, args, &mut reader, &mut write_half).await {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) => {
                info!(error = %e, "connection terminated by protocol error");
                break;
            }
        }
    }

    write_half.shutdown().await.ok();
    Ok(())
}
