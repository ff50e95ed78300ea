//! TCP request servers (spec.md §4.8, §6).
//!
//! Each server accepts one JSON object per connection (at most 1024 bytes),
//! processes it, writes a JSON reply, and closes — there is no session
//! state tied to the connection itself, unlike the turn server's
//! long-lived relayed sockets. Per-topology serialization comes from the
//! topology's own mutex and the admission controller's reservation-table
//! lock, not from a server-level lock.

pub mod allocation;
pub mod greeting;
pub mod shutdown;
pub mod telemetry;

use std::sync::Arc;

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const MAX_REQUEST_BYTES: usize = 1024;

/// Accept loop shared by all four servers: read at most one 1024-byte
/// datagram-like message per connection, hand its bytes (and the peer
/// address, which the telemetry server uses to identify the reporting fog
/// host) to `handle`, write back whatever it returns, then close.
pub async fn serve<F, Fut>(name: &'static str, listener: TcpListener, handle: Arc<F>)
where
    F: Fn(Vec<u8>, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Vec<u8>> + Send,
{
    let local_addr = listener.local_addr().ok();
    log::info!("{} server listening on {:?}", name, local_addr);

    loop {
        let (mut socket, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("{} server accept failed: {}", name, e);
                continue;
            }
        };

        let handle = handle.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_REQUEST_BYTES];

            let size = match socket.read(&mut buf).await {
                Ok(0) => return,
                Ok(n) => n,
                Err(e) => {
                    log::warn!("{} connection from {} failed to read: {}", name, peer, e);
                    return;
                }
            };

            buf.truncate(size);
            log::trace!("{} request from {}: {} bytes", name, peer, size);

            let reply = handle(buf, peer).await;
            if let Err(e) = socket.write_all(&reply).await {
                log::warn!("{} connection to {} failed to write reply: {}", name, peer, e);
            }
        });
    }
}
