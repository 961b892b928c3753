use std::net::SocketAddr;
use std::sync::Arc;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use crate::context::CoreContext;
use crate::registry::Registry;

#[derive(Deserialize)]
struct RegisterRequest {
    filename: String,
    url: String,
}

/// Listens for newline-delimited JSON registration requests
/// (`{"filename": "...", "url": "..."}`) and replies `OK` or `ERROR: <msg>`
/// per line.
pub async fn serve(addr: SocketAddr, ctx: Arc<CoreContext>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "control channel listening");

    loop {
        let (socket, peer) = listener.accept().await?;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, &ctx.registry).await {
                warn!(%peer, error = %e, "control connection ended with an error");
            }
        });
    }
}

async fn handle_connection(socket: TcpStream, registry: &Registry) -> std::io::Result<()> {
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<RegisterRequest>(&line) {
            Ok(req) => match registry.register(req.filename.clone(), req.url) {
                Ok(()) => "OK\n".to_string(),
                Err(e) => {
                    error!(filename = %req.filename, error = %e, "registration rejected");
                    format!("ERROR: {e}\n")
                }
            },
            Err(e) => format!("ERROR: malformed request: {e}\n"),
        };
        write_half.write_all(reply.as_bytes()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientPool;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn registers_a_file_and_replies_ok() {
        let registry = Arc::new(Registry::new(Arc::new(ClientPool::new(Duration::from_secs(5)))));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let registry_clone = registry.clone();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let _ = handle_connection(socket, &registry_clone).await;
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"{\"filename\": \"a.bin\", \"url\": \"http://origin/a\"}\n")
            .await
            .unwrap();

        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"OK\n");
        assert!(registry.contains("a.bin"));
    }

    #[tokio::test]
    async fn malformed_line_gets_an_error_reply() {
        let registry = Arc::new(Registry::new(Arc::new(ClientPool::new(Duration::from_secs(5)))));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let _ = handle_connection(socket, &registry).await;
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"not json\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("ERROR:"));
    }
}
