//! Rendezvous handshake
//!
//! The server listens on one well-known port whose only job is to negotiate
//! a fresh pair of connections per client. For every accepted rendezvous
//! connection the server binds two OS-assigned listeners, announces their
//! ports in an `EstablishConnection` packet (outbound port first), and waits
//! for the client to connect to both. The client mirrors the steps and ends
//! up with its read leg (the server's outbound) and write leg (the server's
//! inbound).

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};

use super::NetworkConfig;
use crate::protocol::{read_packet, write_packet, FrameError, Packet, PacketKind, PayloadError};

/// Handshake errors
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("Expected EstablishConnection, got {0:?}")]
    UnexpectedPacket(PacketKind),

    #[error("Timed out connecting to the rendezvous endpoint")]
    ConnectTimeout,

    #[error("Timed out waiting for the port assignment")]
    ResponseTimeout,

    #[error("Timed out waiting for the peer to open both data legs")]
    AcceptTimeout,
}

pub type HandshakeResult<T> = Result<T, HandshakeError>;

/// Server side: negotiate the two data legs for one accepted client
///
/// Returns `(outbound, inbound)`: the server-to-client leg first, then the
/// client-to-server leg. Both accepts share one bounded deadline; a client
/// that never connects is reported as a setup failure, not retried.
pub async fn handshake_server(
    mut control: TcpStream,
    peer: SocketAddr,
    config: &NetworkConfig,
) -> HandshakeResult<(TcpStream, TcpStream)> {
    let outbound_listener = TcpListener::bind((config.bind_address, 0)).await?;
    let inbound_listener = TcpListener::bind((config.bind_address, 0)).await?;

    let outbound_port = outbound_listener.local_addr()?.port();
    let inbound_port = inbound_listener.local_addr()?.port();

    tracing::debug!(
        "Allocated data ports {}/{} for {}",
        outbound_port,
        inbound_port,
        peer
    );

    write_packet(
        &mut control,
        &Packet::establish_connection(outbound_port, inbound_port),
    )
    .await?;

    let accepts = async {
        let (outbound, _) = outbound_listener.accept().await?;
        let (inbound, _) = inbound_listener.accept().await?;
        std::io::Result::Ok((outbound, inbound))
    };

    let (outbound, inbound) =
        tokio::time::timeout(Duration::from_millis(config.handshake_timeout_ms), accepts)
            .await
            .map_err(|_| HandshakeError::AcceptTimeout)??;

    tracing::debug!("Both data legs established with {}", peer);

    Ok((outbound, inbound))
}

/// Client side: negotiate the two data legs with a server
///
/// Returns `(read, write)`: the leg carrying server traffic first (the
/// server's outbound port, connected first as documented), then the leg the
/// client writes on.
pub async fn handshake_client(
    rendezvous: SocketAddr,
    config: &NetworkConfig,
) -> HandshakeResult<(TcpStream, TcpStream)> {
    let mut control = connect_with_timeout(rendezvous, config.connect_timeout_ms).await?;

    let reply = tokio::time::timeout(
        Duration::from_millis(config.handshake_timeout_ms),
        read_packet(&mut control),
    )
    .await
    .map_err(|_| HandshakeError::ResponseTimeout)??;

    if reply.kind != PacketKind::EstablishConnection {
        return Err(HandshakeError::UnexpectedPacket(reply.kind));
    }
    let (outbound_port, inbound_port) = reply.parse_establish_connection()?;

    tracing::debug!(
        "Server assigned data ports {}/{}",
        outbound_port,
        inbound_port
    );

    let ip = rendezvous.ip();
    let read = connect_with_timeout((ip, outbound_port).into(), config.connect_timeout_ms).await?;
    let write = connect_with_timeout((ip, inbound_port).into(), config.connect_timeout_ms).await?;

    Ok((read, write))
}

async fn connect_with_timeout(addr: SocketAddr, timeout_ms: u64) -> HandshakeResult<TcpStream> {
    match tokio::time::timeout(Duration::from_millis(timeout_ms), TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(HandshakeError::Io(e)),
        Err(_) => Err(HandshakeError::ConnectTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Boid;

    fn test_config() -> NetworkConfig {
        NetworkConfig {
            connect_timeout_ms: 1000,
            handshake_timeout_ms: 1000,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_full_handshake_pairs_the_legs() {
        let config = test_config();
        let rendezvous = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = rendezvous.local_addr().unwrap();

        let server_config = config.clone();
        let server = tokio::spawn(async move {
            let (control, peer) = rendezvous.accept().await.unwrap();
            handshake_server(control, peer, &server_config).await.unwrap()
        });

        let (mut client_read, mut client_write) =
            handshake_client(addr, &config).await.unwrap();
        let (mut server_outbound, mut server_inbound) = server.await.unwrap();

        // Server-to-client direction
        let snapshot = Packet::boids_state(&[Boid::new(9, 1.0, 2.0, 3.0, 4.0)]).unwrap();
        write_packet(&mut server_outbound, &snapshot).await.unwrap();
        assert_eq!(read_packet(&mut client_read).await.unwrap(), snapshot);

        // Client-to-server direction
        let command = Packet::remove_boid(9);
        write_packet(&mut client_write, &command).await.unwrap();
        assert_eq!(read_packet(&mut server_inbound).await.unwrap(), command);
    }

    #[tokio::test]
    async fn test_client_rejects_unexpected_packet() {
        let config = test_config();
        let rendezvous = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = rendezvous.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut control, _) = rendezvous.accept().await.unwrap();
            write_packet(&mut control, &Packet::error("not a port assignment"))
                .await
                .unwrap();
            // Hold the socket open so the client fails on the kind, not EOF
            tokio::time::sleep(Duration::from_millis(500)).await;
        });

        assert!(matches!(
            handshake_client(addr, &config).await,
            Err(HandshakeError::UnexpectedPacket(PacketKind::Error))
        ));
    }

    #[tokio::test]
    async fn test_server_times_out_without_data_legs() {
        let config = NetworkConfig {
            handshake_timeout_ms: 100,
            ..test_config()
        };
        let rendezvous = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = rendezvous.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (control, peer) = rendezvous.accept().await.unwrap();
            handshake_server(control, peer, &config).await
        });

        // Connect to the rendezvous, read the assignment, then walk away
        let mut control = TcpStream::connect(addr).await.unwrap();
        let reply = read_packet(&mut control).await.unwrap();
        reply.parse_establish_connection().unwrap();

        assert!(matches!(
            server.await.unwrap(),
            Err(HandshakeError::AcceptTimeout)
        ));
    }

    #[tokio::test]
    async fn test_client_times_out_without_assignment() {
        let config = NetworkConfig {
            handshake_timeout_ms: 100,
            ..test_config()
        };
        let rendezvous = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = rendezvous.local_addr().unwrap();

        let silent_server = tokio::spawn(async move {
            let (_control, _) = rendezvous.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
        });

        assert!(matches!(
            handshake_client(addr, &config).await,
            Err(HandshakeError::ResponseTimeout)
        ));

        silent_server.abort();
    }
}
