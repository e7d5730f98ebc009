//! Seller-side connection to the coordinator.
//!
//! A peer dials the coordinator's front-end endpoint, announces its
//! identity with an immediate heartbeat, then serves requests through a
//! [`RequestHandler`] while heartbeating on a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;

use common::{Envelope, SellerId};

use crate::error::TransportError;
use crate::framing::{RoutedCodec, RoutedFrame};

/// Handles one inbound request and produces the response envelope.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Processes a request; the returned envelope is sent back verbatim.
    ///
    /// Returning `None` sends nothing, leaving the requester to time
    /// out. Production handlers always respond; test handlers use this
    /// to simulate a lost response.
    async fn handle(&self, request: Envelope) -> Option<Envelope>;
}

/// Connection parameters for a seller peer.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Coordinator front-end address, e.g. `127.0.0.1:5555`.
    pub coordinator_addr: String,

    /// Stable identity presented to the coordinator.
    pub identity: SellerId,

    /// Interval between heartbeats.
    pub heartbeat_interval: Duration,
}

/// Connects to the coordinator and serves requests until shutdown or
/// disconnect.
pub async fn run_peer<H: RequestHandler>(
    config: PeerConfig,
    handler: Arc<H>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), TransportError> {
    let stream = TcpStream::connect(&config.coordinator_addr).await?;
    let mut framed = Framed::new(stream, RoutedCodec::new());
    tracing::info!(
        identity = %config.identity,
        addr = %config.coordinator_addr,
        "connected to coordinator"
    );

    // The first frame registers our identity with the broker.
    send_envelope(
        &mut framed,
        &config.identity,
        &Envelope::heartbeat(config.identity.as_str()),
    )
    .await?;

    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    heartbeat.reset();

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                send_envelope(
                    &mut framed,
                    &config.identity,
                    &Envelope::heartbeat(config.identity.as_str()),
                )
                .await?;
            }
            next = framed.next() => match next {
                Some(Ok(frame)) => {
                    let request: Envelope = match serde_json::from_slice(&frame.payload) {
                        Ok(envelope) => envelope,
                        Err(error) => {
                            tracing::warn!(%error, "discarding malformed request");
                            continue;
                        }
                    };
                    tracing::debug!(
                        kind = %request.kind,
                        correlation_id = ?request.correlation_id,
                        "request received"
                    );
                    if let Some(response) = handler.handle(request).await {
                        send_envelope(&mut framed, &config.identity, &response).await?;
                    }
                }
                Some(Err(error)) => {
                    tracing::warn!(%error, "closing connection after framing error");
                    return Err(error);
                }
                None => {
                    tracing::info!("coordinator closed the connection");
                    return Ok(());
                }
            },
            _ = shutdown.recv() => {
                tracing::info!(identity = %config.identity, "peer shutting down");
                return Ok(());
            }
        }
    }
}

async fn send_envelope(
    framed: &mut Framed<TcpStream, RoutedCodec>,
    identity: &SellerId,
    envelope: &Envelope,
) -> Result<(), TransportError> {
    let payload = serde_json::to_vec(envelope)?;
    framed
        .send(RoutedFrame::new(identity.as_str(), payload))
        .await
}
