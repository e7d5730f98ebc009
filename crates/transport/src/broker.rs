//! Coordinator-side message broker.
//!
//! The broker binds the front-end endpoint, learns each seller's identity
//! from the first frame it sends, and matches responses to outstanding
//! requests through a pending table keyed by correlation ID. The sender
//! inserts the pending entry; the receive loop or the timeout removes it,
//! whichever observes completion first.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::codec::Framed;

use common::{CorrelationId, Envelope, MessageKind, SellerId};

use crate::error::TransportError;
use crate::framing::{RoutedCodec, RoutedFrame};

/// Identity-routed request/response broker.
pub struct MessageBroker {
    pending: DashMap<CorrelationId, oneshot::Sender<Envelope>>,
    peers: DashMap<SellerId, mpsc::Sender<RoutedFrame>>,
    request_timeout: Duration,
    shutdown_tx: broadcast::Sender<()>,
    local_addr: SocketAddr,
}

impl MessageBroker {
    /// Binds the front-end endpoint and starts the accept loop.
    pub async fn bind(addr: &str, request_timeout: Duration) -> Result<Arc<Self>, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);

        let broker = Arc::new(Self {
            pending: DashMap::new(),
            peers: DashMap::new(),
            request_timeout,
            shutdown_tx,
            local_addr,
        });

        tokio::spawn(accept_loop(Arc::clone(&broker), listener, shutdown_rx));
        tracing::info!(%local_addr, "message broker bound");

        Ok(broker)
    }

    /// Sends a request to the named peer and awaits its response.
    ///
    /// Assigns a fresh correlation ID if the envelope has none, registers
    /// the pending entry, transmits, and arms the per-request timeout.
    /// Late responses after a timeout are dropped by the receive loop.
    pub async fn send_request(
        &self,
        peer: &SellerId,
        mut envelope: Envelope,
    ) -> Result<Envelope, TransportError> {
        let correlation_id = match envelope.correlation_id {
            Some(id) => id,
            None => {
                let id = CorrelationId::new();
                envelope.correlation_id = Some(id);
                id
            }
        };

        let connection = self
            .peers
            .get(peer)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::PeerUnavailable(peer.clone()))?;

        let payload = serde_json::to_vec(&envelope)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(correlation_id, reply_tx);
        metrics::counter!("transport_requests_total").increment(1);
        tracing::debug!(
            %peer,
            %correlation_id,
            kind = %envelope.kind,
            "sending request"
        );

        if connection
            .send(RoutedFrame::new(peer.as_str(), payload))
            .await
            .is_err()
        {
            self.pending.remove(&correlation_id);
            return Err(TransportError::Send {
                peer: peer.clone(),
                reason: "connection closed".into(),
            });
        }

        match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(response)) => Ok(response),
            // The pending entry was dropped without a response: shutdown.
            Ok(Err(_)) => Err(TransportError::Shutdown),
            Err(_) => {
                self.pending.remove(&correlation_id);
                metrics::counter!("transport_timeouts_total").increment(1);
                Err(TransportError::Timeout {
                    peer: peer.clone(),
                    timeout_ms: self.request_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Fails every outstanding request and stops all broker tasks.
    pub fn shutdown(&self) {
        tracing::info!(
            pending = self.pending.len(),
            peers = self.peers.len(),
            "shutting down message broker"
        );
        let _ = self.shutdown_tx.send(());
        // Dropping the reply senders resolves outstanding requests with
        // the shutdown error; dropping the frame senders stops writers.
        self.pending.clear();
        self.peers.clear();
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns the identities of currently connected peers.
    pub fn connected_peers(&self) -> Vec<SellerId> {
        self.peers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Returns true if the named peer is connected.
    pub fn is_connected(&self, peer: &SellerId) -> bool {
        self.peers.contains_key(peer)
    }

    fn handle_payload(&self, peer: &SellerId, payload: &[u8]) {
        let envelope: Envelope = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::warn!(%peer, %error, "discarding malformed payload");
                return;
            }
        };

        if envelope.kind == MessageKind::Heartbeat {
            tracing::trace!(%peer, "heartbeat received");
            return;
        }

        match envelope.correlation_id {
            Some(correlation_id) => match self.pending.remove(&correlation_id) {
                Some((_, reply_tx)) => {
                    // The requester may have timed out in the meantime.
                    let _ = reply_tx.send(envelope);
                }
                None => {
                    tracing::debug!(
                        %peer,
                        %correlation_id,
                        "dropping late or unmatched response"
                    );
                }
            },
            None => {
                tracing::warn!(%peer, kind = %envelope.kind, "dropping response without correlation ID");
            }
        }
    }
}

async fn accept_loop(
    broker: Arc<MessageBroker>,
    listener: TcpListener,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    tracing::debug!(%remote_addr, "peer connection accepted");
                    tokio::spawn(handle_connection(
                        Arc::clone(&broker),
                        stream,
                        broker.shutdown_tx.subscribe(),
                    ));
                }
                Err(error) => {
                    tracing::warn!(%error, "accept failed");
                }
            },
            _ = shutdown.recv() => break,
        }
    }
}

async fn handle_connection(
    broker: Arc<MessageBroker>,
    stream: TcpStream,
    mut shutdown: broadcast::Receiver<()>,
) {
    let framed = Framed::new(stream, RoutedCodec::new());
    let (mut sink, mut frames) = framed.split();

    // Transmission is serialized per socket: one writer task drains the
    // queue that send_request feeds.
    let (frame_tx, mut frame_rx) = mpsc::channel::<RoutedFrame>(64);
    let writer = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if let Err(error) = sink.send(frame).await {
                tracing::warn!(%error, "peer write failed");
                break;
            }
        }
    });

    let mut identity: Option<SellerId> = None;
    loop {
        tokio::select! {
            next = frames.next() => match next {
                Some(Ok(frame)) => {
                    let Some(peer_name) = frame.identity_str() else {
                        tracing::warn!("discarding frame with non-UTF-8 identity");
                        continue;
                    };
                    let peer = match &identity {
                        Some(peer) => peer.clone(),
                        None => {
                            // First frame registers the peer identity.
                            let peer = SellerId::new(peer_name);
                            broker.peers.insert(peer.clone(), frame_tx.clone());
                            tracing::info!(%peer, "peer registered");
                            identity = Some(peer.clone());
                            peer
                        }
                    };
                    broker.handle_payload(&peer, &frame.payload);
                }
                Some(Err(error)) => {
                    // Framing errors desynchronize the stream; drop the
                    // connection, pending requests will time out.
                    tracing::warn!(%error, "closing connection after framing error");
                    break;
                }
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }

    if let Some(peer) = identity {
        // A reconnect may already have replaced the entry.
        broker
            .peers
            .remove_if(&peer, |_, sender| sender.same_channel(&frame_tx));
        tracing::info!(%peer, "peer disconnected");
    }
    drop(frame_tx);
    let _ = writer.await;
}
