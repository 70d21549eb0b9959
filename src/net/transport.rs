//! Transport seam and the bridge that moves traffic across it.

use super::{Delivery, InboundPacket, NetEvent, OutboundPacket, PeerId, PeerTarget};
use crossbeam_channel::{Receiver, Sender};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Peer not connected: {0:?}")]
    UnknownPeer(PeerId),
    #[error("No server connection")]
    NoServer,
    #[error("Message too large: {0} bytes (max {1})")]
    TooLarge(usize, usize),
    #[error("Transport closed")]
    Closed,
}

/// A byte-message transport. Delivery semantics are whatever the
/// implementation provides for the requested [`Delivery`] mode.
pub trait Transport {
    fn send(
        &mut self,
        target: PeerTarget,
        payload: &[u8],
        channel: u8,
        delivery: Delivery,
    ) -> Result<(), TransportError>;

    /// Connect/disconnect/packet events since the last poll.
    fn poll_events(&mut self) -> Vec<NetEvent>;
}

/// Network-side handle to a simulation's queues.
///
/// Call [`NetworkBridge::pump`] and [`NetworkBridge::flush`] from the network
/// thread (or between ticks); both only touch lock-free channels.
#[derive(Debug, Clone)]
pub struct NetworkBridge {
    outbound: Receiver<OutboundPacket>,
    inbound: Sender<NetEvent>,
}

impl NetworkBridge {
    pub fn new(outbound: Receiver<OutboundPacket>, inbound: Sender<NetEvent>) -> Self {
        Self { outbound, inbound }
    }

    /// Move transport events into the simulation's inbound queue.
    pub fn pump<T: Transport + ?Sized>(&self, transport: &mut T) -> usize {
        let mut count = 0;
        for event in transport.poll_events() {
            if self.inbound.send(event).is_err() {
                tracing::debug!("Simulation gone, dropping inbound events");
                break;
            }
            count += 1;
        }
        count
    }

    /// Send every queued outbound packet. Send failures are logged and the
    /// packet dropped.
    pub fn flush<T: Transport + ?Sized>(&self, transport: &mut T) -> usize {
        let mut sent = 0;
        for packet in self.outbound.try_iter() {
            match transport.send(packet.target, &packet.payload, packet.channel, packet.delivery) {
                Ok(()) => sent += 1,
                Err(e) => tracing::warn!("Send on channel {} failed: {}", packet.channel, e),
            }
        }
        sent
    }

    /// Feed an event directly (hosts without a [`Transport`], tests).
    pub fn inject(&self, event: NetEvent) -> bool {
        self.inbound.send(event).is_ok()
    }

    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }
}

/// In-process transport linking simulations in the same process.
///
/// Every mode is delivered reliably and in order.
#[derive(Debug)]
pub struct MemoryTransport {
    local: PeerId,
    peers: Vec<(PeerId, Sender<NetEvent>)>,
    server: Option<PeerId>,
    incoming_tx: Sender<NetEvent>,
    incoming: Receiver<NetEvent>,
    max_message_size: usize,
    sent: u64,
}

impl MemoryTransport {
    pub fn new(local: PeerId) -> Self {
        let (incoming_tx, incoming) = crossbeam_channel::unbounded();
        Self {
            local,
            peers: Vec::new(),
            server: None,
            incoming_tx,
            incoming,
            max_message_size: 64 * 1024,
            sent: 0,
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.local
    }

    pub fn sent_count(&self) -> u64 {
        self.sent
    }

    /// Link `client` to `server`; both sides see a `Connected` event.
    pub fn connect(server: &mut MemoryTransport, client: &mut MemoryTransport) {
        server.peers.push((client.local, client.incoming_tx.clone()));
        client.peers.push((server.local, server.incoming_tx.clone()));
        client.server = Some(server.local);
        let _ = server.incoming_tx.send(NetEvent::Connected(client.local));
        let _ = client.incoming_tx.send(NetEvent::Connected(server.local));
    }

    /// Drop the link to `peer`; both sides see a `Disconnected` event.
    pub fn disconnect(&mut self, peer: PeerId) {
        if let Some(pos) = self.peers.iter().position(|(id, _)| *id == peer) {
            let (_, tx) = self.peers.remove(pos);
            let _ = tx.send(NetEvent::Disconnected(self.local));
            let _ = self.incoming_tx.send(NetEvent::Disconnected(peer));
        }
        if self.server == Some(peer) {
            self.server = None;
        }
    }

    fn deliver(&mut self, to: &Sender<NetEvent>, payload: &[u8], channel: u8) -> Result<(), TransportError> {
        to.send(NetEvent::Packet(InboundPacket {
            from: self.local,
            channel,
            payload: payload.to_vec(),
        }))
        .map_err(|_| TransportError::Closed)?;
        self.sent += 1;
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn send(
        &mut self,
        target: PeerTarget,
        payload: &[u8],
        channel: u8,
        _delivery: Delivery,
    ) -> Result<(), TransportError> {
        if payload.len() > self.max_message_size {
            return Err(TransportError::TooLarge(payload.len(), self.max_message_size));
        }
        let recipients: Vec<Sender<NetEvent>> = match target {
            PeerTarget::Broadcast => self.peers.iter().map(|(_, tx)| tx.clone()).collect(),
            PeerTarget::Peer(id) => {
                let tx = self
                    .peers
                    .iter()
                    .find(|(p, _)| *p == id)
                    .map(|(_, tx)| tx.clone())
                    .ok_or(TransportError::UnknownPeer(id))?;
                vec![tx]
            }
            PeerTarget::Server => {
                let server = self.server.ok_or(TransportError::NoServer)?;
                let tx = self
                    .peers
                    .iter()
                    .find(|(p, _)| *p == server)
                    .map(|(_, tx)| tx.clone())
                    .ok_or(TransportError::UnknownPeer(server))?;
                vec![tx]
            }
        };
        for tx in &recipients {
            self.deliver(tx, payload, channel)?;
        }
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<NetEvent> {
        self.incoming.try_iter().collect()
    }
}
