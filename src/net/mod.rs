//! Network-facing queues and ingress systems.
//!
//! The simulation never touches a socket. Inbound events are pushed by the
//! network side into a channel and drained once per tick by
//! [`drain_ingress_system`]; outbound packets are pushed into the [`Outbox`]
//! and flushed by the network side whenever it likes (see
//! [`NetworkBridge`]). Nothing in the tick blocks on I/O.

pub mod transport;

pub use transport::{MemoryTransport, NetworkBridge, Transport, TransportError};

use crate::components::{MarkedForDestruction, Owner};
use bevy_ecs::prelude::*;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Transport-level peer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

/// Where an outbound packet goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerTarget {
    Broadcast,
    Peer(PeerId),
    /// The authoritative server (used by clients).
    Server,
}

/// Delivery guarantees offered by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Delivery {
    Unreliable,
    Sequenced,
    ReliableOrdered,
    ReliableUnordered,
    ReliableSequenced,
}

impl Delivery {
    pub fn is_reliable(&self) -> bool {
        matches!(
            self,
            Delivery::ReliableOrdered | Delivery::ReliableUnordered | Delivery::ReliableSequenced
        )
    }
}

/// A packet queued for sending.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundPacket {
    pub target: PeerTarget,
    pub channel: u8,
    pub delivery: Delivery,
    pub payload: Vec<u8>,
}

/// A packet received from a peer.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundPacket {
    pub from: PeerId,
    pub channel: u8,
    pub payload: Vec<u8>,
}

/// Everything the network side can tell the simulation.
#[derive(Debug, Clone, PartialEq)]
pub enum NetEvent {
    Connected(PeerId),
    Disconnected(PeerId),
    Packet(InboundPacket),
}

/// Outbound packet queue, written by the sync systems.
#[derive(Resource, Debug)]
pub struct Outbox {
    tx: Sender<OutboundPacket>,
    queued: u64,
    dropped: u64,
}

impl Outbox {
    pub fn new(tx: Sender<OutboundPacket>) -> Self {
        Self {
            tx,
            queued: 0,
            dropped: 0,
        }
    }

    /// Queue a packet. A closed or full channel drops the packet: delivery
    /// failures are the transport's concern, not gameplay's.
    pub fn push(&mut self, packet: OutboundPacket) {
        let reliable = packet.delivery.is_reliable();
        match self.tx.try_send(packet) {
            Ok(()) => self.queued += 1,
            Err(TrySendError::Full(p)) | Err(TrySendError::Disconnected(p)) => {
                self.dropped += 1;
                if reliable {
                    tracing::warn!("Outbox closed or full, dropping reliable packet on channel {}", p.channel);
                } else {
                    tracing::debug!("Outbox closed or full, dropping packet on channel {}", p.channel);
                }
            }
        }
    }

    pub fn queued(&self) -> u64 {
        self.queued
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Inbound event queue, drained once per tick.
#[derive(Resource, Debug)]
pub struct Inbox {
    rx: Receiver<NetEvent>,
}

impl Inbox {
    pub fn new(rx: Receiver<NetEvent>) -> Self {
        Self { rx }
    }
}

/// This tick's inbound traffic, grouped by channel.
#[derive(Resource, Debug, Default)]
pub struct InboundBuffer {
    by_channel: HashMap<u8, Vec<InboundPacket>>,
    pub connected: Vec<PeerId>,
    pub disconnected: Vec<PeerId>,
}

impl InboundBuffer {
    pub fn clear(&mut self) {
        for packets in self.by_channel.values_mut() {
            packets.clear();
        }
        self.connected.clear();
        self.disconnected.clear();
    }

    pub fn push(&mut self, packet: InboundPacket) {
        self.by_channel.entry(packet.channel).or_default().push(packet);
    }

    pub fn packets(&self, channel: u8) -> &[InboundPacket] {
        self.by_channel.get(&channel).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn packet_count(&self) -> usize {
        self.by_channel.values().map(Vec::len).sum()
    }
}

/// Peers currently connected.
#[derive(Resource, Debug, Default)]
pub struct ConnectedPeers(pub HashSet<PeerId>);

/// Drain the inbound queue into this tick's [`InboundBuffer`].
pub fn drain_ingress_system(
    inbox: Res<Inbox>,
    mut buffer: ResMut<InboundBuffer>,
    mut peers: ResMut<ConnectedPeers>,
) {
    buffer.clear();
    for event in inbox.rx.try_iter() {
        match event {
            NetEvent::Connected(peer) => {
                tracing::info!("Peer {:?} connected", peer);
                peers.0.insert(peer);
                buffer.connected.push(peer);
            }
            NetEvent::Disconnected(peer) => {
                tracing::info!("Peer {:?} disconnected", peer);
                peers.0.remove(&peer);
                buffer.disconnected.push(peer);
            }
            NetEvent::Packet(packet) => buffer.push(packet),
        }
    }
}

/// Mark every agent owned by a peer that left this tick for destruction.
pub fn peer_disconnect_system(
    buffer: Res<InboundBuffer>,
    mut commands: Commands,
    owned: Query<(Entity, &Owner), Without<MarkedForDestruction>>,
) {
    if buffer.disconnected.is_empty() {
        return;
    }
    for (entity, owner) in owned.iter() {
        if buffer.disconnected.contains(&owner.0) {
            commands.entity(entity).insert(MarkedForDestruction);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_groups_by_channel() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut world = World::new();
        world.insert_resource(Inbox::new(rx));
        world.init_resource::<InboundBuffer>();
        world.init_resource::<ConnectedPeers>();

        tx.send(NetEvent::Connected(PeerId(1))).unwrap();
        for channel in [1u8, 2, 1] {
            tx.send(NetEvent::Packet(InboundPacket {
                from: PeerId(1),
                channel,
                payload: vec![channel],
            }))
            .unwrap();
        }

        let mut schedule = Schedule::default();
        schedule.add_systems(drain_ingress_system);
        schedule.run(&mut world);

        let buffer = world.resource::<InboundBuffer>();
        assert_eq!(buffer.packets(1).len(), 2);
        assert_eq!(buffer.packets(2).len(), 1);
        assert!(buffer.packets(9).is_empty());
        assert_eq!(buffer.connected, vec![PeerId(1)]);
        assert!(world.resource::<ConnectedPeers>().0.contains(&PeerId(1)));

        // Next tick starts empty.
        schedule.run(&mut world);
        assert_eq!(world.resource::<InboundBuffer>().packet_count(), 0);
    }

    #[test]
    fn test_disconnect_marks_owned_agents() {
        let mut world = World::new();
        world.init_resource::<InboundBuffer>();
        let mine = world.spawn(Owner(PeerId(3))).id();
        let other = world.spawn(Owner(PeerId(4))).id();
        world.resource_mut::<InboundBuffer>().disconnected.push(PeerId(3));

        let mut schedule = Schedule::default();
        schedule.add_systems(peer_disconnect_system);
        schedule.run(&mut world);

        assert!(world.get::<MarkedForDestruction>(mine).is_some());
        assert!(world.get::<MarkedForDestruction>(other).is_none());
    }

    #[test]
    fn test_reliable_modes() {
        assert!(!Delivery::Unreliable.is_reliable());
        assert!(!Delivery::Sequenced.is_reliable());
        assert!(Delivery::ReliableOrdered.is_reliable());
        assert!(Delivery::ReliableUnordered.is_reliable());
        assert!(Delivery::ReliableSequenced.is_reliable());
    }

    #[test]
    fn test_outbox_drops_when_receiver_gone() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut outbox = Outbox::new(tx);
        let packet = OutboundPacket {
            target: PeerTarget::Broadcast,
            channel: 0,
            delivery: Delivery::Unreliable,
            payload: vec![],
        };
        outbox.push(packet.clone());
        assert_eq!(outbox.queued(), 1);
        drop(rx);
        outbox.push(packet);
        assert_eq!(outbox.dropped(), 1);
    }
}
