//! Generic sync systems, instantiated once per registered type.

use super::packet::{self, ComponentSyncPacket};
use super::{Authority, LastApplied, Shadow, SyncComponent, SyncRegistry, Trigger, DESPAWN_CHANNEL};
use crate::components::{MarkedForDestruction, Owner};
use crate::config::{SimConfig, SimTick};
use crate::index::{EntityIndex, IndexKey, NetworkId};
use crate::net::{Delivery, InboundBuffer, OutboundPacket, Outbox, PeerId, PeerTarget};
use bevy_ecs::entity::Entities;
use bevy_ecs::prelude::*;
use serde::Serialize;

fn enqueue<T: Serialize>(
    outbox: &mut Outbox,
    target: PeerTarget,
    channel: u8,
    delivery: Delivery,
    key: NetworkId,
    tick: u64,
    value: &T,
) {
    let packet = ComponentSyncPacket {
        entity_key: key.0,
        tick,
        data: value,
    };
    match packet::encode(&packet) {
        Ok(payload) => outbox.push(OutboundPacket {
            target,
            channel,
            delivery,
            payload,
        }),
        Err(e) => tracing::warn!(
            "Failed to encode {} for {}: {}",
            std::any::type_name::<T>(),
            key,
            e
        ),
    }
}

/// Tell every peer that the entity with `key` is gone.
pub fn enqueue_despawn(outbox: &mut Outbox, key: NetworkId, tick: u64) {
    enqueue(outbox, PeerTarget::Broadcast, DESPAWN_CHANNEL, Delivery::ReliableOrdered, key, tick, &());
}

/// Mark replicas the server destroyed, so cleanup unindexes and despawns
/// them this tick.
pub fn apply_despawn_system(
    inbound: Res<InboundBuffer>,
    entities: &Entities,
    mut index: ResMut<EntityIndex<NetworkId>>,
    mut commands: Commands,
) {
    for raw in inbound.packets(DESPAWN_CHANNEL) {
        let packet = match packet::decode::<()>(&raw.payload) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("Dropping despawn packet from {:?}: {}", raw.from, e);
                continue;
            }
        };
        let key = NetworkId(packet.entity_key);
        if !key.is_valid() {
            continue;
        }
        match index.resolve(key, entities) {
            Some(entity) => {
                commands.entity(entity).insert(MarkedForDestruction);
                tracing::debug!("Replica {} despawned by server at tick {}", key, packet.tick);
            }
            None => tracing::debug!("Despawn for unknown replica {}", key),
        }
    }
}

/// Server side of a server-authority type.
///
/// First sight of `(entity, T)` sends the full value reliably to everyone and
/// attaches the shadow. A `T` removed and later re-added counts as first
/// sight again. Later sends follow the type's [`Trigger`] and go out
/// unreliably. Peers that connected this tick get a reliable full send of
/// every tracked value. Entities without a network key are not addressable
/// and are skipped until they get one.
#[allow(clippy::too_many_arguments, clippy::type_complexity)]
pub fn server_sync_system<T: SyncComponent>(
    tick: Res<SimTick>,
    config: Res<SimConfig>,
    registry: Res<SyncRegistry>,
    index: Res<EntityIndex<NetworkId>>,
    inbound: Res<InboundBuffer>,
    mut outbox: ResMut<Outbox>,
    mut commands: Commands,
    fresh: Query<(Entity, &T), Without<Shadow<T>>>,
    orphans: Query<Entity, (With<Shadow<T>>, Without<T>)>,
    mut tracked: Query<(Entity, Ref<T>, &mut Shadow<T>)>,
) {
    let Some(entry) = registry.entry::<T>() else {
        return;
    };
    if !entry.enabled || entry.settings.authority != Authority::Server {
        return;
    }
    let channel = entry.channel;

    // Shadow exists iff the current value has been sent.
    for entity in orphans.iter() {
        commands.entity(entity).remove::<Shadow<T>>();
    }

    for (entity, value) in fresh.iter() {
        let Some(key) = index.try_get_key(entity) else {
            continue;
        };
        enqueue(&mut outbox, PeerTarget::Broadcast, channel, Delivery::ReliableOrdered, key, tick.0, value);
        commands.entity(entity).insert(Shadow(value.clone()));
    }

    for (entity, value, mut shadow) in tracked.iter_mut() {
        if !value.is_added() {
            continue;
        }
        let Some(key) = index.try_get_key(entity) else {
            continue;
        };
        enqueue(&mut outbox, PeerTarget::Broadcast, channel, Delivery::ReliableOrdered, key, tick.0, &*value);
        shadow.0 = (*value).clone();
    }

    for &peer in &inbound.connected {
        for (entity, value, _) in tracked.iter() {
            if let Some(key) = index.try_get_key(entity) {
                enqueue(&mut outbox, PeerTarget::Peer(peer), channel, Delivery::ReliableOrdered, key, tick.0, &*value);
            }
        }
    }

    match entry.settings.trigger {
        Trigger::OnChange => {
            for (entity, value, mut shadow) in tracked.iter_mut() {
                if shadow.0 == *value {
                    continue;
                }
                let Some(key) = index.try_get_key(entity) else {
                    continue;
                };
                enqueue(&mut outbox, PeerTarget::Broadcast, channel, Delivery::Unreliable, key, tick.0, &*value);
                shadow.0 = (*value).clone();
            }
        }
        Trigger::OnTick => {
            if !tick.is_multiple_of(config.sync_rate_ticks) {
                return;
            }
            for (entity, value, mut shadow) in tracked.iter_mut() {
                let Some(key) = index.try_get_key(entity) else {
                    continue;
                };
                enqueue(&mut outbox, PeerTarget::Broadcast, channel, Delivery::Unreliable, key, tick.0, &*value);
                if shadow.0 != *value {
                    shadow.0 = (*value).clone();
                }
            }
        }
        Trigger::FirstSeen => {}
    }
}

/// Client side of a client-authority type: every `T` present is sent to the
/// server reliably and removed.
pub fn client_intent_system<T: SyncComponent>(
    tick: Res<SimTick>,
    registry: Res<SyncRegistry>,
    index: Res<EntityIndex<NetworkId>>,
    mut outbox: ResMut<Outbox>,
    mut commands: Commands,
    intents: Query<(Entity, &T)>,
) {
    let Some(entry) = registry.entry::<T>() else {
        return;
    };
    if !entry.enabled || entry.settings.authority != Authority::Client {
        return;
    }
    for (entity, value) in intents.iter() {
        match index.try_get_key(entity) {
            Some(key) => enqueue(
                &mut outbox,
                PeerTarget::Server,
                entry.channel,
                Delivery::ReliableOrdered,
                key,
                tick.0,
                value,
            ),
            None => tracing::debug!("Dropping {} on unindexed entity {:?}", entry.name, entity),
        }
        commands.entity(entity).remove::<T>();
    }
}

/// Apply this tick's inbound packets for `T`.
///
/// Server-authority values (received by a client) update the replica with
/// that key, spawning and indexing it if unknown. Client-authority intents
/// (received by the server) are inserted on the indexed entity if the sender
/// owns it; unknown keys are dropped. Per key, only the newest packet of the
/// tick is applied, and packets older than [`LastApplied<T>`] are dropped.
pub fn apply_inbound_system<T: SyncComponent>(
    registry: Res<SyncRegistry>,
    inbound: Res<InboundBuffer>,
    entities: &Entities,
    mut index: ResMut<EntityIndex<NetworkId>>,
    mut commands: Commands,
    mut targets: Query<(Option<&mut T>, Option<&mut LastApplied<T>>, Option<&Owner>)>,
) {
    let Some(entry) = registry.entry::<T>() else {
        return;
    };
    if !entry.enabled {
        return;
    }
    let authority = entry.settings.authority;

    let mut latest: Vec<(PeerId, ComponentSyncPacket<T>)> = Vec::new();
    for raw in inbound.packets(entry.channel) {
        let packet = match packet::decode::<T>(&raw.payload) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("Dropping {} packet from {:?}: {}", entry.name, raw.from, e);
                continue;
            }
        };
        match latest.iter_mut().find(|(_, p)| p.entity_key == packet.entity_key) {
            Some(slot) => {
                if packet.tick >= slot.1.tick {
                    *slot = (raw.from, packet);
                }
            }
            None => latest.push((raw.from, packet)),
        }
    }

    for (from, packet) in latest {
        let key = NetworkId(packet.entity_key);
        if !key.is_valid() {
            tracing::debug!("Dropping {} packet with reserved key from {:?}", entry.name, from);
            continue;
        }

        let entity = match index.resolve(key, entities) {
            Some(entity) => entity,
            None if authority == Authority::Server => {
                let entity = commands
                    .spawn((packet.data, LastApplied::<T>::new(packet.tick)))
                    .id();
                index.register(key, entity);
                tracing::debug!("Spawned replica {} as {:?}", key, entity);
                continue;
            }
            None => {
                tracing::debug!("Dropping {} for unknown entity {}", entry.name, key);
                continue;
            }
        };

        let Ok((value, last, owner)) = targets.get_mut(entity) else {
            // Spawned earlier this tick and not yet materialized.
            commands
                .entity(entity)
                .insert((packet.data, LastApplied::<T>::new(packet.tick)));
            continue;
        };

        if let Some(last) = &last {
            if packet.tick < last.tick {
                tracing::debug!(
                    "Dropping stale {} for {} (tick {} < {})",
                    entry.name,
                    key,
                    packet.tick,
                    last.tick
                );
                continue;
            }
        }
        if authority == Authority::Client {
            if let Some(owner) = owner {
                if owner.0 != from {
                    tracing::warn!("Peer {:?} sent {} for {} it does not own", from, entry.name, key);
                    continue;
                }
            }
        }

        match value {
            Some(mut value) => *value = packet.data,
            None => {
                commands.entity(entity).insert(packet.data);
            }
        }
        match last {
            Some(mut last) => last.tick = packet.tick,
            None => {
                commands.entity(entity).insert(LastApplied::<T>::new(packet.tick));
            }
        }
    }
}
