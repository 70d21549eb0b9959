//! Generic per-component-type state synchronization.
//!
//! Each synchronized type `T` is registered once with an [`Authority`] and a
//! [`Trigger`]. The registry hands out one channel id per type, and the
//! generic systems in [`systems`] are instantiated per type at registration.
//!
//! Change detection is explicit paired state: the live `T` next to a
//! [`Shadow<T>`] holding the last value actually sent. A shadow exists iff
//! the value has been sent at least once.

pub mod packet;
pub mod systems;

pub use packet::{CodecError, ComponentSyncPacket};
pub use systems::{apply_despawn_system, apply_inbound_system, client_intent_system, enqueue_despawn, server_sync_system};

use bevy_ecs::prelude::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;

/// Which side owns the value of a synchronized component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Authority {
    /// Server state replicated to every peer.
    Server,
    /// Client-authored intent, sent to the server once and removed locally.
    Client,
}

/// When server-authority values are re-sent after the first full send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Whenever the value differs from its shadow.
    OnChange,
    /// Every `sync_rate_ticks`, unconditionally.
    OnTick,
    /// Only the first full send.
    FirstSeen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub authority: Authority,
    pub trigger: Trigger,
}

impl SyncSettings {
    pub fn server(trigger: Trigger) -> Self {
        Self {
            authority: Authority::Server,
            trigger,
        }
    }

    pub fn client() -> Self {
        Self {
            authority: Authority::Client,
            trigger: Trigger::OnChange,
        }
    }
}

/// Which side of the connection this simulation is.
#[derive(Resource, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetRole {
    #[default]
    Server,
    Client,
}

/// Plain value types that can cross the wire.
pub trait SyncComponent: Component + Clone + PartialEq + Serialize + DeserializeOwned {}

impl<T> SyncComponent for T where T: Component + Clone + PartialEq + Serialize + DeserializeOwned {}

/// Last value of `T` sent to peers.
#[derive(Component, Debug, Clone, PartialEq)]
pub struct Shadow<T: SyncComponent>(pub T);

/// Tick stamp of the newest packet applied to this entity's `T`.
#[derive(Component, Debug)]
pub struct LastApplied<T: SyncComponent> {
    pub tick: u64,
    marker: PhantomData<fn() -> T>,
}

impl<T: SyncComponent> LastApplied<T> {
    pub fn new(tick: u64) -> Self {
        Self {
            tick,
            marker: PhantomData,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncEntry {
    pub name: &'static str,
    pub channel: u8,
    pub settings: SyncSettings,
    pub enabled: bool,
}

/// Carries entity despawns from the server, as a `ComponentSyncPacket<()>`.
pub const DESPAWN_CHANNEL: u8 = 0;

/// Registered sync types, keyed by type id.
#[derive(Resource, Debug)]
pub struct SyncRegistry {
    entries: HashMap<TypeId, SyncEntry>,
    next_channel: u8,
}

impl Default for SyncRegistry {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next_channel: Self::FIRST_CHANNEL,
        }
    }
}

impl SyncRegistry {
    /// First channel handed to a registered type; [`DESPAWN_CHANNEL`] sits
    /// below it.
    pub const FIRST_CHANNEL: u8 = 1;

    /// Register `T` and assign it a channel.
    ///
    /// Channels are handed out in registration order, so both ends of a
    /// connection must register the same types in the same order. Packets
    /// carry no type tag: a mismatch shows up as decode errors, or as
    /// garbage when two types happen to share a wire layout.
    ///
    /// # Panics
    /// If `T` is already registered, or every channel id is taken.
    #[track_caller]
    pub fn register<T: SyncComponent>(&mut self, settings: SyncSettings) -> u8 {
        let name = std::any::type_name::<T>();
        assert!(
            !self.entries.contains_key(&TypeId::of::<T>()),
            "sync type {} registered twice",
            name
        );
        let channel = self.next_channel;
        self.next_channel = channel
            .checked_add(1)
            .unwrap_or_else(|| panic!("out of sync channels registering {}", name));
        self.entries.insert(
            TypeId::of::<T>(),
            SyncEntry {
                name,
                channel,
                settings,
                enabled: true,
            },
        );
        tracing::info!("Registered sync type {} on channel {} ({:?})", name, channel, settings);
        channel
    }

    pub fn entry<T: SyncComponent>(&self) -> Option<&SyncEntry> {
        self.entries.get(&TypeId::of::<T>())
    }

    pub fn is_registered<T: SyncComponent>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn is_enabled<T: SyncComponent>(&self) -> bool {
        self.entry::<T>().is_some_and(|e| e.enabled)
    }

    /// Returns false if `T` is not registered.
    pub fn set_enabled<T: SyncComponent>(&mut self, enabled: bool) -> bool {
        match self.entries.get_mut(&TypeId::of::<T>()) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Stable digest of the channel layout: each type's channel, name and
    /// authority, in channel order. Two ends can exchange it on connect to
    /// catch a registration-order mismatch before any packet is misread.
    pub fn fingerprint(&self) -> u64 {
        let mut entries: Vec<&SyncEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.channel);
        // FNV-1a: stable across builds, unlike `DefaultHasher`.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        let mut feed = |bytes: &[u8]| {
            for &b in bytes {
                hash ^= u64::from(b);
                hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
            }
        };
        for entry in entries {
            feed(&[entry.channel, entry.settings.authority as u8]);
            feed(entry.name.as_bytes());
        }
        hash
    }

    /// True if any enabled type is replicated from the server.
    pub fn replicates(&self) -> bool {
        self.entries
            .values()
            .any(|e| e.enabled && e.settings.authority == Authority::Server)
    }

    pub fn channel_of<T: SyncComponent>(&self) -> Option<u8> {
        self.entry::<T>().map(|e| e.channel)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
