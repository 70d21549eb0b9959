//! Wire envelope for synchronized component values.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// One component value for one entity, stamped with the sender's tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSyncPacket<T> {
    pub entity_key: u64,
    pub tick: u64,
    pub data: T,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("Decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("Trailing bytes after packet: {0}")]
    TrailingBytes(usize),
}

/// Encode with the legacy (fixed-size integer) config.
pub fn encode<T: Serialize>(packet: &ComponentSyncPacket<T>) -> Result<Vec<u8>, CodecError> {
    Ok(bincode::serde::encode_to_vec(packet, bincode::config::legacy())?)
}

/// Decode one packet. The whole slice must be consumed.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<ComponentSyncPacket<T>, CodecError> {
    let (packet, read) = bincode::serde::decode_from_slice(bytes, bincode::config::legacy())?;
    if read != bytes.len() {
        return Err(CodecError::TrailingBytes(bytes.len() - read));
    }
    Ok(packet)
}
