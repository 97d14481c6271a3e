//! Domain factories for creating domain entities and value objects.

use std::collections::BTreeSet;

use uuid::Uuid;

use super::{RoomId, UserId, error::ValueObjectError};

/// Namespace for name-based room ids. Changing it changes every derived id.
const ROOM_NAMESPACE: Uuid = Uuid::from_u128(0x6c1f_3a0e_52d4_4d8b_9f7e_0b7a_c2a1_e5d3);

/// Factory for deriving RoomId instances.
///
/// Two clients compute the same id for the same participant set without any
/// handshake, so a chat screen can be opened before anything was sent.
pub struct RoomIdFactory;

impl RoomIdFactory {
    /// Derive a RoomId from a participant set.
    ///
    /// The ids are sorted and deduplicated, joined with `\n` (never part of a
    /// valid [`UserId`]) and hashed into a UUID v5.
    ///
    /// # Errors
    ///
    /// Returns `ValueObjectError::NoParticipants` for an empty set
    pub fn from_participants<'a, I>(participants: I) -> Result<RoomId, ValueObjectError>
    where
        I: IntoIterator<Item = &'a UserId>,
    {
        let sorted: BTreeSet<&str> = participants.into_iter().map(UserId::as_str).collect();
        if sorted.is_empty() {
            return Err(ValueObjectError::NoParticipants);
        }
        let name = sorted.into_iter().collect::<Vec<_>>().join("\n");
        Ok(RoomId::from_uuid(Uuid::new_v5(&ROOM_NAMESPACE, name.as_bytes())))
    }
}

/// Pure room-id derivation for the UI layer.
pub fn room_id_for<'a, I>(participants: I) -> Result<RoomId, ValueObjectError>
where
    I: IntoIterator<Item = &'a UserId>,
{
    RoomIdFactory::from_participants(participants)
}
