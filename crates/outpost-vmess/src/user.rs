//! User ids: the primary UUID plus its derived alter ids.

use crate::kdf;
use crate::VmessError;
use md5::{Digest, Md5};
use rand::Rng;
use uuid::Uuid;

const CMD_KEY_SALT: &[u8] = b"c48619fe-8f02-49e0-b9e9-edf763e17e21";
const ALTER_ID_SALT: &[u8] = b"16167dc8-16b6-4e6d-b8bb-65dd68113a81";
const ALTER_ID_RESALT: &[u8] = b"533eff8a-4113-4b10-b5ce-0f5d76b98cd2";

/// One authenticating id and the command key derived from it.
#[derive(Clone, PartialEq, Eq)]
pub struct Id {
    uuid: [u8; 16],
    cmd_key: [u8; 16],
}

impl Id {
    pub fn new(uuid: [u8; 16]) -> Self {
        let mut buf = Vec::with_capacity(16 + CMD_KEY_SALT.len());
        buf.extend_from_slice(&uuid);
        buf.extend_from_slice(CMD_KEY_SALT);
        Self {
            uuid,
            cmd_key: kdf::md5_sum(&buf),
        }
    }

    pub fn uuid(&self) -> &[u8; 16] {
        &self.uuid
    }

    pub fn cmd_key(&self) -> &[u8; 16] {
        &self.cmd_key
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Id").finish_non_exhaustive()
    }
}

fn next_id(prev: &[u8; 16]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(prev);
    hasher.update(ALTER_ID_SALT);
    loop {
        let candidate: [u8; 16] = hasher.clone().finalize().into();
        if &candidate != prev {
            return candidate;
        }
        hasher.update(ALTER_ID_RESALT);
    }
}

/// The ids a client may authenticate with: primary first, then `alter_id`
/// derived ids.
#[derive(Debug, Clone)]
pub struct User {
    ids: Vec<Id>,
}

impl User {
    pub fn parse(uuid: &str, alter_id: u16) -> Result<Self, VmessError> {
        let uuid = Uuid::parse_str(uuid).map_err(|e| VmessError::InvalidUuid(e.to_string()))?;
        Ok(Self::new(*uuid.as_bytes(), alter_id))
    }

    pub fn new(uuid: [u8; 16], alter_id: u16) -> Self {
        let mut ids = Vec::with_capacity(1 + usize::from(alter_id));
        ids.push(Id::new(uuid));
        let mut prev = uuid;
        for _ in 0..alter_id {
            let next = next_id(&prev);
            ids.push(Id::new(next));
            prev = next;
        }
        Self { ids }
    }

    pub fn ids(&self) -> &[Id] {
        &self.ids
    }

    pub fn primary(&self) -> &Id {
        &self.ids[0]
    }

    /// Uniformly random id for one connection.
    pub fn pick(&self) -> &Id {
        let idx = rand::thread_rng().gen_range(0..self.ids.len());
        &self.ids[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "b831381d-6324-4d53-ad4f-8cda48b30811";

    #[test]
    fn alter_ids_are_chained_and_distinct() {
        let user = User::parse(UUID, 4).unwrap();
        assert_eq!(user.ids().len(), 5);
        assert_eq!(user.ids()[1].uuid(), &next_id(user.primary().uuid()));
        assert_eq!(user.ids()[2].uuid(), &next_id(user.ids()[1].uuid()));
        for (i, a) in user.ids().iter().enumerate() {
            for b in &user.ids()[i + 1..] {
                assert_ne!(a.uuid(), b.uuid());
            }
        }
    }

    #[test]
    fn cmd_key_is_md5_of_uuid_and_salt() {
        let uuid = *Uuid::parse_str(UUID).unwrap().as_bytes();
        let mut buf = uuid.to_vec();
        buf.extend_from_slice(b"c48619fe-8f02-49e0-b9e9-edf763e17e21");
        assert_eq!(Id::new(uuid).cmd_key(), &kdf::md5_sum(&buf));
    }

    #[test]
    fn zero_alter_id_keeps_only_primary() {
        let user = User::parse(UUID, 0).unwrap();
        assert_eq!(user.ids().len(), 1);
        assert_eq!(user.pick(), user.primary());
    }

    #[test]
    fn rejects_malformed_uuid() {
        let err = User::parse("not-a-uuid", 0).unwrap_err();
        assert!(matches!(err, VmessError::InvalidUuid(_)));
    }
}
