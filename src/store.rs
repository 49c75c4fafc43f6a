//! # Record storage
//!
//! The resolver never owns its tables directly: it talks to a [`CatalogStore`], the
//! persistence seam of the engine. Any implementation must give read-your-writes
//! consistency inside one ingestion call, which is trivially true for the in-memory
//! [`MemoryStore`] shipped with the crate.
//!
//! Ids are allocated by the store and are strictly increasing per record kind, so a lower
//! id always means an earlier creation. The resolver relies on that for its deterministic
//! tie-breaks.
use crate::{
    constants::FastMap,
    sources::{Detection, DetectionId, DetectionKey, Group, GroupId, Identity, IdentityId},
};

/// Storage of detections, identities and groups.
pub trait CatalogStore {
    fn detection(&self, id: DetectionId) -> Option<&Detection>;
    fn detection_mut(&mut self, id: DetectionId) -> Option<&mut Detection>;
    /// Resolve a natural key to the detection id it was stored under.
    fn detection_by_key(&self, key: &DetectionKey) -> Option<DetectionId>;
    fn insert_detection(&mut self, detection: Detection);
    fn remove_detection(&mut self, id: DetectionId) -> Option<Detection>;

    fn identity(&self, id: IdentityId) -> Option<&Identity>;
    fn identity_mut(&mut self, id: IdentityId) -> Option<&mut Identity>;
    fn insert_identity(&mut self, identity: Identity);
    fn remove_identity(&mut self, id: IdentityId) -> Option<Identity>;

    fn group(&self, id: GroupId) -> Option<&Group>;
    fn group_mut(&mut self, id: GroupId) -> Option<&mut Group>;
    fn insert_group(&mut self, group: Group);
    fn remove_group(&mut self, id: GroupId) -> Option<Group>;

    fn next_detection_id(&mut self) -> DetectionId;
    fn next_identity_id(&mut self) -> IdentityId;
    fn next_group_id(&mut self) -> GroupId;

    /// Every stored detection id, sorted.
    fn detection_ids(&self) -> Vec<DetectionId>;
    /// Every stored identity id, sorted.
    fn identity_ids(&self) -> Vec<IdentityId>;
    /// Every stored group id, sorted.
    fn group_ids(&self) -> Vec<GroupId>;

    fn n_detections(&self) -> usize;
    fn n_identities(&self) -> usize;
    fn n_groups(&self) -> usize;
}

/// Hash-map backed [`CatalogStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    detections: FastMap<DetectionId, Detection>,
    keys: FastMap<DetectionKey, DetectionId>,
    identities: FastMap<IdentityId, Identity>,
    groups: FastMap<GroupId, Group>,
    detection_counter: u64,
    identity_counter: u64,
    group_counter: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_keys<K: Copy + Ord, V>(map: &FastMap<K, V>) -> Vec<K> {
    let mut ids: Vec<K> = map.keys().copied().collect();
    ids.sort_unstable();
    ids
}

impl CatalogStore for MemoryStore {
    fn detection(&self, id: DetectionId) -> Option<&Detection> {
        self.detections.get(&id)
    }

    fn detection_mut(&mut self, id: DetectionId) -> Option<&mut Detection> {
        self.detections.get_mut(&id)
    }

    fn detection_by_key(&self, key: &DetectionKey) -> Option<DetectionId> {
        self.keys.get(key).copied()
    }

    fn insert_detection(&mut self, detection: Detection) {
        if let Some(previous) = self.keys.insert(detection.key, detection.id) {
            if previous != detection.id {
                self.detections.remove(&previous);
            }
        }
        self.detections.insert(detection.id, detection);
    }

    fn remove_detection(&mut self, id: DetectionId) -> Option<Detection> {
        let detection = self.detections.remove(&id)?;
        if self.keys.get(&detection.key) == Some(&id) {
            self.keys.remove(&detection.key);
        }
        Some(detection)
    }

    fn identity(&self, id: IdentityId) -> Option<&Identity> {
        self.identities.get(&id)
    }

    fn identity_mut(&mut self, id: IdentityId) -> Option<&mut Identity> {
        self.identities.get_mut(&id)
    }

    fn insert_identity(&mut self, identity: Identity) {
        self.identities.insert(identity.id, identity);
    }

    fn remove_identity(&mut self, id: IdentityId) -> Option<Identity> {
        self.identities.remove(&id)
    }

    fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(&id)
    }

    fn group_mut(&mut self, id: GroupId) -> Option<&mut Group> {
        self.groups.get_mut(&id)
    }

    fn insert_group(&mut self, group: Group) {
        self.groups.insert(group.id, group);
    }

    fn remove_group(&mut self, id: GroupId) -> Option<Group> {
        self.groups.remove(&id)
    }

    fn next_detection_id(&mut self) -> DetectionId {
        let id = DetectionId(self.detection_counter);
        self.detection_counter += 1;
        id
    }

    fn next_identity_id(&mut self) -> IdentityId {
        let id = IdentityId(self.identity_counter);
        self.identity_counter += 1;
        id
    }

    fn next_group_id(&mut self) -> GroupId {
        let id = GroupId(self.group_counter);
        self.group_counter += 1;
        id
    }

    fn detection_ids(&self) -> Vec<DetectionId> {
        sorted_keys(&self.detections)
    }

    fn identity_ids(&self) -> Vec<IdentityId> {
        sorted_keys(&self.identities)
    }

    fn group_ids(&self) -> Vec<GroupId> {
        sorted_keys(&self.groups)
    }

    fn n_detections(&self) -> usize {
        self.detections.len()
    }

    fn n_identities(&self) -> usize {
        self.identities.len()
    }

    fn n_groups(&self) -> usize {
        self.groups.len()
    }
}
