//! Boundary to the configuration-object store.
//!
//! The protocol core owns the real object tree; this subsystem only needs
//! generic typed reads for credential lookup and whole-object export/import
//! for the bootstrap backup. [`MemoryStore`] is a complete in-memory
//! implementation used by the tests and by hosts that keep their object
//! tree in process memory.

use std::collections::BTreeMap;

pub type ObjectId = u16;
pub type InstanceId = u16;
pub type ResourceId = u16;

/// Object type holding per-server addresses and credentials.
pub const SECURITY_OBJECT_ID: ObjectId = 0;

/// Object type holding per-server registration parameters.
pub const SERVER_OBJECT_ID: ObjectId = 1;

/// A typed resource value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(String),
    Integer(i64),
    Boolean(bool),
    Opaque(Vec<u8>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_opaque(&self) -> Option<&[u8]> {
        match self {
            Value::Opaque(b) => Some(b),
            _ => None,
        }
    }
}

/// All resources of one object instance.
pub type ResourceMap = BTreeMap<ResourceId, Value>;

/// All instances of one object type. This is the unit the bootstrap
/// backup copies and restores.
pub type ObjectTree = BTreeMap<InstanceId, ResourceMap>;

/// Generic read/write access to the configuration-object store.
pub trait ObjectStore {
    /// Read one resource. `None` if the instance or resource is absent.
    fn read(&self, object: ObjectId, instance: InstanceId, resource: ResourceId) -> Option<&Value>;

    /// Write one resource, creating the instance as needed.
    fn write(&mut self, object: ObjectId, instance: InstanceId, resource: ResourceId, value: Value);

    /// Instance ids of one object type, in ascending order.
    fn enumerate_instances(&self, object: ObjectId) -> Vec<InstanceId>;

    /// Deep copy of every instance of one object type.
    ///
    /// The returned tree is value-independent of the live store: later
    /// mutation of either side must not affect the other.
    fn export(&self, object: ObjectId) -> ObjectTree;

    /// Drop all live instances of `object` and repopulate them from `tree`.
    fn import(&mut self, object: ObjectId, tree: ObjectTree);
}

/// In-memory object store.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    objects: BTreeMap<ObjectId, ObjectTree>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStore for MemoryStore {
    fn read(&self, object: ObjectId, instance: InstanceId, resource: ResourceId) -> Option<&Value> {
        self.objects.get(&object)?.get(&instance)?.get(&resource)
    }

    fn write(
        &mut self,
        object: ObjectId,
        instance: InstanceId,
        resource: ResourceId,
        value: Value,
    ) {
        self.objects
            .entry(object)
            .or_default()
            .entry(instance)
            .or_default()
            .insert(resource, value);
    }

    fn enumerate_instances(&self, object: ObjectId) -> Vec<InstanceId> {
        self.objects
            .get(&object)
            .map(|tree| tree.keys().copied().collect())
            .unwrap_or_default()
    }

    fn export(&self, object: ObjectId) -> ObjectTree {
        self.objects.get(&object).cloned().unwrap_or_default()
    }

    fn import(&mut self, object: ObjectId, tree: ObjectTree) {
        self.objects.insert(object, tree);
    }
}
