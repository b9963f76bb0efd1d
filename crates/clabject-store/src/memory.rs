//! In-memory registry.
//!
//! Stores records, not live objects: every lookup rehydrates a fresh
//! fragment or instance level, so callers never share mutable state
//! through the registry. Rehydrated objects carry the registry itself as
//! their `Arc<dyn Registry>` capability.

use crate::jsonl::{Record, read_records_from_path, write_records_to_path};
use crate::record::{FragmentRecord, InstanceRecord};
use async_trait::async_trait;
use clabject_kernel::{
    ClabjectError, DeepInstance, DefinitionVerifier, FragmentKey, Identity, KeyLease, KeyLocks,
    Registry, Result, TypeHandle, builtin_base_models, canonical_instance_id,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

pub struct MemoryRegistry {
    this: Weak<MemoryRegistry>,
    verifier: Arc<dyn DefinitionVerifier>,
    types: RwLock<BTreeMap<FragmentKey, FragmentRecord>>,
    instances: RwLock<BTreeMap<String, InstanceRecord>>,
    locks: KeyLocks,
}

impl std::fmt::Debug for MemoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRegistry")
            .field("types", &self.type_count())
            .field("instances", &self.instance_count())
            .finish_non_exhaustive()
    }
}

impl MemoryRegistry {
    /// An empty registry. `verifier` gates the definitions of rehydrated
    /// fragments.
    pub fn new(verifier: Arc<dyn DefinitionVerifier>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            verifier,
            types: RwLock::new(BTreeMap::new()),
            instances: RwLock::new(BTreeMap::new()),
            locks: KeyLocks::new(),
        })
    }

    /// A registry seeded with the built-in primitive base models.
    pub fn with_builtins(verifier: Arc<dyn DefinitionVerifier>) -> Result<Arc<Self>> {
        let registry = Self::new(Arc::clone(&verifier));
        {
            let mut types = registry.write_types()?;
            for fragment in builtin_base_models(verifier) {
                let record = FragmentRecord::from_fragment(&fragment);
                types.insert(record.key(), record);
            }
        }
        Ok(registry)
    }

    /// Load a registry from a JSONL snapshot.
    pub fn load_jsonl(
        path: impl AsRef<Path>,
        verifier: Arc<dyn DefinitionVerifier>,
    ) -> Result<Arc<Self>> {
        let path = path.as_ref();
        let registry = Self::new(verifier);
        let records = read_records_from_path(path)?;
        registry.restore(records)?;
        tracing::info!(
            target: "clabject.store",
            path = %path.display(),
            types = registry.type_count(),
            instances = registry.instance_count(),
            "registry loaded"
        );
        Ok(registry)
    }

    /// Write every record to a JSONL snapshot: types first, then instances,
    /// each in key order.
    pub fn save_jsonl(&self, path: impl AsRef<Path>) -> Result<()> {
        write_records_to_path(path, &self.snapshot()?)?;
        Ok(())
    }

    pub fn snapshot(&self) -> Result<Vec<Record>> {
        let mut records: Vec<Record> = self
            .read_types()?
            .values()
            .cloned()
            .map(Record::Type)
            .collect();
        records.extend(
            self.read_instances()?
                .values()
                .cloned()
                .map(Record::Instance),
        );
        Ok(records)
    }

    /// Insert records. Later records replace earlier ones with the same key.
    pub fn restore(&self, records: Vec<Record>) -> Result<()> {
        let mut types = self.write_types()?;
        let mut instances = self.write_instances()?;
        for record in records {
            match record {
                Record::Type(record) => {
                    record.rules()?;
                    types.insert(record.key(), record);
                }
                Record::Instance(record) => {
                    instances.insert(record.instance_id.clone(), record);
                }
            }
        }
        Ok(())
    }

    pub fn type_count(&self) -> usize {
        self.types.read().map(|types| types.len()).unwrap_or_default()
    }

    pub fn instance_count(&self) -> usize {
        self.instances
            .read()
            .map(|instances| instances.len())
            .unwrap_or_default()
    }

    fn handle(&self) -> Result<Arc<dyn Registry>> {
        let this: Arc<dyn Registry> = self
            .this
            .upgrade()
            .ok_or_else(|| ClabjectError::Storage("registry dropped".into()))?;
        Ok(this)
    }

    fn read_types(&self) -> Result<RwLockReadGuard<'_, BTreeMap<FragmentKey, FragmentRecord>>> {
        self.types.read().map_err(poisoned)
    }

    fn write_types(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<FragmentKey, FragmentRecord>>> {
        self.types.write().map_err(poisoned)
    }

    fn read_instances(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, InstanceRecord>>> {
        self.instances.read().map_err(poisoned)
    }

    fn write_instances(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, InstanceRecord>>> {
        self.instances.write().map_err(poisoned)
    }

    fn hydrate_type(&self, record: &FragmentRecord) -> Result<TypeHandle> {
        let fragment = record.to_fragment(Arc::clone(&self.verifier), self.handle()?)?;
        Ok(TypeHandle::new(fragment))
    }

    fn hydrate_instance(&self, record: &InstanceRecord) -> Result<DeepInstance> {
        let type_record = self.read_types()?.get(&record.type_key()).cloned().ok_or_else(|| {
            ClabjectError::TypeNotFound {
                name: record.type_name.clone(),
                identity: record.identity.to_string(),
            }
        })?;
        let handle = self.hydrate_type(&type_record)?;
        Ok(record.to_instance(handle, self.handle()?))
    }

    fn types_where(&self, keep: impl Fn(&FragmentKey) -> bool) -> Result<Vec<TypeHandle>> {
        let matching: Vec<FragmentRecord> = self
            .read_types()?
            .iter()
            .filter(|(key, _)| keep(key))
            .map(|(_, record)| record.clone())
            .collect();
        matching.iter().map(|record| self.hydrate_type(record)).collect()
    }
}

fn poisoned<E: std::fmt::Display>(error: E) -> ClabjectError {
    ClabjectError::Storage(format!("registry lock poisoned: {error}"))
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn get_type(&self, name: &str, identity: &Identity) -> Result<Option<TypeHandle>> {
        let key = FragmentKey::new(name, identity.clone());
        let record = self.read_types()?.get(&key).cloned();
        record.map(|record| self.hydrate_type(&record)).transpose()
    }

    async fn get_singleton_types(&self, name: &str) -> Result<Vec<TypeHandle>> {
        self.types_where(|key| key.name == name && key.identity.is_singleton())
    }

    async fn set_type(&self, handle: &TypeHandle) -> Result<()> {
        let record = FragmentRecord::from_fragment(handle.fragment());
        tracing::trace!(target: "clabject.store", key = %record.key(), "set type");
        self.write_types()?.insert(record.key(), record);
        Ok(())
    }

    async fn get_references(&self) -> Result<Vec<TypeHandle>> {
        self.types_where(|key| key.identity.is_reference())
    }

    async fn delete_type_no_cascade(&self, name: &str, identity: &Identity) -> Result<()> {
        let key = FragmentKey::new(name, identity.clone());
        self.write_types()?.remove(&key);
        Ok(())
    }

    async fn get(&self, instance_id: &str) -> Result<Option<DeepInstance>> {
        let id = canonical_instance_id(instance_id);
        let record = self.read_instances()?.get(&id).cloned();
        record.map(|record| self.hydrate_instance(&record)).transpose()
    }

    async fn get_all(&self, type_name: &str) -> Result<Vec<DeepInstance>> {
        let matching: Vec<InstanceRecord> = self
            .read_instances()?
            .values()
            .filter(|record| record.type_name == type_name)
            .cloned()
            .collect();
        matching
            .iter()
            .map(|record| self.hydrate_instance(record))
            .collect()
    }

    async fn set_instance(&self, instance: &DeepInstance) -> Result<()> {
        let record = InstanceRecord::from_instance(instance);
        self.write_instances()?
            .insert(record.instance_id.clone(), record);
        Ok(())
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<()> {
        let id = canonical_instance_id(instance_id);
        self.write_instances()?.remove(&id);
        Ok(())
    }

    async fn set_instances(&self, instances: &[&DeepInstance]) -> Result<()> {
        let records: Vec<InstanceRecord> = instances
            .iter()
            .map(|instance| InstanceRecord::from_instance(instance))
            .collect();
        let mut stored = self.write_instances()?;
        for record in records {
            stored.insert(record.instance_id.clone(), record);
        }
        tracing::debug!(
            target: "clabject.store",
            levels = instances.len(),
            "instance batch persisted"
        );
        Ok(())
    }

    async fn lease(&self, key: &str) -> Result<KeyLease> {
        self.locks.acquire(key).await
    }
}
