//! Atomic store: node cache, reference ids and whole-graph persistence.
//!
//! # Responsibility
//! - Hand out reference ids and keep the counter in store metadata.
//! - Maintain cache nodes for created, updated and removed objects.
//! - Load documents in two phases and save them with one atomic rename.
//!
//! # Invariants
//! - Reference ids strictly increase and are never reused.
//! - `load` either replaces the whole cache or changes nothing.
//! - `save` never writes a document containing a dangling foreign key.
//! - The destination file is replaced by rename; a failed save leaves the
//!   previous file and no temp file behind.

use super::codec::{self, CodecError, ReferenceResolver};
use super::document::{ForeignKey, MetadataOnly, StoreDocument, StoredObject};
use super::metadata::{
    StoreMetadata, OBJECT_COUNTER_KEY, STORE_TYPE_KEY, STORE_UUID_KEY,
};
use super::node::{CacheNode, NodeState};
use super::{StoreError, StoreResult};
use crate::config::StoreConfig;
use crate::model::object::{ManagedObject, ObjectId, ReferenceId, ResolvedProperties, Value};
use crate::model::schema::{EntityDescriptor, Schema};
use log::{debug, error, info};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::NamedTempFile;

type NodeCache = BTreeMap<ObjectId, CacheNode>;

/// Result of a successful load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No file at the store path; the store is empty.
    Missing,
    /// Document loaded and fully resolved.
    Loaded { objects: usize },
}

/// Fully resident object store persisted as one document.
#[derive(Debug)]
pub struct AtomicStore {
    schema: Arc<Schema>,
    config: StoreConfig,
    metadata: StoreMetadata,
    cache: NodeCache,
}

/// Resolves foreign keys against the identities present in a node cache.
struct CacheResolver<'a> {
    cache: &'a NodeCache,
}

impl ReferenceResolver for CacheResolver<'_> {
    fn resolve(&self, key: &ForeignKey) -> Option<ObjectId> {
        let id = key.to_object_id();
        self.cache.contains_key(&id).then_some(id)
    }
}

impl AtomicStore {
    /// Creates an empty store with fresh metadata.
    ///
    /// # Errors
    /// - Returns `StoreError::Config` when `config` does not validate.
    pub fn new(schema: Arc<Schema>, config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let metadata = StoreMetadata::fresh(&config.store_type);
        info!(
            "event=store_init module=store status=ok store_type={} path={}",
            config.store_type,
            config.path.display()
        );
        Ok(Self {
            schema,
            config,
            metadata,
            cache: NodeCache::new(),
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn metadata(&self) -> &StoreMetadata {
        &self.metadata
    }

    /// Sets a caller-owned metadata entry.
    ///
    /// Store type, store UUID and the reference counter are managed by the
    /// store and cannot be overwritten.
    pub fn set_metadata(&mut self, key: &str, value: Value) -> StoreResult<()> {
        if matches!(key, STORE_TYPE_KEY | STORE_UUID_KEY | OBJECT_COUNTER_KEY) {
            return Err(StoreError::ReservedMetadataKey(key.to_string()));
        }
        self.metadata.insert(key, value);
        Ok(())
    }

    /// Hands out the next reference id for a new object of `entity`.
    ///
    /// Called once per object, the first time it becomes persistent.
    pub fn assign_reference_id(&mut self, entity: &str) -> StoreResult<ReferenceId> {
        if self.schema.entity(entity).is_none() {
            return Err(StoreError::UnknownEntity(entity.to_string()));
        }
        let reference_id = self
            .metadata
            .take_reference_id()
            .ok_or(StoreError::CounterExhausted)?;
        debug!(
            "event=reference_assign module=store status=ok entity={} reference_id={}",
            entity, reference_id
        );
        Ok(reference_id)
    }

    /// Encodes `object` into a new, unresolved cache node.
    ///
    /// Relationship targets may not have nodes yet; they are checked by the
    /// next `resolve_nodes` or `save`.
    pub fn create_node(&mut self, object: &ManagedObject) -> StoreResult<&CacheNode> {
        let id = object.id().clone();
        if self.cache.contains_key(&id) {
            return Err(StoreError::DuplicateNode(id));
        }
        let entity = entity_of(&self.schema, &id)?;
        let record = codec::encode(object, entity)?;
        let node = self
            .cache
            .entry(id.clone())
            .or_insert_with(|| CacheNode::unresolved(id, record));
        Ok(&*node)
    }

    /// Merges the changed properties of `object` into its existing node.
    ///
    /// Properties that did not change are left untouched.
    pub fn update_node(&mut self, object: &ManagedObject) -> StoreResult<()> {
        let id = object.id();
        let changed = object.changed_properties();
        if !self.cache.contains_key(id) {
            return Err(StoreError::NodeNotFound(id.clone()));
        }
        if changed.is_empty() {
            return Ok(());
        }

        let entity = entity_of(&self.schema, id)?;
        let delta = codec::encode_properties(object, entity, changed.iter().map(String::as_str))?;
        let decoded = match self.cache.get(id).map(CacheNode::state) {
            Some(NodeState::Resolved(_)) => Some(codec::decode_partial(
                &delta,
                entity,
                &CacheResolver { cache: &self.cache },
            )?),
            _ => None,
        };

        let node = self
            .cache
            .get_mut(id)
            .ok_or_else(|| StoreError::NodeNotFound(id.clone()))?;
        match (node.state_mut(), decoded) {
            (NodeState::Resolved(properties), Some(decoded)) => properties.extend(decoded),
            (NodeState::Unresolved(record), _) => record.merge(delta),
            (NodeState::Resolved(_), None) => {}
        }
        Ok(())
    }

    /// Removes the node of a deleted object.
    pub fn remove_node(&mut self, id: &ObjectId) -> Option<CacheNode> {
        self.cache.remove(id)
    }

    /// Resolves every unresolved node against the current cache.
    ///
    /// All-or-nothing: on a dangling reference no node changes state.
    pub fn resolve_nodes(&mut self) -> StoreResult<usize> {
        let resolved = resolve_pending(&self.schema, &self.cache)?;
        let count = resolved.len();
        for (id, properties) in resolved {
            if let Some(node) = self.cache.get_mut(&id) {
                node.set_state(NodeState::Resolved(properties));
            }
        }
        if count > 0 {
            debug!(
                "event=nodes_resolve module=store status=ok resolved={}",
                count
            );
        }
        Ok(count)
    }

    /// Direct cache lookup; `None` is a normal outcome.
    pub fn cache_node(&self, id: &ObjectId) -> Option<&CacheNode> {
        self.cache.get(id)
    }

    /// Cache nodes in `ObjectId` order.
    pub fn cache_nodes(&self) -> impl Iterator<Item = &CacheNode> {
        self.cache.values()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Loads the configured store file.
    pub fn load(&mut self) -> StoreResult<LoadOutcome> {
        let path = self.config.path.clone();
        self.load_from(&path)
    }

    /// Replaces the cache and metadata with the document at `path`.
    ///
    /// # Errors
    /// - `Malformed` when the document cannot be parsed or is inconsistent.
    /// - `Codec` when a foreign key does not resolve.
    /// - `Io` when the file exists but cannot be read.
    ///
    /// On error the store keeps its previous state.
    pub fn load_from(&mut self, path: &Path) -> StoreResult<LoadOutcome> {
        let started_at = Instant::now();
        info!(
            "event=store_load module=store status=start path={}",
            path.display()
        );

        match self.read_document(path) {
            Ok(None) => {
                self.cache.clear();
                info!(
                    "event=store_load module=store status=ok outcome=missing duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(LoadOutcome::Missing)
            }
            Ok(Some((metadata, cache))) => {
                let objects = cache.len();
                self.metadata = metadata;
                self.cache = cache;
                info!(
                    "event=store_load module=store status=ok outcome=loaded objects={} duration_ms={}",
                    objects,
                    started_at.elapsed().as_millis()
                );
                Ok(LoadOutcome::Loaded { objects })
            }
            Err(err) => {
                error!(
                    "event=store_load module=store status=error duration_ms={} integrity={} error={}",
                    started_at.elapsed().as_millis(),
                    err.is_integrity_violation(),
                    err
                );
                Err(err)
            }
        }
    }

    fn read_document(&self, path: &Path) -> StoreResult<Option<(StoreMetadata, NodeCache)>> {
        let Some(file) = open_existing(path)? else {
            return Ok(None);
        };
        let document: StoreDocument = serde_json::from_reader(BufReader::new(file))
            .map_err(|err| StoreError::Malformed(err.to_string()))?;
        self.build_cache(document).map(Some)
    }

    /// Phase 1 materializes unresolved nodes, phase 2 resolves them.
    fn build_cache(&self, document: StoreDocument) -> StoreResult<(StoreMetadata, NodeCache)> {
        let metadata = document.metadata;
        match metadata.store_type() {
            Some(store_type) if store_type == self.config.store_type => {}
            other => {
                return Err(StoreError::Malformed(format!(
                    "expected store type `{}`, found `{}`",
                    self.config.store_type,
                    other.unwrap_or("<none>")
                )))
            }
        }
        let counter = metadata.object_counter().ok_or_else(|| {
            StoreError::Malformed(format!("metadata `{OBJECT_COUNTER_KEY}` is missing or invalid"))
        })?;

        let mut cache = NodeCache::new();
        for object in document.objects {
            let id = object.object_id();
            if self.schema.entity(id.entity()).is_none() {
                return Err(StoreError::Malformed(format!(
                    "object {id} belongs to unknown entity"
                )));
            }
            if id.reference_id() >= counter {
                return Err(StoreError::Malformed(format!(
                    "object {id} is not below the reference counter {counter}"
                )));
            }
            if cache.contains_key(&id) {
                return Err(StoreError::Malformed(format!("object {id} appears twice")));
            }
            cache.insert(id.clone(), CacheNode::unresolved(id, object.payload));
        }

        for (id, properties) in resolve_pending(&self.schema, &cache)? {
            if let Some(node) = cache.get_mut(&id) {
                node.set_state(NodeState::Resolved(properties));
            }
        }
        Ok((metadata, cache))
    }

    /// Saves the whole graph to the configured store file.
    pub fn save(&mut self) -> StoreResult<()> {
        let path = self.config.path.clone();
        self.save_to(&path)
    }

    /// Writes every node plus metadata to `path` in one atomic replace.
    ///
    /// `last_saved_ms` is stamped into metadata only when the write succeeds.
    pub fn save_to(&mut self, path: &Path) -> StoreResult<()> {
        let started_at = Instant::now();
        info!(
            "event=store_save module=store status=start path={} objects={}",
            path.display(),
            self.cache.len()
        );

        match self.write_document(path) {
            Ok(objects) => {
                info!(
                    "event=store_save module=store status=ok objects={} duration_ms={}",
                    objects,
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=store_save module=store status=error duration_ms={} integrity={} error={}",
                    started_at.elapsed().as_millis(),
                    err.is_integrity_violation(),
                    err
                );
                Err(err)
            }
        }
    }

    fn write_document(&mut self, path: &Path) -> StoreResult<usize> {
        let objects = self.encode_nodes()?;
        let count = objects.len();
        let mut metadata = self.metadata.clone();
        metadata.stamp_saved();

        let document = StoreDocument { metadata, objects };
        write_atomically(
            path,
            &document,
            self.config.pretty,
            self.config.create_parent_dirs,
        )?;
        self.metadata = document.metadata;
        Ok(count)
    }

    fn encode_nodes(&self) -> StoreResult<Vec<StoredObject>> {
        let mut objects = Vec::with_capacity(self.cache.len());
        for (id, node) in &self.cache {
            let entity = entity_of(&self.schema, id)?;
            let payload = match node.state() {
                NodeState::Unresolved(record) => record.clone(),
                NodeState::Resolved(properties) => codec::encode(properties, entity)?,
            };
            for (relationship, key) in payload.foreign_keys() {
                let target = key.to_object_id();
                if !self.cache.contains_key(&target) {
                    return Err(StoreError::Codec(CodecError::DanglingReference {
                        entity: entity.name.clone(),
                        relationship: relationship.to_string(),
                        target,
                    }));
                }
            }
            objects.push(StoredObject {
                entity: id.entity().to_string(),
                reference_id: id.reference_id(),
                payload,
            });
        }
        Ok(objects)
    }

    /// Reads only the metadata of the store file at `path`.
    ///
    /// Returns `Ok(None)` when no file exists.
    pub fn read_metadata(path: &Path) -> StoreResult<Option<StoreMetadata>> {
        let Some(file) = open_existing(path)? else {
            return Ok(None);
        };
        let root: MetadataOnly = serde_json::from_reader(BufReader::new(file))
            .map_err(|err| StoreError::Malformed(err.to_string()))?;
        Ok(Some(root.metadata))
    }

    /// Replaces the metadata of an existing store file, keeping its objects.
    ///
    /// # Errors
    /// - `Malformed` when the replacement changes the store type, drops the
    ///   reference counter or lowers it to a reference id already in use.
    pub fn write_metadata(path: &Path, metadata: &StoreMetadata) -> StoreResult<()> {
        let file = File::open(path).map_err(|err| StoreError::io(path, err))?;
        let mut document: StoreDocument = serde_json::from_reader(BufReader::new(file))
            .map_err(|err| StoreError::Malformed(err.to_string()))?;
        check_replacement_metadata(&document, metadata)?;
        document.metadata = metadata.clone();
        write_atomically(path, &document, false, false)?;
        info!(
            "event=metadata_write module=store status=ok path={}",
            path.display()
        );
        Ok(())
    }
}

fn check_replacement_metadata(current: &StoreDocument, next: &StoreMetadata) -> StoreResult<()> {
    let expected = current.metadata.store_type();
    if expected.is_none() || next.store_type() != expected {
        return Err(StoreError::Malformed(format!(
            "metadata `{STORE_TYPE_KEY}` must stay `{}`, found `{}`",
            expected.unwrap_or("<none>"),
            next.store_type().unwrap_or("<none>")
        )));
    }
    let counter = next.object_counter().ok_or_else(|| {
        StoreError::Malformed(format!("metadata `{OBJECT_COUNTER_KEY}` is missing or invalid"))
    })?;
    let highest = current.objects.iter().map(|object| object.reference_id).max();
    if let Some(highest) = highest.filter(|highest| *highest >= counter) {
        return Err(StoreError::Malformed(format!(
            "reference counter {counter} does not exceed reference id {highest}"
        )));
    }
    Ok(())
}

fn entity_of<'a>(schema: &'a Schema, id: &ObjectId) -> StoreResult<&'a EntityDescriptor> {
    schema
        .entity(id.entity())
        .ok_or_else(|| StoreError::UnknownEntity(id.entity().to_string()))
}

fn resolve_pending(
    schema: &Schema,
    cache: &NodeCache,
) -> StoreResult<Vec<(ObjectId, ResolvedProperties)>> {
    let resolver = CacheResolver { cache };
    let mut resolved = Vec::new();
    for (id, node) in cache {
        let NodeState::Unresolved(record) = node.state() else {
            continue;
        };
        let entity = entity_of(schema, id)?;
        let properties = codec::decode(record, entity, &resolver)?;
        resolved.push((id.clone(), properties));
    }
    Ok(resolved)
}

fn open_existing(path: &Path) -> StoreResult<Option<File>> {
    match File::open(path) {
        Ok(file) => Ok(Some(file)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(StoreError::io(path, err)),
    }
}

fn write_atomically(
    path: &Path,
    document: &StoreDocument,
    pretty: bool,
    create_parent_dirs: bool,
) -> StoreResult<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if create_parent_dirs {
        std::fs::create_dir_all(&parent).map_err(|err| StoreError::io(&parent, err))?;
    }

    let mut temp = NamedTempFile::new_in(&parent).map_err(|err| StoreError::io(&parent, err))?;
    let temp_path = temp.path().to_path_buf();
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        let encoded = if pretty {
            serde_json::to_writer_pretty(&mut writer, document)
        } else {
            serde_json::to_writer(&mut writer, document)
        };
        encoded.map_err(StoreError::Serialize)?;
        writer
            .flush()
            .map_err(|err| StoreError::io(&temp_path, err))?;
    }
    temp.as_file()
        .sync_all()
        .map_err(|err| StoreError::io(&temp_path, err))?;
    temp.persist(path)
        .map_err(|err| StoreError::io(path, err.error))?;
    Ok(())
}
