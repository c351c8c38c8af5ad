//! # Catalog
//!
//! Process-wide registry of tables and indexes, addressed by name and OID.
//!
//! DDL takes the catalog's write lock; binding and planning hold the read
//! lock and release it before execution, so a long-running query never
//! blocks `CREATE TABLE`. The `Arc<TableInfo>`/`Arc<IndexInfo>` handed out
//! stay valid regardless of later DDL.

use crate::config::SessionConfig;
use crate::error::DbError;
use crate::index::{
    BPlusTreeIndex, DistanceCache, DistanceComputer, DistanceKind, ExtendibleHashIndex, HnswIndex,
    HnswOptions, IndexKind, IvfFlatIndex, IvfFlatOptions, KeyIndex, OrderedIndex, UnorderedIndex,
    VectorIndex,
};
use crate::storage::{BufferPoolManager, TableHeap};
use crate::types::{Schema, TypeId};
use eyre::{ensure, Result};
use hashbrown::HashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

pub type TableOid = u32;
pub type IndexOid = u32;

pub struct TableInfo {
    pub oid: TableOid,
    pub name: String,
    pub schema: Schema,
    pub heap: Arc<TableHeap>,
}

/// The two index capability families the catalog can hand out.
#[derive(Clone)]
pub enum IndexHandle {
    Key(Arc<dyn KeyIndex>),
    Vector(Arc<dyn VectorIndex>),
}

pub struct IndexInfo {
    pub oid: IndexOid,
    pub name: String,
    pub table_name: String,
    pub table_oid: TableOid,
    /// Table column positions forming the key, in key order.
    pub key_attrs: Vec<usize>,
    pub key_schema: Schema,
    pub kind: IndexKind,
    pub handle: IndexHandle,
}

impl IndexInfo {
    pub fn key_index(&self) -> Option<&Arc<dyn KeyIndex>> {
        match &self.handle {
            IndexHandle::Key(index) => Some(index),
            IndexHandle::Vector(_) => None,
        }
    }

    pub fn vector_index(&self) -> Option<&Arc<dyn VectorIndex>> {
        match &self.handle {
            IndexHandle::Vector(index) => Some(index),
            IndexHandle::Key(_) => None,
        }
    }

    pub fn distance_kind(&self) -> Option<DistanceKind> {
        self.vector_index().map(|v| v.distance_kind())
    }
}

/// What `CREATE INDEX ... USING <method>` asks the catalog to build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndexSpec {
    BTree,
    Hash,
    Ordered,
    Unordered,
    Hnsw { distance: DistanceKind, options: HnswOptions },
    IvfFlat { distance: DistanceKind, options: IvfFlatOptions },
}

impl IndexSpec {
    pub fn kind(&self) -> IndexKind {
        match self {
            IndexSpec::BTree => IndexKind::BTree,
            IndexSpec::Hash => IndexKind::Hash,
            IndexSpec::Ordered => IndexKind::Ordered,
            IndexSpec::Unordered => IndexKind::Unordered,
            IndexSpec::Hnsw { .. } => IndexKind::Hnsw,
            IndexSpec::IvfFlat { .. } => IndexKind::IvfFlat,
        }
    }
}

struct Inner {
    tables_by_name: HashMap<String, TableOid>,
    tables: HashMap<TableOid, Arc<TableInfo>>,
    /// table name -> index name -> info
    indexes: HashMap<String, HashMap<String, Arc<IndexInfo>>>,
    index_names: HashMap<String, IndexOid>,
}

pub struct Catalog {
    bpm: Arc<BufferPoolManager>,
    config: Arc<SessionConfig>,
    distance_cache: Arc<DistanceCache>,
    inner: RwLock<Inner>,
    next_oid: AtomicU32,
}

impl Catalog {
    pub fn new(bpm: Arc<BufferPoolManager>, config: Arc<SessionConfig>) -> Self {
        Self {
            bpm,
            config,
            distance_cache: Arc::new(DistanceCache::new()),
            inner: RwLock::new(Inner {
                tables_by_name: HashMap::new(),
                tables: HashMap::new(),
                indexes: HashMap::new(),
                index_names: HashMap::new(),
            }),
            next_oid: AtomicU32::new(1),
        }
    }

    pub fn distance_cache(&self) -> &Arc<DistanceCache> {
        &self.distance_cache
    }

    pub fn create_table(&self, name: &str, schema: Schema) -> Result<Arc<TableInfo>> {
        ensure!(
            !schema.is_empty(),
            DbError::InvalidInput(format!("table {name} needs at least one column"))
        );
        let mut inner = self.inner.write();
        ensure!(
            !inner.tables_by_name.contains_key(name),
            DbError::InvalidInput(format!("table {name} already exists"))
        );
        let heap = Arc::new(TableHeap::create(Arc::clone(&self.bpm))?);
        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        let info = Arc::new(TableInfo { oid, name: name.to_string(), schema, heap });
        inner.tables_by_name.insert(name.to_string(), oid);
        inner.tables.insert(oid, Arc::clone(&info));
        inner.indexes.entry(name.to_string()).or_default();
        debug!(table = name, oid, "create table");
        Ok(info)
    }

    pub fn table(&self, name: &str) -> Option<Arc<TableInfo>> {
        let inner = self.inner.read();
        let oid = inner.tables_by_name.get(name)?;
        inner.tables.get(oid).cloned()
    }

    pub fn table_by_oid(&self, oid: TableOid) -> Option<Arc<TableInfo>> {
        self.inner.read().tables.get(&oid).cloned()
    }

    pub fn tables(&self) -> Vec<Arc<TableInfo>> {
        self.inner.read().tables.values().cloned().collect()
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().tables_by_name.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn create_index(
        &self,
        index_name: &str,
        table_name: &str,
        key_attrs: Vec<usize>,
        spec: IndexSpec,
    ) -> Result<Arc<IndexInfo>> {
        let mut inner = self.inner.write();
        let table = inner
            .tables_by_name
            .get(table_name)
            .and_then(|oid| inner.tables.get(oid))
            .cloned()
            .ok_or_else(|| DbError::InvalidInput(format!("no such table: {table_name}")))?;
        ensure!(
            !inner.index_names.contains_key(index_name),
            DbError::InvalidInput(format!("index {index_name} already exists"))
        );
        ensure!(
            !key_attrs.is_empty() && key_attrs.iter().all(|&a| a < table.schema.len()),
            DbError::InvalidInput(format!("invalid key columns for index {index_name}"))
        );
        let key_schema = table.schema.project(&key_attrs);

        if spec.kind().is_vector() {
            ensure!(
                key_attrs.len() == 1 && key_schema.column(0).type_id() == TypeId::Vector,
                DbError::InvalidInput(format!(
                    "{} index {index_name} requires exactly one VECTOR column",
                    spec.kind().name()
                ))
            );
        }

        let handle = match spec {
            IndexSpec::BTree => IndexHandle::Key(Arc::new(BPlusTreeIndex::new())),
            IndexSpec::Hash => IndexHandle::Key(Arc::new(ExtendibleHashIndex::new())),
            IndexSpec::Ordered => IndexHandle::Key(Arc::new(OrderedIndex::new())),
            IndexSpec::Unordered => IndexHandle::Key(Arc::new(UnorderedIndex::new())),
            IndexSpec::Hnsw { distance, options } => IndexHandle::Vector(Arc::new(
                HnswIndex::new(options, self.computer(distance)),
            )),
            IndexSpec::IvfFlat { distance, options } => IndexHandle::Vector(Arc::new(
                IvfFlatIndex::new(options, self.computer(distance)),
            )),
        };

        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        let info = Arc::new(IndexInfo {
            oid,
            name: index_name.to_string(),
            table_name: table_name.to_string(),
            table_oid: table.oid,
            key_attrs,
            key_schema,
            kind: spec.kind(),
            handle,
        });
        inner.index_names.insert(index_name.to_string(), oid);
        inner
            .indexes
            .entry(table_name.to_string())
            .or_default()
            .insert(index_name.to_string(), Arc::clone(&info));
        debug!(index = index_name, table = table_name, kind = spec.kind().name(), "create index");
        Ok(info)
    }

    pub fn index(&self, table_name: &str, index_name: &str) -> Option<Arc<IndexInfo>> {
        self.inner
            .read()
            .indexes
            .get(table_name)?
            .get(index_name)
            .cloned()
    }

    pub fn table_indexes(&self, table_name: &str) -> Vec<Arc<IndexInfo>> {
        self.inner
            .read()
            .indexes
            .get(table_name)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all_indexes(&self) -> Vec<Arc<IndexInfo>> {
        let mut out: Vec<Arc<IndexInfo>> = self
            .inner
            .read()
            .indexes
            .values()
            .flat_map(|m| m.values().cloned())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    fn computer(&self, distance: DistanceKind) -> DistanceComputer {
        DistanceComputer::new(
            distance,
            Arc::clone(&self.config),
            Arc::clone(&self.distance_cache),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DiskManager;
    use crate::types::Column;

    fn catalog() -> Catalog {
        let bpm = BufferPoolManager::new(16, DiskManager::in_memory());
        Catalog::new(bpm, Arc::new(SessionConfig::new()))
    }

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", TypeId::Integer),
            Column::new_vector("v", 4),
        ])
    }

    #[test]
    fn create_and_resolve_table() {
        let catalog = catalog();
        let info = catalog.create_table("t", schema()).unwrap();
        assert_eq!(catalog.table("t").unwrap().oid, info.oid);
        assert_eq!(catalog.table_by_oid(info.oid).unwrap().name, "t");
        assert!(catalog.table("missing").is_none());
    }

    #[test]
    fn duplicate_table_is_rejected() {
        let catalog = catalog();
        catalog.create_table("t", schema()).unwrap();
        assert!(catalog.create_table("t", schema()).is_err());
    }

    #[test]
    fn create_index_projects_key_schema() {
        let catalog = catalog();
        catalog.create_table("t", schema()).unwrap();
        let index = catalog
            .create_index("t_id", "t", vec![0], IndexSpec::BTree)
            .unwrap();
        assert_eq!(index.key_schema.len(), 1);
        assert_eq!(index.key_schema.column(0).name(), "id");
        assert!(index.key_index().is_some());
        assert_eq!(catalog.table_indexes("t").len(), 1);
    }

    #[test]
    fn vector_index_requires_vector_column() {
        let catalog = catalog();
        catalog.create_table("t", schema()).unwrap();
        let spec = IndexSpec::Hnsw {
            distance: DistanceKind::L2,
            options: HnswOptions::default(),
        };
        assert!(catalog.create_index("bad", "t", vec![0], spec).is_err());
        let index = catalog.create_index("good", "t", vec![1], spec).unwrap();
        assert_eq!(index.distance_kind(), Some(DistanceKind::L2));
        assert_eq!(index.kind, IndexKind::Hnsw);
    }

    #[test]
    fn index_names_are_global() {
        let catalog = catalog();
        catalog.create_table("a", schema()).unwrap();
        catalog.create_table("b", schema()).unwrap();
        catalog.create_index("i", "a", vec![0], IndexSpec::Hash).unwrap();
        assert!(catalog.create_index("i", "b", vec![0], IndexSpec::Hash).is_err());
    }
}
