//! Catalogs, datasets and import-time object placement.
//!
//! A [`Catalog`] owns one mesh and up to `dataset_slots` datasets sharing
//! it. Import hands each dataset a flat array of parsed objects; every
//! object is placed into the trixel matching its position and key-derived
//! depth, threaded onto that trixel's ordered singly linked list. After
//! import the catalog is read-only and queries may run concurrently.

use tracing::{info, trace, warn};

use crate::depth::DepthMap;
use crate::error::CatalogError;
use crate::kdtree::KdNode;
use crate::mesh::{Mesh, TrixelData};

/// One parsed catalog entry at the mesh boundary.
///
/// `key` is whatever field drives depth placement for the dataset,
/// typically visual magnitude for stars or angular size for deep-sky
/// objects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CatalogObject {
    pub id: u64,
    /// Right ascension in radians.
    pub ra: f64,
    /// Declination in radians.
    pub dec: f64,
    /// Placement key value.
    pub key: f64,
}

/// Direction of each trixel's object list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrder {
    /// Smallest key at the head (brightest first for magnitudes).
    Ascending,
    /// Largest key at the head (largest first for angular sizes).
    Descending,
}

/// Declared shape of a dataset, fixed at creation time.
#[derive(Debug, Clone)]
pub struct DatasetConfig {
    pub name: String,
    /// Smallest key value the dataset accepts.
    pub min_value: f64,
    /// Largest key value the dataset accepts.
    pub max_value: f64,
    pub order: KeyOrder,
}

/// An object plus its intra-trixel list link and KD-tree node.
#[derive(Debug, Clone)]
pub(crate) struct StoredObject {
    pub(crate) object: CatalogObject,
    pub(crate) next: Option<u32>,
    pub(crate) kd: KdNode,
}

/// One imported table sharing the catalog's mesh.
pub struct Dataset {
    name: String,
    min_value: f64,
    max_value: f64,
    order: KeyOrder,
    pub(crate) objects: Vec<StoredObject>,
    pub(crate) depth_map: Option<DepthMap>,
    pub(crate) kd_root: i32,
}

impl Dataset {
    fn new(config: DatasetConfig) -> Dataset {
        Dataset {
            name: config.name,
            min_value: config.min_value,
            max_value: config.max_value,
            order: config.order,
            objects: Vec::new(),
            depth_map: None,
            kd_root: crate::kdtree::KD_NONE,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn order(&self) -> KeyOrder {
        self.order
    }

    /// The declared key range.
    pub fn declared_range(&self) -> (f64, f64) {
        (self.min_value, self.max_value)
    }

    pub fn object(&self, index: usize) -> &CatalogObject {
        &self.objects[index].object
    }

    /// KD-tree node of an object; meaningful once the tree is built.
    pub fn kd_node(&self, index: usize) -> &KdNode {
        &self.objects[index].kd
    }

    pub fn depth_map(&self) -> Option<&DepthMap> {
        self.depth_map.as_ref()
    }

    /// Iterate object indices of one trixel list.
    pub(crate) fn list(&self, head: Option<u32>) -> ListIter<'_> {
        ListIter {
            objects: &self.objects,
            current: head,
        }
    }
}

pub(crate) struct ListIter<'a> {
    objects: &'a [StoredObject],
    current: Option<u32>,
}

impl Iterator for ListIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let index = self.current?;
        self.current = self.objects[index as usize].next;
        Some(index)
    }
}

/// Outcome of a bulk import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportStats {
    /// Objects placed into the mesh.
    pub placed: usize,
    /// Objects skipped because their key fell outside the declared range.
    pub skipped: usize,
}

/// The engine: one mesh plus the datasets stored in it.
pub struct Catalog {
    pub(crate) mesh: Mesh,
    pub(crate) datasets: Vec<Option<Dataset>>,
}

impl Catalog {
    /// Create a catalog with a mesh of the given depth and room for
    /// `dataset_slots` datasets.
    pub fn new(depth: u8, dataset_slots: usize) -> Result<Catalog, CatalogError> {
        let mesh = Mesh::new(depth, dataset_slots)?;
        let datasets = (0..dataset_slots).map(|_| None).collect();
        Ok(Catalog { mesh, datasets })
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Claim a slot for a new dataset.
    pub fn create_dataset(&mut self, config: DatasetConfig) -> Result<usize, CatalogError> {
        if !(config.min_value < config.max_value) {
            return Err(CatalogError::InvalidValueRange {
                min: config.min_value,
                max: config.max_value,
            });
        }
        let slot = self
            .datasets
            .iter()
            .position(Option::is_none)
            .ok_or(CatalogError::DatasetSlotsExhausted(self.datasets.len()))?;
        info!(slot, name = config.name, "created dataset");
        self.datasets[slot] = Some(Dataset::new(config));
        Ok(slot)
    }

    pub fn dataset(&self, slot: usize) -> Result<&Dataset, CatalogError> {
        self.datasets
            .get(slot)
            .and_then(Option::as_ref)
            .ok_or(CatalogError::UnknownDataset(slot))
    }

    pub(crate) fn dataset_mut(&mut self, slot: usize) -> Result<&mut Dataset, CatalogError> {
        self.datasets
            .get_mut(slot)
            .and_then(Option::as_mut)
            .ok_or(CatalogError::UnknownDataset(slot))
    }

    /// Import a dataset's objects: derive the depth map from their keys,
    /// place every object, then build the KD-tree.
    ///
    /// Objects whose key falls outside the declared range are skipped and
    /// counted, matching how text catalogs carry blank or junk fields.
    pub fn import(
        &mut self,
        slot: usize,
        objects: Vec<CatalogObject>,
    ) -> Result<ImportStats, CatalogError> {
        let depth = self.mesh.depth();
        let ds = self.dataset_mut(slot)?;
        let (min_value, max_value) = (ds.min_value, ds.max_value);

        let map = DepthMap::from_values(
            objects.iter().map(|o| o.key),
            min_value,
            max_value,
            depth,
        )?;
        ds.depth_map = Some(map);

        let mut stats = ImportStats {
            placed: 0,
            skipped: 0,
        };
        for object in objects {
            match self.place(slot, object) {
                Ok(()) => stats.placed += 1,
                Err(CatalogError::ValueOutOfRange { .. }) => stats.skipped += 1,
                Err(other) => return Err(other),
            }
        }
        if stats.placed == 0 {
            return Err(CatalogError::EmptyDataset);
        }
        if stats.skipped > 0 {
            warn!(slot, skipped = stats.skipped, "objects outside declared key range");
        }
        info!(slot, placed = stats.placed, "imported dataset");

        self.build_kd_tree(slot)?;
        Ok(stats)
    }

    /// Place one object into its home trixel's ordered list.
    ///
    /// Import-time only; the depth map must exist. Placement never
    /// creates trixels and an object never moves once placed.
    pub fn place(&mut self, slot: usize, object: CatalogObject) -> Result<(), CatalogError> {
        let Catalog { mesh, datasets } = self;
        let ds = datasets
            .get_mut(slot)
            .and_then(Option::as_mut)
            .ok_or(CatalogError::UnknownDataset(slot))?;
        let map = ds.depth_map.as_ref().ok_or(CatalogError::NotImported)?;

        let depth = map.depth_for(object.key)?;
        let trixel = mesh.home_trixel(object.ra, object.dec, depth)?;

        let index = ds.objects.len() as u32;
        ds.objects.push(StoredObject {
            object,
            next: None,
            kd: KdNode::unset(index),
        });

        let data = mesh.trixel_mut(trixel).slot_mut(slot);
        insert_ordered(&mut ds.objects, data, index, ds.order);

        trace!(
            slot,
            trixel = %mesh.trixel(trixel).id(),
            key = object.key,
            depth,
            "placed object"
        );
        Ok(())
    }

    /// Attach a whole pre-sorted object block to one trixel, as read back
    /// from a persisted trixel file.
    pub(crate) fn insert_block(
        &mut self,
        slot: usize,
        trixel: usize,
        objects: Vec<StoredObject>,
    ) -> Result<(), CatalogError> {
        let Catalog { mesh, datasets } = self;
        let ds = datasets
            .get_mut(slot)
            .and_then(Option::as_mut)
            .ok_or(CatalogError::UnknownDataset(slot))?;

        let base = ds.objects.len() as u32;
        let count = objects.len() as u32;
        for (offset, mut stored) in objects.into_iter().enumerate() {
            let next = offset as u32 + 1;
            stored.next = if next < count { Some(base + next) } else { None };
            ds.objects.push(stored);
        }

        let data = mesh.trixel_mut(trixel).slot_mut(slot);
        data.head = (count > 0).then_some(base);
        data.count = count;
        Ok(())
    }

    /// Object indices in mesh traversal order (N0..N3, S0..S3, each
    /// trixel's list before its children).
    pub(crate) fn traversal_order(&self, slot: usize) -> Result<Vec<u32>, CatalogError> {
        let ds = self.dataset(slot)?;
        let mut order = Vec::with_capacity(ds.len());
        for root in 0..crate::mesh::ROOT_COUNT {
            self.collect_objects(slot, ds, root, &mut order);
        }
        Ok(order)
    }

    fn collect_objects(&self, slot: usize, ds: &Dataset, trixel: usize, out: &mut Vec<u32>) {
        let t = self.mesh.trixel(trixel);
        out.extend(ds.list(t.slot(slot).head));
        if let Some(children) = t.children {
            for child in children {
                self.collect_objects(slot, ds, child, out);
            }
        }
    }
}

fn insert_ordered(objects: &mut [StoredObject], data: &mut TrixelData, index: u32, order: KeyOrder) {
    let key = objects[index as usize].object.key;

    let Some(head) = data.head else {
        data.head = Some(index);
        data.count += 1;
        return;
    };

    let goes_before = |other: f64| match order {
        KeyOrder::Ascending => key <= other,
        KeyOrder::Descending => key >= other,
    };

    let mut last = head;
    let mut current = Some(head);
    while let Some(cur) = current {
        if goes_before(objects[cur as usize].object.key) {
            objects[index as usize].next = Some(cur);
            if cur == head {
                data.head = Some(index);
            } else {
                objects[last as usize].next = Some(index);
            }
            data.count += 1;
            return;
        }
        last = cur;
        current = objects[cur as usize].next;
    }

    // New tail.
    objects[last as usize].next = Some(index);
    data.count += 1;
}
