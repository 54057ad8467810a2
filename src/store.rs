//! Binary dataset persistence.
//!
//! One little-endian file per dataset: a header carrying the dataset's
//! schema (declared range, order, depth-map bands, KD root), then one
//! `(trixel id, object count)` block per non-empty trixel in depth-first
//! mesh order (N0..N3, S0..S3, parents before children), each followed
//! by its fixed-size object records in list order.
//!
//! KD links are remapped to file order on save; since a load appends
//! objects in file order, the reloaded flat array matches and the links
//! apply verbatim with no rebuild.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::{error, info};

use crate::catalog::{Catalog, CatalogObject, DatasetConfig, KeyOrder, StoredObject};
use crate::depth::{DepthBand, DepthMap};
use crate::error::CatalogError;
use crate::kdtree::{KD_NONE, KdNode};
use crate::mesh::{ROOT_COUNT, TrixelId};

const MAGIC: &[u8; 4] = b"AMGT";
const VERSION: u32 = 1;

fn write_u32(w: &mut impl Write, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_i32(w: &mut impl Write, v: i32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_u64(w: &mut impl Write, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_f64(w: &mut impl Write, v: f64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_u32(r: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_i32(r: &mut impl Read) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f64(r: &mut impl Read) -> io::Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

impl Catalog {
    /// Write one dataset to a file.
    pub fn save_dataset(&self, slot: usize, path: &Path) -> Result<(), CatalogError> {
        let ds = self.dataset(slot)?;
        let map = ds.depth_map().ok_or(CatalogError::NotImported)?;

        // File order is the mesh traversal order; KD links are written
        // through this mapping so they reload verbatim.
        let order = self.traversal_order(slot)?;
        let mut file_pos = vec![0u32; ds.len()];
        for (pos, &object) in order.iter().enumerate() {
            file_pos[object as usize] = pos as u32;
        }
        let remap = |link: i32| {
            if link < 0 {
                KD_NONE
            } else {
                file_pos[link as usize] as i32
            }
        };

        let file = File::create(path)?;
        let mut w = BufWriter::new(file);

        w.write_all(MAGIC)?;
        write_u32(&mut w, VERSION)?;
        write_u32(&mut w, u32::from(self.mesh().depth()))?;
        write_u32(
            &mut w,
            match ds.order() {
                KeyOrder::Ascending => 0,
                KeyOrder::Descending => 1,
            },
        )?;
        write_u32(&mut w, ds.name().len() as u32)?;
        w.write_all(ds.name().as_bytes())?;

        let (min_value, max_value) = ds.declared_range();
        write_f64(&mut w, min_value)?;
        write_f64(&mut w, max_value)?;
        write_u64(&mut w, ds.len() as u64)?;
        write_i32(&mut w, remap(ds.kd_root))?;

        write_u32(&mut w, map.len() as u32)?;
        for band in map.bands() {
            write_f64(&mut w, band.min_value)?;
            write_f64(&mut w, band.max_value)?;
        }

        let mut written = 0usize;
        for root in 0..ROOT_COUNT {
            written += self.write_trixel(slot, root, &mut w, &remap, &file_pos)?;
        }
        w.flush()?;

        if written != ds.len() {
            error!(written, expected = ds.len(), "trixel walk missed objects");
            return Err(CatalogError::Corrupt(format!(
                "wrote {written} objects, expected {}",
                ds.len()
            )));
        }

        info!(slot, objects = written, path = %path.display(), "saved dataset");
        Ok(())
    }

    fn write_trixel(
        &self,
        slot: usize,
        trixel: usize,
        w: &mut impl Write,
        remap: &impl Fn(i32) -> i32,
        file_pos: &[u32],
    ) -> Result<usize, CatalogError> {
        let ds = self.dataset(slot)?;
        let t = self.mesh().trixel(trixel);
        let data = t.slot(slot);
        let mut count = 0usize;

        if data.count > 0 {
            write_u32(w, t.id().raw())?;
            write_u32(w, data.count)?;
            for index in ds.list(data.head) {
                let object = ds.object(index as usize);
                let kd = ds.kd_node(index as usize);
                write_u64(w, object.id)?;
                write_f64(w, object.ra)?;
                write_f64(w, object.dec)?;
                write_f64(w, object.key)?;
                write_i32(w, remap(kd.child[0]))?;
                write_i32(w, remap(kd.child[1]))?;
                write_i32(w, remap(kd.parent))?;
                write_u32(w, file_pos[index as usize])?;
                count += 1;
            }
        }

        if let Some(children) = t.children {
            for child in children {
                count += self.write_trixel(slot, child, w, remap, file_pos)?;
            }
        }
        Ok(count)
    }

    /// Read a dataset file into a free slot of this catalog.
    ///
    /// The catalog's mesh depth must match the one the file was saved
    /// with; the depth map and KD-tree are restored without a rebuild.
    pub fn load_dataset(&mut self, path: &Path) -> Result<usize, CatalogError> {
        let file = File::open(path)?;
        let mut r = BufReader::new(file);

        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(CatalogError::Corrupt("bad magic bytes".into()));
        }
        let version = read_u32(&mut r)?;
        if version != VERSION {
            return Err(CatalogError::Corrupt(format!(
                "unsupported version {version}"
            )));
        }

        let depth = read_u32(&mut r)?;
        if depth != u32::from(self.mesh().depth()) {
            return Err(CatalogError::Corrupt(format!(
                "file mesh depth {depth}, catalog depth {}",
                self.mesh().depth()
            )));
        }

        let order = match read_u32(&mut r)? {
            0 => KeyOrder::Ascending,
            1 => KeyOrder::Descending,
            other => {
                return Err(CatalogError::Corrupt(format!("unknown key order {other}")));
            }
        };
        let name_len = read_u32(&mut r)? as usize;
        let mut name = vec![0u8; name_len];
        r.read_exact(&mut name)?;
        let name = String::from_utf8(name)
            .map_err(|_| CatalogError::Corrupt("dataset name is not utf-8".into()))?;

        let min_value = read_f64(&mut r)?;
        let max_value = read_f64(&mut r)?;
        let count = read_u64(&mut r)? as usize;
        let kd_root = read_i32(&mut r)?;

        let band_count = read_u32(&mut r)? as usize;
        if band_count != usize::from(self.mesh().depth()) + 1 {
            return Err(CatalogError::Corrupt(format!(
                "{band_count} depth bands for a depth-{} mesh",
                self.mesh().depth()
            )));
        }
        let mut bands = Vec::with_capacity(band_count);
        for _ in 0..band_count {
            bands.push(DepthBand {
                min_value: read_f64(&mut r)?,
                max_value: read_f64(&mut r)?,
            });
        }

        let slot = self.create_dataset(DatasetConfig {
            name,
            min_value,
            max_value,
            order,
        })?;

        match self.read_trixels(slot, &mut r, count) {
            Ok(()) => {
                let ds = self.dataset_mut(slot)?;
                ds.depth_map = Some(DepthMap::from_bands(bands, min_value, max_value));
                ds.kd_root = kd_root;
                info!(slot, objects = count, path = %path.display(), "loaded dataset");
                Ok(slot)
            }
            Err(e) => {
                // Leave no half-populated dataset behind.
                self.datasets[slot] = None;
                Err(e)
            }
        }
    }

    fn read_trixels(
        &mut self,
        slot: usize,
        r: &mut impl Read,
        expected: usize,
    ) -> Result<(), CatalogError> {
        let mut total = 0usize;
        while total < expected {
            let raw = read_u32(r)?;
            let id = TrixelId::from_raw(raw).ok_or(CatalogError::InvalidTrixelId(raw))?;
            let trixel = self
                .mesh()
                .resolve(id)
                .ok_or(CatalogError::InvalidTrixelId(raw))?;
            let block = read_u32(r)? as usize;
            if total + block > expected {
                return Err(CatalogError::Corrupt(format!(
                    "trixel {id} overruns the declared object count {expected}"
                )));
            }

            let mut objects = Vec::with_capacity(block);
            for _ in 0..block {
                let object = CatalogObject {
                    id: read_u64(r)?,
                    ra: read_f64(r)?,
                    dec: read_f64(r)?,
                    key: read_f64(r)?,
                };
                let kd = KdNode {
                    child: [read_i32(r)?, read_i32(r)?],
                    parent: read_i32(r)?,
                    index: read_u32(r)?,
                };
                objects.push(StoredObject {
                    object,
                    next: None,
                    kd,
                });
            }
            self.insert_block(slot, trixel, objects)?;
            total += block;
        }
        Ok(())
    }
}
