// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Parameter checkpoints with memory-mapped loading.
//!
//! # File layout
//! ```text
//! magic "CKPT" | count u32 LE
//! count × ( layer u32 LE | param id u8 | tensor record )
//! ```
//! Tensor records use [`tensor_core::codec`].

use std::path::Path;

use layers::ParamId;
use tensor_core::{codec, Tensor};
use tracing::{debug, info};

use crate::{Ready, RuntimeError, Sequential};

const MAGIC: &[u8; 4] = b"CKPT";

/// One saved parameter.
#[derive(Debug, Clone)]
pub struct CheckpointRecord {
    pub layer: usize,
    pub id: ParamId,
    pub data: Tensor,
}

/// The parameters of a model, detached from it.
#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    records: Vec<CheckpointRecord>,
}

impl Checkpoint {
    /// Captures every parameter of `model`.
    pub fn from_model(model: &Sequential<Ready>) -> Self {
        let records = model
            .parameters()
            .into_iter()
            .map(|((layer, id), p)| CheckpointRecord { layer, id, data: p.data })
            .collect();
        Self { records }
    }

    pub fn records(&self) -> &[CheckpointRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&(self.records.len() as u32).to_le_bytes());
        for r in &self.records {
            out.extend_from_slice(&(r.layer as u32).to_le_bytes());
            out.push(r.id.as_index() as u8);
            out.extend_from_slice(&codec::encode(&r.data));
        }
        out
    }

    /// Parses a checkpoint; `path` only labels errors.
    pub fn from_bytes(bytes: &[u8], path: &Path) -> Result<Self, RuntimeError> {
        let fail = |detail: String| RuntimeError::checkpoint(path, detail);
        if bytes.len() < 8 || &bytes[..4] != MAGIC {
            return Err(fail("not a checkpoint file".to_string()));
        }
        let count = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let mut pos = 8;
        let mut records = Vec::with_capacity(count.min(1024));
        for n in 0..count {
            let Some(head) = bytes.get(pos..pos + 5) else {
                return Err(fail(format!("truncated at record {n}")));
            };
            let layer = u32::from_le_bytes([head[0], head[1], head[2], head[3]]) as usize;
            let id = ParamId::from_index(head[4] as usize)
                .ok_or_else(|| fail(format!("record {n}: unknown parameter id {}", head[4])))?;
            let (data, used) = codec::decode(&bytes[pos + 5..])
                .map_err(|e| fail(format!("record {n}: {e}")))?;
            pos += 5 + used;
            records.push(CheckpointRecord { layer, id, data });
        }
        if pos != bytes.len() {
            return Err(fail(format!("{} trailing bytes", bytes.len() - pos)));
        }
        Ok(Self { records })
    }

    /// Writes the checkpoint to `path`.
    pub fn save(&self, path: &Path) -> Result<(), RuntimeError> {
        let bytes = self.to_bytes();
        std::fs::write(path, &bytes)
            .map_err(|e| RuntimeError::checkpoint(path, format!("write failed: {e}")))?;
        info!(
            "checkpoint: saved {} parameters to {} ({:.2} KB)",
            self.records.len(),
            path.display(),
            bytes.len() as f64 / 1024.0,
        );
        Ok(())
    }

    /// Reads a checkpoint through a memory map.
    pub fn load(path: &Path) -> Result<Self, RuntimeError> {
        let file = std::fs::File::open(path)
            .map_err(|e| RuntimeError::checkpoint(path, format!("cannot open: {e}")))?;
        let len = file
            .metadata()
            .map_err(|e| RuntimeError::checkpoint(path, format!("cannot stat: {e}")))?
            .len();
        // Mapping an empty file fails on some platforms.
        if len == 0 {
            return Err(RuntimeError::checkpoint(path, "empty file"));
        }
        let mmap = unsafe { memmap2::Mmap::map(&file) }
            .map_err(|e| RuntimeError::checkpoint(path, format!("mmap failed: {e}")))?;
        let checkpoint = Self::from_bytes(&mmap, path)?;
        info!(
            "checkpoint: mmap'd {} ({:.2} KB, {} parameters)",
            path.display(),
            mmap.len() as f64 / 1024.0,
            checkpoint.records.len(),
        );
        Ok(checkpoint)
    }

    /// Writes every record into `model`.
    ///
    /// All records are validated against the model before any parameter
    /// changes. Parameters keep their identity, so optimizer state stays
    /// attached.
    pub fn apply(&self, model: &mut Sequential<Ready>, path: &Path) -> Result<(), RuntimeError> {
        let mut current = model.parameters();
        let mut staged = Vec::with_capacity(self.records.len());
        for r in &self.records {
            let Some(mut param) = current.remove(&(r.layer, r.id)) else {
                return Err(RuntimeError::checkpoint(
                    path,
                    format!("layer {} has no parameter {}", r.layer, r.id),
                ));
            };
            if param.shape() != r.data.shape() {
                return Err(RuntimeError::checkpoint(
                    path,
                    format!(
                        "layer {} {}: expected {}, found {}",
                        r.layer,
                        r.id,
                        param.shape(),
                        r.data.shape()
                    ),
                ));
            }
            param.data = r.data.contiguous();
            staged.push((r.layer, r.id, param));
        }
        for (layer, id, param) in staged {
            debug!(layer, param = %id, "checkpoint parameter applied");
            model.set_param(layer, id, param)?;
        }
        Ok(())
    }

    /// Saves every parameter of `model` to `path`.
    pub fn save_model(model: &Sequential<Ready>, path: &Path) -> Result<(), RuntimeError> {
        Self::from_model(model).save(path)
    }

    /// Loads `path` into `model`.
    pub fn load_into(model: &mut Sequential<Ready>, path: &Path) -> Result<(), RuntimeError> {
        Self::load(path)?.apply(model, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SequentialBuilder;
    use layers::{Dense, DenseConfig, ReLU};
    use tensor_core::Shape;

    fn model(seed: u64) -> Sequential<Ready> {
        SequentialBuilder::new(Shape::matrix(1, 3))
            .add(Dense::new(DenseConfig::new(3, 2).with_seed(seed)).unwrap())
            .add(ReLU::new())
            .build()
            .unwrap()
            .init()
            .unwrap()
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("{name}-{}.ckpt", std::process::id()))
    }

    #[test]
    fn test_bytes_round_trip() {
        let m = model(1);
        let ckpt = Checkpoint::from_model(&m);
        assert_eq!(ckpt.len(), 2);
        let back = Checkpoint::from_bytes(&ckpt.to_bytes(), Path::new("mem")).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.records()[0].id, ParamId::Weights);
        assert_eq!(back.records()[0].data.to_vec(), ckpt.records()[0].data.to_vec());
    }

    #[test]
    fn test_file_round_trip_restores_weights() {
        let path = temp_path("runtime-ckpt-roundtrip");
        let source = model(1);
        Checkpoint::save_model(&source, &path).unwrap();

        let mut target = model(2);
        let uid = target.parameters()[&(0, ParamId::Weights)].uid();
        Checkpoint::load_into(&mut target, &path).unwrap();
        let _ = std::fs::remove_file(&path);

        let restored = target.parameters();
        for (key, p) in source.parameters() {
            assert_eq!(restored[&key].data.to_vec(), p.data.to_vec(), "{key:?}");
        }
        assert_eq!(restored[&(0, ParamId::Weights)].uid(), uid);
    }

    #[test]
    fn test_rejects_corrupt_input() {
        let p = Path::new("mem");
        assert!(Checkpoint::from_bytes(b"NOPE\0\0\0\0", p).is_err());
        let mut bytes = Checkpoint::from_model(&model(1)).to_bytes();
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            Checkpoint::from_bytes(&bytes, p),
            Err(RuntimeError::Checkpoint { .. })
        ));
    }

    #[test]
    fn test_shape_disagreement_changes_nothing() {
        let mut m = model(1);
        let before = m.parameters();
        let ckpt = Checkpoint {
            records: vec![
                CheckpointRecord {
                    layer: 0,
                    id: ParamId::Biases,
                    data: Tensor::full([2], 9.0),
                },
                CheckpointRecord {
                    layer: 0,
                    id: ParamId::Weights,
                    data: Tensor::zeros([2, 3]),
                },
            ],
        };
        assert!(matches!(
            ckpt.apply(&mut m, Path::new("mem")),
            Err(RuntimeError::Checkpoint { .. })
        ));
        let after = m.parameters();
        for (key, p) in before {
            assert_eq!(after[&key].data.to_vec(), p.data.to_vec());
        }
    }

    #[test]
    fn test_missing_file() {
        assert!(Checkpoint::load(Path::new("/nonexistent/model.ckpt")).is_err());
    }
}
