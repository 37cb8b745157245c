// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Binary tensor records.
//!
//! ```text
//! magic       "TNSR"
//! header_len  u32 LE
//! header      version u8 | dtype u8 | flags u8 | rank u32 LE | dims u64 LE × rank
//!             [strides i64 LE × rank | offset u64 LE]   when flags bit 0 is clear
//! payload_len u64 LE, in elements
//! payload     f32 LE × payload_len
//! ```
//!
//! The encoder always writes the logical contents contiguously. The
//! decoder also accepts strided records.

use std::io::Write;

use kernels::MAX_RANK;

use crate::{DType, Shape, Tensor, TensorError};

pub const MAGIC: &[u8; 4] = b"TNSR";
pub const VERSION: u8 = 1;
const FLAG_CONTIGUOUS: u8 = 1;

/// Writes `tensor` as one record.
pub fn write_tensor<W: Write>(writer: &mut W, tensor: &Tensor) -> Result<(), TensorError> {
    writer
        .write_all(&encode(tensor))
        .map_err(|e| TensorError::codec(format!("write failed: {e}")))
}

/// Encodes `tensor` as one record.
pub fn encode(tensor: &Tensor) -> Vec<u8> {
    let rank = tensor.rank();
    let mut header = Vec::with_capacity(7 + 8 * rank);
    header.push(VERSION);
    header.push(tensor.dtype().tag());
    header.push(FLAG_CONTIGUOUS);
    header.extend_from_slice(&(rank as u32).to_le_bytes());
    for &d in tensor.dims() {
        header.extend_from_slice(&(d as u64).to_le_bytes());
    }

    let data = tensor.to_vec();
    let mut out = Vec::with_capacity(4 + 4 + header.len() + 8 + tensor.dtype().size_bytes() * data.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&(header.len() as u32).to_le_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(&(data.len() as u64).to_le_bytes());
    for v in data {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decodes one record from the front of `bytes`, returning the tensor and
/// the number of bytes consumed.
pub fn decode(bytes: &[u8]) -> Result<(Tensor, usize), TensorError> {
    let mut r = Reader { bytes, pos: 0 };
    if r.take(4)? != MAGIC {
        return Err(TensorError::codec("bad magic"));
    }
    let header_len = r.u32()? as usize;
    let header_start = r.pos;

    let version = r.u8()?;
    if version != VERSION {
        return Err(TensorError::codec(format!("unsupported version {version}")));
    }
    let tag = r.u8()?;
    let dtype = DType::from_tag(tag).ok_or_else(|| TensorError::codec(format!("unknown dtype tag {tag}")))?;
    if !dtype.is_supported() {
        return Err(TensorError::codec(format!("unsupported dtype {dtype}")));
    }
    let flags = r.u8()?;
    let rank = r.u32()? as usize;
    if rank > MAX_RANK {
        return Err(TensorError::codec(format!("rank {rank} exceeds {MAX_RANK}")));
    }
    let mut dims = Vec::with_capacity(rank);
    for _ in 0..rank {
        dims.push(r.len()?);
    }
    let layout = if flags & FLAG_CONTIGUOUS == 0 {
        let mut strides = Vec::with_capacity(rank);
        for _ in 0..rank {
            strides.push(r.i64()? as isize);
        }
        Some((strides, r.len()?))
    } else {
        None
    };
    if r.pos - header_start != header_len {
        return Err(TensorError::codec(format!(
            "header length {header_len} disagrees with {} parsed bytes",
            r.pos - header_start
        )));
    }

    let payload_len = r.len()?;
    let payload_bytes = payload_len
        .checked_mul(dtype.size_bytes())
        .ok_or_else(|| TensorError::codec("payload length overflows"))?;
    let payload = r.take(payload_bytes)?;
    let data: Vec<f32> = payload
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    let shape = Shape::new(dims);
    let tensor = match layout {
        None => Tensor::from_data(shape, data).map_err(|e| TensorError::codec(e.to_string()))?,
        Some((strides, offset)) => Tensor::from_layout("decode", data, shape, strides, offset)
            .map_err(|e| TensorError::codec(e.to_string()))?,
    };
    Ok((tensor, r.pos))
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], TensorError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| TensorError::codec(format!("truncated record at byte {}", self.pos)))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], TensorError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, TensorError> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32, TensorError> {
        self.array().map(u32::from_le_bytes)
    }

    fn i64(&mut self) -> Result<i64, TensorError> {
        self.array().map(i64::from_le_bytes)
    }

    fn len(&mut self) -> Result<usize, TensorError> {
        let v = self.array().map(u64::from_le_bytes)?;
        usize::try_from(v).map_err(|_| TensorError::codec(format!("length {v} does not fit in usize")))
    }
}
