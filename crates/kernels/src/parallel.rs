// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Fork-join helper for kernels whose outputs split into disjoint chunks.
//!
//! With the `parallel` feature the chunks are spread over scoped threads;
//! without it they run in order on the calling thread. Each chunk is
//! processed by the same closure either way, so per-element arithmetic and
//! accumulation order do not depend on the build.

/// Below this many output elements the serial loop is always used.
#[cfg(feature = "parallel")]
const MIN_PARALLEL_ELEMENTS: usize = 16 * 1024;

/// Calls `f(index, chunk)` for each `chunk_len`-sized piece of `data`.
///
/// The final chunk may be shorter than `chunk_len`. Returns only after
/// every chunk has been processed.
pub(crate) fn for_each_chunk<F>(data: &mut [f32], chunk_len: usize, f: F)
where
    F: Fn(usize, &mut [f32]) + Sync,
{
    if chunk_len == 0 || data.is_empty() {
        return;
    }

    #[cfg(feature = "parallel")]
    {
        let chunks = data.len().div_ceil(chunk_len);
        let workers = worker_count().min(chunks);
        if workers > 1 && data.len() >= MIN_PARALLEL_ELEMENTS {
            let per_worker = chunks.div_ceil(workers);
            std::thread::scope(|scope| {
                for (w, group) in data.chunks_mut(per_worker * chunk_len).enumerate() {
                    let f = &f;
                    scope.spawn(move || {
                        for (j, chunk) in group.chunks_mut(chunk_len).enumerate() {
                            f(w * per_worker + j, chunk);
                        }
                    });
                }
            });
            return;
        }
    }

    for (i, chunk) in data.chunks_mut(chunk_len).enumerate() {
        f(i, chunk);
    }
}

#[cfg(feature = "parallel")]
fn worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
