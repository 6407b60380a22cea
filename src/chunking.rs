use crate::error::{GeomedianError, Result};
use log::debug;
use std::ops::Range;

/// Split `len` into chunks of `size`, the last one clipped at the edge.
pub fn regular_chunks(len: usize, size: usize) -> Vec<usize> {
    if len == 0 {
        return vec![0];
    }
    let size = size.clamp(1, len);
    let mut chunks = vec![size; len / size];
    if len % size != 0 {
        chunks.push(len % size);
    }
    chunks
}

/// Check that `chunks` tiles an axis of length `len` exactly.
pub fn validate_chunks(axis: usize, chunks: &[usize], len: usize) -> Result<()> {
    let total: usize = chunks.iter().sum();
    let tiles = if len == 0 {
        total == 0 && !chunks.is_empty()
    } else {
        total == len && chunks.iter().all(|&c| c > 0)
    };
    if !tiles {
        return Err(GeomedianError::InvalidChunks {
            axis,
            chunks: chunks.to_vec(),
            len,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockBounds {
    /// Block coordinate along each axis
    pub index: Vec<usize>,
    /// Element range covered along each axis
    pub region: Vec<Range<usize>>,
}

impl BlockBounds {
    pub fn shape(&self) -> Vec<usize> {
        self.region.iter().map(|r| r.end - r.start).collect()
    }
}

/// Block layout of an n-dimensional array with per-axis chunk sizes.
#[derive(Debug, Clone)]
pub struct ChunkGrid {
    offsets: Vec<Vec<usize>>,
    pub num_blocks: Vec<usize>,
    pub total_blocks: usize,
}

impl ChunkGrid {
    pub fn new(chunks: &[Vec<usize>]) -> Self {
        let offsets: Vec<Vec<usize>> = chunks
            .iter()
            .map(|axis_chunks| {
                let mut acc = 0;
                let mut offs = Vec::with_capacity(axis_chunks.len() + 1);
                offs.push(0);
                for c in axis_chunks {
                    acc += c;
                    offs.push(acc);
                }
                offs
            })
            .collect();
        let num_blocks: Vec<usize> = chunks.iter().map(Vec::len).collect();
        let total_blocks = num_blocks.iter().product();

        debug!(
            "ChunkGrid: {:?} blocks per axis ({} total)",
            num_blocks, total_blocks
        );

        Self {
            offsets,
            num_blocks,
            total_blocks,
        }
    }

    pub fn iter(&self) -> ChunkIterator<'_> {
        ChunkIterator::new(self)
    }

    pub fn get_block_bounds(&self, block_idx: usize) -> BlockBounds {
        // Row-major: last axis varies fastest
        let mut rem = block_idx;
        let mut index = vec![0; self.num_blocks.len()];
        for axis in (0..self.num_blocks.len()).rev() {
            index[axis] = rem % self.num_blocks[axis];
            rem /= self.num_blocks[axis];
        }

        let region = index
            .iter()
            .zip(&self.offsets)
            .map(|(&i, offs)| offs[i]..offs[i + 1])
            .collect();

        BlockBounds { index, region }
    }

    /// Blocks sharing at least one element with `region`.
    pub fn overlapping(&self, region: &[Range<usize>]) -> Vec<(usize, BlockBounds)> {
        self.iter()
            .filter(|(_, bounds)| {
                bounds
                    .region
                    .iter()
                    .zip(region)
                    .all(|(b, r)| b.start < r.end && r.start < b.end)
            })
            .collect()
    }
}

pub struct ChunkIterator<'a> {
    grid: &'a ChunkGrid,
    current_idx: usize,
}

impl<'a> ChunkIterator<'a> {
    fn new(grid: &'a ChunkGrid) -> Self {
        Self {
            grid,
            current_idx: 0,
        }
    }
}

impl<'a> Iterator for ChunkIterator<'a> {
    type Item = (usize, BlockBounds);

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_idx < self.grid.total_blocks {
            let bounds = self.grid.get_block_bounds(self.current_idx);
            let idx = self.current_idx;
            self.current_idx += 1;
            Some((idx, bounds))
        } else {
            None
        }
    }
}
