//! Lazily evaluated, block-partitioned arrays.
//!
//! A [`ChunkedArray`] pairs a [`BlockSource`] with a per-axis chunk layout.
//! Reading a region only touches that region of the source, so a stack that
//! does not fit in memory can be reduced one spatial block at a time.

use crate::chunking::{regular_chunks, validate_chunks, ChunkGrid};
use crate::error::{GeomedianError, Result};
use log::debug;
use ndarray::{ArrayD, Axis, IxDyn, Slice};
use rayon::prelude::*;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Anything that can produce an arbitrary rectangular region of an array.
pub trait BlockSource: Send + Sync {
    fn shape(&self) -> &[usize];

    /// Read `region` (one range per axis) into an owned array.
    fn read(&self, region: &[Range<usize>]) -> Result<ArrayD<f32>>;
}

/// Reject regions with the wrong rank or reaching past the array bounds.
pub fn check_region(shape: &[usize], region: &[Range<usize>]) -> Result<()> {
    if region.len() != shape.len() {
        return Err(GeomedianError::Shape(format!(
            "region has {} axes, array has {}",
            region.len(),
            shape.len()
        )));
    }
    for (axis, (r, &len)) in region.iter().zip(shape).enumerate() {
        if r.start > r.end || r.end > len {
            return Err(GeomedianError::Shape(format!(
                "region {:?} out of bounds for axis {} of length {}",
                r, axis, len
            )));
        }
    }
    Ok(())
}

fn region_shape(region: &[Range<usize>]) -> Vec<usize> {
    region.iter().map(|r| r.end - r.start).collect()
}

/// A materialized array served through the [`BlockSource`] interface.
pub struct InMemory {
    data: ArrayD<f32>,
}

impl InMemory {
    pub fn new(data: ArrayD<f32>) -> Self {
        Self { data }
    }
}

impl BlockSource for InMemory {
    fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    fn read(&self, region: &[Range<usize>]) -> Result<ArrayD<f32>> {
        check_region(self.shape(), region)?;
        let view = self
            .data
            .slice_each_axis(|ax| Slice::from(region[ax.axis.index()].clone()));
        Ok(view.to_owned())
    }
}

/// Axis permutation: output axis `i` is input axis `axes[i]`.
struct Transposed {
    inner: Arc<dyn BlockSource>,
    axes: Vec<usize>,
    shape: Vec<usize>,
}

impl BlockSource for Transposed {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn read(&self, region: &[Range<usize>]) -> Result<ArrayD<f32>> {
        check_region(&self.shape, region)?;
        let mut inner_region = vec![0..0; region.len()];
        for (out_axis, &in_axis) in self.axes.iter().enumerate() {
            inner_region[in_axis] = region[out_axis].clone();
        }
        let block = self.inner.read(&inner_region)?;
        Ok(block.permuted_axes(IxDyn(&self.axes)))
    }
}

/// Equal-shaped arrays joined along a new leading axis.
struct Stacked {
    parts: Vec<Arc<dyn BlockSource>>,
    shape: Vec<usize>,
}

impl BlockSource for Stacked {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn read(&self, region: &[Range<usize>]) -> Result<ArrayD<f32>> {
        check_region(&self.shape, region)?;
        let inner_region = &region[1..];
        if region[0].is_empty() {
            return Ok(ArrayD::zeros(IxDyn(&region_shape(region))));
        }
        let blocks = self.parts[region[0].clone()]
            .iter()
            .map(|part| part.read(inner_region))
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
        Ok(ndarray::stack(Axis(0), &views)?)
    }
}

/// A single index selected along one axis, removing that axis.
struct AxisIndex {
    inner: Arc<dyn BlockSource>,
    axis: usize,
    index: usize,
    shape: Vec<usize>,
}

impl BlockSource for AxisIndex {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn read(&self, region: &[Range<usize>]) -> Result<ArrayD<f32>> {
        check_region(&self.shape, region)?;
        let mut inner_region = region.to_vec();
        inner_region.insert(self.axis, self.index..self.index + 1);
        let block = self.inner.read(&inner_region)?;
        Ok(block.index_axis_move(Axis(self.axis), 0))
    }
}

/// Elementwise replacement of a sentinel value with NaN.
struct NodataToNan {
    inner: Arc<dyn BlockSource>,
    nodata: f32,
}

impl BlockSource for NodataToNan {
    fn shape(&self) -> &[usize] {
        self.inner.shape()
    }

    fn read(&self, region: &[Range<usize>]) -> Result<ArrayD<f32>> {
        let nodata = self.nodata;
        let mut block = self.inner.read(region)?;
        block.mapv_inplace(|v| if v == nodata { f32::NAN } else { v });
        Ok(block)
    }
}

/// A deferred array: chunk layout plus a lazily read backing source.
#[derive(Clone)]
pub struct ChunkedArray {
    source: Arc<dyn BlockSource>,
    chunks: Vec<Vec<usize>>,
}

impl fmt::Debug for ChunkedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedArray")
            .field("shape", &self.shape())
            .field("chunks", &self.chunks)
            .finish()
    }
}

impl ChunkedArray {
    pub fn new(source: Arc<dyn BlockSource>, chunks: Vec<Vec<usize>>) -> Result<Self> {
        let shape = source.shape();
        if chunks.len() != shape.len() {
            return Err(GeomedianError::Shape(format!(
                "{} chunk axes given for a {}-dimensional array",
                chunks.len(),
                shape.len()
            )));
        }
        for (axis, (axis_chunks, &len)) in chunks.iter().zip(shape).enumerate() {
            validate_chunks(axis, axis_chunks, len)?;
        }
        Ok(Self { source, chunks })
    }

    /// Regular chunking with at most `chunk_shape[i]` elements along axis `i`.
    pub fn with_chunk_shape(source: Arc<dyn BlockSource>, chunk_shape: &[usize]) -> Result<Self> {
        let shape = source.shape();
        if chunk_shape.len() != shape.len() {
            return Err(GeomedianError::Shape(format!(
                "chunk shape {:?} does not match array shape {:?}",
                chunk_shape, shape
            )));
        }
        let chunks = shape
            .iter()
            .zip(chunk_shape)
            .map(|(&len, &size)| regular_chunks(len, size))
            .collect();
        Self::new(source, chunks)
    }

    pub fn from_array(data: ArrayD<f32>, chunk_shape: &[usize]) -> Result<Self> {
        Self::with_chunk_shape(Arc::new(InMemory::new(data)), chunk_shape)
    }

    pub fn shape(&self) -> &[usize] {
        self.source.shape()
    }

    pub fn ndim(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunks(&self) -> &[Vec<usize>] {
        &self.chunks
    }

    /// Largest chunk along each axis.
    pub fn chunksize(&self) -> Vec<usize> {
        self.chunks
            .iter()
            .map(|c| c.iter().copied().max().unwrap_or(0))
            .collect()
    }

    /// Number of independent block tasks needed to compute the array.
    pub fn num_blocks(&self) -> usize {
        self.grid().total_blocks
    }

    pub fn grid(&self) -> ChunkGrid {
        ChunkGrid::new(&self.chunks)
    }

    /// Merge all chunks along each of `axes` into a single chunk.
    pub fn merge_axes(&self, axes: &[usize]) -> Self {
        let mut chunks = self.chunks.clone();
        for &axis in axes {
            chunks[axis] = vec![self.shape()[axis]];
        }
        Self {
            source: Arc::clone(&self.source),
            chunks,
        }
    }

    pub fn transpose(&self, axes: &[usize]) -> Result<Self> {
        let mut sorted = axes.to_vec();
        sorted.sort_unstable();
        if sorted != (0..self.ndim()).collect::<Vec<_>>() {
            return Err(GeomedianError::Shape(format!(
                "invalid axis permutation {:?} for {} axes",
                axes,
                self.ndim()
            )));
        }
        let shape = axes.iter().map(|&a| self.shape()[a]).collect();
        let chunks = axes.iter().map(|&a| self.chunks[a].clone()).collect();
        let source = Transposed {
            inner: Arc::clone(&self.source),
            axes: axes.to_vec(),
            shape,
        };
        Self::new(Arc::new(source), chunks)
    }

    /// Join equal-shaped arrays along a new leading axis, one chunk per part.
    pub fn stack(parts: &[ChunkedArray]) -> Result<Self> {
        let first = parts.first().ok_or(GeomedianError::EmptyCollection)?;
        if let Some(other) = parts.iter().find(|p| p.shape() != first.shape()) {
            return Err(GeomedianError::Shape(format!(
                "cannot stack arrays of shapes {:?} and {:?}",
                first.shape(),
                other.shape()
            )));
        }
        let mut shape = vec![parts.len()];
        shape.extend_from_slice(first.shape());
        let mut chunks = vec![vec![1; parts.len()]];
        chunks.extend_from_slice(&first.chunks);
        let source = Stacked {
            parts: parts.iter().map(|p| Arc::clone(&p.source)).collect(),
            shape,
        };
        Self::new(Arc::new(source), chunks)
    }

    /// Select `index` along `axis`, dropping that axis.
    pub fn index_axis(&self, axis: usize, index: usize) -> Result<Self> {
        if axis >= self.ndim() || index >= self.shape()[axis] {
            return Err(GeomedianError::Shape(format!(
                "index {} out of bounds for axis {} of shape {:?}",
                index,
                axis,
                self.shape()
            )));
        }
        let mut shape = self.shape().to_vec();
        shape.remove(axis);
        let mut chunks = self.chunks.clone();
        chunks.remove(axis);
        let source = AxisIndex {
            inner: Arc::clone(&self.source),
            axis,
            index,
            shape,
        };
        Self::new(Arc::new(source), chunks)
    }

    pub fn replace_nodata(&self, nodata: f32) -> Self {
        Self {
            source: Arc::new(NodataToNan {
                inner: Arc::clone(&self.source),
                nodata,
            }),
            chunks: self.chunks.clone(),
        }
    }

    pub fn read(&self, region: &[Range<usize>]) -> Result<ArrayD<f32>> {
        self.source.read(region)
    }

    /// Evaluate every block in parallel and assemble the full array.
    pub fn compute(&self) -> Result<ArrayD<f32>> {
        let grid = self.grid();
        debug!(
            "Computing {} blocks for array of shape {:?}",
            grid.total_blocks,
            self.shape()
        );

        let blocks: Vec<(Vec<Range<usize>>, ArrayD<f32>)> = grid
            .iter()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|(_, bounds)| -> Result<_> {
                let block = self.source.read(&bounds.region)?;
                Ok((bounds.region, block))
            })
            .collect::<Result<_>>()?;

        let mut out = ArrayD::<f32>::zeros(IxDyn(self.shape()));
        for (region, block) in blocks {
            out.slice_each_axis_mut(|ax| Slice::from(region[ax.axis.index()].clone()))
                .assign(&block);
        }
        Ok(out)
    }
}
