//! In-memory labeled arrays: named dimensions, optional coordinates and
//! per-array attributes, backed by either an eager or a chunked array.

use crate::deferred::ChunkedArray;
use crate::error::{GeomedianError, Result};
use log::debug;
use ndarray::{ArrayD, Axis};
use std::collections::BTreeMap;

/// Coordinate values along one dimension.
#[derive(Debug, Clone, PartialEq)]
pub enum Coordinate {
    Numeric(Vec<f64>),
    Labels(Vec<String>),
}

impl Coordinate {
    pub fn len(&self) -> usize {
        match self {
            Coordinate::Numeric(v) => v.len(),
            Coordinate::Labels(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-array metadata carried alongside the data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attrs {
    pub nodata: Option<f64>,
    pub crs: Option<String>,
    pub extra: BTreeMap<String, String>,
}

impl Attrs {
    /// Overlay every attribute set in `other` onto `self`.
    pub fn update(&mut self, other: &Attrs) {
        if other.nodata.is_some() {
            self.nodata = other.nodata;
        }
        if other.crs.is_some() {
            self.crs = other.crs.clone();
        }
        self.extra
            .extend(other.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// Array storage: materialized, or chunked and evaluated on demand.
#[derive(Debug, Clone)]
pub enum ArrayData {
    Eager(ArrayD<f32>),
    Chunked(ChunkedArray),
}

impl ArrayData {
    pub fn shape(&self) -> Vec<usize> {
        match self {
            ArrayData::Eager(a) => a.shape().to_vec(),
            ArrayData::Chunked(c) => c.shape().to_vec(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self, ArrayData::Chunked(_))
    }

    /// Materialize the data, computing every block of a chunked array.
    pub fn compute(&self) -> Result<ArrayD<f32>> {
        match self {
            ArrayData::Eager(a) => Ok(a.clone()),
            ArrayData::Chunked(c) => c.compute(),
        }
    }

    /// Select `index` along `axis`, dropping that axis.
    pub fn index_axis(&self, axis: usize, index: usize) -> Result<ArrayData> {
        match self {
            ArrayData::Eager(a) => {
                if axis >= a.ndim() || index >= a.shape()[axis] {
                    return Err(GeomedianError::Shape(format!(
                        "index {} out of bounds for axis {} of shape {:?}",
                        index,
                        axis,
                        a.shape()
                    )));
                }
                Ok(ArrayData::Eager(a.index_axis(Axis(axis), index).to_owned()))
            }
            ArrayData::Chunked(c) => Ok(ArrayData::Chunked(c.index_axis(axis, index)?)),
        }
    }
}

impl From<ArrayD<f32>> for ArrayData {
    fn from(a: ArrayD<f32>) -> Self {
        ArrayData::Eager(a)
    }
}

impl From<ChunkedArray> for ArrayData {
    fn from(c: ChunkedArray) -> Self {
        ArrayData::Chunked(c)
    }
}

#[derive(Debug, Clone)]
pub struct LabeledArray {
    dims: Vec<String>,
    coords: BTreeMap<String, Coordinate>,
    data: ArrayData,
    pub attrs: Attrs,
}

impl LabeledArray {
    pub fn new<S: Into<String>>(dims: Vec<S>, data: impl Into<ArrayData>) -> Result<Self> {
        let dims: Vec<String> = dims.into_iter().map(Into::into).collect();
        let data = data.into();
        if dims.len() != data.ndim() {
            return Err(GeomedianError::Shape(format!(
                "{} dimension names given for {}-dimensional data",
                dims.len(),
                data.ndim()
            )));
        }
        Ok(Self {
            dims,
            coords: BTreeMap::new(),
            data,
            attrs: Attrs::default(),
        })
    }

    /// Attach coordinates to `dim`; length must match that dimension.
    pub fn with_coord(mut self, dim: &str, coord: Coordinate) -> Result<Self> {
        let len = self.dim_len(dim).ok_or_else(|| GeomedianError::MissingAxis {
            axis: dim.to_string(),
            dims: self.dims.clone(),
        })?;
        if coord.len() != len {
            return Err(GeomedianError::Shape(format!(
                "coordinate for '{}' has {} values, dimension has {}",
                dim,
                coord.len(),
                len
            )));
        }
        self.coords.insert(dim.to_string(), coord);
        Ok(self)
    }

    pub fn with_attrs(mut self, attrs: Attrs) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn shape(&self) -> Vec<usize> {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn dim_len(&self, dim: &str) -> Option<usize> {
        let pos = self.dims.iter().position(|d| d == dim)?;
        Some(self.shape()[pos])
    }

    pub fn coord(&self, dim: &str) -> Option<&Coordinate> {
        self.coords.get(dim)
    }

    pub fn coords(&self) -> &BTreeMap<String, Coordinate> {
        &self.coords
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn into_data(self) -> ArrayData {
        self.data
    }
}

/// Ordered mapping from band name to labeled array.
#[derive(Debug, Clone, Default)]
pub struct LabeledCollection {
    bands: Vec<(String, LabeledArray)>,
}

impl LabeledCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a band; an existing band of the same name is replaced in place.
    pub fn insert(&mut self, name: impl Into<String>, band: LabeledArray) {
        let name = name.into();
        match self.bands.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = band,
            None => self.bands.push((name, band)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&LabeledArray> {
        self.bands.iter().find(|(n, _)| n == name).map(|(_, b)| b)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bands.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LabeledArray)> {
        self.bands.iter().map(|(n, b)| (n.as_str(), b))
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }
}

impl FromIterator<(String, LabeledArray)> for LabeledCollection {
    fn from_iter<I: IntoIterator<Item = (String, LabeledArray)>>(iter: I) -> Self {
        let mut collection = LabeledCollection::new();
        for (name, band) in iter {
            collection.insert(name, band);
        }
        collection
    }
}

/// Replace each band's nodata sentinel with NaN and clear its `nodata`
/// attribute. Chunked bands stay chunked.
pub fn mask_invalid_data(collection: &LabeledCollection) -> LabeledCollection {
    collection
        .iter()
        .map(|(name, band)| {
            let mut band = band.clone();
            if let Some(nodata) = band.attrs.nodata.take() {
                debug!("Masking nodata value {} in band '{}'", nodata, name);
                let nodata = nodata as f32;
                band.data = match band.data {
                    ArrayData::Eager(a) => {
                        ArrayData::Eager(a.mapv(|v| if v == nodata { f32::NAN } else { v }))
                    }
                    ArrayData::Chunked(c) => ArrayData::Chunked(c.replace_nodata(nodata)),
                };
            }
            (name.to_string(), band)
        })
        .collect()
}
