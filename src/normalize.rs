//! Input normalization: bring any supported input into a 4-D
//! `(y, x, band, time)` stack and remember how to wrap the result back up.

use crate::deferred::{ChunkedArray, InMemory};
use crate::error::{GeomedianError, Result};
use crate::labeled::{ArrayData, Attrs, Coordinate, LabeledArray, LabeledCollection};
use log::{debug, info};
use ndarray::{ArrayD, Axis, IxDyn};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const BAND_DIM: &str = "band";
pub const DEFAULT_AXIS: &str = "time";

/// The three input flavours accepted by the reducer.
#[derive(Debug, Clone)]
pub enum StackInput {
    /// Unlabeled 4-D array in `(y, x, band, time)` order.
    Raw(ArrayData),
    /// Labeled 4-D array with the reduction axis last.
    Stacked(LabeledArray),
    /// Band name to 3-D labeled array.
    Collection(LabeledCollection),
}

impl From<ArrayD<f32>> for StackInput {
    fn from(a: ArrayD<f32>) -> Self {
        StackInput::Raw(ArrayData::Eager(a))
    }
}

impl From<ChunkedArray> for StackInput {
    fn from(c: ChunkedArray) -> Self {
        StackInput::Raw(ArrayData::Chunked(c))
    }
}

impl From<LabeledArray> for StackInput {
    fn from(a: LabeledArray) -> Self {
        StackInput::Stacked(a)
    }
}

impl From<LabeledCollection> for StackInput {
    fn from(c: LabeledCollection) -> Self {
        StackInput::Collection(c)
    }
}

/// Labels of a stacked input, needed to rebuild a labeled result.
#[derive(Debug, Clone)]
pub struct StackLabels {
    pub dims: Vec<String>,
    pub coords: BTreeMap<String, Coordinate>,
    pub attrs: Attrs,
}

/// A 4-D `(y, x, band, time)` array plus what the caller originally passed.
#[derive(Debug, Clone)]
pub struct CanonicalStack {
    pub data: ArrayData,
    /// Present only when every band agreed on one value.
    pub nodata: Option<f64>,
    labels: Option<StackLabels>,
    source_bands: Option<Vec<(String, Attrs)>>,
}

/// Reduced `(y, x, band)` output in the same flavour as the input.
#[derive(Debug, Clone)]
pub enum GeomedianResult {
    Raw(ArrayData),
    Stacked(LabeledArray),
    Collection(LabeledCollection),
}

impl GeomedianResult {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Raw(_) => "raw",
            Self::Stacked(_) => "stacked",
            Self::Collection(_) => "collection",
        }
    }

    /// The band collection, for results of collection inputs.
    pub fn into_collection(self) -> Result<LabeledCollection> {
        match self {
            Self::Collection(collection) => Ok(collection),
            other => Err(GeomedianError::UnexpectedResult {
                expected: "collection",
                got: other.kind(),
            }),
        }
    }
}

impl CanonicalStack {
    pub fn labels(&self) -> Option<&StackLabels> {
        self.labels.as_ref()
    }

    /// Wrap a `(y, x, band)` result into the caller's container flavour.
    pub fn rewrap(&self, data: ArrayData) -> Result<GeomedianResult> {
        let labels = match &self.labels {
            None => return Ok(GeomedianResult::Raw(data)),
            Some(labels) => labels,
        };

        let dims = &labels.dims[..3];
        let mut out = LabeledArray::new(dims.to_vec(), data)?;
        for dim in dims {
            if let Some(coord) = labels.coords.get(dim) {
                out = out.with_coord(dim, coord.clone())?;
            }
        }

        let source_bands = match &self.source_bands {
            None => {
                out.attrs.update(&labels.attrs);
                return Ok(GeomedianResult::Stacked(out));
            }
            Some(bands) => bands,
        };

        // Split the synthesized band axis back into one array per band
        let band_axis = 2;
        let mut collection = LabeledCollection::new();
        for (i, (name, attrs)) in source_bands.iter().enumerate() {
            let mut band = LabeledArray::new(dims[..2].to_vec(), out.data().index_axis(band_axis, i)?)?;
            for dim in &dims[..2] {
                if let Some(coord) = out.coord(dim) {
                    band = band.with_coord(dim, coord.clone())?;
                }
            }
            band.attrs.update(attrs);
            collection.insert(name.clone(), band);
        }
        Ok(GeomedianResult::Collection(collection))
    }
}

/// Resolve one nodata value shared by every band, or `None` if they differ.
fn resolve_nodata(collection: &LabeledCollection) -> Option<f64> {
    let mut values = collection.iter().map(|(_, b)| b.attrs.nodata);
    let first = values.next()?;
    let agree = values.all(|v| match (v, first) {
        (Some(a), Some(b)) => a == b || (a.is_nan() && b.is_nan()),
        (None, None) => true,
        _ => false,
    });
    if agree {
        first
    } else {
        None
    }
}

/// Stack a band collection into one `(y, x, band, axis)` labeled array.
///
/// Every band must share the same three dimensions and contain `axis`. The
/// non-reduction dimensions keep their original order. The band coordinate
/// lists the collection's keys in insertion order. Chunked bands produce a
/// chunked result and nothing is read.
pub fn reshape_for_geomedian(collection: &LabeledCollection, axis: &str) -> Result<LabeledArray> {
    let (first_name, first) = collection
        .iter()
        .next()
        .ok_or(GeomedianError::EmptyCollection)?;

    for (name, band) in collection.iter() {
        if band.dims() != first.dims() || band.shape() != first.shape() {
            return Err(GeomedianError::InconsistentDimensions(format!(
                "band '{}' has dims {:?} shape {:?}, band '{}' has dims {:?} shape {:?}",
                first_name,
                first.dims(),
                first.shape(),
                name,
                band.dims(),
                band.shape()
            )));
        }
    }

    let band_dims = first.dims();
    if band_dims.len() != 3 {
        return Err(GeomedianError::UnsupportedRank(band_dims.len()));
    }

    let axis_pos = band_dims
        .iter()
        .position(|d| d == axis)
        .ok_or_else(|| GeomedianError::MissingAxis {
            axis: axis.to_string(),
            dims: band_dims.to_vec(),
        })?;

    // Stacked layout is (band, d0, d1, d2); move band and axis to the end
    let mut order: Vec<usize> = (0..3).filter(|&i| i != axis_pos).map(|i| i + 1).collect();
    order.push(0);
    order.push(axis_pos + 1);

    let mut dims: Vec<String> = order[..2]
        .iter()
        .map(|&i| band_dims[i - 1].clone())
        .collect();
    dims.push(BAND_DIM.to_string());
    dims.push(axis.to_string());

    let nodata = resolve_nodata(collection);
    if nodata.is_none() {
        debug!("Bands do not agree on a nodata value, leaving it unresolved");
    }

    let any_chunked = collection.iter().any(|(_, b)| b.data().is_chunked());
    let data = if any_chunked {
        let template = collection
            .iter()
            .find_map(|(_, b)| match b.data() {
                ArrayData::Chunked(c) => Some(c.chunks().to_vec()),
                ArrayData::Eager(_) => None,
            })
            .unwrap_or_default();
        let parts = collection
            .iter()
            .map(|(_, b)| match b.data() {
                ArrayData::Chunked(c) => Ok(c.clone()),
                ArrayData::Eager(a) => ChunkedArray::new(
                    Arc::new(InMemory::new(a.clone())),
                    template.clone(),
                ),
            })
            .collect::<Result<Vec<_>>>()?;
        ArrayData::Chunked(ChunkedArray::stack(&parts)?.transpose(&order)?)
    } else {
        let arrays: Vec<&ArrayD<f32>> = collection
            .iter()
            .filter_map(|(_, b)| match b.data() {
                ArrayData::Eager(a) => Some(a),
                ArrayData::Chunked(_) => None,
            })
            .collect();
        let views: Vec<_> = arrays.iter().map(|a| a.view()).collect();
        let stacked = ndarray::stack(Axis(0), &views)?;
        ArrayData::Eager(stacked.permuted_axes(IxDyn(&order)))
    };

    let mut stacked = LabeledArray::new(dims.clone(), data)?;
    for dim in band_dims {
        if let Some(coord) = first.coord(dim) {
            stacked = stacked.with_coord(dim, coord.clone())?;
        }
    }
    let band_names = collection.names().map(str::to_string).collect();
    stacked = stacked.with_coord(BAND_DIM, Coordinate::Labels(band_names))?;
    if nodata.is_some() {
        stacked.attrs.nodata = nodata;
    }

    debug!("Reshaped {} bands to {:?} {:?}", collection.len(), dims, stacked.shape());
    Ok(stacked)
}

/// Validate `input` and produce its canonical `(y, x, band, time)` stack.
///
/// `axis` names the reduction dimension. For a pre-stacked array `None`
/// skips the trailing-axis check; for a collection it means `"time"`.
pub fn normalize(input: StackInput, axis: Option<&str>) -> Result<CanonicalStack> {
    match input {
        StackInput::Raw(data) => {
            if data.ndim() != 4 {
                return Err(GeomedianError::Shape(format!(
                    "expect 4 dimensions on input: y,x,band,time (got shape {:?})",
                    data.shape()
                )));
            }
            Ok(CanonicalStack {
                data,
                nodata: None,
                labels: None,
                source_bands: None,
            })
        }
        StackInput::Stacked(array) => {
            if array.ndim() != 4 {
                return Err(GeomedianError::Shape(format!(
                    "expect 4 dimensions on input: y,x,band,time (got dims {:?})",
                    array.dims()
                )));
            }
            if let Some(axis) = axis {
                if array.dims()[3] != axis {
                    return Err(GeomedianError::DimensionOrder {
                        axis: axis.to_string(),
                        dims: array.dims().to_vec(),
                    });
                }
            }
            Ok(stack_from_labeled(array, None))
        }
        StackInput::Collection(collection) => {
            let axis = axis.unwrap_or(DEFAULT_AXIS);
            let stacked = reshape_for_geomedian(&collection, axis)?;
            let source_bands = collection
                .iter()
                .map(|(name, band)| (name.to_string(), band.attrs.clone()))
                .collect();
            info!(
                "Normalized collection of {} bands over axis '{}'",
                collection.len(),
                axis
            );
            Ok(stack_from_labeled(stacked, Some(source_bands)))
        }
    }
}

fn stack_from_labeled(array: LabeledArray, source_bands: Option<Vec<(String, Attrs)>>) -> CanonicalStack {
    let labels = StackLabels {
        dims: array.dims().to_vec(),
        coords: array.coords().clone(),
        attrs: array.attrs.clone(),
    };
    CanonicalStack {
        nodata: array.attrs.nodata,
        data: array.into_data(),
        labels: Some(labels),
        source_bands,
    }
}
