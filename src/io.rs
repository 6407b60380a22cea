use crate::deferred::{check_region, BlockSource, ChunkedArray};
use crate::error::{GeomedianError, Result};
use crate::labeled::{ArrayData, Attrs, Coordinate, LabeledArray, LabeledCollection};
use gdal::raster::RasterBand;
use gdal::{Dataset, DriverManager, Metadata};
use log::{debug, info, warn};
use ndarray::{Array2, ArrayD, Axis};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct RasterMetadata {
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    pub geotransform: [f64; 6],
    pub projection: String,
    pub nodata: Option<f64>,
}

impl RasterMetadata {
    /// Pixel-centre x coordinates
    pub fn x_coords(&self) -> Vec<f64> {
        let gt = &self.geotransform;
        (0..self.width)
            .map(|i| gt[0] + (i as f64 + 0.5) * gt[1])
            .collect()
    }

    /// Pixel-centre y coordinates
    pub fn y_coords(&self) -> Vec<f64> {
        let gt = &self.geotransform;
        (0..self.height)
            .map(|j| gt[3] + (j as f64 + 0.5) * gt[5])
            .collect()
    }
}

/// Extract metadata from a dataset without reading all data
pub fn extract_metadata_from_dataset(dataset: &Dataset) -> Result<RasterMetadata> {
    let rasterband: RasterBand = dataset.rasterband(1)?;

    let width = rasterband.x_size() as usize;
    let height = rasterband.y_size() as usize;

    if width == 0 || height == 0 {
        return Err(GeomedianError::InvalidDimensions(width, height));
    }

    Ok(RasterMetadata {
        width,
        height,
        band_count: dataset.raster_count() as usize,
        geotransform: dataset.geo_transform()?,
        projection: dataset.projection(),
        nodata: rasterband.no_data_value(),
    })
}

/// Read a window of one band as `(rows, cols)`
pub fn read_band_window(
    dataset: &Dataset,
    band_index: usize,
    rows: Range<usize>,
    cols: Range<usize>,
) -> Result<Array2<f32>> {
    let rasterband = dataset.rasterband(band_index)?;
    let read_width = cols.end - cols.start;
    let read_height = rows.end - rows.start;

    debug!(
        "Reading band {}: offset=({},{}), size=({},{})",
        band_index, cols.start, rows.start, read_width, read_height
    );

    let buffer = rasterband.read_as::<f32>(
        (cols.start as isize, rows.start as isize),
        (read_width, read_height),
        (read_width, read_height),
        None,
    )?;

    let data_vec: Vec<f32> = buffer.data().to_vec();
    let data = Array2::from_shape_vec((read_height, read_width), data_vec)?;
    Ok(data)
}

/// One spectral band across a list of single-date rasters, as `(y, x, time)`.
/// Every read opens the files it needs, so blocks can be read concurrently.
pub struct GdalTimeStack {
    paths: Vec<PathBuf>,
    band_index: usize,
    shape: Vec<usize>,
}

impl GdalTimeStack {
    pub fn new(paths: Vec<PathBuf>, band_index: usize, metadata: &RasterMetadata) -> Self {
        let shape = vec![metadata.height, metadata.width, paths.len()];
        Self {
            paths,
            band_index,
            shape,
        }
    }
}

impl BlockSource for GdalTimeStack {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn read(&self, region: &[Range<usize>]) -> Result<ArrayD<f32>> {
        check_region(&self.shape, region)?;
        let slices = self.paths[region[2].clone()]
            .iter()
            .map(|path| {
                let dataset = Dataset::open(path)?;
                read_band_window(&dataset, self.band_index, region[0].clone(), region[1].clone())
            })
            .collect::<Result<Vec<_>>>()?;

        if slices.is_empty() {
            let shape: Vec<usize> = region.iter().map(|r| r.end - r.start).collect();
            return Ok(ArrayD::zeros(shape));
        }
        let views: Vec<_> = slices.iter().map(|s| s.view()).collect();
        Ok(ndarray::stack(Axis(2), &views)?.into_dyn())
    }
}

fn time_label(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Load single-date rasters as a band collection over `(y, x, time)`.
///
/// Each input file is one time step and its raster bands are the spectral
/// bands. With `chunk_size` the bands are chunked spatially (one time step
/// per chunk) and read on demand; otherwise they are read up front.
pub fn load_time_stack(
    paths: &[PathBuf],
    band_names: Option<&[String]>,
    chunk_size: Option<usize>,
    nodata_override: Option<f64>,
) -> Result<(LabeledCollection, RasterMetadata)> {
    let first = paths
        .first()
        .ok_or_else(|| GeomedianError::MismatchedInputs("no input rasters given".to_string()))?;
    let first_dataset = Dataset::open(first)?;
    let metadata = extract_metadata_from_dataset(&first_dataset)?;

    for path in &paths[1..] {
        let other = extract_metadata_from_dataset(&Dataset::open(path)?)?;
        if (other.width, other.height, other.band_count)
            != (metadata.width, metadata.height, metadata.band_count)
        {
            return Err(GeomedianError::MismatchedInputs(format!(
                "{} is {}x{} with {} bands, {} is {}x{} with {} bands",
                first.display(),
                metadata.width,
                metadata.height,
                metadata.band_count,
                path.display(),
                other.width,
                other.height,
                other.band_count
            )));
        }
        if other.projection != metadata.projection {
            warn!(
                "{} has a different projection than {}, using the first",
                path.display(),
                first.display()
            );
        }
    }

    let names: Vec<String> = match band_names {
        Some(names) if names.len() != metadata.band_count => {
            return Err(GeomedianError::MismatchedInputs(format!(
                "{} band names given for {} raster bands",
                names.len(),
                metadata.band_count
            )));
        }
        Some(names) => names.to_vec(),
        None => (1..=metadata.band_count)
            .map(|i| {
                let description = first_dataset
                    .rasterband(i)
                    .ok()
                    .and_then(|b| b.description().ok())
                    .filter(|d| !d.is_empty());
                description.unwrap_or_else(|| format!("band_{:02}", i))
            })
            .collect(),
    };

    info!(
        "Loading {} time steps of {}x{} with bands {:?}",
        paths.len(),
        metadata.width,
        metadata.height,
        names
    );

    let times = Coordinate::Labels(paths.iter().map(|p| time_label(p)).collect());
    let mut collection = LabeledCollection::new();
    for (i, name) in names.iter().enumerate() {
        let band_index = i + 1;
        let band_nodata = nodata_override.or(first_dataset.rasterband(band_index)?.no_data_value());
        let source = GdalTimeStack::new(paths.to_vec(), band_index, &metadata);

        let data = match chunk_size {
            Some(size) => ArrayData::Chunked(ChunkedArray::with_chunk_shape(
                Arc::new(source),
                &[size, size, 1],
            )?),
            None => {
                let full: Vec<Range<usize>> = source.shape().iter().map(|&len| 0..len).collect();
                ArrayData::Eager(source.read(&full)?)
            }
        };

        let band = LabeledArray::new(vec!["y", "x", "time"], data)?
            .with_coord("y", Coordinate::Numeric(metadata.y_coords()))?
            .with_coord("x", Coordinate::Numeric(metadata.x_coords()))?
            .with_coord("time", times.clone())?
            .with_attrs(Attrs {
                nodata: band_nodata,
                crs: Some(metadata.projection.clone()),
                ..Default::default()
            });
        collection.insert(name.clone(), band);
    }

    Ok((collection, metadata))
}

/// Write a `(y, x)` band collection to a multi-band float32 GeoTIFF
pub fn write_collection(path: &str, collection: &LabeledCollection, metadata: &RasterMetadata) -> Result<()> {
    info!("Creating output raster: {}", path);

    let driver = DriverManager::get_driver_by_name("GTiff")?;

    let mut dataset = driver.create_with_band_type::<f32, _>(
        path,
        metadata.width,
        metadata.height,
        collection.len(),
    )?;

    dataset.set_geo_transform(&metadata.geotransform)?;
    dataset.set_projection(&metadata.projection)?;

    for (i, (name, band)) in collection.iter().enumerate() {
        let band_index = i + 1;
        debug!("Writing band {} ({})", band_index, name);

        let values = band.data().compute()?;
        let shape = values.shape().to_vec();
        if shape != [metadata.height, metadata.width] {
            return Err(GeomedianError::Shape(format!(
                "band '{}' has shape {:?}, output raster is {}x{}",
                name, shape, metadata.height, metadata.width
            )));
        }

        let mut raster_band = dataset.rasterband(band_index)?;

        // Standard layout is row-major, which is what GDAL expects
        let mut buffer = gdal::raster::Buffer::new(
            (metadata.width, metadata.height),
            values.as_standard_layout().iter().copied().collect(),
        );

        raster_band.write((0, 0), (metadata.width, metadata.height), &mut buffer)?;
        raster_band.set_description(name)?;
        raster_band.set_no_data_value(Some(f64::NAN))?;
    }

    info!("Successfully wrote {} bands to output", collection.len());
    Ok(())
}
