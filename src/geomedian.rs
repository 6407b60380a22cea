use crate::chunking::{BlockBounds, ChunkGrid};
use crate::deferred::{check_region, BlockSource, ChunkedArray};
use crate::error::{GeomedianError, Result};
use crate::labeled::ArrayData;
use crate::normalize::{normalize, GeomedianResult, StackInput};
use log::{debug, info};
use ndarray::{s, Array2, Array3, ArrayD, ArrayView2, ArrayView4, Ix4};
use rayon::prelude::*;
use std::ops::Range;
use std::sync::{Arc, OnceLock};

/// Tuning options for the per-pixel solver.
#[derive(Debug, Clone, PartialEq)]
pub struct GeomedianOptions {
    /// Upper bound on Weiszfeld iterations per pixel
    pub maxiters: usize,
    /// Stop once the estimate moves less than this
    pub eps: f64,
    /// Worker threads for the pixel loop; `None` uses the current rayon pool
    pub num_threads: Option<usize>,
}

impl Default for GeomedianOptions {
    fn default() -> Self {
        Self {
            maxiters: 1000,
            eps: 1e-4,
            num_threads: None,
        }
    }
}

impl GeomedianOptions {
    pub fn validate(&self) -> Result<()> {
        if self.maxiters == 0 {
            return Err(GeomedianError::InvalidOption {
                name: "maxiters",
                reason: "must be at least 1".to_string(),
            });
        }
        if !self.eps.is_finite() || self.eps < 0.0 {
            return Err(GeomedianError::InvalidOption {
                name: "eps",
                reason: format!("must be finite and non-negative, got {}", self.eps),
            });
        }
        if self.num_threads == Some(0) {
            return Err(GeomedianError::InvalidOption {
                name: "num_threads",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn is_missing(value: f32, nodata: Option<f32>) -> bool {
    value.is_nan() || nodata.map_or(false, |nd| value == nd)
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Geometric median of one pixel's `(band, time)` observations.
///
/// A time step is skipped if any band is NaN or equals `nodata`. With no
/// valid time steps every band is NaN.
pub fn pixel_geomedian(
    obs: ArrayView2<f32>,
    nodata: Option<f32>,
    options: &GeomedianOptions,
) -> Vec<f32> {
    let nbands = obs.nrows();

    let points: Vec<Vec<f64>> = obs
        .columns()
        .into_iter()
        .filter(|col| col.iter().all(|&v| !is_missing(v, nodata)))
        .map(|col| col.iter().map(|&v| v as f64).collect())
        .collect();

    if points.is_empty() {
        return vec![f32::NAN; nbands];
    }

    // Start from the coordinate-wise mean
    let mut estimate = vec![0.0f64; nbands];
    for p in &points {
        for (e, v) in estimate.iter_mut().zip(p) {
            *e += v;
        }
    }
    let n = points.len() as f64;
    estimate.iter_mut().for_each(|e| *e /= n);

    let mut next = vec![0.0f64; nbands];
    let mut pull = vec![0.0f64; nbands];
    for _ in 0..options.maxiters {
        next.iter_mut().for_each(|v| *v = 0.0);
        pull.iter_mut().for_each(|v| *v = 0.0);
        let mut total_weight = 0.0;
        let mut coincident = 0usize;

        for p in &points {
            let d = distance(p, &estimate);
            if d == 0.0 {
                coincident += 1;
                continue;
            }
            let w = 1.0 / d;
            for ((acc, r), (v, e)) in next.iter_mut().zip(pull.iter_mut()).zip(p.iter().zip(&estimate)) {
                *acc += w * v;
                *r += w * (v - e);
            }
            total_weight += w;
        }

        // Every observation sits on the estimate
        if total_weight == 0.0 {
            break;
        }
        next.iter_mut().for_each(|v| *v /= total_weight);

        // Vardi-Zhang step when the estimate lands on observations: stay put
        // unless the pull of the others outweighs their multiplicity
        if coincident > 0 {
            let r = pull.iter().map(|v| v * v).sum::<f64>().sqrt();
            let keep = (coincident as f64 / r).min(1.0);
            for (v, e) in next.iter_mut().zip(&estimate) {
                *v = (1.0 - keep) * *v + keep * e;
            }
        }

        let step = distance(&next, &estimate);
        std::mem::swap(&mut estimate, &mut next);
        if step < options.eps {
            break;
        }
    }

    estimate.into_iter().map(|v| v as f32).collect()
}

/// Per-pixel geometric median of a `(y, x, band, time)` array.
///
/// Rows are solved in parallel, in a dedicated pool when
/// `options.num_threads` is set.
pub fn nangeomedian(
    data: ArrayView4<f32>,
    nodata: Option<f32>,
    options: &GeomedianOptions,
) -> Result<Array3<f32>> {
    options.validate()?;
    let (nrows, ncols, nbands, _) = data.dim();

    let solve = || -> Result<Array3<f32>> {
        let rows: Vec<Vec<f32>> = (0..nrows)
            .into_par_iter()
            .map(|row| {
                let mut out = Vec::with_capacity(ncols * nbands);
                for col in 0..ncols {
                    let obs = data.slice(s![row, col, .., ..]);
                    out.extend(pixel_geomedian(obs, nodata, options));
                }
                out
            })
            .collect();

        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        Ok(Array3::from_shape_vec((nrows, ncols, nbands), flat)?)
    };

    match options.num_threads {
        Some(n) => {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(n).build()?;
            pool.install(solve)
        }
        None => solve(),
    }
}

/// Block task source for the chunked reduction. Each spatial block is
/// solved across the full band and time extent at most once; reads of any
/// band or sub-region are served from the solved blocks.
struct GeomedianBlocks {
    input: ChunkedArray,
    nodata: Option<f32>,
    options: GeomedianOptions,
    shape: Vec<usize>,
    grid: ChunkGrid,
    solved: Vec<OnceLock<Array3<f32>>>,
}

impl GeomedianBlocks {
    fn new(input: ChunkedArray, nodata: Option<f32>, options: &GeomedianOptions) -> Self {
        let in_shape = input.shape();
        let shape = in_shape[..3].to_vec();
        let grid = ChunkGrid::new(&input.chunks()[..2]);
        let solved = (0..grid.total_blocks).map(|_| OnceLock::new()).collect();
        Self {
            input,
            nodata,
            options: options.clone(),
            shape,
            grid,
            solved,
        }
    }

    fn solved_block(&self, block_idx: usize, bounds: &BlockBounds) -> Result<&Array3<f32>> {
        if let Some(done) = self.solved[block_idx].get() {
            return Ok(done);
        }
        let in_shape = self.input.shape();
        let in_region = vec![
            bounds.region[0].clone(),
            bounds.region[1].clone(),
            0..in_shape[2],
            0..in_shape[3],
        ];
        debug!("Solving block y={:?} x={:?}", bounds.region[0], bounds.region[1]);

        let block = self.input.read(&in_region)?;
        let block = block.view().into_dimensionality::<Ix4>()?;
        let out = nangeomedian(block, self.nodata, &self.options)?;
        // A concurrent reader may have filled the slot first; keep that one
        Ok(self.solved[block_idx].get_or_init(|| out))
    }
}

impl BlockSource for GeomedianBlocks {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn read(&self, region: &[Range<usize>]) -> Result<ArrayD<f32>> {
        check_region(&self.shape, region)?;
        let (rows, cols, bands) = (&region[0], &region[1], &region[2]);
        let mut out = Array3::<f32>::zeros((rows.len(), cols.len(), bands.len()));

        for (block_idx, bounds) in self.grid.overlapping(&region[..2]) {
            let solved = self.solved_block(block_idx, &bounds)?;
            let (by, bx) = (&bounds.region[0], &bounds.region[1]);
            let y0 = rows.start.max(by.start);
            let y1 = rows.end.min(by.end);
            let x0 = cols.start.max(bx.start);
            let x1 = cols.end.min(bx.end);
            out.slice_mut(s![y0 - rows.start..y1 - rows.start, x0 - cols.start..x1 - cols.start, ..])
                .assign(&solved.slice(s![
                    y0 - by.start..y1 - by.start,
                    x0 - bx.start..x1 - bx.start,
                    bands.start..bands.end
                ]));
        }
        Ok(out.into_dyn())
    }
}

/// Build the deferred per-block reduction of a chunked `(y, x, band, time)`
/// array. Band and time are merged into single chunks; spatial chunks are
/// kept and each becomes one independent task.
pub fn deferred_geomedian(
    input: &ChunkedArray,
    nodata: Option<f32>,
    options: &GeomedianOptions,
) -> Result<ChunkedArray> {
    if input.ndim() != 4 {
        return Err(GeomedianError::Shape(format!(
            "expect 4 dimensions on input: y,x,band,time (got shape {:?})",
            input.shape()
        )));
    }
    let shape = input.shape().to_vec();
    let chunksize = input.chunksize();

    let input = if shape[2..] != chunksize[2..] {
        debug!(
            "Rechunking band/time axes from {:?} to {:?}",
            &chunksize[2..],
            &shape[2..]
        );
        input.merge_axes(&[2, 3])
    } else {
        input.clone()
    };

    let chunks = vec![
        input.chunks()[0].clone(),
        input.chunks()[1].clone(),
        vec![shape[2]],
    ];
    let blocks = GeomedianBlocks::new(input, nodata, options);
    let out = ChunkedArray::new(Arc::new(blocks), chunks)?;
    info!("Built geomedian task graph with {} block tasks", out.num_blocks());
    Ok(out)
}

/// Per-pixel geometric median over the reduction axis of `input`.
///
/// `axis` names the reduction dimension (see [`normalize`]). `mask` marks
/// pixels to keep; others are set to NaN after solving. Chunked inputs
/// return a chunked result and cannot be combined with a mask. All
/// validation happens before any data is read.
pub fn xr_geomedian(
    input: impl Into<StackInput>,
    axis: Option<&str>,
    mask: Option<&Array2<bool>>,
    options: &GeomedianOptions,
) -> Result<GeomedianResult> {
    options.validate()?;
    let stack = normalize(input.into(), axis)?;
    let shape = stack.data.shape();

    if let Some(mask) = mask {
        if stack.data.is_chunked() {
            return Err(GeomedianError::UnsupportedCombination(
                "output masking not supported under deferred execution".to_string(),
            ));
        }
        if mask.shape() != &shape[..2] {
            return Err(GeomedianError::Shape(format!(
                "shape for mask {:?} doesn't match spatial shape {:?}",
                mask.shape(),
                &shape[..2]
            )));
        }
    }

    let nodata = stack.nodata.map(|v| v as f32);
    let data = match &stack.data {
        ArrayData::Chunked(chunked) => {
            ArrayData::Chunked(deferred_geomedian(chunked, nodata, options)?)
        }
        ArrayData::Eager(array) => {
            info!(
                "Computing geomedian over {}x{} pixels, {} bands, {} time steps",
                shape[0], shape[1], shape[2], shape[3]
            );
            let view = array.view().into_dimensionality::<Ix4>()?;
            let mut out = nangeomedian(view, nodata, options)?;

            if let Some(mask) = mask {
                let mut masked = 0usize;
                for ((row, col), &keep) in mask.indexed_iter() {
                    if !keep {
                        out.slice_mut(s![row, col, ..]).fill(f32::NAN);
                        masked += 1;
                    }
                }
                debug!("Masked {} pixels", masked);
            }
            ArrayData::Eager(out.into_dyn())
        }
    };

    stack.rewrap(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::InMemory;
    use crate::labeled::{Attrs, Coordinate, LabeledArray, LabeledCollection};
    use ndarray::{arr2, Array4, IxDyn};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn assert_close(a: f32, b: f32, tol: f32) {
        assert!((a - b).abs() <= tol, "{} != {} (tol {})", a, b, tol);
    }

    /// Deterministic, mildly noisy (y, x, band, time) stack
    fn sample_stack(ny: usize, nx: usize, nb: usize, nt: usize) -> Array4<f32> {
        Array4::from_shape_fn((ny, nx, nb, nt), |(y, x, b, t)| {
            let base = (y * 10 + x) as f32 + b as f32 * 100.0;
            let noise = ((t * 7 + b * 3 + y * 5 + x) % 11) as f32 * 0.5;
            base + noise
        })
    }

    #[test]
    fn test_identical_vectors_give_mean() {
        let obs = arr2(&[[3.0f32, 3.0, 3.0], [7.5, 7.5, 7.5]]);
        let gm = pixel_geomedian(obs.view(), None, &GeomedianOptions::default());
        assert_eq!(gm, vec![3.0, 7.5]);
    }

    #[test]
    fn test_robust_to_outlier() {
        // Two observations at the origin, one far outlier
        let obs = arr2(&[[0.0f32, 0.0, 100.0]]);
        let gm = pixel_geomedian(obs.view(), None, &GeomedianOptions::default());
        assert_close(gm[0], 0.0, 1e-3);
    }

    #[test]
    fn test_mean_on_observation_keeps_iterating() {
        // The starting mean is exactly the first observation
        let obs = arr2(&[[0.0f32, 1.0, 1.0, 1.0, -3.0]]);
        let gm = pixel_geomedian(obs.view(), None, &GeomedianOptions::default());
        assert_close(gm[0], 1.0, 1e-3);
    }

    #[test]
    fn test_converges_onto_repeated_observation() {
        let obs = arr2(&[[0.0f32, 10.0, 10.0, 10.0, -30.0], [0.0, 0.0, 0.0, 0.0, 0.0]]);
        let gm = pixel_geomedian(obs.view(), None, &GeomedianOptions::default());
        assert_close(gm[0], 10.0, 1e-3);
        assert_eq!(gm[1], 0.0);
    }

    #[test]
    fn test_median_observation_is_fixed_point() {
        // Mean and median coincide with the repeated middle observation
        let obs = arr2(&[[-5.0f32, 0.0, 0.0, 0.0, 5.0], [1.0, 2.0, 2.0, 2.0, 3.0]]);
        let gm = pixel_geomedian(obs.view(), None, &GeomedianOptions::default());
        assert_eq!(gm, vec![0.0, 2.0]);
    }

    #[test]
    fn test_permutation_invariant() {
        let obs = arr2(&[[1.0f32, 4.0, 2.0, 9.0, 3.0], [5.0, 1.0, 7.0, 2.0, 0.5]]);
        let permuted = arr2(&[[9.0f32, 3.0, 1.0, 2.0, 4.0], [2.0, 0.5, 5.0, 7.0, 1.0]]);
        let options = GeomedianOptions {
            eps: 1e-7,
            ..Default::default()
        };
        let a = pixel_geomedian(obs.view(), None, &options);
        let b = pixel_geomedian(permuted.view(), None, &options);
        for (x, y) in a.iter().zip(&b) {
            assert_close(*x, *y, 1e-4);
        }
    }

    #[test]
    fn test_missing_observations_skipped() {
        // Time step 1 has a NaN and step 3 carries the nodata value
        let obs = arr2(&[
            [2.0f32, f32::NAN, 2.0, -1.0],
            [4.0, 1000.0, 4.0, 1000.0],
        ]);
        let gm = pixel_geomedian(obs.view(), Some(-1.0), &GeomedianOptions::default());
        assert_eq!(gm, vec![2.0, 4.0]);
    }

    #[test]
    fn test_all_missing_gives_nan() {
        let obs = arr2(&[[f32::NAN, -1.0], [1.0, 2.0]]);
        let gm = pixel_geomedian(obs.view(), Some(-1.0), &GeomedianOptions::default());
        assert!(gm.iter().all(|v| v.is_nan()));

        let empty = Array2::<f32>::zeros((3, 0));
        let gm = pixel_geomedian(empty.view(), None, &GeomedianOptions::default());
        assert_eq!(gm.len(), 3);
        assert!(gm.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_invalid_options() {
        let data = sample_stack(1, 1, 1, 2);
        let bad = [
            GeomedianOptions {
                maxiters: 0,
                ..Default::default()
            },
            GeomedianOptions {
                eps: f64::NAN,
                ..Default::default()
            },
            GeomedianOptions {
                num_threads: Some(0),
                ..Default::default()
            },
        ];
        for options in &bad {
            assert!(matches!(
                nangeomedian(data.view(), None, options),
                Err(GeomedianError::InvalidOption { .. })
            ));
        }
    }

    #[test]
    fn test_num_threads_matches_default_pool() {
        let data = sample_stack(3, 4, 2, 6);
        let a = nangeomedian(data.view(), None, &GeomedianOptions::default()).unwrap();
        let options = GeomedianOptions {
            num_threads: Some(2),
            ..Default::default()
        };
        let b = nangeomedian(data.view(), None, &options).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_raw_input_rank_checked() {
        let raw = ArrayD::<f32>::zeros(IxDyn(&[2, 2, 3]));
        let result = xr_geomedian(raw, Some("time"), None, &GeomedianOptions::default());
        assert!(matches!(result, Err(GeomedianError::Shape(_))));
    }

    #[test]
    fn test_mask_all_false_and_all_true() {
        let data = sample_stack(2, 3, 2, 5).into_dyn();
        let options = GeomedianOptions::default();

        let unmasked = match xr_geomedian(data.clone(), None, None, &options).unwrap() {
            GeomedianResult::Raw(d) => d.compute().unwrap(),
            _ => panic!("expected raw output"),
        };
        assert_eq!(unmasked.shape(), &[2, 3, 2]);

        let keep = Array2::from_elem((2, 3), true);
        match xr_geomedian(data.clone(), None, Some(&keep), &options).unwrap() {
            GeomedianResult::Raw(d) => assert_eq!(d.compute().unwrap(), unmasked),
            _ => panic!("expected raw output"),
        }

        let drop = Array2::from_elem((2, 3), false);
        match xr_geomedian(data, None, Some(&drop), &options).unwrap() {
            GeomedianResult::Raw(d) => {
                assert!(d.compute().unwrap().iter().all(|v| v.is_nan()))
            }
            _ => panic!("expected raw output"),
        }
    }

    #[test]
    fn test_partial_mask() {
        let data = sample_stack(2, 2, 3, 4).into_dyn();
        let mask = arr2(&[[true, false], [true, true]]);
        let out = match xr_geomedian(data, None, Some(&mask), &GeomedianOptions::default()).unwrap()
        {
            GeomedianResult::Raw(d) => d.compute().unwrap(),
            _ => panic!("expected raw output"),
        };
        assert!((0..3).all(|b| out[[0, 1, b]].is_nan()));
        assert!((0..3).all(|b| out[[1, 1, b]].is_finite()));
    }

    #[test]
    fn test_mask_shape_mismatch() {
        let data = sample_stack(2, 3, 1, 2).into_dyn();
        let mask = Array2::from_elem((3, 2), true);
        let result = xr_geomedian(data, None, Some(&mask), &GeomedianOptions::default());
        assert!(matches!(result, Err(GeomedianError::Shape(_))));
    }

    struct Counting {
        inner: InMemory,
        reads: Arc<AtomicUsize>,
    }

    impl BlockSource for Counting {
        fn shape(&self) -> &[usize] {
            self.inner.shape()
        }

        fn read(&self, region: &[Range<usize>]) -> Result<ArrayD<f32>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read(region)
        }
    }

    #[test]
    fn test_mask_with_chunked_input_rejected_before_work() {
        let reads = Arc::new(AtomicUsize::new(0));
        let source = Counting {
            inner: InMemory::new(sample_stack(4, 4, 2, 3).into_dyn()),
            reads: Arc::clone(&reads),
        };
        let chunked = ChunkedArray::with_chunk_shape(Arc::new(source), &[2, 2, 2, 1]).unwrap();
        let mask = Array2::from_elem((4, 4), true);

        let result = xr_geomedian(chunked, None, Some(&mask), &GeomedianOptions::default());
        assert!(matches!(
            result,
            Err(GeomedianError::UnsupportedCombination(_))
        ));
        assert_eq!(reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_chunked_matches_eager() {
        let data = sample_stack(5, 4, 3, 7);
        let options = GeomedianOptions::default();
        let eager = nangeomedian(data.view(), None, &options).unwrap();

        let reads = Arc::new(AtomicUsize::new(0));
        let source = Counting {
            inner: InMemory::new(data.into_dyn()),
            reads: Arc::clone(&reads),
        };
        let chunked = ChunkedArray::with_chunk_shape(Arc::new(source), &[2, 3, 1, 2]).unwrap();

        let deferred = match xr_geomedian(chunked, None, None, &options).unwrap() {
            GeomedianResult::Raw(ArrayData::Chunked(c)) => c,
            _ => panic!("expected chunked raw output"),
        };
        // Building the graph reads nothing; one task per spatial block
        assert_eq!(reads.load(Ordering::SeqCst), 0);
        assert_eq!(deferred.num_blocks(), 3 * 2);
        assert_eq!(deferred.chunks(), &[vec![2, 2, 1], vec![3, 1], vec![3]]);

        let computed = deferred.compute().unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), 6);
        for (a, b) in computed.iter().zip(eager.iter()) {
            assert_close(*a, *b, 1e-4);
        }
    }

    #[test]
    fn test_chunked_bands_solve_each_block_once() {
        let stack = sample_stack(4, 4, 4, 3);
        let reads = Arc::new(AtomicUsize::new(0));
        let mut collection = LabeledCollection::new();
        for (b, name) in ["blue", "green", "red", "nir"].iter().enumerate() {
            let source = Counting {
                inner: InMemory::new(stack.slice(s![.., .., b, ..]).to_owned().into_dyn()),
                reads: Arc::clone(&reads),
            };
            let chunked = ChunkedArray::with_chunk_shape(Arc::new(source), &[2, 2, 1]).unwrap();
            collection.insert(*name, LabeledArray::new(vec!["y", "x", "time"], chunked).unwrap());
        }

        let out = match xr_geomedian(collection, None, None, &GeomedianOptions::default()).unwrap() {
            GeomedianResult::Collection(out) => out,
            _ => panic!("expected collection output"),
        };
        let eager = nangeomedian(stack.view(), None, &GeomedianOptions::default()).unwrap();
        for (b, (_, band)) in out.iter().enumerate() {
            let values = band.data().compute().unwrap();
            for (a, e) in values.iter().zip(eager.slice(s![.., .., b]).iter()) {
                assert_close(*a, *e, 1e-4);
            }
        }

        // 4 spatial blocks, each reading the 4 source bands once
        assert_eq!(reads.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn test_stacked_roundtrip_keeps_labels() {
        let data = sample_stack(2, 3, 2, 4).into_dyn();
        let arr = LabeledArray::new(vec!["y", "x", "band", "time"], data)
            .unwrap()
            .with_coord("y", Coordinate::Numeric(vec![10.0, 20.0]))
            .unwrap()
            .with_attrs(Attrs {
                crs: Some("EPSG:3577".to_string()),
                ..Default::default()
            });

        let out = match xr_geomedian(arr, Some("time"), None, &GeomedianOptions::default()).unwrap()
        {
            GeomedianResult::Stacked(out) => out,
            _ => panic!("expected stacked output"),
        };
        assert_eq!(out.dims(), &["y", "x", "band"]);
        assert_eq!(out.shape(), vec![2, 3, 2]);
        assert_eq!(out.coord("y"), Some(&Coordinate::Numeric(vec![10.0, 20.0])));
        assert_eq!(out.attrs.crs.as_deref(), Some("EPSG:3577"));
    }

    #[test]
    fn test_collection_roundtrip() {
        let stack = sample_stack(2, 3, 2, 4);
        let mut collection = LabeledCollection::new();
        for (b, name) in ["red", "nir"].iter().enumerate() {
            let band = stack.slice(s![.., .., b, ..]).to_owned().into_dyn();
            let attrs = Attrs {
                nodata: Some(-999.0),
                crs: Some("EPSG:3577".to_string()),
                extra: [("units".to_string(), format!("band{}", b))].into(),
            };
            let band = LabeledArray::new(vec!["y", "x", "time"], band)
                .unwrap()
                .with_coord("y", Coordinate::Numeric(vec![0.5, 1.5]))
                .unwrap()
                .with_coord("x", Coordinate::Numeric(vec![0.5, 1.5, 2.5]))
                .unwrap()
                .with_attrs(attrs);
            collection.insert(*name, band);
        }

        let eager = nangeomedian(stack.view(), Some(-999.0), &GeomedianOptions::default()).unwrap();
        let out = match xr_geomedian(collection, None, None, &GeomedianOptions::default()).unwrap()
        {
            GeomedianResult::Collection(out) => out,
            _ => panic!("expected collection output"),
        };

        assert_eq!(out.names().collect::<Vec<_>>(), vec!["red", "nir"]);
        for (b, (name, band)) in out.iter().enumerate() {
            assert_eq!(band.dims(), &["y", "x"]);
            assert_eq!(band.coord("y"), Some(&Coordinate::Numeric(vec![0.5, 1.5])));
            assert_eq!(
                band.coord("x"),
                Some(&Coordinate::Numeric(vec![0.5, 1.5, 2.5]))
            );
            assert_eq!(band.attrs.nodata, Some(-999.0));
            assert_eq!(
                band.attrs.extra.get("units"),
                Some(&format!("band{}", b)),
                "attributes of {}",
                name
            );
            let values = band.data().compute().unwrap();
            assert_eq!(values, eager.slice(s![.., .., b]).to_owned().into_dyn());
        }
    }

    #[test]
    fn test_chunked_collection_roundtrip() {
        let stack = sample_stack(4, 2, 2, 3);
        let mut collection = LabeledCollection::new();
        for (b, name) in ["red", "nir"].iter().enumerate() {
            let band = stack.slice(s![.., .., b, ..]).to_owned().into_dyn();
            let chunked = ChunkedArray::from_array(band, &[2, 2, 1]).unwrap();
            collection.insert(
                *name,
                LabeledArray::new(vec!["y", "x", "time"], chunked).unwrap(),
            );
        }

        let out = match xr_geomedian(collection, Some("time"), None, &GeomedianOptions::default())
            .unwrap()
        {
            GeomedianResult::Collection(out) => out,
            _ => panic!("expected collection output"),
        };
        let eager = nangeomedian(stack.view(), None, &GeomedianOptions::default()).unwrap();

        let nir = out.get("nir").unwrap();
        assert!(nir.data().is_chunked());
        let values = nir.data().compute().unwrap();
        for (a, e) in values.iter().zip(eager.slice(s![.., .., 1]).iter()) {
            assert_close(*a, *e, 1e-4);
        }
    }
}
