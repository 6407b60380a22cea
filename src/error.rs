use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeomedianError {
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Array shape error: {0}")]
    NdShape(#[from] ndarray::ShapeError),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Can only reduce last dimension, expected: y,x,band,{axis} (got {dims:?})")]
    DimensionOrder { axis: String, dims: Vec<String> },

    #[error("All bands should have same dimensions: {0}")]
    InconsistentDimensions(String),

    #[error("Expect 3 dimensions on input, got {0}")]
    UnsupportedRank(usize),

    #[error("No such axis: {axis} (dimensions are {dims:?})")]
    MissingAxis { axis: String, dims: Vec<String> },

    #[error("Unsupported combination: {0}")]
    UnsupportedCombination(String),

    #[error("Invalid option {name}: {reason}")]
    InvalidOption { name: &'static str, reason: String },

    #[error("Input collection has no bands")]
    EmptyCollection,

    #[error("Invalid chunks for axis {axis}: {chunks:?} do not tile length {len}")]
    InvalidChunks {
        axis: usize,
        chunks: Vec<usize>,
        len: usize,
    },

    #[error("Input raster has invalid dimensions: {0}x{1}")]
    InvalidDimensions(usize, usize),

    #[error("Input rasters do not match: {0}")]
    MismatchedInputs(String),

    #[error("Expected a {expected} result, got a {got} result")]
    UnexpectedResult {
        expected: &'static str,
        got: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, GeomedianError>;
