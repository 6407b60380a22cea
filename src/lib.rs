// Library exports for testing and reuse

pub mod chunking;
pub mod cli;
pub mod deferred;
pub mod error;
pub mod geomedian;
pub mod io;
pub mod labeled;
pub mod normalize;

// Re-export commonly used types
pub use deferred::{BlockSource, ChunkedArray, InMemory};
pub use error::{GeomedianError, Result};
pub use geomedian::{nangeomedian, xr_geomedian, GeomedianOptions};
pub use labeled::{mask_invalid_data, ArrayData, Attrs, Coordinate, LabeledArray, LabeledCollection};
pub use normalize::{normalize, reshape_for_geomedian, CanonicalStack, GeomedianResult, StackInput};
