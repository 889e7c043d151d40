//! Error types for lowpoly

use thiserror::Error;

/// Main error type for lowpoly operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("GPU error: {0}")]
    Gpu(String),

    /// The importer cannot parse the input file.
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    /// No mesh objects, or no faces after import and triangulation.
    #[error("Empty geometry: {0}")]
    EmptyGeometry(String),

    /// The high resolution mesh has no triangles to cast rays against.
    #[error("Bake target missing: high resolution mesh has no triangles")]
    BakeTargetMissing,

    /// The accelerated ray query device could not be initialised.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Export error: {0}")]
    Export(String),
}

impl Error {
    /// Whether this error must abort the job.
    ///
    /// `DeviceUnavailable` is the only recoverable variant; callers fall back
    /// to the software path and record a degradation instead.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::DeviceUnavailable(_))
    }
}

/// Result type alias for lowpoly operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(feature = "gpu")]
impl From<wgpu::BufferAsyncError> for Error {
    fn from(e: wgpu::BufferAsyncError) -> Self {
        Error::Gpu(e.to_string())
    }
}

#[cfg(feature = "gpu")]
impl From<wgpu::RequestDeviceError> for Error {
    fn from(e: wgpu::RequestDeviceError) -> Self {
        Error::DeviceUnavailable(e.to_string())
    }
}
