//! Error types for I/O operations

use lowpoly_core::Error;
use thiserror::Error;

/// Errors that can occur during I/O operations
#[derive(Error, Debug)]
pub enum IoError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Unsupported file format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Parse error: {message}")]
    ParseError { message: String },

    #[error("No triangles in {path}")]
    NoGeometry { path: String },

    #[error("Write error: {message}")]
    WriteError { message: String },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IoError> for Error {
    fn from(err: IoError) -> Self {
        match err {
            IoError::FileNotFound { .. } | IoError::UnsupportedFormat { .. } | IoError::ParseError { .. } => {
                Error::UnsupportedInput(err.to_string())
            }
            IoError::NoGeometry { .. } => Error::EmptyGeometry(err.to_string()),
            IoError::WriteError { message } => Error::Export(message),
            IoError::Image(e) => Error::Export(e.to_string()),
            IoError::Io(e) => Error::Io(e),
        }
    }
}

impl From<gltf::Error> for IoError {
    fn from(err: gltf::Error) -> Self {
        match err {
            gltf::Error::Io(e) => IoError::Io(e),
            other => IoError::ParseError {
                message: other.to_string(),
            },
        }
    }
}
