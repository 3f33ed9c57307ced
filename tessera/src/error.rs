use thiserror::Error;

use crate::{coord::GemmCoord, data_type::DataType};

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),
    #[error("invalid problem shape {shape:?}: {reason}")]
    InvalidShape {
        shape: GemmCoord,
        reason: String,
    },
    #[error("unsupported data type {0:?} for this operation")]
    UnsupportedDataType(DataType),
    #[error("workspace of {required} bytes required, {provided} provided")]
    Workspace {
        required: usize,
        provided: usize,
    },
    #[error("launch error: {0}")]
    Launch(String),
    #[error("{0}")]
    Generic(String),
}

impl From<&str> for KernelError {
    fn from(error: &str) -> Self {
        KernelError::Generic(error.to_string())
    }
}

impl From<String> for KernelError {
    fn from(error: String) -> Self {
        KernelError::Generic(error)
    }
}
