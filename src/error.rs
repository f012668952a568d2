use crate::model::InvalidWindow;
use crate::store::StoreError;

/// Anything that ends a benchmark run early.
#[derive(Debug)]
pub enum BenchError {
    Store(StoreError),
    InvalidWindow(InvalidWindow),
    NonIncreasingSize { previous: usize, next: usize },
    Io(std::io::Error),
}

impl std::fmt::Display for BenchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BenchError::Store(e) => write!(f, "store error: {e}"),
            BenchError::InvalidWindow(e) => write!(f, "{e}"),
            BenchError::NonIncreasingSize { previous, next } => {
                write!(f, "dataset sizes must increase: {next} follows {previous}")
            }
            BenchError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for BenchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BenchError::Store(e) => Some(e),
            BenchError::InvalidWindow(e) => Some(e),
            BenchError::Io(e) => Some(e),
            BenchError::NonIncreasingSize { .. } => None,
        }
    }
}

impl From<StoreError> for BenchError {
    fn from(e: StoreError) -> Self {
        BenchError::Store(e)
    }
}

impl From<InvalidWindow> for BenchError {
    fn from(e: InvalidWindow) -> Self {
        BenchError::InvalidWindow(e)
    }
}

impl From<std::io::Error> for BenchError {
    fn from(e: std::io::Error) -> Self {
        BenchError::Io(e)
    }
}
