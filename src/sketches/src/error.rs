use thiserror::Error;

#[derive(Debug, Error)]
pub enum SketchError {
    #[error("{op} is not supported by sketch type {sketch_type:?}")]
    NotSupported {
        sketch_type: String,
        op: &'static str,
    },

    #[error("unknown sketch type {0:?}")]
    UnknownType(String),

    #[error("hll precision out of range: {0}")]
    InvalidPrecision(u8),

    #[error("corrupt sketch state: {0}")]
    Corrupt(String),
}

pub type SketchResult<T> = Result<T, SketchError>;
