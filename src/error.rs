use thiserror::Error;

/// Everything that can stop a clustering run. Nothing is retried, so each
/// variant carries enough context to be reported as-is.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("k-means error: {0}")]
    KMeans(#[from] linfa_clustering::KMeansError),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("column '{0}' not found")]
    MissingColumn(String),

    #[error("invalid label '{value}' on row {row}")]
    InvalidLabel { row: usize, value: String },

    #[error("empty input: {0}")]
    EmptyInput(&'static str),

    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("{points} points cannot be split into {clusters} clusters")]
    TooFewPoints { points: usize, clusters: usize },

    #[error("degenerate clustering: {0}")]
    DegenerateClustering(String),

    #[error("perplexity {perplexity} must be less than the number of points ({points})")]
    InvalidPerplexity { perplexity: f64, points: usize },

    #[error("unknown file format: {0}")]
    UnknownFormat(String),

    #[error("invalid split '{0}', expected 'start..end'")]
    InvalidSplit(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn tokenizer<E: std::fmt::Display>(err: E) -> Self {
        Error::Tokenizer(err.to_string())
    }

    pub fn shape_mismatch<A: std::fmt::Debug, B: std::fmt::Debug>(expected: A, actual: B) -> Self {
        Error::ShapeMismatch {
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }
}
