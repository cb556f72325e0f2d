use thiserror::Error;

/// Problems with the input table or run configuration. Always fatal, and always
/// raised before any aggregation starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("required column '{column}' is missing from the input table")]
    MissingColumn { column: String },

    #[error("no records left to analyse after excluding {excluded} rows with unparsable dates")]
    EmptyDataset { excluded: usize },

    #[error("at least one window length is required")]
    NoWindows,

    #[error("window lengths must be positive (got {0})")]
    ZeroWindow(u32),

    #[error("truncation marker column '{0}' is not in the input table")]
    UnknownMarker(String),

    #[error("truncation marker '{marker}' comes before the entity column '{entity}'")]
    MarkerBeforeEntity { marker: String, entity: String },

    #[error("derived column '{0}' collides with an existing input column")]
    ColumnCollision(String),
}

/// Failure to compute the statistics of a single record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComputeError {
    #[error("no timeline for entity '{entity}' (record {id})")]
    UnknownEntity { id: usize, entity: String },

    #[error("record {id} is not part of the timeline of '{entity}'")]
    NotInTimeline { id: usize, entity: String },

    #[error("worker panicked: {0}")]
    Panicked(String),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("chunk {index} (rows {start}..{end}) failed: {source}")]
    Chunk {
        index: usize,
        start: usize,
        end: usize,
        #[source]
        source: ComputeError,
    },

    #[error("merge expected {expected} results but received {received}")]
    IncompleteResults { expected: usize, received: usize },

    #[error("run cancelled before all chunks completed")]
    Cancelled,
}
