use thiserror::Error;

/// Errors surfaced by the engine. Middleware and layout-collaborator
/// failures wrap the underlying error; everything else is a plain
/// validation failure that leaves the committed state untouched.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("middleware `{name}` failed: {source}")]
    Middleware {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("unknown node `{0}`")]
    UnknownNode(String),

    #[error("unknown edge `{0}`")]
    UnknownEdge(String),

    #[error("duplicate {kind} id `{id}`")]
    DuplicateId { kind: &'static str, id: String },

    #[error("edge `{edge}` references missing node `{node}`")]
    DanglingEdge { edge: String, node: String },

    #[error("no linking gesture in progress")]
    NoActiveLinking,

    #[error("no resize gesture in progress")]
    NoActiveResize,

    #[error("no rotation gesture in progress")]
    NoActiveRotation,

    #[error("unknown savepoint `{0}`")]
    UnknownSavepoint(String),

    #[error("a transaction is already active")]
    TransactionActive,

    #[error("no layout function registered")]
    NoLayoutFunction,

    #[error("layout collaborator failed: {0}")]
    Layout(#[source] anyhow::Error),
}
