use thiserror::Error;

#[derive(Error, Debug)]
pub enum StdError {
    #[error("JsonSerializationError: {0}")]
    JsonSerializationError(#[source] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("Finalizer Error: {0}")]
    // NB: awkward type because finalizer::Error embeds the reconciler error (which is this)
    // so boxing this error to break cycles
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("MetadataMissing: {0}")]
    MetadataMissing(String),

    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    #[error("SerializationError: {0}")]
    SerializationError(String),

    #[error("ValidationError: {0}")]
    ValidationError(String),

    #[error("ClaimConflict: {count} bucket claims share identity {identity}")]
    ClaimConflict { identity: String, count: usize },
}

impl StdError {
    pub fn metric_label(&self) -> String {
        match self {
            StdError::JsonSerializationError(_) => "jsonserializationerror",
            StdError::KubeError(_) => "kubeerror",
            StdError::FinalizerError(_) => "finalizererror",
            StdError::MetadataMissing(_) => "metadatamissing",
            StdError::InvalidArgument(_) => "invalidargument",
            StdError::SerializationError(_) => "serializationerror",
            StdError::ValidationError(_) => "validationerror",
            StdError::ClaimConflict { .. } => "claimconflict",
        }
        .to_string()
    }

    /// Terminal errors are surfaced on status and are not worth retrying until the cluster is edited.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StdError::ValidationError(_)
                | StdError::SerializationError(_)
                | StdError::ClaimConflict { .. }
                | StdError::InvalidArgument(_)
        )
    }

    /// Condition reason used when the error is recorded on status.
    pub fn reason(&self) -> &'static str {
        match self {
            StdError::ValidationError(_) | StdError::InvalidArgument(_) => "ValidationFailed",
            StdError::SerializationError(_) | StdError::JsonSerializationError(_) => "RenderFailed",
            StdError::ClaimConflict { .. } => "BucketClaimConflict",
            _ => "ReconcileError",
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Standard Error: {0}")]
    StdError(#[source] StdError),
}

impl Error {
    pub fn metric_label(&self) -> String {
        self.inner().metric_label()
    }

    pub fn inner(&self) -> &StdError {
        match self {
            Error::StdError(e) => e,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.inner().is_terminal()
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::StdError(StdError::ValidationError(message.into()))
    }
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        Error::StdError(StdError::KubeError(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::StdError(StdError::JsonSerializationError(e))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
