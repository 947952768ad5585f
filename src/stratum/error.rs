use super::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum InternalError {
    #[snafu(display("failed to parse: {message}"))]
    Parse { message: String },
    #[snafu(display("invalid value: {reason}"))]
    InvalidValue { reason: String },
    #[snafu(display("failed to parse hex integer '{input}': {source}"))]
    ParseHexInt {
        input: String,
        source: std::num::ParseIntError,
    },
    #[snafu(display("username has no address component"))]
    EmptyUsername,
    #[snafu(display("failed to parse address: {source}"))]
    InvalidAddress {
        source: bitcoin::address::ParseError,
    },
    #[snafu(display("address {address} does not belong to network {expected:?}"))]
    NetworkMismatch { expected: Network, address: String },
    #[snafu(display("could not infer network from address"))]
    UnknownNetwork,
}

/// The six error codes this coordinator surfaces over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StratumErrorCode {
    Other = 20,
    JobNotFound = 21,
    Duplicate = 22,
    LowDifficultyShare = 23,
    UnauthorizedWorker = 24,
    NotSubscribed = 25,
}

impl StratumErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Protocol-level errors raised while servicing a connection, distinct from
/// `InternalError` (parsing of standalone wire types). Carries just enough to
/// produce the `[code, message, traceback]` triple the wire expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StratumError {
    NotSubscribed,
    Unauthorized,
    JobNotFound,
    Stale,
    Duplicate,
    LowDifficultyShare,
    InvalidParams { reason: String },
    Internal { reason: String },
}

impl StratumError {
    pub fn code(&self) -> StratumErrorCode {
        match self {
            StratumError::NotSubscribed => StratumErrorCode::NotSubscribed,
            StratumError::Unauthorized => StratumErrorCode::UnauthorizedWorker,
            StratumError::JobNotFound | StratumError::Stale => StratumErrorCode::JobNotFound,
            StratumError::Duplicate => StratumErrorCode::Duplicate,
            StratumError::LowDifficultyShare => StratumErrorCode::LowDifficultyShare,
            StratumError::InvalidParams { .. } | StratumError::Internal { .. } => {
                StratumErrorCode::Other
            }
        }
    }

    pub fn message(&self) -> String {
        match self {
            StratumError::NotSubscribed => "Not subscribed".into(),
            StratumError::Unauthorized => "Unauthorized worker".into(),
            StratumError::JobNotFound => "Job not found".into(),
            StratumError::Stale => "Stale job".into(),
            StratumError::Duplicate => "Duplicate share".into(),
            StratumError::LowDifficultyShare => "Low difficulty share".into(),
            StratumError::InvalidParams { reason } => reason.clone(),
            StratumError::Internal { reason } => reason.clone(),
        }
    }

    pub fn into_response(self, traceback: Option<Value>) -> JsonRpcError {
        JsonRpcError {
            error_code: self.code().as_i32(),
            message: self.message(),
            traceback,
        }
    }
}

impl fmt::Display for StratumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code().as_i32(), self.message())
    }
}

impl std::error::Error for StratumError {}

#[derive(Debug, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub error_code: i32,
    pub message: String,
    pub traceback: Option<Value>,
}

impl Serialize for JsonRpcError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (&self.error_code, &self.message, &self.traceback).serialize(serializer)
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.traceback {
            Some(traceback) => write!(
                f,
                "Stratum error {}: {} (traceback: {})",
                self.error_code,
                self.message,
                serde_json::to_string(traceback).unwrap_or_else(|_| "<invalid traceback>".into())
            ),
            None => write!(f, "Stratum error {}: {}", self.error_code, self.message),
        }
    }
}
