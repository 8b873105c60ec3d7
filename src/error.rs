//! Error taxonomy for calls made through an endpoint handle.

/// How the retry wrapper should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected to resolve by waiting; retried until the budget runs out.
    Transient,
    /// Retrying cannot help; propagated on first occurrence.
    Fatal,
}

/// Errors produced by a transport or by decoding its response.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcError {
    /// The node could not be reached, refused the connection, or answered
    /// with a status that means "try again later" (5xx, 429).
    Connection(String),
    /// A single attempt exceeded the per-attempt request timeout.
    Timeout(String),
    /// The requested block is not indexed by the node yet.
    BlockNotFound(String),
    /// The requested transaction has not been mined yet.
    TransactionNotFound(String),
    /// The node returned a JSON-RPC error object.
    Rpc { code: i64, message: String },
    /// The node answered with a client error status.
    Http { status: u16, message: String },
    /// The response could not be decoded.
    Decode(String),
    /// The endpoint identifier is empty or not a valid URL.
    InvalidEndpoint(String),
    /// Anything else, including transport construction failures.
    Other(String),
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Connection(msg) => write!(f, "Connection failed: {}", msg),
            RpcError::Timeout(msg) => write!(f, "Request timed out: {}", msg),
            RpcError::BlockNotFound(msg) => write!(f, "Block not found: {}", msg),
            RpcError::TransactionNotFound(msg) => {
                write!(f, "Transaction not found: {}", msg)
            }
            RpcError::Rpc { code, message } => {
                write!(f, "JSON-RPC error {}: {}", code, message)
            }
            RpcError::Http { status, message } => {
                write!(f, "HTTP {} error: {}", status, message)
            }
            RpcError::Decode(msg) => write!(f, "Invalid response: {}", msg),
            RpcError::InvalidEndpoint(msg) => write!(f, "Invalid endpoint: {}", msg),
            RpcError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for RpcError {}

impl RpcError {
    /// Short, stable name of the variant, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            RpcError::Connection(_) => "Connection",
            RpcError::Timeout(_) => "Timeout",
            RpcError::BlockNotFound(_) => "BlockNotFound",
            RpcError::TransactionNotFound(_) => "TransactionNotFound",
            RpcError::Rpc { .. } => "Rpc",
            RpcError::Http { .. } => "Http",
            RpcError::Decode(_) => "Decode",
            RpcError::InvalidEndpoint(_) => "InvalidEndpoint",
            RpcError::Other(_) => "Other",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            RpcError::Connection(_)
            | RpcError::Timeout(_)
            | RpcError::BlockNotFound(_)
            | RpcError::TransactionNotFound(_) => ErrorClass::Transient,
            _ => ErrorClass::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Classification hook used by the retry wrapper.
pub trait Classify {
    fn error_class(&self) -> ErrorClass;

    /// Name of the error kind as it should appear in logs.
    fn kind(&self) -> &'static str;
}

impl Classify for RpcError {
    fn error_class(&self) -> ErrorClass {
        self.class()
    }

    fn kind(&self) -> &'static str {
        RpcError::kind(self)
    }
}

/// An `anyhow::Error` is transient only if it wraps a transient `RpcError`.
impl Classify for anyhow::Error {
    fn error_class(&self) -> ErrorClass {
        match self.downcast_ref::<RpcError>() {
            Some(e) => e.class(),
            None => ErrorClass::Fatal,
        }
    }

    fn kind(&self) -> &'static str {
        match self.downcast_ref::<RpcError>() {
            Some(e) => e.kind(),
            None => "Other",
        }
    }
}
