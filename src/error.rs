use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnchorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("RPC transport error: {0}")]
    Rpc(String),

    #[error("RPC error response: {0}")]
    RpcResponse(String),

    #[error("Contract call failed: {0}")]
    Contract(String),

    #[error("Transaction signing failed: {0}")]
    Signing(String),

    #[error("No signing account configured")]
    NoSigner,

    #[error("Invalid content hash: {0}")]
    InvalidHash(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transaction not sent: {0}")]
    NotSent(String),

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Deployment is read-only")]
    ReadOnly,

    #[error("Blockchain client not configured")]
    ChainUnavailable,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, AnchorError>;
