use thiserror::Error;

/// Everything that can go wrong inside a single poll-and-forward iteration.
///
/// None of these stop the loop; the kind only decides how the failure is
/// logged and counted.
#[derive(Error, Debug)]
pub enum ForwarderError {
    #[error("device request failed: {0}")]
    TransientNetwork(String),

    #[error("malformed device response: {0}")]
    MalformedResponse(String),

    #[error("local log write failed: {0}")]
    LocalLog(#[from] std::io::Error),

    #[error("sink write failed: {0}")]
    SinkWrite(String),
}

