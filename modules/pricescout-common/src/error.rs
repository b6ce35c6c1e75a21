use thiserror::Error;

#[derive(Error, Debug)]
pub enum PriceScoutError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Browser session error: {0}")]
    Session(String),

    #[error("Timed out waiting for page content: {0}")]
    Timeout(String),

    #[error("Challenge page not resolved: {0}")]
    Challenge(String),

    #[error("Batch cancelled")]
    Cancelled,

    #[error("Input error: {0}")]
    Input(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
