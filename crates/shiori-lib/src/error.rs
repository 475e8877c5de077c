use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("page has no image url")]
    MissingImageUrl,
    #[error("source returned status {0}")]
    BadStatus(u16),
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
}
