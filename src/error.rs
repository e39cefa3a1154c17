use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid signing token")]
    InvalidToken,
    #[error("operation not permitted: {0}")]
    InvalidState(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("unable to decode signature image: {0}")]
    Decode(String),
    #[error("unable to render document: {0}")]
    Render(#[from] lopdf::Error),
    #[error("field references page {0}, which the document does not have")]
    PagePlacement(i64),
    #[error("storage error: {0}")]
    Store(String),
    #[error("file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to send email: {0}")]
    Mail(String),
}

impl From<diesel::result::Error> for Error {
    fn from(err: diesel::result::Error) -> Self {
        Error::Store(err.to_string())
    }
}
