use thiserror::Error;

pub type StrataResult<T> = Result<T, StrataError>;

#[derive(Error, Debug)]
pub enum StrataError {
    #[error("Invalid configuration ({0})")]
    InvalidConfig(Box<str>),
    #[error("Capacity exhausted. Requested {requested} bytes, capacity is {capacity}")]
    CapacityExhausted { requested: usize, capacity: usize },
    #[error("Decode error ({0})")]
    DecodeError(Box<str>),
}

impl StrataError {
    pub(crate) fn decode(msg: &str) -> Self {
        StrataError::DecodeError(msg.into())
    }
}
