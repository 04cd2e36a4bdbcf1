use std::io;

#[derive(thiserror::Error, Debug)]
pub enum KVStoneError {
    #[error("{0}")]
    IOError(#[from] io::Error),

    #[error("background queue closed")]
    SendError,

    #[error("not found")]
    NotFound,

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl KVStoneError {
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    #[inline]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption(_))
    }
}

impl<T> From<crossbeam_channel::SendError<T>> for KVStoneError {
    fn from(_: crossbeam_channel::SendError<T>) -> Self {
        Self::SendError
    }
}

/// `io::Error` is not `Clone`; the copy keeps its kind and message.
impl Clone for KVStoneError {
    fn clone(&self) -> Self {
        match self {
            Self::IOError(e) => Self::IOError(io::Error::new(e.kind(), e.to_string())),
            Self::SendError => Self::SendError,
            Self::NotFound => Self::NotFound,
            Self::Corruption(s) => Self::Corruption(s.clone()),
            Self::InvalidArgument(s) => Self::InvalidArgument(s.clone()),
        }
    }
}

impl PartialEq for KVStoneError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::IOError(e1), Self::IOError(e2)) => e1.kind() == e2.kind(),
            (Self::SendError, Self::SendError) | (Self::NotFound, Self::NotFound) => true,
            (Self::Corruption(s1), Self::Corruption(s2))
            | (Self::InvalidArgument(s1), Self::InvalidArgument(s2)) => s1.eq(s2),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::KVStoneError;
    use std::io;

    #[test]
    fn test_clone_io_error() {
        let e = KVStoneError::from(io::Error::new(io::ErrorKind::Other, "disk full"));
        let e2 = e.clone();
        assert_eq!(e, e2);
        assert_eq!(e2.to_string(), "disk full");
        assert!(!e2.is_not_found());
        assert!(KVStoneError::Corruption("bad block".into()).is_corruption());
        assert_ne!(KVStoneError::NotFound, KVStoneError::SendError);
    }
}
