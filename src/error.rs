//! Error taxonomy, built with the `custom_error` macro.

use custom_error::custom_error;
use std::io::Error as IoError;

custom_error! {
    #[derive(Clone)]
    pub Error
    Timeout = "operation exceeded its deadline",
    Closed = "operation attempted on a closed connection",
    RetransmissionExhausted{sequence: u32} = "entry at sequence {sequence} exceeded the maximum retransmission count",
    WindowFull = "neither the peer window nor the congestion window admits the next segment",
    ConfigInvalid{details: String} = "invalid configuration: {details}",
    Full = "ring buffer is full",
    Io{details: String} = "I/O error: {details}",
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::Io {
            details: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
