mod error;
mod response;

pub use error::ErrorKind;
pub use response::Response;

/// The `hata_lib` `Result` type
pub type Result<T> = std::result::Result<T, crate::ErrorKind>;
