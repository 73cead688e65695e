use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("I/O error while reading the event stream: {0}")]
    Io(#[from] std::io::Error),
}
