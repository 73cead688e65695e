use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Could not read object file {}: {1}", .0.display())]
    ReadFile(PathBuf, #[source] std::io::Error),

    #[error("Could not parse object file {}: {1}", .0.display())]
    ObjectParse(PathBuf, #[source] object::read::Error),
}
