use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Input error: {0}")]
    Input(String),

    #[error("{0}")]
    Analysis(#[from] strata::ImageError),

    #[error("{0}")]
    Engine(#[from] strata::AcquisitionError),
}

pub type Result<T> = std::result::Result<T, CliError>;
