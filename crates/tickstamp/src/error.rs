use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid alphabet: {0}")]
    Alphabet(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to spawn refresher: {0}")]
    Spawn(String),
}

pub type Result<T> = std::result::Result<T, Error>;
