use configurator_facts::FactError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The fact store could not produce a snapshot. Fatal for the invocation.
    #[error("Fact retrieval failed: {0}")]
    FactRetrieval(#[from] FactError),
}
