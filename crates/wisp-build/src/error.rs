use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    /// The source declares nothing the dispatcher could call.
    #[error("no exported functions found")]
    NoExports,
}
