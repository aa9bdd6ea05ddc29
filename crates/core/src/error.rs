#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("unknown intent category: {0}")]
    UnknownIntent(String),
}
