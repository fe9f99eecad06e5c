use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("required parameter `{name}` is missing")]
    MissingParameter { name: &'static str },
}

impl DomainError {
    pub fn missing_parameter(name: &'static str) -> Self {
        Self::MissingParameter { name }
    }
}
