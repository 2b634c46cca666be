pub type ClipmarkResult<T> = Result<T, ClipmarkError>;

#[derive(thiserror::Error, Debug)]
pub enum ClipmarkError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("media error: {0}")]
    Media(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ClipmarkError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn media(msg: impl Into<String>) -> Self {
        Self::Media(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    /// True for errors caused by the caller's input rather than by decoding or encoding.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<image::ImageError> for ClipmarkError {
    fn from(e: image::ImageError) -> Self {
        Self::Encode(format!("image codec failed: {e}"))
    }
}

impl From<zip::result::ZipError> for ClipmarkError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Encode(format!("zip archive failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            ClipmarkError::validation("x")
                .to_string()
                .contains("validation error:")
        );
        assert!(ClipmarkError::media("x").to_string().contains("media error:"));
        assert!(
            ClipmarkError::encode("x")
                .to_string()
                .contains("encode error:")
        );
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = ClipmarkError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
        assert!(!err.is_input_error());
    }

    #[test]
    fn only_validation_counts_as_input_error() {
        assert!(ClipmarkError::validation("bad trim").is_input_error());
        assert!(!ClipmarkError::media("decode").is_input_error());
    }
}
