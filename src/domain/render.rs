//! Render requests as accepted from clients.

use super::error::DomainError;

/// Font identifier used when the client does not name one.
pub const DEFAULT_FONT: &str = "ackaisyo.ttf";

/// A validated `(text, font)` pair.
///
/// `text` is never empty. `font` falls back to [`DEFAULT_FONT`] only when it is
/// absent; an explicitly empty font is preserved so that it keeps its own cache
/// namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    text: String,
    font: String,
}

impl RenderRequest {
    pub fn new(text: Option<String>, font: Option<String>) -> Result<Self, DomainError> {
        let text = text
            .filter(|value| !value.is_empty())
            .ok_or_else(|| DomainError::missing_parameter("text"))?;
        let font = font.unwrap_or_else(|| DEFAULT_FONT.to_string());
        Ok(Self { text, font })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn font(&self) -> &str {
        &self.font
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_text_is_rejected() {
        let err = RenderRequest::new(None, Some("a.ttf".into())).expect_err("missing text");
        assert_eq!(err, DomainError::missing_parameter("text"));
    }

    #[test]
    fn empty_text_is_rejected() {
        let err = RenderRequest::new(Some(String::new()), None).expect_err("empty text");
        assert_eq!(err, DomainError::missing_parameter("text"));
    }

    #[test]
    fn absent_font_uses_default() {
        let request = RenderRequest::new(Some("Hello".into()), None).expect("valid request");
        assert_eq!(request.font(), DEFAULT_FONT);
        assert_eq!(
            request,
            RenderRequest::new(Some("Hello".into()), Some(DEFAULT_FONT.into())).expect("valid")
        );
    }

    #[test]
    fn explicit_empty_font_is_kept() {
        let request =
            RenderRequest::new(Some("Hello".into()), Some(String::new())).expect("valid request");
        assert_eq!(request.font(), "");
    }

    #[test]
    fn whitespace_text_is_accepted_verbatim() {
        let request = RenderRequest::new(Some(" ".into()), None).expect("valid request");
        assert_eq!(request.text(), " ");
    }
}
