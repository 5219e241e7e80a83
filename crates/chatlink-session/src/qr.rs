//! Pairing code rendering.

/// Turns a raw pairing code into the payload shown to the user.
pub trait QrRenderer: Send + Sync {
    /// Render a pairing code. Must be pure.
    fn render(&self, code: &str) -> Result<String, String>;
}

/// Hands the raw code through so the client renders the QR image itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawPayloadRenderer;

impl QrRenderer for RawPayloadRenderer {
    fn render(&self, code: &str) -> Result<String, String> {
        if code.is_empty() {
            return Err("empty pairing code".to_string());
        }
        Ok(code.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_renderer() {
        assert_eq!(RawPayloadRenderer.render("2@abc").unwrap(), "2@abc");
        assert!(RawPayloadRenderer.render("").is_err());
    }
}
