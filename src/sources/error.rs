use std::fmt;

/// Diagnostic class of a per-item resolve/stream failure.
///
/// Every class leads to the same action (skip to the next queued item); the
/// class only changes what gets logged and shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemFailure {
    Unavailable,
    PaymentRequired,
    AgeRestricted,
    ExtractionFailed,
    Unknown,
}

impl ItemFailure {
    /// Classifies a resolver or stream diagnostic message.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();

        if lower.contains("video unavailable") || lower.contains("this video is private") {
            Self::Unavailable
        } else if lower.contains("requires payment") || lower.contains("members-only") {
            Self::PaymentRequired
        } else if lower.contains("age-restricted") || lower.contains("confirm your age") {
            Self::AgeRestricted
        } else if lower.contains("unable to extract") || lower.contains("unable to download") {
            Self::ExtractionFailed
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::PaymentRequired => "payment_required",
            Self::AgeRestricted => "age_restricted",
            Self::ExtractionFailed => "extraction_failed",
            Self::Unknown => "unknown",
        }
    }

    /// Mensaje para el usuario
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unavailable => "El video no está disponible",
            Self::PaymentRequired => "El video requiere pago para verse",
            Self::AgeRestricted => "El video tiene restricción de edad",
            Self::ExtractionFailed => "No se pudieron extraer los datos del video",
            Self::Unknown => "Error desconocido al reproducir",
        }
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    #[error("{kind}: {message}")]
    Item { kind: ItemFailure, message: String },

    #[error("no se encontraron resultados para '{0}'")]
    NotFound(String),

    #[error("error del resolver: {0}")]
    Backend(String),
}

impl ResolveError {
    /// Builds an item error from raw extractor output (stderr).
    pub fn from_diagnostic(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Item {
            kind: ItemFailure::classify(&message),
            message: message.trim().to_string(),
        }
    }

    pub fn failure(&self) -> ItemFailure {
        match self {
            Self::Item { kind, .. } => *kind,
            Self::NotFound(_) => ItemFailure::Unavailable,
            Self::Backend(message) => ItemFailure::classify(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classification_by_message() {
        let cases = [
            ("ERROR: [youtube] abc: Video unavailable", ItemFailure::Unavailable),
            ("ERROR: This video requires payment to watch", ItemFailure::PaymentRequired),
            ("ERROR: This video is age-restricted", ItemFailure::AgeRestricted),
            ("Sign in to confirm your age", ItemFailure::AgeRestricted),
            ("ERROR: Unable to extract video data", ItemFailure::ExtractionFailed),
            ("HTTP Error 503", ItemFailure::Unknown),
        ];

        for (message, expected) in cases {
            assert_eq!(ItemFailure::classify(message), expected, "{}", message);
        }
    }

    #[test]
    fn test_resolve_error_failure_class() {
        let err = ResolveError::from_diagnostic("ERROR: Video unavailable\n");
        assert_eq!(err.failure(), ItemFailure::Unavailable);
        assert_eq!(err.to_string(), "unavailable: ERROR: Video unavailable");

        assert_eq!(
            ResolveError::NotFound("x".to_string()).failure(),
            ItemFailure::Unavailable
        );
        assert_eq!(
            ResolveError::Backend("spawn failed".to_string()).failure(),
            ItemFailure::Unknown
        );
    }
}
