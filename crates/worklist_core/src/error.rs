use thiserror::Error;

/// Failure kinds a worklist run can abort with.
///
/// Library functions return `anyhow::Result`; callers that need to branch on
/// the kind use `error.downcast_ref::<WorklistError>()`.
#[derive(Debug, Error)]
pub enum WorklistError {
    #[error("missing WIKI_USER or WIKI_PASS environment variables")]
    MissingCredentials,

    #[error("MediaWiki login failed: {reason}")]
    Authentication { reason: String },

    #[error("failed to load report from {source_name}: {message}")]
    SourceLoad {
        source_name: String,
        message: String,
    },

    #[error("worklist edit failed for {title}: {payload}")]
    Edit { title: String, payload: String },

    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl WorklistError {
    pub fn source_load(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SourceLoad {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::WorklistError;

    #[test]
    fn kinds_survive_anyhow_wrapping() {
        let error = anyhow::Error::new(WorklistError::Authentication {
            reason: "Incorrect password".to_string(),
        })
        .context("login step");
        let kind = error.downcast_ref::<WorklistError>().expect("typed kind");
        assert!(matches!(kind, WorklistError::Authentication { .. }));
        assert!(format!("{error:#}").contains("Incorrect password"));
    }

    #[test]
    fn source_load_message_names_the_source() {
        let error = WorklistError::source_load("file report.json", "expected array");
        assert_eq!(
            error.to_string(),
            "failed to load report from file report.json: expected array"
        );
    }
}
