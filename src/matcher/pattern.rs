use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("stream pattern must not be empty")]
    Empty,

    #[error("stream pattern '{pattern}' failed to compile: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Stream-name pattern where `*` matches any substring.
///
/// Everything except `*` is matched literally and the pattern may match
/// anywhere in the name, so `bar` selects `app/bar-1` and `*` selects
/// every stream.
#[derive(Debug, Clone)]
pub struct StreamPattern {
    source: String,
    regex: Regex,
}

impl StreamPattern {
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        let translated = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");

        let regex = Regex::new(&translated).map_err(|source| PatternError::InvalidRegex {
            pattern: pattern.to_string(),
            source,
        })?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, stream_name: &str) -> bool {
        self.regex.is_match(stream_name)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}
