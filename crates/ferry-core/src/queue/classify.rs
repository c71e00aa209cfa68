//! Error classifier: fatal or retryable.
//!
//! 純粋関数として実装（状態を持たない）。判定順は
//! fatal（status → code → keyword）→ retryable（status → code → transport）→ default。

use serde::{Deserialize, Serialize};

use crate::domain::{AttemptError, ErrorKind};

/// Classification tables, loaded as part of the upload configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationRules {
    pub fatal_statuses: Vec<u16>,
    pub fatal_codes: Vec<i64>,
    pub fatal_keywords: Vec<String>,

    /// Checked in addition to the whole 5xx range.
    pub retryable_statuses: Vec<u16>,
    pub retryable_codes: Vec<i64>,
}

impl Default for ClassificationRules {
    fn default() -> Self {
        Self {
            fatal_statuses: vec![401, 403, 404],
            fatal_codes: vec![401, 403, 404],
            fatal_keywords: [
                "token无效",
                "权限不足",
                "账号异常",
                "接口不存在",
                "invalid token",
                "permission denied",
                "unauthorized",
                "forbidden",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            retryable_statuses: vec![429],
            retryable_codes: vec![-1, 400001, 400002, 429, 503],
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: ClassificationRules,
    keywords_lower: Vec<String>,
}

impl ErrorClassifier {
    pub fn new(rules: ClassificationRules) -> Self {
        let keywords_lower = rules
            .fatal_keywords
            .iter()
            .filter(|k| !k.is_empty())
            .map(|k| k.to_lowercase())
            .collect();
        Self {
            rules,
            keywords_lower,
        }
    }

    pub fn classify(&self, error: &AttemptError) -> ErrorKind {
        if self.is_fatal(error) {
            return ErrorKind::Fatal;
        }
        if !self.is_known_retryable(error) {
            tracing::debug!(error = %error, "unclassified upload error, treating as retryable");
        }
        ErrorKind::Retryable
    }

    fn is_fatal(&self, error: &AttemptError) -> bool {
        if let Some(status) = error.http_status()
            && self.rules.fatal_statuses.contains(&status)
        {
            return true;
        }
        if let Some(code) = error.upstream_code()
            && self.rules.fatal_codes.contains(&code)
        {
            return true;
        }
        let message = error.message().to_lowercase();
        self.keywords_lower.iter().any(|k| message.contains(k.as_str()))
    }

    fn is_known_retryable(&self, error: &AttemptError) -> bool {
        match error {
            AttemptError::Transport { .. } => true,
            AttemptError::Protocol { status, code, .. } => {
                let status_retryable = status.is_some_and(|s| {
                    (500..=599).contains(&s) || self.rules.retryable_statuses.contains(&s)
                });
                let code_retryable = code.is_some_and(|c| self.rules.retryable_codes.contains(&c));
                status_retryable || code_retryable
            }
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(ClassificationRules::default())
    }
}
