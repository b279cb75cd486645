use std::fmt;
use std::time::Duration;

/// How the retry machinery treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Try again after a backoff delay.
    Retry,
    /// Try again with a more capable strategy.
    Escalate,
    /// Retrying cannot succeed.
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Network,
    /// Rate budget exhausted, either at the gate or signalled by the host (429).
    RateLimited { retry_after: Option<Duration> },
    Blocked,
    Disallowed,
    EmptyContent,
    MalformedTarget,
    HttpStatus(u16),
    TooLarge { max_bytes: u64, actual: Option<u64> },
    /// Crawl directives could not be resolved; fetching is denied.
    PolicyUnavailable,
    RenderUnavailable,
    Normalization,
    Cancelled,
    Internal,
}

impl FailureKind {
    pub fn disposition(&self) -> Disposition {
        match self {
            FailureKind::Timeout | FailureKind::Network | FailureKind::RateLimited { .. } => {
                Disposition::Retry
            }
            FailureKind::HttpStatus(code) if *code == 408 || (500..600).contains(code) => {
                Disposition::Retry
            }
            FailureKind::EmptyContent => Disposition::Escalate,
            FailureKind::Blocked
            | FailureKind::Disallowed
            | FailureKind::MalformedTarget
            | FailureKind::HttpStatus(_)
            | FailureKind::TooLarge { .. }
            | FailureKind::PolicyUnavailable
            | FailureKind::RenderUnavailable
            | FailureKind::Normalization
            | FailureKind::Cancelled
            | FailureKind::Internal => Disposition::Terminal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.disposition() == Disposition::Retry
    }

    /// The minimum wait the failure itself asks for, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FailureKind::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Failures that say "this strategy cannot get the content here".
    pub fn signals_insufficient_strategy(&self) -> bool {
        matches!(self, FailureKind::EmptyContent | FailureKind::Blocked)
    }

    /// Stable short name, used in logs, checkpoints and CLI output.
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Network => "network",
            FailureKind::RateLimited { .. } => "rate_limited",
            FailureKind::Blocked => "blocked",
            FailureKind::Disallowed => "disallowed",
            FailureKind::EmptyContent => "empty_content",
            FailureKind::MalformedTarget => "malformed_target",
            FailureKind::HttpStatus(_) => "http_status",
            FailureKind::TooLarge { .. } => "too_large",
            FailureKind::PolicyUnavailable => "policy_unavailable",
            FailureKind::RenderUnavailable => "render_unavailable",
            FailureKind::Normalization => "normalization",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::RateLimited {
                retry_after: Some(wait),
            } => write!(f, "rate limited (retry after {} ms)", wait.as_millis()),
            FailureKind::RateLimited { retry_after: None } => write!(f, "rate limited"),
            FailureKind::Blocked => write!(f, "blocked by anti-bot response"),
            FailureKind::Disallowed => write!(f, "disallowed by robots directives"),
            FailureKind::EmptyContent => write!(f, "content requires rendering"),
            FailureKind::MalformedTarget => write!(f, "malformed target"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::PolicyUnavailable => write!(f, "crawl policy unavailable"),
            FailureKind::RenderUnavailable => write!(f, "rendering backend unavailable"),
            FailureKind::Normalization => write!(f, "normalization failed"),
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::Internal => write!(f, "internal error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for FetchError {}
