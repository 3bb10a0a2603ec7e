//! Telemetry utilities.

/// Standardized span constructors for permission observability.
pub mod spans {
    use crate::perm::SubjectType;
    use tracing::{Span, info_span};

    /// Create a span for an authorization on the async path.
    pub fn authorize(user: &str, node: &str) -> Span {
        info_span!("authorize", user = %user, node = %node)
    }

    /// Create a span for a grant-set mutation.
    pub fn mutation(op: &str, subject_type: SubjectType, subject_id: &str, node: &str) -> Span {
        info_span!(
            "mutation",
            op = %op,
            subject_type = %subject_type,
            subject = %subject_id,
            node = %node
        )
    }
}
