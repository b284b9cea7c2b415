//! Short human-readable messages for the dismissible failure banner.

use remote::StoreError;

/// Which operation failed. Keeps banner text specific without leaking
/// transport detail into the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureContext {
    Load,
    Create,
    Update,
    Delete,
    Positions,
}

fn action(context: FailureContext) -> &'static str {
    match context {
        FailureContext::Load => "load the board",
        FailureContext::Create => "create the card",
        FailureContext::Update => "save the card",
        FailureContext::Delete => "delete the card",
        FailureContext::Positions => "save the new card order",
    }
}

pub fn describe_failure(context: FailureContext, err: &StoreError) -> String {
    match err {
        StoreError::Api(api) => format!("Could not {}: {}.", action(context), api.message),
        StoreError::Transport(_) => format!(
            "Could not {}: the store is unreachable. Check your connection and retry.",
            action(context)
        ),
        StoreError::Unavailable => format!(
            "Could not {}: no store is configured.",
            action(context)
        ),
        other => format!("Could not {}: {other}.", action(context)),
    }
}

/// Banner raised when the realtime channel drops after having been up.
pub fn realtime_lost() -> String {
    "Live updates disconnected. Changes from other clients will not appear until you reload."
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::error::{ApiError, ErrorCode};

    #[test]
    fn api_errors_surface_the_store_message() {
        let err = StoreError::Api(ApiError::new(ErrorCode::Validation, "title too long"));
        assert_eq!(
            describe_failure(FailureContext::Create, &err),
            "Could not create the card: title too long."
        );
    }

    #[test]
    fn unavailable_store_reads_as_configuration_problem() {
        let message = describe_failure(FailureContext::Load, &StoreError::Unavailable);
        assert!(message.contains("no store is configured"));
    }
}
