//! Operation Context
//!
//! Identity of the (already authenticated) caller plus tracing metadata.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::OwnerId;

/// Context for an operation, used for ownership checks and tracing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationContext {
    /// Authenticated user issuing the operation
    pub caller_id: OwnerId,

    /// Correlation ID for request tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl OperationContext {
    /// Create a context for an authenticated caller
    pub fn new(caller_id: OwnerId) -> Self {
        Self {
            caller_id,
            correlation_id: None,
        }
    }

    /// Create context with correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Generate a new correlation ID if not present
    pub fn ensure_correlation_id(&mut self) -> Uuid {
        *self.correlation_id.get_or_insert_with(Uuid::new_v4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_builder() {
        let caller = OwnerId::new();
        let correlation_id = Uuid::new_v4();

        let context = OperationContext::new(caller).with_correlation_id(correlation_id);

        assert_eq!(context.caller_id, caller);
        assert_eq!(context.correlation_id, Some(correlation_id));
    }

    #[test]
    fn test_ensure_correlation_id() {
        let mut context = OperationContext::new(OwnerId::new());
        assert!(context.correlation_id.is_none());

        let id = context.ensure_correlation_id();
        assert_eq!(context.correlation_id, Some(id));

        // Calling again should return the same ID
        assert_eq!(context.ensure_correlation_id(), id);
    }
}
