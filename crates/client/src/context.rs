use std::sync::Arc;

/// Per-call context threaded through the engine and transports.
///
/// Carries the name of the transport currently dispatching, so a
/// transport that re-enters the engine (for example a filtering
/// transport delegating to another upstream) is caught when the chain
/// loops back onto itself.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    transport_name: Option<Arc<str>>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the transport this query is currently dispatched on.
    pub fn transport_name(&self) -> Option<&str> {
        self.transport_name.as_deref()
    }

    /// Child context with the breadcrumb replaced.
    pub fn with_transport_name(&self, name: &str) -> Self {
        Self {
            transport_name: Some(Arc::from(name)),
        }
    }
}
