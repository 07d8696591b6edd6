/// Limits applied to application handler invocations.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Per-invocation timeout in milliseconds.
    pub handler_timeout_ms: u64,
    /// Maximum number of handlers running at once before new ones are shed.
    pub max_concurrent_handlers: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            handler_timeout_ms: 30_000,
            max_concurrent_handlers: 1000,
        }
    }
}
