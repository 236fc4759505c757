//! Configuration for the conversation core
//!
//! Provides centralized configuration for all components.

use std::time::Duration;

/// Conversation history budget and trimming behavior
#[derive(Clone, Debug)]
pub struct HistoryConfig {
    /// Maximum number of turns kept in the prompt window
    pub max_turns: usize,

    /// Maximum estimated token count of the prompt window
    pub max_context_tokens: usize,

    /// Whether evicted turns are folded into a rolling summary
    pub summarize_evicted: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_turns: 32,
            max_context_tokens: 4096,
            summarize_evicted: true,
        }
    }
}

/// Retry behavior for gateway calls
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum attempts per stage call (first try included)
    pub max_attempts: u32,

    /// Backoff before the first retry
    pub initial_backoff: Duration,

    /// Upper bound for exponential backoff
    pub max_backoff: Duration,

    /// Independent timeout applied to each gateway call
    pub call_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            call_timeout: Duration::from_secs(60),
        }
    }
}

/// Output chunk ordering and backpressure
#[derive(Clone, Debug)]
pub struct AssemblerConfig {
    /// Maximum buffered output chunks before upstream synthesis blocks
    pub buffer_depth: usize,

    /// How long to hold out-of-order chunks before best-effort delivery
    pub reorder_window: Duration,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            buffer_depth: 16,
            reorder_window: Duration::from_secs(2),
        }
    }
}

/// Session lifecycle settings
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Sessions idle longer than this are evicted by `evict_idle`
    pub idle_timeout: Duration,

    /// Capacity of the per-session event broadcast channel
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
            event_capacity: 256,
        }
    }
}

/// Configuration for the complete conversation core
#[derive(Clone, Debug, Default)]
pub struct ConfabConfig {
    /// History budget and trimming
    pub history: HistoryConfig,

    /// Gateway retry policy
    pub retry: RetryConfig,

    /// Output assembly
    pub assembler: AssemblerConfig,

    /// Session lifecycle
    pub session: SessionConfig,
}

impl ConfabConfig {
    /// Set the history turn budget
    pub fn with_history_budget(mut self, max_turns: usize, max_context_tokens: usize) -> Self {
        self.history.max_turns = max_turns;
        self.history.max_context_tokens = max_context_tokens;
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the reorder window for out-of-order synthesis results
    pub fn with_reorder_window(mut self, window: Duration) -> Self {
        self.assembler.reorder_window = window;
        self
    }

    /// Set the session idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.session.idle_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.history.max_turns == 0 {
            return Err("history.max_turns must be at least 1".to_string());
        }
        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.call_timeout.is_zero() {
            return Err("retry.call_timeout must be non-zero".to_string());
        }
        if self.assembler.buffer_depth == 0 {
            return Err("assembler.buffer_depth must be at least 1".to_string());
        }
        if self.session.event_capacity == 0 {
            return Err("session.event_capacity must be at least 1".to_string());
        }
        Ok(())
    }
}
