//! Execution Context
//!
//! Per-request parameter sets plus correlation metadata. Discarded once the
//! request completes.

use std::time::Instant;

use serde_json::{Map, Value};
use uuid::Uuid;

/// Parameters and metadata for one request
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Request ID for log correlation
    pub request_id: Uuid,

    /// Values allowed to be spliced into statement text
    pub template_params: Map<String, Value>,

    /// Values bound through the driver
    pub bound_params: Map<String, Value>,

    started_at: Instant,
}

impl ExecutionContext {
    pub fn new(template_params: Map<String, Value>, bound_params: Map<String, Value>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            template_params,
            bound_params,
            started_at: Instant::now(),
        }
    }

    /// A context with no parameters
    pub fn empty() -> Self {
        Self::new(Map::new(), Map::new())
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u128 {
        self.started_at.elapsed().as_millis()
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::empty()
    }
}
