//! Stage abstraction
//!
//! The pipeline drives every heavy stage through the same `process(data) ->
//! data` interface, so whether a stage runs inline or in a subprocess is a
//! wiring decision, never a branch inside stage code. `InlineStage` wraps an
//! in-process function; `IsolatedStage` forwards to a [`WorkerHost`].

use crate::host::WorkerHost;
use crate::{Result, WorkerError};
use serde_json::Value;

/// A pipeline stage: JSON in, JSON out
pub trait Stage: Send {
    /// Stage name for logs and metrics
    fn name(&self) -> &str;

    /// Process one request
    fn process(&mut self, data: Value) -> Result<Value>;

    /// Release resources; called once when the pipeline stops
    fn shutdown(&mut self) {}
}

/// Stage running in-process
pub struct InlineStage {
    name: String,
    func: Box<dyn FnMut(Value) -> Result<Value> + Send>,
}

impl InlineStage {
    /// Wrap a function as a stage
    pub fn new(
        name: impl Into<String>,
        func: impl FnMut(Value) -> Result<Value> + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }
}

impl Stage for InlineStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, data: Value) -> Result<Value> {
        (self.func)(data)
    }
}

/// Stage running in a crash-isolated subprocess
pub struct IsolatedStage {
    host: WorkerHost,
}

impl IsolatedStage {
    /// Wrap a started worker host
    pub fn new(host: WorkerHost) -> Self {
        Self { host }
    }

    /// Access the underlying host (metrics, state)
    pub fn host(&self) -> &WorkerHost {
        &self.host
    }
}

impl Stage for IsolatedStage {
    fn name(&self) -> &str {
        self.host.name()
    }

    fn process(&mut self, data: Value) -> Result<Value> {
        self.host.request(data)
    }

    fn shutdown(&mut self) {
        self.host.shutdown();
    }
}

/// Convenience constructor for a failing stage slot
///
/// Used when a stage has been disabled after repeated crashes: requests keep
/// flowing through the uniform interface but always error.
pub struct DisabledStage {
    name: String,
}

impl DisabledStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Stage for DisabledStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, _data: Value) -> Result<Value> {
        Err(WorkerError::Stage(format!(
            "stage '{}' is disabled",
            self.name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inline_stage_runs_function() {
        let mut stage = InlineStage::new("double", |data| {
            let n = data["n"].as_i64().unwrap_or(0);
            Ok(json!({"n": n * 2}))
        });
        assert_eq!(stage.name(), "double");
        assert_eq!(stage.process(json!({"n": 21})).unwrap(), json!({"n": 42}));
    }

    #[test]
    fn test_inline_stage_propagates_errors() {
        let mut stage =
            InlineStage::new("fail", |_| Err(WorkerError::Stage("nope".to_string())));
        assert!(stage.process(json!({})).is_err());
    }

    #[test]
    fn test_disabled_stage_always_errors() {
        let mut stage = DisabledStage::new("ocr");
        let err = stage.process(json!({})).unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }
}
