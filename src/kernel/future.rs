//! Pending device invocations

use serde::{Deserialize, Serialize};

use crate::kernel::NetValue;

/// A deferred device invocation
///
/// Resolved by the host before a resume; read by the guest through the
/// `Future` methods. Input and output are plain network values, so pending and
/// resolved futures persist with the thread graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Future {
    pub method: String,
    pub input: Vec<NetValue>,
    /// `None` while pending
    pub output: Option<Result<Vec<NetValue>, String>>,
}

impl Future {
    pub fn new(
        method: impl Into<String>,
        input: Vec<NetValue>,
    ) -> Self {
        Self {
            method: method.into(),
            input,
            output: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.output.is_some()
    }
}
