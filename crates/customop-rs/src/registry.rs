//! Name-keyed registry of foreign operator creators.
//!
//! Registration normally happens once per operator type at startup, so a single mutex guards
//! both registration and lookup. Registering a name twice replaces the earlier creator and
//! logs a warning.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{EngineError, EngineResult};
use crate::op::{CustomOpProp, OpPropCreator};

#[derive(Default)]
pub struct OperatorRegistry {
    creators: Mutex<HashMap<String, OpPropCreator>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the creator for `op_type`, returning the creator it replaced.
    pub fn register(
        &self,
        op_type: impl Into<String>,
        creator: OpPropCreator,
    ) -> Option<OpPropCreator> {
        let op_type = op_type.into();
        let mut creators = self.creators.lock().expect("operator registry poisoned");
        if creators.contains_key(&op_type) {
            tracing::warn!(
                op_type = %op_type,
                "new registration is overriding existing custom operator"
            );
        }
        creators.insert(op_type, creator)
    }

    /// Looks up the creator for `op_type`; `None` leaves the decision to the caller.
    pub fn find(&self, op_type: &str) -> Option<OpPropCreator> {
        self.creators
            .lock()
            .expect("operator registry poisoned")
            .get(op_type)
            .cloned()
    }

    /// Resolves `op_type` and runs its creator with `kwargs`.
    pub fn create(
        &self,
        op_type: &str,
        kwargs: &[(String, String)],
    ) -> EngineResult<Box<dyn CustomOpProp>> {
        let creator = self
            .find(op_type)
            .ok_or_else(|| EngineError::OperatorNotFound(op_type.to_string()))?;
        creator(kwargs).map_err(|err| EngineError::CreatorFailed {
            op_type: op_type.to_string(),
            message: format!("{err:#}"),
        })
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.creators
            .lock()
            .expect("operator registry poisoned")
            .contains_key(op_type)
    }

    /// Registered operator types in sorted order.
    pub fn op_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .creators
            .lock()
            .expect("operator registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
