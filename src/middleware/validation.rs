//! Structural and per-type action validation.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Middleware, Next};
use crate::action::{Action, Dispatch, Outcome};
use crate::dispatcher::Dispatcher;
use crate::error::{Result, StateError};

/// Validator for one action type. `Err` carries the rejection reason.
pub type ValidatorFn = Arc<dyn Fn(&Action) -> std::result::Result<(), String> + Send + Sync>;

/// Rejects malformed actions and runs registered per-type validators.
///
/// A rejection short-circuits the chain: later stages and the reducers
/// never see the action.
#[derive(Default)]
pub struct ValidationMiddleware {
    validators: HashMap<String, Vec<ValidatorFn>>,
}

impl ValidationMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a validator for `action_type`. Several may be registered per type.
    pub fn with_validator<F>(mut self, action_type: impl Into<String>, validator: F) -> Self
    where
        F: Fn(&Action) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.validators
            .entry(action_type.into())
            .or_default()
            .push(Arc::new(validator));
        self
    }

    fn check(&self, action: &Action) -> Result<()> {
        action.validate()?;
        for validator in self.validators.get(&action.kind).into_iter().flatten() {
            validator(action).map_err(|reason| StateError::DomainValidation {
                action_type: action.kind.clone(),
                reason,
            })?;
        }
        Ok(())
    }
}

impl Middleware for ValidationMiddleware {
    fn handle(&self, _ctx: &Dispatcher, item: Dispatch, next: Next<'_>) -> Result<Outcome> {
        if let Dispatch::Action(action) = &item {
            self.check(action)?;
        }
        next.run(item)
    }
}
