//! Middleware: cross-cutting stages wrapped around the terminal dispatch step.
//!
//! Stages compose as an onion. The first registered stage sees an item
//! first and the result last: `m1(m2(m3(terminal)))`. Each stage decides
//! whether to forward via [`Next::run`], short-circuit with its own
//! outcome, or dispatch further items through the [`Dispatcher`] it is given.

mod analytics;
mod error_boundary;
mod logger;
mod thunk;
mod validation;

use std::sync::Arc;

use crate::action::{Dispatch, Outcome};
use crate::dispatcher::Dispatcher;
use crate::error::Result;

pub use analytics::{AnalyticsConfig, AnalyticsEvent, AnalyticsMiddleware};
pub use error_boundary::{ErrorBoundaryConfig, ErrorBoundaryMiddleware};
pub use logger::{LoggerConfig, LoggerMiddleware};
pub use thunk::ThunkMiddleware;
pub use validation::{ValidationMiddleware, ValidatorFn};

/// One stage of the dispatch pipeline.
pub trait Middleware: Send + Sync {
    /// Handle `item`. `ctx` can read aggregate state and dispatch new items;
    /// `next` continues down the chain.
    fn handle(&self, ctx: &Dispatcher, item: Dispatch, next: Next<'_>) -> Result<Outcome>;
}

/// Continuation to the rest of the chain, ending at the reducers.
pub struct Next<'a> {
    dispatcher: &'a Dispatcher,
    chain: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    pub(crate) fn new(dispatcher: &'a Dispatcher, chain: &'a [Arc<dyn Middleware>]) -> Self {
        Self { dispatcher, chain }
    }

    /// Number of stages still ahead of the terminal step.
    pub fn remaining(&self) -> usize {
        self.chain.len()
    }

    /// Pass `item` to the next stage, or to the reducers if none is left.
    pub fn run(self, item: Dispatch) -> Result<Outcome> {
        match self.chain.split_first() {
            Some((stage, rest)) => stage.handle(self.dispatcher, item, Next::new(self.dispatcher, rest)),
            None => self.dispatcher.commit(item),
        }
    }
}

/// Middleware built from a closure.
pub struct FnMiddleware<F> {
    handle: F,
}

/// Build a middleware stage from a closure.
pub fn middleware_fn<F>(handle: F) -> FnMiddleware<F>
where
    F: Fn(&Dispatcher, Dispatch, Next<'_>) -> Result<Outcome> + Send + Sync,
{
    FnMiddleware { handle }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&Dispatcher, Dispatch, Next<'_>) -> Result<Outcome> + Send + Sync,
{
    fn handle(&self, ctx: &Dispatcher, item: Dispatch, next: Next<'_>) -> Result<Outcome> {
        (self.handle)(ctx, item, next)
    }
}
