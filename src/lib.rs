//! Asynchronous webhook dispatcher.
//!
//! A [`producer::Producer`] validates candidate events and publishes them to an
//! ordered, partitioned [`channel::Channel`] keyed by client id. The
//! [`dispatcher::Dispatcher`] runs one worker per partition; each worker hands
//! events to the [`dispatcher::DeliveryExecutor`], which consults a named
//! [`dispatcher::CircuitBreaker`], performs the HTTP POST, and records exactly
//! one [`types::DeliveryAttemptLog`] per attempt through the
//! [`dispatcher::DeliveryLogWriter`].

use std::{future::Future, pin::Pin};

pub mod audit;
pub mod auth;
pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod producer;
pub mod state;
mod time;
pub mod types;

/// Boxed future returned by the collaborator traits so they stay object safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
