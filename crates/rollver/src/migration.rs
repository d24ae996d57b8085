//! Migration contract and request-scoped context
//!
//! A [`TypeMigration`] is the unit callers register: one bidirectional
//! transformation for one type at one version, operating on the generic
//! decoded tree of exactly one node, never the whole document.

use crate::error::MigrationError;
use crate::version::Version;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A bidirectional transformation for one type at one version.
///
/// `migrate_forward` converts a node from the shape of the version
/// immediately preceding this one into the shape expected at this version;
/// `migrate_backward` is its inverse. Implementations must be `Send + Sync`
/// since one registered migration serves concurrent requests.
pub trait TypeMigration: Send + Sync {
    /// Move a decoded node one version step toward the current shape
    ///
    /// # Errors
    /// Returns an error when the node does not have the expected shape or
    /// the transformation itself fails; the whole traversal is aborted.
    fn migrate_forward(&self, ctx: &MigrationContext, value: Value)
        -> Result<Value, MigrationError>;

    /// Move a decoded node one version step toward this version's
    /// predecessor shape
    ///
    /// # Errors
    /// Same contract as [`TypeMigration::migrate_forward`].
    fn migrate_backward(
        &self,
        ctx: &MigrationContext,
        value: Value,
    ) -> Result<Value, MigrationError>;
}

/// Adapter building a [`TypeMigration`] from two closures.
pub struct FnMigration<F, B> {
    forward: F,
    backward: B,
}

impl<F, B> FnMigration<F, B>
where
    F: Fn(&MigrationContext, Value) -> Result<Value, MigrationError> + Send + Sync,
    B: Fn(&MigrationContext, Value) -> Result<Value, MigrationError> + Send + Sync,
{
    /// Pair a forward and a backward closure
    pub fn new(forward: F, backward: B) -> Self {
        Self { forward, backward }
    }
}

impl<F, B> TypeMigration for FnMigration<F, B>
where
    F: Fn(&MigrationContext, Value) -> Result<Value, MigrationError> + Send + Sync,
    B: Fn(&MigrationContext, Value) -> Result<Value, MigrationError> + Send + Sync,
{
    fn migrate_forward(
        &self,
        ctx: &MigrationContext,
        value: Value,
    ) -> Result<Value, MigrationError> {
        (self.forward)(ctx, value)
    }

    fn migrate_backward(
        &self,
        ctx: &MigrationContext,
        value: Value,
    ) -> Result<Value, MigrationError> {
        (self.backward)(ctx, value)
    }
}

/// Request-scoped context handed to every migration function.
///
/// Carries the resolved caller version, the current version, and a
/// cooperative cancellation signal. Migration functions may check the
/// signal and abort early; the traversal engine itself imposes no timeout.
#[derive(Debug, Clone)]
pub struct MigrationContext {
    from: Version,
    to: Version,
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl MigrationContext {
    pub(crate) fn new(from: Version, to: Version) -> Self {
        Self {
            from,
            to,
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    pub(crate) fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    pub(crate) fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Version the caller speaks
    #[inline]
    #[must_use]
    pub fn caller_version(&self) -> &Version {
        &self.from
    }

    /// Version the system currently serves
    #[inline]
    #[must_use]
    pub fn current_version(&self) -> &Version {
        &self.to
    }

    /// Whether the caller has cancelled the operation or its deadline
    /// passed
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail fast when cancelled; for use at the top of expensive
    /// migrations
    ///
    /// # Errors
    /// Returns [`MigrationError::Cancelled`] when cancelled.
    pub fn check_cancelled(&self) -> Result<(), MigrationError> {
        if self.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }
        Ok(())
    }
}

/// Handle for cancelling in-flight migrations bound to one context.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub(crate) fn new(flag: Arc<AtomicBool>) -> Self {
        Self(flag)
    }

    /// Signal cancellation to every migration sharing the context
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was signalled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
