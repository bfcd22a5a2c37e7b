// src/transaction/mod.rs

//! Data model transaction coordinator
//!
//! A transaction spans every object touched between the outermost
//! [`TransactionSession::begin`] and its matching finish. Objects join the
//! transaction the first time they are touched ([`TransactionSession::include`]),
//! which calls their `transaction_begin` hook exactly once. The outermost
//! finish then gives every included object exactly one outcome:
//!
//! ```text
//!                 begin            begin             finish           finish
//! IDLE(depth=0) ------> depth=1 ------> depth=2 ... ------> depth=1 ------> IDLE
//!                          |                                                ^
//!                          +-- include(oid): transaction_begin, once -----> |
//!                                                                           |
//!        outermost finish(Ok):  validate all -> commit all (ascending OID)  |
//!        outermost finish(Err): rollback all (ascending OID) ---------------+
//! ```
//!
//! Any failure along the way (a failed `transaction_begin`, a nested finish
//! with an error) makes the whole transaction rollback-only. Changes recorded
//! into the session's [`NotifyQueue`] are handed to the caller only after a
//! successful commit.

use crate::dm::registry::Registry;
use crate::error::{Error, Result, keep_first};
use crate::notify::queue::NotifyQueue;
use crate::path::Oid;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Transaction state of one data model
#[derive(Debug, Default)]
pub struct TransactionSession {
    depth: usize,
    included: BTreeSet<Oid>,
    queue: NotifyQueue,
    /// First error that doomed the current transaction
    rollback_only: Option<Error>,
}

impl TransactionSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session whose notify queue holds at most `limit` records
    pub fn with_queue_limit(limit: usize) -> Self {
        Self {
            queue: NotifyQueue::with_limit(limit),
            ..Self::default()
        }
    }

    /// Current nesting depth, 0 when idle
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_open(&self) -> bool {
        self.depth > 0
    }

    /// True if `oid` already received `transaction_begin`
    pub fn is_included(&self, oid: Oid) -> bool {
        self.included.contains(&oid)
    }

    /// Included objects in ascending order
    pub fn included(&self) -> impl Iterator<Item = Oid> + '_ {
        self.included.iter().copied()
    }

    /// True if the transaction can no longer commit
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only.is_some()
    }

    /// Open a transaction, or nest into the open one
    pub fn begin(&mut self) -> Result<()> {
        if self.depth == 0 {
            debug_assert!(self.included.is_empty());
            self.queue.clear();
            self.rollback_only = None;
            debug!("transaction started");
        }
        self.depth = self
            .depth
            .checked_add(1)
            .ok_or_else(|| Error::internal("transaction nesting overflow"))?;
        Ok(())
    }

    /// Include `oid` in the open transaction
    ///
    /// Calls the object's `transaction_begin` the first time only. If that
    /// fails the object is not included and the transaction becomes
    /// rollback-only.
    pub fn include(&mut self, registry: &mut Registry, oid: Oid) -> Result<()> {
        if self.depth == 0 {
            return Err(Error::internal(format!(
                "object {} touched outside a transaction",
                oid
            )));
        }
        if self.included.contains(&oid) {
            return Ok(());
        }
        let object = registry.get_mut(oid)?;
        if let Err(err) = object.transaction_begin() {
            warn!(oid, %err, "transaction_begin failed");
            self.mark_rollback_only(err.clone());
            return Err(err);
        }
        debug!(oid, "object included in transaction");
        self.included.insert(oid);
        Ok(())
    }

    /// Queue accumulating changes of the open transaction
    pub fn queue_mut(&mut self) -> Result<&mut NotifyQueue> {
        if self.depth == 0 {
            return Err(Error::internal("change recorded outside a transaction"));
        }
        Ok(&mut self.queue)
    }

    /// Queue of the open transaction, if any
    pub fn queue(&self) -> Option<&NotifyQueue> {
        (self.depth > 0).then_some(&self.queue)
    }

    /// Run `transaction_validate` on every included object
    ///
    /// The transaction stays open. Every object is validated even after a
    /// failure; the first error is returned.
    pub fn validate(&mut self, registry: &mut Registry) -> Result<()> {
        if self.depth == 0 {
            return Err(Error::internal("no transaction to validate"));
        }
        if let Some(err) = &self.rollback_only {
            return Err(err.clone());
        }
        let mut result = Ok(());
        for &oid in &self.included {
            let outcome = registry.get_mut(oid).and_then(|o| o.transaction_validate());
            if let Err(err) = &outcome {
                warn!(oid, %err, "transaction validation failed");
            }
            keep_first(&mut result, outcome);
        }
        result
    }

    /// Finish one nesting level
    ///
    /// Only the outermost finish dispatches: on success it validates and
    /// commits every included object and returns the accumulated
    /// [`NotifyQueue`]; otherwise it rolls everything back. Nested levels
    /// return `Ok(None)`.
    pub fn finish(
        &mut self,
        registry: &mut Registry,
        result: Result<()>,
    ) -> Result<Option<NotifyQueue>> {
        self.finish_impl(registry, result, true)
    }

    /// Like [`TransactionSession::finish`], for a transaction already
    /// validated with [`TransactionSession::validate`]
    pub fn finish_without_validation(
        &mut self,
        registry: &mut Registry,
        result: Result<()>,
    ) -> Result<Option<NotifyQueue>> {
        self.finish_impl(registry, result, false)
    }

    fn finish_impl(
        &mut self,
        registry: &mut Registry,
        result: Result<()>,
        validate: bool,
    ) -> Result<Option<NotifyQueue>> {
        match self.depth {
            0 => return Err(Error::internal("no transaction to finish")),
            1 => {}
            _ => {
                self.depth -= 1;
                return match result {
                    Ok(()) => Ok(None),
                    Err(err) => {
                        self.mark_rollback_only(err.clone());
                        Err(err)
                    }
                };
            }
        }

        let mut result = match self.rollback_only.take() {
            Some(doomed) => result.and(Err(doomed)),
            None => result,
        };
        if result.is_ok() && validate {
            result = self.validate(registry);
        }
        let outcome = match result {
            Ok(()) => self.commit_all(registry),
            Err(err) => {
                self.rollback_all(registry);
                Err(err)
            }
        };

        self.depth = 0;
        self.included.clear();
        let queue = self.queue.take();
        match outcome {
            Ok(()) => {
                debug!(objects = queue.len(), "transaction committed");
                Ok(Some(queue))
            }
            Err(err) => {
                debug!(%err, "transaction rolled back");
                Err(err)
            }
        }
    }

    /// Abandon the whole transaction regardless of nesting depth
    pub fn rollback(&mut self, registry: &mut Registry) -> Result<()> {
        if self.depth == 0 {
            return Ok(());
        }
        let result = self.rollback_quiet(registry);
        self.depth = 0;
        self.included.clear();
        self.queue.clear();
        self.rollback_only = None;
        debug!("transaction aborted");
        result
    }

    fn mark_rollback_only(&mut self, err: Error) {
        if self.rollback_only.is_none() {
            self.rollback_only = Some(err);
        }
    }

    /// Commit every included object; an object whose commit fails is rolled
    /// back and the first commit error is reported
    fn commit_all(&self, registry: &mut Registry) -> Result<()> {
        let mut result = Ok(());
        for &oid in &self.included {
            let Some(object) = registry.find_mut(oid) else {
                let err = Error::internal(format!("object {} vanished", oid));
                keep_first(&mut result, Err(err));
                continue;
            };
            if let Err(err) = object.transaction_commit() {
                warn!(oid, %err, "transaction commit failed, partial commit");
                if let Err(rollback_err) = object.transaction_rollback() {
                    warn!(oid, %rollback_err, "rollback after failed commit failed");
                }
                keep_first(&mut result, Err(err));
            }
        }
        result
    }

    fn rollback_all(&self, registry: &mut Registry) {
        // The original error takes priority over rollback errors
        let _ = self.rollback_quiet(registry);
    }

    fn rollback_quiet(&self, registry: &mut Registry) -> Result<()> {
        let mut result = Ok(());
        for &oid in &self.included {
            let outcome = registry
                .get_mut(oid)
                .and_then(|o| o.transaction_rollback());
            if let Err(err) = &outcome {
                warn!(oid, %err, "transaction rollback failed");
            }
            keep_first(&mut result, outcome);
        }
        result
    }
}
