// src/observe.rs

//! Observation collaborator interface

use crate::error::Result;
use crate::path::UriPath;
use crate::servers::Ssid;
use tracing::trace;

/// Re-evaluates observations affected by a data model change
pub trait ObservationSink: Send {
    /// Re-evaluate observations at or below `path`
    ///
    /// With `invert_match` set, observations of every server except
    /// `origin` are notified; otherwise only those of `origin`.
    fn notify(&mut self, path: &UriPath, origin: Ssid, invert_match: bool) -> Result<()>;
}

/// Observation layer for clients without observations
#[derive(Debug, Default, Clone, Copy)]
pub struct NoObservations;

impl ObservationSink for NoObservations {
    fn notify(&mut self, path: &UriPath, origin: Ssid, _invert_match: bool) -> Result<()> {
        trace!(%path, origin, "no observations to notify");
        Ok(())
    }
}
