// src/lib.rs

//! LwM2M client bootstrap and data model engine
//!
//! The core of an LwM2M client: a registry of installed objects, the
//! transaction coordinator that mutates them atomically, the notification
//! dispatcher that reconciles servers and observations after each change,
//! and the Bootstrap Interface state machine.
//!
//! # Architecture
//!
//! - One coarse lock: [`Client`] serializes every entry point and job
//! - Transactions: objects join the open transaction on first touch and are
//!   validated, then committed or rolled back, in ascending Object ID order
//! - Deferred work is plain [`sched::Job`] values serviced by [`Client::run`]
//! - Transport, registration and observations are collaborator traits
//!   ([`ServerManager`], [`CoapClient`], [`ObservationSink`])

pub mod bootstrap;
mod client;
pub mod coap;
pub mod config;
pub mod dm;
mod error;
pub mod notify;
pub mod observe;
pub mod path;
pub mod sched;
pub mod servers;
pub mod time;
pub mod transaction;

pub use bootstrap::{
    Action, BackoffState, BootstrapAction, BootstrapRequest, BootstrapResponse, BootstrapState,
    Link, ResponseContent,
};
pub use client::{Client, ClientBuilder};
pub use coap::{CoapClient, CoapCode, ExchangeId, ExchangeOutcome, RequestBootstrapMessage};
pub use config::{ClientConfig, DEFAULT_CONFIG_PATH, Lwm2mVersion, Transport};
pub use dm::{DataModel, MemoryObject, ObjectHandler, Value, WriteEntry};
pub use error::{Error, Result, keep_first};
pub use notify::{DataModelHooks, NotifyQueue};
pub use observe::ObservationSink;
pub use path::UriPath;
pub use servers::{Connection, SSID_BOOTSTRAP, ServerManager, SessionToken, Ssid};
pub use time::{Clock, MockClock, SystemClock};
