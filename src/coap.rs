// src/coap.rs

//! CoAP exchange collaborator interface
//!
//! Message framing, retransmission and block-wise transfer live in the
//! transport. The engine only submits the Request Bootstrap message and is
//! told about its completion through [`crate::Client::on_bootstrap_response`].

use crate::error::{Error, Result};
use crate::servers::Ssid;
use std::fmt;

/// CoAP message code `class.detail`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoapCode {
    pub class: u8,
    pub detail: u8,
}

impl CoapCode {
    pub const POST: Self = Self::new(0, 2);
    pub const CREATED: Self = Self::new(2, 1);
    pub const DELETED: Self = Self::new(2, 2);
    pub const CHANGED: Self = Self::new(2, 4);
    pub const CONTENT: Self = Self::new(2, 5);
    pub const BAD_REQUEST: Self = Self::new(4, 0);
    pub const NOT_FOUND: Self = Self::new(4, 4);

    pub const fn new(class: u8, detail: u8) -> Self {
        Self { class, detail }
    }

    pub fn is_success(&self) -> bool {
        self.class == 2
    }

    pub fn is_client_error(&self) -> bool {
        self.class == 4
    }

    /// Response code for an engine error
    pub fn from_error(err: &Error) -> Self {
        let (class, detail) = err.coap_code();
        Self::new(class, detail)
    }
}

impl fmt::Display for CoapCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class, self.detail)
    }
}

/// Identifier of an outstanding exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExchangeId(pub u64);

/// How an exchange completed
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeOutcome {
    /// Final response received
    Response(CoapCode),
    /// First block of a block-wise response received
    PartialContent(CoapCode),
    /// Transport failure or timeout
    Failed(Error),
    /// Exchange was cancelled locally
    Cancelled,
}

/// Content-Format used for hierarchical payloads on LwM2M 1.1 (SenML CBOR)
pub const FORMAT_SENML_CBOR: u16 = 112;

/// Request Bootstrap message (POST /bs?ep=...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBootstrapMessage {
    pub code: CoapCode,
    pub uri_path: Vec<String>,
    pub uri_query: Vec<String>,
}

impl RequestBootstrapMessage {
    /// Value of a `key=value` query option
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.uri_query.iter().find_map(|option| {
            option
                .split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }
}

/// Asynchronous request submission
///
/// `cancel_exchange` must not invoke any completion synchronously; the
/// engine handles the cancellation itself.
pub trait CoapClient: Send {
    /// Submit a request to `ssid`, returning once it is armed
    fn send_async_request(&mut self, ssid: Ssid, request: &RequestBootstrapMessage)
        -> Result<ExchangeId>;

    /// Abandon an outstanding exchange
    fn cancel_exchange(&mut self, ssid: Ssid, id: ExchangeId);
}
