//! The boundary to the database client.
//!
//! The mapper never talks to the wire itself. It hands compiled query text
//! plus pass-through settings to an [`Executor`] and gets a [`Pending`]
//! result set back.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pending::Pending;
use crate::result::ResultSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Consistency {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    LocalOne,
    Serial,
    LocalSerial,
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Consistency::Any => "ANY",
            Consistency::One => "ONE",
            Consistency::Two => "TWO",
            Consistency::Three => "THREE",
            Consistency::Quorum => "QUORUM",
            Consistency::All => "ALL",
            Consistency::LocalQuorum => "LOCAL_QUORUM",
            Consistency::EachQuorum => "EACH_QUORUM",
            Consistency::LocalOne => "LOCAL_ONE",
            Consistency::Serial => "SERIAL",
            Consistency::LocalSerial => "LOCAL_SERIAL",
        };
        write!(f, "{}", name)
    }
}

/// Settings carried to the collaborator unmodified. `None` leaves the
/// collaborator's own default in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub consistency: Option<Consistency>,
    pub serial_consistency: Option<Consistency>,
    pub fetch_size: Option<u32>,
    pub tracing: bool,
    pub idempotent: Option<bool>,
}

impl RequestOptions {
    /// Fills unset fields from `defaults`.
    pub fn or(&self, defaults: &RequestOptions) -> RequestOptions {
        RequestOptions {
            consistency: self.consistency.or(defaults.consistency),
            serial_consistency: self.serial_consistency.or(defaults.serial_consistency),
            fetch_size: self.fetch_size.or(defaults.fetch_size),
            tracing: self.tracing || defaults.tracing,
            idempotent: self.idempotent.or(defaults.idempotent),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub query: String,
    pub options: RequestOptions,
}

pub trait Executor: Send + Sync {
    fn execute_async(&self, request: Request) -> Pending<Box<dyn ResultSet>>;
}
