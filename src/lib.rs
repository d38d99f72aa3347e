//! cqlmap – maps typed application objects onto a wide-column store.
//!
//! Types describe themselves once through a declarative schema (see
//! [`schema`]). The mapper compiles that into descriptors, and from those
//! into CQL query text:
//! * An [`metadata::EntityDescriptor`] holds the keyspace template, the suffix
//!   keys, the tables with their key roles and the fields. Polymorphic roots
//!   and their variants share tables through a type-key column.
//! * A [`context::Context`] binds an entity to suffix values and, optionally,
//!   to a live object. Each resulting [`context::BoundContext`] names one
//!   keyspace: the template joined with the suffix values.
//! * Statements (see [`statement`]) resolve their clauses and assignments
//!   against every bound context and render one fragment per keyspace.
//!   Binding a suffix with IN fans a statement out over the Cartesian
//!   product of the bound values.
//! * On execution each fan-out branch becomes its own request, and the
//!   [`fanout::CompoundFuture`] joins them into one ordered result.
//!
//! These descriptors are owned and shared by a keeper (see the [`keeper`]
//! module), which builds each of them once per process and hands out `Arc`s.
//!
//! ## Modules
//! * [`datatype`] – CQL types, [`datatype::Value`] and the
//!   [`datatype::FieldValue`] conversions.
//! * [`persisted`] – persister hooks and the dual-representation
//!   [`persisted::PersistedValue`].
//! * [`schema`] / [`metadata`] / [`keeper`] – declarative input, resolved
//!   descriptors and their cache.
//! * [`clause`] / [`assignment`] – WHERE relations and SET operations,
//!   including the delayed forms that read a bound object.
//! * [`statement`] – builders, compilation and the BATCH/SEQUENCE envelopes.
//! * [`pending`] / [`fanout`] / [`result`] – asynchronous handles and results.
//! * [`executor`] – the boundary to the database client.
//! * [`mapper`] – the facade tying it all together.
//!
//! ## Execution
//! The crate does not speak the wire protocol. Applications implement
//! [`executor::Executor`] over their client of choice; the mapper passes
//! compiled text and request options through it unmodified.
//!
//! ## Logging
//! Everything logs through `tracing`. [`config::init_tracing`] installs a
//! plain `fmt` subscriber for binaries and tests that have none.

pub mod assignment;
pub mod clause;
pub mod codec;
pub mod config;
pub mod context;
pub mod datatype;
pub mod error;
pub mod executor;
pub mod fanout;
pub mod keeper;
pub mod mapper;
pub mod metadata;
pub mod pending;
pub mod persisted;
pub mod render;
pub mod result;
pub mod schema;
pub mod statement;

pub use crate::error::{MapperError, Result};
pub use crate::mapper::Mapper;
