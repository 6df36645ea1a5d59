//! # pubrelay
//!
//! `pubrelay` is a small publish/subscribe client layer with an explicit
//! acknowledgment and retry contract. A `Publisher` serializes application
//! payloads and emits them to a named topic; a `Subscriber` receives pushed
//! deliveries, hands each to a handler, and tracks the handler's
//! accept/reject decision back to the broker. The broker itself sits behind
//! an injected trait seam, so the same code runs against the bundled
//! in-memory broker or a real transport.
//!
//! ## Core Modules
//!
//! The library is structured into several modules, each with a distinct responsibility:
//!
//! - `broker`: The client seam to the external broker, plus the in-memory implementation.
//! - `codec`: Payload serialization and the wire attributes stamped on every message.
//! - `config`: Handles loading and merging application configuration.
//! - `manager`: Composes one publisher with a set of named subscribers.
//! - `publisher`: Single-message and fail-fast batch publication.
//! - `subscriber`: Listener lifecycle, delivery handles, handlers, and bounded retry.
//! - `utils`: Contains shared utilities, such as error handling and logging setup.

pub mod broker;
pub mod codec;
pub mod config;
pub mod manager;
pub mod publisher;
pub mod subscriber;
pub mod utils;
