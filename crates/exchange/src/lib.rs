//! Exchange kernel of a peer-to-peer remoting stack.
//!
//! This crate frames messages on a compact binary wire protocol,
//! correlates asynchronous requests with their responses across
//! long-lived connections, and negotiates per-connection behavior (idle
//! timeout, and whether a connection is dedicated to reads, writes, or
//! both) between two peers.
//!
//! # Features
//!
//! - **Bit-packed framing**: an 8-byte header carries direction, oneway
//!   and heartbeat flags, serialize/compress/language tags, a packet
//!   identifier, and an opcode
//! - **Pending-call correlation**: a shared tracer resolves every two-way
//!   call exactly once, whether by remote response, local write failure,
//!   or expiry
//! - **Future/callback duality**: each call can be awaited with a bound
//!   or delivered to a callback, through one completion primitive
//! - **Role negotiation**: connections declare read/write roles per
//!   logical peer, registered on the receiving side with roles inverted
//!
//! # Example
//!
//! ```no_run
//! use skiff_exchange::{ChannelConfig, Exchange, RequestControl};
//! use skiff_transport::Transport;
//! use skiff_transport_memory::MemoryTransport;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # use skiff_exchange::{HandlerResponse, RequestHandler, Result};
//! # use bytes::Bytes;
//! # struct Echo;
//! # #[async_trait::async_trait]
//! # impl RequestHandler for Echo {
//! #     async fn handle_request(&self, _opcode: i16, body: Bytes) -> Result<HandlerResponse> {
//! #         Ok(HandlerResponse::Payload(body))
//! #     }
//! # }
//! async fn example() -> Result<()> {
//!     let exchange = Exchange::new();
//!     let transport = MemoryTransport::default();
//!     let conn = transport.connect("memory://peer").await?;
//!     let channel = exchange.attach(conn, ChannelConfig::default(), Arc::new(Echo));
//!
//!     let control = RequestControl::new(7).with_timeout(Duration::from_secs(5))?;
//!     let future = channel.request(Bytes::from("hello"), &control).await?;
//!     let reply = future.await_response(Duration::from_secs(5)).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod channel;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod future;
pub mod negotiation;
pub mod protocol;
pub mod registry;
pub mod tracer;

// Re-export commonly used types
pub use channel::{ChannelConfig, ExchangeChannel};
pub use control::RequestControl;
pub use dispatch::{Exchange, HandlerResponse, RequestHandler};
pub use error::{Error, ProtocolError, Result, ValidationError};
pub use future::{ResponseCallback, ResponseFuture};
pub use negotiation::Negotiator;
pub use protocol::negotiate::{ChannelRole, NegotiateOffer};
pub use protocol::{Frame, RemotingCodec};
pub use registry::ChannelRoleRegistry;
pub use tracer::{CallResult, Tracer};

// Re-export dependencies that are part of our public API
pub use bytes::Bytes;
