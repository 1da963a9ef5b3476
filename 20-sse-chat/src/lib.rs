//! Single-topic chat server built on Server-Sent Events.
//!
//! Browsers open `/sse` and receive every message published through
//! `/chat?message=...` while they stay connected. There is no history and no
//! replay: a message reaches exactly the subscribers registered when it was
//! published.
//!
//! - [`hub`] is the publish/subscribe registry. It is an ordinary value, so
//!   tests and embedders can run as many independent hubs as they like.
//! - [`sse`] bridges one HTTP response to the hub through a bounded queue and
//!   a drop guard that unsubscribes on every exit path.
//! - [`routes`] assembles the axum router: publishing, the event stream, the
//!   small text/JSON/echo endpoints and static files.
//! - [`server`] owns the listener and graceful shutdown.
//! - [`message`] holds the payload type and the event-stream framing.
//! - [`cli`] and [`client`] provide the command line, including a terminal
//!   client that sends or listens.

pub mod cli;
pub mod client;
pub mod hub;
pub mod message;
pub mod routes;
pub mod server;
pub mod sse;
