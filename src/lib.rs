#![doc(html_root_url = "https://docs.rs/liana-dom/0.1.0")]
#![warn(clippy::pedantic)]

//! Live selector bindings and a remote UI-command protocol for the DOM.
//!
//! Two engines cooperate here:
//!
//! - [`live::LiveQueries`] re-evaluates registered selectors against the
//!   current document, diffs each result against the previous one and
//!   attaches or detaches handlers on the elements that entered or left the
//!   matched set. [`schedule::FlushQueue`] coalesces bursts of document
//!   mutations into a single deferred re-match pass.
//! - [`batch::CommandBatch`] accumulates selector-keyed UI-mutation commands
//!   on the producing side and encodes them into the wire format;
//!   [`interpret::Interpreter`] replays a decoded [`interpret::Reply`]
//!   against the live document. [`remote::RemoteInvoker`] ties the two ends
//!   together across a caller-provided transport.
//!
//! Everything runs on the document's single UI thread; the only asynchrony
//! is the deferred flush timer and the transport completion callback.

#[cfg(doctest)]
pub mod readme {
	doc_comment::doctest!("../README.md");
}

pub mod batch;
pub mod expr;
pub mod form;
pub mod interpret;
pub mod live;
pub mod remote;
pub mod schedule;

mod rc_fn_map;

pub use batch::{Arg, CommandBatch, Opcode};
pub use expr::ExprSnippet;
pub use form::{serialize_form, FormOptions};
pub use interpret::{ApplyError, ApplyStats, Interpreter, InterpreterOptions, Reply};
pub use live::{ElementCallback, EventHandler, HandlerId, LiveQueries, Scope, WatchId, WatchMode};
pub use remote::{Lifecycle, RemoteInvoker, RemoteRequest, Transport};
pub use schedule::FlushQueue;
