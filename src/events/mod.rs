//! # Events Module
//!
//! Progress reporting decoupled from presentation.
//!
//! The scheduler and item pipeline publish [`Event`]s through an
//! [`EventSender`]; a CLI progress bar (or anything else) drains the
//! matching [`EventReceiver`] on its own thread.
//!
//! ```rust,ignore
//! let (sender, receiver) = EventChannel::new();
//! std::thread::spawn(move || {
//!     for event in receiver.iter() {
//!         if let Event::Item(ItemEvent::Finished { id, status, .. }) = event {
//!             println!("{id}: {status}");
//!         }
//!     }
//! });
//! scheduler.run_with(requests, &CancellationToken::new(), &sender);
//! ```

mod channel;
mod types;

pub use channel::{null_sender, EventChannel, EventReceiver, EventSender};
pub use types::*;
