//! Producer-side transport: the media sender and the command listener.
//!
//! Both halves share one non-blocking socket and the same retry primitive. The
//! sender sleeps 1 ms when the send buffer is full; the listener sleeps 50 ms when
//! no command byte is waiting. Both stop at the next iteration once the session's
//! cancellation token fires.

mod backoff;
mod listener;
mod sender;

pub use backoff::{Backoff, POLL_INTERVAL, SEND_INTERVAL};
pub use listener::CommandListener;
pub use sender::FrameSender;
