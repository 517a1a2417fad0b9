//! Readiness multiplexing (Linux epoll).

mod epoll;
mod event_loop;
pub mod interest;

pub use epoll::{Epoll, MAX_EVENTS_CEILING};
pub use event_loop::EventLoop;
pub use interest::{Event, Interest, Token};
