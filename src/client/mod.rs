//! Client-side helpers for talking to a running transfer server

mod poller;

pub use poller::{HttpStatusSource, PollError, StatusPoller, StatusSource};
