//! Background tasks internal to the crate.
//!
//! One [`session::SessionWorker`] and one [`flush::FlushWorker`] run per
//! active session; they communicate over bounded channels and share nothing
//! with other sessions' tasks.

pub(crate) mod flush;
pub(crate) mod session;
