//! Change replication to remote observers and local listeners.

mod channel;
mod observer;

pub use channel::ReplicationChannel;
pub use observer::{NullTransport, ObserverChannel, ObserverError, ObserverTransport};
