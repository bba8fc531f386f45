//! Cache tiers: the local in-process store and the shared remote store.

mod local;
mod remote;

pub use local::LocalCache;
pub use remote::RemoteCache;
