//! Git smart HTTP v1 pack protocol client.

pub mod delta;
pub mod packfile;
pub mod pktline;
pub mod session;
pub mod sideband;

pub use session::{Credentials, FetchedObject, Session, Transport};
