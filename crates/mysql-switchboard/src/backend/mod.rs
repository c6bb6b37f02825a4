//! Upstream MySQL servers: the configured catalog, per-backend connection
//! options, and the client connection used to talk to them.

pub mod catalog;
pub mod options;
pub mod upstream;

pub use catalog::Catalog;
pub use options::{parse_duration, BackendOptions};
pub use upstream::UpstreamConnection;
