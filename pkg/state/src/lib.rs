pub mod api;
pub mod client;
pub mod error;
pub mod registry;
pub mod watch;

pub use api::ClusterApi;
pub use error::StoreError;
pub use registry::Registry;
