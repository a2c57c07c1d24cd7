//! SILTA end-to-end tests
//!
//! Black-box tests that stand up a host (broker sync + capabilities
//! registry on one base server) and a plugin (peer broker + capability
//! implementations) talking over real TCP, then drive the whole dynamic
//! binding flow from the outside:
//!
//! 1. Plugin registers capabilities → host sees them
//! 2. Host executes an action → response crosses the broker
//! 3. Host registers a trigger → events stream back over the callback
//!    connection
//! 4. Shutdown tears every dynamic connection down

pub mod setup;

pub use setup::TestCluster;
