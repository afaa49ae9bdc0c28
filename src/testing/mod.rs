//! Test doubles. `#[cfg(test)]`-only, mirroring how the rest of the crate
//! keeps its mock `ServiceConnector` out of the production binary.

#[cfg(test)]
pub mod mock_connector;

#[cfg(test)]
pub use mock_connector::MockServiceConnector;
