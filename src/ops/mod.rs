//! Operator-facing views of a running cluster

pub mod connection;

pub use connection::{client_connection_string, ClientCredentials, ConnectionDetails};
