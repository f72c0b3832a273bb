//! # tlogin-query
//!
//! Client for the query manager, the account authority behind the login
//! service.
//!
//! This crate provides:
//! - A persistent TCP link authenticated with a shared secret
//! - Automatic reconnection with a bounded retry budget
//! - Account login and world listing queries

pub mod client;
pub mod connection;
pub mod error;
pub mod query;

pub use client::QueryClient;
pub use connection::{prepare_query, QueryConfig, QueryConnection, QueryResponse, MAX_ATTEMPTS};
pub use error::QueryError;
pub use query::{
    AccountLogin, Character, LoginDenial, QueryStatus, QueryType, World, APPLICATION_TYPE_LOGIN,
    MAX_CHARACTERS,
};
