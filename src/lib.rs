//! grest - HTTP routes declared as SQL, authorized by the database
//!
//! Each route maps to one or more SQL statements that run in a single
//! transaction under the caller's database role.

pub mod auth;
pub mod cli;
pub mod http_server;
pub mod observability;
pub mod query;
pub mod routes;
