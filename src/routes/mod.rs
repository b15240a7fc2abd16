//! # Route Declarations
//!
//! Loads declared routes and built-ins into one immutable [`RouteTable`].

pub mod builtin;
mod errors;
pub mod openapi;
mod table;

pub use errors::{RouteError, RouteResult};
pub use table::{RouteEntry, RouteMatch, RouteTable};
