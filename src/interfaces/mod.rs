//! Outer surfaces: CSV output for the operator CLI and the HTTP endpoints the
//! gateway and storefront call.

pub mod csv;
pub mod http;
