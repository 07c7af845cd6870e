//! Domain layer: the order record, its payment lifecycle, and the ports the
//! use cases talk through.

pub mod cart;
pub mod money;
pub mod order;
pub mod ports;
