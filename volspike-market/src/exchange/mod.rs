//! Wire formats and REST clients for upstream data vendors.

pub mod binance;
