pub mod client;

pub use client::{TidalClient, TidalOptions};
