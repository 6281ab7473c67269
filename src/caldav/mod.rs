pub mod client;

pub use client::{CalDavClient, Depth};
