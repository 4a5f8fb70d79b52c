//! Redis adapter

mod client;

pub use client::RedisFastStore;
