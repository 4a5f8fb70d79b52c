//! Infrastructure layer
//!
//! Wiring of configuration, store adapters and the sync driver

pub mod service_container;

pub use service_container::ServiceContainer;
