//! Storage adapter abstraction for Strata.
//!
//! This module provides a trait-based interface for the object-storage backends
//! the engine can place files on (in-memory, local filesystem, third-party HTTP
//! storage APIs) and a factory table for building adapters from configuration.
//!
//! # Design Principles
//! - Backend isolation: no backend-specific logic above the adapter layer
//! - Async operations: all I/O operations are async
//! - Streaming support: objects move as byte streams
//! - Unified error semantics: backend failures map into the common taxonomy

pub mod factory;
pub mod http;
pub mod local;
pub mod memory;
pub mod provider;

pub use factory::{create_default_factories, AdapterFactories, AdapterFactory};
pub use http::{HttpAdapter, HttpAdapterConfig};
pub use local::LocalAdapter;
pub use memory::MemoryAdapter;
pub use provider::{
    collect_stream, crc32_hex, stream_from_bytes, ByteStream, ObjectInfo, StorageAdapter,
};
