//! Impls - adapters behind the ports.
//!
//! # Included
//! - **InMemoryBrokerQueue**: FIFO with lease/ack and visibility timeout
//! - **InMemoryResultStore**: record map with TTL on terminal records
//! - **EchoBackend** / **OllamaBackend**: generation backends
//! - **TracingEventSink**: lifecycle events as log lines

pub mod echo_backend;
pub mod inmem_queue;
pub mod inmem_store;
pub mod ollama_backend;
pub mod tracing_sink;

pub use self::echo_backend::EchoBackend;
pub use self::inmem_queue::InMemoryBrokerQueue;
pub use self::inmem_store::InMemoryResultStore;
pub use self::ollama_backend::OllamaBackend;
pub use self::tracing_sink::TracingEventSink;
