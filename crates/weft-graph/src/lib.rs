//! Weft Graph — cyclic dependency graph state and the asynchronous tracer

pub mod graph;
pub mod tracer;
pub mod traversal;

pub use graph::{Graph, Node};
pub use tracer::{GraphTracer, Resolver, TraceError, TracerEvent};
pub use traversal::{find_disconnected_from_entry_points, resolve_execution_order};
