//! # agentmesh-pipeline
//!
//! Graph-directed pipeline engine: a fixed graph of typed handler nodes, executed node by
//! node, with edge selection choosing what runs next and a checkpoint file making the run
//! resumable.
//!
//! ## Main modules
//!
//! - [`graph`]: the parsed graph shape ([`graph::Graph`], [`graph::Node`], [`graph::Edge`])
//!   and [`graph::Fidelity`], the context-carryover mode.
//! - [`outcome`]: what a handler reports back ([`outcome::Outcome`], [`outcome::OutcomeStatus`]).
//! - [`context`]: the keyed value map that flows node to node ([`context::Context`]).
//! - [`edge_selection`]: the five-step priority algorithm picking the next edge.
//! - [`fidelity`]: resolving and rendering the context preamble for the next LLM call.
//! - [`accel`]: accelerator-key stripping shared by edge labels and `WaitForHuman` choices.
//! - [`artifact`]: [`artifact::ArtifactStore`], the keyed store for oversized stage outputs.
//! - [`checkpoint`]: [`checkpoint::Checkpoint`], the resumable run-state JSON file.
//! - [`handlers`]: [`handlers::Handler`], [`handlers::HandlerRegistry`], and the built-in
//!   handlers in [`handlers::builtin`].
//! - [`engine`]: [`engine::PipelineEngine`], the step loop driving a graph to completion.
//! - [`error`]: [`error::PipelineError`], [`error::CheckpointError`].
//!
//! Key types are re-exported at the crate root.

pub mod accel;
pub mod artifact;
pub mod checkpoint;
pub mod context;
pub mod edge_selection;
pub mod engine;
pub mod error;
pub mod fidelity;
pub mod graph;
pub mod handlers;
pub mod outcome;

pub use artifact::ArtifactStore;
pub use checkpoint::Checkpoint;
pub use context::Context;
pub use edge_selection::select_edge;
pub use engine::PipelineEngine;
pub use error::{CheckpointError, PipelineError};
pub use fidelity::{render_preamble, resolve_fidelity, resolve_thread_key, StageRecord};
pub use graph::{Edge, Fidelity, Graph, GraphAttrs, Node, Subgraph};
pub use handlers::{Handler, HandlerRegistry};
pub use outcome::{Outcome, OutcomeStatus};
