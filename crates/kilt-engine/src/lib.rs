//! Kilt Engine
//!
//! Front half of an optimizing compiler for a class-based language:
//! - **Builder**: kernel function bodies to IL flow graphs (`builder`, `il`)
//! - **Type usage**: which types and type-argument vectors reach type tests
//!   and allocations (`type_usage`)
//! - **Stubs**: per-type type testing routines, built lazily and installed
//!   once (`stubs`)
//!
//! # Example
//!
//! ```rust,ignore
//! use kilt_engine::{build_flow_graph, BuildContext, HierarchyInfo, ObjectStore};
//!
//! let store = ObjectStore::new();
//! let program = load_program(&store);
//! let hierarchy = HierarchyInfo::new(&store);
//! let ctx = BuildContext::new(&store, &program).with_hierarchy(&hierarchy);
//! let graph = build_flow_graph(ctx, main)?;
//! println!("{}", graph.pretty_print());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::too_many_arguments)]

// ============================================================================
// Core Modules
// ============================================================================

/// Object model: classes, functions, fields and canonical types
pub mod object;

/// Kernel function bodies and scope layouts
pub mod kernel;

/// IL instructions and flow graphs
pub mod il;

/// Kernel to IL flow graph builder
pub mod builder;

/// Class id ranges and subtype queries
pub mod hierarchy;

/// Native symbol resolution
pub mod native;

/// Type usage collection
pub mod type_usage;

/// Type testing stubs
pub mod stubs;

/// Engine configuration
pub mod config;

/// Error types
pub mod error;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::{build_flow_graph, BuildContext, FlowGraphBuilder, Fragment};
pub use config::{BuilderConfig, EngineConfig, StubConfig, TypeUsageConfig};
pub use error::{BuildError, BuildResult, ConfigError, ResolveError, StubError};
pub use hierarchy::{CidRange, HierarchyInfo, HierarchyOracle};
pub use il::{FlowGraph, Instr, InstrId, InstrKind};
pub use kernel::KernelProgram;
pub use native::{NativeRegistry, NativeResolver};
pub use object::{ClassId, FunctionId, ObjectStore, TypeId};
pub use stubs::{StubCode, TypeTestingStubGenerator, TypeTestingStubs};
pub use type_usage::TypeUsageInfo;
