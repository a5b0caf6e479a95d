//! Engine configuration
//!
//! Every struct deserializes with `#[serde(default)]`, so a JSON file only
//! needs the fields it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for flow graph building
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Ahead-of-time compilation: no lazy stubs, no deoptimization (default: false)
    pub precompiled_mode: bool,
    /// Emit `assert` statements (default: false)
    pub enable_asserts: bool,
    /// Build unchecked entry points for functions with argument checks (default: true)
    pub use_unchecked_entry_points: bool,
    /// Emit stack overflow checks in prologues and loops (default: true)
    pub stack_overflow_checks: bool,
    /// Link native calls lazily on first invocation (default: true)
    pub link_natives_lazily: bool,
    /// Skip the argument type checks that an unchecked entry can prove (default: true)
    pub eliminate_type_checks: bool,
    /// Foreign calls pass floating point values in integer registers (default: false)
    pub soft_float_abi: bool,
    /// Value returned by the FFI `_abi()` intrinsic (default: 0)
    pub ffi_abi: i64,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        BuilderConfig {
            precompiled_mode: false,
            enable_asserts: false,
            use_unchecked_entry_points: true,
            stack_overflow_checks: true,
            link_natives_lazily: true,
            eliminate_type_checks: true,
            soft_float_abi: false,
            ffi_abi: 0,
        }
    }
}

/// Configuration for the type usage collector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeUsageConfig {
    /// Rounds of type-argument propagation (default: 2)
    pub propagation_rounds: usize,
}

impl Default for TypeUsageConfig {
    fn default() -> Self {
        TypeUsageConfig {
            propagation_rounds: 2,
        }
    }
}

/// Configuration for type testing stubs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StubConfig {
    /// Specialise on first use instead of eagerly (default: true)
    pub lazy_specialize: bool,
    /// Ahead-of-time compilation: every stub is built up front (default: false)
    pub precompiled_mode: bool,
    /// Log the disassembly of every generated stub (default: false)
    pub disassemble_stubs: bool,
    /// Largest stub accepted by the installer, in bytes (default: 4096)
    pub max_stub_bytes: usize,
}

impl Default for StubConfig {
    fn default() -> Self {
        StubConfig {
            lazy_specialize: true,
            precompiled_mode: false,
            disassemble_stubs: false,
            max_stub_bytes: 4096,
        }
    }
}

/// All engine settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Flow graph builder settings
    pub builder: BuilderConfig,
    /// Type usage collector settings
    pub type_usage: TypeUsageConfig,
    /// Type testing stub settings
    pub stubs: StubConfig,
}

impl EngineConfig {
    /// Parse a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
