//! Locals, contexts and scopes
//!
//! A captured variable lives in slot `index` of the context at `level`.
//! Reading it walks the parent chain from the current context; the number of
//! hops is the distance between the current depth and the variable's level.

use tracing::trace;

use crate::error::{BuildError, BuildResult};
use crate::il::{InstrId, InstrKind, Slot, StoreBarrier, StoreKind};
use crate::kernel::{LocalVariable, ScopeId, VariableId, VariableLocation};

use super::{FlowGraphBuilder, Fragment};

impl<'a> FlowGraphBuilder<'a> {
    pub(super) fn variable(&self, id: VariableId) -> BuildResult<&LocalVariable> {
        self.scopes.variable(id).ok_or(BuildError::UnknownVariable(id))
    }

    /// `parameter(i)` of the layout, implicit parameters first
    pub(super) fn parameter_variable(&self, index: usize) -> BuildResult<VariableId> {
        self.scopes.parameter(index).ok_or_else(|| BuildError::Unsupported {
            function: self.function,
            what: format!("parameter {}", index),
        })
    }

    pub(super) fn raw_parameter_variable(&self, index: usize) -> BuildResult<VariableId> {
        self.scopes.raw_parameter(index).ok_or_else(|| BuildError::Unsupported {
            function: self.function,
            what: format!("raw parameter {}", index),
        })
    }

    pub(super) fn receiver_variable(&self) -> BuildResult<VariableId> {
        self.scopes.receiver.ok_or_else(|| BuildError::Unsupported {
            function: self.function,
            what: "`this` outside an instance member".to_string(),
        })
    }

    // ===== Variable access =====

    /// Push the value of `variable`
    pub(super) fn load_local(&mut self, code: &mut Fragment, variable: VariableId) -> BuildResult<InstrId> {
        let location = self.variable(variable)?.location;
        match location {
            VariableLocation::Frame(_) => Ok(self.load_frame_variable(code, variable)),
            VariableLocation::Context { level, index } => {
                self.load_context_at(code, level)?;
                self.load_native_field(code, Slot::ContextVariable(index))
            }
        }
    }

    /// Write the top of the stack to `variable`. The stored value stays on
    /// the stack.
    pub(super) fn store_local(&mut self, code: &mut Fragment, variable: VariableId) -> BuildResult<InstrId> {
        let location = self.variable(variable)?.location;
        match location {
            VariableLocation::Frame(_) => self.store_frame_variable(code, variable),
            VariableLocation::Context { level, index } => {
                let value = self.make_temporary()?;
                self.load_context_at(code, level)?;
                self.load_temp(code, value)?;
                self.store_instance_field(code, Slot::ContextVariable(index), StoreKind::Other, StoreBarrier::Emit)?;
                self.stack.top().ok_or(BuildError::StackUnderflow {
                    function: self.function,
                })
            }
        }
    }

    // ===== Contexts =====

    /// Push the context at `level`, walking up from the current one
    pub(super) fn load_context_at(&mut self, code: &mut Fragment, level: usize) -> BuildResult<InstrId> {
        let depth = self.contexts.depth();
        if level > depth {
            return Err(BuildError::ContextDepthUnderflow {
                target: level,
                current: depth,
            });
        }
        let current_context = self.scopes.current_context;
        let mut id = self.load_frame_variable(code, current_context);
        for _ in level..depth {
            id = self.load_native_field(code, Slot::ContextParent)?;
        }
        Ok(id)
    }

    /// Make the context at `depth` current
    pub(super) fn adjust_context_to(&mut self, code: &mut Fragment, depth: usize) -> BuildResult<()> {
        let current = self.contexts.depth();
        if depth == current {
            return Ok(());
        }
        if depth > current {
            return Err(BuildError::ContextDepthUnderflow {
                target: depth,
                current,
            });
        }
        self.load_context_at(code, depth)?;
        let current_context = self.scopes.current_context;
        self.store_frame_variable(code, current_context)?;
        self.drop_value(code)?;
        let hops = self.contexts.unwind_to(depth);
        trace!(target: "kilt::builder", from = current, to = depth, hops, "adjust context");
        Ok(())
    }

    /// Allocate the context of `scope` and link it under the current one.
    /// The new context is left on the stack.
    pub(super) fn push_context(&mut self, code: &mut Fragment, scope: ScopeId, num_variables: usize) -> BuildResult<()> {
        self.allocate_context(code, num_variables)?;
        let context = self.make_temporary()?;
        self.load_temp(code, context)?;
        let current_context = self.scopes.current_context;
        self.load_frame_variable(code, current_context);
        self.store_instance_field(code, Slot::ContextParent, StoreKind::Initializing, StoreBarrier::Emit)?;
        self.store_frame_variable(code, current_context)?;
        self.contexts.push(Some(scope), num_variables);
        trace!(
            target: "kilt::builder",
            scope = scope.0,
            depth = self.contexts.depth(),
            slots = num_variables,
            "push context"
        );
        Ok(())
    }

    /// Give a loop iteration a fresh copy of the current context
    pub(super) fn clone_context(&mut self, code: &mut Fragment, num_variables: usize) -> BuildResult<()> {
        let current_context = self.scopes.current_context;
        self.load_frame_variable(code, current_context);
        self.define(code, InstrKind::CloneContext { num_variables }, 1)?;
        self.store_frame_variable(code, current_context)?;
        self.drop_value(code)
    }

    /// Install the closure's captured context as the current context
    pub(super) fn load_closure_context(&mut self, code: &mut Fragment) -> BuildResult<()> {
        let closure = self.parameter_variable(0)?;
        self.load_frame_variable(code, closure);
        self.load_native_field(code, Slot::ClosureContext)?;
        let current_context = self.scopes.current_context;
        self.store_frame_variable(code, current_context)?;
        self.drop_value(code)
    }

    // ===== Scopes =====

    /// Enter `scope`, allocating its context if it has captured variables
    pub(super) fn enter_scope(&mut self, code: &mut Fragment, scope: ScopeId) -> BuildResult<()> {
        let num_variables = self
            .scopes
            .scope(scope)
            .ok_or(BuildError::UnknownScope(scope))?
            .num_context_variables();
        let depth = self.contexts.depth();
        self.scope_depths.push((scope, depth));
        if num_variables > 0 {
            self.push_context(code, scope, num_variables)?;
            self.drop_value(code)?;
        }
        Ok(())
    }

    /// Leave `scope`, restoring the context depth it was entered at. Runs
    /// even when `code` is closed so the depth stays right for the code
    /// that follows.
    pub(super) fn exit_scope(&mut self, code: &mut Fragment, scope: ScopeId) -> BuildResult<()> {
        let (entered, depth) = self.scope_depths.pop().ok_or(BuildError::UnknownScope(scope))?;
        if entered != scope {
            return Err(BuildError::UnbalancedScope {
                scope,
                depth: self.contexts.depth(),
                expected: depth,
            });
        }
        let allocated = self
            .scopes
            .scope(scope)
            .is_some_and(|s| s.num_context_variables() > 0);
        let expected = if allocated { depth + 1 } else { depth };
        if self.contexts.depth() != expected {
            return Err(BuildError::UnbalancedScope {
                scope,
                depth: self.contexts.depth(),
                expected,
            });
        }
        self.adjust_context_to(code, depth)
    }

    /// Scope context slots owned by `scope`
    pub(super) fn scope_context_size(&self, scope: ScopeId) -> usize {
        self.scopes
            .scope(scope)
            .map_or(0, |s| s.num_context_variables())
    }
}
