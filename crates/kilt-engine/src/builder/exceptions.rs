//! Exception handling
//!
//! `try`/`catch` lowering. Entering a protected region saves the current
//! context in the try depth's saved-context variable; each catch entry
//! restores it, since the runtime resumes the handler with whatever context
//! was current at the throw.

use tracing::trace;

use crate::error::{BuildError, BuildResult};
use crate::il::{InstrId, InstrKind};
use crate::kernel::{Catch, CatchVariables, Statement, VariableId, VariableLocation};
use crate::object::TypeId;

use super::context::ContextCursor;
use super::{ActiveCatch, FlowGraphBuilder, Fragment};

impl<'a> FlowGraphBuilder<'a> {
    pub(super) fn allocate_try_index(&mut self) -> u32 {
        let index = self.next_try_index;
        self.next_try_index += 1;
        trace!(target: "kilt::builder", function = %self.function, try_index = index, "allocated try index");
        index
    }

    fn saved_try_context(&self) -> BuildResult<VariableId> {
        self.scopes
            .catch_contexts
            .get(self.try_depth)
            .copied()
            .ok_or(BuildError::MissingScopes(self.function))
    }

    fn current_catch_variables(&self) -> BuildResult<CatchVariables> {
        self.catch_depth
            .checked_sub(1)
            .and_then(|depth| self.scopes.catch_variables.get(depth))
            .copied()
            .ok_or(BuildError::MissingScopes(self.function))
    }

    /// Save the current context and jump into the protected region's entry
    pub(super) fn try_catch(&mut self, code: &mut Fragment, try_index: u32) -> BuildResult<()> {
        let saved = self.saved_try_context()?;
        let current_context = self.scopes.current_context;
        self.load_frame_variable(code, current_context);
        self.store_local(code, saved)?;
        self.drop_value(code)?;
        let entry = self.join_entry_in(Some(try_index));
        self.goto(code, entry)?;
        self.continue_at(code, entry);
        Ok(())
    }

    /// Entry of the handler for `catch_try_index`. `at_try` is the context
    /// chain at entry to the protected region; the handler continues there.
    pub(super) fn catch_block_entry(
        &mut self,
        handler_types: Vec<TypeId>,
        catch_try_index: u32,
        needs_stacktrace: bool,
        is_synthesized: bool,
        at_try: ContextCursor,
    ) -> BuildResult<Fragment> {
        let vars = self.current_catch_variables()?;
        let saved = self.saved_try_context()?;
        let block = self.graph.alloc_block_id();
        let entry = self.graph.push(
            InstrKind::CatchEntry {
                block,
                try_index: self.current_try_index,
                catch_try_index,
                handler_types,
                needs_stacktrace,
                is_synthesized,
                exception: vars.exception,
                stack_trace: vars.stack_trace,
                raw_exception: vars.raw_exception,
                raw_stack_trace: vars.raw_stack_trace,
            },
            Vec::new(),
        );
        self.graph.add_catch_entry(entry);
        let mut code = Fragment::single(entry);

        let restore_closure_context = self.store.function(self.function).is_closure_function()
            && (self.variable(vars.exception)?.is_captured() || self.variable(saved)?.is_captured());
        if restore_closure_context {
            self.load_closure_context(&mut code)?;
            let base = self.scopes.base_context_level();
            self.contexts.reset_to_captured(base);
        } else {
            self.contexts.detach();
        }

        // Captured catch variables reachable from the closure context are
        // filled before the saved context is reinstated; the rest after.
        let mut deferred = Vec::with_capacity(2);
        for (raw, variable) in [(vars.raw_exception, vars.exception), (vars.raw_stack_trace, vars.stack_trace)] {
            if self.reachable_now(variable)? {
                self.copy_raw(&mut code, raw, variable)?;
            } else {
                deferred.push((raw, variable));
            }
        }

        let current_context = self.scopes.current_context;
        self.load_local(&mut code, saved)?;
        self.store_frame_variable(&mut code, current_context)?;
        self.drop_value(&mut code)?;
        self.contexts.restore(at_try);

        for (raw, variable) in deferred {
            self.copy_raw(&mut code, raw, variable)?;
        }
        Ok(code)
    }

    fn reachable_now(&self, variable: VariableId) -> BuildResult<bool> {
        Ok(match self.variable(variable)?.location {
            VariableLocation::Context { level, .. } => level <= self.contexts.depth(),
            VariableLocation::Frame(_) => false,
        })
    }

    fn copy_raw(&mut self, code: &mut Fragment, raw: VariableId, variable: VariableId) -> BuildResult<()> {
        if raw == variable {
            return Ok(());
        }
        self.load_frame_variable(code, raw);
        self.store_local(code, variable)?;
        self.drop_value(code)
    }

    /// `try { body } catch ...`
    pub(super) fn build_try_catch(&mut self, code: &mut Fragment, body: &Statement, catches: &[Catch]) -> BuildResult<()> {
        let try_index = self.allocate_try_index();
        let outer_try_index = self.current_try_index;
        let at_try = self.contexts.save();
        let depth = self.stack.len();
        let after_try = self.join_entry();

        self.try_catch(code, try_index)?;
        self.try_depth += 1;
        self.current_try_index = Some(try_index);
        let built = self.build_statement(code, body);
        self.current_try_index = outer_try_index;
        self.try_depth -= 1;
        built?;
        self.goto(code, after_try)?;
        self.stack.truncate(depth);

        self.catch_depth += 1;
        let built = self.build_catch_clauses(try_index, catches, at_try, after_try);
        self.catch_depth -= 1;
        built?;
        self.contexts.restore(at_try);

        if self.is_join_reached(after_try) {
            self.continue_at(code, after_try);
        }
        Ok(())
    }

    fn build_catch_clauses(
        &mut self,
        try_index: u32,
        catches: &[Catch],
        at_try: ContextCursor,
        after_try: InstrId,
    ) -> BuildResult<()> {
        let handler_types = catches.iter().map(|c| c.guard).collect();
        let needs_stacktrace = catches.iter().any(|c| c.stack_trace.is_some());
        let mut handler = self.catch_block_entry(handler_types, try_index, needs_stacktrace, false, at_try)?;
        let vars = self.current_catch_variables()?;
        self.catches.push(ActiveCatch {
            try_index,
            variables: vars,
        });

        let mut built = Ok(());
        for clause in catches {
            // An empty handler means a catch-all clause took the rest.
            if handler.is_empty() || handler.is_closed() {
                break;
            }
            let mut matched = if self.store.is_top_type(clause.guard) {
                std::mem::take(&mut handler)
            } else {
                match self.guard_clause(&mut handler, vars.exception, clause.guard) {
                    Ok((yes, no)) => {
                        handler = Fragment::single(no);
                        Fragment::single(yes)
                    }
                    Err(e) => {
                        built = Err(e);
                        break;
                    }
                }
            };
            if let Err(e) = self.build_catch_clause(&mut matched, clause, vars, after_try) {
                built = Err(e);
                break;
            }
        }
        if built.is_ok() && handler.is_open() && !handler.is_empty() {
            built = self.rethrow_current(&mut handler, try_index, vars);
        }
        self.catches.pop();
        built
    }

    /// `exception is guard`: returns `(matches, does_not_match)` entries
    fn guard_clause(
        &mut self,
        handler: &mut Fragment,
        exception: VariableId,
        guard: TypeId,
    ) -> BuildResult<(InstrId, InstrId)> {
        self.load_local(handler, exception)?;
        self.instance_of(handler, guard)?;
        self.branch_if_true(handler, false)
    }

    fn build_catch_clause(
        &mut self,
        code: &mut Fragment,
        clause: &Catch,
        vars: CatchVariables,
        after_try: InstrId,
    ) -> BuildResult<()> {
        if let Some(scope) = clause.scope {
            self.enter_scope(code, scope)?;
        }
        if let Some(exception) = clause.exception {
            self.load_local(code, vars.exception)?;
            self.store_local(code, exception)?;
            self.drop_value(code)?;
        }
        if let Some(stack_trace) = clause.stack_trace {
            self.load_local(code, vars.stack_trace)?;
            self.store_local(code, stack_trace)?;
            self.drop_value(code)?;
        }
        self.build_statement(code, &clause.body)?;
        if let Some(scope) = clause.scope {
            self.exit_scope(code, scope)?;
        }
        self.goto(code, after_try)
    }

    fn rethrow_current(&mut self, code: &mut Fragment, try_index: u32, vars: CatchVariables) -> BuildResult<()> {
        self.load_local(code, vars.exception)?;
        self.push_argument(code)?;
        self.load_local(code, vars.stack_trace)?;
        self.push_argument(code)?;
        self.rethrow_exception(code, try_index)?;
        self.drop_value(code)
    }

    /// `rethrow` inside the innermost catch clause
    pub(super) fn build_rethrow(&mut self, code: &mut Fragment) -> BuildResult<()> {
        let active = self.catches.last().copied().ok_or_else(|| BuildError::Unsupported {
            function: self.function,
            what: "rethrow outside a catch clause".to_string(),
        })?;
        self.load_local(code, active.variables.exception)?;
        self.push_argument(code)?;
        self.load_local(code, active.variables.stack_trace)?;
        self.push_argument(code)?;
        self.rethrow_exception(code, active.try_index)
    }
}
