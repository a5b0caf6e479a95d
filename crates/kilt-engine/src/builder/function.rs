//! Function graphs
//!
//! Layout of an ordinary function: the prologue builder's argument copying,
//! then the pieces run on every entry (stack check, closure context), the
//! ones run on first entry (root context with captured parameters), type
//! argument handling, argument checks and the body.
//!
//! A function whose implicit checks a statically typed caller can skip gets a
//! second, unchecked entry. With [`EntryPointStyle::Separate`] each entry has
//! its own copy of the short prologue and they meet before the body; with
//! [`EntryPointStyle::SharedWithVariable`] both entries record which one was
//! taken in a variable and the shared prologue branches on it.

use tracing::trace;

use crate::error::BuildResult;
use crate::il::{AssertKind, InstrId, PrologueInfo};
use crate::object::Function;

use super::checks::ArgumentChecks;
use super::{FlowGraphBuilder, Fragment};

/// How the unchecked entry of a function is laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPointStyle {
    /// Single checked entry
    None = 0,
    /// Two entry blocks joining after the implicit checks
    Separate = 1,
    /// Two entries recording the one taken in a variable
    SharedWithVariable = 2,
}

/// Prologue pieces of one function, built before they are linked
pub(super) struct Pieces {
    pub every_time: Fragment,
    pub first_time: Fragment,
    pub type_args: Fragment,
    pub checks: ArgumentChecks,
    pub body: Fragment,
}

impl<'a> FlowGraphBuilder<'a> {
    pub(super) fn build_function_graph(&mut self, f: &'a Function) -> BuildResult<PrologueInfo> {
        let normal_entry = self.function_entry();
        self.graph.set_normal_entry(normal_entry);
        let prologue = self
            .ctx
            .prologue
            .build_prologue(&mut self.graph, f, normal_entry, self.ctx.osr_id);
        let prologue_start = self.graph.instr(normal_entry).next;

        let every_time = self.build_every_time_prologue(f)?;
        let first_time = self.build_first_time_prologue(f)?;
        let type_args = self.build_type_arguments_handling(f)?;
        let checks = if !self.ctx.config.precompiled_mode || Self::needs_argument_type_checks(f) {
            let mode = Self::default_type_checks_mode(f);
            self.build_argument_type_checks(f, mode)?
        } else {
            ArgumentChecks::default()
        };
        let body = self.build_function_body(f)?;
        let pieces = Pieces {
            every_time,
            first_time,
            type_args,
            checks,
            body,
        };

        self.link_entry_points(f, normal_entry, prologue_start, prologue.cursor, pieces)?;
        Ok(prologue.info)
    }

    /// Link the pieces behind `normal_entry`, adding an unchecked entry when
    /// the function's implicit checks can be skipped
    pub(super) fn link_entry_points(
        &mut self,
        f: &Function,
        normal_entry: InstrId,
        prologue_start: Option<InstrId>,
        prologue_cursor: InstrId,
        pieces: Pieces,
    ) -> BuildResult<()> {
        let style = self.choose_entry_point_style(f, &pieces);
        trace!(target: "kilt::builder", function = %f.name, style = ?style, "entry point style");
        let prologue_code = match prologue_start {
            Some(_) => Fragment::span(normal_entry, prologue_cursor),
            None => Fragment::single(normal_entry),
        };
        match style {
            EntryPointStyle::None => {
                let code = [
                    pieces.every_time,
                    pieces.first_time,
                    pieces.type_args,
                    pieces.checks.implicit,
                    pieces.checks.explicit,
                    pieces.body,
                ]
                .into_iter()
                .fold(prologue_code, |code, piece| code.append(piece, &mut self.graph));
                debug_assert!(code.entry == Some(normal_entry));
            }
            EntryPointStyle::Separate => {
                let extra = self.build_separate_entries(f, prologue_code, pieces)?;
                self.graph.set_unchecked_entry(extra);
            }
            EntryPointStyle::SharedWithVariable => {
                let extra = self.build_shared_entries(normal_entry, prologue_start, prologue_cursor, pieces)?;
                self.graph.set_unchecked_entry(extra);
            }
        }
        Ok(())
    }

    fn choose_entry_point_style(&self, f: &Function, pieces: &Pieces) -> EntryPointStyle {
        if !self.ctx.config.use_unchecked_entry_points
            || !Self::needs_argument_type_checks(f)
            || pieces.checks.implicit.is_empty()
        {
            return EntryPointStyle::None;
        }
        if !self.ctx.prologue.has_empty_prologue(f) || !pieces.type_args.is_empty() || !pieces.first_time.is_empty() {
            return EntryPointStyle::SharedWithVariable;
        }
        // Copying more than the stack check into both entries costs more than the branch.
        if pieces.every_time.instructions(&self.graph).len() > 2 {
            EntryPointStyle::SharedWithVariable
        } else {
            EntryPointStyle::Separate
        }
    }

    /// Push the marker of the entry taken and drop it again
    fn entry_marker(&mut self, code: &mut Fragment, style: EntryPointStyle) -> BuildResult<()> {
        self.int_constant(code, style as i64);
        self.drop_value(code)
    }

    fn build_separate_entries(&mut self, f: &Function, normal: Fragment, pieces: Pieces) -> BuildResult<InstrId> {
        let join = self.join_entry_in(None);

        let mut normal = normal;
        self.entry_marker(&mut normal, EntryPointStyle::None)?;
        normal = normal
            .append(pieces.every_time, &mut self.graph)
            .append(pieces.checks.implicit, &mut self.graph);
        self.goto(&mut normal, join)?;

        let extra_entry = self.function_entry();
        let mut extra = Fragment::single(extra_entry);
        self.entry_marker(&mut extra, EntryPointStyle::Separate)?;
        let every_time_copy = self.build_every_time_prologue(f)?;
        extra = extra
            .append(every_time_copy, &mut self.graph)
            .append(pieces.checks.redefinitions, &mut self.graph);
        self.goto(&mut extra, join)?;

        Fragment::single(join)
            .append(pieces.checks.explicit, &mut self.graph)
            .append(pieces.body, &mut self.graph);
        Ok(extra_entry)
    }

    fn build_shared_entries(
        &mut self,
        normal_entry: InstrId,
        prologue_start: Option<InstrId>,
        prologue_cursor: InstrId,
        pieces: Pieces,
    ) -> BuildResult<InstrId> {
        let temp = self.scopes.entry_points_temp;
        let join = self.join_entry_in(None);

        let mut normal = Fragment::single(normal_entry);
        self.int_constant(&mut normal, EntryPointStyle::None as i64);
        self.store_frame_variable(&mut normal, temp)?;
        self.drop_value(&mut normal)?;
        self.goto(&mut normal, join)?;

        let extra_entry = self.function_entry();
        let mut extra = Fragment::single(extra_entry);
        self.int_constant(&mut extra, EntryPointStyle::SharedWithVariable as i64);
        self.store_frame_variable(&mut extra, temp)?;
        self.drop_value(&mut extra)?;
        self.goto(&mut extra, join)?;

        // The argument-copying prologue now follows the join.
        let mut shared = match prologue_start {
            Some(start) => {
                self.graph.link(join, start);
                Fragment::span(join, prologue_cursor)
            }
            None => Fragment::single(join),
        };
        shared = [
            pieces.every_time,
            pieces.first_time,
            pieces.type_args,
            pieces.checks.explicit,
        ]
        .into_iter()
        .fold(shared, |code, piece| code.append(piece, &mut self.graph));

        self.load_frame_variable(&mut shared, temp);
        self.int_constant(&mut shared, EntryPointStyle::SharedWithVariable as i64);
        let (skip_checks, do_checks) = self.branch_if_equal(&mut shared, false)?;
        let rest = self.join_entry();
        self.join_arm(do_checks, pieces.checks.implicit, rest)?;
        self.join_arm(skip_checks, pieces.checks.redefinitions, rest)?;
        Fragment::single(rest).append(pieces.body, &mut self.graph);
        Ok(extra_entry)
    }

    /// Stack check and, for closures, the captured context
    pub(super) fn build_every_time_prologue(&mut self, f: &Function) -> BuildResult<Fragment> {
        let mut code = Fragment::empty();
        self.check_stack_overflow_in_prologue(&mut code);
        if f.is_closure_function() {
            self.load_closure_context(&mut code)?;
        }
        Ok(code)
    }

    /// Context of the root scope, with captured parameters copied into it
    fn build_first_time_prologue(&mut self, f: &Function) -> BuildResult<Fragment> {
        let mut code = Fragment::empty();
        let root = self.scopes.root();
        if self.scope_context_size(root) == 0 {
            return Ok(code);
        }
        self.enter_scope(&mut code, root)?;
        for i in 0..f.num_parameters() {
            let parameter = self.parameter_variable(i)?;
            let raw = self.raw_parameter_variable(i)?;
            if parameter != raw {
                self.load_frame_variable(&mut code, raw);
                self.store_local(&mut code, parameter)?;
                self.drop_value(&mut code)?;
            }
        }
        Ok(code)
    }

    fn build_function_body(&mut self, f: &'a Function) -> BuildResult<Fragment> {
        let mut body = Fragment::empty();
        if f.native_name.is_some() {
            self.build_native_function_body(&mut body, f)?;
            return Ok(body);
        }
        self.build_equality_null_shortcut(&mut body, f)?;
        let program = self.ctx.program;
        if let Some(statement) = program.body(f.id) {
            self.build_statement(&mut body, statement)?;
        }
        if body.is_open() {
            self.null_constant(&mut body);
            self.return_value(&mut body)?;
        }
        Ok(body)
    }

    /// A user-defined `==` returns false for a null argument without
    /// running its body
    fn build_equality_null_shortcut(&mut self, code: &mut Fragment, f: &Function) -> BuildResult<()> {
        let is_user_equals = f.name == "=="
            && !f.is_static
            && f.parameters.len() == 1
            && f.owner != self.store.core().object;
        if !is_user_equals {
            return Ok(());
        }
        let other = self.parameter_variable(1)?;
        self.load_local(code, other)?;
        self.null_constant(code);
        let (is_null, not_null) = self.branch_if_equal(code, false)?;
        let mut null_case = Fragment::single(is_null);
        self.bool_constant(&mut null_case, false);
        self.return_value(&mut null_case)?;
        self.continue_at(code, not_null);
        Ok(())
    }

    /// Call the native implementation with the raw parameters
    fn build_native_function_body(&mut self, code: &mut Fragment, f: &Function) -> BuildResult<()> {
        for i in 0..f.num_parameters() {
            let raw = self.raw_parameter_variable(i)?;
            self.load_local(code, raw)?;
            self.push_argument(code)?;
        }
        if f.is_generic() {
            self.load_function_type_arguments(code)?;
            self.push_argument(code)?;
        }
        self.native_call(code, f)?;
        // Intrinsified natives are trusted to return their declared type.
        if f.recognized.is_none() {
            self.check_assignable(code, f.result_type, "function result", AssertKind::InsertedByFrontend)?;
        }
        self.return_value(code)
    }
}

#[cfg(test)]
mod tests {
    use super::EntryPointStyle;
    use crate::builder::{build_flow_graph, BuildContext};
    use crate::config::BuilderConfig;
    use crate::il::InstrKind;
    use crate::kernel::{Expression, KernelProgram, ScopeTreeBuilder, Statement};
    use crate::object::{FunctionKind, ObjectStore, Parameter};

    #[test]
    fn test_static_function_has_single_entry() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let mut f = store.new_function("f", object, FunctionKind::Regular);
        f.is_static = true;
        let f = store.add_function(f);
        let mut program = KernelProgram::new();
        let layout = ScopeTreeBuilder::new(&store, f).finish();
        program.add_body(f, Statement::Return(Some(Expression::Int(1))), layout);
        let graph = build_flow_graph(BuildContext::new(&store, &program), f).unwrap();
        assert!(graph.normal_entry().is_some());
        assert!(graph.unchecked_entry().is_none());
        assert_eq!(graph.count(|k| matches!(k, InstrKind::Return)), 1);
    }

    #[test]
    fn test_generic_covariant_parameter_gets_separate_entry() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let int = store.core().int_type;
        let mut m = store.new_function("add", object, FunctionKind::Regular);
        let mut p = Parameter::new("x", int);
        p.is_generic_covariant_impl = true;
        m.parameters = vec![p];
        m.num_fixed_parameters = 1;
        let m = store.add_function(m);
        let program = KernelProgram::new();
        let graph = build_flow_graph(BuildContext::new(&store, &program), m).unwrap();
        let unchecked = graph.unchecked_entry().expect("unchecked entry");
        // The unchecked entry starts with its marker.
        let marker = graph.instr(unchecked).next.unwrap();
        assert_eq!(
            graph.kind(marker),
            &InstrKind::Constant(crate::object::ConstValue::Int(EntryPointStyle::Separate as i64))
        );
        assert_eq!(graph.count(|k| matches!(k, InstrKind::AssertAssignable { .. })), 1);
        assert_eq!(graph.count(|k| matches!(k, InstrKind::Redefinition(_))), 1);
    }

    #[test]
    fn test_unchecked_entries_disabled() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let int = store.core().int_type;
        let mut m = store.new_function("add", object, FunctionKind::Regular);
        let mut p = Parameter::new("x", int);
        p.is_generic_covariant_impl = true;
        m.parameters = vec![p];
        m.num_fixed_parameters = 1;
        let m = store.add_function(m);
        let program = KernelProgram::new();
        let config = BuilderConfig {
            use_unchecked_entry_points: false,
            ..BuilderConfig::default()
        };
        let graph = build_flow_graph(BuildContext::new(&store, &program).with_config(&config), m).unwrap();
        assert!(graph.unchecked_entry().is_none());
        assert_eq!(graph.count(|k| matches!(k, InstrKind::AssertAssignable { .. })), 1);
    }

    #[test]
    fn test_closure_uses_shared_entry_variable() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let int = store.core().int_type;
        let mut outer = store.new_function("outer", object, FunctionKind::Regular);
        outer.is_static = true;
        let outer = store.add_function(outer);
        let mut c = store.new_function("<anonymous closure>", object, FunctionKind::Closure);
        c.parent = Some(outer);
        c.parameters = vec![Parameter::new("x", int)];
        c.num_fixed_parameters = 1;
        let c = store.add_function(c);
        let program = KernelProgram::new();
        let graph = build_flow_graph(BuildContext::new(&store, &program), c).unwrap();
        assert!(graph.unchecked_entry().is_some());
        // One check on the checked path; the unchecked path narrows instead.
        assert_eq!(graph.count(|k| matches!(k, InstrKind::AssertAssignable { .. })), 1);
        assert_eq!(graph.count(|k| matches!(k, InstrKind::Redefinition(_))), 1);
        assert_eq!(graph.count(|k| matches!(k, InstrKind::StoreLocal(_))), 4);
    }

    #[test]
    fn test_user_equality_returns_false_for_null() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let class = store.declare_class("Point", None, Some(object), &[]);
        let dynamic = store.types().dynamic();
        let mut eq = store.new_function("==", class, FunctionKind::Regular);
        eq.parameters = vec![Parameter::new("other", dynamic)];
        eq.num_fixed_parameters = 1;
        let eq = store.add_function(eq);
        let program = KernelProgram::new();
        let graph = build_flow_graph(BuildContext::new(&store, &program), eq).unwrap();
        assert_eq!(graph.count(|k| matches!(k, InstrKind::Return)), 2);
        assert_eq!(
            graph.count(|k| matches!(k, InstrKind::Constant(crate::object::ConstValue::Bool(false)))),
            1
        );
    }
}
