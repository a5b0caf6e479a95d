//! Statements
//!
//! Statements leave the value stack as they found it. Once a fragment is
//! closed the rest of the enclosing block is dead and is not built.

use crate::error::BuildResult;
use crate::il::InstrId;
use crate::kernel::{Expression, ScopeId, Statement};

use super::{FlowGraphBuilder, Fragment};

impl<'a> FlowGraphBuilder<'a> {
    pub(super) fn build_statement(&mut self, code: &mut Fragment, statement: &Statement) -> BuildResult<()> {
        if code.is_closed() {
            return Ok(());
        }
        match statement {
            Statement::Empty => Ok(()),
            Statement::Block { scope, statements } => self.build_block(code, *scope, statements),
            Statement::Expression(e) => {
                self.build_expression(code, e)?;
                self.drop_value(code)
            }
            Statement::VariableDeclaration { variable, initializer } => {
                match initializer {
                    Some(e) => self.build_expression(code, e)?,
                    None => {
                        self.null_constant(code);
                    }
                }
                self.store_local(code, *variable)?;
                self.drop_value(code)
            }
            Statement::If {
                condition,
                then,
                otherwise,
            } => self.build_if(code, condition, then, otherwise.as_deref()),
            Statement::While { condition, body } => self.build_while(code, condition, body),
            Statement::For {
                scope,
                variables,
                condition,
                updates,
                body,
            } => self.build_for(code, *scope, variables, condition.as_ref(), updates, body),
            Statement::Return(value) => self.build_return(code, value.as_ref()),
            Statement::TryCatch { body, catches } => self.build_try_catch(code, body, catches),
            Statement::Assert { condition, message } => self.build_assert(code, condition, message.as_ref()),
        }
    }

    fn build_block(&mut self, code: &mut Fragment, scope: Option<ScopeId>, statements: &[Statement]) -> BuildResult<()> {
        // The prologue has already entered the root scope.
        let scope = scope.filter(|&s| s != self.scopes.root());
        if let Some(s) = scope {
            self.enter_scope(code, s)?;
        }
        for statement in statements {
            if code.is_closed() {
                break;
            }
            self.build_statement(code, statement)?;
        }
        if let Some(s) = scope {
            self.exit_scope(code, s)?;
        }
        Ok(())
    }

    fn build_if(
        &mut self,
        code: &mut Fragment,
        condition: &Expression,
        then: &Statement,
        otherwise: Option<&Statement>,
    ) -> BuildResult<()> {
        let negate = self.build_condition(code, condition)?;
        let (then_entry, else_entry) = self.branch_if_true(code, negate)?;
        let join = self.join_entry();

        let mut then_code = Fragment::single(then_entry);
        self.build_statement(&mut then_code, then)?;
        self.goto(&mut then_code, join)?;

        let mut else_code = Fragment::single(else_entry);
        if let Some(otherwise) = otherwise {
            self.build_statement(&mut else_code, otherwise)?;
        }
        self.goto(&mut else_code, join)?;

        self.continue_if_reached(code, join);
        Ok(())
    }

    fn build_while(&mut self, code: &mut Fragment, condition: &Expression, body: &Statement) -> BuildResult<()> {
        let header = self.join_entry();
        self.goto(code, header)?;
        self.continue_at(code, header);

        self.loop_depth += 1;
        let built = self.build_loop_body(code, Some(condition), &[], body, None);
        self.loop_depth -= 1;
        let (back_edge, exit) = built?;
        self.close_loop(code, header, back_edge, exit)
    }

    fn build_for(
        &mut self,
        code: &mut Fragment,
        scope: Option<ScopeId>,
        variables: &[Statement],
        condition: Option<&Expression>,
        updates: &[Expression],
        body: &Statement,
    ) -> BuildResult<()> {
        if let Some(s) = scope {
            self.enter_scope(code, s)?;
        }
        for v in variables {
            self.build_statement(code, v)?;
        }
        let header = self.join_entry();
        self.goto(code, header)?;
        self.continue_at(code, header);

        self.loop_depth += 1;
        let built = self.build_loop_body(code, condition, updates, body, scope);
        self.loop_depth -= 1;
        let (back_edge, exit) = built?;
        self.close_loop(code, header, back_edge, exit)?;

        if let Some(s) = scope {
            self.exit_scope(code, s)?;
        }
        Ok(())
    }

    /// Condition, body and updates of a loop whose header `code` is
    /// positioned at. Returns the body with its back edge still open and the
    /// exit entry. Without a condition the body continues `code` directly.
    fn build_loop_body(
        &mut self,
        code: &mut Fragment,
        condition: Option<&Expression>,
        updates: &[Expression],
        body: &Statement,
        scope: Option<ScopeId>,
    ) -> BuildResult<(Fragment, Option<InstrId>)> {
        self.check_stack_overflow(code);
        let (mut body_code, exit) = match condition {
            Some(c) => {
                let negate = self.build_condition(code, c)?;
                let (body_entry, exit_entry) = self.branch_if_true(code, negate)?;
                (Fragment::single(body_entry), Some(exit_entry))
            }
            None => (*code, None),
        };
        self.build_statement(&mut body_code, body)?;

        // Each iteration sees its own copy of the captured loop variables.
        let slots = scope.map_or(0, |s| self.scope_context_size(s));
        if slots > 0 && !updates.is_empty() {
            self.clone_context(&mut body_code, slots)?;
        }
        for update in updates {
            if body_code.is_closed() {
                break;
            }
            self.build_expression(&mut body_code, update)?;
            self.drop_value(&mut body_code)?;
        }
        Ok((body_code, exit))
    }

    /// Jump back to `header`; code after the loop continues at `exit`, or
    /// nowhere for a loop without a condition
    fn close_loop(&mut self, code: &mut Fragment, header: InstrId, mut back_edge: Fragment, exit: Option<InstrId>) -> BuildResult<()> {
        self.goto(&mut back_edge, header)?;
        match exit {
            Some(exit) => self.continue_at(code, exit),
            None => *code = back_edge,
        }
        Ok(())
    }

    fn build_return(&mut self, code: &mut Fragment, value: Option<&Expression>) -> BuildResult<()> {
        match value {
            Some(e) => self.build_expression(code, e)?,
            None => {
                self.null_constant(code);
            }
        }
        self.return_value(code)
    }

    /// `assert(condition, message)`, compiled only when asserts are enabled
    fn build_assert(&mut self, code: &mut Fragment, condition: &Expression, message: Option<&Expression>) -> BuildResult<()> {
        if !self.ctx.config.enable_asserts {
            return Ok(());
        }
        let after = self.join_entry();
        self.build_expression(code, condition)?;
        self.evaluate_assertion(code)?;
        self.check_boolean(code)?;
        let (holds, fails) = self.branch_if_true(code, false)?;

        let mut ok = Fragment::single(holds);
        self.goto(&mut ok, after)?;

        let mut failed = Fragment::single(fails);
        // Source offsets of the condition.
        self.int_constant(&mut failed, 0);
        self.push_argument(&mut failed)?;
        self.int_constant(&mut failed, 0);
        self.push_argument(&mut failed)?;
        match message {
            Some(m) => self.build_expression(&mut failed, m)?,
            None => {
                self.null_constant(&mut failed);
            }
        }
        self.push_argument(&mut failed)?;
        let throw_new = self.store.core().assertion_throw_new;
        self.static_call_simple(&mut failed, throw_new, 3)?;
        self.drop_value(&mut failed)?;
        self.goto(&mut failed, after)?;

        self.continue_at(code, after);
        Ok(())
    }

    /// Push a condition value; returns whether the branch must be negated
    pub(super) fn build_condition(&mut self, code: &mut Fragment, condition: &Expression) -> BuildResult<bool> {
        if let Expression::Not(inner) = condition {
            return Ok(!self.build_condition(code, inner)?);
        }
        self.build_expression(code, condition)?;
        let bool_type = self.store.core().bool_type;
        if self.static_type_of(condition) != Some(bool_type) {
            self.check_boolean(code)?;
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::{BuildContext, FlowGraphBuilder, Fragment};
    use crate::config::BuilderConfig;
    use crate::il::InstrKind;
    use crate::kernel::{Expression, KernelProgram, ScopeTreeBuilder, Statement};
    use crate::object::{FunctionId, FunctionKind, ObjectStore};

    fn static_function(store: &mut ObjectStore) -> FunctionId {
        let object = store.core().object;
        let mut f = store.new_function("f", object, FunctionKind::Regular);
        f.is_static = true;
        store.add_function(f)
    }

    #[test]
    fn test_if_without_else_joins() {
        let mut store = ObjectStore::new();
        let f = static_function(&mut store);
        let program = KernelProgram::new();
        let mut b = FlowGraphBuilder::new(BuildContext::new(&store, &program), f);
        let mut code = b.entry_fragment();
        let stmt = Statement::If {
            condition: Expression::Bool(true),
            then: Box::new(Statement::Expression(Expression::Int(1))),
            otherwise: None,
        };
        b.build_statement(&mut code, &stmt).unwrap();
        assert!(code.is_open());
        assert_eq!(b.stack_depth(), 0);
        assert_eq!(b.graph().count(|k| matches!(k, InstrKind::JoinEntry { .. })), 1);
        // A bool literal needs no AssertBool.
        assert_eq!(b.graph().count(|k| matches!(k, InstrKind::AssertBool)), 0);
    }

    #[test]
    fn test_if_both_arms_return_closes() {
        let mut store = ObjectStore::new();
        let f = static_function(&mut store);
        let program = KernelProgram::new();
        let mut b = FlowGraphBuilder::new(BuildContext::new(&store, &program), f);
        let mut code = b.entry_fragment();
        let stmt = Statement::If {
            condition: Expression::Bool(false),
            then: Box::new(Statement::Return(Some(Expression::Int(1)))),
            otherwise: Some(Box::new(Statement::Return(None))),
        };
        b.build_statement(&mut code, &stmt).unwrap();
        assert!(code.is_closed());
    }

    #[test]
    fn test_while_loop_has_overflow_check_at_depth_one() {
        let mut store = ObjectStore::new();
        let f = static_function(&mut store);
        let dynamic = store.types().dynamic();
        let mut layout = ScopeTreeBuilder::new(&store, f);
        let x = layout.declare("x", dynamic);
        let mut program = KernelProgram::new();
        program.add_body(f, Statement::Empty, layout.finish());
        let mut b = FlowGraphBuilder::new(BuildContext::new(&store, &program), f);
        let mut code = b.entry_fragment();
        let stmt = Statement::While {
            condition: Expression::VariableGet(x),
            body: Box::new(Statement::Expression(Expression::VariableSet(
                x,
                Box::new(Expression::Bool(false)),
            ))),
        };
        b.build_statement(&mut code, &stmt).unwrap();
        assert!(code.is_open());
        assert_eq!(b.stack_depth(), 0);
        assert_eq!(
            b.graph().count(|k| matches!(k, InstrKind::CheckStackOverflow { loop_depth: 1, .. })),
            1
        );
        // The condition reads an untyped variable.
        assert_eq!(b.graph().count(|k| matches!(k, InstrKind::AssertBool)), 1);
    }

    #[test]
    fn test_assert_disabled_emits_nothing() {
        let mut store = ObjectStore::new();
        let f = static_function(&mut store);
        let program = KernelProgram::new();
        let mut b = FlowGraphBuilder::new(BuildContext::new(&store, &program), f);
        let entry = b.target_entry();
        let mut code = Fragment::single(entry);
        let stmt = Statement::Assert {
            condition: Expression::Bool(true),
            message: None,
        };
        b.build_statement(&mut code, &stmt).unwrap();
        assert_eq!(code, Fragment::single(entry));
    }

    #[test]
    fn test_assert_enabled_calls_throw_new() {
        let mut store = ObjectStore::new();
        let f = static_function(&mut store);
        let program = KernelProgram::new();
        let config = BuilderConfig {
            enable_asserts: true,
            ..BuilderConfig::default()
        };
        let ctx = BuildContext::new(&store, &program).with_config(&config);
        let mut b = FlowGraphBuilder::new(ctx, f);
        let mut code = b.entry_fragment();
        let stmt = Statement::Assert {
            condition: Expression::Bool(true),
            message: Some(Expression::String("boom".into())),
        };
        b.build_statement(&mut code, &stmt).unwrap();
        let throw_new = store.core().assertion_throw_new;
        assert_eq!(
            b.graph().count(|k| matches!(k, InstrKind::StaticCall { target, .. } if *target == throw_new)),
            1
        );
        assert_eq!(b.stack_depth(), 0);
    }

    #[test]
    fn test_dead_statements_after_return_are_skipped() {
        let mut store = ObjectStore::new();
        let f = static_function(&mut store);
        let program = KernelProgram::new();
        let mut b = FlowGraphBuilder::new(BuildContext::new(&store, &program), f);
        let mut code = b.entry_fragment();
        let block = Statement::Block {
            scope: None,
            statements: vec![
                Statement::Return(None),
                Statement::Expression(Expression::Int(42)),
            ],
        };
        b.build_statement(&mut code, &block).unwrap();
        assert!(code.is_closed());
        assert_eq!(
            b.graph().count(|k| matches!(k, InstrKind::Constant(crate::object::ConstValue::Int(42)))),
            0
        );
    }
}
