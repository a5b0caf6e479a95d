//! Kernel function bodies
//!
//! Statements and expressions with bindings already resolved: variables are
//! referenced by [`VariableId`], calls by target, scopes by [`ScopeId`].

use crate::object::{ClassId, FieldId, FunctionId, TypeArgsId, TypeId};

use super::scope::{ScopeId, VariableId};

/// Call arguments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    /// Type arguments. For constructor invocations this is the full vector of
    /// the allocated class, for generic calls the function type arguments.
    pub types: Option<TypeArgsId>,
    /// Positional arguments
    pub positional: Vec<Expression>,
    /// Named arguments in call order
    pub named: Vec<(String, Expression)>,
}

impl Arguments {
    /// Positional arguments only
    pub fn positional(args: Vec<Expression>) -> Self {
        Arguments {
            types: None,
            positional: args,
            named: Vec::new(),
        }
    }

    /// Positional arguments with a type-argument vector
    pub fn with_types(types: TypeArgsId, args: Vec<Expression>) -> Self {
        Arguments {
            types: Some(types),
            positional: args,
            named: Vec::new(),
        }
    }

    /// Number of value arguments
    pub fn count(&self) -> usize {
        self.positional.len() + self.named.len()
    }

    /// Names of the named arguments in call order
    pub fn names(&self) -> Vec<String> {
        self.named.iter().map(|(n, _)| n.clone()).collect()
    }
}

/// One `catch` clause
#[derive(Debug, Clone, PartialEq)]
pub struct Catch {
    /// Type guard (`dynamic` catches everything)
    pub guard: TypeId,
    /// Scope holding the clause variables
    pub scope: Option<ScopeId>,
    /// Variable bound to the exception
    pub exception: Option<VariableId>,
    /// Variable bound to the stack trace
    pub stack_trace: Option<VariableId>,
    /// Handler body
    pub body: Box<Statement>,
}

/// A statement
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `;`
    Empty,
    /// `{ ... }`, optionally opening a scope
    Block {
        /// Scope opened by the block
        scope: Option<ScopeId>,
        /// Statements
        statements: Vec<Statement>,
    },
    /// Expression evaluated for effect
    Expression(Expression),
    /// `var x = e;`
    VariableDeclaration {
        /// Declared variable
        variable: VariableId,
        /// Initializer (`null` when absent)
        initializer: Option<Expression>,
    },
    /// `if (c) a else b`
    If {
        /// Condition
        condition: Expression,
        /// Then branch
        then: Box<Statement>,
        /// Else branch
        otherwise: Option<Box<Statement>>,
    },
    /// `while (c) body`
    While {
        /// Condition
        condition: Expression,
        /// Loop body
        body: Box<Statement>,
    },
    /// `for (vars; c; updates) body`
    For {
        /// Scope of the loop variables
        scope: Option<ScopeId>,
        /// Loop variable declarations
        variables: Vec<Statement>,
        /// Condition (`true` when absent)
        condition: Option<Expression>,
        /// Update expressions run after each iteration
        updates: Vec<Expression>,
        /// Loop body
        body: Box<Statement>,
    },
    /// `return e;`
    Return(Option<Expression>),
    /// `try { } catch ...`
    TryCatch {
        /// Protected body
        body: Box<Statement>,
        /// Handlers in order
        catches: Vec<Catch>,
    },
    /// `assert(c, m);`
    Assert {
        /// Condition
        condition: Expression,
        /// Optional message
        message: Option<Expression>,
    },
}

/// An expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// `null`
    Null,
    /// Boolean literal
    Bool(bool),
    /// Integer literal
    Int(i64),
    /// Double literal
    Double(f64),
    /// String literal
    String(String),
    /// `this`
    This,
    /// Read a local
    VariableGet(VariableId),
    /// Write a local; the value of the expression is the stored value
    VariableSet(VariableId, Box<Expression>),
    /// Read a static field
    StaticGet(FieldId),
    /// Call a static function or top-level function
    StaticInvocation {
        /// Callee
        target: FunctionId,
        /// Arguments
        arguments: Arguments,
    },
    /// Dynamic or interface method call
    MethodInvocation {
        /// Receiver
        receiver: Box<Expression>,
        /// Selector
        name: String,
        /// Statically resolved interface target
        interface_target: Option<FunctionId>,
        /// Arguments
        arguments: Arguments,
    },
    /// Getter call
    PropertyGet {
        /// Receiver
        receiver: Box<Expression>,
        /// Getter name
        name: String,
        /// Statically resolved interface target
        interface_target: Option<FunctionId>,
    },
    /// Call a closure value
    FunctionInvocation {
        /// Closure
        callee: Box<Expression>,
        /// Arguments
        arguments: Arguments,
    },
    /// `new C<T...>(...)`
    ConstructorInvocation {
        /// Class allocated
        class: ClassId,
        /// Generative constructor
        target: FunctionId,
        /// Arguments (type arguments are the full vector of the allocated class)
        arguments: Arguments,
    },
    /// Function expression (the closure body is built separately)
    FunctionExpression(FunctionId),
    /// `!e`
    Not(Box<Expression>),
    /// A type used as a value
    TypeLiteral(TypeId),
    /// `e is T`
    Is(Box<Expression>, TypeId),
    /// `e as T`
    As(Box<Expression>, TypeId),
    /// `throw e`
    Throw(Box<Expression>),
    /// `rethrow` (only inside a catch clause)
    Rethrow,
}
