//! Type Usage and Type Testing Stub Pipeline Tests
//!
//! Builds flow graphs for small generic programs, runs the type usage
//! collector over them and specialises stubs for the types found.
//! Run with: cargo test -p kilt-engine --test type_testing_pipeline

use std::sync::Arc;

use kilt_engine::config::{StubConfig, TypeUsageConfig};
use kilt_engine::il::InstrKind;
use kilt_engine::kernel::{Arguments, Expression, ScopeTreeBuilder, Statement};
use kilt_engine::object::{ClassId, FunctionKind, LibraryId, Parameter, TypeArgsId};
use kilt_engine::stubs::{ChannelObserver, Instance, StubOutcome, StubSimulator, TypeTestContext};
use kilt_engine::{
    build_flow_graph, BuildContext, FlowGraph, FunctionId, HierarchyInfo, KernelProgram, ObjectStore, StubCode,
    TypeId, TypeTestingStubGenerator, TypeTestingStubs, TypeUsageInfo,
};

/// Program under construction: one library of generic classes
struct App {
    store: ObjectStore,
    program: KernelProgram,
    lib: LibraryId,
}

impl App {
    fn new() -> Self {
        let mut store = ObjectStore::new();
        let lib = store.add_library("package:app/app.dart", false);
        App {
            store,
            program: KernelProgram::new(),
            lib,
        }
    }

    fn class(&mut self, name: &str, params: &[&str]) -> ClassId {
        let object = self.store.core().object;
        self.store.declare_class(name, Some(self.lib), Some(object), params)
    }

    fn constructor(&mut self, class: ClassId) -> FunctionId {
        let f = self.store.new_function("", class, FunctionKind::Constructor);
        self.store.add_function(f)
    }

    fn static_function(&mut self, name: &str, body: Statement) -> FunctionId {
        let object = self.store.core().object;
        let mut f = self.store.new_function(name, object, FunctionKind::Regular);
        f.is_static = true;
        let f = self.store.add_function(f);
        let layout = ScopeTreeBuilder::new(&self.store, f).finish();
        self.program.add_body(f, body, layout);
        f
    }

    /// Instance method `name(x)` whose body is built from the variable of `x`
    fn method_with_parameter(
        &mut self,
        class: ClassId,
        name: &str,
        body: impl FnOnce(Expression) -> Statement,
    ) -> FunctionId {
        let dynamic = self.store.types().dynamic();
        let mut f = self.store.new_function(name, class, FunctionKind::Regular);
        f.parameters = vec![Parameter::new("x", dynamic)];
        f.num_fixed_parameters = 1;
        let f = self.store.add_function(f);
        let layout = ScopeTreeBuilder::new(&self.store, f).finish();
        let x = layout.parameter(1).expect("parameter x");
        self.program.add_body(f, body(Expression::VariableGet(x)), layout);
        f
    }

    fn method(&mut self, class: ClassId, name: &str, body: Statement) -> FunctionId {
        let f = self.store.new_function(name, class, FunctionKind::Regular);
        let f = self.store.add_function(f);
        let layout = ScopeTreeBuilder::new(&self.store, f).finish();
        self.program.add_body(f, body, layout);
        f
    }

    fn vector(&mut self, types: &[TypeId]) -> TypeArgsId {
        self.store.types_mut().intern_vector(types.to_vec())
    }

    fn graphs(&self, functions: &[FunctionId]) -> Vec<FlowGraph> {
        functions
            .iter()
            .map(|&f| build_flow_graph(BuildContext::new(&self.store, &self.program), f).expect("graph builds"))
            .collect()
    }

    fn collect(&mut self, functions: &[FunctionId]) -> TypeUsageInfo {
        let graphs = self.graphs(functions);
        TypeUsageInfo::collect(&mut self.store, &graphs, TypeUsageConfig::default())
    }
}

fn allocate(class: ClassId, constructor: FunctionId, vector: TypeArgsId) -> Statement {
    Statement::Expression(Expression::ConstructorInvocation {
        class,
        target: constructor,
        arguments: Arguments::with_types(vector, vec![]),
    })
}

fn block(statements: Vec<Statement>) -> Statement {
    Statement::Block {
        scope: None,
        statements,
    }
}

/// `Box<T>` allocated as `Box<int>` and `Box<String>`, and `Checker<C>`
/// allocated with both box types. `Checker.test` performs `x is C` when
/// `with_test` is set.
struct BoxProgram {
    app: App,
    boxed: ClassId,
    functions: Vec<FunctionId>,
}

fn box_program(with_test: bool) -> BoxProgram {
    let mut app = App::new();
    let boxed = app.class("Box", &["T"]);
    let checker = app.class("Checker", &["C"]);
    let box_ctor = app.constructor(boxed);
    let checker_ctor = app.constructor(checker);

    let int = app.store.core().int_type;
    let string = app.store.core().string_type;
    let box_int = app.store.interface_type(boxed, &[int]);
    let box_string = app.store.interface_type(boxed, &[string]);
    let of_int = app.vector(&[int]);
    let of_string = app.vector(&[string]);
    let of_box_int = app.vector(&[box_int]);
    let of_box_string = app.vector(&[box_string]);

    let main = app.static_function(
        "main",
        block(vec![
            allocate(boxed, box_ctor, of_int),
            allocate(boxed, box_ctor, of_string),
            allocate(checker, checker_ctor, of_box_int),
            allocate(checker, checker_ctor, of_box_string),
            Statement::Return(None),
        ]),
    );
    let mut functions = vec![main];
    if with_test {
        let c = app.store.type_parameter(checker, 0);
        let test = app.method_with_parameter(checker, "test", |x| {
            Statement::Return(Some(Expression::Is(Box::new(x), c)))
        });
        functions.push(test);
    }
    BoxProgram { app, boxed, functions }
}

// =============================================================================
// TYPE USAGE
// =============================================================================

mod type_usage {
    use super::*;

    #[test]
    fn test_allocations_are_recorded_per_class() {
        let BoxProgram {
            mut app,
            boxed,
            functions,
        } = box_program(false);
        let info = app.collect(&functions);
        let int = app.store.core().int_type;
        let string = app.store.core().string_type;
        let of_int = app.vector(&[int]);
        let of_string = app.vector(&[string]);
        let recorded = info.instance_creation_arguments(boxed).expect("Box is known");
        assert_eq!(recorded.len(), 2);
        assert!(recorded.contains(Some(of_int)));
        assert!(recorded.contains(Some(of_string)));
    }

    #[test]
    fn test_box_types_tested_through_checker_parameter() {
        let BoxProgram {
            mut app,
            boxed,
            functions,
        } = box_program(true);
        let info = app.collect(&functions);
        let core = app.store.core().clone();
        let box_int = app.store.interface_type(boxed, &[core.int_type]);
        let box_string = app.store.interface_type(boxed, &[core.string_type]);
        let box_double = app.store.interface_type(boxed, &[core.double_type]);
        assert!(info.is_used_in_type_test(&app.store, box_int));
        assert!(info.is_used_in_type_test(&app.store, box_string));
        assert!(!info.is_used_in_type_test(&app.store, box_double));
    }

    #[test]
    fn test_box_types_untested_without_type_test() {
        let BoxProgram {
            mut app,
            boxed,
            functions,
        } = box_program(false);
        let info = app.collect(&functions);
        let core = app.store.core().clone();
        let box_int = app.store.interface_type(boxed, &[core.int_type]);
        let box_string = app.store.interface_type(boxed, &[core.string_type]);
        assert!(!info.is_used_in_type_test(&app.store, box_int));
        assert!(!info.is_used_in_type_test(&app.store, box_string));
        // Always present.
        assert!(info.is_used_in_type_test(&app.store, core.dynamic_type));
        assert!(info.is_used_in_type_test(&app.store, core.object_type));
    }

    #[test]
    fn test_forwarded_vector_is_propagated_from_enclosing_class() {
        let mut app = App::new();
        let boxed = app.class("Box", &["T"]);
        let holder = app.class("Holder", &["H"]);
        let box_ctor = app.constructor(boxed);
        let holder_ctor = app.constructor(holder);
        let h = app.store.type_parameter(holder, 0);
        let int = app.store.core().int_type;
        let of_h = app.vector(&[h]);
        let of_int = app.vector(&[int]);

        // Holder<H>.make() => new Box<H>()
        let make = app.method(
            holder,
            "make",
            Statement::Return(Some(Expression::ConstructorInvocation {
                class: boxed,
                target: box_ctor,
                arguments: Arguments::with_types(of_h, vec![]),
            })),
        );
        let main = app.static_function("main", block(vec![allocate(holder, holder_ctor, of_int)]));

        let graphs = app.graphs(&[make]);
        // The enclosing vector is forwarded as is.
        assert_eq!(graphs[0].count(|k| matches!(k, InstrKind::InstantiateTypeArguments(_))), 0);

        let info = app.collect(&[main, make]);
        let recorded = info.instance_creation_arguments(boxed).expect("Box is known");
        assert!(recorded.contains(Some(of_h)));
        assert!(recorded.contains(Some(of_int)));
    }

    #[test]
    fn test_zero_rounds_keep_symbolic_vectors_only() {
        let mut app = App::new();
        let boxed = app.class("Box", &["T"]);
        let holder = app.class("Holder", &["H"]);
        let box_ctor = app.constructor(boxed);
        let holder_ctor = app.constructor(holder);
        let h = app.store.type_parameter(holder, 0);
        let int = app.store.core().int_type;
        let of_h = app.vector(&[h]);
        let of_int = app.vector(&[int]);
        let make = app.method(
            holder,
            "make",
            Statement::Return(Some(Expression::ConstructorInvocation {
                class: boxed,
                target: box_ctor,
                arguments: Arguments::with_types(of_h, vec![]),
            })),
        );
        let main = app.static_function("main", block(vec![allocate(holder, holder_ctor, of_int)]));

        let graphs = app.graphs(&[main, make]);
        let config = TypeUsageConfig { propagation_rounds: 0 };
        let info = TypeUsageInfo::collect(&mut app.store, &graphs, config);
        let recorded = info.instance_creation_arguments(boxed).expect("Box is known");
        assert!(recorded.contains(Some(of_h)));
        assert!(!recorded.contains(Some(of_int)));
    }
}

// =============================================================================
// STUBS
// =============================================================================

mod stubs {
    use super::*;

    #[test]
    fn test_tested_types_get_specialised_stubs() {
        let BoxProgram {
            mut app,
            boxed,
            functions,
        } = box_program(true);
        let info = app.collect(&functions);
        let core = app.store.core().clone();
        let box_int = app.store.interface_type(boxed, &[core.int_type]);
        let box_string = app.store.interface_type(boxed, &[core.string_type]);
        let of_string = app.vector(&[core.string_type]);

        let mut boxes: Vec<TypeId> = info
            .tested_types()
            .filter(|&t| app.store.types().type_class(t) == Some(boxed))
            .collect();
        boxes.sort();
        let mut expected = vec![box_int, box_string];
        expected.sort();
        assert_eq!(boxes, expected);

        let store = &app.store;
        let hierarchy = HierarchyInfo::new(store);
        let generator = TypeTestingStubGenerator::new(store, StubConfig::default()).with_hierarchy(&hierarchy);
        let stubs = TypeTestingStubs::new(StubConfig::default());
        let (observer, names) = ChannelObserver::new();
        stubs.add_observer(Arc::new(observer));
        for &ty in &boxes {
            assert!(stubs.type_test_code(&generator, ty).unwrap().is_specialized());
        }
        assert_eq!(stubs.num_specialized(), 2);
        let received: Vec<String> = names.try_iter().collect();
        assert_eq!(received.len(), 2);
        assert!(received
            .iter()
            .all(|name| name.starts_with("TypeTestingStub_package_app_app_dart_Box__dart_core_")));

        let StubCode::Specialized(routine) = stubs.stub_for(store, box_int) else {
            panic!("Box<int> is specialised");
        };
        let ctx = TypeTestContext::default();
        let accepted = Instance::of_type(store, box_int).unwrap();
        let rejected = Instance::Object {
            class: boxed,
            type_arguments: Some(of_string),
        };
        assert_eq!(StubSimulator::execute(store, &routine, &accepted, &ctx), StubOutcome::Accepted);
        assert_eq!(StubSimulator::execute(store, &routine, &rejected, &ctx), StubOutcome::SlowPath);
    }

    #[test]
    fn test_stub_accepts_whole_subclass_range() {
        let mut app = App::new();
        let boxed = app.class("Box", &["T"]);
        let object = app.store.core().object;
        let sub = app.store.declare_class("SubBox", Some(app.lib), Some(boxed), &["U"]);
        let u = app.store.type_parameter(sub, 0);
        app.store.set_super_type_arguments(sub, &[u]);
        let fixed = app.store.declare_class("IntBox", Some(app.lib), Some(boxed), &[]);
        let other = app.store.declare_class("Unrelated", Some(app.lib), Some(object), &["V"]);

        let core = app.store.core().clone();
        app.store.set_super_type_arguments(fixed, &[core.int_type]);
        let box_int = app.store.interface_type(boxed, &[core.int_type]);
        let sub_int = app.store.interface_type(sub, &[core.int_type]);
        let sub_string = app.store.interface_type(sub, &[core.string_type]);
        let fixed_type = app.store.interface_type(fixed, &[]);
        let other_int = app.store.interface_type(other, &[core.int_type]);

        let store = &app.store;
        let hierarchy = HierarchyInfo::new(store);
        let generator = TypeTestingStubGenerator::new(store, StubConfig::default()).with_hierarchy(&hierarchy);
        let routine = generator.build_code_for_type(box_int).unwrap();
        let ctx = TypeTestContext::default();

        for ty in [box_int, sub_int, fixed_type] {
            let instance = Instance::of_type(store, ty).unwrap();
            assert_eq!(
                StubSimulator::execute(store, &routine, &instance, &ctx),
                StubOutcome::Accepted,
                "{} should pass",
                ty
            );
        }
        for ty in [sub_string, other_int] {
            let instance = Instance::of_type(store, ty).unwrap();
            assert_eq!(StubSimulator::execute(store, &routine, &instance, &ctx), StubOutcome::SlowPath);
        }
    }

    #[test]
    fn test_slow_path_rejects_what_the_stub_defers() {
        let mut app = App::new();
        let boxed = app.class("Box", &["T"]);
        let core = app.store.core().clone();
        let box_int = app.store.interface_type(boxed, &[core.int_type]);
        let box_string = app.store.interface_type(boxed, &[core.string_type]);
        let routine = {
            let hierarchy = HierarchyInfo::new(&app.store);
            TypeTestingStubGenerator::new(&app.store, StubConfig::default())
                .with_hierarchy(&hierarchy)
                .build_code_for_type(box_int)
                .unwrap()
        };
        let mismatch = Instance::of_type(&app.store, box_string).unwrap();
        let ctx = TypeTestContext::default();
        let mut simulator = StubSimulator::new(&mut app.store);
        let code = StubCode::Specialized(routine);
        assert!(!simulator.is_instance_of(&code, box_int, &mismatch, &ctx));
        assert!(simulator.is_instance_of(&code, box_int, &Instance::Null, &ctx));
    }

    #[test]
    fn test_precompiled_mode_uses_default_stub() {
        let app = App::new();
        let config = StubConfig {
            precompiled_mode: true,
            ..StubConfig::default()
        };
        let stubs = TypeTestingStubs::new(config);
        let int = app.store.core().int_type;
        assert_eq!(stubs.stub_for(&app.store, int), StubCode::DefaultTypeTest);
        assert_eq!(
            stubs.stub_for(&app.store, app.store.core().object_type),
            StubCode::TopTypeTypeTest
        );
    }
}
