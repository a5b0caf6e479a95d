//! Pass 1: classifying the type-argument value of allocation sites

use crate::il::{FlowGraph, InstrId, InstrKind, LocalRef, Slot};
use crate::object::{ClassId, ConstValue, FunctionId, ObjectStore, TypeArgsId};

use super::TypeUsageInfo;

/// Shape of the value passed as the type-argument vector of an allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeArgumentsUse {
    /// `Constant(#null)` or `Constant(#TypeArguments)`
    Constant(Option<TypeArgsId>),
    /// `InstantiateTypeArguments(vector, ...)`
    Instantiated(TypeArgsId),
    /// The type-argument field of an existing instance of `class`
    InstanceField {
        /// Class the instance is known or assumed to have
        class: ClassId,
    },
    /// A factory forwarding its own type-argument parameter
    FactoryParameter,
    /// Anything else (phis, calls)
    Unknown,
}

/// Classify the definition `type_arguments` feeding an allocation in `function`
pub fn classify(store: &ObjectStore, function: FunctionId, graph: &FlowGraph, type_arguments: InstrId) -> TypeArgumentsUse {
    let instr = graph.instr(type_arguments);
    match &instr.kind {
        InstrKind::Constant(ConstValue::Null) => TypeArgumentsUse::Constant(None),
        InstrKind::Constant(ConstValue::TypeArguments(v)) => TypeArgumentsUse::Constant(Some(*v)),
        InstrKind::InstantiateTypeArguments(v) => TypeArgumentsUse::Instantiated(*v),
        InstrKind::LoadNativeField(Slot::TypeArguments { class, offset }) => {
            let f = store.function(function);
            // Exact classes are unknown here: on a receiver load assume the
            // enclosing class when its vector is long enough.
            let receiver_class = instr
                .inputs
                .first()
                .filter(|&&i| matches!(graph.kind(i), InstrKind::LoadLocal(LocalRef::Variable(_))))
                .map(|_| f.owner)
                .filter(|&owner| !f.is_static && store.class(owner).num_type_arguments >= store.class(*class).num_type_arguments);
            let instance_class = receiver_class.unwrap_or(*class);
            let decl = store.class(instance_class);
            if decl.is_generic() && decl.type_arguments_field_offset == Some(*offset) {
                TypeArgumentsUse::InstanceField { class: instance_class }
            } else {
                TypeArgumentsUse::Unknown
            }
        }
        InstrKind::LoadLocal(LocalRef::Variable(_)) | InstrKind::LoadFpRelativeSlot { .. } => {
            if store.function(function).is_factory {
                TypeArgumentsUse::FactoryParameter
            } else {
                TypeArgumentsUse::Unknown
            }
        }
        _ => TypeArgumentsUse::Unknown,
    }
}

impl TypeUsageInfo {
    /// Record one allocation of `class` whose vector is produced by `type_arguments`
    pub fn register_type_arguments_use(
        &mut self,
        store: &ObjectStore,
        function: FunctionId,
        graph: &FlowGraph,
        class: ClassId,
        type_arguments: InstrId,
    ) {
        match classify(store, function, graph, type_arguments) {
            TypeArgumentsUse::Constant(v) => self.use_type_arguments_in_instance_creation(store, class, v),
            TypeArgumentsUse::Instantiated(v) => self.use_type_arguments_in_instance_creation(store, class, Some(v)),
            TypeArgumentsUse::InstanceField { class: instance_class } => {
                let declaration = store.class(instance_class).declaration_type_arguments;
                self.use_type_arguments_in_instance_creation(store, class, declaration);
            }
            TypeArgumentsUse::FactoryParameter => {
                let owner = store.function(function).owner;
                let declaration = store.class(owner).declaration_type_arguments;
                self.use_type_arguments_in_instance_creation(store, class, declaration);
            }
            TypeArgumentsUse::Unknown => {
                tracing::trace!(target: "kilt::type_usage", class = class.0, "unrecognized type arguments");
            }
        }
    }

    /// Record every allocation site and type test of a built graph
    pub fn record_graph(&mut self, store: &ObjectStore, graph: &FlowGraph) {
        let function = graph.function();
        for id in graph.reachable_instructions() {
            let instr = graph.instr(id);
            match &instr.kind {
                InstrKind::AllocateObject { class, argument_count: 1, closure_function: None } => {
                    let vector = instr
                        .inputs
                        .first()
                        .and_then(|&push| graph.instr(push).inputs.first().copied());
                    if let Some(vector) = vector {
                        self.register_type_arguments_use(store, function, graph, *class, vector);
                    }
                }
                InstrKind::AssertAssignable { dst_type, .. } => self.use_type_in_assert_assignable(store, *dst_type),
                InstrKind::InstanceOf(ty) => self.use_type_in_assert_assignable(store, *ty),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::FlowGraph;
    use crate::object::FunctionKind;

    fn generic_fixture() -> (ObjectStore, ClassId, FunctionId) {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let boxed = store.declare_class("Box", None, Some(object), &["T"]);
        let f = store.new_function("make", boxed, FunctionKind::Regular);
        let fid = store.add_function(f);
        (store, boxed, fid)
    }

    #[test]
    fn test_classify_constants() {
        let (mut store, _, fid) = generic_fixture();
        let int = store.core().int_type;
        let v = store.types_mut().intern_vector(vec![int]);
        let mut graph = FlowGraph::new(fid, None);
        let null = graph.push(InstrKind::Constant(ConstValue::Null), vec![]);
        let vector = graph.push(InstrKind::Constant(ConstValue::TypeArguments(v)), vec![]);
        assert_eq!(classify(&store, fid, &graph, null), TypeArgumentsUse::Constant(None));
        assert_eq!(classify(&store, fid, &graph, vector), TypeArgumentsUse::Constant(Some(v)));
    }

    #[test]
    fn test_classify_receiver_field_forwarding() {
        let (store, boxed, fid) = generic_fixture();
        let offset = store.class(boxed).type_arguments_field_offset.unwrap();
        let mut graph = FlowGraph::new(fid, None);
        let receiver = graph.push(InstrKind::LoadLocal(LocalRef::Variable(crate::kernel::VariableId(0))), vec![]);
        let load = graph.push(
            InstrKind::LoadNativeField(Slot::TypeArguments { class: boxed, offset }),
            vec![receiver],
        );
        assert_eq!(
            classify(&store, fid, &graph, load),
            TypeArgumentsUse::InstanceField { class: boxed }
        );
    }

    #[test]
    fn test_parameter_outside_factory_is_unknown() {
        let (mut store, _, fid) = generic_fixture();
        let mut graph = FlowGraph::new(fid, None);
        let param = graph.push(InstrKind::LoadLocal(LocalRef::Variable(crate::kernel::VariableId(1))), vec![]);
        assert_eq!(classify(&store, fid, &graph, param), TypeArgumentsUse::Unknown);
        store.function_mut(fid).is_factory = true;
        assert_eq!(classify(&store, fid, &graph, param), TypeArgumentsUse::FactoryParameter);
    }
}
