//! Stub instruction set and assembler
//!
//! Type testing stubs are short straight-line routines with forward branches
//! only. The instance being tested, its class id and its type-argument vector
//! live in fixed registers; every routine either returns (the test succeeded)
//! or jumps to the shared slow path.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::hierarchy::CidRange;
use crate::object::{ClassId, TypeId};

/// Branch target inside one routine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Vector a type parameter of the tested type is looked up in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeArgumentsRegister {
    /// Instantiator (class) type arguments of the caller
    Instantiator,
    /// Function type arguments of the caller
    Function,
}

impl TypeArgumentsRegister {
    fn name(self) -> &'static str {
        match self {
            TypeArgumentsRegister::Instantiator => "instantiator",
            TypeArgumentsRegister::Function => "function",
        }
    }
}

/// One stub instruction
#[derive(Debug, Clone, PartialEq)]
pub enum StubOp {
    /// Jump when the instance is a small integer
    BranchIfSmi(Label),
    /// Jump unless the instance is a small integer
    BranchIfNotSmi(Label),
    /// Class id of a heap instance
    LoadClassId,
    /// Class id, with small integers mapped to the smi class id
    LoadClassIdMayBeSmi,
    /// Compare the class id register with a constant
    CompareClassId(ClassId),
    /// Compare the instance with `null`
    CompareNull,
    /// Load the instance's type-argument vector
    LoadInstanceTypeArguments {
        /// Byte offset of the field
        offset: u32,
    },
    /// Compare the loaded type-argument vector with `null`
    CompareInstanceTypeArgumentsNull,
    /// Class id of the type at `index` in the instance's vector
    LoadTypeArgumentClassId {
        /// Index into the flattened vector
        index: usize,
    },
    /// Compare a caller vector with `null` (all of its entries are dynamic)
    CompareTypeArgumentsNull(TypeArgumentsRegister),
    /// Compare the class id register with the class id of the type at
    /// `index` of a caller vector
    CompareTypeArgumentClassId {
        /// Caller vector
        source: TypeArgumentsRegister,
        /// Index into that vector
        index: usize,
    },
    /// Jump when the last comparison was equal
    BranchIfEqual(Label),
    /// Jump when the last comparison was not equal
    BranchIfNotEqual(Label),
    /// Binary search of the class id register in sorted ranges
    CheckCidRanges {
        /// Ranges to search
        ranges: Arc<[CidRange]>,
        /// Target when found
        in_range: Label,
        /// Target when not found
        out_of_range: Label,
    },
    /// Bind a label at this position
    Bind(Label),
    /// The instance passed the test
    Return,
    /// Defer to the general subtype test
    JumpToSlowPath,
}

impl StubOp {
    /// Encoded size in bytes
    pub fn size(&self) -> usize {
        match self {
            StubOp::Bind(_) => 0,
            StubOp::Return => 1,
            StubOp::CompareClassId(_) | StubOp::CompareTypeArgumentClassId { .. } => 8,
            StubOp::LoadTypeArgumentClassId { .. } => 8,
            // One compare-and-branch pair per range bound.
            StubOp::CheckCidRanges { ranges, .. } => 4 + 12 * ranges.len(),
            StubOp::JumpToSlowPath => 5,
            _ => 4,
        }
    }
}

impl fmt::Display for StubOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StubOp::BranchIfSmi(l) => write!(f, "branch_if_smi {}", l),
            StubOp::BranchIfNotSmi(l) => write!(f, "branch_if_not_smi {}", l),
            StubOp::LoadClassId => write!(f, "load_cid"),
            StubOp::LoadClassIdMayBeSmi => write!(f, "load_cid_may_be_smi"),
            StubOp::CompareClassId(cid) => write!(f, "cmp cid, {}", cid),
            StubOp::CompareNull => write!(f, "cmp instance, null"),
            StubOp::LoadInstanceTypeArguments { offset } => write!(f, "load_type_args [instance+{}]", offset),
            StubOp::CompareInstanceTypeArgumentsNull => write!(f, "cmp type_args, null"),
            StubOp::LoadTypeArgumentClassId { index } => write!(f, "load_cid type_args[{}]", index),
            StubOp::CompareTypeArgumentsNull(source) => write!(f, "cmp {}, null", source.name()),
            StubOp::CompareTypeArgumentClassId { source, index } => write!(f, "cmp cid, {}[{}]", source.name(), index),
            StubOp::BranchIfEqual(l) => write!(f, "beq {}", l),
            StubOp::BranchIfNotEqual(l) => write!(f, "bne {}", l),
            StubOp::CheckCidRanges {
                ranges,
                in_range,
                out_of_range,
            } => {
                let list: Vec<String> = ranges.iter().map(|r| r.to_string()).collect();
                write!(f, "cid_ranges {} -> {} else {}", list.join(" "), in_range, out_of_range)
            }
            StubOp::Bind(l) => write!(f, "{}:", l),
            StubOp::Return => write!(f, "ret"),
            StubOp::JumpToSlowPath => write!(f, "jmp slow_type_test"),
        }
    }
}

/// Collects stub instructions
#[derive(Debug, Default)]
pub struct StubAssembler {
    ops: Vec<StubOp>,
    next_label: u32,
}

impl StubAssembler {
    /// Empty routine
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh unbound label
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Append an instruction
    pub fn emit(&mut self, op: StubOp) {
        self.ops.push(op);
    }

    /// Bind `label` here
    pub fn bind(&mut self, label: Label) {
        self.ops.push(StubOp::Bind(label));
    }

    /// Instructions so far
    pub fn ops(&self) -> &[StubOp] {
        &self.ops
    }

    /// Encoded size so far
    pub fn size(&self) -> usize {
        self.ops.iter().map(StubOp::size).sum()
    }

    /// Finish into a routine for `ty`
    pub fn finalize(self, name: String, ty: TypeId) -> StubRoutine {
        let size = self.size();
        let labels = self
            .ops
            .iter()
            .enumerate()
            .filter_map(|(pc, op)| match op {
                StubOp::Bind(l) => Some((*l, pc)),
                _ => None,
            })
            .collect();
        StubRoutine {
            name,
            ty,
            ops: self.ops,
            labels,
            size,
        }
    }
}

/// Finished, immutable stub code owned by one canonical type
#[derive(Debug, Clone, PartialEq)]
pub struct StubRoutine {
    name: String,
    ty: TypeId,
    ops: Vec<StubOp>,
    labels: FxHashMap<Label, usize>,
    size: usize,
}

impl StubRoutine {
    /// Stub name reported to code observers
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning type
    pub fn ty(&self) -> TypeId {
        self.ty
    }

    /// Instructions
    pub fn ops(&self) -> &[StubOp] {
        &self.ops
    }

    /// Position of a bound label
    pub fn label_position(&self, label: Label) -> Option<usize> {
        self.labels.get(&label).copied()
    }

    /// Encoded size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Textual listing
    pub fn disassemble(&self) -> String {
        let mut out = format!("Code for stub '{}' (type = {}): {{\n", self.name, self.ty);
        for op in &self.ops {
            match op {
                StubOp::Bind(_) => out.push_str(&format!("{}\n", op)),
                _ => out.push_str(&format!("    {}\n", op)),
            }
        }
        out.push('}');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_resolve_to_bind_positions() {
        let mut asm = StubAssembler::new();
        let done = asm.new_label();
        asm.emit(StubOp::BranchIfNotSmi(done));
        asm.emit(StubOp::Return);
        asm.bind(done);
        asm.emit(StubOp::JumpToSlowPath);
        let routine = asm.finalize("stub".to_string(), TypeId(3));
        assert_eq!(routine.label_position(done), Some(2));
        assert_eq!(routine.size(), 4 + 1 + 5);
    }

    #[test]
    fn test_disassembly_lists_ops() {
        let mut asm = StubAssembler::new();
        let yes = asm.new_label();
        let no = asm.new_label();
        asm.emit(StubOp::LoadClassIdMayBeSmi);
        asm.emit(StubOp::CheckCidRanges {
            ranges: Arc::from(vec![CidRange::new(3, 5)]),
            in_range: yes,
            out_of_range: no,
        });
        let text = asm.finalize("TypeTestingStub_x__1".to_string(), TypeId(1)).disassemble();
        assert!(text.starts_with("Code for stub 'TypeTestingStub_x__1'"));
        assert!(text.contains("cid_ranges [3-5] -> L0 else L1"));
    }
}
