//! Flow graph: instruction arena, block structure and entry points

use rustc_hash::FxHashSet;

use crate::object::FunctionId;

use super::instr::{BlockId, Instr, InstrId, InstrKind};

/// Block id range covered by the prologue
///
/// Produced by the prologue builder, kept for deoptimization and debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrologueInfo {
    /// First prologue block id
    pub min_block_id: u32,
    /// Last prologue block id
    pub max_block_id: u32,
}

impl PrologueInfo {
    /// Prologue info covering no blocks
    pub fn empty() -> Self {
        PrologueInfo {
            min_block_id: u32::MAX,
            max_block_id: 0,
        }
    }

    /// Whether the prologue emitted no blocks
    pub fn is_empty(&self) -> bool {
        self.min_block_id > self.max_block_id
    }
}

/// The flow graph of one function
#[derive(Debug, Clone)]
pub struct FlowGraph {
    function: FunctionId,
    instrs: Vec<Instr>,
    graph_entry: InstrId,
    next_block_id: u32,
    next_deopt_id: u32,
    osr_id: Option<u32>,
    prologue: PrologueInfo,
}

impl FlowGraph {
    /// Create a graph holding only its graph entry (block 0)
    pub fn new(function: FunctionId, osr_id: Option<u32>) -> Self {
        let mut graph = FlowGraph {
            function,
            instrs: Vec::new(),
            graph_entry: InstrId(0),
            next_block_id: 1,
            next_deopt_id: 0,
            osr_id,
            prologue: PrologueInfo::empty(),
        };
        graph.graph_entry = graph.push(
            InstrKind::GraphEntry {
                normal_entry: None,
                unchecked_entry: None,
                catch_entries: Vec::new(),
            },
            Vec::new(),
        );
        graph
    }

    // ===== Arena =====

    /// Add an unlinked instruction; calls and checks get a deopt id
    pub fn push(&mut self, kind: InstrKind, inputs: Vec<InstrId>) -> InstrId {
        let id = InstrId(self.instrs.len() as u32);
        let deopt_id = needs_deopt_id(&kind).then(|| self.alloc_deopt_id());
        self.instrs.push(Instr {
            kind,
            inputs,
            next: None,
            deopt_id,
        });
        id
    }

    /// Instruction by id
    pub fn instr(&self, id: InstrId) -> &Instr {
        &self.instrs[id.0 as usize]
    }

    /// Instruction by id (mutable)
    pub fn instr_mut(&mut self, id: InstrId) -> &mut Instr {
        &mut self.instrs[id.0 as usize]
    }

    /// Payload of an instruction
    pub fn kind(&self, id: InstrId) -> &InstrKind {
        &self.instr(id).kind
    }

    /// Thread `to` after `from`
    pub fn link(&mut self, from: InstrId, to: InstrId) {
        self.instr_mut(from).next = Some(to);
    }

    /// Number of instructions in the arena, reachable or not
    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    /// Whether the arena holds only the graph entry
    pub fn is_empty(&self) -> bool {
        self.instrs.len() <= 1
    }

    // ===== Counters =====

    /// Allocate the next block id
    pub fn alloc_block_id(&mut self) -> BlockId {
        let id = BlockId(self.next_block_id);
        self.next_block_id += 1;
        id
    }

    /// Highest block id allocated so far
    pub fn max_block_id(&self) -> u32 {
        self.next_block_id - 1
    }

    /// Allocate the next deopt id
    pub fn alloc_deopt_id(&mut self) -> u32 {
        let id = self.next_deopt_id;
        self.next_deopt_id += 1;
        id
    }

    /// Number of deopt ids allocated
    pub fn deopt_id_count(&self) -> u32 {
        self.next_deopt_id
    }

    // ===== Entries =====

    /// Function being compiled
    pub fn function(&self) -> FunctionId {
        self.function
    }

    /// OSR entry id, if compiling for on-stack replacement
    pub fn osr_id(&self) -> Option<u32> {
        self.osr_id
    }

    /// The graph entry
    pub fn graph_entry(&self) -> InstrId {
        self.graph_entry
    }

    /// Prologue layout
    pub fn prologue_info(&self) -> PrologueInfo {
        self.prologue
    }

    /// Record the prologue layout
    pub fn set_prologue_info(&mut self, info: PrologueInfo) {
        self.prologue = info;
    }

    /// Normal entry block
    pub fn normal_entry(&self) -> Option<InstrId> {
        match self.kind(self.graph_entry) {
            InstrKind::GraphEntry { normal_entry, .. } => *normal_entry,
            _ => None,
        }
    }

    /// Unchecked entry block
    pub fn unchecked_entry(&self) -> Option<InstrId> {
        match self.kind(self.graph_entry) {
            InstrKind::GraphEntry { unchecked_entry, .. } => *unchecked_entry,
            _ => None,
        }
    }

    /// Catch entry blocks
    pub fn catch_entries(&self) -> &[InstrId] {
        match self.kind(self.graph_entry) {
            InstrKind::GraphEntry { catch_entries, .. } => catch_entries,
            _ => &[],
        }
    }

    /// Set the normal entry block
    pub fn set_normal_entry(&mut self, entry: InstrId) {
        let graph_entry = self.graph_entry;
        if let InstrKind::GraphEntry { normal_entry, .. } = &mut self.instr_mut(graph_entry).kind {
            *normal_entry = Some(entry);
        }
    }

    /// Set the unchecked entry block
    pub fn set_unchecked_entry(&mut self, entry: InstrId) {
        let graph_entry = self.graph_entry;
        if let InstrKind::GraphEntry { unchecked_entry, .. } = &mut self.instr_mut(graph_entry).kind {
            *unchecked_entry = Some(entry);
        }
    }

    /// Register a catch entry block
    pub fn add_catch_entry(&mut self, entry: InstrId) {
        let graph_entry = self.graph_entry;
        if let InstrKind::GraphEntry { catch_entries, .. } = &mut self.instr_mut(graph_entry).kind {
            catch_entries.push(entry);
        }
    }

    // ===== Traversal =====

    /// Instructions of the block starting at `entry`, entry included
    pub fn block_instructions(&self, entry: InstrId) -> Vec<InstrId> {
        let mut out = vec![entry];
        let mut current = self.instr(entry).next;
        while let Some(id) = current {
            out.push(id);
            current = self.instr(id).next;
        }
        out
    }

    /// Last instruction of the block starting at `entry`
    pub fn last_instruction(&self, entry: InstrId) -> InstrId {
        let mut current = entry;
        while let Some(next) = self.instr(current).next {
            current = next;
        }
        current
    }

    /// Successor block entries of the block starting at `entry`
    pub fn successors(&self, entry: InstrId) -> Vec<InstrId> {
        if entry == self.graph_entry {
            return self.kind(entry).successors();
        }
        self.kind(self.last_instruction(entry)).successors()
    }

    /// Reachable block entries in depth-first preorder from the graph entry
    pub fn blocks(&self) -> Vec<InstrId> {
        let mut order = Vec::new();
        let mut seen = FxHashSet::default();
        let mut stack = vec![self.graph_entry];
        while let Some(block) = stack.pop() {
            if !seen.insert(block) {
                continue;
            }
            order.push(block);
            let succs = self.successors(block);
            stack.extend(succs.into_iter().rev());
        }
        order
    }

    /// Every reachable instruction, block by block
    pub fn reachable_instructions(&self) -> Vec<InstrId> {
        self.blocks()
            .into_iter()
            .flat_map(|b| self.block_instructions(b))
            .collect()
    }

    /// Count reachable instructions matching `pred`
    pub fn count(&self, pred: impl Fn(&InstrKind) -> bool) -> usize {
        self.reachable_instructions()
            .into_iter()
            .filter(|&id| pred(self.kind(id)))
            .count()
    }

    /// Reachable instructions matching `pred`, in block order
    pub fn find_all(&self, pred: impl Fn(&InstrKind) -> bool) -> Vec<InstrId> {
        self.reachable_instructions()
            .into_iter()
            .filter(|&id| pred(self.kind(id)))
            .collect()
    }

    /// Whether `id` is reachable from the graph entry
    pub fn is_reachable(&self, id: InstrId) -> bool {
        self.reachable_instructions().contains(&id)
    }
}

fn needs_deopt_id(kind: &InstrKind) -> bool {
    kind.is_call()
        || matches!(
            kind,
            InstrKind::AssertAssignable { .. }
                | InstrKind::AssertSubtype { .. }
                | InstrKind::AssertBool
                | InstrKind::InstanceOf(_)
                | InstrKind::CheckNull { .. }
                | InstrKind::CheckStackOverflow { .. }
                | InstrKind::InstantiateType(_)
                | InstrKind::InstantiateTypeArguments(_)
                | InstrKind::AllocateObject { .. }
                | InstrKind::AllocateContext { .. }
                | InstrKind::CloneContext { .. }
                | InstrKind::CreateArray
                | InstrKind::InitStaticField(_)
                | InstrKind::Unbox { .. }
                | InstrKind::Goto { .. }
                | InstrKind::Throw
                | InstrKind::ReThrow { .. }
                | InstrKind::Return
        )
}
