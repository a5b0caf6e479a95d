//! Fragment algebra
//!
//! A fragment is a straight-line piece of the graph under construction,
//! identified by its first instruction and the instruction new code attaches
//! to. A fragment that ends in a transfer of control has no cursor and is
//! closed: anything appended to it is dead and dropped.

use crate::il::{FlowGraph, InstrId};

/// `(entry, cursor)` pair describing a piece of code
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fragment {
    /// First instruction, `None` for the empty fragment
    pub entry: Option<InstrId>,
    /// Instruction code is appended after, `None` once closed
    pub current: Option<InstrId>,
}

impl Fragment {
    /// The empty fragment
    pub fn empty() -> Self {
        Fragment::default()
    }

    /// Fragment holding one instruction
    pub fn single(instr: InstrId) -> Self {
        Fragment {
            entry: Some(instr),
            current: Some(instr),
        }
    }

    /// Fragment starting at `entry` and ending at `current`
    pub fn span(entry: InstrId, current: InstrId) -> Self {
        Fragment {
            entry: Some(entry),
            current: Some(current),
        }
    }

    /// Whether the fragment holds no instructions
    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
    }

    /// Whether the fragment ends in a transfer of control
    pub fn is_closed(&self) -> bool {
        self.entry.is_some() && self.current.is_none()
    }

    /// Whether code can still be appended
    pub fn is_open(&self) -> bool {
        !self.is_closed()
    }

    /// The same code, closed
    pub fn closed(self) -> Self {
        Fragment {
            entry: self.entry,
            current: None,
        }
    }

    /// Continue emitting at the block entry `block`, keeping the original
    /// entry (used after a branch or a join)
    pub fn continue_at(self, block: InstrId) -> Fragment {
        Fragment {
            entry: self.entry.or(Some(block)),
            current: Some(block),
        }
    }

    /// Concatenate `other` after `self`.
    ///
    /// A closed `self` absorbs `other`: its instructions are never linked in.
    pub fn append(self, other: Fragment, graph: &mut FlowGraph) -> Fragment {
        if self.is_closed() {
            return self;
        }
        let Some(entry) = self.entry else {
            return other;
        };
        let Some(other_entry) = other.entry else {
            return self;
        };
        if let Some(current) = self.current {
            graph.link(current, other_entry);
        }
        Fragment {
            entry: Some(entry),
            current: other.current,
        }
    }

    /// Instructions reachable from the entry by following `next` links
    pub fn instructions(&self, graph: &FlowGraph) -> Vec<InstrId> {
        let mut out = Vec::new();
        let mut cursor = self.entry;
        while let Some(id) = cursor {
            out.push(id);
            if Some(id) == self.current {
                break;
            }
            cursor = graph.instr(id).next;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::InstrKind;
    use crate::object::{ConstValue, FunctionId};

    fn constant(graph: &mut FlowGraph, i: i64) -> Fragment {
        Fragment::single(graph.push(InstrKind::Constant(ConstValue::Int(i)), Vec::new()))
    }

    #[test]
    fn test_empty_is_identity() {
        let mut graph = FlowGraph::new(FunctionId(0), None);
        let a = constant(&mut graph, 1);
        assert_eq!(Fragment::empty().append(a, &mut graph), a);
        assert_eq!(a.append(Fragment::empty(), &mut graph), a);
    }

    #[test]
    fn test_append_links_cursor() {
        let mut graph = FlowGraph::new(FunctionId(0), None);
        let a = constant(&mut graph, 1);
        let b = constant(&mut graph, 2);
        let ab = a.append(b, &mut graph);
        assert_eq!(ab.entry, a.entry);
        assert_eq!(ab.current, b.current);
        assert_eq!(ab.instructions(&graph), vec![a.entry.unwrap(), b.entry.unwrap()]);
    }

    #[test]
    fn test_closed_absorbs() {
        let mut graph = FlowGraph::new(FunctionId(0), None);
        let value = constant(&mut graph, 1);
        let ret = Fragment::single(graph.push(InstrKind::Return, vec![value.entry.unwrap()])).closed();
        let head = value.append(ret, &mut graph);
        assert!(head.is_closed());
        let dead = constant(&mut graph, 2);
        let after = head.append(dead, &mut graph);
        assert_eq!(after, head);
        assert!(graph.instr(ret.entry.unwrap()).next.is_none());
    }
}
