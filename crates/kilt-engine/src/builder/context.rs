//! Live context chain
//!
//! Contexts allocated while building a function are recorded in an arena;
//! each frame names its parent by index. The frames below the function's own
//! contexts stand for the chain captured by a closure and have no scope.

use crate::kernel::ScopeId;

/// One context in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextFrame {
    /// Nesting level (1 is the outermost context)
    pub level: usize,
    /// Scope that allocated the context, `None` for captured contexts
    pub scope: Option<ScopeId>,
    /// Enclosing context
    pub parent: Option<usize>,
    /// Slot count
    pub num_variables: usize,
}

/// Position in the chain, saved and restored around catch entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextCursor(Option<usize>);

/// Arena of context frames with a cursor on the current one
#[derive(Debug, Clone, Default)]
pub struct ContextChain {
    frames: Vec<ContextFrame>,
    current: Option<usize>,
}

impl ContextChain {
    /// Chain whose first `level` contexts were captured by the caller
    pub fn with_base_level(level: usize) -> Self {
        let mut chain = ContextChain::default();
        for _ in 0..level {
            chain.push(None, 0);
        }
        chain
    }

    /// Current context depth (0 when no context is live)
    pub fn depth(&self) -> usize {
        self.current.map_or(0, |i| self.frames[i].level)
    }

    /// Current frame
    pub fn current(&self) -> Option<&ContextFrame> {
        self.current.map(|i| &self.frames[i])
    }

    /// Push a context allocated by `scope`
    pub fn push(&mut self, scope: Option<ScopeId>, num_variables: usize) -> usize {
        let index = self.frames.len();
        self.frames.push(ContextFrame {
            level: self.depth() + 1,
            scope,
            parent: self.current,
            num_variables,
        });
        self.current = Some(index);
        index
    }

    /// Make the parent of the current context current
    pub fn pop(&mut self) -> Option<ContextFrame> {
        let frame = *self.current()?;
        self.current = frame.parent;
        Some(frame)
    }

    /// Walk up until the depth is at most `depth`; returns the parent hops taken
    pub fn unwind_to(&mut self, depth: usize) -> usize {
        let mut hops = 0;
        while self.depth() > depth {
            if self.pop().is_none() {
                break;
            }
            hops += 1;
        }
        hops
    }

    /// Save the cursor
    pub fn save(&self) -> ContextCursor {
        ContextCursor(self.current)
    }

    /// Restore a saved cursor
    pub fn restore(&mut self, cursor: ContextCursor) {
        self.current = cursor.0;
    }

    /// Pretend no context is live
    pub fn detach(&mut self) {
        self.current = None;
    }

    /// Make the captured context at `level` current (0 detaches). Only the
    /// frames created by [`ContextChain::with_base_level`] qualify.
    pub fn reset_to_captured(&mut self, level: usize) {
        self.current = level
            .checked_sub(1)
            .filter(|&i| self.frames.get(i).is_some_and(|f| f.scope.is_none()));
    }

    /// Frames allocated by the function itself
    pub fn allocated(&self) -> usize {
        self.frames.iter().filter(|f| f.scope.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_restores_depth() {
        let mut chain = ContextChain::with_base_level(1);
        assert_eq!(chain.depth(), 1);
        chain.push(Some(ScopeId(2)), 3);
        chain.push(Some(ScopeId(3)), 1);
        assert_eq!(chain.depth(), 3);
        assert_eq!(chain.unwind_to(1), 2);
        assert_eq!(chain.depth(), 1);
        assert_eq!(chain.allocated(), 2);
    }

    #[test]
    fn test_detach_and_restore() {
        let mut chain = ContextChain::default();
        chain.push(Some(ScopeId(0)), 1);
        let saved = chain.save();
        chain.detach();
        assert_eq!(chain.depth(), 0);
        chain.restore(saved);
        assert_eq!(chain.depth(), 1);
    }
}
