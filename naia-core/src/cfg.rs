#![forbid(unsafe_code)]

//! Arena-indexed control flow graph. Blocks hold a linear run of actions;
//! branch and loop structure lives entirely in the edges, so the
//! ownership dataflow never re-inspects the tree.

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

#[derive(Debug)]
pub struct CfgBlock<A> {
    pub actions: Vec<A>,
    pub succs: Vec<BlockId>,
    pub preds: Vec<BlockId>,
}

impl<A> CfgBlock<A> {
    fn new() -> Self {
        Self {
            actions: Vec::new(),
            succs: Vec::new(),
            preds: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct Cfg<A> {
    blocks: Vec<CfgBlock<A>>,
    pub entry: BlockId,
}

impl<A> Cfg<A> {
    pub fn new() -> Self {
        Self {
            blocks: vec![CfgBlock::new()],
            entry: BlockId(0),
        }
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(CfgBlock::new());
        id
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from.0 as usize].succs.push(to);
        self.blocks[to.0 as usize].preds.push(from);
    }

    pub fn push_action(&mut self, block: BlockId, action: A) {
        self.blocks[block.0 as usize].actions.push(action);
    }

    pub fn block(&self, id: BlockId) -> &CfgBlock<A> {
        &self.blocks[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Reverse postorder from the entry. Seeding the worklist this way
    /// makes the fixpoint converge in one sweep for loop-free bodies.
    pub fn rpo(&self) -> Vec<BlockId> {
        let mut state = vec![0u8; self.blocks.len()];
        let mut order = Vec::with_capacity(self.blocks.len());
        let mut stack = vec![(self.entry, 0usize)];
        state[self.entry.0 as usize] = 1;
        loop {
            let Some(&(id, idx)) = stack.last() else {
                break;
            };
            let succs = &self.blocks[id.0 as usize].succs;
            if idx < succs.len() {
                if let Some(frame) = stack.last_mut() {
                    frame.1 += 1;
                }
                let next = succs[idx];
                if state[next.0 as usize] == 0 {
                    state[next.0 as usize] = 1;
                    stack.push((next, 0));
                }
            } else {
                order.push(id);
                stack.pop();
            }
        }
        order.reverse();
        order
    }
}

impl<A> Default for Cfg<A> {
    fn default() -> Self {
        Self::new()
    }
}
