//! `Node`: the tree cell that glues an `Op` to its children and caches the
//! statically-derived attributes (`ready_offset`, `kind`) that never change
//! once the tree is built.

use std::collections::BTreeSet;

use crate::column::Batch;
use crate::ops::{Kind, Op};

#[derive(Debug)]
pub struct Node {
    pub op: Op,
    pub children: Vec<Node>,
    pub ready_offset: usize,
    pub kind: Kind,
}

impl Clone for Node {
    /// Copies the tree shape but never the streaming state sitting inside an
    /// operator: every clone starts as fresh as a node built from scratch, so
    /// the same `Factor` can be handed to several datasets without one's
    /// rolling windows leaking into another's.
    fn clone(&self) -> Self {
        let mut op = self.op.clone();
        op.reset();
        Node {
            op,
            children: self.children.iter().map(Node::clone).collect(),
            ready_offset: self.ready_offset,
            kind: self.kind,
        }
    }
}

impl Node {
    pub fn leaf(op: Op, kind: Kind) -> Self {
        Node { op, children: vec![], ready_offset: 0, kind }
    }

    /// Builds a non-leaf node, computing `ready_offset` bottom-up from the
    /// children (already built) per spec §3.
    pub fn branch(op: Op, children: Vec<Node>, kind: Kind) -> Self {
        let children_ready: Vec<usize> = children.iter().map(|c| c.ready_offset).collect();
        let ready_offset = op.ready_offset(&children_ready);
        Node { op, children, ready_offset, kind }
    }

    /// Steps every node in the subtree exactly once for the batch-local row
    /// `local`, returning this node's own output.
    pub fn step(&mut self, batch: &Batch, local: usize) -> f64 {
        let mut child_values = Vec::with_capacity(self.children.len());
        for child in &mut self.children {
            child_values.push(child.step(batch, local));
        }
        self.op.step(&child_values, batch, local)
    }

    pub fn reset(&mut self) {
        self.op.reset();
        for child in &mut self.children {
            child.reset();
        }
    }

    pub fn columns_needed(&self, out: &mut BTreeSet<String>) {
        if let Op::Column(name) = &self.op {
            out.insert(name.clone());
        }
        for child in &self.children {
            child.columns_needed(out);
        }
    }

    /// Canonical s-expression form, the basis of `Factor::to_string`.
    pub fn to_string_canonical(&self) -> String {
        match &self.op {
            Op::Literal(k) => format!("{k}"),
            Op::Column(name) => format!(":{name}"),
            other => {
                let mut args = crate::ops::literal_args(other);
                args.extend(self.children.iter().map(|c| c.to_string_canonical()));
                if args.is_empty() {
                    format!("({other})")
                } else {
                    format!("({other} {})", args.join(" "))
                }
            }
        }
    }
}
