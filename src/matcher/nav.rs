//! Parent and sibling breadcrumbs over the flat arena.
//!
//! Built once per tree by a single walk from the root; node ids index
//! directly into the crumb table.

use crate::py::{Arena, Candidate, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Crumb {
    parent: NodeId,
    field: &'static str,
    /// Position within a sequence field, `None` for scalar fields.
    index: Option<usize>,
}

#[derive(Debug)]
pub struct Nav {
    crumbs: Vec<Option<Crumb>>,
}

impl Nav {
    #[must_use]
    pub fn build(arena: &Arena, root: NodeId) -> Nav {
        let mut crumbs = vec![None; arena.len()];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            for (field, value) in arena.node(id).fields() {
                match value {
                    Candidate::Node(child) => {
                        crumbs[child.index()] = Some(Crumb {
                            parent: id,
                            field,
                            index: None,
                        });
                        stack.push(child);
                    }
                    Candidate::List(items) => {
                        for (i, item) in items.into_iter().enumerate() {
                            if let Candidate::Node(child) = item {
                                crumbs[child.index()] = Some(Crumb {
                                    parent: id,
                                    field,
                                    index: Some(i),
                                });
                                stack.push(child);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        Nav { crumbs }
    }

    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.crumbs.get(id.index())?.map(|c| c.parent)
    }

    /// The field of the parent this node sits in, plus its sequence index.
    #[must_use]
    pub fn position(&self, id: NodeId) -> Option<(NodeId, &'static str, Option<usize>)> {
        let c = (*self.crumbs.get(id.index())?)?;
        Some((c.parent, c.field, c.index))
    }

    #[must_use]
    pub fn prev_sibling(&self, arena: &Arena, id: NodeId) -> Option<NodeId> {
        self.sibling(arena, id, -1)
    }

    #[must_use]
    pub fn next_sibling(&self, arena: &Arena, id: NodeId) -> Option<NodeId> {
        self.sibling(arena, id, 1)
    }

    fn sibling(&self, arena: &Arena, id: NodeId, offset: isize) -> Option<NodeId> {
        let (parent, field, index) = self.position(id)?;
        let index = index?;
        let target = index.checked_add_signed(offset)?;
        match arena.node(parent).field(field)? {
            Candidate::List(items) => match items.get(target)? {
                Candidate::Node(sib) => Some(*sib),
                _ => None,
            },
            _ => None,
        }
    }

    /// The outermost ancestor of `id` (inclusive) that is not itself a
    /// suite-carrying construct: the single statement or clause header a
    /// match "belongs to" for grouping purposes.
    #[must_use]
    pub fn enclosing_simple_unit(&self, arena: &Arena, id: NodeId) -> Option<NodeId> {
        let mut last = None;
        let mut cur = id;
        loop {
            if arena.node(cur).has_suite() {
                return last;
            }
            last = Some(cur);
            cur = self.parent(cur)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::py::{parse_module, NodeKind};

    fn find_name(arena: &Arena, root: NodeId, wanted: &str) -> NodeId {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let NodeKind::Name { id: name, .. } = &arena.node(id).kind {
                if name == wanted {
                    return id;
                }
            }
            stack.extend(arena.node(id).child_ids());
        }
        panic!("name {wanted} not found");
    }

    #[test]
    fn test_parent_chain_reaches_root() {
        let out = parse_module("a + b\n", "t.py").unwrap();
        let nav = Nav::build(&out.arena, out.root);
        let a = find_name(&out.arena, out.root, "a");
        let binop = nav.parent(a).unwrap();
        assert_eq!(out.arena.node(binop).kind_name(), "BinOp");
        let stmt = nav.parent(binop).unwrap();
        assert_eq!(nav.parent(stmt), Some(out.root));
        assert_eq!(nav.parent(out.root), None);
    }

    #[test]
    fn test_siblings_within_suite() {
        let out = parse_module("a\nb\nc\n", "t.py").unwrap();
        let nav = Nav::build(&out.arena, out.root);
        let NodeKind::Module { body } = &out.arena.node(out.root).kind else {
            unreachable!();
        };
        assert_eq!(nav.prev_sibling(&out.arena, body[1]), Some(body[0]));
        assert_eq!(nav.next_sibling(&out.arena, body[1]), Some(body[2]));
        assert_eq!(nav.prev_sibling(&out.arena, body[0]), None);
        assert_eq!(nav.next_sibling(&out.arena, body[2]), None);
    }

    #[test]
    fn test_enclosing_simple_unit_stops_below_suites() {
        let out = parse_module("if x:\n    f(y)\n", "t.py").unwrap();
        let nav = Nav::build(&out.arena, out.root);
        let y = find_name(&out.arena, out.root, "y");
        let unit = nav.enclosing_simple_unit(&out.arena, y).unwrap();
        assert_eq!(out.arena.node(unit).kind_name(), "ExprStmt");

        // The test of an `if` belongs to the `if` header, which is the
        // suite-carrying node itself, so the unit is the test expression.
        let x = find_name(&out.arena, out.root, "x");
        let unit = nav.enclosing_simple_unit(&out.arena, x).unwrap();
        assert_eq!(unit, x);
    }

    #[test]
    fn test_module_root_has_no_simple_unit() {
        let out = parse_module("a\n", "t.py").unwrap();
        let nav = Nav::build(&out.arena, out.root);
        assert_eq!(nav.enclosing_simple_unit(&out.arena, out.root), None);
    }
}
