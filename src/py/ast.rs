//! Flat-arena syntax tree.
//!
//! The parser allocates one [`NodeId`] per tree position, so node identity is
//! positional by construction: two textually identical fragments never share
//! a node, and navigation can key on the id alone. Nodes expose their fields
//! uniformly through [`Node::fields`], which is what the matcher layer
//! traverses.

use std::fmt;

/// Half-open byte range into the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// True if the two spans share at least one byte.
    #[must_use]
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// True if `other` lies entirely within this span.
    #[must_use]
    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Index of a node in its [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Default)]
pub struct Arena {
    nodes: Vec<Node>,
}

impl Arena {
    #[must_use]
    pub fn new() -> Self {
        Arena::default()
    }

    pub fn alloc(&mut self, kind: NodeKind, span: Span) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { kind, span });
        id
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Whether a name-like expression reads or writes its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameCtx {
    Load,
    Store,
}

impl NameCtx {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            NameCtx::Load => "load",
            NameCtx::Store => "store",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOpKind {
    And,
    Or,
}

impl BoolOpKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BoolOpKind::And => "and",
            BoolOpKind::Or => "or",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinOpKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BinOpKind::Add => "+",
            BinOpKind::Sub => "-",
            BinOpKind::Mul => "*",
            BinOpKind::Div => "/",
            BinOpKind::FloorDiv => "//",
            BinOpKind::Mod => "%",
            BinOpKind::Pow => "**",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOpKind {
    Not,
    UAdd,
    USub,
}

impl UnaryOpKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            UnaryOpKind::Not => "not",
            UnaryOpKind::UAdd => "+",
            UnaryOpKind::USub => "-",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOpKind {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl CmpOpKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CmpOpKind::Eq => "==",
            CmpOpKind::NotEq => "!=",
            CmpOpKind::Lt => "<",
            CmpOpKind::LtE => "<=",
            CmpOpKind::Gt => ">",
            CmpOpKind::GtE => ">=",
            CmpOpKind::Is => "is",
            CmpOpKind::IsNot => "is not",
            CmpOpKind::In => "in",
            CmpOpKind::NotIn => "not in",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Module { body: Vec<NodeId> },
    ExprStmt { value: NodeId },
    Assign { target: NodeId, value: NodeId },
    AugAssign { target: NodeId, op: BinOpKind, value: NodeId },
    Return { value: Option<NodeId> },
    Pass,
    Break,
    Continue,
    If { test: NodeId, body: Vec<NodeId>, orelse: Vec<NodeId> },
    While { test: NodeId, body: Vec<NodeId>, orelse: Vec<NodeId> },
    For { target: NodeId, iter: NodeId, body: Vec<NodeId>, orelse: Vec<NodeId> },
    FunctionDef { name: String, params: Vec<NodeId>, body: Vec<NodeId> },
    Param { name: String, default: Option<NodeId> },
    Name { id: String, ctx: NameCtx },
    Num { value: Number },
    Str { value: String },
    Bool { value: bool },
    NoneLit,
    BoolOp { op: BoolOpKind, values: Vec<NodeId> },
    BinOp { left: NodeId, op: BinOpKind, right: NodeId },
    UnaryOp { op: UnaryOpKind, operand: NodeId },
    Compare { left: NodeId, ops: Vec<CmpOpKind>, comparators: Vec<NodeId> },
    IfExp { test: NodeId, body: NodeId, orelse: NodeId },
    Call { func: NodeId, args: Vec<NodeId>, keywords: Vec<NodeId> },
    Keyword { arg: String, value: NodeId },
    Attribute { value: NodeId, attr: String, ctx: NameCtx },
    Subscript { value: NodeId, index: NodeId, ctx: NameCtx },
    List { elts: Vec<NodeId>, ctx: NameCtx },
    Tuple { elts: Vec<NodeId>, ctx: NameCtx },
}

/// Discriminant-only view of [`NodeKind`], used for matcher dispatch filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KindTag {
    Module,
    ExprStmt,
    Assign,
    AugAssign,
    Return,
    Pass,
    Break,
    Continue,
    If,
    While,
    For,
    FunctionDef,
    Param,
    Name,
    Num,
    Str,
    Bool,
    NoneLit,
    BoolOp,
    BinOp,
    UnaryOp,
    Compare,
    IfExp,
    Call,
    Keyword,
    Attribute,
    Subscript,
    List,
    Tuple,
}

impl KindTag {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            KindTag::Module => "Module",
            KindTag::ExprStmt => "ExprStmt",
            KindTag::Assign => "Assign",
            KindTag::AugAssign => "AugAssign",
            KindTag::Return => "Return",
            KindTag::Pass => "Pass",
            KindTag::Break => "Break",
            KindTag::Continue => "Continue",
            KindTag::If => "If",
            KindTag::While => "While",
            KindTag::For => "For",
            KindTag::FunctionDef => "FunctionDef",
            KindTag::Param => "Param",
            KindTag::Name => "Name",
            KindTag::Num => "Num",
            KindTag::Str => "Str",
            KindTag::Bool => "Bool",
            KindTag::NoneLit => "NoneLit",
            KindTag::BoolOp => "BoolOp",
            KindTag::BinOp => "BinOp",
            KindTag::UnaryOp => "UnaryOp",
            KindTag::Compare => "Compare",
            KindTag::IfExp => "IfExp",
            KindTag::Call => "Call",
            KindTag::Keyword => "Keyword",
            KindTag::Attribute => "Attribute",
            KindTag::Subscript => "Subscript",
            KindTag::List => "List",
            KindTag::Tuple => "Tuple",
        }
    }
}

/// A value the matcher layer can be pointed at: a tree node, a field of one,
/// or an element of a sequence field.
#[derive(Debug, Clone)]
pub enum Candidate {
    Node(NodeId),
    List(Vec<Candidate>),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Candidate::Node(a), Candidate::Node(b)) => a == b,
            (Candidate::List(a), Candidate::List(b)) => a == b,
            (Candidate::Str(a), Candidate::Str(b)) => a == b,
            (Candidate::Int(a), Candidate::Int(b)) => a == b,
            (Candidate::Float(a), Candidate::Float(b)) => a == b,
            // Numeric comparison crosses int/float, matching literal
            // semantics: `1` equals `1.0`.
            (Candidate::Int(a), Candidate::Float(b)) | (Candidate::Float(b), Candidate::Int(a)) => {
                *a as f64 == *b
            }
            (Candidate::Bool(a), Candidate::Bool(b)) => a == b,
            (Candidate::Null, Candidate::Null) => true,
            _ => false,
        }
    }
}

impl Candidate {
    fn from_opt(id: Option<NodeId>) -> Candidate {
        match id {
            Some(id) => Candidate::Node(id),
            None => Candidate::Null,
        }
    }

    fn from_ids(ids: &[NodeId]) -> Candidate {
        Candidate::List(ids.iter().map(|id| Candidate::Node(*id)).collect())
    }

    fn from_num(n: Number) -> Candidate {
        match n {
            Number::Int(i) => Candidate::Int(i),
            Number::Float(f) => Candidate::Float(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
}

impl Node {
    #[must_use]
    pub fn tag(&self) -> KindTag {
        match &self.kind {
            NodeKind::Module { .. } => KindTag::Module,
            NodeKind::ExprStmt { .. } => KindTag::ExprStmt,
            NodeKind::Assign { .. } => KindTag::Assign,
            NodeKind::AugAssign { .. } => KindTag::AugAssign,
            NodeKind::Return { .. } => KindTag::Return,
            NodeKind::Pass => KindTag::Pass,
            NodeKind::Break => KindTag::Break,
            NodeKind::Continue => KindTag::Continue,
            NodeKind::If { .. } => KindTag::If,
            NodeKind::While { .. } => KindTag::While,
            NodeKind::For { .. } => KindTag::For,
            NodeKind::FunctionDef { .. } => KindTag::FunctionDef,
            NodeKind::Param { .. } => KindTag::Param,
            NodeKind::Name { .. } => KindTag::Name,
            NodeKind::Num { .. } => KindTag::Num,
            NodeKind::Str { .. } => KindTag::Str,
            NodeKind::Bool { .. } => KindTag::Bool,
            NodeKind::NoneLit => KindTag::NoneLit,
            NodeKind::BoolOp { .. } => KindTag::BoolOp,
            NodeKind::BinOp { .. } => KindTag::BinOp,
            NodeKind::UnaryOp { .. } => KindTag::UnaryOp,
            NodeKind::Compare { .. } => KindTag::Compare,
            NodeKind::IfExp { .. } => KindTag::IfExp,
            NodeKind::Call { .. } => KindTag::Call,
            NodeKind::Keyword { .. } => KindTag::Keyword,
            NodeKind::Attribute { .. } => KindTag::Attribute,
            NodeKind::Subscript { .. } => KindTag::Subscript,
            NodeKind::List { .. } => KindTag::List,
            NodeKind::Tuple { .. } => KindTag::Tuple,
        }
    }

    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        self.tag().name()
    }

    /// The node's fields in declaration order, as matcher candidates.
    #[must_use]
    pub fn fields(&self) -> Vec<(&'static str, Candidate)> {
        match &self.kind {
            NodeKind::Module { body } => vec![("body", Candidate::from_ids(body))],
            NodeKind::ExprStmt { value } => vec![("value", Candidate::Node(*value))],
            NodeKind::Assign { target, value } => vec![
                ("target", Candidate::Node(*target)),
                ("value", Candidate::Node(*value)),
            ],
            NodeKind::AugAssign { target, op, value } => vec![
                ("target", Candidate::Node(*target)),
                ("op", Candidate::Str(op.as_str().to_string())),
                ("value", Candidate::Node(*value)),
            ],
            NodeKind::Return { value } => vec![("value", Candidate::from_opt(*value))],
            NodeKind::Pass | NodeKind::Break | NodeKind::Continue | NodeKind::NoneLit => vec![],
            NodeKind::If { test, body, orelse } | NodeKind::While { test, body, orelse } => vec![
                ("test", Candidate::Node(*test)),
                ("body", Candidate::from_ids(body)),
                ("orelse", Candidate::from_ids(orelse)),
            ],
            NodeKind::For {
                target,
                iter,
                body,
                orelse,
            } => vec![
                ("target", Candidate::Node(*target)),
                ("iter", Candidate::Node(*iter)),
                ("body", Candidate::from_ids(body)),
                ("orelse", Candidate::from_ids(orelse)),
            ],
            NodeKind::FunctionDef { name, params, body } => vec![
                ("name", Candidate::Str(name.clone())),
                ("params", Candidate::from_ids(params)),
                ("body", Candidate::from_ids(body)),
            ],
            NodeKind::Param { name, default } => vec![
                ("name", Candidate::Str(name.clone())),
                ("default", Candidate::from_opt(*default)),
            ],
            NodeKind::Name { id, ctx } => vec![
                ("id", Candidate::Str(id.clone())),
                ("ctx", Candidate::Str(ctx.as_str().to_string())),
            ],
            NodeKind::Num { value } => vec![("value", Candidate::from_num(*value))],
            NodeKind::Str { value } => vec![("value", Candidate::Str(value.clone()))],
            NodeKind::Bool { value } => vec![("value", Candidate::Bool(*value))],
            NodeKind::BoolOp { op, values } => vec![
                ("op", Candidate::Str(op.as_str().to_string())),
                ("values", Candidate::from_ids(values)),
            ],
            NodeKind::BinOp { left, op, right } => vec![
                ("left", Candidate::Node(*left)),
                ("op", Candidate::Str(op.as_str().to_string())),
                ("right", Candidate::Node(*right)),
            ],
            NodeKind::UnaryOp { op, operand } => vec![
                ("op", Candidate::Str(op.as_str().to_string())),
                ("operand", Candidate::Node(*operand)),
            ],
            NodeKind::Compare {
                left,
                ops,
                comparators,
            } => vec![
                ("left", Candidate::Node(*left)),
                (
                    "ops",
                    Candidate::List(
                        ops.iter()
                            .map(|o| Candidate::Str(o.as_str().to_string()))
                            .collect(),
                    ),
                ),
                ("comparators", Candidate::from_ids(comparators)),
            ],
            NodeKind::IfExp { test, body, orelse } => vec![
                ("test", Candidate::Node(*test)),
                ("body", Candidate::Node(*body)),
                ("orelse", Candidate::Node(*orelse)),
            ],
            NodeKind::Call {
                func,
                args,
                keywords,
            } => vec![
                ("func", Candidate::Node(*func)),
                ("args", Candidate::from_ids(args)),
                ("keywords", Candidate::from_ids(keywords)),
            ],
            NodeKind::Keyword { arg, value } => vec![
                ("arg", Candidate::Str(arg.clone())),
                ("value", Candidate::Node(*value)),
            ],
            NodeKind::Attribute { value, attr, ctx } => vec![
                ("value", Candidate::Node(*value)),
                ("attr", Candidate::Str(attr.clone())),
                ("ctx", Candidate::Str(ctx.as_str().to_string())),
            ],
            NodeKind::Subscript { value, index, ctx } => vec![
                ("value", Candidate::Node(*value)),
                ("index", Candidate::Node(*index)),
                ("ctx", Candidate::Str(ctx.as_str().to_string())),
            ],
            NodeKind::List { elts, ctx } | NodeKind::Tuple { elts, ctx } => vec![
                ("elts", Candidate::from_ids(elts)),
                ("ctx", Candidate::Str(ctx.as_str().to_string())),
            ],
        }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<Candidate> {
        self.fields()
            .into_iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    /// Direct child nodes, in field order.
    #[must_use]
    pub fn child_ids(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        for (_, value) in self.fields() {
            match value {
                Candidate::Node(id) => out.push(id),
                Candidate::List(items) => {
                    for item in items {
                        if let Candidate::Node(id) = item {
                            out.push(id);
                        }
                    }
                }
                _ => {}
            }
        }
        out
    }

    /// True for nodes that carry a statement suite (`body`).
    #[must_use]
    pub fn has_suite(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Module { .. }
                | NodeKind::If { .. }
                | NodeKind::While { .. }
                | NodeKind::For { .. }
                | NodeKind::FunctionDef { .. }
        )
    }

    #[must_use]
    pub fn is_expr(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Name { .. }
                | NodeKind::Num { .. }
                | NodeKind::Str { .. }
                | NodeKind::Bool { .. }
                | NodeKind::NoneLit
                | NodeKind::BoolOp { .. }
                | NodeKind::BinOp { .. }
                | NodeKind::UnaryOp { .. }
                | NodeKind::Compare { .. }
                | NodeKind::IfExp { .. }
                | NodeKind::Call { .. }
                | NodeKind::Attribute { .. }
                | NodeKind::Subscript { .. }
                | NodeKind::List { .. }
                | NodeKind::Tuple { .. }
        )
    }

    #[must_use]
    pub fn is_stmt(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::ExprStmt { .. }
                | NodeKind::Assign { .. }
                | NodeKind::AugAssign { .. }
                | NodeKind::Return { .. }
                | NodeKind::Pass
                | NodeKind::Break
                | NodeKind::Continue
                | NodeKind::If { .. }
                | NodeKind::While { .. }
                | NodeKind::For { .. }
                | NodeKind::FunctionDef { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_ids_are_positional() {
        let mut arena = Arena::new();
        let a = arena.alloc(
            NodeKind::Name {
                id: "x".into(),
                ctx: NameCtx::Load,
            },
            Span::new(0, 1),
        );
        let b = arena.alloc(
            NodeKind::Name {
                id: "x".into(),
                ctx: NameCtx::Load,
            },
            Span::new(4, 5),
        );
        assert_ne!(a, b);
        assert_eq!(arena.node(a).kind, arena.node(b).kind);
    }

    #[test]
    fn fields_reflect_kind() {
        let mut arena = Arena::new();
        let left = arena.alloc(
            NodeKind::Name {
                id: "a".into(),
                ctx: NameCtx::Load,
            },
            Span::new(0, 1),
        );
        let right = arena.alloc(NodeKind::Num { value: Number::Int(2) }, Span::new(4, 5));
        let op = arena.alloc(
            NodeKind::BinOp {
                left,
                op: BinOpKind::Add,
                right,
            },
            Span::new(0, 5),
        );
        let node = arena.node(op);
        assert_eq!(node.kind_name(), "BinOp");
        assert_eq!(node.field("op"), Some(Candidate::Str("+".into())));
        assert_eq!(node.field("left"), Some(Candidate::Node(left)));
        assert_eq!(node.field("missing"), None);
        assert_eq!(node.child_ids(), vec![left, right]);
    }

    #[test]
    fn candidate_numeric_equality_crosses_types() {
        assert_eq!(Candidate::Int(1), Candidate::Float(1.0));
        assert_eq!(Candidate::Float(2.0), Candidate::Int(2));
        assert_ne!(Candidate::Int(1), Candidate::Float(1.5));
        assert_ne!(Candidate::Bool(true), Candidate::Int(1));
    }

    #[test]
    fn suite_and_category_predicates() {
        let mut arena = Arena::new();
        let name = arena.alloc(
            NodeKind::Name {
                id: "x".into(),
                ctx: NameCtx::Load,
            },
            Span::new(0, 1),
        );
        let stmt = arena.alloc(NodeKind::ExprStmt { value: name }, Span::new(0, 1));
        let module = arena.alloc(NodeKind::Module { body: vec![stmt] }, Span::new(0, 2));
        assert!(arena.node(module).has_suite());
        assert!(!arena.node(stmt).has_suite());
        assert!(arena.node(name).is_expr());
        assert!(arena.node(stmt).is_stmt());
        assert!(!arena.node(module).is_stmt());
    }
}
