// Tree annotator: flattens the parsed AST into a queryable arena.
//
// One traversal assigns every node an id, a parent link, an expression
// context (load/store/delete), and a span. Spans normally come straight
// from the parser; nodes without one (synthesized constructs) get the
// union of their children's spans. The arena is immutable once built;
// the resolution pipeline only ever reads it.
//
// The parent relation is a lookup relation, not ownership: children are
// owned by the arena vector, parents are plain ids.

use crate::ast::{
    BinOpKind, BoolOpKind, CmpKind, Expr, ExprKind, FsPart, Lit, Module, Span, Stmt, StmtKind,
    UnaryOpKind,
};

/// Index of a node in the arena. Identity of a resolution answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Expression context: how the node's value is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ctx {
    Load,
    Store,
    Del,
}

/// One interleaved segment of a format string, in source order.
/// `Field` segments correspond one-to-one with `FormatField` children.
#[derive(Debug, Clone, PartialEq)]
pub enum FsSeg {
    Text(String),
    Field,
}

/// Node kind with enough payload for lowering, filtering and verification.
///
/// Kinds with heterogeneous children carry layout counts so consumers can
/// split the child list without a second structure.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Module,
    /// Children: `param_count` params, then body statements.
    FnDef { name: String, param_count: u32 },
    /// Children: body statements.
    ClassDef { name: String },
    /// Children: `param_count` params, then the body expression.
    Lambda { param_count: u32 },
    Param { name: String },
    /// Children: `target_count` targets, then the value.
    Assign { target_count: u32 },
    /// Children: target name, value.
    AugAssign { op: BinOpKind },
    /// Children: targets (all in `Del` context).
    Delete,
    /// Children: the value, if `has_value`.
    Return { has_value: bool },
    /// Children: test, `then_count` then-statements, else-statements.
    If { then_count: u32 },
    /// Children: test, body statements.
    While,
    /// Children: the expression.
    ExprStmt,
    BinOp { op: BinOpKind },
    UnaryOp { op: UnaryOpKind },
    BoolOp { op: BoolOpKind },
    Compare { op: CmpKind },
    /// Children: callee, then arguments.
    Call,
    /// Children: object.
    Attribute { name: String, ctx: Ctx },
    /// Children: object, index.
    Subscript { ctx: Ctx },
    Name { id: String, ctx: Ctx },
    Literal(Lit),
    Tuple { ctx: Ctx },
    List,
    /// Children: key, value, key, value, ...
    Dict,
    /// Children: one `FormatField` per `Field` segment.
    FString { segs: Vec<FsSeg> },
    /// Children: the interpolated name expression.
    FormatField,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// The annotated syntax tree. Node ids are post-order: every child id is
/// smaller than its parent's.
#[derive(Debug)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Tree {
    /// Flatten and annotate a parsed module. Infallible for any parser
    /// output; runs exactly once per source unit (memoized there).
    pub fn build(module: &Module) -> Tree {
        let mut b = Builder { nodes: Vec::new() };
        let body: Vec<NodeId> = module.body.iter().map(|s| b.stmt(s)).collect();
        let root = b.add(NodeKind::Module, Some(module.span), body);
        let mut tree = Tree {
            nodes: b.nodes,
            root,
        };
        tree.annotate();
        tree
    }

    /// Set parent links and derive missing spans, in one pass each way.
    fn annotate(&mut self) {
        // Parent links: ids are post-order, so a single forward walk sees
        // every child before the node that owns it.
        for id in 0..self.nodes.len() {
            let children = self.nodes[id].children.clone();
            for child in children {
                self.nodes[child.0 as usize].parent = Some(NodeId(id as u32));
            }
        }
        // Span propagation: post-order ids mean children are final before
        // their parent is visited.
        for id in 0..self.nodes.len() {
            if self.nodes[id].span.is_empty() && !self.nodes[id].children.is_empty() {
                let mut span = self.nodes[self.nodes[id].children[0].0 as usize].span;
                for child in &self.nodes[id].children {
                    span = span.union(self.nodes[child.0 as usize].span);
                }
                self.nodes[id].span = span;
            }
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0 as usize].parent
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes with their ids, in post-order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(i as u32), n))
    }

    /// Byte range of a node in the owning source text.
    pub fn text_range(&self, id: NodeId) -> (usize, usize) {
        let span = self.node(id).span;
        (span.start as usize, span.end as usize)
    }

    /// The literal source substring of a node.
    pub fn node_text<'a>(&self, id: NodeId, source: &'a str) -> &'a str {
        let (start, end) = self.text_range(id);
        &source[start..end]
    }

    /// True for statement-level nodes (incl. the module root).
    pub fn is_statement(&self, id: NodeId) -> bool {
        matches!(
            self.node(id).kind,
            NodeKind::Module
                | NodeKind::FnDef { .. }
                | NodeKind::ClassDef { .. }
                | NodeKind::Assign { .. }
                | NodeKind::AugAssign { .. }
                | NodeKind::Delete
                | NodeKind::Return { .. }
                | NodeKind::If { .. }
                | NodeKind::While
                | NodeKind::ExprStmt
        )
    }

    /// Innermost statement containing `id` (itself, if a statement).
    pub fn enclosing_statement(&self, id: NodeId) -> NodeId {
        let mut cur = id;
        loop {
            if self.is_statement(cur) {
                return cur;
            }
            match self.parent(cur) {
                Some(p) => cur = p,
                None => return cur,
            }
        }
    }
}

struct Builder {
    nodes: Vec<Node>,
}

impl Builder {
    fn add(&mut self, kind: NodeKind, span: Option<Span>, children: Vec<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            // Empty spans mark "derive from children" for the annotator.
            span: span.unwrap_or(Span::new(0, 0)),
            parent: None,
            children,
        });
        id
    }

    fn stmt(&mut self, stmt: &Stmt) -> NodeId {
        match &stmt.kind {
            StmtKind::FnDef { name, params, body } => {
                let mut children: Vec<NodeId> = params
                    .iter()
                    .map(|p| {
                        self.add(
                            NodeKind::Param {
                                name: p.name.clone(),
                            },
                            Some(p.span),
                            Vec::new(),
                        )
                    })
                    .collect();
                children.extend(body.iter().map(|s| self.stmt(s)));
                self.add(
                    NodeKind::FnDef {
                        name: name.name.clone(),
                        param_count: params.len() as u32,
                    },
                    Some(stmt.span),
                    children,
                )
            }
            StmtKind::ClassDef { name, body } => {
                let children = body.iter().map(|s| self.stmt(s)).collect();
                self.add(
                    NodeKind::ClassDef {
                        name: name.name.clone(),
                    },
                    Some(stmt.span),
                    children,
                )
            }
            StmtKind::Assign { targets, value } => {
                let mut children: Vec<NodeId> =
                    targets.iter().map(|t| self.expr(t, Ctx::Store)).collect();
                children.push(self.expr(value, Ctx::Load));
                self.add(
                    NodeKind::Assign {
                        target_count: targets.len() as u32,
                    },
                    Some(stmt.span),
                    children,
                )
            }
            StmtKind::AugAssign { target, op, value } => {
                let t = self.add(
                    NodeKind::Name {
                        id: target.name.clone(),
                        ctx: Ctx::Store,
                    },
                    Some(target.span),
                    Vec::new(),
                );
                let v = self.expr(value, Ctx::Load);
                self.add(NodeKind::AugAssign { op: *op }, Some(stmt.span), vec![t, v])
            }
            StmtKind::Delete { targets } => {
                let children = targets.iter().map(|t| self.expr(t, Ctx::Del)).collect();
                self.add(NodeKind::Delete, Some(stmt.span), children)
            }
            StmtKind::Return { value } => {
                let children = match value {
                    Some(v) => vec![self.expr(v, Ctx::Load)],
                    None => Vec::new(),
                };
                self.add(
                    NodeKind::Return {
                        has_value: value.is_some(),
                    },
                    Some(stmt.span),
                    children,
                )
            }
            StmtKind::If {
                test,
                then_body,
                else_body,
            } => {
                let mut children = vec![self.expr(test, Ctx::Load)];
                children.extend(then_body.iter().map(|s| self.stmt(s)));
                children.extend(else_body.iter().map(|s| self.stmt(s)));
                self.add(
                    NodeKind::If {
                        then_count: then_body.len() as u32,
                    },
                    Some(stmt.span),
                    children,
                )
            }
            StmtKind::While { test, body } => {
                let mut children = vec![self.expr(test, Ctx::Load)];
                children.extend(body.iter().map(|s| self.stmt(s)));
                self.add(NodeKind::While, Some(stmt.span), children)
            }
            StmtKind::Expr { value } => {
                let child = self.expr(value, Ctx::Load);
                self.add(NodeKind::ExprStmt, Some(stmt.span), vec![child])
            }
        }
    }

    fn expr(&mut self, expr: &Expr, ctx: Ctx) -> NodeId {
        match &expr.kind {
            ExprKind::Literal(lit) => {
                self.add(NodeKind::Literal(lit.clone()), Some(expr.span), Vec::new())
            }
            ExprKind::Name(id) => self.add(
                NodeKind::Name {
                    id: id.clone(),
                    ctx,
                },
                Some(expr.span),
                Vec::new(),
            ),
            ExprKind::Tuple(elems) => {
                // Display context propagates to the elements.
                let children = elems.iter().map(|e| self.expr(e, ctx)).collect();
                self.add(NodeKind::Tuple { ctx }, Some(expr.span), children)
            }
            ExprKind::List(elems) => {
                let children = elems.iter().map(|e| self.expr(e, Ctx::Load)).collect();
                self.add(NodeKind::List, Some(expr.span), children)
            }
            ExprKind::Dict(pairs) => {
                let mut children = Vec::with_capacity(pairs.len() * 2);
                for (k, v) in pairs {
                    children.push(self.expr(k, Ctx::Load));
                    children.push(self.expr(v, Ctx::Load));
                }
                self.add(NodeKind::Dict, Some(expr.span), children)
            }
            ExprKind::BinOp { op, left, right } => {
                let l = self.expr(left, Ctx::Load);
                let r = self.expr(right, Ctx::Load);
                self.add(NodeKind::BinOp { op: *op }, Some(expr.span), vec![l, r])
            }
            ExprKind::UnaryOp { op, operand } => {
                let o = self.expr(operand, Ctx::Load);
                self.add(NodeKind::UnaryOp { op: *op }, Some(expr.span), vec![o])
            }
            ExprKind::BoolOp { op, left, right } => {
                let l = self.expr(left, Ctx::Load);
                let r = self.expr(right, Ctx::Load);
                self.add(NodeKind::BoolOp { op: *op }, Some(expr.span), vec![l, r])
            }
            ExprKind::Compare { op, left, right } => {
                let l = self.expr(left, Ctx::Load);
                let r = self.expr(right, Ctx::Load);
                self.add(NodeKind::Compare { op: *op }, Some(expr.span), vec![l, r])
            }
            ExprKind::Call { func, args } => {
                let mut children = vec![self.expr(func, Ctx::Load)];
                children.extend(args.iter().map(|a| self.expr(a, Ctx::Load)));
                self.add(NodeKind::Call, Some(expr.span), children)
            }
            ExprKind::Attribute { obj, name } => {
                let o = self.expr(obj, Ctx::Load);
                self.add(
                    NodeKind::Attribute {
                        name: name.name.clone(),
                        ctx,
                    },
                    Some(expr.span),
                    vec![o],
                )
            }
            ExprKind::Subscript { obj, index } => {
                let o = self.expr(obj, Ctx::Load);
                let i = self.expr(index, Ctx::Load);
                self.add(NodeKind::Subscript { ctx }, Some(expr.span), vec![o, i])
            }
            ExprKind::Lambda { params, body } => {
                let mut children: Vec<NodeId> = params
                    .iter()
                    .map(|p| {
                        self.add(
                            NodeKind::Param {
                                name: p.name.clone(),
                            },
                            Some(p.span),
                            Vec::new(),
                        )
                    })
                    .collect();
                children.push(self.expr(body, Ctx::Load));
                self.add(
                    NodeKind::Lambda {
                        param_count: params.len() as u32,
                    },
                    Some(expr.span),
                    children,
                )
            }
            ExprKind::FString { parts } => {
                let mut segs = Vec::with_capacity(parts.len());
                let mut children = Vec::new();
                for part in parts {
                    match part {
                        FsPart::Text(t) => segs.push(FsSeg::Text(t.clone())),
                        FsPart::Field { name, span } => {
                            segs.push(FsSeg::Field);
                            let n = self.expr(name, Ctx::Load);
                            children.push(self.add(NodeKind::FormatField, Some(*span), vec![n]));
                        }
                    }
                }
                self.add(NodeKind::FString { segs }, Some(expr.span), children)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn build(source: &str) -> Tree {
        let result = parser::parse(source);
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        Tree::build(&result.module.unwrap())
    }

    #[test]
    fn every_node_except_root_has_parent() {
        let tree = build("fn f(a) {\n  return a.b[0] + probe(1, 2)\n}");
        for (id, node) in tree.iter() {
            if id == tree.root() {
                assert!(node.parent.is_none());
            } else {
                assert!(node.parent.is_some(), "node {id:?} has no parent");
            }
        }
    }

    #[test]
    fn parent_spans_cover_children() {
        let tree = build("x = 1 + y * 2");
        for (id, node) in tree.iter() {
            for child in &node.children {
                assert!(
                    node.span.contains(tree.node(*child).span),
                    "{:?} does not cover child {:?}",
                    id,
                    child
                );
            }
        }
    }

    #[test]
    fn store_context_assigned_to_targets() {
        let tree = build("a.b = c");
        let mut saw_store = false;
        let mut saw_load = false;
        for (_, node) in tree.iter() {
            match &node.kind {
                NodeKind::Attribute { ctx, .. } => {
                    assert_eq!(*ctx, Ctx::Store);
                    saw_store = true;
                }
                NodeKind::Name { id, ctx } if id == "c" => {
                    assert_eq!(*ctx, Ctx::Load);
                    saw_load = true;
                }
                _ => {}
            }
        }
        assert!(saw_store && saw_load);
    }

    #[test]
    fn del_context_propagates_through_tuple() {
        let tree = build("del x, a[1]");
        for (_, node) in tree.iter() {
            if let NodeKind::Subscript { ctx } = &node.kind {
                assert_eq!(*ctx, Ctx::Del);
            }
            if let NodeKind::Name { id, ctx } = &node.kind {
                if id == "x" {
                    assert_eq!(*ctx, Ctx::Del);
                }
            }
        }
    }

    #[test]
    fn node_text_matches_span() {
        let source = "reply = 134895 / 0";
        let tree = build(source);
        let binop = tree
            .iter()
            .find(|(_, n)| matches!(n.kind, NodeKind::BinOp { .. }))
            .map(|(id, _)| id)
            .expect("no binop node");
        assert_eq!(tree.node_text(binop, source), "134895 / 0");
    }

    #[test]
    fn enclosing_statement_walks_up() {
        let source = "x = f(1)";
        let tree = build(source);
        let (lit, _) = tree
            .iter()
            .find(|(_, n)| matches!(n.kind, NodeKind::Literal(Lit::Int(1))))
            .expect("no literal");
        let stmt = tree.enclosing_statement(lit);
        assert!(matches!(tree.node(stmt).kind, NodeKind::Assign { .. }));
    }

    #[test]
    fn fstring_segments_align_with_children() {
        let tree = build(r#"msg = f"a {x} b {y}""#);
        let (fs, node) = tree
            .iter()
            .find(|(_, n)| matches!(n.kind, NodeKind::FString { .. }))
            .expect("no fstring");
        if let NodeKind::FString { segs } = &node.kind {
            let fields = segs.iter().filter(|s| matches!(s, FsSeg::Field)).count();
            assert_eq!(fields, tree.node(fs).children.len());
            assert_eq!(fields, 2);
        }
    }
}
