//! Abstract syntax tree
//!
//! One tagged sum covers expressions, statements, and declarations; the
//! decorator and the code generator both match exhaustively, so a missing
//! case is a compile error rather than a silent fall-through.
//!
//! Every node carries the byte offset of its defining token (`loc`) for
//! diagnostics, and a type slot that the decorator fills for expression
//! nodes. Statement-only nodes keep `ty = None`; the generator never
//! consults it for them.

use crate::types::{Member, TypeRef};
use std::cell::RefCell;
use std::rc::Rc;

pub type VarRef = Rc<RefCell<Var>>;

/// A named object: local, global, or the anonymous global backing a string
/// literal or a block-scoped static.
#[derive(Debug)]
pub struct Var {
    pub name: String,
    pub ty: TypeRef,
    /// Defining token offset, for diagnostics.
    pub loc: usize,
    pub is_local: bool,
    /// Stack offset from rbp; assigned by the driver after parsing.
    pub offset: i64,
    /// Global initializer chunks, empty when uninitialized.
    pub initializer: Vec<InitValue>,
    /// Decoded bytes of a string literal, including the trailing NUL.
    pub contents: Option<Vec<u8>>,
}

/// One chunk of a global initializer, emitted in order into `.data`.
#[derive(Debug, Clone, PartialEq)]
pub enum InitValue {
    /// A constant of 1, 2, 4, or 8 bytes.
    Scalar { size: i64, val: i64 },
    /// The address of another global.
    Label(String),
    /// Zero fill, used for padding and missing elements.
    Zero(i64),
}

#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    /// Byte offset of the defining token.
    pub loc: usize,
    /// Filled by the decorator for expressions.
    pub ty: Option<TypeRef>,
}

impl Node {
    pub fn new(kind: NodeKind, loc: usize) -> Node {
        Node {
            kind,
            loc,
            ty: None,
        }
    }
}

#[derive(Debug)]
pub enum NodeKind {
    // Expressions
    /// Integer literal.
    Num(i64),
    /// Variable reference (locals, globals, string-literal globals).
    Var(VarRef),
    /// `lhs.name`; the decorator resolves `member`.
    Member {
        lhs: Box<Node>,
        name: String,
        member: Option<Member>,
    },
    /// Call by name. Arguments evaluate left to right.
    Funcall { name: String, args: Vec<Node> },
    /// GNU statement expression `({ ... })`; the last node is the value.
    StmtExpr(Vec<Node>),

    Add(Box<Node>, Box<Node>),
    Sub(Box<Node>, Box<Node>),
    Mul(Box<Node>, Box<Node>),
    Div(Box<Node>, Box<Node>),
    Mod(Box<Node>, Box<Node>),
    BitAnd(Box<Node>, Box<Node>),
    BitOr(Box<Node>, Box<Node>),
    BitXor(Box<Node>, Box<Node>),
    Shl(Box<Node>, Box<Node>),
    Shr(Box<Node>, Box<Node>),
    Eq(Box<Node>, Box<Node>),
    Ne(Box<Node>, Box<Node>),
    Lt(Box<Node>, Box<Node>),
    Le(Box<Node>, Box<Node>),
    LogAnd(Box<Node>, Box<Node>),
    LogOr(Box<Node>, Box<Node>),
    Comma(Box<Node>, Box<Node>),

    Assign(Box<Node>, Box<Node>),
    // Compound assignments are distinct kinds: the lvalue is evaluated once.
    AddAssign(Box<Node>, Box<Node>),
    SubAssign(Box<Node>, Box<Node>),
    MulAssign(Box<Node>, Box<Node>),
    DivAssign(Box<Node>, Box<Node>),
    ShlAssign(Box<Node>, Box<Node>),
    ShrAssign(Box<Node>, Box<Node>),

    Ternary {
        cond: Box<Node>,
        then: Box<Node>,
        els: Box<Node>,
    },

    Addr(Box<Node>),
    Deref(Box<Node>),
    Not(Box<Node>),
    BitNot(Box<Node>),
    PreInc(Box<Node>),
    PreDec(Box<Node>),
    PostInc(Box<Node>),
    PostDec(Box<Node>),
    /// `(T)expr`; the target type lives in `Node::ty` from the parse.
    Cast(Box<Node>),
    /// `sizeof expr`; folded to [`NodeKind::Num`] by the decorator.
    Sizeof(Box<Node>),
    /// `sizeof(type-name)`; folded to [`NodeKind::Num`] by the decorator.
    SizeofType(TypeRef),

    // Statements
    /// Expression evaluated for effect; the value is discarded.
    ExprStmt(Box<Node>),
    Return(Option<Box<Node>>),
    If {
        cond: Box<Node>,
        then: Box<Node>,
        els: Option<Box<Node>>,
    },
    While {
        cond: Box<Node>,
        then: Box<Node>,
    },
    DoWhile {
        then: Box<Node>,
        cond: Box<Node>,
    },
    For {
        init: Option<Box<Node>>,
        cond: Option<Box<Node>>,
        inc: Option<Box<Node>>,
        then: Box<Node>,
    },
    Block(Vec<Node>),
    /// `cases` holds (landing-pad id, value) in parse order; the ids tie the
    /// compare chain to the `Case` nodes inside `body`.
    Switch {
        cond: Box<Node>,
        body: Box<Node>,
        cases: Vec<(usize, i64)>,
        default_id: Option<usize>,
    },
    Case {
        id: usize,
        val: i64,
        stmt: Box<Node>,
    },
    DefaultCase {
        id: usize,
        stmt: Box<Node>,
    },
    Break,
    Continue,
    Goto(String),
    Label {
        name: String,
        stmt: Box<Node>,
    },
    /// Empty statement or a declaration with nothing to execute.
    Null,
}

impl Node {
    /// All direct child nodes, for the decorator's generic post-order walk.
    /// The borrows are disjoint fields, so handing them out together is fine.
    pub fn children_mut(&mut self) -> Vec<&mut Node> {
        use NodeKind::*;
        match &mut self.kind {
            Add(l, r)
            | Sub(l, r)
            | Mul(l, r)
            | Div(l, r)
            | Mod(l, r)
            | BitAnd(l, r)
            | BitOr(l, r)
            | BitXor(l, r)
            | Shl(l, r)
            | Shr(l, r)
            | Eq(l, r)
            | Ne(l, r)
            | Lt(l, r)
            | Le(l, r)
            | LogAnd(l, r)
            | LogOr(l, r)
            | Comma(l, r)
            | Assign(l, r)
            | AddAssign(l, r)
            | SubAssign(l, r)
            | MulAssign(l, r)
            | DivAssign(l, r)
            | ShlAssign(l, r)
            | ShrAssign(l, r) => vec![l.as_mut(), r.as_mut()],

            Addr(e) | Deref(e) | Not(e) | BitNot(e) | PreInc(e) | PreDec(e) | PostInc(e)
            | PostDec(e) | Cast(e) | Sizeof(e) | ExprStmt(e) => vec![e.as_mut()],

            Member { lhs, .. } => vec![lhs.as_mut()],
            Return(Some(e)) => vec![e.as_mut()],
            Return(None) => vec![],

            Ternary { cond, then, els } => vec![cond.as_mut(), then.as_mut(), els.as_mut()],

            If { cond, then, els } => {
                let mut v = vec![cond.as_mut(), then.as_mut()];
                if let Some(e) = els {
                    v.push(e.as_mut());
                }
                v
            }
            While { cond, then } => vec![cond.as_mut(), then.as_mut()],
            DoWhile { then, cond } => vec![then.as_mut(), cond.as_mut()],
            For {
                init,
                cond,
                inc,
                then,
            } => {
                let mut v: Vec<&mut Node> = Vec::new();
                if let Some(n) = init {
                    v.push(n.as_mut());
                }
                if let Some(n) = cond {
                    v.push(n.as_mut());
                }
                if let Some(n) = inc {
                    v.push(n.as_mut());
                }
                v.push(then.as_mut());
                v
            }
            Switch { cond, body, .. } => vec![cond.as_mut(), body.as_mut()],
            Case { stmt, .. } | DefaultCase { stmt, .. } | Label { stmt, .. } => {
                vec![stmt.as_mut()]
            }

            Funcall { args, .. } => args.iter_mut().collect(),
            Block(body) | StmtExpr(body) => body.iter_mut().collect(),

            Num(_) | Var(_) | SizeofType(_) | Break | Continue | Goto(_) | Null => vec![],
        }
    }
}

/// A function definition. The locals list drives stack layout; parameters
/// are included in it.
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub is_static: bool,
    pub params: Vec<VarRef>,
    pub body: Vec<Node>,
    pub locals: Vec<VarRef>,
    /// Total local storage in bytes, padded; assigned by the driver.
    pub stack_size: i64,
}

#[derive(Debug)]
pub struct Program {
    pub globals: Vec<VarRef>,
    pub fns: Vec<Function>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::int_type;

    #[test]
    fn test_children_of_binary() {
        let mut n = Node::new(
            NodeKind::Add(
                Box::new(Node::new(NodeKind::Num(1), 0)),
                Box::new(Node::new(NodeKind::Num(2), 0)),
            ),
            0,
        );
        assert_eq!(n.children_mut().len(), 2);
    }

    #[test]
    fn test_children_of_for_skips_missing_clauses() {
        let mut n = Node::new(
            NodeKind::For {
                init: None,
                cond: None,
                inc: None,
                then: Box::new(Node::new(NodeKind::Null, 0)),
            },
            0,
        );
        assert_eq!(n.children_mut().len(), 1);
    }

    #[test]
    fn test_leaves_have_no_children() {
        let mut num = Node::new(NodeKind::Num(7), 0);
        assert!(num.children_mut().is_empty());
        let mut st = Node::new(NodeKind::SizeofType(int_type()), 0);
        assert!(st.children_mut().is_empty());
        let mut brk = Node::new(NodeKind::Break, 0);
        assert!(brk.children_mut().is_empty());
    }
}
