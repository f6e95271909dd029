//! Semantic decorator
//!
//! A post-order walk over every function body that assigns a type to every
//! expression node. Statement-only nodes keep their type slot empty; the
//! code generator never reads it for them.
//!
//! Two rewrites happen during the walk: pointer-operand normalization for
//! `+` (the pointer ends up on the left, so the generator only scales the
//! right operand), and `sizeof`, which is replaced in place by an integer
//! literal; no sizeof node survives decoration.

use crate::ast::{Node, NodeKind, Program};
use crate::diag::SourceMap;
use crate::types::{
    TypeKind, TypeRef, base_of, find_member, has_base, int_type, kind_of, long_type, pointer_to,
    size_of,
};
use std::rc::Rc;

pub struct TypeChecker {
    src: Rc<SourceMap>,
}

/// Decorate the whole program.
pub fn add_type(prog: &mut Program, src: &Rc<SourceMap>) -> Result<(), String> {
    let checker = TypeChecker {
        src: Rc::clone(src),
    };
    for f in &mut prog.fns {
        for node in &mut f.body {
            checker.visit(node)?;
        }
    }
    Ok(())
}

impl TypeChecker {
    fn error_at(&self, loc: usize, msg: &str) -> String {
        self.src.error_at(loc, msg)
    }

    fn size_of_at(&self, ty: &TypeRef, loc: usize) -> Result<i64, String> {
        size_of(ty).map_err(|e| self.error_at(loc, &e))
    }

    fn visit(&self, node: &mut Node) -> Result<(), String> {
        for child in node.children_mut() {
            self.visit(child)?;
        }

        let loc = node.loc;

        // sizeof folds to a literal here, once the operand is typed. The
        // operand subtree is discarded with the old kind.
        let sizeof_ty = match &node.kind {
            NodeKind::Sizeof(op) => Some(op.ty.clone().expect("sizeof operand is typed")),
            NodeKind::SizeofType(ty) => Some(Rc::clone(ty)),
            _ => None,
        };
        if let Some(ty) = sizeof_ty {
            let size = self.size_of_at(&ty, loc)?;
            node.kind = NodeKind::Num(size);
            node.ty = Some(int_type());
            return Ok(());
        }

        let ty: Option<TypeRef> = match &mut node.kind {
            NodeKind::Num(v) => {
                // int when the value fits 32 bits, long otherwise
                if *v == (*v as i32) as i64 {
                    Some(int_type())
                } else {
                    Some(long_type())
                }
            }
            NodeKind::Var(v) => Some(Rc::clone(&v.borrow().ty)),

            NodeKind::Member { lhs, name, member } => {
                let lty = lhs.ty.clone().expect("struct operand is typed");
                if kind_of(&lty) != TypeKind::Struct {
                    return Err(self.error_at(loc, "not a struct"));
                }
                let Some(m) = find_member(&lty, name) else {
                    return Err(self.error_at(loc, &format!("no such member '{}'", name)));
                };
                let mty = Rc::clone(&m.ty);
                *member = Some(m);
                Some(mty)
            }

            NodeKind::Add(lhs, rhs) => {
                // Keep the pointer on the left so codegen scales the right
                // operand only.
                if has_base(rhs.ty.as_ref().unwrap()) {
                    std::mem::swap(lhs, rhs);
                }
                if has_base(rhs.ty.as_ref().unwrap()) {
                    return Err(self.error_at(loc, "invalid pointer arithmetic operands"));
                }
                Some(Rc::clone(lhs.ty.as_ref().unwrap()))
            }
            NodeKind::Sub(lhs, rhs) => {
                // Subtraction cannot swap; a pointer on the right is an
                // error outright.
                if has_base(rhs.ty.as_ref().unwrap()) {
                    return Err(self.error_at(loc, "invalid pointer arithmetic operands"));
                }
                Some(Rc::clone(lhs.ty.as_ref().unwrap()))
            }

            NodeKind::Mul(..)
            | NodeKind::Div(..)
            | NodeKind::Mod(..)
            | NodeKind::Shl(..)
            | NodeKind::Shr(..)
            | NodeKind::BitAnd(..)
            | NodeKind::BitOr(..)
            | NodeKind::BitXor(..)
            | NodeKind::Eq(..)
            | NodeKind::Ne(..)
            | NodeKind::Lt(..)
            | NodeKind::Le(..)
            | NodeKind::Not(..)
            | NodeKind::BitNot(..)
            | NodeKind::LogAnd(..)
            | NodeKind::LogOr(..)
            | NodeKind::Funcall { .. } => Some(int_type()),

            NodeKind::Assign(lhs, _)
            | NodeKind::AddAssign(lhs, _)
            | NodeKind::SubAssign(lhs, _)
            | NodeKind::MulAssign(lhs, _)
            | NodeKind::DivAssign(lhs, _)
            | NodeKind::ShlAssign(lhs, _)
            | NodeKind::ShrAssign(lhs, _) => Some(Rc::clone(lhs.ty.as_ref().unwrap())),

            NodeKind::PreInc(op)
            | NodeKind::PreDec(op)
            | NodeKind::PostInc(op)
            | NodeKind::PostDec(op) => Some(Rc::clone(op.ty.as_ref().unwrap())),

            NodeKind::Ternary { then, .. } => Some(Rc::clone(then.ty.as_ref().unwrap())),
            NodeKind::Comma(_, rhs) => Some(Rc::clone(rhs.ty.as_ref().unwrap())),

            NodeKind::Addr(op) => {
                let oty = op.ty.clone().unwrap();
                if kind_of(&oty) == TypeKind::Array {
                    // &array is a pointer to the element type; same value,
                    // different type.
                    Some(pointer_to(base_of(&oty).unwrap()))
                } else {
                    Some(pointer_to(oty))
                }
            }
            NodeKind::Deref(op) => {
                let oty = op.ty.clone().unwrap();
                let Some(base) = base_of(&oty) else {
                    return Err(self.error_at(loc, "invalid pointer dereference"));
                };
                if kind_of(&base) == TypeKind::Void {
                    return Err(self.error_at(loc, "dereferencing a void pointer"));
                }
                Some(base)
            }

            // The parser attached the target type.
            NodeKind::Cast(_) => None,

            NodeKind::StmtExpr(body) => {
                // The last statement was hoisted to a bare expression.
                Some(Rc::clone(body.last().unwrap().ty.as_ref().unwrap()))
            }

            NodeKind::Sizeof(_) | NodeKind::SizeofType(_) => unreachable!("folded above"),

            NodeKind::ExprStmt(_)
            | NodeKind::Return(_)
            | NodeKind::If { .. }
            | NodeKind::While { .. }
            | NodeKind::DoWhile { .. }
            | NodeKind::For { .. }
            | NodeKind::Block(_)
            | NodeKind::Switch { .. }
            | NodeKind::Case { .. }
            | NodeKind::DefaultCase { .. }
            | NodeKind::Break
            | NodeKind::Continue
            | NodeKind::Goto(_)
            | NodeKind::Label { .. }
            | NodeKind::Null => None,
        };

        if ty.is_some() {
            node.ty = ty;
        }
        Ok(())
    }
}
