//! Expression lowering
//!
//! Expressions evaluate on a software stack on top of the machine stack:
//! every expression pushes exactly one 8-byte value, binary operators pop
//! two and push one, and statement positions pop the leftover. The
//! redundancy keeps emission compositional; there is no register
//! allocation.
//!
//! Lvalues are produced by `gen_addr`, which pushes an address; loads and
//! stores go through the width tables keyed on the node's type. Arrays
//! never load: a variable of array type decays to its address.

use super::state::{ARGREG8, CodeGen};
use super::CodeGenError;
use crate::ast::{Node, NodeKind};
use crate::types::{TypeKind, TypeRef, base_of, kind_of};
use std::fmt::Write as _;
use std::rc::Rc;

/// Binary operator selector shared by plain and compound forms.
#[derive(Clone, Copy)]
pub(super) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
}

fn fits_i32(v: i64) -> bool {
    v == (v as i32) as i64
}

impl CodeGen {
    fn ty_of<'a>(&self, node: &'a Node) -> Result<&'a TypeRef, CodeGenError> {
        node.ty
            .as_ref()
            .ok_or_else(|| CodeGenError::Logic("internal: expression node has no type".to_string()))
    }

    /// Push the address of an lvalue expression.
    pub(super) fn gen_addr(&mut self, node: &Node) -> Result<(), CodeGenError> {
        match &node.kind {
            NodeKind::Var(var) => {
                let v = var.borrow();
                if v.is_local {
                    writeln!(&mut self.output, "  lea rax, [rbp-{}]", v.offset)?;
                    writeln!(&mut self.output, "  push rax")?;
                } else {
                    writeln!(&mut self.output, "  push offset {}", v.name)?;
                }
                Ok(())
            }
            NodeKind::Deref(e) => self.gen_node(e),
            NodeKind::Member { lhs, member, .. } => {
                let m = member
                    .as_ref()
                    .ok_or_else(|| CodeGenError::Logic("internal: unresolved member".to_string()))?;
                self.gen_addr(lhs)?;
                writeln!(&mut self.output, "  pop rax")?;
                writeln!(&mut self.output, "  add rax, {}", m.offset)?;
                writeln!(&mut self.output, "  push rax")?;
                Ok(())
            }
            _ => Err(self.error_at(node.loc, "not an lvalue")),
        }
    }

    /// `gen_addr` plus the check that the target can be assigned to; an
    /// array cannot.
    pub(super) fn gen_lval(&mut self, node: &Node) -> Result<(), CodeGenError> {
        if kind_of(self.ty_of(node)?) == TypeKind::Array {
            return Err(self.error_at(node.loc, "not an lvalue"));
        }
        self.gen_addr(node)
    }

    /// Pop an address, push the value at it, sign-extended to 64 bits.
    pub(super) fn load(&mut self, ty: &TypeRef, loc: usize) -> Result<(), CodeGenError> {
        writeln!(&mut self.output, "  pop rax")?;
        match self.size_of_at(ty, loc)? {
            1 => writeln!(&mut self.output, "  movsx rax, byte ptr [rax]")?,
            2 => writeln!(&mut self.output, "  movsx rax, word ptr [rax]")?,
            4 => writeln!(&mut self.output, "  movsxd rax, dword ptr [rax]")?,
            _ => writeln!(&mut self.output, "  mov rax, [rax]")?,
        }
        writeln!(&mut self.output, "  push rax")?;
        Ok(())
    }

    /// Pop a value and an address, store width-correctly, push the value
    /// back (assignment is an expression). Bools normalize to 0/1 first.
    pub(super) fn store(&mut self, ty: &TypeRef, loc: usize) -> Result<(), CodeGenError> {
        writeln!(&mut self.output, "  pop rdi")?;
        writeln!(&mut self.output, "  pop rax")?;

        if kind_of(ty) == TypeKind::Bool {
            writeln!(&mut self.output, "  cmp rdi, 0")?;
            writeln!(&mut self.output, "  setne dil")?;
            writeln!(&mut self.output, "  movzb rdi, dil")?;
        }

        match self.size_of_at(ty, loc)? {
            1 => writeln!(&mut self.output, "  mov [rax], dil")?,
            2 => writeln!(&mut self.output, "  mov [rax], di")?,
            4 => writeln!(&mut self.output, "  mov [rax], edi")?,
            _ => writeln!(&mut self.output, "  mov [rax], rdi")?,
        }
        writeln!(&mut self.output, "  push rdi")?;
        Ok(())
    }

    /// Pop the top of stack, re-push it sign-extended (or 0/1-normalized)
    /// to the given type's width. Used for casts and call results.
    pub(super) fn truncate(&mut self, ty: &TypeRef, loc: usize) -> Result<(), CodeGenError> {
        writeln!(&mut self.output, "  pop rax")?;

        if kind_of(ty) == TypeKind::Bool {
            writeln!(&mut self.output, "  cmp rax, 0")?;
            writeln!(&mut self.output, "  setne al")?;
            writeln!(&mut self.output, "  movzb rax, al")?;
        }

        match self.size_of_at(ty, loc)? {
            1 => writeln!(&mut self.output, "  movsx rax, al")?,
            2 => writeln!(&mut self.output, "  movsx rax, ax")?,
            4 => writeln!(&mut self.output, "  movsxd rax, eax")?,
            _ => {}
        }
        writeln!(&mut self.output, "  push rax")?;
        Ok(())
    }

    /// How much `++`/`--` and pointer arithmetic scale by: the pointee size
    /// for pointers and arrays, 1 otherwise.
    fn scale_of(&self, ty: &TypeRef, loc: usize) -> Result<i64, CodeGenError> {
        match base_of(ty) {
            Some(base) => self.size_of_at(&base, loc),
            None => Ok(1),
        }
    }

    /// Pop two operands (rhs into rdi, lhs into rax), apply the operator,
    /// push the result. Pointer-typed add/sub scales rdi by the pointee
    /// size first.
    fn gen_binop(&mut self, op: BinOp, ty: &TypeRef, loc: usize) -> Result<(), CodeGenError> {
        writeln!(&mut self.output, "  pop rdi")?;
        writeln!(&mut self.output, "  pop rax")?;

        if matches!(op, BinOp::Add | BinOp::Sub) {
            let scale = self.scale_of(ty, loc)?;
            if scale != 1 {
                writeln!(&mut self.output, "  imul rdi, {}", scale)?;
            }
        }

        match op {
            BinOp::Add => writeln!(&mut self.output, "  add rax, rdi")?,
            BinOp::Sub => writeln!(&mut self.output, "  sub rax, rdi")?,
            BinOp::Mul => writeln!(&mut self.output, "  imul rax, rdi")?,
            BinOp::Div => {
                writeln!(&mut self.output, "  cqo")?;
                writeln!(&mut self.output, "  idiv rdi")?;
            }
            BinOp::Mod => {
                writeln!(&mut self.output, "  cqo")?;
                writeln!(&mut self.output, "  idiv rdi")?;
                writeln!(&mut self.output, "  mov rax, rdx")?;
            }
            BinOp::BitAnd => writeln!(&mut self.output, "  and rax, rdi")?,
            BinOp::BitOr => writeln!(&mut self.output, "  or rax, rdi")?,
            BinOp::BitXor => writeln!(&mut self.output, "  xor rax, rdi")?,
            BinOp::Shl => {
                writeln!(&mut self.output, "  mov cl, dil")?;
                writeln!(&mut self.output, "  shl rax, cl")?;
            }
            BinOp::Shr => {
                writeln!(&mut self.output, "  mov cl, dil")?;
                writeln!(&mut self.output, "  sar rax, cl")?;
            }
            BinOp::Eq => self.gen_cmp("sete")?,
            BinOp::Ne => self.gen_cmp("setne")?,
            BinOp::Lt => self.gen_cmp("setl")?,
            BinOp::Le => self.gen_cmp("setle")?,
        }
        writeln!(&mut self.output, "  push rax")?;
        Ok(())
    }

    fn gen_cmp(&mut self, set: &str) -> Result<(), CodeGenError> {
        writeln!(&mut self.output, "  cmp rax, rdi")?;
        writeln!(&mut self.output, "  {} al", set)?;
        writeln!(&mut self.output, "  movzb rax, al")?;
        Ok(())
    }

    fn gen_binary(
        &mut self,
        op: BinOp,
        lhs: &Node,
        rhs: &Node,
        ty: &TypeRef,
        loc: usize,
    ) -> Result<(), CodeGenError> {
        self.gen_node(lhs)?;
        self.gen_node(rhs)?;
        self.gen_binop(op, ty, loc)
    }

    /// Pre/post increment and decrement. The address is computed once and
    /// duplicated; post forms undo the step after the store so the old
    /// value stays on the stack.
    fn gen_incdec(
        &mut self,
        operand: &Node,
        ty: &TypeRef,
        loc: usize,
        dec: bool,
        post: bool,
    ) -> Result<(), CodeGenError> {
        let step = self.scale_of(ty, loc)?;
        let (apply, undo) = if dec { ("sub", "add") } else { ("add", "sub") };

        self.gen_lval(operand)?;
        writeln!(&mut self.output, "  push [rsp]")?;
        self.load(ty, loc)?;
        writeln!(&mut self.output, "  pop rax")?;
        writeln!(&mut self.output, "  {} rax, {}", apply, step)?;
        writeln!(&mut self.output, "  push rax")?;
        self.store(ty, loc)?;
        if post {
            writeln!(&mut self.output, "  pop rax")?;
            writeln!(&mut self.output, "  {} rax, {}", undo, step)?;
            writeln!(&mut self.output, "  push rax")?;
        }
        Ok(())
    }

    /// Call sequence: arguments evaluate left to right onto the stack, pop
    /// into the argument registers last-to-first, then a runtime test keeps
    /// rsp 16-byte aligned at the call.
    fn gen_funcall(&mut self, node: &Node, name: &str, args: &[Node]) -> Result<(), CodeGenError> {
        for arg in args {
            self.gen_node(arg)?;
        }
        for i in (0..args.len()).rev() {
            writeln!(&mut self.output, "  pop {}", ARGREG8[i])?;
        }

        let seq = self.next_label();
        writeln!(&mut self.output, "  mov rax, rsp")?;
        writeln!(&mut self.output, "  and rax, 15")?;
        writeln!(&mut self.output, "  jnz .L.call.{}", seq)?;
        writeln!(&mut self.output, "  mov rax, 0")?;
        writeln!(&mut self.output, "  call {}", name)?;
        writeln!(&mut self.output, "  jmp .L.end.{}", seq)?;
        writeln!(&mut self.output, ".L.call.{}:", seq)?;
        writeln!(&mut self.output, "  sub rsp, 8")?;
        writeln!(&mut self.output, "  mov rax, 0")?;
        writeln!(&mut self.output, "  call {}", name)?;
        writeln!(&mut self.output, "  add rsp, 8")?;
        writeln!(&mut self.output, ".L.end.{}:", seq)?;
        writeln!(&mut self.output, "  push rax")?;

        // The result register is wider than the declared return type.
        let ty = Rc::clone(self.ty_of(node)?);
        self.truncate(&ty, node.loc)
    }

    /// Emit one node. Expressions leave one value on the stack; statements
    /// leave none.
    pub(super) fn gen_node(&mut self, node: &Node) -> Result<(), CodeGenError> {
        self.emit_source_comment(node.loc)?;

        match &node.kind {
            NodeKind::Null => Ok(()),

            NodeKind::Num(v) => {
                if fits_i32(*v) {
                    writeln!(&mut self.output, "  push {}", v)?;
                } else {
                    writeln!(&mut self.output, "  movabs rax, {}", v)?;
                    writeln!(&mut self.output, "  push rax")?;
                }
                Ok(())
            }

            NodeKind::ExprStmt(e) => {
                self.gen_node(e)?;
                writeln!(&mut self.output, "  add rsp, 8")?;
                Ok(())
            }

            NodeKind::Var(_) | NodeKind::Member { .. } => {
                self.gen_addr(node)?;
                let ty = Rc::clone(self.ty_of(node)?);
                if kind_of(&ty) != TypeKind::Array {
                    self.load(&ty, node.loc)?;
                }
                Ok(())
            }

            NodeKind::Assign(lhs, rhs) => {
                let ty = Rc::clone(self.ty_of(node)?);
                self.gen_lval(lhs)?;
                self.gen_node(rhs)?;
                self.store(&ty, node.loc)
            }

            NodeKind::AddAssign(lhs, rhs)
            | NodeKind::SubAssign(lhs, rhs)
            | NodeKind::MulAssign(lhs, rhs)
            | NodeKind::DivAssign(lhs, rhs)
            | NodeKind::ShlAssign(lhs, rhs)
            | NodeKind::ShrAssign(lhs, rhs) => {
                let op = match &node.kind {
                    NodeKind::AddAssign(..) => BinOp::Add,
                    NodeKind::SubAssign(..) => BinOp::Sub,
                    NodeKind::MulAssign(..) => BinOp::Mul,
                    NodeKind::DivAssign(..) => BinOp::Div,
                    NodeKind::ShlAssign(..) => BinOp::Shl,
                    _ => BinOp::Shr,
                };
                let ty = Rc::clone(self.ty_of(node)?);
                self.gen_lval(lhs)?;
                writeln!(&mut self.output, "  push [rsp]")?;
                self.load(&ty, node.loc)?;
                self.gen_node(rhs)?;
                self.gen_binop(op, &ty, node.loc)?;
                self.store(&ty, node.loc)
            }

            NodeKind::PreInc(e) => {
                let ty = Rc::clone(self.ty_of(node)?);
                self.gen_incdec(e, &ty, node.loc, false, false)
            }
            NodeKind::PreDec(e) => {
                let ty = Rc::clone(self.ty_of(node)?);
                self.gen_incdec(e, &ty, node.loc, true, false)
            }
            NodeKind::PostInc(e) => {
                let ty = Rc::clone(self.ty_of(node)?);
                self.gen_incdec(e, &ty, node.loc, false, true)
            }
            NodeKind::PostDec(e) => {
                let ty = Rc::clone(self.ty_of(node)?);
                self.gen_incdec(e, &ty, node.loc, true, true)
            }

            NodeKind::Comma(lhs, rhs) => {
                self.gen_node(lhs)?;
                writeln!(&mut self.output, "  add rsp, 8")?;
                self.gen_node(rhs)
            }

            NodeKind::Addr(e) => self.gen_addr(e),

            NodeKind::Deref(e) => {
                self.gen_node(e)?;
                let ty = Rc::clone(self.ty_of(node)?);
                if kind_of(&ty) != TypeKind::Array {
                    self.load(&ty, node.loc)?;
                }
                Ok(())
            }

            NodeKind::Not(e) => {
                self.gen_node(e)?;
                writeln!(&mut self.output, "  pop rax")?;
                writeln!(&mut self.output, "  cmp rax, 0")?;
                writeln!(&mut self.output, "  sete al")?;
                writeln!(&mut self.output, "  movzb rax, al")?;
                writeln!(&mut self.output, "  push rax")?;
                Ok(())
            }

            NodeKind::BitNot(e) => {
                self.gen_node(e)?;
                writeln!(&mut self.output, "  pop rax")?;
                writeln!(&mut self.output, "  not rax")?;
                writeln!(&mut self.output, "  push rax")?;
                Ok(())
            }

            NodeKind::Cast(e) => {
                self.gen_node(e)?;
                let ty = Rc::clone(self.ty_of(node)?);
                self.truncate(&ty, node.loc)
            }

            NodeKind::LogAnd(lhs, rhs) => {
                let seq = self.next_label();
                self.gen_node(lhs)?;
                writeln!(&mut self.output, "  pop rax")?;
                writeln!(&mut self.output, "  cmp rax, 0")?;
                writeln!(&mut self.output, "  je .L.false.{}", seq)?;
                self.gen_node(rhs)?;
                writeln!(&mut self.output, "  pop rax")?;
                writeln!(&mut self.output, "  cmp rax, 0")?;
                writeln!(&mut self.output, "  je .L.false.{}", seq)?;
                writeln!(&mut self.output, "  push 1")?;
                writeln!(&mut self.output, "  jmp .L.end.{}", seq)?;
                writeln!(&mut self.output, ".L.false.{}:", seq)?;
                writeln!(&mut self.output, "  push 0")?;
                writeln!(&mut self.output, ".L.end.{}:", seq)?;
                Ok(())
            }

            NodeKind::LogOr(lhs, rhs) => {
                let seq = self.next_label();
                self.gen_node(lhs)?;
                writeln!(&mut self.output, "  pop rax")?;
                writeln!(&mut self.output, "  cmp rax, 0")?;
                writeln!(&mut self.output, "  jne .L.true.{}", seq)?;
                self.gen_node(rhs)?;
                writeln!(&mut self.output, "  pop rax")?;
                writeln!(&mut self.output, "  cmp rax, 0")?;
                writeln!(&mut self.output, "  jne .L.true.{}", seq)?;
                writeln!(&mut self.output, "  push 0")?;
                writeln!(&mut self.output, "  jmp .L.end.{}", seq)?;
                writeln!(&mut self.output, ".L.true.{}:", seq)?;
                writeln!(&mut self.output, "  push 1")?;
                writeln!(&mut self.output, ".L.end.{}:", seq)?;
                Ok(())
            }

            NodeKind::Ternary { cond, then, els } => {
                let seq = self.next_label();
                self.gen_node(cond)?;
                writeln!(&mut self.output, "  pop rax")?;
                writeln!(&mut self.output, "  cmp rax, 0")?;
                writeln!(&mut self.output, "  je .L.else.{}", seq)?;
                self.gen_node(then)?;
                writeln!(&mut self.output, "  jmp .L.end.{}", seq)?;
                writeln!(&mut self.output, ".L.else.{}:", seq)?;
                self.gen_node(els)?;
                writeln!(&mut self.output, ".L.end.{}:", seq)?;
                Ok(())
            }

            NodeKind::Funcall { name, args } => self.gen_funcall(node, name, args),

            NodeKind::StmtExpr(body) => {
                for n in body {
                    self.gen_node(n)?;
                }
                Ok(())
            }

            NodeKind::Add(lhs, rhs) => {
                let ty = Rc::clone(self.ty_of(node)?);
                self.gen_binary(BinOp::Add, lhs, rhs, &ty, node.loc)
            }
            NodeKind::Sub(lhs, rhs) => {
                let ty = Rc::clone(self.ty_of(node)?);
                self.gen_binary(BinOp::Sub, lhs, rhs, &ty, node.loc)
            }
            NodeKind::Mul(lhs, rhs) => {
                let ty = Rc::clone(self.ty_of(node)?);
                self.gen_binary(BinOp::Mul, lhs, rhs, &ty, node.loc)
            }
            NodeKind::Div(lhs, rhs) => {
                let ty = Rc::clone(self.ty_of(node)?);
                self.gen_binary(BinOp::Div, lhs, rhs, &ty, node.loc)
            }
            NodeKind::Mod(lhs, rhs) => {
                let ty = Rc::clone(self.ty_of(node)?);
                self.gen_binary(BinOp::Mod, lhs, rhs, &ty, node.loc)
            }
            NodeKind::BitAnd(lhs, rhs) => {
                let ty = Rc::clone(self.ty_of(node)?);
                self.gen_binary(BinOp::BitAnd, lhs, rhs, &ty, node.loc)
            }
            NodeKind::BitOr(lhs, rhs) => {
                let ty = Rc::clone(self.ty_of(node)?);
                self.gen_binary(BinOp::BitOr, lhs, rhs, &ty, node.loc)
            }
            NodeKind::BitXor(lhs, rhs) => {
                let ty = Rc::clone(self.ty_of(node)?);
                self.gen_binary(BinOp::BitXor, lhs, rhs, &ty, node.loc)
            }
            NodeKind::Shl(lhs, rhs) => {
                let ty = Rc::clone(self.ty_of(node)?);
                self.gen_binary(BinOp::Shl, lhs, rhs, &ty, node.loc)
            }
            NodeKind::Shr(lhs, rhs) => {
                let ty = Rc::clone(self.ty_of(node)?);
                self.gen_binary(BinOp::Shr, lhs, rhs, &ty, node.loc)
            }
            NodeKind::Eq(lhs, rhs) => {
                let ty = Rc::clone(self.ty_of(node)?);
                self.gen_binary(BinOp::Eq, lhs, rhs, &ty, node.loc)
            }
            NodeKind::Ne(lhs, rhs) => {
                let ty = Rc::clone(self.ty_of(node)?);
                self.gen_binary(BinOp::Ne, lhs, rhs, &ty, node.loc)
            }
            NodeKind::Lt(lhs, rhs) => {
                let ty = Rc::clone(self.ty_of(node)?);
                self.gen_binary(BinOp::Lt, lhs, rhs, &ty, node.loc)
            }
            NodeKind::Le(lhs, rhs) => {
                let ty = Rc::clone(self.ty_of(node)?);
                self.gen_binary(BinOp::Le, lhs, rhs, &ty, node.loc)
            }

            NodeKind::Sizeof(_) | NodeKind::SizeofType(_) => Err(CodeGenError::Logic(
                "internal: sizeof survived decoration".to_string(),
            )),

            NodeKind::Return(e) => self.gen_return(e.as_deref()),
            NodeKind::If { cond, then, els } => self.gen_if(cond, then, els.as_deref()),
            NodeKind::While { cond, then } => self.gen_while(cond, then),
            NodeKind::DoWhile { then, cond } => self.gen_do(then, cond),
            NodeKind::For {
                init,
                cond,
                inc,
                then,
            } => self.gen_for(init.as_deref(), cond.as_deref(), inc.as_deref(), then),
            NodeKind::Block(body) => {
                for n in body {
                    self.gen_node(n)?;
                }
                Ok(())
            }
            NodeKind::Switch {
                cond,
                body,
                cases,
                default_id,
            } => self.gen_switch(cond, body, cases, *default_id),
            NodeKind::Case { id, stmt, .. } | NodeKind::DefaultCase { id, stmt } => {
                writeln!(&mut self.output, ".L.case.{}:", id)?;
                self.gen_node(stmt)
            }
            NodeKind::Break => self.gen_break(node.loc),
            NodeKind::Continue => self.gen_continue(node.loc),
            NodeKind::Goto(name) => {
                writeln!(
                    &mut self.output,
                    "  jmp .L.label.{}.{}",
                    self.funcname, name
                )?;
                Ok(())
            }
            NodeKind::Label { name, stmt } => {
                writeln!(&mut self.output, ".L.label.{}.{}:", self.funcname, name)?;
                self.gen_node(stmt)
            }
        }
    }
}
