//! AST dump for `--dump-ast`
//!
//! Renders the decorated program to stderr: globals first, then one tree
//! per function with two-space indentation and a `KIND : type` line per
//! node. Meant for eyeballing what the parser and decorator produced, not
//! for machine consumption.

use crate::ast::{Function, InitValue, Node, NodeKind, Program, VarRef};
use crate::types::{TypeKind, TypeRef};

pub fn print_program(prog: &Program) {
    eprintln!("--------------------------------");
    for var in &prog.globals {
        print_global(var);
    }
    eprintln!("--------------------------------");
    for f in &prog.fns {
        print_function(f);
    }
    eprintln!("--------------------------------");
}

fn type_name(ty: &Option<TypeRef>) -> String {
    match ty {
        None => "N/A".to_string(),
        Some(ty) => type_name_of(ty),
    }
}

fn type_name_of(ty: &TypeRef) -> String {
    let t = ty.borrow();
    match t.kind {
        TypeKind::Void => "void".to_string(),
        TypeKind::Bool => "bool".to_string(),
        TypeKind::Char => "char".to_string(),
        TypeKind::Short => "short".to_string(),
        TypeKind::Int => "int".to_string(),
        TypeKind::Long => "long".to_string(),
        TypeKind::Enum => "enum".to_string(),
        TypeKind::Ptr => format!("{}*", type_name_of(t.base.as_ref().unwrap())),
        TypeKind::Array => format!("{}[]", type_name_of(t.base.as_ref().unwrap())),
        TypeKind::Struct => "struct".to_string(),
        TypeKind::Func => "func".to_string(),
    }
}

fn escaped(bytes: &[u8]) -> String {
    let mut out = String::new();
    for &b in bytes {
        match b {
            0x07 => out.push_str("\\a"),
            0x08 => out.push_str("\\b"),
            b'\t' => out.push_str("\\t"),
            b'\n' => out.push_str("\\n"),
            0x0b => out.push_str("\\v"),
            0x0c => out.push_str("\\f"),
            b'\r' => out.push_str("\\r"),
            0x1b => out.push_str("\\e"),
            0 => out.push_str("\\0"),
            _ => out.push(b as char),
        }
    }
    out
}

fn print_global(var: &VarRef) {
    let v = var.borrow();
    let mut line = format!("VAR {} : {}", v.name, type_name_of(&v.ty));
    if let Some(contents) = &v.contents {
        line.push_str(&format!(" = \"{}\"", escaped(contents)));
    } else if !v.initializer.is_empty() {
        let chunks: Vec<String> = v
            .initializer
            .iter()
            .map(|iv| match iv {
                InitValue::Scalar { val, .. } => val.to_string(),
                InitValue::Label(l) => l.clone(),
                InitValue::Zero(n) => format!("zero({})", n),
            })
            .collect();
        line.push_str(&format!(" = {{{}}}", chunks.join(", ")));
    }
    eprintln!("{}", line);
}

fn print_function(f: &Function) {
    let params: Vec<String> = f
        .params
        .iter()
        .map(|p| format!("{} : {}", p.borrow().name, type_name_of(&p.borrow().ty)))
        .collect();
    eprintln!("FUN {} ({}) {{", f.name, params.join(", "));
    for node in &f.body {
        print_node(node, 2);
    }
    eprintln!("}}");
}

fn print_list(label: &str, node: &Node, depth: usize) {
    eprintln!("{:depth$}{}", "", label);
    print_node(node, depth + 2);
}

fn print_node(node: &Node, depth: usize) {
    let ty = type_name(&node.ty);
    match &node.kind {
        NodeKind::Num(v) => eprintln!("{:depth$}NUM : {} = {}", "", ty, v),
        NodeKind::Var(v) => {
            let v = v.borrow();
            if let Some(contents) = &v.contents {
                eprintln!("{:depth$}STR : {} = \"{}\"", "", ty, escaped(contents));
            } else {
                eprintln!("{:depth$}VAR {} : {}", "", v.name, ty);
            }
        }
        NodeKind::Member { lhs, name, .. } => {
            eprintln!("{:depth$}MEMBER {} : {} [", "", name, ty);
            print_node(lhs, depth + 2);
            eprintln!("{:depth$}]", "");
        }
        NodeKind::Funcall { name, args } => {
            eprintln!("{:depth$}FUNCALL {} : {} [", "", name, ty);
            for arg in args {
                print_node(arg, depth + 2);
            }
            eprintln!("{:depth$}]", "");
        }
        NodeKind::StmtExpr(body) => {
            eprintln!("{:depth$}STMT_EXPR : {} [", "", ty);
            for n in body {
                print_node(n, depth + 2);
            }
            eprintln!("{:depth$}]", "");
        }

        NodeKind::Add(l, r) => print_binary("ADD", l, r, &ty, depth),
        NodeKind::Sub(l, r) => print_binary("SUB", l, r, &ty, depth),
        NodeKind::Mul(l, r) => print_binary("MUL", l, r, &ty, depth),
        NodeKind::Div(l, r) => print_binary("DIV", l, r, &ty, depth),
        NodeKind::Mod(l, r) => print_binary("MOD", l, r, &ty, depth),
        NodeKind::BitAnd(l, r) => print_binary("BITAND", l, r, &ty, depth),
        NodeKind::BitOr(l, r) => print_binary("BITOR", l, r, &ty, depth),
        NodeKind::BitXor(l, r) => print_binary("BITXOR", l, r, &ty, depth),
        NodeKind::Shl(l, r) => print_binary("SHL", l, r, &ty, depth),
        NodeKind::Shr(l, r) => print_binary("SHR", l, r, &ty, depth),
        NodeKind::Eq(l, r) => print_binary("EQ", l, r, &ty, depth),
        NodeKind::Ne(l, r) => print_binary("NE", l, r, &ty, depth),
        NodeKind::Lt(l, r) => print_binary("LT", l, r, &ty, depth),
        NodeKind::Le(l, r) => print_binary("LE", l, r, &ty, depth),
        NodeKind::LogAnd(l, r) => print_binary("LOGAND", l, r, &ty, depth),
        NodeKind::LogOr(l, r) => print_binary("LOGOR", l, r, &ty, depth),
        NodeKind::Comma(l, r) => print_binary("COMMA", l, r, &ty, depth),
        NodeKind::Assign(l, r) => print_binary("ASSIGN", l, r, &ty, depth),
        NodeKind::AddAssign(l, r) => print_binary("A_ADD", l, r, &ty, depth),
        NodeKind::SubAssign(l, r) => print_binary("A_SUB", l, r, &ty, depth),
        NodeKind::MulAssign(l, r) => print_binary("A_MUL", l, r, &ty, depth),
        NodeKind::DivAssign(l, r) => print_binary("A_DIV", l, r, &ty, depth),
        NodeKind::ShlAssign(l, r) => print_binary("A_SHL", l, r, &ty, depth),
        NodeKind::ShrAssign(l, r) => print_binary("A_SHR", l, r, &ty, depth),

        NodeKind::Ternary { cond, then, els } => {
            eprintln!("{:depth$}TERNARY : {} [", "", ty);
            print_list("COND", cond, depth + 2);
            print_list("THEN", then, depth + 2);
            print_list("ELSE", els, depth + 2);
            eprintln!("{:depth$}]", "");
        }

        NodeKind::Addr(e) => print_unary("ADDR", e, &ty, depth),
        NodeKind::Deref(e) => print_unary("DEREF", e, &ty, depth),
        NodeKind::Not(e) => print_unary("NOT", e, &ty, depth),
        NodeKind::BitNot(e) => print_unary("BITNOT", e, &ty, depth),
        NodeKind::PreInc(e) => print_unary("PRE_INC", e, &ty, depth),
        NodeKind::PreDec(e) => print_unary("PRE_DEC", e, &ty, depth),
        NodeKind::PostInc(e) => print_unary("POST_INC", e, &ty, depth),
        NodeKind::PostDec(e) => print_unary("POST_DEC", e, &ty, depth),
        NodeKind::Cast(e) => print_unary("CAST", e, &ty, depth),
        NodeKind::Sizeof(e) => print_unary("SIZEOF", e, &ty, depth),
        NodeKind::SizeofType(_) => eprintln!("{:depth$}SIZEOF : {}", "", ty),

        NodeKind::ExprStmt(e) => print_unary("EXPR_STMT", e, &ty, depth),
        NodeKind::Return(e) => {
            eprintln!("{:depth$}RETURN", "");
            if let Some(e) = e {
                print_node(e, depth + 2);
            }
        }
        NodeKind::If { cond, then, els } => {
            eprintln!("{:depth$}IF [", "");
            print_list("COND", cond, depth + 2);
            print_list("THEN", then, depth + 2);
            if let Some(els) = els {
                print_list("ELSE", els, depth + 2);
            }
            eprintln!("{:depth$}]", "");
        }
        NodeKind::While { cond, then } => {
            eprintln!("{:depth$}WHILE [", "");
            print_list("COND", cond, depth + 2);
            print_list("BODY", then, depth + 2);
            eprintln!("{:depth$}]", "");
        }
        NodeKind::DoWhile { then, cond } => {
            eprintln!("{:depth$}DO [", "");
            print_list("BODY", then, depth + 2);
            print_list("COND", cond, depth + 2);
            eprintln!("{:depth$}]", "");
        }
        NodeKind::For {
            init,
            cond,
            inc,
            then,
        } => {
            eprintln!("{:depth$}FOR [", "");
            if let Some(n) = init {
                print_list("INIT", n, depth + 2);
            }
            if let Some(n) = cond {
                print_list("COND", n, depth + 2);
            }
            if let Some(n) = inc {
                print_list("INC", n, depth + 2);
            }
            print_list("BODY", then, depth + 2);
            eprintln!("{:depth$}]", "");
        }
        NodeKind::Block(body) => {
            eprintln!("{:depth$}BLOCK [", "");
            for n in body {
                print_node(n, depth + 2);
            }
            eprintln!("{:depth$}]", "");
        }
        NodeKind::Switch { cond, body, .. } => {
            eprintln!("{:depth$}SWITCH [", "");
            print_list("COND", cond, depth + 2);
            print_list("BODY", body, depth + 2);
            eprintln!("{:depth$}]", "");
        }
        NodeKind::Case { val, stmt, .. } => {
            eprintln!("{:depth$}CASE {} [", "", val);
            print_node(stmt, depth + 2);
            eprintln!("{:depth$}]", "");
        }
        NodeKind::DefaultCase { stmt, .. } => {
            eprintln!("{:depth$}DEFAULT [", "");
            print_node(stmt, depth + 2);
            eprintln!("{:depth$}]", "");
        }
        NodeKind::Break => eprintln!("{:depth$}BREAK", ""),
        NodeKind::Continue => eprintln!("{:depth$}CONTINUE", ""),
        NodeKind::Goto(name) => eprintln!("{:depth$}GOTO {}", "", name),
        NodeKind::Label { name, stmt } => {
            eprintln!("{:depth$}LABEL {} [", "", name);
            print_node(stmt, depth + 2);
            eprintln!("{:depth$}]", "");
        }
        NodeKind::Null => eprintln!("{:depth$}NULL", ""),
    }
}

fn print_binary(name: &str, lhs: &Node, rhs: &Node, ty: &str, depth: usize) {
    eprintln!("{:depth$}{} : {} = [", "", name, ty);
    print_node(lhs, depth + 2);
    print_node(rhs, depth + 2);
    eprintln!("{:depth$}]", "");
}

fn print_unary(name: &str, operand: &Node, ty: &str, depth: usize) {
    eprintln!("{:depth$}{} : {}", "", name, ty);
    print_node(operand, depth + 2);
}
