//! Recursive-descent parser
//!
//! Top-down with one token of lookahead, plus cursor save/restore in the
//! places that genuinely need it: telling a function definition from a
//! global variable, telling a cast from a parenthesized expression, and the
//! throwaway pass over a nested declarator.
//!
//! The parser owns all the mutable compilation state for its phase: the
//! token cursor, the variable and tag scope stacks, the per-function locals
//! list, the globals list (which also collects string literals and
//! block-scoped statics as anonymous globals), and the context stack that
//! wires `case` labels to their enclosing `switch`.
//!
//! Scopes are restored by snapshot: entering a block records the lengths of
//! both scope stacks, leaving truncates them back, which pops everything
//! declared inside.

use crate::ast::{Function, InitValue, Node, NodeKind, Program, Var, VarRef};
use crate::diag::SourceMap;
use crate::lexer::{Token, TokenKind};
use crate::types::{
    Member, TypeKind, TypeRef, array_of, bool_type, char_type, enum_type, func_type, int_type,
    kind_of, long_type, pointer_to, short_type, size_of, struct_type, void_type,
};
use std::cell::RefCell;
use std::rc::Rc;

/// Storage-class specifiers seen in a declaration. Returned beside the type
/// rather than riding on the shared type record, so stripping them cannot
/// corrupt other uses of the same handle.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageClass {
    pub is_typedef: bool,
    pub is_static: bool,
}

/// One binding in the variable scope.
enum ScopeEntry {
    Var(VarRef),
    TypeDef(TypeRef),
    EnumConst(i64),
}

struct VarScope {
    name: String,
    depth: usize,
    entry: ScopeEntry,
}

struct TagScope {
    name: String,
    depth: usize,
    ty: TypeRef,
}

#[derive(Default)]
struct SwitchCtx {
    cases: Vec<(usize, i64)>,
    default_id: Option<usize>,
}

/// Evaluated global initializer: a constant or the address of a global.
enum GvarInit {
    Val(i64),
    Label(String),
}

/// Designator path while lowering a local initializer.
enum Desg {
    Index(i64),
    Member(Member),
}

pub struct Parser {
    src: Rc<SourceMap>,
    tokens: Vec<Token>,
    pos: usize,

    locals: Vec<VarRef>,
    globals: Vec<VarRef>,

    var_scope: Vec<VarScope>,
    tag_scope: Vec<TagScope>,
    scope_depth: usize,

    /// Innermost-last stack of open switch statements.
    switches: Vec<SwitchCtx>,
    /// Landing-pad ids for case/default, unique per compilation.
    next_case_id: usize,
    /// Counter behind `.L.data.N` labels.
    label_count: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, src: Rc<SourceMap>) -> Parser {
        Parser {
            src,
            tokens,
            pos: 0,
            locals: Vec::new(),
            globals: Vec::new(),
            var_scope: Vec::new(),
            tag_scope: Vec::new(),
            scope_depth: 0,
            switches: Vec::new(),
            next_case_id: 0,
            label_count: 0,
        }
    }

    // ------------------------------------------------------------------
    // Token cursor helpers
    // ------------------------------------------------------------------

    fn cur(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn at_eof(&self) -> bool {
        self.cur().kind == TokenKind::Eof
    }

    fn error_at(&self, loc: usize, msg: &str) -> String {
        self.src.error_at(loc, msg)
    }

    fn error_here(&self, msg: &str) -> String {
        self.error_at(self.cur().loc, msg)
    }

    /// True if the current token is the reserved word `s`; does not advance.
    fn peek(&self, s: &str) -> bool {
        self.cur().kind == TokenKind::Reserved && self.cur().text == s
    }

    /// Advance past the reserved word `s` if it is next, returning its
    /// location.
    fn consume(&mut self, s: &str) -> Option<usize> {
        if self.peek(s) {
            let loc = self.cur().loc;
            self.pos += 1;
            Some(loc)
        } else {
            None
        }
    }

    fn expect(&mut self, s: &str) -> Result<usize, String> {
        self.consume(s)
            .ok_or_else(|| self.error_here(&format!("expected '{}'", s)))
    }

    fn consume_ident(&mut self) -> Option<(String, usize)> {
        if self.cur().kind == TokenKind::Ident {
            let tok = (self.cur().text.clone(), self.cur().loc);
            self.pos += 1;
            Some(tok)
        } else {
            None
        }
    }

    fn expect_ident(&mut self) -> Result<(String, usize), String> {
        self.consume_ident()
            .ok_or_else(|| self.error_here("expected an identifier"))
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    fn enter_scope(&mut self) -> (usize, usize) {
        self.scope_depth += 1;
        (self.var_scope.len(), self.tag_scope.len())
    }

    fn leave_scope(&mut self, snapshot: (usize, usize)) {
        self.var_scope.truncate(snapshot.0);
        self.tag_scope.truncate(snapshot.1);
        self.scope_depth -= 1;
    }

    fn push_scope(&mut self, name: String, entry: ScopeEntry) {
        self.var_scope.push(VarScope {
            name,
            depth: self.scope_depth,
            entry,
        });
    }

    fn find_scope(&self, name: &str) -> Option<&ScopeEntry> {
        self.var_scope
            .iter()
            .rev()
            .find(|sc| sc.name == name)
            .map(|sc| &sc.entry)
    }

    fn find_typedef(&self, name: &str) -> Option<TypeRef> {
        match self.find_scope(name) {
            Some(ScopeEntry::TypeDef(ty)) => Some(Rc::clone(ty)),
            _ => None,
        }
    }

    fn find_tag(&self, name: &str) -> Option<&TagScope> {
        self.tag_scope.iter().rev().find(|sc| sc.name == name)
    }

    fn push_tag(&mut self, name: String, ty: TypeRef) {
        self.tag_scope.push(TagScope {
            name,
            depth: self.scope_depth,
            ty,
        });
    }

    // ------------------------------------------------------------------
    // Variables
    // ------------------------------------------------------------------

    fn new_var(name: &str, ty: TypeRef, loc: usize, is_local: bool) -> VarRef {
        Rc::new(RefCell::new(Var {
            name: name.to_string(),
            ty,
            loc,
            is_local,
            offset: 0,
            initializer: Vec::new(),
            contents: None,
        }))
    }

    fn new_lvar(&mut self, name: &str, ty: TypeRef, loc: usize) -> VarRef {
        let var = Self::new_var(name, ty, loc, true);
        self.locals.push(Rc::clone(&var));
        self.push_scope(name.to_string(), ScopeEntry::Var(Rc::clone(&var)));
        var
    }

    fn new_gvar(&mut self, name: &str, ty: TypeRef, loc: usize, emit: bool) -> VarRef {
        let var = Self::new_var(name, ty, loc, false);
        if emit {
            self.globals.push(Rc::clone(&var));
        }
        self.push_scope(name.to_string(), ScopeEntry::Var(Rc::clone(&var)));
        var
    }

    /// Label for an anonymous global (string literal or block-scoped
    /// static).
    fn new_label(&mut self) -> String {
        let label = format!(".L.data.{}", self.label_count);
        self.label_count += 1;
        label
    }

    fn size_of_at(&self, ty: &TypeRef, loc: usize) -> Result<i64, String> {
        size_of(ty).map_err(|e| self.error_at(loc, &e))
    }

    // ------------------------------------------------------------------
    // Program
    // ------------------------------------------------------------------

    /// program = (global-var | function)*
    pub fn parse(&mut self) -> Result<Program, String> {
        let mut fns = Vec::new();
        while !self.at_eof() {
            if self.is_function() {
                if let Some(f) = self.function()? {
                    fns.push(f);
                }
            } else {
                self.global_var()?;
            }
        }
        Ok(Program {
            globals: std::mem::take(&mut self.globals),
            fns,
        })
    }

    /// Whether a function definition or declaration starts here: a type
    /// specifier, then an identifier directly followed by `(`.
    ///
    /// This scans tokens without semantic actions and rewinds, so a struct
    /// body in the specifier is not registered twice (the real parse would
    /// then see its own speculative tag as a redefinition).
    fn is_function(&mut self) -> bool {
        let save = self.pos;
        let found = self.scan_function_intro();
        self.pos = save;
        found
    }

    fn scan_function_intro(&mut self) -> bool {
        if !self.is_typename() {
            return false;
        }
        while self.is_typename() {
            if self.consume("typedef").is_some() || self.consume("static").is_some() {
                continue;
            }
            if self.peek("struct") || self.peek("enum") {
                self.pos += 1;
                self.consume_ident();
                if self.peek("{") && !self.skip_braces() {
                    return false;
                }
                continue;
            }
            // Builtin keyword or typedef name: one token either way.
            self.pos += 1;
        }
        while self.consume("*").is_some() {}
        self.consume_ident().is_some() && self.peek("(")
    }

    /// Skip a balanced brace group starting at the current `{`.
    fn skip_braces(&mut self) -> bool {
        let mut depth = 0;
        while !self.at_eof() {
            if self.peek("{") {
                depth += 1;
            } else if self.peek("}") {
                depth -= 1;
                if depth == 0 {
                    self.pos += 1;
                    return true;
                }
            }
            self.pos += 1;
        }
        false
    }

    /// function = basetype declarator "(" params? ")" ("{" stmt* "}" | ";")
    ///
    /// The function is bound in the variable scope before the body is
    /// parsed so recursive calls resolve. Returns None for a prototype.
    fn function(&mut self) -> Result<Option<Function>, String> {
        self.locals.clear();

        let (ty, sclass) = self.basetype()?;
        let (ret_ty, name, name_loc) = self.declarator(ty)?;

        self.new_gvar(&name, func_type(ret_ty), name_loc, false);

        self.expect("(")?;
        let snapshot = self.enter_scope();
        let params = self.read_func_params()?;

        if self.consume(";").is_some() {
            // Prototype; nothing to emit.
            self.leave_scope(snapshot);
            return Ok(None);
        }

        self.expect("{")?;
        let mut body = Vec::new();
        while self.consume("}").is_none() {
            body.push(self.stmt()?);
        }
        self.leave_scope(snapshot);

        Ok(Some(Function {
            name,
            is_static: sclass.is_static,
            params,
            body,
            locals: std::mem::take(&mut self.locals),
            stack_size: 0,
        }))
    }

    fn read_func_params(&mut self) -> Result<Vec<VarRef>, String> {
        if self.consume(")").is_some() {
            return Ok(Vec::new());
        }

        let mut params = vec![self.read_func_param()?];
        while self.consume(")").is_none() {
            self.expect(",")?;
            if params.len() == 6 {
                return Err(self.error_here("too many parameters"));
            }
            params.push(self.read_func_param()?);
        }
        Ok(params)
    }

    fn read_func_param(&mut self) -> Result<VarRef, String> {
        let (ty, _) = self.basetype()?;
        let (ty, name, loc) = self.declarator(ty)?;
        Ok(self.new_lvar(&name, ty, loc))
    }

    /// global-var = basetype (";" | declarator ("=" gvar-initializer)? ";")
    fn global_var(&mut self) -> Result<(), String> {
        let (ty, sclass) = self.basetype()?;

        // `struct S { ... };` or `enum E { ... };` declares only the tag.
        if self.consume(";").is_some() {
            return Ok(());
        }

        let (ty, name, name_loc) = self.declarator(ty)?;

        if sclass.is_typedef {
            self.expect(";")?;
            self.push_scope(name, ScopeEntry::TypeDef(ty));
            return Ok(());
        }

        if kind_of(&ty) == TypeKind::Void {
            return Err(self.error_at(name_loc, "variable declared void"));
        }

        let var = self.new_gvar(&name, Rc::clone(&ty), name_loc, true);
        if self.consume("=").is_some() {
            let init = self.gvar_initializer(&ty)?;
            var.borrow_mut().initializer = init;
        }
        self.expect(";")?;

        if ty.borrow().is_incomplete {
            return Err(self.error_at(name_loc, "incomplete type"));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Type specifiers and declarators
    // ------------------------------------------------------------------

    /// Whether the current token can begin a declaration.
    fn is_typename(&self) -> bool {
        const TYPE_KEYWORDS: &[&str] = &[
            "void", "_Bool", "char", "short", "int", "long", "enum", "struct", "typedef", "static",
        ];
        match self.cur().kind {
            TokenKind::Reserved => TYPE_KEYWORDS.contains(&self.cur().text.as_str()),
            TokenKind::Ident => self.find_typedef(&self.cur().text).is_some(),
            _ => false,
        }
    }

    /// basetype = storage* (builtin+ | struct-decl | enum-specifier |
    /// typedef-name)
    ///
    /// Integral keywords accumulate into a counter so that combinations
    /// like `short int`, `long int` and `long long` map onto one canonical
    /// type, and anything else is rejected.
    fn basetype(&mut self) -> Result<(TypeRef, StorageClass), String> {
        if !self.is_typename() {
            return Err(self.error_here("typename expected"));
        }

        const VOID: u32 = 1 << 0;
        const BOOL: u32 = 1 << 2;
        const CHAR: u32 = 1 << 4;
        const SHORT: u32 = 1 << 6;
        const INT: u32 = 1 << 8;
        const LONG: u32 = 1 << 10;
        const OTHER: u32 = 1 << 12;
        const SHORT_INT: u32 = SHORT + INT;
        const LONG_INT: u32 = LONG + INT;
        const LONG_LONG: u32 = LONG + LONG;
        const LONG_LONG_INT: u32 = LONG + LONG + INT;

        let mut ty = int_type();
        let mut counter = 0u32;
        let mut sclass = StorageClass::default();

        while self.is_typename() {
            if self.consume("typedef").is_some() {
                sclass.is_typedef = true;
                continue;
            }
            if self.consume("static").is_some() {
                sclass.is_static = true;
                continue;
            }

            // struct, enum, and typedef names do not combine with the
            // integral keywords.
            if self.peek("struct") || self.peek("enum") || self.cur().kind == TokenKind::Ident {
                if counter != 0 {
                    break;
                }
                if self.peek("struct") {
                    ty = self.struct_decl()?;
                } else if self.peek("enum") {
                    ty = self.enum_specifier()?;
                } else {
                    ty = self.find_typedef(&self.cur().text).unwrap();
                    self.pos += 1;
                }
                counter += OTHER;
                continue;
            }

            let loc = self.cur().loc;
            if self.consume("void").is_some() {
                counter += VOID;
            } else if self.consume("_Bool").is_some() {
                counter += BOOL;
            } else if self.consume("char").is_some() {
                counter += CHAR;
            } else if self.consume("short").is_some() {
                counter += SHORT;
            } else if self.consume("int").is_some() {
                counter += INT;
            } else if self.consume("long").is_some() {
                counter += LONG;
            }

            ty = match counter {
                VOID => void_type(),
                BOOL => bool_type(),
                CHAR => char_type(),
                SHORT | SHORT_INT => short_type(),
                INT => int_type(),
                LONG | LONG_INT | LONG_LONG | LONG_LONG_INT => long_type(),
                OTHER => continue,
                _ => return Err(self.error_at(loc, "invalid type")),
            };
        }

        Ok((ty, sclass))
    }

    /// declarator = "*"* ("(" declarator ")" | ident) type-suffix
    ///
    /// A nested declarator binds a not-yet-known inner wrapping: the suffix
    /// after the parentheses applies underneath the wrappings inside them.
    /// First a throwaway parse finds the closing paren, then the suffix is
    /// applied to the outer type, then the inner declarator is re-parsed
    /// against the finished type.
    fn declarator(&mut self, mut ty: TypeRef) -> Result<(TypeRef, String, usize), String> {
        while self.consume("*").is_some() {
            ty = pointer_to(ty);
        }

        if self.consume("(").is_some() {
            let start = self.pos;
            self.declarator(int_type())?;
            self.expect(")")?;
            let ty = self.type_suffix(ty)?;
            let end = self.pos;

            self.pos = start;
            let result = self.declarator(ty)?;
            self.expect(")")?;
            self.pos = end;
            return Ok(result);
        }

        let (name, loc) = self.expect_ident()?;
        let ty = self.type_suffix(ty)?;
        Ok((ty, name, loc))
    }

    /// abstract-declarator = "*"* ("(" abstract-declarator ")")? type-suffix
    fn abstract_declarator(&mut self, mut ty: TypeRef) -> Result<TypeRef, String> {
        while self.consume("*").is_some() {
            ty = pointer_to(ty);
        }

        if self.consume("(").is_some() {
            let start = self.pos;
            self.abstract_declarator(int_type())?;
            self.expect(")")?;
            let ty = self.type_suffix(ty)?;
            let end = self.pos;

            self.pos = start;
            let result = self.abstract_declarator(ty)?;
            self.expect(")")?;
            self.pos = end;
            return Ok(result);
        }

        self.type_suffix(ty)
    }

    /// type-suffix = ("[" const-expr? "]")*
    fn type_suffix(&mut self, base: TypeRef) -> Result<TypeRef, String> {
        let Some(loc) = self.consume("[") else {
            return Ok(base);
        };

        let mut len = 0;
        let mut is_incomplete = true;
        if self.consume("]").is_none() {
            len = self.const_expr()?;
            is_incomplete = false;
            self.expect("]")?;
        }

        let base = self.type_suffix(base)?;
        if base.borrow().is_incomplete {
            return Err(self.error_at(loc, "incomplete element type"));
        }
        let arr = array_of(base, len);
        arr.borrow_mut().is_incomplete = is_incomplete;
        Ok(arr)
    }

    /// type-name = basetype abstract-declarator
    fn type_name(&mut self) -> Result<TypeRef, String> {
        let (ty, _) = self.basetype()?;
        self.abstract_declarator(ty)
    }

    /// struct-decl = "struct" ident? ("{" struct-member* "}")?
    ///
    /// A tag used before its body installs an incomplete struct so pointers
    /// can reference it. The body completes the existing record in place,
    /// preserving identity for everything that already points at it.
    fn struct_decl(&mut self) -> Result<TypeRef, String> {
        self.expect("struct")?;
        let tag = self.consume_ident();

        if let Some((name, loc)) = &tag {
            if !self.peek("{") {
                if let Some(sc) = self.find_tag(name) {
                    if kind_of(&sc.ty) != TypeKind::Struct {
                        return Err(self.error_at(*loc, "not a struct tag"));
                    }
                    return Ok(Rc::clone(&sc.ty));
                }
                let ty = struct_type();
                self.push_tag(name.clone(), Rc::clone(&ty));
                return Ok(ty);
            }
        }

        self.expect("{")?;
        let brace_loc = self.tokens[self.pos - 1].loc;
        let mut members = Vec::new();
        while self.consume("}").is_none() {
            members.push(self.struct_member()?);
        }
        if members.is_empty() {
            return Err(self.error_at(brace_loc, "struct has no members"));
        }

        // Lay out the members: each offset rounded up to the member's
        // alignment, struct alignment = max member alignment.
        let mut offset = 0;
        let mut align = 1;
        for mem in &mut members {
            let sz = self.size_of_at(&mem.ty, mem.loc)?;
            let a = mem.ty.borrow().align;
            offset = crate::types::align_to(offset, a);
            mem.offset = offset;
            offset += sz;
            if a > align {
                align = a;
            }
        }

        if let Some((name, loc)) = tag {
            // Completing a tag declared at this depth mutates the shared
            // record; a completed tag at this depth cannot be redefined.
            let existing = self
                .find_tag(&name)
                .filter(|sc| sc.depth == self.scope_depth)
                .map(|sc| Rc::clone(&sc.ty));
            if let Some(ety) = existing {
                if kind_of(&ety) != TypeKind::Struct {
                    return Err(self.error_at(loc, "not a struct tag"));
                }
                if !ety.borrow().is_incomplete {
                    return Err(self.error_at(loc, "redefinition of struct"));
                }
                {
                    let mut t = ety.borrow_mut();
                    t.members = members;
                    t.align = align;
                    t.is_incomplete = false;
                }
                return Ok(ety);
            }

            let ty = struct_type();
            {
                let mut t = ty.borrow_mut();
                t.members = members;
                t.align = align;
                t.is_incomplete = false;
            }
            self.push_tag(name, Rc::clone(&ty));
            return Ok(ty);
        }

        let ty = struct_type();
        {
            let mut t = ty.borrow_mut();
            t.members = members;
            t.align = align;
            t.is_incomplete = false;
        }
        Ok(ty)
    }

    /// struct-member = basetype declarator ";"
    fn struct_member(&mut self) -> Result<Member, String> {
        let (ty, _) = self.basetype()?;
        let (ty, name, loc) = self.declarator(ty)?;
        self.expect(";")?;
        Ok(Member {
            name,
            ty,
            offset: 0,
            loc,
        })
    }

    /// enum-specifier = "enum" ident? "{" enum-list "}" | "enum" ident
    ///
    /// Enumerators land in the variable scope as compile-time constants;
    /// the tag (if any) lands in the tag scope.
    fn enum_specifier(&mut self) -> Result<TypeRef, String> {
        self.expect("enum")?;
        let tag = self.consume_ident();

        if let Some((name, loc)) = &tag {
            if !self.peek("{") {
                let Some(sc) = self.find_tag(name) else {
                    return Err(self.error_at(*loc, "unknown enum type"));
                };
                if kind_of(&sc.ty) != TypeKind::Enum {
                    return Err(self.error_at(*loc, "not an enum tag"));
                }
                return Ok(Rc::clone(&sc.ty));
            }
        }

        self.expect("{")?;
        let ty = enum_type();
        let mut val: i64 = 0;
        loop {
            let (name, _) = self.expect_ident()?;
            if self.consume("=").is_some() {
                val = self.const_expr()?;
            }
            self.push_scope(name, ScopeEntry::EnumConst(val));
            val += 1;

            if self.consume(",").is_some() {
                if self.consume("}").is_some() {
                    break;
                }
                continue;
            }
            self.expect("}")?;
            break;
        }

        if let Some((name, loc)) = tag {
            let duplicate = self
                .find_tag(&name)
                .is_some_and(|sc| sc.depth == self.scope_depth);
            if duplicate {
                return Err(self.error_at(loc, "redefinition of enum"));
            }
            self.push_tag(name, Rc::clone(&ty));
        }
        Ok(ty)
    }

    // ------------------------------------------------------------------
    // Declarations and initializers
    // ------------------------------------------------------------------

    /// declaration = basetype (";" | declarator ("=" initializer)? ";")
    ///
    /// A declaration with an initializer lowers to a block of ordinary
    /// assignment statements; without one it is an empty statement.
    fn declaration(&mut self) -> Result<Node, String> {
        let tok_loc = self.cur().loc;
        let (ty, sclass) = self.basetype()?;

        if self.consume(";").is_some() {
            return Ok(Node::new(NodeKind::Null, tok_loc));
        }

        let (ty, name, name_loc) = self.declarator(ty)?;

        if sclass.is_typedef {
            self.expect(";")?;
            self.push_scope(name, ScopeEntry::TypeDef(ty));
            return Ok(Node::new(NodeKind::Null, tok_loc));
        }

        if kind_of(&ty) == TypeKind::Void {
            return Err(self.error_at(name_loc, "variable declared void"));
        }

        if sclass.is_static {
            // Block-scoped static: storage is an anonymous global, the name
            // is bound locally. Zero-initialized at load when no
            // initializer is given.
            let label = self.new_label();
            let var = Self::new_var(&label, Rc::clone(&ty), name_loc, false);
            self.globals.push(Rc::clone(&var));
            if self.consume("=").is_some() {
                let init = self.gvar_initializer(&ty)?;
                var.borrow_mut().initializer = init;
            }
            self.expect(";")?;
            if ty.borrow().is_incomplete {
                return Err(self.error_at(name_loc, "incomplete type"));
            }
            self.push_scope(name, ScopeEntry::Var(var));
            return Ok(Node::new(NodeKind::Null, tok_loc));
        }

        let var = self.new_lvar(&name, Rc::clone(&ty), name_loc);

        if self.consume(";").is_some() {
            if ty.borrow().is_incomplete {
                return Err(self.error_at(name_loc, "incomplete type"));
            }
            return Ok(Node::new(NodeKind::Null, tok_loc));
        }

        self.expect("=")?;
        let node = self.lvar_initializer(&var, tok_loc)?;
        self.expect(";")?;
        if ty.borrow().is_incomplete {
            return Err(self.error_at(name_loc, "incomplete type"));
        }
        Ok(node)
    }

    /// Build the lvalue a designator path points at: indexes become
    /// `*(base + i)`, members become `.name`.
    fn desg_lvalue(&self, var: &VarRef, desg: &[Desg], loc: usize) -> Node {
        let mut node = Node::new(NodeKind::Var(Rc::clone(var)), loc);
        for d in desg {
            node = match d {
                Desg::Index(i) => {
                    let add = Node::new(
                        NodeKind::Add(
                            Box::new(node),
                            Box::new(Node::new(NodeKind::Num(*i), loc)),
                        ),
                        loc,
                    );
                    Node::new(NodeKind::Deref(Box::new(add)), loc)
                }
                Desg::Member(m) => Node::new(
                    NodeKind::Member {
                        lhs: Box::new(node),
                        name: m.name.clone(),
                        member: None,
                    },
                    loc,
                ),
            };
        }
        node
    }

    fn desg_assign(&self, var: &VarRef, desg: &[Desg], rhs: Node) -> Node {
        let loc = rhs.loc;
        let lhs = self.desg_lvalue(var, desg, loc);
        let assign = Node::new(NodeKind::Assign(Box::new(lhs), Box::new(rhs)), loc);
        Node::new(NodeKind::ExprStmt(Box::new(assign)), loc)
    }

    /// Zero an element and everything below it.
    fn lvar_init_zero(
        &self,
        out: &mut Vec<Node>,
        var: &VarRef,
        ty: &TypeRef,
        desg: &mut Vec<Desg>,
        loc: usize,
    ) {
        if kind_of(ty) == TypeKind::Array {
            let (base, len) = {
                let t = ty.borrow();
                (t.base.clone().unwrap(), t.array_len)
            };
            for i in 0..len {
                desg.push(Desg::Index(i));
                self.lvar_init_zero(out, var, &base, desg, loc);
                desg.pop();
            }
            return;
        }
        out.push(self.desg_assign(var, desg, Node::new(NodeKind::Num(0), loc)));
    }

    /// lvar-initializer: lowered to a statement list via designators and
    /// wrapped in a block, so callers see one declaration statement.
    fn lvar_initializer(&mut self, var: &VarRef, loc: usize) -> Result<Node, String> {
        let ty = Rc::clone(&var.borrow().ty);
        let mut out = Vec::new();
        let mut desg = Vec::new();
        self.lvar_initializer2(&mut out, var, &ty, &mut desg)?;
        Ok(Node::new(NodeKind::Block(out), loc))
    }

    fn lvar_initializer2(
        &mut self,
        out: &mut Vec<Node>,
        var: &VarRef,
        ty: &TypeRef,
        desg: &mut Vec<Desg>,
    ) -> Result<(), String> {
        let kind = kind_of(ty);

        // `char x[] = "foo"` writes the bytes element by element,
        // including the NUL, and zero-fills any excess.
        if kind == TypeKind::Array
            && kind_of(&ty.borrow().base.clone().unwrap()) == TypeKind::Char
            && matches!(self.cur().kind, TokenKind::Str(_))
        {
            let loc = self.cur().loc;
            let TokenKind::Str(contents) = self.cur().kind.clone() else {
                unreachable!()
            };
            self.pos += 1;

            let str_len = contents.len() as i64;
            {
                let mut t = ty.borrow_mut();
                if t.is_incomplete {
                    t.array_len = str_len;
                    t.is_incomplete = false;
                }
            }
            let arr_len = ty.borrow().array_len;
            let copy_len = str_len.min(arr_len);
            for i in 0..copy_len {
                desg.push(Desg::Index(i));
                let byte = Node::new(NodeKind::Num(contents[i as usize] as i64), loc);
                out.push(self.desg_assign(var, desg, byte));
                desg.pop();
            }
            for i in copy_len..arr_len {
                desg.push(Desg::Index(i));
                out.push(self.desg_assign(var, desg, Node::new(NodeKind::Num(0), loc)));
                desg.pop();
            }
            return Ok(());
        }

        if kind == TypeKind::Array {
            self.expect("{")?;
            let (base, is_incomplete) = {
                let t = ty.borrow();
                (t.base.clone().unwrap(), t.is_incomplete)
            };

            let mut i = 0;
            if !self.peek("}") {
                loop {
                    if !is_incomplete && i >= ty.borrow().array_len {
                        return Err(self.error_here("too many initializer values"));
                    }
                    desg.push(Desg::Index(i));
                    self.lvar_initializer2(out, var, &base, desg)?;
                    desg.pop();
                    i += 1;
                    if self.peek_end() {
                        break;
                    }
                    if self.consume(",").is_none() {
                        break;
                    }
                }
            }
            self.expect_end()?;

            if is_incomplete {
                let mut t = ty.borrow_mut();
                t.array_len = i;
                t.is_incomplete = false;
            }
            // Missing elements become zero assignments.
            let len = ty.borrow().array_len;
            let loc = self.cur().loc;
            for j in i..len {
                desg.push(Desg::Index(j));
                self.lvar_init_zero(out, var, &base, desg, loc);
                desg.pop();
            }
            return Ok(());
        }

        if kind == TypeKind::Struct {
            self.expect("{")?;
            let members = ty.borrow().members.clone();

            let mut idx = 0;
            if !self.peek("}") {
                loop {
                    if idx >= members.len() {
                        return Err(self.error_here("too many initializer values"));
                    }
                    desg.push(Desg::Member(members[idx].clone()));
                    self.lvar_initializer2(out, var, &members[idx].ty.clone(), desg)?;
                    desg.pop();
                    idx += 1;
                    if self.peek_end() {
                        break;
                    }
                    if self.consume(",").is_none() {
                        break;
                    }
                }
            }
            self.expect_end()?;

            let loc = self.cur().loc;
            for mem in &members[idx..] {
                desg.push(Desg::Member(mem.clone()));
                self.lvar_init_zero(out, var, &mem.ty, desg, loc);
                desg.pop();
            }
            return Ok(());
        }

        let rhs = self.assign()?;
        out.push(self.desg_assign(var, desg, rhs));
        Ok(())
    }

    /// gvar-initializer: produces the flat chunk list emitted into `.data`.
    fn gvar_initializer(&mut self, ty: &TypeRef) -> Result<Vec<InitValue>, String> {
        let mut out = Vec::new();
        self.gvar_initializer2(&mut out, ty)?;
        Ok(out)
    }

    fn push_zero(out: &mut Vec<InitValue>, n: i64) {
        if n > 0 {
            out.push(InitValue::Zero(n));
        }
    }

    fn gvar_initializer2(
        &mut self,
        out: &mut Vec<InitValue>,
        ty: &TypeRef,
    ) -> Result<(), String> {
        let kind = kind_of(ty);

        // `char x[] = "foo"` expands to one byte per character including
        // the trailing NUL.
        if kind == TypeKind::Array
            && kind_of(&ty.borrow().base.clone().unwrap()) == TypeKind::Char
            && matches!(self.cur().kind, TokenKind::Str(_))
        {
            let TokenKind::Str(contents) = self.cur().kind.clone() else {
                unreachable!()
            };
            self.pos += 1;

            let str_len = contents.len() as i64;
            {
                let mut t = ty.borrow_mut();
                if t.is_incomplete {
                    t.array_len = str_len;
                    t.is_incomplete = false;
                }
            }
            let arr_len = ty.borrow().array_len;
            let copy_len = str_len.min(arr_len);
            for i in 0..copy_len {
                out.push(InitValue::Scalar {
                    size: 1,
                    val: contents[i as usize] as i64,
                });
            }
            Self::push_zero(out, arr_len - copy_len);
            return Ok(());
        }

        if kind == TypeKind::Array {
            let loc = self.expect("{")?;
            let (base, is_incomplete) = {
                let t = ty.borrow();
                (t.base.clone().unwrap(), t.is_incomplete)
            };
            let elem_size = self.size_of_at(&base, loc)?;

            let mut i = 0;
            if !self.peek("}") {
                loop {
                    if !is_incomplete && i >= ty.borrow().array_len {
                        return Err(self.error_here("too many initializer values"));
                    }
                    self.gvar_initializer2(out, &base)?;
                    i += 1;
                    if self.peek_end() {
                        break;
                    }
                    if self.consume(",").is_none() {
                        break;
                    }
                }
            }
            self.expect_end()?;

            if is_incomplete {
                let mut t = ty.borrow_mut();
                t.array_len = i;
                t.is_incomplete = false;
            }
            Self::push_zero(out, elem_size * (ty.borrow().array_len - i));
            return Ok(());
        }

        if kind == TypeKind::Struct {
            let loc = self.expect("{")?;
            let members = ty.borrow().members.clone();
            let total = self.size_of_at(ty, loc)?;

            let mut idx = 0;
            if !self.peek("}") {
                loop {
                    if idx >= members.len() {
                        return Err(self.error_here("too many initializer values"));
                    }
                    let mem = &members[idx];
                    self.gvar_initializer2(out, &mem.ty)?;

                    // Pad out to the next member's offset (or to the end of
                    // the struct for the last member).
                    let end = mem.offset + self.size_of_at(&mem.ty, mem.loc)?;
                    let next_off = if idx + 1 < members.len() {
                        members[idx + 1].offset
                    } else {
                        total
                    };
                    Self::push_zero(out, next_off - end);

                    idx += 1;
                    if self.peek_end() {
                        break;
                    }
                    if self.consume(",").is_none() {
                        break;
                    }
                }
            }
            self.expect_end()?;

            if idx < members.len() {
                Self::push_zero(out, total - members[idx].offset);
            }
            return Ok(());
        }

        // Scalar: a constant expression or the address of another global.
        let expr = self.conditional()?;
        let sz = self.size_of_at(ty, expr.loc)?;
        match self.eval_gvar(&expr)? {
            GvarInit::Label(label) => out.push(InitValue::Label(label)),
            GvarInit::Val(val) => out.push(InitValue::Scalar { size: sz, val }),
        }
        Ok(())
    }

    /// A global scalar initializer may be the address of another global
    /// (`&g`, or an array/function name decaying to its address); anything
    /// else must constant-fold.
    fn eval_gvar(&self, node: &Node) -> Result<GvarInit, String> {
        match &node.kind {
            NodeKind::Addr(child) => {
                if let NodeKind::Var(v) = &child.kind {
                    if !v.borrow().is_local {
                        return Ok(GvarInit::Label(v.borrow().name.clone()));
                    }
                }
                Err(self.error_at(node.loc, "invalid global initializer"))
            }
            NodeKind::Var(v)
                if !v.borrow().is_local && kind_of(&v.borrow().ty) == TypeKind::Array =>
            {
                Ok(GvarInit::Label(v.borrow().name.clone()))
            }
            _ => Ok(GvarInit::Val(self.eval(node)?)),
        }
    }

    /// True if the next tokens close the current initializer list
    /// (`}` or `,}`); does not advance.
    fn peek_end(&mut self) -> bool {
        let save = self.pos;
        let end = self.consume("}").is_some()
            || (self.consume(",").is_some() && self.consume("}").is_some());
        self.pos = save;
        end
    }

    /// Consume `}` or the trailing-comma form `,}`.
    fn expect_end(&mut self) -> Result<(), String> {
        let save = self.pos;
        if self.consume(",").is_some() && self.consume("}").is_some() {
            return Ok(());
        }
        self.pos = save;
        self.expect("}")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Constant expressions
    // ------------------------------------------------------------------

    fn const_expr(&mut self) -> Result<i64, String> {
        let node = self.conditional()?;
        self.eval(&node)
    }

    /// Fold a parsed expression to a constant. Runs before decoration, so
    /// only operators with value-level meaning are allowed.
    fn eval(&self, node: &Node) -> Result<i64, String> {
        use NodeKind::*;
        Ok(match &node.kind {
            Add(l, r) => self.eval(l)?.wrapping_add(self.eval(r)?),
            Sub(l, r) => self.eval(l)?.wrapping_sub(self.eval(r)?),
            Mul(l, r) => self.eval(l)?.wrapping_mul(self.eval(r)?),
            Div(l, r) => {
                let d = self.eval(r)?;
                if d == 0 {
                    return Err(self.error_at(node.loc, "division by zero"));
                }
                self.eval(l)?.wrapping_div(d)
            }
            Mod(l, r) => {
                let d = self.eval(r)?;
                if d == 0 {
                    return Err(self.error_at(node.loc, "division by zero"));
                }
                self.eval(l)?.wrapping_rem(d)
            }
            BitAnd(l, r) => self.eval(l)? & self.eval(r)?,
            BitOr(l, r) => self.eval(l)? | self.eval(r)?,
            BitXor(l, r) => self.eval(l)? ^ self.eval(r)?,
            Shl(l, r) => self.eval(l)?.wrapping_shl(self.eval(r)? as u32),
            Shr(l, r) => self.eval(l)?.wrapping_shr(self.eval(r)? as u32),
            Eq(l, r) => (self.eval(l)? == self.eval(r)?) as i64,
            Ne(l, r) => (self.eval(l)? != self.eval(r)?) as i64,
            Lt(l, r) => (self.eval(l)? < self.eval(r)?) as i64,
            Le(l, r) => (self.eval(l)? <= self.eval(r)?) as i64,
            LogAnd(l, r) => (self.eval(l)? != 0 && self.eval(r)? != 0) as i64,
            LogOr(l, r) => (self.eval(l)? != 0 || self.eval(r)? != 0) as i64,
            Ternary { cond, then, els } => {
                if self.eval(cond)? != 0 {
                    self.eval(then)?
                } else {
                    self.eval(els)?
                }
            }
            Comma(_, r) => self.eval(r)?,
            Not(e) => (self.eval(e)? == 0) as i64,
            BitNot(e) => !self.eval(e)?,
            Num(v) => *v,
            _ => return Err(self.error_at(node.loc, "not a constant expression")),
        })
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn read_expr_stmt(&mut self) -> Result<Node, String> {
        let loc = self.cur().loc;
        let e = self.expr()?;
        Ok(Node::new(NodeKind::ExprStmt(Box::new(e)), loc))
    }

    fn stmt(&mut self) -> Result<Node, String> {
        if let Some(loc) = self.consume("return") {
            if self.consume(";").is_some() {
                return Ok(Node::new(NodeKind::Return(None), loc));
            }
            let e = self.expr()?;
            self.expect(";")?;
            return Ok(Node::new(NodeKind::Return(Some(Box::new(e))), loc));
        }

        if let Some(loc) = self.consume("if") {
            self.expect("(")?;
            let cond = self.expr()?;
            self.expect(")")?;
            let then = self.stmt()?;
            let els = if self.consume("else").is_some() {
                Some(Box::new(self.stmt()?))
            } else {
                None
            };
            return Ok(Node::new(
                NodeKind::If {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    els,
                },
                loc,
            ));
        }

        if let Some(loc) = self.consume("switch") {
            self.expect("(")?;
            let cond = self.expr()?;
            self.expect(")")?;

            self.switches.push(SwitchCtx::default());
            let body = self.stmt()?;
            let ctx = self.switches.pop().unwrap();

            return Ok(Node::new(
                NodeKind::Switch {
                    cond: Box::new(cond),
                    body: Box::new(body),
                    cases: ctx.cases,
                    default_id: ctx.default_id,
                },
                loc,
            ));
        }

        if let Some(loc) = self.consume("case") {
            let val = self.const_expr()?;
            self.expect(":")?;
            let stmt = self.stmt()?;

            let id = self.next_case_id;
            self.next_case_id += 1;
            match self.switches.last_mut() {
                Some(ctx) => ctx.cases.push((id, val)),
                None => return Err(self.error_at(loc, "stray case")),
            }
            return Ok(Node::new(
                NodeKind::Case {
                    id,
                    val,
                    stmt: Box::new(stmt),
                },
                loc,
            ));
        }

        if let Some(loc) = self.consume("default") {
            self.expect(":")?;
            let stmt = self.stmt()?;

            let id = self.next_case_id;
            self.next_case_id += 1;
            match self.switches.last_mut() {
                Some(ctx) => ctx.default_id = Some(id),
                None => return Err(self.error_at(loc, "stray default")),
            }
            return Ok(Node::new(
                NodeKind::DefaultCase {
                    id,
                    stmt: Box::new(stmt),
                },
                loc,
            ));
        }

        if let Some(loc) = self.consume("while") {
            self.expect("(")?;
            let cond = self.expr()?;
            self.expect(")")?;
            let then = self.stmt()?;
            return Ok(Node::new(
                NodeKind::While {
                    cond: Box::new(cond),
                    then: Box::new(then),
                },
                loc,
            ));
        }

        if let Some(loc) = self.consume("do") {
            let then = self.stmt()?;
            self.expect("while")?;
            self.expect("(")?;
            let cond = self.expr()?;
            self.expect(")")?;
            self.expect(";")?;
            return Ok(Node::new(
                NodeKind::DoWhile {
                    then: Box::new(then),
                    cond: Box::new(cond),
                },
                loc,
            ));
        }

        if let Some(loc) = self.consume("for") {
            self.expect("(")?;
            let snapshot = self.enter_scope();

            let init = if self.consume(";").is_some() {
                None
            } else if self.is_typename() {
                // Declarations in the init clause scope to the loop.
                Some(Box::new(self.declaration()?))
            } else {
                let n = self.read_expr_stmt()?;
                self.expect(";")?;
                Some(Box::new(n))
            };

            let cond = if self.consume(";").is_some() {
                None
            } else {
                let e = self.expr()?;
                self.expect(";")?;
                Some(Box::new(e))
            };

            let inc = if self.consume(")").is_some() {
                None
            } else {
                let n = self.read_expr_stmt()?;
                self.expect(")")?;
                Some(Box::new(n))
            };

            let then = self.stmt()?;
            self.leave_scope(snapshot);

            return Ok(Node::new(
                NodeKind::For {
                    init,
                    cond,
                    inc,
                    then: Box::new(then),
                },
                loc,
            ));
        }

        if let Some(loc) = self.consume("{") {
            let snapshot = self.enter_scope();
            let mut body = Vec::new();
            while self.consume("}").is_none() {
                body.push(self.stmt()?);
            }
            self.leave_scope(snapshot);
            return Ok(Node::new(NodeKind::Block(body), loc));
        }

        if let Some(loc) = self.consume("break") {
            self.expect(";")?;
            return Ok(Node::new(NodeKind::Break, loc));
        }

        if let Some(loc) = self.consume("continue") {
            self.expect(";")?;
            return Ok(Node::new(NodeKind::Continue, loc));
        }

        if let Some(loc) = self.consume("goto") {
            let (name, _) = self.expect_ident()?;
            self.expect(";")?;
            return Ok(Node::new(NodeKind::Goto(name), loc));
        }

        // Labeled statement: ident ":" stmt
        if self.cur().kind == TokenKind::Ident
            && self.tokens[self.pos + 1].kind == TokenKind::Reserved
            && self.tokens[self.pos + 1].text == ":"
        {
            let (name, loc) = self.expect_ident()?;
            self.expect(":")?;
            let stmt = self.stmt()?;
            return Ok(Node::new(
                NodeKind::Label {
                    name,
                    stmt: Box::new(stmt),
                },
                loc,
            ));
        }

        if self.is_typename() {
            return self.declaration();
        }

        let node = self.read_expr_stmt()?;
        self.expect(";")?;
        Ok(node)
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// expr = assign ("," assign)*
    fn expr(&mut self) -> Result<Node, String> {
        let mut node = self.assign()?;
        while let Some(loc) = self.consume(",") {
            let rhs = self.assign()?;
            node = Node::new(NodeKind::Comma(Box::new(node), Box::new(rhs)), loc);
        }
        Ok(node)
    }

    /// assign = conditional (assign-op assign)?
    fn assign(&mut self) -> Result<Node, String> {
        let node = self.conditional()?;

        if let Some(loc) = self.consume("=") {
            let rhs = self.assign()?;
            return Ok(Node::new(
                NodeKind::Assign(Box::new(node), Box::new(rhs)),
                loc,
            ));
        }

        macro_rules! compound {
            ($op:literal, $kind:ident) => {
                if let Some(loc) = self.consume($op) {
                    let rhs = self.assign()?;
                    return Ok(Node::new(
                        NodeKind::$kind(Box::new(node), Box::new(rhs)),
                        loc,
                    ));
                }
            };
        }
        compound!("+=", AddAssign);
        compound!("-=", SubAssign);
        compound!("*=", MulAssign);
        compound!("/=", DivAssign);
        compound!("<<=", ShlAssign);
        compound!(">>=", ShrAssign);

        Ok(node)
    }

    /// conditional = logor ("?" expr ":" conditional)?
    fn conditional(&mut self) -> Result<Node, String> {
        let cond = self.logor()?;
        let Some(loc) = self.consume("?") else {
            return Ok(cond);
        };
        let then = self.expr()?;
        self.expect(":")?;
        let els = self.conditional()?;
        Ok(Node::new(
            NodeKind::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                els: Box::new(els),
            },
            loc,
        ))
    }

    fn logor(&mut self) -> Result<Node, String> {
        let mut node = self.logand()?;
        while let Some(loc) = self.consume("||") {
            let rhs = self.logand()?;
            node = Node::new(NodeKind::LogOr(Box::new(node), Box::new(rhs)), loc);
        }
        Ok(node)
    }

    fn logand(&mut self) -> Result<Node, String> {
        let mut node = self.bitor()?;
        while let Some(loc) = self.consume("&&") {
            let rhs = self.bitor()?;
            node = Node::new(NodeKind::LogAnd(Box::new(node), Box::new(rhs)), loc);
        }
        Ok(node)
    }

    fn bitor(&mut self) -> Result<Node, String> {
        let mut node = self.bitxor()?;
        while let Some(loc) = self.consume("|") {
            let rhs = self.bitxor()?;
            node = Node::new(NodeKind::BitOr(Box::new(node), Box::new(rhs)), loc);
        }
        Ok(node)
    }

    fn bitxor(&mut self) -> Result<Node, String> {
        let mut node = self.bitand()?;
        while let Some(loc) = self.consume("^") {
            let rhs = self.bitand()?;
            node = Node::new(NodeKind::BitXor(Box::new(node), Box::new(rhs)), loc);
        }
        Ok(node)
    }

    fn bitand(&mut self) -> Result<Node, String> {
        let mut node = self.equality()?;
        while let Some(loc) = self.consume("&") {
            let rhs = self.equality()?;
            node = Node::new(NodeKind::BitAnd(Box::new(node), Box::new(rhs)), loc);
        }
        Ok(node)
    }

    /// equality = relational ("==" relational | "!=" relational)*
    fn equality(&mut self) -> Result<Node, String> {
        let mut node = self.relational()?;
        loop {
            if let Some(loc) = self.consume("==") {
                let rhs = self.relational()?;
                node = Node::new(NodeKind::Eq(Box::new(node), Box::new(rhs)), loc);
            } else if let Some(loc) = self.consume("!=") {
                let rhs = self.relational()?;
                node = Node::new(NodeKind::Ne(Box::new(node), Box::new(rhs)), loc);
            } else {
                return Ok(node);
            }
        }
    }

    /// relational = shift ("<" shift | "<=" shift | ">" shift | ">=" shift)*
    ///
    /// `>` and `>=` swap their operands onto `<` and `<=`.
    fn relational(&mut self) -> Result<Node, String> {
        let mut node = self.shift()?;
        loop {
            if let Some(loc) = self.consume("<") {
                let rhs = self.shift()?;
                node = Node::new(NodeKind::Lt(Box::new(node), Box::new(rhs)), loc);
            } else if let Some(loc) = self.consume("<=") {
                let rhs = self.shift()?;
                node = Node::new(NodeKind::Le(Box::new(node), Box::new(rhs)), loc);
            } else if let Some(loc) = self.consume(">") {
                let rhs = self.shift()?;
                node = Node::new(NodeKind::Lt(Box::new(rhs), Box::new(node)), loc);
            } else if let Some(loc) = self.consume(">=") {
                let rhs = self.shift()?;
                node = Node::new(NodeKind::Le(Box::new(rhs), Box::new(node)), loc);
            } else {
                return Ok(node);
            }
        }
    }

    fn shift(&mut self) -> Result<Node, String> {
        let mut node = self.add()?;
        loop {
            if let Some(loc) = self.consume("<<") {
                let rhs = self.add()?;
                node = Node::new(NodeKind::Shl(Box::new(node), Box::new(rhs)), loc);
            } else if let Some(loc) = self.consume(">>") {
                let rhs = self.add()?;
                node = Node::new(NodeKind::Shr(Box::new(node), Box::new(rhs)), loc);
            } else {
                return Ok(node);
            }
        }
    }

    /// add = mul ("+" mul | "-" mul)*
    fn add(&mut self) -> Result<Node, String> {
        let mut node = self.mul()?;
        loop {
            if let Some(loc) = self.consume("+") {
                let rhs = self.mul()?;
                node = Node::new(NodeKind::Add(Box::new(node), Box::new(rhs)), loc);
            } else if let Some(loc) = self.consume("-") {
                let rhs = self.mul()?;
                node = Node::new(NodeKind::Sub(Box::new(node), Box::new(rhs)), loc);
            } else {
                return Ok(node);
            }
        }
    }

    /// mul = cast ("*" cast | "/" cast | "%" cast)*
    fn mul(&mut self) -> Result<Node, String> {
        let mut node = self.cast()?;
        loop {
            if let Some(loc) = self.consume("*") {
                let rhs = self.cast()?;
                node = Node::new(NodeKind::Mul(Box::new(node), Box::new(rhs)), loc);
            } else if let Some(loc) = self.consume("/") {
                let rhs = self.cast()?;
                node = Node::new(NodeKind::Div(Box::new(node), Box::new(rhs)), loc);
            } else if let Some(loc) = self.consume("%") {
                let rhs = self.cast()?;
                node = Node::new(NodeKind::Mod(Box::new(node), Box::new(rhs)), loc);
            } else {
                return Ok(node);
            }
        }
    }

    /// cast = "(" type-name ")" cast | unary
    ///
    /// `(x)` where x is an expression rewinds and falls through to unary.
    fn cast(&mut self) -> Result<Node, String> {
        let save = self.pos;
        if let Some(loc) = self.consume("(") {
            if self.is_typename() {
                let ty = self.type_name()?;
                self.expect(")")?;
                let mut node = Node::new(NodeKind::Cast(Box::new(self.cast()?)), loc);
                node.ty = Some(ty);
                return Ok(node);
            }
            self.pos = save;
        }
        self.unary()
    }

    /// unary = ("+" | "-" | "*" | "&" | "!" | "~") cast
    ///       | ("++" | "--") unary
    ///       | postfix
    fn unary(&mut self) -> Result<Node, String> {
        if self.consume("+").is_some() {
            return self.cast();
        }
        if let Some(loc) = self.consume("-") {
            let rhs = self.cast()?;
            return Ok(Node::new(
                NodeKind::Sub(
                    Box::new(Node::new(NodeKind::Num(0), loc)),
                    Box::new(rhs),
                ),
                loc,
            ));
        }
        if let Some(loc) = self.consume("&") {
            return Ok(Node::new(NodeKind::Addr(Box::new(self.cast()?)), loc));
        }
        if let Some(loc) = self.consume("*") {
            return Ok(Node::new(NodeKind::Deref(Box::new(self.cast()?)), loc));
        }
        if let Some(loc) = self.consume("!") {
            return Ok(Node::new(NodeKind::Not(Box::new(self.cast()?)), loc));
        }
        if let Some(loc) = self.consume("~") {
            return Ok(Node::new(NodeKind::BitNot(Box::new(self.cast()?)), loc));
        }
        if let Some(loc) = self.consume("++") {
            return Ok(Node::new(NodeKind::PreInc(Box::new(self.unary()?)), loc));
        }
        if let Some(loc) = self.consume("--") {
            return Ok(Node::new(NodeKind::PreDec(Box::new(self.unary()?)), loc));
        }
        self.postfix()
    }

    /// postfix = primary ("[" expr "]" | "." ident | "->" ident | "++" | "--")*
    fn postfix(&mut self) -> Result<Node, String> {
        let mut node = self.primary()?;
        loop {
            if let Some(loc) = self.consume("[") {
                // x[y] is *(x + y)
                let idx = self.expr()?;
                self.expect("]")?;
                let add = Node::new(NodeKind::Add(Box::new(node), Box::new(idx)), loc);
                node = Node::new(NodeKind::Deref(Box::new(add)), loc);
                continue;
            }
            if let Some(loc) = self.consume(".") {
                let (name, _) = self.expect_ident()?;
                node = Node::new(
                    NodeKind::Member {
                        lhs: Box::new(node),
                        name,
                        member: None,
                    },
                    loc,
                );
                continue;
            }
            if let Some(loc) = self.consume("->") {
                // x->y is (*x).y
                let (name, _) = self.expect_ident()?;
                let deref = Node::new(NodeKind::Deref(Box::new(node)), loc);
                node = Node::new(
                    NodeKind::Member {
                        lhs: Box::new(deref),
                        name,
                        member: None,
                    },
                    loc,
                );
                continue;
            }
            if let Some(loc) = self.consume("++") {
                node = Node::new(NodeKind::PostInc(Box::new(node)), loc);
                continue;
            }
            if let Some(loc) = self.consume("--") {
                node = Node::new(NodeKind::PostDec(Box::new(node)), loc);
                continue;
            }
            return Ok(node);
        }
    }

    /// stmt-expr = "(" "{" stmt stmt* "}" ")"
    ///
    /// The value is the last statement, which must be an expression
    /// statement; its inner expression is hoisted so it leaves a value.
    fn stmt_expr(&mut self, loc: usize) -> Result<Node, String> {
        let snapshot = self.enter_scope();
        let mut body = vec![self.stmt()?];
        while self.consume("}").is_none() {
            body.push(self.stmt()?);
        }
        self.expect(")")?;
        self.leave_scope(snapshot);

        let last = body.pop().unwrap();
        match last.kind {
            NodeKind::ExprStmt(inner) => body.push(*inner),
            _ => {
                return Err(self.error_at(
                    last.loc,
                    "statement expression returning void is not supported",
                ));
            }
        }
        Ok(Node::new(NodeKind::StmtExpr(body), loc))
    }

    /// func-args = "(" (assign ("," assign)*)? ")"
    fn func_args(&mut self) -> Result<Vec<Node>, String> {
        if self.consume(")").is_some() {
            return Ok(Vec::new());
        }
        let mut args = vec![self.assign()?];
        while self.consume(",").is_some() {
            args.push(self.assign()?);
        }
        self.expect(")")?;
        Ok(args)
    }

    /// primary = "(" "{" stmt-expr | "(" expr ")" | "sizeof" sizeof-operand
    ///         | ident func-args? | str | num
    fn primary(&mut self) -> Result<Node, String> {
        if let Some(loc) = self.consume("(") {
            if self.consume("{").is_some() {
                return self.stmt_expr(loc);
            }
            let node = self.expr()?;
            self.expect(")")?;
            return Ok(node);
        }

        if let Some(loc) = self.consume("sizeof") {
            // "sizeof" "(" type-name ")" | "sizeof" unary
            let save = self.pos;
            if self.consume("(").is_some() {
                if self.is_typename() {
                    let ty = self.type_name()?;
                    self.expect(")")?;
                    return Ok(Node::new(NodeKind::SizeofType(ty), loc));
                }
                self.pos = save;
            }
            return Ok(Node::new(NodeKind::Sizeof(Box::new(self.unary()?)), loc));
        }

        if let Some((name, loc)) = self.consume_ident() {
            if self.consume("(").is_some() {
                let args = self.func_args()?;
                if args.len() > 6 {
                    return Err(self.error_at(loc, "too many arguments"));
                }
                if let Some(entry) = self.find_scope(&name) {
                    let is_func = matches!(entry, ScopeEntry::Var(v)
                        if kind_of(&v.borrow().ty) == TypeKind::Func);
                    if !is_func {
                        return Err(self.error_at(loc, "not a function"));
                    }
                }
                return Ok(Node::new(NodeKind::Funcall { name, args }, loc));
            }

            return match self.find_scope(&name) {
                Some(ScopeEntry::Var(v)) => {
                    Ok(Node::new(NodeKind::Var(Rc::clone(v)), loc))
                }
                Some(ScopeEntry::EnumConst(val)) => Ok(Node::new(NodeKind::Num(*val), loc)),
                _ => Err(self.error_at(loc, "undefined variable")),
            };
        }

        if let TokenKind::Str(contents) = &self.cur().kind {
            // A string literal is an anonymous global char array; the
            // reference is an ordinary variable node.
            let contents = contents.clone();
            let loc = self.cur().loc;
            self.pos += 1;

            let ty = array_of(char_type(), contents.len() as i64);
            let label = self.new_label();
            let var = Self::new_var(&label, ty, loc, false);
            var.borrow_mut().contents = Some(contents);
            self.globals.push(Rc::clone(&var));
            return Ok(Node::new(NodeKind::Var(var), loc));
        }

        if let TokenKind::Num(val) = self.cur().kind {
            let loc = self.cur().loc;
            self.pos += 1;
            return Ok(Node::new(NodeKind::Num(val), loc));
        }

        Err(self.error_here("expected expression"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::types::find_member;

    fn parse(input: &str) -> Result<Program, String> {
        let src = SourceMap::new("test.c", input);
        let tokens = tokenize(&src)?;
        Parser::new(tokens, src).parse()
    }

    fn parse_ok(input: &str) -> Program {
        parse(input).unwrap()
    }

    #[test]
    fn test_simple_function() {
        let prog = parse_ok("int main() { return 0; }");
        assert_eq!(prog.fns.len(), 1);
        assert_eq!(prog.fns[0].name, "main");
        assert_eq!(prog.fns[0].body.len(), 1);
        assert!(matches!(
            prog.fns[0].body[0].kind,
            NodeKind::Return(Some(_))
        ));
    }

    #[test]
    fn test_prototype_emits_nothing() {
        let prog = parse_ok("int add(int a, int b); int main() { return add(1, 2); }");
        assert_eq!(prog.fns.len(), 1);
        assert_eq!(prog.fns[0].name, "main");
    }

    #[test]
    fn test_global_and_function_discrimination() {
        let prog = parse_ok("int x; int *y; int main() { return 0; }");
        assert_eq!(prog.globals.len(), 2);
        assert_eq!(prog.fns.len(), 1);
    }

    #[test]
    fn test_undefined_variable_is_error() {
        let err = parse("int main() { return x; }").unwrap_err();
        assert!(err.contains("undefined variable"));
        assert!(err.starts_with("test.c:1:"));
    }

    #[test]
    fn test_scope_shadowing_and_restore() {
        // The inner x shadows; after the block the outer x is visible again.
        parse_ok("int main() { int x; x = 1; { int x; x = 2; } return x; }");
        // Using a block-local after the block is an error.
        let err = parse("int main() { { int y; } return y; }").unwrap_err();
        assert!(err.contains("undefined variable"));
    }

    #[test]
    fn test_nested_declarator() {
        // int (*x)[3] is a pointer to an array of 3 ints
        let prog = parse_ok("int main() { int (*x)[3]; return 0; }");
        let var = &prog.fns[0].locals[0];
        let ty = Rc::clone(&var.borrow().ty);
        assert_eq!(kind_of(&ty), TypeKind::Ptr);
        let inner = ty.borrow().base.clone().unwrap();
        assert_eq!(kind_of(&inner), TypeKind::Array);
        assert_eq!(inner.borrow().array_len, 3);

        // int *y[3] is an array of 3 pointers
        let prog = parse_ok("int main() { int *y[3]; return 0; }");
        let ty = Rc::clone(&prog.fns[0].locals[0].borrow().ty);
        assert_eq!(kind_of(&ty), TypeKind::Array);
        assert_eq!(kind_of(&ty.borrow().base.clone().unwrap()), TypeKind::Ptr);
    }

    #[test]
    fn test_typedef() {
        let prog = parse_ok("typedef int myint; int main() { myint x; x = 3; return x; }");
        assert_eq!(kind_of(&prog.fns[0].locals[0].borrow().ty), TypeKind::Int);
    }

    #[test]
    fn test_type_specifier_combinations() {
        let prog = parse_ok(
            "int main() { short int a; long int b; long long c; int d; char e; return 0; }",
        );
        let kinds: Vec<TypeKind> = prog.fns[0]
            .locals
            .iter()
            .map(|v| kind_of(&v.borrow().ty))
            .collect();
        assert_eq!(
            kinds,
            vec![
                TypeKind::Short,
                TypeKind::Long,
                TypeKind::Long,
                TypeKind::Int,
                TypeKind::Char
            ]
        );
    }

    #[test]
    fn test_invalid_type_combination() {
        let err = parse("int main() { char int x; return 0; }").unwrap_err();
        assert!(err.contains("invalid type"));
    }

    #[test]
    fn test_struct_layout() {
        let prog = parse_ok("struct S { char c; int i; }; int main() { struct S s; return 0; }");
        let ty = Rc::clone(&prog.fns[0].locals[0].borrow().ty);
        assert_eq!(kind_of(&ty), TypeKind::Struct);
        assert_eq!(find_member(&ty, "i").unwrap().offset, 4);
        assert_eq!(size_of(&ty).unwrap(), 8);
    }

    #[test]
    fn test_struct_forward_reference_completed_in_place() {
        let prog = parse_ok(
            "struct T *p; struct T { int x; }; int main() { return 0; }",
        );
        // The global p's pointee must be the completed struct.
        let pty = Rc::clone(&prog.globals[0].borrow().ty);
        let pointee = pty.borrow().base.clone().unwrap();
        assert!(!pointee.borrow().is_incomplete);
        assert_eq!(find_member(&pointee, "x").unwrap().offset, 0);
    }

    #[test]
    fn test_self_referential_struct() {
        parse_ok("struct Node { int val; struct Node *next; }; int main() { return 0; }");
    }

    #[test]
    fn test_struct_redefinition_same_depth_is_error() {
        let err = parse("struct S { int a; }; struct S { int b; }; int main() { return 0; }")
            .unwrap_err();
        assert!(err.contains("redefinition of struct"));
    }

    #[test]
    fn test_struct_shadowing_at_deeper_depth() {
        parse_ok(
            "struct S { int a; }; \
             int main() { struct S { int b; int c; } s; return sizeof(s); }",
        );
    }

    #[test]
    fn test_enum_values() {
        let prog = parse_ok(
            "enum E { A, B, C = 10, D }; int main() { return D; }",
        );
        // D = 11; enumerators fold to literals in primary.
        let NodeKind::Return(Some(e)) = &prog.fns[0].body[0].kind else {
            panic!("expected return");
        };
        assert!(matches!(e.kind, NodeKind::Num(11)));
    }

    #[test]
    fn test_enum_unknown_tag_is_error() {
        let err = parse("int main() { enum Missing x; return 0; }").unwrap_err();
        assert!(err.contains("unknown enum type"));
    }

    #[test]
    fn test_const_expr_in_array_dimension() {
        let prog = parse_ok("int main() { int a[2 * 3 + 1]; return 0; }");
        let ty = Rc::clone(&prog.fns[0].locals[0].borrow().ty);
        assert_eq!(ty.borrow().array_len, 7);
    }

    #[test]
    fn test_const_expr_rejects_non_constant() {
        let err = parse("int main() { int x; int a[x]; return 0; }").unwrap_err();
        assert!(err.contains("not a constant expression"));
    }

    #[test]
    fn test_local_initializer_lowering() {
        // An initialized declaration becomes a block of assignments.
        let prog = parse_ok("int main() { int x = 5; return x; }");
        let NodeKind::Block(body) = &prog.fns[0].body[0].kind else {
            panic!("expected block");
        };
        assert_eq!(body.len(), 1);
        assert!(matches!(body[0].kind, NodeKind::ExprStmt(_)));
    }

    #[test]
    fn test_local_array_initializer_with_zero_fill() {
        let prog = parse_ok("int main() { int a[4] = {1, 2}; return 0; }");
        let NodeKind::Block(body) = &prog.fns[0].body[0].kind else {
            panic!("expected block");
        };
        // Two explicit assignments plus two zero fills.
        assert_eq!(body.len(), 4);
    }

    #[test]
    fn test_local_string_initializer_completes_size() {
        let prog = parse_ok("int main() { char x[] = \"ab\"; return 0; }");
        let ty = Rc::clone(&prog.fns[0].locals[0].borrow().ty);
        assert!(!ty.borrow().is_incomplete);
        assert_eq!(ty.borrow().array_len, 3); // 'a', 'b', NUL
        assert_eq!(size_of(&ty).unwrap(), 3);
    }

    #[test]
    fn test_too_many_initializers_is_error() {
        let err = parse("int main() { int a[2] = {1, 2, 3}; return 0; }").unwrap_err();
        assert!(err.contains("too many initializer values"));
    }

    #[test]
    fn test_global_scalar_initializer() {
        let prog = parse_ok("int x = 42; int main() { return x; }");
        assert_eq!(
            prog.globals[0].borrow().initializer,
            vec![InitValue::Scalar { size: 4, val: 42 }]
        );
    }

    #[test]
    fn test_global_string_pointer_initializer() {
        // char *msg = "ok"; the literal is its own global, msg holds a label
        let prog = parse_ok("char *msg = \"ok\"; int main() { return 0; }");
        let msg = prog
            .globals
            .iter()
            .find(|v| v.borrow().name == "msg")
            .unwrap();
        assert!(matches!(
            msg.borrow().initializer[0],
            InitValue::Label(ref l) if l.starts_with(".L.data.")
        ));
    }

    #[test]
    fn test_global_char_array_from_string() {
        let prog = parse_ok("char s[] = \"ab\"; int main() { return 0; }");
        let s = prog
            .globals
            .iter()
            .find(|v| v.borrow().name == "s")
            .unwrap();
        let init = s.borrow().initializer.clone();
        assert_eq!(
            init,
            vec![
                InitValue::Scalar { size: 1, val: 97 },
                InitValue::Scalar { size: 1, val: 98 },
                InitValue::Scalar { size: 1, val: 0 },
            ]
        );
        assert_eq!(s.borrow().ty.borrow().array_len, 3);
    }

    #[test]
    fn test_global_struct_initializer_padding() {
        // char c at 0, int i at 4: three bytes of padding in between.
        let prog = parse_ok(
            "struct S { char c; int i; }; struct S s = {1, 2}; int main() { return 0; }",
        );
        let s = prog
            .globals
            .iter()
            .find(|v| v.borrow().name == "s")
            .unwrap();
        assert_eq!(
            s.borrow().initializer,
            vec![
                InitValue::Scalar { size: 1, val: 1 },
                InitValue::Zero(3),
                InitValue::Scalar { size: 4, val: 2 },
            ]
        );
    }

    #[test]
    fn test_global_incomplete_array_completed() {
        let prog = parse_ok("int a[] = {1, 2, 3}; int main() { return 0; }");
        let a = &prog.globals[0];
        assert_eq!(a.borrow().ty.borrow().array_len, 3);
        assert!(!a.borrow().ty.borrow().is_incomplete);
    }

    #[test]
    fn test_global_incomplete_array_without_initializer_is_error() {
        let err = parse("int a[]; int main() { return 0; }").unwrap_err();
        assert!(err.contains("incomplete type"));
    }

    #[test]
    fn test_switch_case_plumbing() {
        let prog = parse_ok(
            "int main() { int x; x = 2; \
             switch (x) { case 1: return 10; case 2: return 20; default: return 30; } }",
        );
        let NodeKind::Switch {
            cases, default_id, ..
        } = &prog.fns[0].body[2].kind
        else {
            panic!("expected switch");
        };
        assert_eq!(cases.iter().map(|c| c.1).collect::<Vec<_>>(), vec![1, 2]);
        assert!(default_id.is_some());
    }

    #[test]
    fn test_nested_switch_contexts() {
        let prog = parse_ok(
            "int main() { switch (1) { case 1: switch (2) { case 2: break; } break; } return 0; }",
        );
        let NodeKind::Switch { cases, .. } = &prog.fns[0].body[0].kind else {
            panic!("expected switch");
        };
        // The outer switch sees only its own case.
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].1, 1);
    }

    #[test]
    fn test_stray_case_is_error() {
        let err = parse("int main() { case 1: return 0; }").unwrap_err();
        assert!(err.contains("stray case"));
    }

    #[test]
    fn test_sugar_lowerings() {
        // a[b] -> *(a+b), a->b -> (*a).b, handled at parse time
        let prog = parse_ok("int main() { int a[2]; return a[1]; }");
        let NodeKind::Return(Some(e)) = &prog.fns[0].body[1].kind else {
            panic!("expected return");
        };
        assert!(matches!(e.kind, NodeKind::Deref(_)));
    }

    #[test]
    fn test_static_local_becomes_anonymous_global() {
        let prog = parse_ok("int counter() { static int n; return n; }");
        assert_eq!(prog.globals.len(), 1);
        assert!(prog.globals[0].borrow().name.starts_with(".L.data."));
        assert!(!prog.globals[0].borrow().is_local);
    }

    #[test]
    fn test_string_literal_becomes_global() {
        let prog = parse_ok("int main() { char *p; p = \"hi\"; return 0; }");
        let lit = &prog.globals[0];
        assert!(lit.borrow().name.starts_with(".L.data."));
        assert_eq!(lit.borrow().contents.as_ref().unwrap(), &[b'h', b'i', 0]);
    }

    #[test]
    fn test_not_a_function_error() {
        let err = parse("int main() { int x; return x(); }").unwrap_err();
        assert!(err.contains("not a function"));
    }

    #[test]
    fn test_void_variable_is_error() {
        let err = parse("int main() { void x; return 0; }").unwrap_err();
        assert!(err.contains("variable declared void"));
    }

    #[test]
    fn test_goto_and_label() {
        let prog = parse_ok("int main() { goto end; end: return 1; }");
        assert!(matches!(prog.fns[0].body[0].kind, NodeKind::Goto(_)));
        assert!(matches!(prog.fns[0].body[1].kind, NodeKind::Label { .. }));
    }

    #[test]
    fn test_statement_expression() {
        let prog = parse_ok("int main() { return ({ 1; 2; 3; }); }");
        let NodeKind::Return(Some(e)) = &prog.fns[0].body[0].kind else {
            panic!("expected return");
        };
        let NodeKind::StmtExpr(body) = &e.kind else {
            panic!("expected statement expression");
        };
        // The last statement is hoisted to a bare expression.
        assert!(matches!(body.last().unwrap().kind, NodeKind::Num(3)));
    }

    #[test]
    fn test_cast_vs_parenthesized_expression() {
        let prog = parse_ok("int main() { long x; x = 70000; return (int)x + (x); }");
        // No parse error and the cast node exists somewhere in the return.
        assert_eq!(prog.fns.len(), 1);
    }

    #[test]
    fn test_compound_assignment_nodes() {
        let prog = parse_ok("int main() { int x; x = 1; x += 2; x <<= 3; return x; }");
        assert!(matches!(
            prog.fns[0].body[2].kind,
            NodeKind::ExprStmt(ref e) if matches!(e.kind, NodeKind::AddAssign(_, _))
        ));
        assert!(matches!(
            prog.fns[0].body[3].kind,
            NodeKind::ExprStmt(ref e) if matches!(e.kind, NodeKind::ShlAssign(_, _))
        ));
    }

    #[test]
    fn test_for_with_declaration_scopes_to_loop() {
        let err =
            parse("int main() { for (int i = 0; i < 3; i = i + 1) ; return i; }").unwrap_err();
        assert!(err.contains("undefined variable"));
    }

    #[test]
    fn test_ternary_and_comma() {
        parse_ok("int main() { int x; x = (1, 2); return x ? 10 : 20; }");
    }

    #[test]
    fn test_do_while() {
        let prog = parse_ok("int main() { int i; i = 0; do i = i + 1; while (i < 3); return i; }");
        assert!(matches!(prog.fns[0].body[2].kind, NodeKind::DoWhile { .. }));
    }
}
