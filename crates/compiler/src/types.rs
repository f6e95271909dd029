//! Type descriptors and size/alignment queries
//!
//! Types are shared behind `Rc<RefCell<..>>` handles. The interior
//! mutability is load-bearing: a forward-declared struct tag is installed as
//! an incomplete record, and the later `struct Tag { ... }` body fills in the
//! members through the same handle, so every pointer type that already took
//! the tag as its base sees the completed layout. Type records must never be
//! copied by value once taken as a base.
//!
//! Sizes are not stored; [`size_of`] derives them from the kind on demand,
//! which keeps incomplete types representable. Sizing `void` or an
//! incomplete type is a compile error reported at the consulting token.

use std::cell::RefCell;
use std::rc::Rc;

pub type TypeRef = Rc<RefCell<Type>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Void,
    Bool,
    Char,
    Short,
    Int,
    Long,
    Enum,
    Ptr,
    Array,
    Struct,
    Func,
}

#[derive(Debug, Clone)]
pub struct Type {
    pub kind: TypeKind,
    pub align: i64,
    /// Pointee or element type for pointers and arrays.
    pub base: Option<TypeRef>,
    /// Element count for arrays.
    pub array_len: i64,
    /// Array of unknown bound, or struct tag awaiting its body.
    pub is_incomplete: bool,
    /// Struct members in declaration order.
    pub members: Vec<Member>,
    /// Return type for function types.
    pub return_ty: Option<TypeRef>,
}

/// A struct member. `loc` points at the declaring token for diagnostics.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub ty: TypeRef,
    pub offset: i64,
    pub loc: usize,
}

fn new_type(kind: TypeKind, align: i64) -> TypeRef {
    Rc::new(RefCell::new(Type {
        kind,
        align,
        base: None,
        array_len: 0,
        is_incomplete: false,
        members: Vec::new(),
        return_ty: None,
    }))
}

pub fn void_type() -> TypeRef {
    new_type(TypeKind::Void, 1)
}

pub fn bool_type() -> TypeRef {
    new_type(TypeKind::Bool, 1)
}

pub fn char_type() -> TypeRef {
    new_type(TypeKind::Char, 1)
}

pub fn short_type() -> TypeRef {
    new_type(TypeKind::Short, 2)
}

pub fn int_type() -> TypeRef {
    new_type(TypeKind::Int, 4)
}

pub fn long_type() -> TypeRef {
    new_type(TypeKind::Long, 8)
}

pub fn enum_type() -> TypeRef {
    new_type(TypeKind::Enum, 4)
}

/// A fresh struct type with no members yet. Callers fill in `members`,
/// `align`, and clear `is_incomplete` when the body is parsed.
pub fn struct_type() -> TypeRef {
    let ty = new_type(TypeKind::Struct, 1);
    ty.borrow_mut().is_incomplete = true;
    ty
}

pub fn func_type(return_ty: TypeRef) -> TypeRef {
    let ty = new_type(TypeKind::Func, 1);
    ty.borrow_mut().return_ty = Some(return_ty);
    ty
}

pub fn pointer_to(base: TypeRef) -> TypeRef {
    let ty = new_type(TypeKind::Ptr, 8);
    ty.borrow_mut().base = Some(base);
    ty
}

pub fn array_of(base: TypeRef, len: i64) -> TypeRef {
    let align = base.borrow().align;
    let ty = new_type(TypeKind::Array, align);
    {
        let mut t = ty.borrow_mut();
        t.base = Some(base);
        t.array_len = len;
    }
    ty
}

/// Round `n` up to the nearest multiple of `align` (a power of two).
pub fn align_to(n: i64, align: i64) -> i64 {
    (n + align - 1) & !(align - 1)
}

/// Total size of a type in bytes.
///
/// The error carries no location; callers wrap it with the token they were
/// looking at when they asked.
pub fn size_of(ty: &TypeRef) -> Result<i64, String> {
    let t = ty.borrow();
    match t.kind {
        TypeKind::Void => Err("cannot take the size of void".to_string()),
        TypeKind::Bool | TypeKind::Char => Ok(1),
        TypeKind::Short => Ok(2),
        TypeKind::Int | TypeKind::Enum => Ok(4),
        TypeKind::Long | TypeKind::Ptr => Ok(8),
        TypeKind::Array => {
            if t.is_incomplete {
                return Err("incomplete type".to_string());
            }
            let elem = size_of(t.base.as_ref().unwrap())?;
            Ok(elem * t.array_len)
        }
        TypeKind::Struct => {
            if t.is_incomplete {
                return Err("incomplete type".to_string());
            }
            // Last member's end, padded out to the struct alignment.
            let last = t.members.last().expect("complete struct has members");
            let end = last.offset + size_of(&last.ty)?;
            Ok(align_to(end, t.align))
        }
        TypeKind::Func => Ok(1),
    }
}

/// Look up a struct member by name, first declaration wins.
pub fn find_member(ty: &TypeRef, name: &str) -> Option<Member> {
    let t = ty.borrow();
    t.members.iter().find(|m| m.name == name).cloned()
}

/// Whether the type has a base type, i.e. is a pointer or array.
pub fn has_base(ty: &TypeRef) -> bool {
    ty.borrow().base.is_some()
}

pub fn kind_of(ty: &TypeRef) -> TypeKind {
    ty.borrow().kind
}

pub fn base_of(ty: &TypeRef) -> Option<TypeRef> {
    ty.borrow().base.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_to() {
        assert_eq!(align_to(0, 8), 0);
        assert_eq!(align_to(1, 8), 8);
        assert_eq!(align_to(8, 8), 8);
        assert_eq!(align_to(10, 8), 16);
        assert_eq!(align_to(5, 4), 8);
    }

    #[test]
    fn test_scalar_sizes() {
        assert_eq!(size_of(&bool_type()).unwrap(), 1);
        assert_eq!(size_of(&char_type()).unwrap(), 1);
        assert_eq!(size_of(&short_type()).unwrap(), 2);
        assert_eq!(size_of(&int_type()).unwrap(), 4);
        assert_eq!(size_of(&enum_type()).unwrap(), 4);
        assert_eq!(size_of(&long_type()).unwrap(), 8);
        assert_eq!(size_of(&pointer_to(char_type())).unwrap(), 8);
    }

    #[test]
    fn test_void_has_no_size() {
        assert!(size_of(&void_type()).is_err());
    }

    #[test]
    fn test_array_size_and_align() {
        let arr = array_of(int_type(), 3);
        assert_eq!(size_of(&arr).unwrap(), 12);
        assert_eq!(arr.borrow().align, 4);

        let nested = array_of(array_of(char_type(), 4), 2);
        assert_eq!(size_of(&nested).unwrap(), 8);
        assert_eq!(nested.borrow().align, 1);
    }

    #[test]
    fn test_struct_layout_with_padding() {
        // struct { char c; int i; } -> i at offset 4, size 8, align 4
        let ty = struct_type();
        {
            let mut t = ty.borrow_mut();
            t.members = vec![
                Member {
                    name: "c".to_string(),
                    ty: char_type(),
                    offset: 0,
                    loc: 0,
                },
                Member {
                    name: "i".to_string(),
                    ty: int_type(),
                    offset: 4,
                    loc: 0,
                },
            ];
            t.align = 4;
            t.is_incomplete = false;
        }
        assert_eq!(size_of(&ty).unwrap(), 8);
        assert_eq!(find_member(&ty, "i").unwrap().offset, 4);
        assert!(find_member(&ty, "missing").is_none());
    }

    #[test]
    fn test_trailing_padding() {
        // struct { int i; char c; } -> size rounded up to 8
        let ty = struct_type();
        {
            let mut t = ty.borrow_mut();
            t.members = vec![
                Member {
                    name: "i".to_string(),
                    ty: int_type(),
                    offset: 0,
                    loc: 0,
                },
                Member {
                    name: "c".to_string(),
                    ty: char_type(),
                    offset: 4,
                    loc: 0,
                },
            ];
            t.align = 4;
            t.is_incomplete = false;
        }
        assert_eq!(size_of(&ty).unwrap(), 8);
    }

    #[test]
    fn test_incomplete_struct_has_no_size() {
        let ty = struct_type();
        assert!(size_of(&ty).is_err());
    }

    #[test]
    fn test_incomplete_struct_completed_through_shared_handle() {
        // A pointer taken while the struct was incomplete must see the
        // members once the tag is completed.
        let tag = struct_type();
        let ptr = pointer_to(Rc::clone(&tag));

        {
            let mut t = tag.borrow_mut();
            t.members = vec![Member {
                name: "x".to_string(),
                ty: int_type(),
                offset: 0,
                loc: 0,
            }];
            t.align = 4;
            t.is_incomplete = false;
        }

        let pointee = base_of(&ptr).unwrap();
        assert!(!pointee.borrow().is_incomplete);
        assert_eq!(find_member(&pointee, "x").unwrap().offset, 0);
    }
}
