//! Kernel-side type system: packed type identifiers, predicates and the
//! pairwise promotion rule used by operators and intrinsic calls.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

/// Packed identifier for a kernel-language type.
///
/// The low nibble holds the base kind, [`Type::UNSIGNED_FLAG`] marks unsigned
/// integers, [`Type::POINTER_FLAG`] marks `__global T *`, the image access
/// flags mark `read_only`/`write_only` images, and bits 8 and up hold the
/// vector width (0 for scalars).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Type(u32);

impl Type {
    pub const UNSIGNED_FLAG: u32 = 0x10;
    pub const POINTER_FLAG: u32 = 0x20;
    pub const WRITE_FLAG: u32 = 0x40;
    pub const READ_FLAG: u32 = 0x80;
    pub const VECTOR_MASK: u32 = 0xFF00;

    pub const VOID: Type = Type(0);
    pub const BOOL: Type = Type(1);
    pub const CHAR: Type = Type(2);
    pub const UCHAR: Type = Type(2 | Self::UNSIGNED_FLAG);
    pub const SHORT: Type = Type(4);
    pub const USHORT: Type = Type(4 | Self::UNSIGNED_FLAG);
    pub const INT: Type = Type(5);
    pub const UINT: Type = Type(5 | Self::UNSIGNED_FLAG);
    pub const LONG: Type = Type(6);
    pub const ULONG: Type = Type(6 | Self::UNSIGNED_FLAG);
    pub const PTRDIFF: Type = Type(7);
    pub const SIZE_T: Type = Type(7 | Self::UNSIGNED_FLAG);
    pub const FLOAT: Type = Type(8);
    pub const IMAGE_R: Type = Type(9 | Self::READ_FLAG);
    pub const IMAGE_W: Type = Type(9 | Self::WRITE_FLAG);
    pub const SAMPLER: Type = Type(10);

    pub fn id(self) -> u32 {
        self.0
    }

    fn base_kind(self) -> u32 {
        self.0 & 0x0F
    }

    /// True if a value of this type can be transferred from the host.
    ///
    /// `void` and `bool` have no defined host representation; `ptrdiff_t` and
    /// `size_t` vary per device and never cross the host boundary.
    pub fn is_host_transferable(self) -> bool {
        !matches!(self, Type::VOID | Type::BOOL | Type::PTRDIFF | Type::SIZE_T)
    }

    pub fn is_pointer(self) -> bool {
        self.0 & Self::POINTER_FLAG != 0
    }

    /// Pointee of a pointer type.
    ///
    /// Panics if `self` is not a pointer.
    pub fn pointee(self) -> Type {
        assert!(self.is_pointer(), "pointee() on non-pointer type");
        Type(self.0 & !(Self::POINTER_FLAG | Self::READ_FLAG | Self::WRITE_FLAG))
    }

    pub fn is_vector(self) -> bool {
        !self.is_pointer() && (self.0 & Self::VECTOR_MASK) != 0
    }

    /// Lane count of a vector type. Panics if `self` is not a vector.
    pub fn vector_size(self) -> usize {
        assert!(self.is_vector(), "vector_size() on non-vector type");
        (self.0 >> 8) as usize
    }

    /// Element type of a vector type. Panics if `self` is not a vector.
    pub fn vector_of(self) -> Type {
        assert!(self.is_vector(), "vector_of() on non-vector type");
        Type(self.0 & !Self::VECTOR_MASK)
    }

    pub fn is_image(self) -> bool {
        self.base_kind() == 9
    }

    /// Panics if `self` is not an image.
    pub fn is_readable(self) -> bool {
        assert!(self.is_image(), "is_readable() on non-image type");
        self.0 & Self::READ_FLAG != 0
    }

    /// Panics if `self` is not an image.
    pub fn is_writable(self) -> bool {
        assert!(self.is_image(), "is_writable() on non-image type");
        self.0 & Self::WRITE_FLAG != 0
    }

    /// Numeric scalar (integer kinds, `ptrdiff_t`/`size_t`, or `float`).
    pub fn is_numeric(self) -> bool {
        !self.is_pointer()
            && (self.0 & Self::VECTOR_MASK) == 0
            && matches!(self.base_kind(), 2 | 4 | 5 | 6 | 7 | 8)
    }

    pub fn is_scalar(self) -> bool {
        self.is_numeric()
    }

    /// Integer scalar, including `ptrdiff_t`/`size_t`.
    pub fn is_integer(self) -> bool {
        self.is_numeric() && self.base_kind() != 8
    }

    pub fn is_float(self) -> bool {
        self == Type::FLOAT
    }

    /// Signedness of an integer, integer vector, float or float vector.
    ///
    /// Panics for other types.
    pub fn is_signed(self) -> bool {
        assert!(
            self.is_integer() || self.is_vector() || self.is_float(),
            "is_signed() on type without signedness"
        );
        self.0 & Self::UNSIGNED_FLAG == 0
    }

    /// Vector of `size` copies of `elem`.
    ///
    /// Panics unless `size` is 2, 4, 8 or 16 and `elem` is a numeric scalar
    /// other than `ptrdiff_t`/`size_t`.
    pub fn vector(size: usize, elem: Type) -> Type {
        assert!(
            matches!(size, 2 | 4 | 8 | 16),
            "invalid vector width {size} (expected 2, 4, 8 or 16)"
        );
        assert!(
            elem.is_numeric() && elem != Type::PTRDIFF && elem != Type::SIZE_T,
            "vector element must be a sized numeric scalar, got {}",
            elem.name()
        );
        Type(((size as u32) << 8) | elem.0)
    }

    /// Pointer to `t` in global memory.
    ///
    /// Panics unless `t` is a numeric scalar or a vector.
    pub fn pointer(t: Type) -> Type {
        assert!(
            t.is_numeric() || t.is_vector(),
            "pointer target must be numeric or vector, got {}",
            t.name()
        );
        Type(Self::POINTER_FLAG | t.0)
    }

    /// Signed counterpart of an integer or integer-vector type.
    pub fn to_signed(t: Type) -> Type {
        assert!(
            t.is_integer() || (t.is_vector() && t.vector_of().is_integer()),
            "to_signed() on non-integer type {}",
            t.name()
        );
        Type(t.0 & !Self::UNSIGNED_FLAG)
    }

    /// Unsigned counterpart of an integer or integer-vector type.
    pub fn to_unsigned(t: Type) -> Type {
        assert!(
            t.is_integer() || (t.is_vector() && t.vector_of().is_integer()),
            "to_unsigned() on non-integer type {}",
            t.name()
        );
        Type(t.0 | Self::UNSIGNED_FLAG)
    }

    /// Pairwise promotion used by operators and intrinsic calls.
    ///
    /// Rules, in order: equal types promote to themselves; two vectors must be
    /// equal; vector beats scalar; `float` beats integers; two integers of the
    /// same signedness promote to the larger kind; with mixed signedness the
    /// signed operand is demoted to the unsigned type of its kind and the
    /// larger kind wins.
    pub fn max(t1: Type, t2: Type) -> Type {
        let valid = |t: Type| t.is_numeric() || t.is_vector() || t == Type::BOOL;
        assert!(valid(t1), "max() operand is not numeric: {}", t1.name());
        assert!(valid(t2), "max() operand is not numeric: {}", t2.name());
        if t1 == t2 {
            t1
        } else if t1.is_vector() && t2.is_vector() {
            panic!(
                "cannot promote between distinct vector types {} and {}",
                t1.name(),
                t2.name()
            );
        } else if t1.is_vector() {
            t1
        } else if t2.is_vector() {
            t2
        } else if t1 == Type::FLOAT || t2 == Type::FLOAT {
            Type::FLOAT
        } else {
            let signed = |t: Type| t != Type::BOOL && t.0 & Self::UNSIGNED_FLAG == 0;
            let (s1, s2) = (signed(t1), signed(t2));
            if s1 == s2 {
                if t1.0 > t2.0 { t1 } else { t2 }
            } else {
                let u1 = if s1 { Type(t1.0 | Self::UNSIGNED_FLAG) } else { t1 };
                let u2 = if s2 { Type(t2.0 | Self::UNSIGNED_FLAG) } else { t2 };
                if u1.0 > u2.0 { u1 } else { u2 }
            }
        }
    }

    /// Canonical kernel-source spelling of the type.
    ///
    /// Composed spellings (vectors, pointers) are interned process-wide on
    /// first use.
    pub fn name(self) -> &'static str {
        match self {
            Type::VOID => "void",
            Type::BOOL => "bool",
            Type::CHAR => "char",
            Type::UCHAR => "uchar",
            Type::SHORT => "short",
            Type::USHORT => "ushort",
            Type::INT => "int",
            Type::UINT => "uint",
            Type::LONG => "long",
            Type::ULONG => "ulong",
            Type::PTRDIFF => "ptrdiff_t",
            Type::SIZE_T => "size_t",
            Type::FLOAT => "float",
            Type::IMAGE_R => "read_only image2d_t",
            Type::IMAGE_W => "write_only image2d_t",
            Type::SAMPLER => "sampler_t",
            _ => Self::composed_name(self),
        }
    }

    fn composed_name(t: Type) -> &'static str {
        static NAMES: OnceLock<Mutex<HashMap<u32, &'static str>>> = OnceLock::new();
        let names = NAMES.get_or_init(|| Mutex::new(HashMap::new()));
        let mut names = names.lock().unwrap();
        if let Some(n) = names.get(&t.0) {
            return n;
        }
        let spelled = if t.is_vector() {
            format!("{}{}", t.vector_of().name(), t.vector_size())
        } else if t.is_pointer() {
            format!("__global {} *", t.pointee().name())
        } else {
            panic!("invalid type id {:#x}", t.0);
        };
        let leaked: &'static str = Box::leak(spelled.into_boxed_str());
        names.insert(t.0, leaked);
        leaked
    }
}

impl std::fmt::Debug for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Type({})", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn scalar_names() {
        assert_eq!(Type::UCHAR.name(), "uchar");
        assert_eq!(Type::SIZE_T.name(), "size_t");
        assert_eq!(Type::IMAGE_R.name(), "read_only image2d_t");
        assert_eq!(Type::IMAGE_W.name(), "write_only image2d_t");
    }

    #[test]
    fn composed_names_are_interned() {
        let a = Type::vector(4, Type::INT).name();
        let b = Type::vector(4, Type::INT).name();
        assert_eq!(a, "int4");
        assert!(std::ptr::eq(a, b));
        assert_eq!(Type::pointer(Type::FLOAT).name(), "__global float *");
        assert_eq!(
            Type::pointer(Type::vector(2, Type::UCHAR)).name(),
            "__global uchar2 *"
        );
    }

    #[test]
    fn promotion_laws() {
        assert_eq!(Type::max(Type::INT, Type::INT), Type::INT);
        assert_eq!(Type::max(Type::FLOAT, Type::INT), Type::FLOAT);
        assert_eq!(Type::max(Type::INT, Type::UINT), Type::UINT);
        assert_eq!(Type::max(Type::CHAR, Type::SHORT), Type::SHORT);
        assert_eq!(Type::max(Type::UCHAR, Type::INT), Type::UINT);
        let v2f = Type::vector(2, Type::FLOAT);
        assert_eq!(Type::max(v2f, Type::FLOAT), v2f);
        assert_eq!(Type::max(Type::INT, v2f), v2f);
    }

    #[test]
    #[should_panic]
    fn distinct_vectors_do_not_promote() {
        Type::max(Type::vector(2, Type::FLOAT), Type::vector(4, Type::FLOAT));
    }

    #[test]
    #[should_panic]
    fn vector_of_ptrdiff_is_rejected() {
        Type::vector(4, Type::PTRDIFF);
    }

    #[test]
    #[should_panic]
    fn vector_width_3_is_rejected() {
        Type::vector(3, Type::FLOAT);
    }

    #[test]
    #[should_panic]
    fn pointer_to_image_is_rejected() {
        Type::pointer(Type::IMAGE_R);
    }

    fn scalar_type() -> impl Strategy<Value = Type> {
        prop_oneof![
            Just(Type::BOOL),
            Just(Type::CHAR),
            Just(Type::UCHAR),
            Just(Type::SHORT),
            Just(Type::USHORT),
            Just(Type::INT),
            Just(Type::UINT),
            Just(Type::LONG),
            Just(Type::ULONG),
            Just(Type::FLOAT),
        ]
    }

    proptest! {
        #[test]
        fn promotion_is_idempotent(t in scalar_type()) {
            prop_assert_eq!(Type::max(t, t), t);
        }

        #[test]
        fn promotion_is_commutative(a in scalar_type(), b in scalar_type()) {
            prop_assert_eq!(Type::max(a, b), Type::max(b, a));
        }

        #[test]
        fn promotion_never_shrinks_the_kind(a in scalar_type(), b in scalar_type()) {
            let m = Type::max(a, b);
            prop_assert!((m.id() & 0x0F) >= (a.id() & 0x0F) || (m.id() & 0x0F) >= (b.id() & 0x0F));
        }
    }
}
