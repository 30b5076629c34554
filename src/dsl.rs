//! Host-facing construction surface for expression trees.
//!
//! Free factory functions return shared [`Expr`] handles; arithmetic and
//! bitwise operators are overloaded on `Expr`/`&Expr`. `||`, `&&`, `==`,
//! `!=` and `~` cannot be overloaded in Rust and are the free functions
//! [`or`], [`and`], [`equal`], [`not_equal`] and [`bit_not`].
//!
//! Type rules are enforced here, at construction: violations panic with the
//! offending types spelled out.

use std::sync::Mutex;

use crate::driver::{Buffer, Image};
use crate::expr::{BinOp, Expr, ImageAccess, ImageSampling, NodeKind, UnOp};
use crate::types::Type;
use crate::value::{ConstValue, HostValue, Scalar};

/// Literal constant from a host scalar or fixed-size vector.
pub fn cnst(v: impl Into<ConstValue>) -> Expr {
    Expr::from_kind(NodeKind::Const(v.into()))
}

/// Host-bindable scalar/vector parameter slot holding `T`'s zero value.
pub fn arg<T: HostValue>() -> Expr {
    arg_with(T::zero())
}

/// Host-bindable scalar/vector parameter slot with an initial value.
pub fn arg_with(v: impl Into<ConstValue>) -> Expr {
    let v = v.into();
    Expr::from_kind(NodeKind::Argument {
        ty: v.ty(),
        value: Mutex::new(v),
    })
}

/// Buffer parameter slot over elements of `T`, bound to `buffer`.
pub fn argv<T: HostValue>(buffer: Buffer) -> Expr {
    let e = argv_slot::<T>();
    e.set_buffer(buffer);
    e
}

/// Unbound buffer parameter slot over elements of `T`.
pub fn argv_slot<T: HostValue>() -> Expr {
    let elem: Type = {
        let cv: ConstValue = T::zero().into();
        cv.ty()
    };
    // pointer() checks that the element type is legal to point at.
    let _ = Type::pointer(elem);
    Expr::from_kind(NodeKind::BufferArgument {
        elem,
        value: Mutex::new(None),
    })
}

/// Readable image parameter slot bound to `image`.
pub fn argi_r(image: Image) -> Expr {
    let e = argi_r_slot();
    e.set_image(image);
    e
}

/// Writable image parameter slot bound to `image`.
pub fn argi_w(image: Image) -> Expr {
    let e = argi_w_slot();
    e.set_image(image);
    e
}

pub fn argi_r_slot() -> Expr {
    Expr::from_kind(NodeKind::ImageArgument {
        access: ImageAccess::Read,
        value: Mutex::new(None),
    })
}

pub fn argi_w_slot() -> Expr {
    Expr::from_kind(NodeKind::ImageArgument {
        access: ImageAccess::Write,
        value: Mutex::new(None),
    })
}

/// Multi-dimensional host-supplied constant array, emitted as a global
/// nested brace initializer. Empty `dims` declares a flat array.
pub fn cnstv<T: Copy + Into<Scalar>>(data: &[T], dims: &[usize]) -> Expr {
    assert!(!data.is_empty(), "constant array must not be empty");
    if !dims.is_empty() {
        let expected: usize = dims.iter().product();
        assert!(
            expected == data.len(),
            "constant array has {} elements but dimensions {:?} require {}",
            data.len(),
            dims,
            expected
        );
    }
    let lanes: Vec<Scalar> = data.iter().map(|v| (*v).into()).collect();
    let elem = lanes[0].ty();
    Expr::from_kind(NodeKind::ArrayConst {
        elem,
        dims: dims.to_vec(),
        data: lanes,
    })
}

/// Buffer element access `buf[index]`. The result is an lvalue of the
/// pointee type.
pub fn select(buffer: Expr, index: Expr) -> Expr {
    assert!(
        buffer.ty().is_pointer(),
        "select() needs a buffer operand, got {}",
        buffer.ty().name()
    );
    assert!(
        index.ty().is_integer(),
        "buffer index must be integer, got {}",
        index.ty().name()
    );
    Expr::from_kind(NodeKind::SelectBuffer { buffer, index })
}

/// Vector lane access `v.s<hex>`; an lvalue when `vector` is one.
pub fn select_lane(vector: Expr, lane: usize) -> Expr {
    assert!(
        vector.ty().is_vector(),
        "select_lane() needs a vector operand, got {}",
        vector.ty().name()
    );
    assert!(
        lane < vector.ty().vector_size(),
        "lane {lane} out of range for {}",
        vector.ty().name()
    );
    Expr::from_kind(NodeKind::SelectVector { vector, lane })
}

/// Image read `read_imagef(img, sampler, pos)`; `pos` must be `float2` or
/// `int2` and the result is `float4`.
pub fn sample(image: Expr, pos: Expr, sampling: ImageSampling) -> Expr {
    assert!(
        image.ty().is_image() && image.ty().is_readable(),
        "sample() needs a readable image, got {}",
        image.ty().name()
    );
    let pt = pos.ty();
    assert!(
        pt == Type::vector(2, Type::FLOAT) || pt == Type::vector(2, Type::INT),
        "sample position must be float2 or int2, got {}",
        pt.name()
    );
    Expr::from_kind(NodeKind::SelectImage {
        image,
        pos,
        sampling,
    })
}

/// Constant-array element access; the index count must match the declared
/// dimensions (one index for flat arrays).
pub fn select_array(array: Expr, indices: impl IntoIterator<Item = Expr>) -> Expr {
    let indices: Vec<Expr> = indices.into_iter().collect();
    let dims = match array.kind() {
        NodeKind::ArrayConst { dims, .. } => dims.len(),
        _ => panic!("select_array() needs a constant-array operand"),
    };
    assert!(
        (dims == 0 && indices.len() == 1) || indices.len() == dims,
        "constant array with {dims} dimensions indexed with {} indices",
        indices.len()
    );
    for idx in &indices {
        assert!(
            idx.ty().is_integer(),
            "array index must be integer, got {}",
            idx.ty().name()
        );
    }
    Expr::from_kind(NodeKind::SelectArray { array, indices })
}

pub(crate) fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    for operand in [&lhs, &rhs] {
        let t = operand.ty();
        assert!(
            t.is_vector() || t.is_numeric(),
            "operator {} needs numeric operands, got {}",
            op.token(),
            t.name()
        );
    }
    Expr::from_kind(NodeKind::Binary { op, lhs, rhs })
}

fn unary(op: UnOp, operand: Expr) -> Expr {
    Expr::from_kind(NodeKind::Unary { op, operand })
}

/// `(a == b)`.
pub fn equal(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinOp::Eq, lhs, rhs)
}

/// `(a != b)`.
pub fn not_equal(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinOp::Ne, lhs, rhs)
}

/// `(a || b)`.
pub fn or(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinOp::Or, lhs, rhs)
}

/// `(a && b)`.
pub fn and(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinOp::And, lhs, rhs)
}

/// `(~a)`.
pub fn bit_not(operand: Expr) -> Expr {
    unary(UnOp::BitNot, operand)
}

/// `(c ? t : e)`; the result type is the promotion of the branches.
pub fn ternary(cond: Expr, then: Expr, otherwise: Expr) -> Expr {
    Expr::from_kind(NodeKind::Ternary {
        cond,
        then,
        otherwise,
    })
}

/// `if`/`else` statement (not an expression). Either branch may be absent;
/// with only the else branch the condition is negated.
pub fn cond(test: Expr, then: impl Into<Option<Expr>>, otherwise: impl Into<Option<Expr>>) -> Expr {
    conditional(test, then.into(), otherwise.into())
}

/// Statement running `body` when `test` is false; the mirror of [`cond`].
pub fn unless(test: Expr, body: Expr, otherwise: impl Into<Option<Expr>>) -> Expr {
    conditional(test, otherwise.into(), Some(body))
}

fn conditional(test: Expr, then: Option<Expr>, otherwise: Option<Expr>) -> Expr {
    let ct = test.ty();
    assert!(
        ct.is_numeric() || ct == Type::BOOL,
        "condition must be numeric or bool, got {}",
        ct.name()
    );
    Expr::from_kind(NodeKind::Conditional {
        cond: test,
        then,
        otherwise,
    })
}

/// Uninitialized named local of `T`'s kernel type. Lvalue.
pub fn var<T: HostValue>() -> Expr {
    let cv: ConstValue = T::zero().into();
    Expr::from_kind(NodeKind::Variable {
        ty: cv.ty(),
        init: None,
    })
}

/// Named local initialized from `init`, typed after it. Lvalue.
pub fn var_init(init: Expr) -> Expr {
    Expr::from_kind(NodeKind::Variable {
        ty: init.ty(),
        init: Some(init),
    })
}

/// Assignment `lhs = rhs`; `lhs` must be an lvalue.
pub fn set(target: Expr, value: Expr) -> Expr {
    assert!(target.is_lvalue(), "set() target must be an lvalue");
    Expr::from_kind(NodeKind::Set { target, value })
}

/// Image write `write_imagef(img, pos, color)`; `pos` must be `int2` and
/// `color` `float4`.
pub fn set_image(image: Expr, pos: Expr, color: Expr) -> Expr {
    assert!(
        image.ty().is_image() && image.ty().is_writable(),
        "set_image() needs a writable image, got {}",
        image.ty().name()
    );
    assert!(
        pos.ty() == Type::vector(2, Type::INT),
        "write position must be int2, got {}",
        pos.ty().name()
    );
    assert!(
        color.ty() == Type::vector(4, Type::FLOAT),
        "write color must be float4, got {}",
        color.ty().name()
    );
    Expr::from_kind(NodeKind::SetImage { image, pos, color })
}

/// Statement sequence; each child is emitted followed by `;`.
pub fn seq(items: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::from_kind(NodeKind::Sequence(items.into_iter().collect()))
}

/// Counted loop `for(i = begin; i < end; i++) { body; }`; the index must be
/// an integer lvalue.
pub fn for_range(index: Expr, begin: Expr, end: Expr, body: Expr) -> Expr {
    assert!(
        index.is_lvalue() && index.ty().is_integer(),
        "loop index must be an integer lvalue, got {}",
        index.ty().name()
    );
    Expr::from_kind(NodeKind::ForRange {
        index,
        begin,
        end,
        body,
    })
}

/// Conversion to `to`: `convert_<T>(e)` for vector targets, a C cast
/// otherwise, and a no-op when the types already match.
pub fn cast(expr: Expr, to: Type) -> Expr {
    Expr::from_kind(NodeKind::Cast { expr, to })
}

macro_rules! binary_operator {
    ($trait:ident, $method:ident, $op:expr) => {
        impl std::ops::$trait for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                binary($op, self, rhs)
            }
        }
        impl std::ops::$trait for &Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                binary($op, self.clone(), rhs.clone())
            }
        }
    };
}

binary_operator!(Add, add, BinOp::Add);
binary_operator!(Sub, sub, BinOp::Sub);
binary_operator!(Mul, mul, BinOp::Mul);
binary_operator!(Div, div, BinOp::Div);
binary_operator!(Rem, rem, BinOp::Rem);
binary_operator!(BitOr, bitor, BinOp::BitOr);
binary_operator!(BitAnd, bitand, BinOp::BitAnd);
binary_operator!(BitXor, bitxor, BinOp::BitXor);

impl std::ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        unary(UnOp::Neg, self)
    }
}

impl std::ops::Neg for &Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        unary(UnOp::Neg, self.clone())
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;
    fn not(self) -> Expr {
        unary(UnOp::Not, self)
    }
}

impl std::ops::Not for &Expr {
    type Output = Expr;
    fn not(self) -> Expr {
        unary(UnOp::Not, self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_text(e: &Expr) -> String {
        // The kernel body is everything between the prolog and the epilog.
        let src = e.build();
        let open = src.find("{\n").unwrap();
        src[open + 2..src.len() - ";\n};\n".len()].to_string()
    }

    #[test]
    fn operators_emit_parenthesized_infix() {
        let e = cnst(1i32) + cnst(2i32) * cnst(3i32);
        assert_eq!(value_text(&e), "(0x1 + (0x2 * 0x3))");
        let e = -cnst(1i32);
        assert_eq!(value_text(&e), "(-0x1)");
        let e = bit_not(cnst(1u32));
        assert_eq!(value_text(&e), "(~0x1u)");
    }

    #[test]
    fn scalar_vector_promotion() {
        let e = cnst(1i32) + cnst([1.0f32, 2.0]);
        assert_eq!(e.ty(), Type::vector(2, Type::FLOAT));
        assert_eq!(value_text(&e), "(0x1 + (1.0e0f, 2.0e0f))");
    }

    #[test]
    fn mixed_sign_promotion_is_unsigned() {
        let e = cnst(1i32) + cnst(1u32);
        assert_eq!(e.ty(), Type::UINT);
    }

    #[test]
    #[should_panic]
    fn set_rejects_non_lvalues() {
        set(cnst(1i32), cnst(2i32));
    }

    #[test]
    #[should_panic]
    fn for_range_rejects_non_lvalue_index() {
        for_range(cnst(0i32), cnst(0i32), cnst(4i32), cnst(0i32));
    }

    #[test]
    #[should_panic]
    fn sample_rejects_bad_position_type() {
        let img = argi_r_slot();
        sample(img, cnst(1i32), ImageSampling::LinearPixel);
    }

    #[test]
    #[should_panic]
    fn set_image_rejects_readable_images() {
        let img = argi_r_slot();
        set_image(img, cnst([0i32, 0]), cnst([0.0f32, 0.0, 0.0, 0.0]));
    }

    #[test]
    fn ternary_promotes_branches() {
        let e = ternary(cnst(1i32), cnst(1i32), cnst(2.0f32));
        assert_eq!(e.ty(), Type::FLOAT);
        assert_eq!(value_text(&e), "(0x1 ? 0x1 : 2.0e0f)");
    }

    #[test]
    fn variable_declaration_is_hoisted() {
        let v = var_init(cnst(1i32) + cnst(2i32));
        let src = v.build();
        assert!(
            src.contains(&format!("int {} = (0x1 + 0x2);\n", v.param_name())),
            "in:\n{src}"
        );
    }

    #[test]
    fn buffer_select_is_an_lvalue_of_the_pointee() {
        let buf = argv_slot::<f32>();
        let e = select(buf.clone(), cnst(3i32));
        assert!(e.is_lvalue());
        assert_eq!(e.ty(), Type::FLOAT);
        assert_eq!(value_text(&e), format!("({}[0x3])", buf.param_name()));
    }
}
