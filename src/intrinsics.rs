//! Built-in kernel function catalogue.
//!
//! Everything here is sugar over the generic [`call`] node: work-item
//! queries, the integer/numeric/float intrinsic families, and the geometric
//! functions. The class families share one implementation — check every
//! argument's class, fold the argument types with [`Type::max`], cast each
//! argument to the folded type, and emit the call with that result type.

use crate::dsl::{cast, cnst};
use crate::expr::{Expr, NodeKind};
use crate::types::Type;

/// Generic intrinsic call with strict argument typing.
///
/// `arg_types` entries equal to `void` are wildcards; any other entry must
/// equal the corresponding argument type exactly. Panics on mismatch.
pub fn call(name: impl Into<String>, ret: Type, arg_types: &[Type], args: Vec<Expr>) -> Expr {
    let name = name.into();
    assert!(
        arg_types.len() == args.len(),
        "{name}() takes {} arguments, got {}",
        arg_types.len(),
        args.len()
    );
    for (expected, actual) in arg_types.iter().zip(&args) {
        if *expected != Type::VOID {
            assert!(
                actual.ty() == *expected,
                "{name}() argument must be {}, got {}",
                expected.name(),
                actual.ty().name()
            );
        }
    }
    Expr::from_kind(NodeKind::Call { name, ret, args })
}

fn raw_call(name: &str, ret: Type, args: Vec<Expr>) -> Expr {
    Expr::from_kind(NodeKind::Call {
        name: name.to_string(),
        ret,
        args,
    })
}

#[derive(Clone, Copy)]
enum ArgClass {
    Integer,
    Numeric,
    Float,
}

impl ArgClass {
    fn describe(self) -> &'static str {
        match self {
            ArgClass::Integer => "integer",
            ArgClass::Numeric => "numeric",
            ArgClass::Float => "float",
        }
    }

    fn admits(self, t: Type) -> bool {
        let elem = if t.is_vector() { t.vector_of() } else { t };
        match self {
            ArgClass::Integer => elem.is_integer(),
            ArgClass::Numeric => elem.is_numeric(),
            ArgClass::Float => elem.is_float(),
        }
    }
}

fn class_call(name: &'static str, class: ArgClass, args: Vec<Expr>) -> Expr {
    for a in &args {
        assert!(
            class.admits(a.ty()),
            "{name}() argument must be {} (scalar or vector), got {}",
            class.describe(),
            a.ty().name()
        );
    }
    let ret = args
        .iter()
        .skip(1)
        .fold(args[0].ty(), |r, e| Type::max(r, e.ty()));
    let args = args.into_iter().map(|a| cast(a, ret)).collect();
    raw_call(name, ret, args)
}

macro_rules! class_fn {
    ($name:ident, 1, $class:ident) => {
        pub fn $name(e: Expr) -> Expr {
            class_call(stringify!($name), ArgClass::$class, vec![e])
        }
    };
    ($name:ident, 2, $class:ident) => {
        pub fn $name(e1: Expr, e2: Expr) -> Expr {
            class_call(stringify!($name), ArgClass::$class, vec![e1, e2])
        }
    };
    ($name:ident, 3, $class:ident) => {
        pub fn $name(e1: Expr, e2: Expr, e3: Expr) -> Expr {
            class_call(stringify!($name), ArgClass::$class, vec![e1, e2, e3])
        }
    };
}

macro_rules! class_intrinsics {
    ($($name:ident / $arity:tt / $class:ident),* $(,)?) => {
        $(class_fn!($name, $arity, $class);)*
        const CLASS_INTRINSIC_NAMES: &[&str] = &[$(stringify!($name)),*];
    };
}

class_intrinsics! {
    add_sat / 2 / Integer,
    hadd / 2 / Integer,
    rhadd / 2 / Integer,
    clz / 1 / Integer,
    mad_hi / 3 / Integer,
    mad_sat / 3 / Integer,
    rotate / 2 / Integer,
    sub_sat / 2 / Integer,
    mad24 / 3 / Integer,
    mul24 / 2 / Integer,
    clamp / 3 / Numeric,
    min / 2 / Numeric,
    max / 2 / Numeric,
    mix / 3 / Numeric,
    radians / 1 / Numeric,
    step / 2 / Numeric,
    smoothstep / 3 / Numeric,
    sign / 1 / Numeric,
    acos / 1 / Float,
    acosh / 1 / Float,
    acospi / 1 / Float,
    asin / 1 / Float,
    asinh / 1 / Float,
    asinpi / 1 / Float,
    atan / 1 / Float,
    atan2 / 2 / Float,
    atanh / 1 / Float,
    atanpi / 1 / Float,
    atan2pi / 2 / Float,
    cbrt / 1 / Float,
    ceil / 1 / Float,
    copysign / 2 / Float,
    cos / 1 / Float,
    cosh / 1 / Float,
    cospi / 1 / Float,
    erfc / 1 / Float,
    erf / 1 / Float,
    exp / 1 / Float,
    exp2 / 1 / Float,
    exp10 / 1 / Float,
    expm1 / 1 / Float,
    fabs / 1 / Float,
    fdim / 2 / Float,
    floor / 1 / Float,
    fma / 3 / Float,
    fmax / 2 / Float,
    fmin / 2 / Float,
    fmod / 2 / Float,
    hypot / 2 / Float,
    lgamma / 1 / Float,
    log / 1 / Float,
    log2 / 1 / Float,
    log10 / 1 / Float,
    log1p / 1 / Float,
    logb / 1 / Float,
    mad / 3 / Float,
    maxmag / 2 / Float,
    minmag / 2 / Float,
    nextafter / 2 / Float,
    pow / 2 / Float,
    remainder / 2 / Float,
    remquo / 2 / Float,
    rint / 1 / Float,
    round / 1 / Float,
    rsqrt / 1 / Float,
    sin / 1 / Float,
    sinh / 1 / Float,
    sinpi / 1 / Float,
    sqrt / 1 / Float,
    tan / 1 / Float,
    tanh / 1 / Float,
    tanpi / 1 / Float,
    tgamma / 1 / Float,
    trunc / 1 / Float,
    cross / 2 / Float,
    normalize / 1 / Float,
    fast_normalize / 1 / Float,
}

macro_rules! work_item_fns {
    ($($name:ident),* $(,)?) => {
        $(
            /// Work-item query over one dimension.
            pub fn $name(dimension: u32) -> Expr {
                call(stringify!($name), Type::SIZE_T, &[Type::UINT], vec![cnst(dimension)])
            }
        )*
        const WORK_ITEM_NAMES: &[&str] = &[$(stringify!($name)),*];
    };
}

work_item_fns!(
    get_global_size,
    get_global_id,
    get_local_size,
    get_local_id,
    get_group_id,
    get_global_offset,
);

/// Number of work dimensions the kernel was dispatched over.
pub fn get_work_dim() -> Expr {
    call("get_work_dim", Type::UINT, &[], Vec::new())
}

/// `|e|` for integers and integer vectors; the result is unsigned.
pub fn abs(e: Expr) -> Expr {
    let t = e.ty();
    assert!(
        (t.is_vector() && t.vector_of().is_integer()) || t.is_integer(),
        "abs() argument must be integer, got {}",
        t.name()
    );
    raw_call("abs", Type::to_unsigned(t), vec![e])
}

/// `|a - b|` without overflow; integer arguments are promoted pairwise and
/// the result is unsigned.
pub fn abs_diff(e1: Expr, e2: Expr) -> Expr {
    let t = Type::max(e1.ty(), e2.ty());
    assert!(
        (t.is_vector() && t.vector_of().is_integer()) || t.is_integer(),
        "abs_diff() arguments must be integer, got {}",
        t.name()
    );
    raw_call(
        "abs_diff",
        Type::to_unsigned(t),
        vec![cast(e1, t), cast(e2, t)],
    )
}

fn check_geometric(name: &str, t: Type) {
    let ok = if t.is_vector() {
        t.vector_of().is_float() && t.vector_size() <= 4
    } else {
        t.is_float()
    };
    assert!(
        ok,
        "{name}() argument must be float or a float vector of width <= 4, got {}",
        t.name()
    );
}

/// Euclidean length of a float scalar or short float vector.
pub fn length(e: Expr) -> Expr {
    check_geometric("length", e.ty());
    raw_call("length", Type::FLOAT, vec![e])
}

/// Euclidean distance between two equal-typed float values.
pub fn distance(e1: Expr, e2: Expr) -> Expr {
    let t = e1.ty();
    assert!(
        t == e2.ty(),
        "distance() arguments must agree, got {} and {}",
        t.name(),
        e2.ty().name()
    );
    check_geometric("distance", t);
    raw_call("distance", Type::FLOAT, vec![e1, e2])
}

/// Dot product of two equal-typed float values.
pub fn dot(e1: Expr, e2: Expr) -> Expr {
    let t = e1.ty();
    assert!(
        t == e2.ty(),
        "dot() arguments must agree, got {} and {}",
        t.name(),
        e2.ty().name()
    );
    check_geometric("dot", t);
    raw_call("dot", Type::FLOAT, vec![e1, e2])
}

/// True for names the generated kernel source may call without declaring.
/// The loopback driver validates submitted source against this set.
pub(crate) fn is_builtin(name: &str) -> bool {
    CLASS_INTRINSIC_NAMES.contains(&name)
        || WORK_ITEM_NAMES.contains(&name)
        || matches!(
            name,
            "get_work_dim"
                | "abs"
                | "abs_diff"
                | "length"
                | "distance"
                | "dot"
                | "read_imagef"
                | "write_imagef"
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::arg;

    #[test]
    fn class_calls_promote_and_cast_arguments() {
        let e = min(cnst(1i32), cnst(2.0f32));
        assert_eq!(e.ty(), Type::FLOAT);
        let src = e.build();
        assert!(src.contains("min(((float) 0x1), 2.0e0f)"), "in:\n{src}");
    }

    #[test]
    fn work_item_queries_take_a_dimension_constant() {
        let e = get_global_id(0);
        assert_eq!(e.ty(), Type::SIZE_T);
        assert!(e.build().contains("get_global_id(0x0u)"));
    }

    #[test]
    fn abs_yields_the_unsigned_kind() {
        assert_eq!(abs(cnst(-3i32)).ty(), Type::UINT);
        assert_eq!(abs_diff(cnst(1i16), cnst(2i16)).ty(), Type::USHORT);
    }

    #[test]
    #[should_panic]
    fn integer_intrinsics_reject_floats() {
        clz(cnst(1.0f32));
    }

    #[test]
    #[should_panic]
    fn dot_rejects_wide_vectors() {
        let a = arg::<[f32; 8]>();
        dot(a.clone(), a);
    }

    #[test]
    #[should_panic]
    fn call_checks_non_wildcard_types() {
        call("frexp", Type::FLOAT, &[Type::FLOAT], vec![cnst(1i32)]);
    }

    #[test]
    fn vector_arguments_keep_their_width() {
        let a = arg::<[f32; 4]>();
        let e = sqrt(a.clone());
        assert_eq!(e.ty(), Type::vector(4, Type::FLOAT));
    }
}
