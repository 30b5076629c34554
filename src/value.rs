//! Host-side literal values and their kernel-source spelling.
//!
//! [`Scalar`] is the closed set of host-transferable scalars; [`ConstValue`]
//! adds same-kind vectors of width 2, 4, 8 or 16. Both know their kernel
//! [`Type`], their literal syntax (integers hex with a sign suffix, floats
//! scientific with an `f` suffix, vectors as parenthesized lists) and their
//! raw bytes for kernel argument transport.

use crate::types::Type;

/// A single host scalar tagged with its kernel kind.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scalar {
    Char(i8),
    Uchar(u8),
    Short(i16),
    Ushort(u16),
    Int(i32),
    Uint(u32),
    Long(i64),
    Ulong(u64),
    Float(f32),
}

impl Scalar {
    pub fn ty(self) -> Type {
        match self {
            Scalar::Char(_) => Type::CHAR,
            Scalar::Uchar(_) => Type::UCHAR,
            Scalar::Short(_) => Type::SHORT,
            Scalar::Ushort(_) => Type::USHORT,
            Scalar::Int(_) => Type::INT,
            Scalar::Uint(_) => Type::UINT,
            Scalar::Long(_) => Type::LONG,
            Scalar::Ulong(_) => Type::ULONG,
            Scalar::Float(_) => Type::FLOAT,
        }
    }

    /// Append the kernel-source literal for this value.
    pub fn write_literal(self, out: &mut String) {
        match self {
            Scalar::Char(v) => write_int(out, v as i64, ""),
            Scalar::Uchar(v) => write_uint(out, v as u64, "u"),
            Scalar::Short(v) => write_int(out, v as i64, ""),
            Scalar::Ushort(v) => write_uint(out, v as u64, "u"),
            Scalar::Int(v) => write_int(out, v as i64, ""),
            Scalar::Uint(v) => write_uint(out, v as u64, "u"),
            Scalar::Long(v) => write_int(out, v, "l"),
            Scalar::Ulong(v) => write_uint(out, v, "ul"),
            Scalar::Float(v) => write_float(out, v),
        }
    }

    /// Raw little-endian bytes, as pushed across the driver seam.
    pub fn bytes(self) -> Vec<u8> {
        match self {
            Scalar::Char(v) => bytemuck::bytes_of(&v).to_vec(),
            Scalar::Uchar(v) => bytemuck::bytes_of(&v).to_vec(),
            Scalar::Short(v) => bytemuck::bytes_of(&v).to_vec(),
            Scalar::Ushort(v) => bytemuck::bytes_of(&v).to_vec(),
            Scalar::Int(v) => bytemuck::bytes_of(&v).to_vec(),
            Scalar::Uint(v) => bytemuck::bytes_of(&v).to_vec(),
            Scalar::Long(v) => bytemuck::bytes_of(&v).to_vec(),
            Scalar::Ulong(v) => bytemuck::bytes_of(&v).to_vec(),
            Scalar::Float(v) => bytemuck::bytes_of(&v).to_vec(),
        }
    }
}

fn write_int(out: &mut String, v: i64, suffix: &str) {
    if v < 0 {
        out.push_str(&format!("-{:#x}{suffix}", v.unsigned_abs()));
    } else {
        out.push_str(&format!("{v:#x}{suffix}"));
    }
}

fn write_uint(out: &mut String, v: u64, suffix: &str) {
    out.push_str(&format!("{v:#x}{suffix}"));
}

pub(crate) fn write_float(out: &mut String, v: f32) {
    if !v.is_finite() {
        out.push_str("0.0e0f");
        return;
    }
    let s = format!("{v:e}");
    let exp = s.find('e').expect("scientific format");
    if s[..exp].contains('.') {
        out.push_str(&s);
    } else {
        out.push_str(&s[..exp]);
        out.push_str(".0");
        out.push_str(&s[exp..]);
    }
    out.push('f');
}

/// A scalar or same-kind vector literal.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstValue {
    Scalar(Scalar),
    Vector(Vec<Scalar>),
}

impl ConstValue {
    /// Vector value over same-kind lanes.
    ///
    /// Panics unless the width is 2, 4, 8 or 16 and every lane has the same
    /// kind.
    pub fn vector(lanes: Vec<Scalar>) -> ConstValue {
        assert!(
            matches!(lanes.len(), 2 | 4 | 8 | 16),
            "invalid vector literal width {}",
            lanes.len()
        );
        let elem = lanes[0].ty();
        assert!(
            lanes.iter().all(|l| l.ty() == elem),
            "vector literal lanes must share one kind"
        );
        ConstValue::Vector(lanes)
    }

    pub fn ty(&self) -> Type {
        match self {
            ConstValue::Scalar(s) => s.ty(),
            ConstValue::Vector(lanes) => Type::vector(lanes.len(), lanes[0].ty()),
        }
    }

    pub fn write_literal(&self, out: &mut String) {
        match self {
            ConstValue::Scalar(s) => s.write_literal(out),
            ConstValue::Vector(lanes) => {
                out.push('(');
                for (i, lane) in lanes.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    lane.write_literal(out);
                }
                out.push(')');
            }
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        match self {
            ConstValue::Scalar(s) => s.bytes(),
            ConstValue::Vector(lanes) => lanes.iter().flat_map(|l| l.bytes()).collect(),
        }
    }
}

/// Host types that convert to a kernel value; the construction surface in
/// [`crate::dsl`] is generic over this. `zero()` seeds unset argument slots
/// and names the kernel type of typed slots and variables.
pub trait HostValue: Copy + Into<ConstValue> {
    fn zero() -> Self;
}

macro_rules! scalar_conversions {
    ($($host:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$host> for Scalar {
                fn from(v: $host) -> Scalar {
                    Scalar::$variant(v)
                }
            }
            impl From<$host> for ConstValue {
                fn from(v: $host) -> ConstValue {
                    ConstValue::Scalar(Scalar::$variant(v))
                }
            }
            impl HostValue for $host {
                fn zero() -> Self {
                    Default::default()
                }
            }
        )*
    };
}

scalar_conversions! {
    i8 => Char,
    u8 => Uchar,
    i16 => Short,
    u16 => Ushort,
    i32 => Int,
    u32 => Uint,
    i64 => Long,
    u64 => Ulong,
    f32 => Float,
}

macro_rules! vector_conversions {
    ($($n:literal),*) => {
        $(
            impl<T: Copy + Into<Scalar>> From<[T; $n]> for ConstValue {
                fn from(v: [T; $n]) -> ConstValue {
                    ConstValue::vector(v.iter().map(|x| (*x).into()).collect())
                }
            }
            impl<T: Copy + Default + Into<Scalar>> HostValue for [T; $n] {
                fn zero() -> Self {
                    [T::default(); $n]
                }
            }
        )*
    };
}

vector_conversions!(2, 4, 8, 16);

#[cfg(test)]
mod tests {
    use super::*;

    fn literal(v: impl Into<ConstValue>) -> String {
        let mut s = String::new();
        v.into().write_literal(&mut s);
        s
    }

    #[test]
    fn integer_literals_are_hex_with_sign_suffix() {
        assert_eq!(literal(63i32), "0x3f");
        assert_eq!(literal(63u32), "0x3fu");
        assert_eq!(literal(63i64), "0x3fl");
        assert_eq!(literal(63u64), "0x3ful");
        assert_eq!(literal(-5i32), "-0x5");
        assert_eq!(literal(0u8), "0x0u");
    }

    #[test]
    fn float_literals_are_scientific() {
        assert_eq!(literal(2.0f32), "2.0e0f");
        assert_eq!(literal(1.5f32), "1.5e0f");
        assert_eq!(literal(-0.25f32), "-2.5e-1f");
        assert_eq!(literal(f32::NAN), "0.0e0f");
    }

    #[test]
    fn vector_literals_are_parenthesized_lists() {
        assert_eq!(literal([1.0f32, 2.0f32]), "(1.0e0f, 2.0e0f)");
        assert_eq!(literal([1i32, 2, 3, 4]), "(0x1, 0x2, 0x3, 0x4)");
    }

    #[test]
    fn value_types() {
        assert_eq!(ConstValue::from(1i32).ty(), Type::INT);
        assert_eq!(
            ConstValue::from([1.0f32, 2.0]).ty(),
            Type::vector(2, Type::FLOAT)
        );
    }

    #[test]
    #[should_panic]
    fn vector_width_must_be_valid() {
        ConstValue::vector(vec![Scalar::Int(1), Scalar::Int(2), Scalar::Int(3)]);
    }

    #[test]
    fn bytes_round_scalar_values() {
        assert_eq!(Scalar::Int(1).bytes(), 1i32.to_ne_bytes().to_vec());
        assert_eq!(ConstValue::from([1.0f32, 2.0]).bytes().len(), 8);
    }
}
