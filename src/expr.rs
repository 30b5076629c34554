//! The expression DAG and its emission/binding protocol.
//!
//! [`Expr`] is a cheaply clonable shared handle to an immutable node; trees
//! are DAGs because a node may be referenced from several parents. Every
//! node carries a stable identity allocated at construction, which names its
//! kernel parameter slot and deduplicates the emission walks.
//!
//! Kernel generation is three source passes over the tree — global
//! declarations, hoisted locals, inline value text — plus two argument
//! walks: signature collection at build time and value binding at dispatch
//! time. All five walks visit children in the same order and carry a fresh
//! per-walk `seen` set, so a shared node is processed exactly once per walk
//! and signature order always equals binding order.
//!
//! Nodes are frozen once constructed; only the argument slots
//! (`Argument`, `BufferArgument`, `ImageArgument`) hold their current host
//! value behind a mutex, so rebinding changes bindings, never structure.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::driver::{ArgValue, Buffer, Image, Kernel};
use crate::error::{Error, Result};
use crate::types::Type;
use crate::value::{ConstValue, Scalar};

/// Stable per-process node identity.
pub type NodeId = u64;

fn next_node_id() -> NodeId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

type Seen = HashSet<NodeId>;

/// Binary operator token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Or,
    And,
    BitOr,
    BitAnd,
    BitXor,
    Eq,
    Ne,
}

impl BinOp {
    pub fn token(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Or => "||",
            BinOp::And => "&&",
            BinOp::BitOr => "|",
            BinOp::BitAnd => "&",
            BinOp::BitXor => "^",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
        }
    }
}

/// Unary operator token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Not,
    BitNot,
    Neg,
}

impl UnOp {
    pub fn token(self) -> &'static str {
        match self {
            UnOp::Not => "!",
            UnOp::BitNot => "~",
            UnOp::Neg => "-",
        }
    }
}

/// Image argument access direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageAccess {
    Read,
    Write,
}

/// The four predeclared image samplers: filter crossed with coordinate
/// normalization. Each image read emits the one sampler constant it uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageSampling {
    NearestPixel,
    LinearPixel,
    NearestNormalized,
    LinearNormalized,
}

impl ImageSampling {
    pub fn sampler_name(self) -> &'static str {
        match self {
            ImageSampling::NearestPixel => "smp_f_n",
            ImageSampling::LinearPixel => "smp_f_l",
            ImageSampling::NearestNormalized => "smp_t_n",
            ImageSampling::LinearNormalized => "smp_t_l",
        }
    }

    fn declaration(self) -> &'static str {
        match self {
            ImageSampling::NearestPixel => {
                "const sampler_t smp_f_n = CLK_NORMALIZED_COORDS_FALSE | CLK_ADDRESS_CLAMP | CLK_FILTER_NEAREST;\n"
            }
            ImageSampling::LinearPixel => {
                "const sampler_t smp_f_l = CLK_NORMALIZED_COORDS_FALSE | CLK_ADDRESS_CLAMP | CLK_FILTER_LINEAR;\n"
            }
            ImageSampling::NearestNormalized => {
                "const sampler_t smp_t_n = CLK_NORMALIZED_COORDS_TRUE | CLK_ADDRESS_CLAMP | CLK_FILTER_NEAREST;\n"
            }
            ImageSampling::LinearNormalized => {
                "const sampler_t smp_t_l = CLK_NORMALIZED_COORDS_TRUE | CLK_ADDRESS_CLAMP | CLK_FILTER_LINEAR;\n"
            }
        }
    }

    /// Reserved identity guarding the sampler declaration in the global pass.
    fn sentinel(self) -> NodeId {
        NodeId::MAX - self as NodeId
    }
}

pub(crate) enum NodeKind {
    Const(ConstValue),
    Argument {
        ty: Type,
        value: Mutex<ConstValue>,
    },
    BufferArgument {
        elem: Type,
        value: Mutex<Option<Buffer>>,
    },
    ImageArgument {
        access: ImageAccess,
        value: Mutex<Option<Image>>,
    },
    ArrayConst {
        elem: Type,
        dims: Vec<usize>,
        data: Vec<Scalar>,
    },
    SelectBuffer {
        buffer: Expr,
        index: Expr,
    },
    SelectVector {
        vector: Expr,
        lane: usize,
    },
    SelectImage {
        image: Expr,
        pos: Expr,
        sampling: ImageSampling,
    },
    SelectArray {
        array: Expr,
        indices: Vec<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Expr,
        rhs: Expr,
    },
    Unary {
        op: UnOp,
        operand: Expr,
    },
    Ternary {
        cond: Expr,
        then: Expr,
        otherwise: Expr,
    },
    Conditional {
        cond: Expr,
        then: Option<Expr>,
        otherwise: Option<Expr>,
    },
    Variable {
        ty: Type,
        init: Option<Expr>,
    },
    Set {
        target: Expr,
        value: Expr,
    },
    SetImage {
        image: Expr,
        pos: Expr,
        color: Expr,
    },
    Sequence(Vec<Expr>),
    ForRange {
        index: Expr,
        begin: Expr,
        end: Expr,
        body: Expr,
    },
    Cast {
        expr: Expr,
        to: Type,
    },
    Call {
        name: String,
        ret: Type,
        args: Vec<Expr>,
    },
}

struct Node {
    id: NodeId,
    kind: NodeKind,
}

/// Shared handle to one expression node.
#[derive(Clone)]
pub struct Expr {
    node: Arc<Node>,
}

impl Expr {
    pub(crate) fn from_kind(kind: NodeKind) -> Expr {
        Expr {
            node: Arc::new(Node {
                id: next_node_id(),
                kind,
            }),
        }
    }

    pub(crate) fn kind(&self) -> &NodeKind {
        &self.node.kind
    }

    pub fn id(&self) -> NodeId {
        self.node.id
    }

    /// True when both handles alias the same node.
    pub fn same_node(&self, other: &Expr) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    /// Lexically unique kernel identifier derived from the node identity.
    pub fn param_name(&self) -> String {
        format!("e{:x}", self.node.id)
    }

    /// Result type of the expression.
    pub fn ty(&self) -> Type {
        match &self.node.kind {
            NodeKind::Const(v) => v.ty(),
            NodeKind::Argument { ty, .. } => *ty,
            NodeKind::BufferArgument { elem, .. } => Type::pointer(*elem),
            NodeKind::ImageArgument { access, .. } => match access {
                ImageAccess::Read => Type::IMAGE_R,
                ImageAccess::Write => Type::IMAGE_W,
            },
            NodeKind::ArrayConst { elem, .. } => *elem,
            NodeKind::SelectBuffer { buffer, .. } => buffer.ty().pointee(),
            NodeKind::SelectVector { vector, .. } => vector.ty().vector_of(),
            NodeKind::SelectImage { .. } => Type::vector(4, Type::FLOAT),
            NodeKind::SelectArray { array, .. } => array.ty(),
            NodeKind::Binary { lhs, rhs, .. } => Type::max(lhs.ty(), rhs.ty()),
            NodeKind::Unary { operand, .. } => operand.ty(),
            NodeKind::Ternary {
                then, otherwise, ..
            } => Type::max(then.ty(), otherwise.ty()),
            NodeKind::Conditional { .. } => Type::VOID,
            NodeKind::Variable { ty, .. } => *ty,
            NodeKind::Set { target, .. } => target.ty(),
            NodeKind::SetImage { .. } => Type::VOID,
            NodeKind::Sequence(_) => Type::VOID,
            NodeKind::ForRange { .. } => Type::VOID,
            NodeKind::Cast { to, .. } => *to,
            NodeKind::Call { ret, .. } => *ret,
        }
    }

    /// True for expressions that may stand on the left of an assignment.
    pub fn is_lvalue(&self) -> bool {
        match &self.node.kind {
            NodeKind::SelectBuffer { .. } => true,
            NodeKind::SelectVector { vector, .. } => vector.is_lvalue(),
            NodeKind::Variable { .. } => true,
            _ => false,
        }
    }

    /// Update the host value of a scalar/vector argument slot.
    ///
    /// Panics if this node is not an `Argument` or the value kind differs
    /// from the slot type.
    pub fn set_value(&self, v: impl Into<ConstValue>) {
        let v = v.into();
        match &self.node.kind {
            NodeKind::Argument { ty, value } => {
                assert!(
                    v.ty() == *ty,
                    "argument slot is {}, got {}",
                    ty.name(),
                    v.ty().name()
                );
                *value.lock().unwrap() = v;
            }
            _ => panic!("set_value() on a non-argument node"),
        }
    }

    /// Update the buffer bound to a buffer argument slot.
    pub fn set_buffer(&self, b: Buffer) {
        match &self.node.kind {
            NodeKind::BufferArgument { value, .. } => {
                *value.lock().unwrap() = Some(b);
            }
            _ => panic!("set_buffer() on a non-buffer-argument node"),
        }
    }

    /// Update the image bound to an image argument slot.
    pub fn set_image(&self, img: Image) {
        match &self.node.kind {
            NodeKind::ImageArgument { value, .. } => {
                *value.lock().unwrap() = Some(img);
            }
            _ => panic!("set_image() on a non-image-argument node"),
        }
    }

    /// Children in the fixed traversal order shared by every walk.
    fn children(&self) -> Vec<&Expr> {
        match &self.node.kind {
            NodeKind::Const(_)
            | NodeKind::Argument { .. }
            | NodeKind::BufferArgument { .. }
            | NodeKind::ImageArgument { .. }
            | NodeKind::ArrayConst { .. } => Vec::new(),
            NodeKind::SelectBuffer { buffer, index } => vec![buffer, index],
            NodeKind::SelectVector { vector, .. } => vec![vector],
            NodeKind::SelectImage { image, pos, .. } => vec![image, pos],
            NodeKind::SelectArray { array, indices } => {
                let mut r = vec![array];
                r.extend(indices.iter());
                r
            }
            NodeKind::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            NodeKind::Unary { operand, .. } => vec![operand],
            NodeKind::Ternary {
                cond,
                then,
                otherwise,
            } => vec![cond, then, otherwise],
            NodeKind::Conditional {
                cond,
                then,
                otherwise,
            } => {
                let mut r = vec![cond];
                r.extend(then.iter());
                r.extend(otherwise.iter());
                r
            }
            NodeKind::Variable { init, .. } => init.iter().collect(),
            NodeKind::Set { target, value } => vec![target, value],
            NodeKind::SetImage { image, pos, color } => vec![image, pos, color],
            NodeKind::Sequence(items) => items.iter().collect(),
            NodeKind::ForRange {
                index,
                begin,
                end,
                body,
            } => vec![index, begin, end, body],
            NodeKind::Cast { expr, .. } => vec![expr],
            NodeKind::Call { args, .. } => args.iter().collect(),
        }
    }

    /// Global-scope declarations (sampler constants, array constants).
    fn global_source(&self, out: &mut String, seen: &mut Seen) {
        if !seen.insert(self.id()) {
            return;
        }
        match &self.node.kind {
            NodeKind::ArrayConst { elem, dims, data } => {
                out.push_str("__local ");
                out.push_str(elem.name());
                out.push(' ');
                out.push_str(&self.param_name());
                if dims.is_empty() {
                    out.push_str(&format!("[{}]", data.len()));
                } else {
                    for d in dims {
                        out.push_str(&format!("[{d}]"));
                    }
                }
                out.push_str(" = ");
                write_array_init(out, data, dims);
                out.push_str(";\n");
            }
            NodeKind::SelectImage { sampling, .. } => {
                if seen.insert(sampling.sentinel()) {
                    out.push_str(sampling.declaration());
                }
            }
            _ => {}
        }
        for child in self.children() {
            child.global_source(out, seen);
        }
    }

    /// Hoisted local declarations inside the kernel body.
    fn local_source(&self, out: &mut String, seen: &mut Seen) {
        if !seen.insert(self.id()) {
            return;
        }
        for child in self.children() {
            child.local_source(out, seen);
        }
        if let NodeKind::Variable { ty, init } = &self.node.kind {
            out.push_str(ty.name());
            out.push(' ');
            out.push_str(&self.param_name());
            if let Some(init) = init {
                out.push_str(" = ");
                init.value_source(out, &mut Seen::new());
            }
            out.push_str(";\n");
        }
    }

    /// Inline value text. Statement nodes guard against re-emission under
    /// sharing through `stmts`.
    fn value_source(&self, out: &mut String, stmts: &mut Seen) {
        match &self.node.kind {
            NodeKind::Const(v) => v.write_literal(out),
            NodeKind::Argument { .. }
            | NodeKind::BufferArgument { .. }
            | NodeKind::ImageArgument { .. }
            | NodeKind::ArrayConst { .. }
            | NodeKind::Variable { .. } => out.push_str(&self.param_name()),
            NodeKind::SelectBuffer { buffer, index } => {
                out.push('(');
                buffer.value_source(out, stmts);
                out.push('[');
                index.value_source(out, stmts);
                out.push_str("])");
            }
            NodeKind::SelectVector { vector, lane } => {
                vector.value_source(out, stmts);
                out.push_str(".s");
                out.push(char::from_digit(*lane as u32, 16).expect("lane below 16"));
            }
            NodeKind::SelectImage {
                image,
                pos,
                sampling,
            } => {
                out.push_str("read_imagef(");
                image.value_source(out, stmts);
                out.push_str(", ");
                out.push_str(sampling.sampler_name());
                out.push_str(", ");
                pos.value_source(out, stmts);
                out.push(')');
            }
            NodeKind::SelectArray { array, indices } => {
                array.value_source(out, stmts);
                for idx in indices {
                    out.push('[');
                    idx.value_source(out, stmts);
                    out.push(']');
                }
            }
            NodeKind::Binary { op, lhs, rhs } => {
                out.push('(');
                lhs.value_source(out, stmts);
                out.push(' ');
                out.push_str(op.token());
                out.push(' ');
                rhs.value_source(out, stmts);
                out.push(')');
            }
            NodeKind::Unary { op, operand } => {
                out.push('(');
                out.push_str(op.token());
                operand.value_source(out, stmts);
                out.push(')');
            }
            NodeKind::Ternary {
                cond,
                then,
                otherwise,
            } => {
                out.push('(');
                cond.value_source(out, stmts);
                out.push_str(" ? ");
                then.value_source(out, stmts);
                out.push_str(" : ");
                otherwise.value_source(out, stmts);
                out.push(')');
            }
            NodeKind::Conditional {
                cond,
                then,
                otherwise,
            } => {
                if !stmts.insert(self.id()) {
                    return;
                }
                match (then, otherwise) {
                    (Some(t), Some(e)) => {
                        out.push_str("if(");
                        cond.value_source(out, stmts);
                        out.push_str(") {\n");
                        t.value_source(out, stmts);
                        out.push_str(";\n} else {\n");
                        e.value_source(out, stmts);
                        out.push_str(";\n};");
                    }
                    (Some(t), None) => {
                        out.push_str("if(");
                        cond.value_source(out, stmts);
                        out.push_str(") {\n");
                        t.value_source(out, stmts);
                        out.push_str(";\n};");
                    }
                    (None, Some(e)) => {
                        out.push_str("if(!");
                        cond.value_source(out, stmts);
                        out.push_str(") {\n");
                        e.value_source(out, stmts);
                        out.push_str(";\n};");
                    }
                    (None, None) => {}
                }
            }
            NodeKind::Set { target, value } => {
                target.value_source(out, stmts);
                out.push_str(" = ");
                value.value_source(out, stmts);
            }
            NodeKind::SetImage { image, pos, color } => {
                out.push_str("write_imagef(");
                image.value_source(out, stmts);
                out.push_str(", ");
                pos.value_source(out, stmts);
                out.push_str(", ");
                color.value_source(out, stmts);
                out.push(')');
            }
            NodeKind::Sequence(items) => {
                for item in items {
                    item.value_source(out, stmts);
                    out.push_str(";\n");
                }
            }
            NodeKind::ForRange {
                index,
                begin,
                end,
                body,
            } => {
                out.push_str("for(");
                index.value_source(out, stmts);
                out.push_str(" = ");
                begin.value_source(out, stmts);
                out.push_str("; ");
                index.value_source(out, stmts);
                out.push_str(" < ");
                end.value_source(out, stmts);
                out.push_str("; ");
                index.value_source(out, stmts);
                out.push_str("++) {\n");
                body.value_source(out, stmts);
                out.push_str(";\n};\n");
            }
            NodeKind::Cast { expr, to } => {
                if expr.ty() == *to {
                    expr.value_source(out, stmts);
                } else if to.is_vector() {
                    out.push_str("convert_");
                    out.push_str(to.name());
                    out.push('(');
                    expr.value_source(out, stmts);
                    out.push(')');
                } else {
                    out.push_str("((");
                    out.push_str(to.name());
                    out.push_str(") ");
                    expr.value_source(out, stmts);
                    out.push(')');
                }
            }
            NodeKind::Call { name, args, .. } => {
                out.push_str(name);
                out.push('(');
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    a.value_source(out, stmts);
                }
                out.push(')');
            }
        }
    }

    fn push_signature(&self, sig: &mut Vec<(Type, String)>, seen: &mut Seen) {
        if !seen.insert(self.id()) {
            return;
        }
        match &self.node.kind {
            NodeKind::Argument { ty, .. } => sig.push((*ty, self.param_name())),
            NodeKind::BufferArgument { elem, .. } => {
                sig.push((Type::pointer(*elem), self.param_name()))
            }
            NodeKind::ImageArgument { access, .. } => {
                let ty = match access {
                    ImageAccess::Read => Type::IMAGE_R,
                    ImageAccess::Write => Type::IMAGE_W,
                };
                sig.push((ty, self.param_name()));
            }
            _ => {}
        }
        for child in self.children() {
            child.push_signature(sig, seen);
        }
    }

    fn bind_walk(&self, binder: &mut Binder<'_>) -> Result<()> {
        if !binder.seen.insert(self.id()) {
            return Ok(());
        }
        match &self.node.kind {
            NodeKind::Argument { value, .. } => {
                let bytes = value.lock().unwrap().bytes();
                binder.push(ArgValue::Data(bytes))?;
            }
            NodeKind::BufferArgument { value, .. } => {
                let buffer = value
                    .lock()
                    .unwrap()
                    .clone()
                    .ok_or_else(|| Error::UnboundArgument(self.param_name()))?;
                binder.push(ArgValue::Buffer(buffer))?;
            }
            NodeKind::ImageArgument { value, .. } => {
                let image = value
                    .lock()
                    .unwrap()
                    .clone()
                    .ok_or_else(|| Error::UnboundArgument(self.param_name()))?;
                binder.push(ArgValue::Image(image))?;
            }
            _ => {}
        }
        for child in self.children() {
            child.bind_walk(binder)?;
        }
        Ok(())
    }

    /// Ordered kernel signature this tree declares: one `(type, name)` entry
    /// per argument node, in depth-first left-to-right order of first
    /// appearance.
    pub fn signature(&self) -> Vec<(Type, String)> {
        let mut sig = Vec::new();
        self.push_signature(&mut sig, &mut Seen::new());
        sig
    }

    /// Generate the complete kernel source for this tree.
    ///
    /// Emits global declarations, the `main_kernel` prolog with the collected
    /// signature, hoisted locals, and the value expression. Repeated calls on
    /// the same tree produce byte-identical text.
    pub fn build(&self) -> String {
        let mut out = String::new();
        self.global_source(&mut out, &mut Seen::new());
        let sig = self.signature();
        out.push_str("kernel void main_kernel(");
        for (i, (ty, name)) in sig.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(ty.name());
            out.push(' ');
            out.push_str(name);
        }
        out.push_str(") {\n");
        self.local_source(&mut out, &mut Seen::new());
        self.value_source(&mut out, &mut Seen::new());
        out.push_str(";\n};\n");
        out
    }

    /// Push the current host values into a compiled kernel's argument slots,
    /// in the same order [`Expr::build`] assigned them.
    pub fn bind_values(&self, kernel: &Kernel) -> Result<()> {
        let mut binder = Binder::new(kernel);
        self.bind_walk(&mut binder)
    }
}

impl std::fmt::Debug for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Expr")
            .field("id", &self.node.id)
            .field("ty", &self.ty().name())
            .finish()
    }
}

fn write_array_init(out: &mut String, data: &[Scalar], dims: &[usize]) {
    out.push('{');
    if dims.len() <= 1 {
        for (i, v) in data.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            v.write_literal(out);
        }
    } else {
        let rows = dims[0];
        let chunk = data.len() / rows;
        for i in 0..rows {
            if i > 0 {
                out.push_str(", ");
            }
            write_array_init(out, &data[i * chunk..(i + 1) * chunk], &dims[1..]);
        }
    }
    out.push('}');
}

/// Walker that pushes argument values into consecutive kernel slots.
pub struct Binder<'a> {
    kernel: &'a Kernel,
    position: u32,
    seen: Seen,
}

impl<'a> Binder<'a> {
    pub fn new(kernel: &'a Kernel) -> Binder<'a> {
        Binder {
            kernel,
            position: 0,
            seen: Seen::new(),
        }
    }

    fn push(&mut self, value: ArgValue) -> Result<()> {
        self.kernel.set_arg(self.position, &value)?;
        self.position += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::*;

    #[test]
    fn shared_argument_appears_once_in_signature() {
        let a = arg::<i32>();
        let sum = a.clone() + a.clone();
        let sig = sum.signature();
        assert_eq!(sig.len(), 1);
        assert_eq!(sig[0].0, Type::INT);
        assert_eq!(sig[0].1, a.param_name());
    }

    #[test]
    fn build_is_deterministic() {
        let a = arg::<f32>();
        let tree = set(var_init(a.clone() * cnst(2.0f32)), a.clone() + cnst(1.0f32));
        let first = tree.build();
        assert_eq!(first, tree.build());
        assert_eq!(first, tree.build());
    }

    #[test]
    fn shared_variable_is_declared_once() {
        let v = var::<i32>();
        let tree = seq([set(v.clone(), cnst(1i32)), set(v.clone(), cnst(2i32))]);
        let src = tree.build();
        let decls = src.matches("int e").count();
        assert_eq!(decls, 1, "one declaration expected in:\n{src}");
    }

    #[test]
    fn shared_conditional_statement_is_emitted_once() {
        let v = var::<i32>();
        let c = cond(equal(cnst(1i32), cnst(1i32)), set(v.clone(), cnst(1i32)), None);
        let tree = seq([c.clone(), c.clone()]);
        let src = tree.build();
        assert_eq!(src.matches("if(").count(), 1, "in:\n{src}");
    }

    #[test]
    fn conditional_with_only_else_branch_negates() {
        let v = var::<i32>();
        let tree = unless(cnst(0i32), set(v.clone(), cnst(1i32)), None);
        let src = tree.build();
        assert!(src.contains("if(!0x0) {"), "in:\n{src}");
    }

    #[test]
    fn cast_to_same_type_is_a_no_op() {
        let e = cast(cnst(1i32), Type::INT);
        let mut out = String::new();
        e.value_source(&mut out, &mut Seen::new());
        assert_eq!(out, "0x1");
    }

    #[test]
    fn cast_to_vector_uses_convert() {
        let e = cast(cnst([1i32, 2]), Type::vector(2, Type::FLOAT));
        let mut out = String::new();
        e.value_source(&mut out, &mut Seen::new());
        assert_eq!(out, "convert_float2((0x1, 0x2))");
    }

    #[test]
    fn array_const_emits_nested_initializer() {
        let a = cnstv(&[1i32, 2, 3, 4, 5, 6], &[2, 3]);
        let tree = select_array(a.clone(), [cnst(0i32), cnst(1i32)]);
        let src = tree.build();
        assert!(
            src.contains(&format!(
                "__local int {}[2][3] = {{{{0x1, 0x2, 0x3}}, {{0x4, 0x5, 0x6}}}};\n",
                a.param_name()
            )),
            "in:\n{src}"
        );
    }

    #[test]
    fn vector_lane_select_uses_hex_digits() {
        let v = arg::<[f32; 16]>();
        let lane = select_lane(v.clone(), 10);
        let mut out = String::new();
        lane.value_source(&mut out, &mut Seen::new());
        assert_eq!(out, format!("{}.sa", v.param_name()));
        assert_eq!(lane.ty(), Type::FLOAT);
    }
}
