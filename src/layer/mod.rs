//! Reusable computation units over the expression DSL.
//!
//! A layer owns named argument slots accepting child layers, an optional
//! coordinate input, and a monotonically increasing version. Binding an
//! argument re-parents the child, bumps the owner's version and invalidates
//! caches up the parent chain; the parent back-pointer is weak, so a child
//! never extends its parent's lifetime.
//!
//! Layers that contribute compiled kernels embed a
//! [`device::DeviceBuildCore`] and report it from [`Layer::device_core`];
//! the provided [`Layer::build`]/[`Layer::kernel`]/[`Layer::reset_cache`]
//! methods then drive asynchronous compilation and kernel caching.

pub mod device;
pub mod registry;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use bitflags::bitflags;

use crate::driver::{Context, Device, Kernel, Queue};
use crate::error::{Error, Result};
use crate::expr::Expr;

use device::DeviceBuildCore;

bitflags! {
    /// Value kinds a layer produces or an argument slot accepts.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct LayerMask: u32 {
        const FLOAT = 1 << 0;
        const COLOR = 1 << 1;
        const VECTOR2D = 1 << 2;
    }
}

impl LayerMask {
    pub const ANY: LayerMask = LayerMask::all();

    /// Masks are compatible when they share at least one kind.
    pub fn compatible(self, other: LayerMask) -> bool {
        self.intersects(other)
    }
}

/// Compute context a layer lives in: context, chosen device, command queue.
#[derive(Clone)]
pub struct LayerContext {
    pub context: Context,
    pub device: Device,
    pub queue: Queue,
}

/// Snapshot of one argument slot.
#[derive(Clone)]
pub struct LayerArgument {
    pub name: String,
    pub accepts: LayerMask,
    pub value: Option<Arc<dyn Layer>>,
}

struct Slot {
    name: String,
    accepts: LayerMask,
    value: Option<Arc<dyn Layer>>,
}

struct CoreState {
    slots: Vec<Slot>,
    position: Option<Expr>,
    version: u64,
    parent: Option<Weak<dyn Layer>>,
}

/// Shared state every layer embeds.
pub struct LayerCore {
    ctx: LayerContext,
    state: Mutex<CoreState>,
}

impl LayerCore {
    /// New core with the given argument slots, in declaration order.
    pub fn new(ctx: LayerContext, slots: &[(&str, LayerMask)]) -> LayerCore {
        LayerCore {
            ctx,
            state: Mutex::new(CoreState {
                slots: slots
                    .iter()
                    .map(|(name, accepts)| Slot {
                        name: name.to_string(),
                        accepts: *accepts,
                        value: None,
                    })
                    .collect(),
                position: None,
                version: 0,
                parent: None,
            }),
        }
    }

    pub fn context(&self) -> &LayerContext {
        &self.ctx
    }

    pub fn version(&self) -> u64 {
        self.state.lock().unwrap().version
    }

    pub fn inc_version(&self) {
        self.state.lock().unwrap().version += 1;
    }

    pub fn set_version(&self, version: u64) {
        self.state.lock().unwrap().version = version;
    }

    pub fn argument_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .slots
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }

    /// Slot lookup by name.
    pub fn argument(&self, name: &str) -> Result<LayerArgument> {
        let state = self.state.lock().unwrap();
        state
            .slots
            .iter()
            .find(|s| s.name == name)
            .map(|s| LayerArgument {
                name: s.name.clone(),
                accepts: s.accepts,
                value: s.value.clone(),
            })
            .ok_or_else(|| Error::NotFound(format!("argument:{name}")))
    }

    /// Bound child layers, in slot order.
    pub fn bound_children(&self) -> Vec<Arc<dyn Layer>> {
        self.state
            .lock()
            .unwrap()
            .slots
            .iter()
            .filter_map(|s| s.value.clone())
            .collect()
    }

    pub fn position(&self) -> Option<Expr> {
        self.state.lock().unwrap().position.clone()
    }

    pub(crate) fn store_position(&self, position: Expr) {
        self.state.lock().unwrap().position = Some(position);
    }

    pub fn parent(&self) -> Option<Arc<dyn Layer>> {
        self.state
            .lock()
            .unwrap()
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub(crate) fn set_parent(&self, parent: Weak<dyn Layer>) {
        self.state.lock().unwrap().parent = Some(parent);
    }

    fn bind_slot(&self, name: &str, child: Arc<dyn Layer>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let slot = state
            .slots
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::NotFound(format!("argument:{name}")))?;
        slot.value = Some(child);
        Ok(())
    }
}

/// A reusable computation unit. Implementors provide their output expression
/// and, for device layers, the kernel expressions they contribute; the
/// build/cache machinery is provided.
pub trait Layer: Send + Sync {
    fn core(&self) -> &LayerCore;

    /// Kinds this layer's output belongs to.
    fn output_mask(&self) -> LayerMask;

    /// The layer's output expression at a work-item index.
    fn compute(&self, queue: &Queue, work_size: usize) -> Result<Expr>;

    /// Named kernel expressions this layer contributes; empty for host-only
    /// layers.
    fn expressions(&self) -> BTreeMap<String, Expr> {
        BTreeMap::new()
    }

    /// The embedded build state, when this layer compiles kernels.
    fn device_core(&self) -> Option<&DeviceBuildCore> {
        None
    }

    fn version(&self) -> u64 {
        self.core().version()
    }

    /// Set the coordinate input and invalidate caches up the parent chain.
    fn set_position(&self, position: Expr) {
        self.core().store_position(position);
        self.core().inc_version();
        self.reset_cache();
    }

    /// Drop cached build products here and on every ancestor. Waits out any
    /// in-flight build first.
    fn reset_cache(&self) {
        if let Some(dev) = self.device_core() {
            dev.clear();
        }
        if let Some(parent) = self.core().parent() {
            parent.reset_cache();
        }
    }

    /// Recursively build every bound child, then this layer's own kernels.
    /// Idempotent; a second call after a completed build is a no-op.
    fn build(&self) -> Result<()> {
        for child in self.core().bound_children() {
            child.build()?;
        }
        if let Some(dev) = self.device_core() {
            dev.ensure_build(self.core().context(), self.expressions())?;
        }
        Ok(())
    }

    /// Compiled kernel by name. Triggers the build if necessary and blocks
    /// until every kernel of this layer has finished compiling.
    fn kernel(&self, name: &str) -> Result<Kernel> {
        self.build()?;
        match self.device_core() {
            Some(dev) => dev.wait_kernel(name),
            None => Err(Error::NotFound(format!("kernel:{name}"))),
        }
    }
}

/// Bind `child` into `owner`'s argument slot `name`.
///
/// Panics when the slot's accepted mask and the child's output mask share no
/// kind. Re-parents the child, bumps the owner's version and invalidates
/// caches up the parent chain.
pub fn bind_argument(owner: &Arc<dyn Layer>, name: &str, child: Arc<dyn Layer>) -> Result<()> {
    let slot = owner.core().argument(name)?;
    assert!(
        slot.accepts.compatible(child.output_mask()),
        "argument \"{name}\" accepts {:?}, layer produces {:?}",
        slot.accepts,
        child.output_mask()
    );
    child.core().set_parent(Arc::downgrade(owner));
    owner.core().bind_slot(name, child)?;
    owner.core().inc_version();
    owner.reset_cache();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::loopback::LoopbackDriver;
    use crate::driver::{Driver, DriverApi, QueueOptions};
    use crate::dsl::cnst;

    fn test_ctx() -> LayerContext {
        let api: Arc<dyn DriverApi> = LoopbackDriver::new();
        let driver = Driver::new(api);
        let device = driver.platforms().unwrap()[0].devices().unwrap().remove(0);
        let context = Context::new(&[device.clone()]).unwrap();
        let queue = context.queue(&device, QueueOptions::default()).unwrap();
        LayerContext {
            context,
            device,
            queue,
        }
    }

    struct ConstantLayer {
        core: LayerCore,
    }

    impl ConstantLayer {
        fn new(ctx: LayerContext) -> Arc<dyn Layer> {
            Arc::new(ConstantLayer {
                core: LayerCore::new(ctx, &[("source", LayerMask::FLOAT)]),
            })
        }
    }

    impl Layer for ConstantLayer {
        fn core(&self) -> &LayerCore {
            &self.core
        }

        fn output_mask(&self) -> LayerMask {
            LayerMask::FLOAT
        }

        fn compute(&self, _queue: &Queue, _work_size: usize) -> Result<Expr> {
            Ok(cnst(1.0f32))
        }
    }

    #[test]
    fn mask_compatibility_is_intersection() {
        assert!(LayerMask::ANY.compatible(LayerMask::FLOAT));
        assert!(!LayerMask::COLOR.compatible(LayerMask::VECTOR2D));
        assert!((LayerMask::COLOR | LayerMask::FLOAT).compatible(LayerMask::FLOAT));
    }

    #[test]
    fn binding_bumps_version_and_sets_parent() {
        let ctx = test_ctx();
        let parent = ConstantLayer::new(ctx.clone());
        let child = ConstantLayer::new(ctx);
        let before = parent.version();
        bind_argument(&parent, "source", child.clone()).unwrap();
        assert!(parent.version() > before);
        assert!(
            child
                .core()
                .parent()
                .is_some_and(|p| std::ptr::eq(p.core(), parent.core()))
        );
    }

    #[test]
    fn binding_an_unknown_slot_is_not_found() {
        let ctx = test_ctx();
        let parent = ConstantLayer::new(ctx.clone());
        let child = ConstantLayer::new(ctx);
        assert!(matches!(
            bind_argument(&parent, "missing", child),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn parent_pointer_is_weak() {
        let ctx = test_ctx();
        let child = ConstantLayer::new(ctx.clone());
        {
            let parent = ConstantLayer::new(ctx);
            bind_argument(&parent, "source", child.clone()).unwrap();
            assert!(child.core().parent().is_some());
        }
        assert!(child.core().parent().is_none());
    }

    #[test]
    fn set_position_invalidates_and_bumps() {
        let ctx = test_ctx();
        let layer = ConstantLayer::new(ctx);
        let before = layer.version();
        layer.set_position(cnst([0.0f32, 0.0]));
        assert!(layer.version() > before);
        assert!(layer.core().position().is_some());
    }
}
