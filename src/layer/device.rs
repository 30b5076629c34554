//! Asynchronous kernel compilation state for device layers.
//!
//! A [`DeviceBuildCore`] runs one build per cache generation: the first
//! `ensure_build` snapshots the layer's named expressions, submits one
//! asynchronous program compile per expression and returns immediately.
//! Driver completion callbacks — arriving on arbitrary threads — record each
//! program under the core's mutex; when the recorded count reaches the
//! expected count the condition variable wakes every waiter.
//!
//! A kernel handle is present in the map iff its program compiled and the
//! `main_kernel` entry point resolved; a present program with an absent
//! handle means the compile failed and the log is retained on the program.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Condvar, Mutex};

use crate::driver::{BuildStatus, Kernel, Program};
use crate::error::{Error, Result};
use crate::expr::Expr;

use super::LayerContext;

#[derive(Default)]
struct BuildState {
    started: bool,
    finished: bool,
    expected: usize,
    kernels: HashMap<String, (Program, Option<Kernel>)>,
}

struct BuildInner {
    state: Mutex<BuildState>,
    done: Condvar,
}

impl BuildInner {
    fn program_ready(&self, name: String, program: Program, device: &crate::driver::Device) {
        let kernel = match program.build_status(device) {
            Ok(BuildStatus::Success) => match program.kernel("main_kernel") {
                Ok(k) => Some(k),
                Err(err) => {
                    eprintln!("[layer-build] kernel \"{name}\": entry point lookup failed: {err}");
                    None
                }
            },
            Ok(_) => {
                eprintln!("[layer-build] kernel \"{name}\" failed to compile");
                None
            }
            Err(err) => {
                eprintln!("[layer-build] kernel \"{name}\": status query failed: {err}");
                None
            }
        };
        let mut state = self.state.lock().unwrap();
        state.kernels.insert(name, (program, kernel));
        if state.started && state.kernels.len() >= state.expected {
            state.finished = true;
            self.done.notify_all();
        }
    }
}

/// Build state embedded by layers that compile kernels.
pub struct DeviceBuildCore {
    inner: Arc<BuildInner>,
}

impl Default for DeviceBuildCore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBuildCore {
    pub fn new() -> DeviceBuildCore {
        DeviceBuildCore {
            inner: Arc::new(BuildInner {
                state: Mutex::new(BuildState::default()),
                done: Condvar::new(),
            }),
        }
    }

    pub fn build_started(&self) -> bool {
        self.inner.state.lock().unwrap().started
    }

    pub fn build_finished(&self) -> bool {
        self.inner.state.lock().unwrap().finished
    }

    /// Start compiling `expressions` unless a build is already running or
    /// done. Submission happens outside the lock; completion callbacks carry
    /// the results back in.
    pub fn ensure_build(
        &self,
        ctx: &LayerContext,
        expressions: BTreeMap<String, Expr>,
    ) -> Result<()> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.started {
                return Ok(());
            }
            state.started = true;
            state.expected = expressions.len();
            if expressions.is_empty() {
                state.finished = true;
                self.inner.done.notify_all();
                return Ok(());
            }
        }
        let device = ctx.device.clone();
        let mut submitted = 0usize;
        for (name, expr) in expressions {
            let outcome = (|| {
                let source = expr.build();
                let program = ctx.context.program(&source)?;
                let inner = Arc::clone(&self.inner);
                let cb_program = program.clone();
                let cb_device = device.clone();
                let cb_name = name.clone();
                program.build_async("", move || {
                    inner.program_ready(cb_name, cb_program, &cb_device)
                })
            })();
            match outcome {
                Ok(()) => submitted += 1,
                Err(err) => {
                    // Shrink the completion target to what actually went out
                    // so waiters are not stranded.
                    let mut state = self.inner.state.lock().unwrap();
                    state.expected = submitted;
                    if state.kernels.len() >= state.expected {
                        state.finished = true;
                        self.inner.done.notify_all();
                    }
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    /// Block until the running build completes, then look up `name`.
    pub fn wait_kernel(&self, name: &str) -> Result<Kernel> {
        let mut state = self.inner.state.lock().unwrap();
        if !state.started {
            return Err(Error::NotFound(format!("kernel:{name}")));
        }
        while !state.finished {
            state = self.inner.done.wait(state).unwrap();
        }
        match state.kernels.get(name) {
            None => Err(Error::NotFound(format!("kernel:{name}"))),
            Some((_, Some(kernel))) => Ok(kernel.clone()),
            Some((program, None)) => Err(Error::Build {
                name: name.to_string(),
                program: program.clone(),
            }),
        }
    }

    /// Forget every build product. Waits out an in-flight build first so no
    /// stale completion callback can repopulate the cleared map.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock().unwrap();
        while state.started && !state.finished {
            state = self.inner.done.wait(state).unwrap();
        }
        state.started = false;
        state.finished = false;
        state.expected = 0;
        state.kernels.clear();
    }
}
