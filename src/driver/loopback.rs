//! In-process loopback driver.
//!
//! Backs the test suite (and any GPU-less host) with a [`DriverApi`]
//! implementation that keeps buffers and images as real byte vectors,
//! records kernel argument pushes and dispatches for inspection, and
//! "compiles" programs by checking the submitted source: the entry point
//! must be present, brackets must balance, and every call site must name a
//! known built-in. Kernels are never interpreted; dispatches are recorded,
//! not executed.
//!
//! Asynchronous builds complete on a dedicated worker thread fed through a
//! channel, so build callbacks arrive on a foreign thread exactly like a
//! vendor driver's would.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;

use super::{
    Addressing, ArgValue, BuildStatus, DeviceInfo, DriverApi, DriverError, Filter, Kernel,
    MemAccess, PixelFormat, PlatformInfo, Program, QueueOptions, RawId, WorkSize,
};
use crate::intrinsics;

const CL_INVALID_VALUE: i32 = -30;
const CL_INVALID_MEM_OBJECT: i32 = -38;
const CL_INVALID_PROGRAM_EXECUTABLE: i32 = -45;
const CL_INVALID_KERNEL_NAME: i32 = -46;
const CL_BUILD_PROGRAM_FAILURE: i32 = -11;

const PLATFORM_ID: RawId = 1;
const DEVICE_ID: RawId = 2;

/// A recorded kernel dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dispatch {
    pub kernel: RawId,
    pub work: WorkSize,
}

enum Object {
    Context,
    Buffer {
        data: Vec<u8>,
    },
    Image {
        data: Vec<u8>,
    },
    Sampler,
    Program {
        source: String,
        status: BuildStatus,
        log: String,
    },
    Kernel {
        program: RawId,
        args: BTreeMap<u32, ArgValue>,
    },
    Queue {
        dispatches: Vec<Dispatch>,
    },
}

#[derive(Default)]
struct State {
    next_id: RawId,
    objects: HashMap<RawId, Object>,
    refcounts: HashMap<RawId, usize>,
}

impl State {
    fn insert(&mut self, obj: Object) -> RawId {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(id, obj);
        self.refcounts.insert(id, 1);
        id
    }
}

struct Shared {
    state: Mutex<State>,
}

struct BuildJob {
    program: RawId,
    on_complete: Box<dyn FnOnce() + Send>,
}

pub struct LoopbackDriver {
    shared: Arc<Shared>,
    jobs: Sender<BuildJob>,
}

impl LoopbackDriver {
    pub fn new() -> Arc<LoopbackDriver> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                next_id: DEVICE_ID + 1,
                objects: HashMap::new(),
                refcounts: HashMap::new(),
            }),
        });
        let (jobs, queue) = crossbeam_channel::unbounded::<BuildJob>();
        let worker = Arc::clone(&shared);
        std::thread::spawn(move || {
            while let Ok(job) = queue.recv() {
                worker.compile(job.program);
                (job.on_complete)();
            }
        });
        Arc::new(LoopbackDriver { shared, jobs })
    }

    /// Arguments pushed into a kernel so far, in slot order.
    pub fn kernel_args(&self, kernel: &Kernel) -> Vec<(u32, ArgValue)> {
        let state = self.shared.state.lock().unwrap();
        match state.objects.get(&kernel.raw_id()) {
            Some(Object::Kernel { args, .. }) => {
                args.iter().map(|(i, v)| (*i, v.clone())).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Dispatches recorded on a queue, in submission order.
    pub fn dispatches(&self, queue: &super::Queue) -> Vec<Dispatch> {
        let state = self.shared.state.lock().unwrap();
        match state.objects.get(&queue.raw_id()) {
            Some(Object::Queue { dispatches }) => dispatches.clone(),
            _ => Vec::new(),
        }
    }

    /// Source text a program was created from.
    pub fn program_source(&self, program: &Program) -> String {
        let state = self.shared.state.lock().unwrap();
        match state.objects.get(&program.raw_id()) {
            Some(Object::Program { source, .. }) => source.clone(),
            _ => String::new(),
        }
    }

    /// Count of live (still-referenced) objects, platform and device aside.
    pub fn live_objects(&self) -> usize {
        self.shared.state.lock().unwrap().objects.len()
    }
}

impl Shared {
    fn compile(&self, program: RawId) {
        let source = {
            let state = self.state.lock().unwrap();
            match state.objects.get(&program) {
                Some(Object::Program { source, .. }) => source.clone(),
                _ => return,
            }
        };
        let verdict = validate_kernel_source(&source);
        let mut state = self.state.lock().unwrap();
        if let Some(Object::Program { status, log, .. }) = state.objects.get_mut(&program) {
            match verdict {
                Ok(()) => {
                    *status = BuildStatus::Success;
                    log.clear();
                }
                Err(message) => {
                    *status = BuildStatus::Failure;
                    *log = message;
                }
            }
        }
    }
}

/// Lexical check standing in for a vendor compiler: entry point present,
/// brackets balanced, every call site a known built-in.
fn validate_kernel_source(source: &str) -> Result<(), String> {
    if !source.contains("kernel void main_kernel(") {
        return Err("error: entry point 'main_kernel' not found".to_string());
    }
    let mut parens: i64 = 0;
    let mut braces: i64 = 0;
    for c in source.chars() {
        match c {
            '(' => parens += 1,
            ')' => parens -= 1,
            '{' => braces += 1,
            '}' => braces -= 1,
            _ => {}
        }
        if parens < 0 || braces < 0 {
            return Err("error: unbalanced brackets".to_string());
        }
    }
    if parens != 0 || braces != 0 {
        return Err("error: unbalanced brackets".to_string());
    }

    let bytes = source.as_bytes();
    let ident_start = |b: u8| b.is_ascii_alphabetic() || b == b'_';
    let ident_char = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    let mut i = 0;
    while i < bytes.len() {
        if !ident_start(bytes[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && ident_char(bytes[i]) {
            i += 1;
        }
        let word = &source[start..i];
        let mut j = i;
        while j < bytes.len() && bytes[j] == b' ' {
            j += 1;
        }
        if j < bytes.len() && bytes[j] == b'(' && !is_known_call(word) {
            return Err(format!(
                "error: implicit declaration of function '{word}'"
            ));
        }
    }
    Ok(())
}

fn is_known_call(word: &str) -> bool {
    // Keywords and declarations that syntactically precede a parenthesis.
    const NON_CALLS: &[&str] = &[
        "if", "for", "while", "return", "main_kernel", "kernel", "void", "const",
    ];
    NON_CALLS.contains(&word) || word.starts_with("convert_") || intrinsics::is_builtin(word)
}

impl DriverApi for LoopbackDriver {
    fn platform_ids(&self) -> Result<Vec<RawId>, DriverError> {
        Ok(vec![PLATFORM_ID])
    }

    fn platform_info(&self, platform: RawId, param: PlatformInfo) -> Result<String, DriverError> {
        if platform != PLATFORM_ID {
            return Err(DriverError::new(CL_INVALID_VALUE, "unknown platform"));
        }
        Ok(match param {
            PlatformInfo::Profile => "FULL_PROFILE",
            PlatformInfo::Version => "OpenCL 1.2 loopback",
            PlatformInfo::Name => "loopback",
            PlatformInfo::Vendor => "kernel-forge",
            PlatformInfo::Extensions => "",
        }
        .to_string())
    }

    fn device_ids(&self, platform: RawId) -> Result<Vec<RawId>, DriverError> {
        if platform != PLATFORM_ID {
            return Err(DriverError::new(CL_INVALID_VALUE, "unknown platform"));
        }
        Ok(vec![DEVICE_ID])
    }

    fn device_info(&self, device: RawId, param: DeviceInfo) -> Result<String, DriverError> {
        if device != DEVICE_ID {
            return Err(DriverError::new(CL_INVALID_VALUE, "unknown device"));
        }
        Ok(match param {
            DeviceInfo::Name => "Loopback Device",
            DeviceInfo::Vendor => "kernel-forge",
            DeviceInfo::Version => "OpenCL 1.2 loopback",
            DeviceInfo::DriverVersion => env!("CARGO_PKG_VERSION"),
        }
        .to_string())
    }

    fn create_context(&self, devices: &[RawId]) -> Result<RawId, DriverError> {
        if devices != [DEVICE_ID] {
            return Err(DriverError::new(CL_INVALID_VALUE, "unknown device list"));
        }
        Ok(self.shared.state.lock().unwrap().insert(Object::Context))
    }

    fn create_buffer(
        &self,
        _context: RawId,
        size: usize,
        _access: MemAccess,
    ) -> Result<RawId, DriverError> {
        if size == 0 {
            return Err(DriverError::new(CL_INVALID_VALUE, "zero-size buffer"));
        }
        Ok(self
            .shared
            .state
            .lock()
            .unwrap()
            .insert(Object::Buffer { data: vec![0; size] }))
    }

    fn create_image(
        &self,
        _context: RawId,
        format: PixelFormat,
        width: usize,
        height: usize,
        _access: MemAccess,
    ) -> Result<RawId, DriverError> {
        if width == 0 || height == 0 {
            return Err(DriverError::new(CL_INVALID_VALUE, "zero-size image"));
        }
        let bytes = width * height * format.element_size();
        Ok(self
            .shared
            .state
            .lock()
            .unwrap()
            .insert(Object::Image { data: vec![0; bytes] }))
    }

    fn create_sampler(
        &self,
        _context: RawId,
        _addressing: Addressing,
        _filter: Filter,
    ) -> Result<RawId, DriverError> {
        Ok(self.shared.state.lock().unwrap().insert(Object::Sampler))
    }

    fn create_program(&self, _context: RawId, source: &str) -> Result<RawId, DriverError> {
        Ok(self.shared.state.lock().unwrap().insert(Object::Program {
            source: source.to_string(),
            status: BuildStatus::Pending,
            log: String::new(),
        }))
    }

    fn create_kernel(&self, program: RawId, name: &str) -> Result<RawId, DriverError> {
        if name != "main_kernel" {
            return Err(DriverError::new(
                CL_INVALID_KERNEL_NAME,
                format!("no kernel named '{name}'"),
            ));
        }
        let mut state = self.shared.state.lock().unwrap();
        match state.objects.get(&program) {
            Some(Object::Program {
                status: BuildStatus::Success,
                ..
            }) => {}
            Some(Object::Program { .. }) => {
                return Err(DriverError::new(
                    CL_INVALID_PROGRAM_EXECUTABLE,
                    "program has no successful build",
                ));
            }
            _ => return Err(DriverError::new(CL_INVALID_VALUE, "unknown program")),
        }
        Ok(state.insert(Object::Kernel {
            program,
            args: BTreeMap::new(),
        }))
    }

    fn create_queue(
        &self,
        _context: RawId,
        device: RawId,
        _options: QueueOptions,
    ) -> Result<RawId, DriverError> {
        if device != DEVICE_ID {
            return Err(DriverError::new(CL_INVALID_VALUE, "unknown device"));
        }
        Ok(self
            .shared
            .state
            .lock()
            .unwrap()
            .insert(Object::Queue {
                dispatches: Vec::new(),
            }))
    }

    fn build_program(&self, program: RawId, _options: &str) -> Result<(), DriverError> {
        self.shared.compile(program);
        let state = self.shared.state.lock().unwrap();
        match state.objects.get(&program) {
            Some(Object::Program {
                status: BuildStatus::Success,
                ..
            }) => Ok(()),
            Some(Object::Program { log, .. }) => {
                Err(DriverError::new(CL_BUILD_PROGRAM_FAILURE, log.clone()))
            }
            _ => Err(DriverError::new(CL_INVALID_VALUE, "unknown program")),
        }
    }

    fn build_program_async(
        &self,
        program: RawId,
        _options: &str,
        on_complete: Box<dyn FnOnce() + Send>,
    ) -> Result<(), DriverError> {
        self.jobs
            .send(BuildJob {
                program,
                on_complete,
            })
            .map_err(|_| DriverError::new(CL_INVALID_VALUE, "build worker stopped"))
    }

    fn build_status(&self, program: RawId, _device: RawId) -> Result<BuildStatus, DriverError> {
        let state = self.shared.state.lock().unwrap();
        match state.objects.get(&program) {
            Some(Object::Program { status, .. }) => Ok(*status),
            _ => Err(DriverError::new(CL_INVALID_VALUE, "unknown program")),
        }
    }

    fn build_log(&self, program: RawId, _device: RawId) -> Result<String, DriverError> {
        let state = self.shared.state.lock().unwrap();
        match state.objects.get(&program) {
            Some(Object::Program { log, .. }) => Ok(log.clone()),
            _ => Err(DriverError::new(CL_INVALID_VALUE, "unknown program")),
        }
    }

    fn set_kernel_arg(
        &self,
        kernel: RawId,
        index: u32,
        value: &ArgValue,
    ) -> Result<(), DriverError> {
        let mut state = self.shared.state.lock().unwrap();
        match state.objects.get_mut(&kernel) {
            Some(Object::Kernel { args, .. }) => {
                args.insert(index, value.clone());
                Ok(())
            }
            _ => Err(DriverError::new(CL_INVALID_VALUE, "unknown kernel")),
        }
    }

    fn enqueue_write_buffer(
        &self,
        _queue: RawId,
        buffer: RawId,
        data: &[u8],
    ) -> Result<(), DriverError> {
        let mut state = self.shared.state.lock().unwrap();
        match state.objects.get_mut(&buffer) {
            Some(Object::Buffer { data: stored }) => {
                if stored.len() != data.len() {
                    return Err(DriverError::new(CL_INVALID_VALUE, "size mismatch"));
                }
                stored.copy_from_slice(data);
                Ok(())
            }
            _ => Err(DriverError::new(CL_INVALID_MEM_OBJECT, "unknown buffer")),
        }
    }

    fn enqueue_read_buffer(
        &self,
        _queue: RawId,
        buffer: RawId,
        out: &mut [u8],
    ) -> Result<(), DriverError> {
        let state = self.shared.state.lock().unwrap();
        match state.objects.get(&buffer) {
            Some(Object::Buffer { data }) => {
                if data.len() != out.len() {
                    return Err(DriverError::new(CL_INVALID_VALUE, "size mismatch"));
                }
                out.copy_from_slice(data);
                Ok(())
            }
            _ => Err(DriverError::new(CL_INVALID_MEM_OBJECT, "unknown buffer")),
        }
    }

    fn enqueue_write_image(
        &self,
        _queue: RawId,
        image: RawId,
        data: &[u8],
    ) -> Result<(), DriverError> {
        let mut state = self.shared.state.lock().unwrap();
        match state.objects.get_mut(&image) {
            Some(Object::Image { data: stored }) => {
                if stored.len() != data.len() {
                    return Err(DriverError::new(CL_INVALID_VALUE, "size mismatch"));
                }
                stored.copy_from_slice(data);
                Ok(())
            }
            _ => Err(DriverError::new(CL_INVALID_MEM_OBJECT, "unknown image")),
        }
    }

    fn enqueue_read_image(
        &self,
        _queue: RawId,
        image: RawId,
        out: &mut [u8],
    ) -> Result<(), DriverError> {
        let state = self.shared.state.lock().unwrap();
        match state.objects.get(&image) {
            Some(Object::Image { data }) => {
                if data.len() != out.len() {
                    return Err(DriverError::new(CL_INVALID_VALUE, "size mismatch"));
                }
                out.copy_from_slice(data);
                Ok(())
            }
            _ => Err(DriverError::new(CL_INVALID_MEM_OBJECT, "unknown image")),
        }
    }

    fn enqueue_kernel(
        &self,
        queue: RawId,
        kernel: RawId,
        work: WorkSize,
    ) -> Result<(), DriverError> {
        let mut state = self.shared.state.lock().unwrap();
        let program = match state.objects.get(&kernel) {
            Some(Object::Kernel { program, .. }) => *program,
            _ => return Err(DriverError::new(CL_INVALID_VALUE, "unknown kernel")),
        };
        match state.objects.get(&program) {
            Some(Object::Program {
                status: BuildStatus::Success,
                ..
            }) => {}
            _ => {
                return Err(DriverError::new(
                    CL_INVALID_PROGRAM_EXECUTABLE,
                    "kernel's program is not built",
                ));
            }
        }
        match state.objects.get_mut(&queue) {
            Some(Object::Queue { dispatches }) => {
                dispatches.push(Dispatch { kernel, work });
                Ok(())
            }
            _ => Err(DriverError::new(CL_INVALID_VALUE, "unknown queue")),
        }
    }

    fn barrier(&self, _queue: RawId) -> Result<(), DriverError> {
        Ok(())
    }

    fn flush(&self, _queue: RawId) -> Result<(), DriverError> {
        Ok(())
    }

    fn finish(&self, _queue: RawId) -> Result<(), DriverError> {
        Ok(())
    }

    fn retain(&self, handle: RawId) -> Result<(), DriverError> {
        let mut state = self.shared.state.lock().unwrap();
        match state.refcounts.get_mut(&handle) {
            Some(count) => {
                *count += 1;
                Ok(())
            }
            None => Err(DriverError::new(CL_INVALID_VALUE, "unknown handle")),
        }
    }

    fn release(&self, handle: RawId) {
        let mut state = self.shared.state.lock().unwrap();
        if let Some(count) = state.refcounts.get_mut(&handle) {
            *count -= 1;
            if *count == 0 {
                state.refcounts.remove(&handle);
                state.objects.remove(&handle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Driver;

    fn api() -> Arc<dyn DriverApi> {
        LoopbackDriver::new()
    }

    #[test]
    fn platform_enumeration_is_cached() {
        let driver = Driver::new(api());
        let first = driver.platforms().unwrap().as_ptr();
        let second = driver.platforms().unwrap().as_ptr();
        assert_eq!(first, second);
        assert_eq!(driver.platforms().unwrap().len(), 1);
    }

    #[test]
    fn buffers_store_bytes() {
        let driver = Driver::new(api());
        let device = driver.platforms().unwrap()[0].devices().unwrap().remove(0);
        let ctx = super::super::Context::new(&[device.clone()]).unwrap();
        let queue = ctx.queue(&device, QueueOptions::default()).unwrap();
        let buffer = ctx.buffer(16, MemAccess::ReadWrite).unwrap();

        let data: Vec<f32> = vec![1.0, 2.0, 3.0, 4.0];
        queue.write_buffer(&data, &buffer).unwrap();
        let mut back: Vec<f32> = Vec::new();
        queue.read_buffer(&buffer, &mut back).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn release_drops_objects() {
        let loopback = LoopbackDriver::new();
        let api: Arc<dyn DriverApi> = loopback.clone();
        let driver = Driver::new(api);
        let device = driver.platforms().unwrap()[0].devices().unwrap().remove(0);
        let ctx = super::super::Context::new(&[device]).unwrap();
        let before = loopback.live_objects();
        {
            let buffer = ctx.buffer(4, MemAccess::ReadWrite).unwrap();
            let alias = buffer.clone();
            assert_eq!(loopback.live_objects(), before + 1);
            drop(buffer);
            assert_eq!(loopback.live_objects(), before + 1);
            drop(alias);
        }
        assert_eq!(loopback.live_objects(), before);
    }

    #[test]
    fn unknown_call_sites_fail_validation() {
        let bad = "kernel void main_kernel() {\nfrobnicate(0x1);\n};\n";
        let err = validate_kernel_source(bad).unwrap_err();
        assert!(err.contains("implicit declaration"));
        assert!(err.contains("frobnicate"));

        let good = "kernel void main_kernel(__global float * e1) {\ne1[get_global_id(0x0u)] = 0x0;\n};\n";
        assert!(validate_kernel_source(good).is_ok());
    }
}
