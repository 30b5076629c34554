//! The compute-driver capability the runtime dispatches through.
//!
//! The vendor API is kept behind the object-safe [`DriverApi`] trait working
//! on opaque raw handles; this module layers safe, reference-counted wrapper
//! types over it ([`Context`], [`Buffer`], [`Image`], [`Sampler`],
//! [`Program`], [`Kernel`], [`Queue`]). Wrapper clones retain the underlying
//! handle and drops release it, so several host values may share one driver
//! object.
//!
//! [`loopback`] provides the in-process implementation used by the test
//! suite.

pub mod loopback;

use std::sync::{Arc, OnceLock};

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

/// Opaque driver-side handle.
pub type RawId = u64;

/// A failed driver call: vendor status code plus a readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("driver error {code}: {message}")]
pub struct DriverError {
    pub code: i32,
    pub message: String,
}

impl DriverError {
    pub fn new(code: i32, message: impl Into<String>) -> DriverError {
        DriverError {
            code,
            message: message.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildStatus {
    Success,
    Pending,
    Failure,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Grayscale8,
    Grayscale16,
    GrayscaleFloat,
    Rgba8,
    Rgba16,
    RgbaFloat,
}

impl PixelFormat {
    /// Bytes per pixel.
    pub fn element_size(self) -> usize {
        match self {
            PixelFormat::Grayscale8 => 1,
            PixelFormat::Grayscale16 => 2,
            PixelFormat::GrayscaleFloat => 4,
            PixelFormat::Rgba8 => 4,
            PixelFormat::Rgba16 => 8,
            PixelFormat::RgbaFloat => 16,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Addressing {
    Clamp,
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueOptions {
    pub out_of_order: bool,
    pub profiling: bool,
}

/// 1-, 2- or 3-dimensional dispatch size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkSize {
    D1(usize),
    D2(usize, usize),
    D3(usize, usize, usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlatformInfo {
    Profile,
    Version,
    Name,
    Vendor,
    Extensions,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceInfo {
    Name,
    Vendor,
    Version,
    DriverVersion,
}

/// A kernel argument crossing the driver seam.
#[derive(Clone, Debug)]
pub enum ArgValue {
    /// Raw scalar or vector bytes.
    Data(Vec<u8>),
    Buffer(Buffer),
    Image(Image),
    Sampler(Sampler),
}

impl PartialEq for ArgValue {
    fn eq(&self, other: &ArgValue) -> bool {
        match (self, other) {
            (ArgValue::Data(a), ArgValue::Data(b)) => a == b,
            (ArgValue::Buffer(a), ArgValue::Buffer(b)) => a.raw_id() == b.raw_id(),
            (ArgValue::Image(a), ArgValue::Image(b)) => a.raw_id() == b.raw_id(),
            (ArgValue::Sampler(a), ArgValue::Sampler(b)) => a.raw_id() == b.raw_id(),
            _ => false,
        }
    }
}

/// The raw vendor surface. One implementor per backend; all operations report
/// failures as [`DriverError`].
pub trait DriverApi: Send + Sync {
    fn platform_ids(&self) -> Result<Vec<RawId>, DriverError>;
    fn platform_info(&self, platform: RawId, param: PlatformInfo) -> Result<String, DriverError>;
    fn device_ids(&self, platform: RawId) -> Result<Vec<RawId>, DriverError>;
    fn device_info(&self, device: RawId, param: DeviceInfo) -> Result<String, DriverError>;

    fn create_context(&self, devices: &[RawId]) -> Result<RawId, DriverError>;
    fn create_buffer(
        &self,
        context: RawId,
        size: usize,
        access: MemAccess,
    ) -> Result<RawId, DriverError>;
    fn create_image(
        &self,
        context: RawId,
        format: PixelFormat,
        width: usize,
        height: usize,
        access: MemAccess,
    ) -> Result<RawId, DriverError>;
    fn create_sampler(
        &self,
        context: RawId,
        addressing: Addressing,
        filter: Filter,
    ) -> Result<RawId, DriverError>;
    fn create_program(&self, context: RawId, source: &str) -> Result<RawId, DriverError>;
    fn create_kernel(&self, program: RawId, name: &str) -> Result<RawId, DriverError>;
    fn create_queue(
        &self,
        context: RawId,
        device: RawId,
        options: QueueOptions,
    ) -> Result<RawId, DriverError>;

    /// Synchronous build; returns when compilation has finished.
    fn build_program(&self, program: RawId, options: &str) -> Result<(), DriverError>;
    /// Asynchronous build; `on_complete` may run on any thread once the
    /// compile has finished (successfully or not).
    fn build_program_async(
        &self,
        program: RawId,
        options: &str,
        on_complete: Box<dyn FnOnce() + Send>,
    ) -> Result<(), DriverError>;
    fn build_status(&self, program: RawId, device: RawId) -> Result<BuildStatus, DriverError>;
    fn build_log(&self, program: RawId, device: RawId) -> Result<String, DriverError>;

    fn set_kernel_arg(
        &self,
        kernel: RawId,
        index: u32,
        value: &ArgValue,
    ) -> Result<(), DriverError>;

    fn enqueue_write_buffer(
        &self,
        queue: RawId,
        buffer: RawId,
        data: &[u8],
    ) -> Result<(), DriverError>;
    fn enqueue_read_buffer(
        &self,
        queue: RawId,
        buffer: RawId,
        out: &mut [u8],
    ) -> Result<(), DriverError>;
    fn enqueue_write_image(
        &self,
        queue: RawId,
        image: RawId,
        data: &[u8],
    ) -> Result<(), DriverError>;
    fn enqueue_read_image(
        &self,
        queue: RawId,
        image: RawId,
        out: &mut [u8],
    ) -> Result<(), DriverError>;
    fn enqueue_kernel(&self, queue: RawId, kernel: RawId, work: WorkSize)
    -> Result<(), DriverError>;

    fn barrier(&self, queue: RawId) -> Result<(), DriverError>;
    fn flush(&self, queue: RawId) -> Result<(), DriverError>;
    fn finish(&self, queue: RawId) -> Result<(), DriverError>;

    fn retain(&self, handle: RawId) -> Result<(), DriverError>;
    fn release(&self, handle: RawId);
}

/// Reference-counted driver handle shared by the wrapper types.
struct Handle {
    api: Arc<dyn DriverApi>,
    id: RawId,
}

impl Handle {
    /// Wrap a freshly created handle; takes ownership of its initial
    /// reference.
    fn new(api: Arc<dyn DriverApi>, id: RawId) -> Handle {
        Handle { api, id }
    }
}

impl Clone for Handle {
    fn clone(&self) -> Handle {
        self.api
            .retain(self.id)
            .expect("driver retain failed for a live handle");
        Handle {
            api: Arc::clone(&self.api),
            id: self.id,
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.api.release(self.id);
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle").field("id", &self.id).finish()
    }
}

/// Entry point to a driver: caches the platform list on first enumeration.
pub struct Driver {
    api: Arc<dyn DriverApi>,
    platforms: OnceLock<Vec<Platform>>,
}

impl Driver {
    pub fn new(api: Arc<dyn DriverApi>) -> Driver {
        Driver {
            api,
            platforms: OnceLock::new(),
        }
    }

    pub fn api(&self) -> &Arc<dyn DriverApi> {
        &self.api
    }

    /// All platforms the driver exposes. The first caller triggers
    /// enumeration; later callers observe the cached list.
    pub fn platforms(&self) -> Result<&[Platform], DriverError> {
        if let Some(cached) = self.platforms.get() {
            return Ok(cached);
        }
        let listed = self
            .api
            .platform_ids()?
            .into_iter()
            .map(|id| Platform {
                api: Arc::clone(&self.api),
                id,
            })
            .collect::<Vec<_>>();
        Ok(self.platforms.get_or_init(|| listed))
    }
}

/// A compute platform. Platforms are driver-owned and not reference-counted.
#[derive(Clone)]
pub struct Platform {
    api: Arc<dyn DriverApi>,
    id: RawId,
}

impl Platform {
    pub fn raw_id(&self) -> RawId {
        self.id
    }

    pub fn name(&self) -> Result<String, DriverError> {
        self.api.platform_info(self.id, PlatformInfo::Name)
    }

    pub fn vendor(&self) -> Result<String, DriverError> {
        self.api.platform_info(self.id, PlatformInfo::Vendor)
    }

    pub fn version(&self) -> Result<String, DriverError> {
        self.api.platform_info(self.id, PlatformInfo::Version)
    }

    pub fn profile(&self) -> Result<String, DriverError> {
        self.api.platform_info(self.id, PlatformInfo::Profile)
    }

    pub fn extensions(&self) -> Result<String, DriverError> {
        self.api.platform_info(self.id, PlatformInfo::Extensions)
    }

    pub fn devices(&self) -> Result<Vec<Device>, DriverError> {
        Ok(self
            .api
            .device_ids(self.id)?
            .into_iter()
            .map(|id| Device {
                api: Arc::clone(&self.api),
                id,
            })
            .collect())
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform").field("id", &self.id).finish()
    }
}

/// A compute device on a platform.
#[derive(Clone)]
pub struct Device {
    api: Arc<dyn DriverApi>,
    id: RawId,
}

impl Device {
    pub fn raw_id(&self) -> RawId {
        self.id
    }

    pub fn name(&self) -> Result<String, DriverError> {
        self.api.device_info(self.id, DeviceInfo::Name)
    }

    pub fn vendor(&self) -> Result<String, DriverError> {
        self.api.device_info(self.id, DeviceInfo::Vendor)
    }

    pub fn version(&self) -> Result<String, DriverError> {
        self.api.device_info(self.id, DeviceInfo::Version)
    }

    pub fn driver_version(&self) -> Result<String, DriverError> {
        self.api.device_info(self.id, DeviceInfo::DriverVersion)
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Device) -> bool {
        self.id == other.id
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device").field("id", &self.id).finish()
    }
}

/// A compute context over one or more devices.
#[derive(Clone, Debug)]
pub struct Context {
    handle: Handle,
    devices: Vec<Device>,
}

impl Context {
    pub fn new(devices: &[Device]) -> Result<Context, DriverError> {
        assert!(!devices.is_empty(), "context needs at least one device");
        let api = Arc::clone(&devices[0].api);
        let ids: Vec<RawId> = devices.iter().map(|d| d.id).collect();
        let id = api.create_context(&ids)?;
        Ok(Context {
            handle: Handle::new(api, id),
            devices: devices.to_vec(),
        })
    }

    pub fn raw_id(&self) -> RawId {
        self.handle.id
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn buffer(&self, size: usize, access: MemAccess) -> Result<Buffer, DriverError> {
        let id = self
            .handle
            .api
            .create_buffer(self.handle.id, size, access)?;
        Ok(Buffer {
            handle: Handle::new(Arc::clone(&self.handle.api), id),
            size,
        })
    }

    pub fn image(
        &self,
        format: PixelFormat,
        width: usize,
        height: usize,
        access: MemAccess,
    ) -> Result<Image, DriverError> {
        let id = self
            .handle
            .api
            .create_image(self.handle.id, format, width, height, access)?;
        Ok(Image {
            handle: Handle::new(Arc::clone(&self.handle.api), id),
            format,
            width,
            height,
        })
    }

    pub fn sampler(
        &self,
        addressing: Addressing,
        filter: Filter,
    ) -> Result<Sampler, DriverError> {
        let id = self
            .handle
            .api
            .create_sampler(self.handle.id, addressing, filter)?;
        Ok(Sampler {
            handle: Handle::new(Arc::clone(&self.handle.api), id),
        })
    }

    pub fn program(&self, source: &str) -> Result<Program, DriverError> {
        let id = self.handle.api.create_program(self.handle.id, source)?;
        Ok(Program {
            handle: Handle::new(Arc::clone(&self.handle.api), id),
            devices: self.devices.clone(),
        })
    }

    pub fn queue(&self, device: &Device, options: QueueOptions) -> Result<Queue, DriverError> {
        let id = self
            .handle
            .api
            .create_queue(self.handle.id, device.id, options)?;
        Ok(Queue {
            handle: Handle::new(Arc::clone(&self.handle.api), id),
        })
    }
}

/// Global-memory buffer.
#[derive(Clone, Debug)]
pub struct Buffer {
    handle: Handle,
    size: usize,
}

impl Buffer {
    pub fn raw_id(&self) -> RawId {
        self.handle.id
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }
}

/// 2D image object.
#[derive(Clone, Debug)]
pub struct Image {
    handle: Handle,
    format: PixelFormat,
    width: usize,
    height: usize,
}

impl Image {
    pub fn raw_id(&self) -> RawId {
        self.handle.id
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Total byte size of the pixel data.
    pub fn byte_size(&self) -> usize {
        self.width * self.height * self.format.element_size()
    }
}

/// Image sampler object.
#[derive(Clone, Debug)]
pub struct Sampler {
    handle: Handle,
}

impl Sampler {
    pub fn raw_id(&self) -> RawId {
        self.handle.id
    }
}

/// A program created from kernel source, possibly not yet compiled.
#[derive(Clone, Debug)]
pub struct Program {
    handle: Handle,
    devices: Vec<Device>,
}

impl Program {
    pub fn raw_id(&self) -> RawId {
        self.handle.id
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Compile synchronously.
    pub fn build(&self, options: &str) -> Result<(), DriverError> {
        self.handle.api.build_program(self.handle.id, options)
    }

    /// Compile asynchronously; `on_complete` may run on any thread.
    pub fn build_async(
        &self,
        options: &str,
        on_complete: impl FnOnce() + Send + 'static,
    ) -> Result<(), DriverError> {
        self.handle
            .api
            .build_program_async(self.handle.id, options, Box::new(on_complete))
    }

    pub fn build_status(&self, device: &Device) -> Result<BuildStatus, DriverError> {
        self.handle.api.build_status(self.handle.id, device.id)
    }

    pub fn build_log(&self, device: &Device) -> Result<String, DriverError> {
        self.handle.api.build_log(self.handle.id, device.id)
    }

    /// Entry point handle; fails unless the program compiled successfully.
    pub fn kernel(&self, name: &str) -> Result<Kernel, DriverError> {
        let id = self.handle.api.create_kernel(self.handle.id, name)?;
        Ok(Kernel {
            handle: Handle::new(Arc::clone(&self.handle.api), id),
        })
    }
}

/// A compiled kernel entry point.
#[derive(Clone, Debug)]
pub struct Kernel {
    handle: Handle,
}

impl Kernel {
    pub fn raw_id(&self) -> RawId {
        self.handle.id
    }

    pub fn set_arg(&self, index: u32, value: &ArgValue) -> Result<(), DriverError> {
        self.handle.api.set_kernel_arg(self.handle.id, index, value)
    }
}

/// Command queue on one device. Commands keep their submission order across
/// [`Queue::barrier`] and [`Queue::finish`] boundaries; `finish` blocks until
/// the queue drains.
#[derive(Clone, Debug)]
pub struct Queue {
    handle: Handle,
}

impl Queue {
    pub fn raw_id(&self) -> RawId {
        self.handle.id
    }

    pub fn write_buffer<T: Pod>(&self, data: &[T], buffer: &Buffer) -> Result<(), DriverError> {
        self.handle.api.enqueue_write_buffer(
            self.handle.id,
            buffer.raw_id(),
            bytemuck::cast_slice(data),
        )
    }

    pub fn read_buffer<T: Pod>(
        &self,
        buffer: &Buffer,
        out: &mut Vec<T>,
    ) -> Result<(), DriverError> {
        assert!(
            buffer.size() % size_of::<T>() == 0,
            "buffer size is not a multiple of the element size"
        );
        out.clear();
        out.resize(buffer.size() / size_of::<T>(), T::zeroed());
        self.handle.api.enqueue_read_buffer(
            self.handle.id,
            buffer.raw_id(),
            bytemuck::cast_slice_mut(out),
        )
    }

    pub fn write_image<T: Pod>(&self, data: &[T], image: &Image) -> Result<(), DriverError> {
        self.handle.api.enqueue_write_image(
            self.handle.id,
            image.raw_id(),
            bytemuck::cast_slice(data),
        )
    }

    pub fn read_image<T: Pod>(&self, image: &Image, out: &mut Vec<T>) -> Result<(), DriverError> {
        assert!(
            image.byte_size() % size_of::<T>() == 0,
            "image size is not a multiple of the element size"
        );
        out.clear();
        out.resize(image.byte_size() / size_of::<T>(), T::zeroed());
        self.handle.api.enqueue_read_image(
            self.handle.id,
            image.raw_id(),
            bytemuck::cast_slice_mut(out),
        )
    }

    /// Enqueue a kernel dispatch over the given work size.
    pub fn task(&self, kernel: &Kernel, work: WorkSize) -> Result<(), DriverError> {
        self.handle
            .api
            .enqueue_kernel(self.handle.id, kernel.raw_id(), work)
    }

    pub fn barrier(&self) -> Result<(), DriverError> {
        self.handle.api.barrier(self.handle.id)
    }

    pub fn flush(&self) -> Result<(), DriverError> {
        self.handle.api.flush(self.handle.id)
    }

    pub fn finish(&self) -> Result<(), DriverError> {
        self.handle.api.finish(self.handle.id)
    }
}
