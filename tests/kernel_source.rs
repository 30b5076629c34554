//! End-to-end kernel source generation and argument binding, driven through
//! the loopback driver.

use std::sync::Arc;

use anyhow::Result;

use kernel_forge::driver::loopback::LoopbackDriver;
use kernel_forge::driver::{
    ArgValue, Context, Device, Driver, DriverApi, MemAccess, Queue, QueueOptions, WorkSize,
};
use kernel_forge::dsl::*;
use kernel_forge::intrinsics::get_global_id;
use kernel_forge::types::Type;

struct Harness {
    loopback: Arc<LoopbackDriver>,
    context: Context,
    device: Device,
    queue: Queue,
}

fn harness() -> Result<Harness> {
    let loopback = LoopbackDriver::new();
    let api: Arc<dyn DriverApi> = loopback.clone();
    let driver = Driver::new(api);
    let device = driver.platforms()?[0].devices()?.remove(0);
    let context = Context::new(&[device.clone()])?;
    let queue = context.queue(&device, QueueOptions::default())?;
    Ok(Harness {
        loopback,
        context,
        device,
        queue,
    })
}

#[test]
fn scalar_buffer_doubling_source_and_binding() -> Result<()> {
    let h = harness()?;
    let buffer = h.context.buffer(64 * size_of::<f32>(), MemAccess::ReadWrite)?;
    let data: Vec<f32> = (0..64).map(|i| i as f32).collect();
    h.queue.write_buffer(&data, &buffer)?;
    h.queue.barrier()?;

    let pbuff = argv::<f32>(buffer.clone());
    let element = || select(pbuff.clone(), get_global_id(0));
    let tree = set(element(), element() * cnst(2.0f32));

    let name = pbuff.param_name();
    let expected = format!(
        "kernel void main_kernel(__global float * {name}) {{\n\
         ({name}[get_global_id(0x0u)]) = (({name}[get_global_id(0x0u)]) * 2.0e0f);\n\
         }};\n"
    );
    assert_eq!(tree.build(), expected);

    // One signature entry despite the buffer argument appearing twice.
    assert_eq!(tree.signature(), vec![(Type::pointer(Type::FLOAT), name)]);

    let program = h.context.program(&tree.build())?;
    program.build("")?;
    let kernel = program.kernel("main_kernel")?;
    tree.bind_values(&kernel)?;

    let args = h.loopback.kernel_args(&kernel);
    assert_eq!(args.len(), 1);
    assert_eq!(args[0].0, 0);
    assert!(matches!(&args[0].1, ArgValue::Buffer(b) if b.raw_id() == buffer.raw_id()));

    h.queue.task(&kernel, WorkSize::D1(64))?;
    h.queue.finish()?;
    assert_eq!(h.loopback.dispatches(&h.queue).len(), 1);

    // The loopback driver records rather than executes, so the buffer holds
    // the written values untouched.
    let mut back: Vec<f32> = Vec::new();
    h.queue.read_buffer(&buffer, &mut back)?;
    assert_eq!(back, data);
    Ok(())
}

#[test]
fn conditional_write_compiles_both_ways() -> Result<()> {
    let h = harness()?;

    let a = arg_with(10i32);
    let v = var::<i32>();
    let tree = cond(
        equal(a.clone(), cnst(10i32)),
        set(v.clone(), cnst(1i32)),
        set(v.clone(), cnst(0i32)),
    );
    let src = tree.build();
    assert!(
        src.contains(&format!(
            "if(({} == 0xa)) {{\n{} = 0x1;\n}} else {{\n{} = 0x0;\n}};",
            a.param_name(),
            v.param_name(),
            v.param_name()
        )),
        "in:\n{src}"
    );
    let program = h.context.program(&src)?;
    program.build("")?;

    // Same branch order through `unless` swaps which branch runs on equality.
    let inverted = unless(
        equal(a.clone(), cnst(10i32)),
        set(v.clone(), cnst(1i32)),
        set(v.clone(), cnst(0i32)),
    );
    let src = inverted.build();
    assert!(
        src.contains(&format!(
            "if(({} == 0xa)) {{\n{} = 0x0;\n}} else {{\n{} = 0x1;\n}};",
            a.param_name(),
            v.param_name(),
            v.param_name()
        )),
        "in:\n{src}"
    );
    h.context.program(&src)?.build("")?;
    Ok(())
}

#[test]
fn vector_promotion_in_generated_source() {
    let e = cnst(1i32) + cnst([1.0f32, 2.0]);
    assert_eq!(e.ty(), Type::vector(2, Type::FLOAT));
    let src = e.build();
    assert!(src.contains("(0x1 + (1.0e0f, 2.0e0f))"), "in:\n{src}");
}

#[test]
fn shared_argument_binds_once() -> Result<()> {
    let h = harness()?;
    let a = arg_with(5i32);
    let tree = a.clone() + a.clone();
    assert_eq!(tree.signature().len(), 1);

    let program = h.context.program(&tree.build())?;
    program.build("")?;
    let kernel = program.kernel("main_kernel")?;
    tree.bind_values(&kernel)?;

    let args = h.loopback.kernel_args(&kernel);
    assert_eq!(args, vec![(0, ArgValue::Data(5i32.to_ne_bytes().to_vec()))]);
    Ok(())
}

#[test]
fn signature_order_equals_binding_order() -> Result<()> {
    let h = harness()?;
    let buffer = h.context.buffer(16, MemAccess::ReadWrite)?;

    let scale = arg_with(3i32);
    let bias = arg_with(0.5f32);
    let data = argv::<f32>(buffer.clone());
    let element = select(data.clone(), cast(scale.clone(), Type::INT));
    let tree = set(element.clone(), element.clone() + bias.clone());

    let sig = tree.signature();
    assert_eq!(
        sig.iter().map(|(t, _)| *t).collect::<Vec<_>>(),
        vec![Type::pointer(Type::FLOAT), Type::INT, Type::FLOAT]
    );

    let program = h.context.program(&tree.build())?;
    program.build("")?;
    let kernel = program.kernel("main_kernel")?;
    tree.bind_values(&kernel)?;

    let args = h.loopback.kernel_args(&kernel);
    assert_eq!(args.len(), sig.len());
    assert!(matches!(&args[0].1, ArgValue::Buffer(b) if b.raw_id() == buffer.raw_id()));
    assert_eq!(args[1].1, ArgValue::Data(3i32.to_ne_bytes().to_vec()));
    assert_eq!(args[2].1, ArgValue::Data(0.5f32.to_ne_bytes().to_vec()));
    Ok(())
}

#[test]
fn rebinding_changes_values_not_slots() -> Result<()> {
    let h = harness()?;
    let a = arg_with(1i32);
    let tree = a.clone() * cnst(2i32);

    let program = h.context.program(&tree.build())?;
    program.build("")?;
    let kernel = program.kernel("main_kernel")?;

    tree.bind_values(&kernel)?;
    assert_eq!(
        h.loopback.kernel_args(&kernel),
        vec![(0, ArgValue::Data(1i32.to_ne_bytes().to_vec()))]
    );

    a.set_value(7i32);
    tree.bind_values(&kernel)?;
    assert_eq!(
        h.loopback.kernel_args(&kernel),
        vec![(0, ArgValue::Data(7i32.to_ne_bytes().to_vec()))]
    );
    Ok(())
}

#[test]
fn build_output_is_stable_across_calls() {
    let idx = var_init(cnst(0i32));
    let acc = var_init(cnst(0.0f32));
    let tree = for_range(
        idx.clone(),
        cnst(0i32),
        cnst(8i32),
        set(acc.clone(), acc.clone() + cast(idx.clone(), Type::FLOAT)),
    );
    let first = tree.build();
    for _ in 0..10 {
        assert_eq!(tree.build(), first);
    }
    assert!(first.contains("for("), "in:\n{first}");
    assert!(first.contains("++) {"), "in:\n{first}");
}

#[test]
fn image_pipeline_source_shape() -> Result<()> {
    let h = harness()?;
    let src_img = h.context.image(
        kernel_forge::driver::PixelFormat::RgbaFloat,
        4,
        4,
        MemAccess::ReadOnly,
    )?;
    let dst_img = h.context.image(
        kernel_forge::driver::PixelFormat::RgbaFloat,
        4,
        4,
        MemAccess::WriteOnly,
    )?;

    let input = argi_r(src_img);
    let output = argi_w(dst_img);
    let pos = cnst([0i32, 0]);
    let tree = set_image(
        output.clone(),
        pos.clone(),
        sample(
            input.clone(),
            pos.clone(),
            kernel_forge::expr::ImageSampling::NearestPixel,
        ),
    );

    let src = tree.build();
    assert!(
        src.starts_with(
            "const sampler_t smp_f_n = CLK_NORMALIZED_COORDS_FALSE | CLK_ADDRESS_CLAMP | CLK_FILTER_NEAREST;\n"
        ),
        "in:\n{src}"
    );
    assert!(
        src.contains(&format!(
            "write_imagef({}, (0x0, 0x0), read_imagef({}, smp_f_n, (0x0, 0x0)))",
            output.param_name(),
            input.param_name()
        )),
        "in:\n{src}"
    );
    assert_eq!(
        tree.signature(),
        vec![
            (Type::IMAGE_W, output.param_name()),
            (Type::IMAGE_R, input.param_name()),
        ]
    );

    let program = h.context.program(&src)?;
    program.build("")?;
    let kernel = program.kernel("main_kernel")?;
    tree.bind_values(&kernel)?;
    assert_eq!(h.loopback.kernel_args(&kernel).len(), 2);

    // Keep the device wrapper exercised: the loopback device self-reports.
    assert_eq!(h.device.name()?, "Loopback Device");
    Ok(())
}

#[test]
fn unbound_buffer_slot_is_reported() -> Result<()> {
    let h = harness()?;
    let data = argv_slot::<f32>();
    let tree = set(
        select(data.clone(), cnst(0i32)),
        cnst(1.0f32),
    );
    let program = h.context.program(&tree.build())?;
    program.build("")?;
    let kernel = program.kernel("main_kernel")?;
    assert!(matches!(
        tree.bind_values(&kernel),
        Err(kernel_forge::Error::UnboundArgument(_))
    ));
    Ok(())
}
