//! Backend selection and host device tests for vfx-clconv.

use vfx_clconv::{
    Backend, ComputeBackend, ConvolutionMask, ConvolveError, DeviceInfo, DeviceSelector, DeviceType, EngineConfig,
    HostContext, HostPlatform, MemAccess, ProgramSource, Raster, WorkSize, create_engine, describe_backends,
    detect_backends, select_best_backend,
};

#[test]
fn test_host_backend_available() {
    assert!(Backend::Host.is_available());
    assert!(HostContext::is_available());
}

#[test]
fn test_describe_backends() {
    let desc = describe_backends();
    println!("{}", desc);
    assert!(desc.contains("host"));
}

#[test]
fn test_detect_available_by_priority() {
    let backends = detect_backends();
    let available: Vec<_> = backends.iter().take_while(|b| b.available).collect();
    assert!(!available.is_empty());
    assert!(available.windows(2).all(|w| w[0].priority >= w[1].priority));
    assert!(backends[available.len()..].iter().all(|b| !b.available));
    assert!(select_best_backend().is_available());
}

#[test]
fn test_auto_engine() {
    let engine = create_engine(Backend::Auto, ConvolutionMask::identity(), &ProgramSource::embedded(), &EngineConfig::default())
        .unwrap();
    println!("Auto-selected backend: {} on {}", engine.backend_name(), engine.device_info().name);

    let src = Raster::from_pixels((0..64).collect(), 8, 8, Default::default()).unwrap();
    assert_eq!(engine.filter(&src, None).unwrap(), src);
    engine.shutdown().unwrap();
    assert!(engine.is_closed());
}

#[test]
fn test_host_engine_on_cpu_device() {
    let config = EngineConfig::default().with_device(DeviceSelector::of_type(DeviceType::Cpu));
    let engine = create_engine(Backend::Host, ConvolutionMask::box_blur(3), &ProgramSource::embedded(), &config).unwrap();
    assert_eq!(engine.device_info().device_type, DeviceType::Cpu);
}

#[test]
fn test_missing_device() {
    let config = EngineConfig::default().with_device(DeviceSelector::default().with_device(3));
    let err = create_engine(Backend::Host, ConvolutionMask::identity(), &ProgramSource::embedded(), &config).unwrap_err();
    assert!(matches!(err, ConvolveError::DeviceUnavailable(_)));
}

#[test]
fn test_custom_platforms() {
    let gpu = DeviceInfo {
        name: "Second GPU".into(),
        vendor: "test".into(),
        device_type: DeviceType::Gpu,
        max_work_group_size: 256,
        max_work_item_sizes: vec![256, 256, 64],
    };
    let platforms = vec![
        HostPlatform::empty("empty"),
        HostPlatform::with_devices("second", vec![gpu]),
    ];
    let ctx = HostContext::from_platforms(platforms, &DeviceSelector::default().with_platform(1)).unwrap();
    assert_eq!(ctx.device_info().name, "Second GPU");
    assert_eq!(ctx.platform_name(), "second");
}

#[test]
fn test_host_dispatch_rejects_aliased_buffers() {
    let ctx = HostContext::new(&DeviceSelector::default()).unwrap();
    let kernel = ctx.build_kernel(&ProgramSource::embedded(), "-cl-mad-enable", "convolution").unwrap();
    let pixels = ctx.create_buffer(MemAccess::ReadWrite, 16, None).unwrap();
    let mask = ctx.create_buffer(MemAccess::ReadOnly, 4, Some(&1.0f32.to_le_bytes())).unwrap();

    let args = vfx_clconv::backend::KernelArgs {
        input: &pixels,
        mask: &mask,
        output: &pixels,
        image_size: [2, 2],
        mask_size: [1, 1],
        mask_origin: [0, 0],
    };
    let err = ctx.dispatch(&kernel, &args, &WorkSize::for_dispatch((1, 1), (2, 2))).unwrap_err();
    assert!(matches!(err, ConvolveError::DeviceOperationFailure { stage: vfx_clconv::Stage::SetArgument, .. }));
}
