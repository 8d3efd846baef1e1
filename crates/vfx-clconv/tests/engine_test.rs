//! Engine tests on the host-simulated device.

use std::thread;

use vfx_clconv::{
    ConvolutionEngine, ConvolutionMask, ConvolveError, DeviceSelector, EngineConfig, HostContext, HostProbe,
    PixelLayout, ProgramSource, Raster, Stage, pack_rgb, reference, round_up,
};

fn engine(mask: ConvolutionMask) -> (ConvolutionEngine<HostContext>, HostProbe) {
    let ctx = HostContext::new(&DeviceSelector::default()).unwrap();
    let probe = ctx.probe();
    let engine = ConvolutionEngine::new(ctx, mask, &ProgramSource::embedded(), &EngineConfig::default()).unwrap();
    (engine, probe)
}

fn gradient(width: u32, height: u32) -> Raster {
    let data = (0..height)
        .flat_map(|y| (0..width).map(move |x| pack_rgb((x * 7 % 256) as u8, (y * 11 % 256) as u8, ((x ^ y) * 3 % 256) as u8)))
        .collect();
    Raster::from_pixels(data, width, height, PixelLayout::IntRgb).unwrap()
}

fn checker(width: u32, height: u32) -> Raster {
    let data = (0..height)
        .flat_map(|y| (0..width).map(move |x| if (x + y) % 2 == 0 { 0x00FF_FFFF } else { 0 }))
        .collect();
    Raster::from_pixels(data, width, height, PixelLayout::IntRgb).unwrap()
}

#[test]
fn test_round_up_examples() {
    assert_eq!(round_up(16, 100), 112);
    assert_eq!(round_up(16, 128), 128);
    assert_eq!(round_up(3, 7), 9);
    assert_eq!(round_up(5, 0), 0);
}

#[test]
fn test_identity_mask_is_exact() {
    let (engine, _) = engine(ConvolutionMask::identity());
    let src = gradient(31, 17);
    let out = engine.filter(&src, None).unwrap();
    assert_eq!(out, src);
}

#[test]
fn test_matches_reference() {
    // Image sizes that are not multiples of the mask exercise grid padding.
    let cases = [
        (ConvolutionMask::gaussian(5, 1.4), 37, 23),
        (ConvolutionMask::box_blur(3), 64, 64),
        (ConvolutionMask::sharpen(1.0), 10, 3),
        (ConvolutionMask::emboss(), 19, 29),
        (ConvolutionMask::new(vec![0.25, 0.5, 0.25, 0.0, 1.0, 0.0], 3, 2, 0, 1).unwrap(), 13, 9),
    ];
    for (mask, w, h) in cases {
        let (engine, _) = engine(mask.clone());
        let src = gradient(w, h);
        let out = engine.filter(&src, None).unwrap();
        assert_eq!(out, reference::convolve(&src, &mask), "mask {:?} on {}x{}", mask.dimensions(), w, h);
    }
}

#[test]
fn test_border_pixels_copied() {
    let (engine, _) = engine(ConvolutionMask::box_blur(5));
    let src = checker(12, 12);
    let out = engine.filter(&src, None).unwrap();
    for i in 0..12 {
        for edge in [0, 1, 10, 11] {
            assert_eq!(out.pixel(i, edge), src.pixel(i, edge));
            assert_eq!(out.pixel(edge, i), src.pixel(edge, i));
        }
    }
    assert_ne!(out.pixel(5, 5), src.pixel(5, 5));
}

#[test]
fn test_filter_into_and_filter_agree() {
    let (engine, _) = engine(ConvolutionMask::gaussian(3, 0.8));
    let src = gradient(20, 15);
    let mut dst = engine.create_compatible_dest(&src);
    engine.filter_into(&src, &mut dst).unwrap();

    let reused = engine.filter(&src, Some(Raster::new(20, 15))).unwrap();
    assert_eq!(dst, reused);
}

#[test]
fn test_non_rgb_layout_rejected_without_allocation() {
    let (engine, probe) = engine(ConvolutionMask::box_blur(3));
    let before = probe.total_allocations();

    let argb = Raster::with_layout(8, 8, PixelLayout::IntArgb);
    let err = engine.filter(&argb, None).unwrap_err();
    assert!(matches!(err, ConvolveError::InvalidImage(_)));

    let src = gradient(8, 8);
    let bgr = Raster::with_layout(8, 8, PixelLayout::IntBgr);
    let err = engine.filter(&src, Some(bgr)).unwrap_err();
    assert!(matches!(err, ConvolveError::InvalidImage(_)));

    assert_eq!(probe.total_allocations(), before);
    assert_eq!(probe.dispatches(), 0);
}

#[test]
fn test_mismatched_dimensions_leave_dest_untouched() {
    let (engine, probe) = engine(ConvolutionMask::box_blur(3));
    let src = gradient(8, 8);
    let mut dst = checker(8, 7);
    let snapshot = dst.clone();

    let err = engine.filter_into(&src, &mut dst).unwrap_err();
    assert!(matches!(err, ConvolveError::InvalidImage(_)));
    assert_eq!(dst, snapshot);
    assert_eq!(probe.total_allocations(), 1);
}

#[test]
fn test_rejected_dest_is_kept_only_by_filter_into() {
    let (engine, probe) = engine(ConvolutionMask::box_blur(3));
    let src = gradient(8, 8);

    // `filter` takes the destination by value and drops it with the error.
    let err = engine.filter(&src, Some(checker(8, 7))).unwrap_err();
    assert!(matches!(err, ConvolveError::InvalidImage(_)));

    let mut dst = checker(8, 7);
    let snapshot = dst.clone();
    let err = engine.filter_into(&src, &mut dst).unwrap_err();
    assert!(matches!(err, ConvolveError::InvalidImage(_)));
    assert_eq!(dst, snapshot);
    assert_eq!(probe.total_allocations(), 1);
    assert_eq!(probe.dispatches(), 0);
}

#[test]
fn test_mask_over_kernel_work_group_limit() {
    // The device accepts 25 items per group but the built kernel only 16.
    let ctx = HostContext::new(&DeviceSelector::default()).unwrap().with_kernel_work_group_size(16);
    let probe = ctx.probe();
    let err = ConvolutionEngine::new(ctx, ConvolutionMask::box_blur(5), &ProgramSource::embedded(), &EngineConfig::default())
        .unwrap_err();
    assert!(matches!(err, ConvolveError::InvalidMask(ref msg) if msg.contains("16")));
    assert_eq!(probe.total_allocations(), 0);
    assert_eq!(probe.dispatches(), 0);
    assert_eq!(probe.releases(), ["kernel", "queue", "context"]);

    let ctx = HostContext::new(&DeviceSelector::default()).unwrap().with_kernel_work_group_size(16);
    let engine = ConvolutionEngine::new(ctx, ConvolutionMask::box_blur(3), &ProgramSource::embedded(), &EngineConfig::default())
        .unwrap();
    let src = gradient(10, 10);
    assert_eq!(engine.filter(&src, None).unwrap(), reference::convolve(&src, engine.mask()));
}

#[test]
fn test_calls_are_order_independent() {
    let (engine, _) = engine(ConvolutionMask::sharpen(0.7));
    let a = gradient(16, 9);
    let b = checker(11, 14);

    let a_first = engine.filter(&a, None).unwrap();
    let b_out = engine.filter(&b, None).unwrap();
    let a_again = engine.filter(&a, None).unwrap();

    assert_eq!(a_first, a_again);
    let (fresh, _) = self::engine(ConvolutionMask::sharpen(0.7));
    assert_eq!(fresh.filter(&b, None).unwrap(), b_out);
}

#[test]
fn test_per_call_buffers_released() {
    let (engine, probe) = engine(ConvolutionMask::box_blur(3));
    assert_eq!(probe.live_buffers(), 1);
    for _ in 0..3 {
        engine.filter(&gradient(9, 9), None).unwrap();
    }
    assert_eq!(probe.live_buffers(), 1);
    assert_eq!(probe.total_allocations(), 1 + 3 * 2);
    assert_eq!(probe.dispatches(), 3);
}

#[test]
fn test_recovers_after_device_failure() {
    let (engine, probe) = engine(ConvolutionMask::box_blur(3));
    let src = gradient(12, 10);
    let expected = reference::convolve(&src, engine.mask());

    for (stage, code) in [
        (Stage::CreateBuffer, -4),
        (Stage::SetArgument, -52),
        (Stage::Dispatch, -54),
        (Stage::ReadBuffer, -5),
    ] {
        probe.fail_next(stage, code);
        let err = engine.filter(&src, None).unwrap_err();
        assert!(err.is_recoverable());
        assert!(
            matches!(err, ConvolveError::DeviceOperationFailure { stage: s, code: c } if s == stage && c == code),
            "unexpected error: {err}"
        );
        assert_eq!(probe.live_buffers(), 1, "buffers leaked after {stage} failure");

        assert_eq!(engine.filter(&src, None).unwrap(), expected);
    }
}

#[test]
fn test_shutdown_releases_in_order() {
    let (engine, probe) = engine(ConvolutionMask::gaussian(3, 1.0));
    engine.filter(&gradient(6, 6), None).unwrap();
    engine.shutdown().unwrap();

    let releases = probe.releases();
    assert_eq!(&releases[releases.len() - 4..], ["buffer", "kernel", "queue", "context"]);
    assert_eq!(probe.live_buffers(), 0);
}

#[test]
fn test_closed_engine() {
    let (engine, probe) = engine(ConvolutionMask::identity());
    engine.shutdown().unwrap();
    let allocations = probe.total_allocations();

    let src = gradient(4, 4);
    assert!(matches!(engine.filter(&src, None), Err(ConvolveError::EngineClosed)));
    let mut dst = src.compatible_dest();
    assert!(matches!(engine.filter_into(&src, &mut dst), Err(ConvolveError::EngineClosed)));
    assert!(matches!(engine.shutdown(), Err(ConvolveError::EngineClosed)));
    assert_eq!(probe.total_allocations(), allocations);
}

#[test]
fn test_drop_releases_everything() {
    let (engine, probe) = engine(ConvolutionMask::box_blur(3));
    drop(engine);
    assert_eq!(probe.live_buffers(), 0);
    assert_eq!(probe.releases(), ["buffer", "kernel", "queue", "context"]);
}

#[test]
fn test_build_failure_keeps_log_and_releases_context() {
    let ctx = HostContext::new(&DeviceSelector::default()).unwrap();
    let probe = ctx.probe();
    let config = EngineConfig::default().with_entry_point("blur");

    let err = ConvolutionEngine::new(ctx, ConvolutionMask::identity(), &ProgramSource::embedded(), &config).unwrap_err();
    match err {
        ConvolveError::BuildFailure { log } => assert!(log.contains("blur")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(probe.total_allocations(), 0);
    assert_eq!(probe.releases(), ["queue", "context"]);
}

#[test]
fn test_invalid_build_options() {
    let ctx = HostContext::new(&DeviceSelector::default()).unwrap();
    let config = EngineConfig::default().with_build_options("-cl-mad-enable --fast");
    let err = ConvolutionEngine::new(ctx, ConvolutionMask::identity(), &ProgramSource::embedded(), &config).unwrap_err();
    assert!(matches!(err, ConvolveError::BuildFailure { .. }));
}

#[test]
fn test_mask_upload_failure() {
    let ctx = HostContext::new(&DeviceSelector::default()).unwrap();
    let probe = ctx.probe();
    probe.fail_next(Stage::WriteBuffer, -5);
    let err = ConvolutionEngine::new(ctx, ConvolutionMask::box_blur(3), &ProgramSource::embedded(), &EngineConfig::default())
        .unwrap_err();
    assert!(matches!(err, ConvolveError::DeviceOperationFailure { stage: Stage::WriteBuffer, code: -5 }));
    assert_eq!(probe.live_buffers(), 0);
    assert_eq!(probe.releases(), ["buffer", "kernel", "queue", "context"]);
}

#[test]
fn test_concurrent_filters() {
    let (engine, probe) = engine(ConvolutionMask::gaussian(5, 2.0));
    let images: Vec<Raster> = (0..8).map(|i| gradient(20 + i, 16 + 2 * i)).collect();
    let engine = &engine;

    let outputs: Vec<Raster> = thread::scope(|s| {
        let handles: Vec<_> = images
            .iter()
            .map(|img| s.spawn(move || engine.filter(img, None).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for (img, out) in images.iter().zip(&outputs) {
        assert_eq!(*out, reference::convolve(img, engine.mask()));
    }
    assert_eq!(probe.dispatches(), images.len());
    assert_eq!(probe.live_buffers(), 1);
}

#[test]
fn test_program_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("convolution.cl");
    std::fs::write(&path, ProgramSource::embedded().text()).unwrap();

    let ctx = HostContext::new(&DeviceSelector::default()).unwrap();
    let source = ProgramSource::from_file(&path).unwrap();
    let engine = ConvolutionEngine::new(ctx, ConvolutionMask::identity(), &source, &EngineConfig::default()).unwrap();
    let src = gradient(5, 5);
    assert_eq!(engine.filter(&src, None).unwrap(), src);
}
