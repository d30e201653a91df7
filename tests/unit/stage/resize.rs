use super::*;
use crate::foundation::error::ErrorFlags;
use crate::hw::sim::{SimBehavior, SimulatedBackend};

fn gradient(w: u32, h: u32) -> (Image, image::RgbaImage) {
    let rgba = image::RgbaImage::from_fn(w, h, |x, y| image::Rgba([x as u8 * 2, y as u8 * 3, 40, 255]));
    (Image::from_rgba(w, h, rgba.as_raw()).unwrap(), rgba)
}

fn stage(behavior: SimBehavior) -> (Arc<SimulatedBackend>, ResizeStage) {
    let backend = Arc::new(SimulatedBackend::new(behavior));
    let dynamic: Arc<dyn HardwareBackend> = backend.clone();
    let opts = ResizeOpts {
        timeout: Duration::from_millis(80),
    };
    (backend, ResizeStage::new(dynamic, opts))
}

#[test]
fn exact_target_produces_aligned_output() {
    let (backend, stage) = stage(SimBehavior::default());
    let (input, rgba) = gradient(100, 50);
    let out = stage
        .resize(input, ResizeTarget::Exact(Size::new(50, 25)))
        .unwrap();
    assert_eq!(out.size(), Size::new(50, 25));
    assert_eq!(out.stride(), 64 * 4);
    assert_eq!(out.rows(), 32);
    let expected =
        image::imageops::resize(&rgba, 50, 25, image::imageops::FilterType::Triangle);
    assert_eq!(out.to_rgba().unwrap(), expected);
    assert_eq!(backend.stats().live_components(), 0);
    assert_eq!(backend.stats().live_buffers(), 0);
}

#[test]
fn fit_target_keeps_aspect() {
    let (_, stage) = stage(SimBehavior::default());
    let (input, _) = gradient(30, 20);
    let target = ResizeTarget::Fit {
        bounds: Size::new(192, 108),
        policy: FitPolicy::default(),
    };
    assert_eq!(target.resolve(input.size()), Size::new(162, 108));
    let out = stage.resize(input, target).unwrap();
    assert_eq!(out.size(), Size::new(162, 108));
}

#[test]
fn timeout_hands_the_input_back() {
    let (backend, stage) = stage(SimBehavior::default().without_port_settings(ComponentKind::Resize));
    let (input, _) = gradient(20, 10);
    let before = input.data().to_vec();
    let failure = stage
        .resize(input, ResizeTarget::Exact(Size::new(10, 5)))
        .unwrap_err();
    assert_eq!(failure.error.flags(), ErrorFlags::NO_EOS);
    let back = failure.input.expect("input recovered");
    assert_eq!(back.size(), Size::new(20, 10));
    assert_eq!(back.data(), &before[..]);
    assert_eq!(backend.stats().live_components(), 0);
}

#[test]
fn creation_failure_hands_the_input_back() {
    let (_, stage) = stage(SimBehavior::default().failing(ComponentKind::Resize));
    let (input, _) = gradient(8, 8);
    let failure = stage
        .resize(input, ResizeTarget::Exact(Size::new(4, 4)))
        .unwrap_err();
    assert!(matches!(
        failure.error,
        PipelineError::ComponentCreationFailed { .. }
    ));
    assert!(failure.input.is_some());
    let err: PipelineError = failure.into();
    assert_eq!(err.flags(), ErrorFlags::EXECUTION);
}

#[test]
fn empty_target_is_a_parameter_error() {
    let (_, stage) = stage(SimBehavior::default());
    let (input, _) = gradient(8, 8);
    let failure = stage
        .resize(input, ResizeTarget::Exact(Size::new(0, 4)))
        .unwrap_err();
    assert_eq!(failure.error.flags(), ErrorFlags::PARAMETER);
    assert!(failure.input.is_some());
}
