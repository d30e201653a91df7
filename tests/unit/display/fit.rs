use super::*;
use crate::display::config::Rotation;
use crate::foundation::core::Rect;

#[test]
fn aspect_fit_matches_larger_display_dimension() {
    let src = Size::new(300, 200);
    let out = fit_geometry(src, Size::new(1920, 1080), FitPolicy::default());
    assert_eq!(out, Size::new(1620, 1080));

    // Aspect within one row/column of rounding.
    let lhs = u64::from(out.width) * u64::from(src.height);
    let rhs = u64::from(out.height) * u64::from(src.width);
    assert!(lhs.abs_diff(rhs) <= u64::from(src.width.max(src.height)));
}

#[test]
fn wide_sources_are_width_limited() {
    let out = fit_geometry(Size::new(4000, 1000), Size::new(1920, 1080), FitPolicy::default());
    assert_eq!(out, Size::new(1920, 480));
}

#[test]
fn center_keeps_native_size_when_it_fits() {
    let policy = FitPolicy {
        keep_aspect: true,
        center: true,
    };
    assert_eq!(
        fit_geometry(Size::new(300, 200), Size::new(1920, 1080), policy),
        Size::new(300, 200)
    );
    assert_eq!(
        fit_geometry(Size::new(3840, 2160), Size::new(1920, 1080), policy),
        Size::new(1920, 1080)
    );
}

#[test]
fn no_aspect_stretches_to_bounds() {
    let policy = FitPolicy {
        keep_aspect: false,
        center: false,
    };
    assert_eq!(
        fit_geometry(Size::new(300, 200), Size::new(640, 640), policy),
        Size::new(640, 640)
    );
}

#[test]
fn plan_resize_downscales_oversized_pictures_only() {
    let display = Size::new(1920, 1080);
    let cfg = DisplayConfig::default();
    assert_eq!(plan_resize(Size::new(300, 200), display, &cfg, false), None);
    assert_eq!(
        plan_resize(Size::new(3840, 2160), display, &cfg, false),
        Some(Size::new(1920, 1080))
    );
}

#[test]
fn plan_resize_keeps_fitting_software_pictures_at_native_size() {
    let display = Size::new(1920, 1080);
    let cfg = DisplayConfig::default();
    assert_eq!(plan_resize(Size::new(300, 200), display, &cfg, true), None);
    assert_eq!(plan_resize(Size::new(32, 32), display, &cfg, true), None);
    assert_eq!(
        plan_resize(Size::new(3840, 2160), display, &cfg, true),
        Some(Size::new(1920, 1080))
    );
}

#[test]
fn window_not_smaller_than_the_display_falls_back_to_display_bounds() {
    let display = Size::new(1920, 1080);
    let huge = DisplayConfig {
        window: Some(Rect::new(0, 0, 3000, 2000)),
        ..DisplayConfig::default()
    };
    assert_eq!(
        plan_resize(Size::new(3840, 2160), display, &huge, false),
        Some(Size::new(1920, 1080))
    );
    assert_eq!(plan_resize(Size::new(800, 600), display, &huge, false), None);

    // Same height as the display: not strictly smaller on both axes.
    let tall = DisplayConfig {
        window: Some(Rect::new(0, 0, 400, 1080)),
        ..DisplayConfig::default()
    };
    assert_eq!(plan_resize(Size::new(800, 600), display, &tall, false), None);
}

#[test]
fn plan_resize_honours_window_and_rotation() {
    let display = Size::new(1920, 1080);
    let windowed = DisplayConfig {
        window: Some(Rect::new(0, 0, 400, 300)),
        ..DisplayConfig::default()
    };
    assert_eq!(
        plan_resize(Size::new(800, 600), display, &windowed, false),
        Some(Size::new(400, 300))
    );
    // A window smaller than the display takes pictures to its size either way.
    assert_eq!(
        plan_resize(Size::new(200, 150), display, &windowed, false),
        Some(Size::new(400, 300))
    );

    let rotated = DisplayConfig {
        rotation: Rotation::Deg90,
        ..DisplayConfig::default()
    };
    // 1920 wide picture fits a 1080x1920 portrait screen only after scaling.
    assert_eq!(
        plan_resize(Size::new(1920, 1080), display, &rotated, false),
        Some(Size::new(1080, 608))
    );
}
