use super::*;
use crate::display::config::{DisplayTransform, Rotation};
use crate::foundation::core::ColorFormat;
use crate::foundation::error::ErrorFlags;
use crate::hw::sim::{DisplayEvent, SimBehavior, SimulatedBackend};
use crate::raster::animation::DecodedFrame;
use crate::raster::buffer::ImageLayout;
use std::time::Instant;

fn solid(w: u32, h: u32, v: u8) -> Image {
    let px: Vec<u8> = (0..w * h).flat_map(|_| [v, v / 2, 255 - v, 255]).collect();
    Image::from_rgba(w, h, &px).unwrap()
}

fn stage(behavior: SimBehavior, transition: Transition) -> (Arc<SimulatedBackend>, RenderStage) {
    let backend = Arc::new(SimulatedBackend::new(behavior));
    let dynamic: Arc<dyn HardwareBackend> = backend.clone();
    let opts = RenderOpts {
        timeout: Duration::from_millis(100),
        transition,
    };
    (backend, RenderStage::new(dynamic, opts))
}

fn regions_of(backend: &SimulatedBackend, id: u32) -> Vec<DisplayRegion> {
    backend
        .display()
        .events()
        .into_iter()
        .filter_map(|e| match e {
            DisplayEvent::Region { component, region } if component == id => Some(region),
            _ => None,
        })
        .collect()
}

#[test]
fn still_is_shown_until_stopped() {
    let (backend, mut stage) = stage(SimBehavior::default(), Transition::default());
    assert!(!stage.has_active_session());
    stage.present(solid(40, 30, 10), &DisplayConfig::default()).unwrap();
    assert!(stage.has_active_session());

    let shown = backend.display().presentations();
    assert_eq!(shown.len(), 1);
    assert!(!shown[0].tunneled);
    assert_eq!(shown[0].layout.size(), Size::new(40, 30));
    assert!(shown[0].region.unwrap().fullscreen);
    assert_eq!(backend.display().last_frame().unwrap().get_pixel(3, 3)[0], 10);

    stage.stop_session().unwrap();
    assert!(!stage.has_active_session());
    assert_eq!(
        backend.display().events().last(),
        Some(&DisplayEvent::Removed {
            component: shown[0].component
        })
    );
    assert_eq!(backend.stats().live_components(), 0);
    assert_eq!(backend.stats().live_buffers(), 0);
}

#[test]
fn cut_removes_old_picture_before_the_new_one() {
    let (backend, mut stage) = stage(SimBehavior::default(), Transition::default());
    let display = DisplayConfig::default();
    stage.present(solid(8, 8, 1), &display).unwrap();
    stage.present(solid(8, 8, 2), &display).unwrap();
    let events = backend.display().events();
    let first = backend.display().presentations()[0].component;
    let removed = events
        .iter()
        .position(|e| *e == DisplayEvent::Removed { component: first })
        .unwrap();
    let second_frame = events
        .iter()
        .rposition(|e| matches!(e, DisplayEvent::Frame(_)))
        .unwrap();
    assert!(removed < second_frame);
    assert_eq!(backend.stats().live_components(), 1);
}

#[test]
fn tunneled_resize_reaches_the_display() {
    let (backend, mut stage) = stage(SimBehavior::default(), Transition::default());
    stage
        .present_resized(solid(100, 50, 80), Size::new(50, 25), &DisplayConfig::default())
        .unwrap();
    let shown = backend.display().presentations();
    assert_eq!(shown.len(), 1);
    assert!(shown[0].tunneled);
    assert_eq!(shown[0].layout.size(), Size::new(50, 25));
    assert_eq!(shown[0].layout.stride, 64 * 4);
    assert_eq!(backend.stats().live_components(), 2);

    drop(stage);
    assert_eq!(backend.stats().live_components(), 0);
    assert_eq!(backend.stats().live_buffers(), 0);
}

#[test]
fn rejected_region_fails_cleanly() {
    let (backend, mut stage) = stage(
        SimBehavior::default().rejecting_display_region(),
        Transition::default(),
    );
    let err = stage
        .present(solid(8, 8, 1), &DisplayConfig::default())
        .unwrap_err();
    assert_eq!(err.flags(), ErrorFlags::DISPLAY_CONFIG);
    assert!(!stage.has_active_session());
    assert_eq!(backend.stats().live_components(), 0);
}

#[test]
fn missing_frame_acknowledgement_times_out() {
    let (backend, mut stage) = stage(
        SimBehavior::default().without_eos(ComponentKind::Render),
        Transition::default(),
    );
    let err = stage
        .present(solid(8, 8, 1), &DisplayConfig::default())
        .unwrap_err();
    assert_eq!(err.flags(), ErrorFlags::NO_EOS);
    assert_eq!(backend.stats().live_components(), 0);
}

#[test]
fn display_changes_apply_without_rebuilding() {
    let (backend, mut stage) = stage(SimBehavior::default(), Transition::default());
    let mut display = DisplayConfig::default();
    stage.present(solid(8, 8, 1), &display).unwrap();
    let id = backend.display().presentations()[0].component;

    display.rotate_cw();
    display.toggle_mirror();
    stage.set_display_config(&display).unwrap();
    assert_eq!(stage.display_config().unwrap().rotation, Rotation::Deg90);

    let regions = regions_of(&backend, id);
    assert_eq!(regions.len(), 2);
    assert_eq!(regions[1].transform, DisplayTransform::MirrorRot90);
    assert_eq!(backend.display().presentations().len(), 1);
    assert_eq!(backend.stats().components_created, 1);
}

#[test]
fn blend_fades_in_above_then_settles_on_base_layer() {
    let blend = Transition {
        kind: TransitionKind::Blend,
        duration_ms: 8,
        steps: 4,
    };
    let (backend, mut stage) = stage(SimBehavior::default(), blend);
    let display = DisplayConfig::default();
    stage.present(solid(8, 8, 1), &display).unwrap();
    stage.present(solid(8, 8, 2), &display).unwrap();

    let shown = backend.display().presentations();
    let (old, new) = (shown[0].component, shown[1].component);
    let old_regions = regions_of(&backend, old);
    assert_eq!(old_regions.last().unwrap().alpha, 255);

    let regions = regions_of(&backend, new);
    assert_eq!(regions.len(), 5);
    let ramp: Vec<u8> = regions[..4].iter().map(|r| r.alpha).collect();
    assert!(ramp.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(ramp[3], 255);
    assert!(regions[..4].iter().all(|r| r.layer == 1));
    assert_eq!(regions[4].layer, 0);
    assert!(regions[4].set.contains(RegionFields::LAYER));

    // The old picture goes away only once the new one is opaque.
    let events = backend.display().events();
    let removed = events
        .iter()
        .position(|e| *e == DisplayEvent::Removed { component: old })
        .unwrap();
    let opaque = events
        .iter()
        .position(|e| matches!(e, DisplayEvent::Region { component, region } if *component == new && region.alpha == 255))
        .unwrap();
    assert!(opaque < removed);
    assert_eq!(backend.stats().live_components(), 1);
}

#[test]
fn failed_blend_keeps_the_old_picture() {
    let blend = Transition {
        kind: TransitionKind::Blend,
        duration_ms: 4,
        steps: 2,
    };
    let (backend, mut stage) = stage(SimBehavior::default(), blend);
    stage.present(solid(8, 8, 1), &DisplayConfig::default()).unwrap();
    let elsewhere = DisplayConfig {
        display: 7,
        ..DisplayConfig::default()
    };
    assert!(stage.present(solid(8, 8, 2), &elsewhere).is_err());
    assert!(stage.has_active_session());
    assert_eq!(backend.stats().live_components(), 1);
}

fn frames(n: usize) -> AnimationImage {
    let frames = (0..n)
        .map(|i| DecodedFrame {
            image: {
                let mut img = Image::new(ImageLayout::aligned(4, 4, ColorFormat::Rgba32)).unwrap();
                img.data_mut()[0] = i as u8;
                img
            },
            delay_cs: 2,
        })
        .collect();
    AnimationImage::from_frames(frames, 1).unwrap()
}

#[test]
fn animation_plays_every_frame_then_stops() {
    let (backend, mut stage) = stage(SimBehavior::default(), Transition::default());
    stage
        .show(LoadedAsset::Animated(frames(3)), &DisplayConfig::default())
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while stage.animation_state() != Some(SchedulerState::Stopped) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(stage.animation_state(), Some(SchedulerState::Stopped));
    let checksums: Vec<u64> = backend
        .display()
        .presentations()
        .iter()
        .map(|p| p.checksum)
        .collect();
    assert_eq!(checksums.len(), 3);
    assert_ne!(checksums[0], checksums[1]);
    stage.stop_session().unwrap();
    assert_eq!(backend.stats().live_components(), 0);
}

#[test]
fn stopping_cancels_infinite_animation() {
    let (backend, mut stage) = stage(SimBehavior::default(), Transition::default());
    let anim = {
        let f = frames(2);
        let mut v = Vec::new();
        for i in 0..2u8 {
            let mut img = Image::new(f.layout()).unwrap();
            img.data_mut()[0] = i;
            v.push(DecodedFrame {
                image: img,
                delay_cs: 100,
            });
        }
        AnimationImage::from_frames(v, 0).unwrap()
    };
    stage
        .show(LoadedAsset::Animated(anim), &DisplayConfig::default())
        .unwrap();
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(stage.animation_state(), Some(SchedulerState::Running));
    let t = Instant::now();
    stage.stop_session().unwrap();
    assert!(t.elapsed() < Duration::from_millis(500));
    assert_eq!(backend.stats().live_components(), 0);
    assert_eq!(backend.display().presentations().len(), 1);
}

#[test]
fn display_changes_are_not_blocked_by_a_frame_still_on_screen() {
    let backend = Arc::new(SimulatedBackend::new(
        SimBehavior::default().holding_render_buffers(),
    ));
    let dynamic: Arc<dyn HardwareBackend> = backend.clone();
    let opts = RenderOpts {
        timeout: Duration::from_millis(1000),
        transition: Transition::default(),
    };
    let mut stage = RenderStage::new(dynamic, opts);
    let mut display = DisplayConfig::default();
    stage.show(LoadedAsset::Animated(frames(3)), &display).unwrap();

    // Frame 1 is now waiting for the renderer to give frame 0 back.
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(stage.animation_state(), Some(SchedulerState::Running));
    display.rotate_cw();
    let t = Instant::now();
    stage.set_display_config(&display).unwrap();
    assert!(t.elapsed() < Duration::from_millis(300));
    assert_eq!(stage.display_config().unwrap().rotation, Rotation::Deg90);

    stage.stop_session().unwrap();
    assert_eq!(backend.display().presentations().len(), 1);
    assert_eq!(backend.stats().live_components(), 0);
}
