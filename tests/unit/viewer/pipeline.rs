use super::*;
use crate::codec::software::SoftwareCodec;
use crate::display::config::{DisplayTransform, Rotation};
use crate::foundation::error::ErrorFlags;
use crate::hw::sim::{DisplayEvent, SimBehavior, SimulatedBackend};
use crate::hw::types::ComponentKind;

fn encode(img: image::DynamicImage, format: image::ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).unwrap();
    out.into_inner()
}

fn jpeg(w: u32, h: u32) -> AssetSource {
    AssetSource::Bytes {
        name: format!("{w}x{h}.jpg"),
        data: encode(
            image::DynamicImage::ImageRgb8(image::RgbImage::from_fn(w, h, |x, _| {
                image::Rgb([x as u8, 30, 60])
            })),
            image::ImageFormat::Jpeg,
        ),
    }
}

fn png(w: u32, h: u32) -> AssetSource {
    AssetSource::Bytes {
        name: format!("{w}x{h}.png"),
        data: encode(
            image::DynamicImage::ImageRgba8(image::RgbaImage::new(w, h)),
            image::ImageFormat::Png,
        ),
    }
}

fn fast() -> ViewerConfig {
    ViewerConfig {
        event_timeout_ms: 60,
        render_timeout_ms: 60,
        ..ViewerConfig::default()
    }
}

fn viewer(behavior: SimBehavior, config: ViewerConfig) -> (Arc<SimulatedBackend>, Viewer) {
    let backend = Arc::new(SimulatedBackend::new(behavior));
    let dynamic: Arc<dyn HardwareBackend> = backend.clone();
    let viewer = Viewer::new(dynamic, Arc::new(SoftwareCodec), config).unwrap();
    (backend, viewer)
}

fn info(encoding: Encoding, progressive: bool, components: u8) -> HeaderInfo {
    HeaderInfo {
        encoding,
        is_progressive: progressive,
        component_count: components,
        orientation: 1,
    }
}

#[test]
fn only_baseline_colour_jpeg_goes_to_hardware() {
    use DecodePath::*;
    assert_eq!(choose_decode_path(&info(Encoding::Jpeg, false, 3), true, false), Hardware);
    assert_eq!(choose_decode_path(&info(Encoding::Jpeg, true, 3), true, false), Software);
    assert_eq!(choose_decode_path(&info(Encoding::Jpeg, false, 1), true, false), Software);
    assert_eq!(choose_decode_path(&info(Encoding::Jpeg, false, 3), false, false), Software);
    assert_eq!(choose_decode_path(&info(Encoding::Jpeg, false, 3), true, true), Software);
    assert_eq!(choose_decode_path(&info(Encoding::Png, false, 0), true, false), Software);
}

#[test]
fn baseline_jpeg_is_decoded_in_hardware_and_shown() {
    let (backend, mut viewer) = viewer(SimBehavior::default(), fast());
    let prepared = viewer.load(&jpeg(64, 48)).unwrap();
    assert_eq!(prepared.path, DecodePath::Hardware);
    assert!(!prepared.fell_back);
    // Fits the display, decoded in hardware: no resize.
    assert_eq!(prepared.asset.size(), Size::new(64, 48));
    viewer.show(prepared).unwrap();
    assert!(viewer.is_showing());
    assert_eq!(backend.display().presentations().len(), 1);
    viewer.shutdown().unwrap();
    assert_eq!(backend.stats().live_components(), 0);
}

#[test]
fn hardware_failure_falls_back_to_software_once() {
    let config = ViewerConfig {
        resize: false,
        ..fast()
    };
    let (_, viewer) = viewer(SimBehavior::default().failing(ComponentKind::ImageDecode), config);
    let prepared = viewer.load(&jpeg(16, 16)).unwrap();
    assert!(prepared.fell_back);
    assert_eq!(prepared.path, DecodePath::Software);
}

#[test]
fn forced_software_skips_the_decoder() {
    let config = ViewerConfig {
        force_software: true,
        resize: false,
        ..fast()
    };
    let (backend, viewer) = viewer(SimBehavior::default(), config);
    let prepared = viewer.load(&jpeg(16, 16)).unwrap();
    assert_eq!(prepared.path, DecodePath::Software);
    assert_eq!(backend.stats().components_created, 0);
}

#[test]
fn oversized_software_stills_are_scaled_to_the_display() {
    let behavior = SimBehavior::default().with_display_size(Size::new(192, 108));
    let (backend, mut viewer) = viewer(behavior, fast());
    viewer.open(&png(400, 200)).unwrap();
    let shown = backend.display().presentations();
    assert_eq!(shown[0].layout.size(), Size::new(192, 96));
    assert!(!shown[0].tunneled);
}

#[test]
fn fitting_software_stills_keep_native_size() {
    let behavior = SimBehavior::default().with_display_size(Size::new(192, 108));
    let (backend, mut viewer) = viewer(behavior, fast());
    let prepared = viewer.load(&png(30, 20)).unwrap();
    assert_eq!(prepared.resize_to, None);
    viewer.show(prepared).unwrap();
    let shown = backend.display().presentations();
    assert_eq!(shown[0].layout.size(), Size::new(30, 20));
}

#[test]
fn tunnel_mode_resizes_on_the_way_to_the_display() {
    let behavior = SimBehavior::default().with_display_size(Size::new(192, 108));
    let config = ViewerConfig {
        tunnel: true,
        ..fast()
    };
    let (backend, mut viewer) = viewer(behavior, config);
    let prepared = viewer.load(&png(400, 200)).unwrap();
    assert_eq!(prepared.resize_to, Some(Size::new(192, 96)));
    viewer.show(prepared).unwrap();
    let shown = backend.display().presentations();
    assert!(shown[0].tunneled);
    assert_eq!(shown[0].layout.size(), Size::new(192, 96));
}

#[test]
fn resize_failure_shows_the_unscaled_picture() {
    let behavior = SimBehavior::default()
        .with_display_size(Size::new(192, 108))
        .without_port_settings(ComponentKind::Resize);
    let (backend, mut viewer) = viewer(behavior, fast());
    viewer.open(&png(400, 200)).unwrap();
    assert_eq!(
        backend.display().presentations()[0].layout.size(),
        Size::new(400, 200)
    );
}

#[test]
fn missing_file_is_file_not_found() {
    let (_, viewer) = viewer(SimBehavior::default(), fast());
    let err = viewer
        .load(&AssetSource::Path(PathBuf::from("/definitely/not/here.jpg")))
        .unwrap_err();
    assert_eq!(err.flags(), ErrorFlags::FILE_NOT_FOUND);
    assert_eq!(err.class(), crate::foundation::error::FailureClass::AssetUnreadable);
}

#[test]
fn rotation_controls_reapply_to_the_shown_picture() {
    let (backend, mut viewer) = viewer(SimBehavior::default(), fast());
    viewer.open(&jpeg(32, 32)).unwrap();
    viewer.rotate_cw().unwrap();
    viewer.toggle_mirror().unwrap();
    assert_eq!(viewer.display_config().rotation, Rotation::Deg90);
    let last_region = backend
        .display()
        .events()
        .into_iter()
        .filter_map(|e| match e {
            DisplayEvent::Region { region, .. } => Some(region),
            _ => None,
        })
        .last()
        .unwrap();
    assert_eq!(last_region.transform, DisplayTransform::MirrorRot90);

    viewer.reset_orientation();
    assert_eq!(viewer.display_config().rotation, Rotation::Deg0);
    assert!(viewer.display_config().mirror);
}

#[test]
fn blanking_puts_a_layer_below_the_picture() {
    let config = ViewerConfig {
        blank_background: true,
        display: DisplayConfig {
            layer: 5,
            ..DisplayConfig::default()
        },
        ..fast()
    };
    let (backend, _viewer) = viewer(SimBehavior::default(), config);
    assert_eq!(
        backend.display().events(),
        vec![DisplayEvent::Blanked {
            display: 0,
            layer: 4
        }]
    );
}

#[test]
fn source_names_label_logs() {
    assert_eq!(jpeg(2, 2).name(), "2x2.jpg");
    assert_eq!(
        AssetSource::Path(PathBuf::from("a/b.png")).name(),
        "a/b.png"
    );
}
