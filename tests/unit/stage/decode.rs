use super::*;
use crate::foundation::error::ErrorFlags;
use crate::hw::sim::{SimBehavior, SimulatedBackend};
use std::io::{BufReader, Cursor, Read};

fn jpeg(w: u32, h: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(w, h, |x, y| image::Rgb([x as u8, y as u8, 90]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Jpeg)
        .unwrap();
    out.into_inner()
}

fn stage(behavior: SimBehavior) -> (Arc<SimulatedBackend>, DecodeStage) {
    let backend = Arc::new(SimulatedBackend::new(behavior));
    let dynamic: Arc<dyn HardwareBackend> = backend.clone();
    let opts = DecodeOpts {
        timeout: Duration::from_millis(80),
        ..DecodeOpts::default()
    };
    (backend, DecodeStage::new(dynamic, opts))
}

#[test]
fn decodes_into_aligned_rgba() {
    let (backend, stage) = stage(SimBehavior::default());
    let bytes = jpeg(40, 30);
    let image = stage
        .decode(&mut Cursor::new(&bytes), Encoding::Jpeg)
        .unwrap();
    assert_eq!((image.width(), image.height()), (40, 30));
    assert_eq!(image.stride(), 48 * 4);
    assert_eq!(image.rows(), 32);

    let reference = image::load_from_memory(&bytes).unwrap().to_rgba8();
    assert_eq!(image.to_rgba().unwrap(), reference);
    assert_eq!(backend.stats().live_components(), 0);
    assert_eq!(backend.stats().live_buffers(), 0);
}

#[test]
fn small_input_buffers_stream_in_chunks() {
    let bytes = jpeg(64, 48);
    let (_, whole) = stage(SimBehavior::default());
    let (backend, chunked) = stage(SimBehavior::default().with_input_buffer_size(128));
    assert!(bytes.len() > 3 * 128);

    let a = whole.decode(&mut Cursor::new(&bytes), Encoding::Jpeg).unwrap();
    let b = chunked
        .decode(&mut BufReader::with_capacity(7, Cursor::new(&bytes)), Encoding::Jpeg)
        .unwrap();
    assert_eq!(a.data(), b.data());
    assert_eq!(backend.stats().live_components(), 0);
}

#[test]
fn missing_geometry_announcement_times_out() {
    let (backend, stage) =
        stage(SimBehavior::default().without_port_settings(ComponentKind::ImageDecode));
    let err = stage
        .decode(&mut Cursor::new(jpeg(16, 16)), Encoding::Jpeg)
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.flags(), ErrorFlags::NO_EOS);
    assert_eq!(backend.stats().live_components(), 0);
    assert_eq!(backend.stats().live_buffers(), 0);
}

#[test]
fn missing_end_of_stream_times_out() {
    let (backend, stage) = stage(SimBehavior::default().without_eos(ComponentKind::ImageDecode));
    let err = stage
        .decode(&mut Cursor::new(jpeg(16, 16)), Encoding::Jpeg)
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::EventTimeout {
            event: EventKind::EndOfStream,
            ..
        }
    ));
    assert_eq!(backend.stats().live_components(), 0);
}

#[test]
fn garbage_stream_fails_execution() {
    let (_, stage) = stage(SimBehavior::default());
    let err = stage
        .decode(&mut Cursor::new(vec![0x42u8; 300]), Encoding::Jpeg)
        .unwrap_err();
    assert_eq!(err.flags(), ErrorFlags::EXECUTION);
}

#[test]
fn creation_failure_is_reported() {
    let (_, stage) = stage(SimBehavior::default().failing(ComponentKind::ImageDecode));
    let err = stage
        .decode(&mut Cursor::new(jpeg(8, 8)), Encoding::Jpeg)
        .unwrap_err();
    assert!(matches!(err, PipelineError::ComponentCreationFailed { .. }));
}

#[test]
fn unsupported_encoding_is_refused_by_the_port() {
    let (backend, stage) = stage(SimBehavior::default());
    assert!(stage.supports(Encoding::Jpeg));
    assert!(!stage.supports(Encoding::Png));
    let err = stage
        .decode(&mut Cursor::new(vec![0u8; 16]), Encoding::Png)
        .unwrap_err();
    assert_eq!(err.flags(), ErrorFlags::PARAMETER);
    assert_eq!(backend.stats().live_components(), 0);
}

struct Broken;

impl Read for Broken {
    fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
        Err(std::io::Error::other("device unplugged"))
    }
}

#[test]
fn source_read_failure_maps_to_read_error() {
    let (backend, stage) = stage(SimBehavior::default());
    let err = stage
        .decode(&mut BufReader::new(Broken), Encoding::Jpeg)
        .unwrap_err();
    assert_eq!(err.flags(), ErrorFlags::READ);
    assert_eq!(backend.stats().live_components(), 0);
}
