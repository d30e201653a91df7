use super::*;
use std::borrow::Cow;

const PALETTE: [u8; 9] = [255, 0, 0, 0, 255, 0, 0, 0, 255];
const RED: [u8; 4] = [255, 0, 0, 255];
const GREEN: [u8; 4] = [0, 255, 0, 255];
const BLUE: [u8; 4] = [0, 0, 255, 255];

fn frame(
    (left, top, width, height): (u16, u16, u16, u16),
    indices: Vec<u8>,
    delay: u16,
    dispose: DisposalMethod,
) -> gif::Frame<'static> {
    gif::Frame {
        left,
        top,
        width,
        height,
        delay,
        dispose,
        transparent: Some(3),
        palette: Some(PALETTE.iter().copied().chain([0, 0, 0]).collect()),
        buffer: Cow::Owned(indices),
        ..gif::Frame::default()
    }
}

fn sample(repeat: Option<Repeat>) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut enc = gif::Encoder::new(&mut out, 4, 4, &[]).unwrap();
        if let Some(r) = repeat {
            enc.set_repeat(r).unwrap();
        }
        enc.write_frame(&frame((0, 0, 4, 4), vec![0; 16], 1, DisposalMethod::Keep))
            .unwrap();
        enc.write_frame(&frame((2, 2, 2, 2), vec![1; 4], 5, DisposalMethod::Background))
            .unwrap();
        enc.write_frame(&frame((0, 0, 2, 1), vec![2, 3], 7, DisposalMethod::Keep))
            .unwrap();
    }
    out
}

fn px(img: &Image, x: u32, y: u32) -> [u8; 4] {
    img.to_rgba().unwrap().get_pixel(x, y).0
}

#[test]
fn indexes_delays_and_loop_count() {
    let frames = GifFrames::new(sample(Some(Repeat::Finite(3)))).unwrap();
    assert_eq!((frames.width(), frames.height()), (4, 4));
    assert_eq!(frames.frame_count(), 3);
    assert_eq!(frames.loop_count(), 3);
    assert_eq!(frames.delays, vec![1, 5, 7]);

    let once = GifFrames::new(sample(None)).unwrap();
    assert_eq!(once.loop_count(), 1);
    assert_eq!(plays(Repeat::Infinite), 0);
}

#[test]
fn partial_frames_are_composited() {
    let mut frames = GifFrames::new(sample(None)).unwrap();
    let f0 = frames.decode_frame(0).unwrap();
    assert_eq!(f0.delay_cs, 1);
    assert_eq!(px(&f0.image, 3, 3), RED);

    let f1 = frames.decode_frame(1).unwrap();
    assert_eq!(px(&f1.image, 0, 0), RED);
    assert_eq!(px(&f1.image, 3, 3), GREEN);

    let f2 = frames.decode_frame(2).unwrap();
    assert_eq!(px(&f2.image, 0, 0), BLUE);
    // Transparent source pixel keeps what was there.
    assert_eq!(px(&f2.image, 1, 0), RED);
    // The previous frame's area was cleared to background.
    assert_eq!(px(&f2.image, 3, 3), [0, 0, 0, 0]);
}

#[test]
fn going_backwards_rewinds_the_stream() {
    let mut frames = GifFrames::new(sample(None)).unwrap();
    let first = frames.decode_frame(0).unwrap();
    frames.decode_frame(2).unwrap();
    let again = frames.decode_frame(0).unwrap();
    assert_eq!(first.image.data(), again.image.data());
    // Skipping ahead composites the frames in between.
    let mut fresh = GifFrames::new(sample(None)).unwrap();
    assert_eq!(px(&fresh.decode_frame(1).unwrap().image, 3, 3), GREEN);
    assert!(fresh.decode_frame(3).is_err());
}

#[test]
fn garbage_is_a_decode_error() {
    let err = GifFrames::new(b"GIF89a".to_vec()).unwrap_err();
    assert!(matches!(err, PipelineError::UpstreamDecode(_)));
}

#[test]
fn debug_output_summarises_the_index() {
    let frames = GifFrames::new(sample(Some(Repeat::Infinite))).unwrap();
    let text = format!("{frames:?}");
    assert!(text.starts_with("GifFrames"));
    assert!(text.contains("frames: 3"));
}
