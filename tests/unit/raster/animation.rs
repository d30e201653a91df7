use super::*;
use crate::foundation::core::ColorFormat;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Counting {
    delays: Vec<u32>,
    decoded: Arc<AtomicUsize>,
    fail_at: Option<usize>,
}

impl FrameDecoder for Counting {
    fn frame_count(&self) -> usize {
        self.delays.len()
    }

    fn loop_count(&self) -> i32 {
        2
    }

    fn decode_frame(&mut self, index: usize) -> PipelineResult<DecodedFrame> {
        if self.fail_at == Some(index) {
            return Err(PipelineError::decode("truncated frame"));
        }
        self.decoded.fetch_add(1, Ordering::SeqCst);
        let mut image = Image::new(ImageLayout::aligned(4, 4, ColorFormat::Rgba32))?;
        image.data_mut()[0] = index as u8;
        Ok(DecodedFrame {
            image,
            delay_cs: self.delays[index],
        })
    }
}

fn counting(delays: &[u32]) -> (Box<Counting>, Arc<AtomicUsize>) {
    let decoded = Arc::new(AtomicUsize::new(0));
    (
        Box::new(Counting {
            delays: delays.to_vec(),
            decoded: decoded.clone(),
            fail_at: None,
        }),
        decoded,
    )
}

#[test]
fn delay_clamp_bumps_only_below_floor() {
    assert_eq!(clamp_delay_cs(0), BUMPED_FRAME_DELAY_CS);
    assert_eq!(clamp_delay_cs(1), BUMPED_FRAME_DELAY_CS);
    assert_eq!(clamp_delay_cs(2), 2);
    assert_eq!(clamp_delay_cs(50), 50);
    assert_eq!(frame_delay(1), Duration::from_millis(100));
    assert_eq!(frame_delay(50), Duration::from_millis(500));
}

#[test]
fn on_demand_keeps_bounded_decode_ahead() {
    let (dec, decoded) = counting(&[1, 50, 1, 7, 9]);
    let mut anim = AnimationImage::from_decoder(dec, DecodeMode::OnDemand { decode_ahead: 2 }).unwrap();
    assert_eq!(anim.frame_count(), 5);
    assert_eq!(anim.loop_count(), 2);
    assert_eq!(anim.resident_frames(), 3);
    assert_eq!(decoded.load(Ordering::SeqCst), 3);

    for expected in [1usize, 2, 3, 4, 0, 1] {
        assert_eq!(anim.advance().unwrap(), expected);
        assert_eq!(anim.current().data()[0], expected as u8);
        assert!(anim.resident_frames() <= 3);
    }
    assert_eq!(anim.current_delay(), Duration::from_millis(500));
}

#[test]
fn pre_decoded_decodes_everything_once() {
    let (dec, decoded) = counting(&[1, 50, 1]);
    let mut anim = AnimationImage::from_decoder(dec, DecodeMode::PreDecoded).unwrap();
    assert_eq!(decoded.load(Ordering::SeqCst), 3);
    for _ in 0..7 {
        anim.advance().unwrap();
    }
    assert_eq!(decoded.load(Ordering::SeqCst), 3);
    assert_eq!(anim.current_index(), 1);
}

#[test]
fn single_frame_animation_never_redecodes() {
    let (dec, decoded) = counting(&[5]);
    let mut anim = AnimationImage::from_decoder(dec, DecodeMode::default()).unwrap();
    assert_eq!(anim.advance().unwrap(), 0);
    assert_eq!(decoded.load(Ordering::SeqCst), 1);
}

#[test]
fn decode_failure_surfaces_from_advance() {
    let decoded = Arc::new(AtomicUsize::new(0));
    let dec = Box::new(Counting {
        delays: vec![5, 5, 5, 5],
        decoded,
        fail_at: Some(3),
    });
    let mut anim = AnimationImage::from_decoder(dec, DecodeMode::OnDemand { decode_ahead: 1 }).unwrap();
    assert_eq!(anim.advance().unwrap(), 1);
    let err = anim.advance().unwrap_err();
    assert!(matches!(err, PipelineError::UpstreamDecode(_)));
}

#[test]
fn empty_and_mismatched_frames_are_rejected() {
    assert!(AnimationImage::from_frames(Vec::new(), 0).is_err());
    let a = Image::new(ImageLayout::aligned(4, 4, ColorFormat::Rgba32)).unwrap();
    let b = Image::new(ImageLayout::aligned(8, 4, ColorFormat::Rgba32)).unwrap();
    let frames = vec![
        DecodedFrame { image: a, delay_cs: 1 },
        DecodedFrame { image: b, delay_cs: 1 },
    ];
    assert!(AnimationImage::from_frames(frames, 0).is_err());
}
