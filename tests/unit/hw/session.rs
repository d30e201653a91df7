use super::*;
use crate::foundation::error::ErrorFlags;
use crate::hw::sim::{SimBehavior, SimulatedBackend};
use crate::hw::types::{Encoding, PortFormat};
use std::io::Cursor;

fn fast() -> SessionOpts {
    SessionOpts {
        timeout: Duration::from_millis(50),
    }
}

fn jpeg(w: u32, h: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(w, h, |x, y| image::Rgb([x as u8, y as u8, 90]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Jpeg)
        .unwrap();
    out.into_inner()
}

struct Decoder {
    session: ComponentSession,
    input: PortIndex,
    output: PortIndex,
    inputs: Vec<BufferId>,
}

fn executing_decoder(backend: &SimulatedBackend) -> Decoder {
    let mut session = ComponentSession::create(backend, ComponentKind::ImageDecode, fast()).unwrap();
    let input = session.expect_ports(2).unwrap();
    let output = PortIndex(input.0 + 1);
    session
        .configure_port(input, |d| {
            d.format = PortFormat::Encoded(Encoding::Jpeg);
            d.buffer_count_actual = 2;
        })
        .unwrap();
    session.set_port_enabled(input, true).unwrap();
    let size = session.port_definition(input).unwrap().buffer_size;
    let inputs = session.allocate_buffers(input, 2, size).unwrap();
    session.change_state(ComponentState::Idle).unwrap();
    session.change_state(ComponentState::Executing).unwrap();
    Decoder {
        session,
        input,
        output,
        inputs,
    }
}

#[test]
fn creation_failure_is_reported_as_such() {
    let backend = SimulatedBackend::new(SimBehavior::default().failing(ComponentKind::Resize));
    let err = ComponentSession::create(&backend, ComponentKind::Resize, fast())
        .err()
        .unwrap();
    assert!(matches!(err, PipelineError::ComponentCreationFailed { .. }));
    assert_eq!(err.flags(), ErrorFlags::EXECUTION);
}

#[test]
fn port_count_mismatch_is_a_negotiation_error() {
    let backend = SimulatedBackend::default();
    let session = ComponentSession::create(&backend, ComponentKind::Render, fast()).unwrap();
    assert!(session.expect_ports(1).is_ok());
    assert!(matches!(
        session.expect_ports(2),
        Err(PipelineError::PortNegotiation(_))
    ));
}

#[test]
fn buffers_need_an_enabled_port() {
    let backend = SimulatedBackend::default();
    let mut s = ComponentSession::create(&backend, ComponentKind::ImageDecode, fast()).unwrap();
    let input = s.expect_ports(2).unwrap();
    let err = s.allocate_buffers(input, 1, 1024).unwrap_err();
    assert_eq!(err.flags(), ErrorFlags::MEMORY);

    let refused = s.import_buffer(input, vec![0; 16]).unwrap_err();
    assert_eq!(refused.value.len(), 16);

    s.set_port_enabled(input, true).unwrap();
    let size = s.port_definition(input).unwrap().buffer_size;
    assert_eq!(s.allocate_buffers(input, 2, size).unwrap().len(), 2);
    assert_eq!(s.live_buffers(), 2);
}

#[test]
fn state_changes_are_single_steps() {
    let backend = SimulatedBackend::default();
    let mut s = ComponentSession::create(&backend, ComponentKind::Render, fast()).unwrap();
    let err = s.change_state(ComponentState::Executing).unwrap_err();
    assert!(matches!(err, PipelineError::ExecutionState(_)));
    s.change_state(ComponentState::Idle).unwrap();
    s.change_state(ComponentState::Executing).unwrap();
    assert_eq!(s.state(), ComponentState::Executing);
}

#[test]
fn submitted_buffers_are_out_of_host_reach_until_returned() {
    let backend = SimulatedBackend::default();
    let mut d = executing_decoder(&backend);
    let bytes = jpeg(40, 30);
    let id = d.inputs[0];

    let header = d.session.buffer_mut(id).unwrap();
    assert!(header.load(&bytes[..64], false));
    d.session.submit_for_consumption(id).unwrap();

    assert!(d.session.buffer_mut(id).is_err());
    assert!(d.session.submit_for_consumption(id).is_err());
    assert!(d.session.free_buffer(id).is_err());
    assert_eq!(d.session.in_flight(d.input), 1);

    assert!(
        d.session
            .take_event(EventKind::BufferReturned, Some(d.input))
            .unwrap()
    );
    assert!(d.session.buffer_mut(id).is_ok());
    assert_eq!(d.session.acquire_buffer(d.input).unwrap(), d.inputs[0]);
}

#[test]
fn missing_event_times_out_without_retry() {
    let backend = SimulatedBackend::new(
        SimBehavior::default().without_port_settings(ComponentKind::ImageDecode),
    );
    let mut d = executing_decoder(&backend);
    let bytes = jpeg(40, 30);
    let id = d.inputs[0];
    assert!(d.session.buffer_mut(id).unwrap().load(&bytes, true));
    d.session.submit_for_consumption(id).unwrap();

    let start = Instant::now();
    let err = d
        .session
        .wait_for_event(EventKind::PortSettingsChanged, Some(d.output))
        .unwrap_err();
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert!(err.is_timeout());
    assert_eq!(err.flags(), ErrorFlags::NO_EOS);
}

#[test]
fn ports_with_buffers_in_hardware_cannot_be_disabled_until_flushed() {
    let backend = SimulatedBackend::default();
    let mut d = executing_decoder(&backend);
    let bytes = jpeg(40, 30);

    // Header only: geometry is announced, decoding waits for the rest.
    let id = d.inputs[0];
    assert!(d.session.buffer_mut(id).unwrap().load(&bytes[..bytes.len() - 2], false));
    d.session.submit_for_consumption(id).unwrap();
    d.session
        .wait_for_event(EventKind::PortSettingsChanged, Some(d.output))
        .unwrap();

    let def = d.session.port_definition(d.output).unwrap();
    d.session.set_port_enabled(d.output, true).unwrap();
    let out = d
        .session
        .import_buffer(d.output, vec![0; def.buffer_size])
        .unwrap();
    d.session.submit_for_production(out).unwrap();
    assert_eq!(d.session.in_flight(d.output), 1);

    let err = d.session.set_port_enabled(d.output, false).unwrap_err();
    assert_eq!(err.flags(), ErrorFlags::PORT);

    d.session.flush(d.output).unwrap();
    assert_eq!(d.session.in_flight(d.output), 0);
    d.session.set_port_enabled(d.output, false).unwrap();
}

#[test]
fn teardown_frees_every_buffer_exactly_once() {
    let backend = SimulatedBackend::default();
    let mut d = executing_decoder(&backend);
    let id = d.inputs[1];
    assert!(d.session.buffer_mut(id).unwrap().load(&[0xFF, 0xD8], false));
    d.session.submit_for_consumption(id).unwrap();

    let t = d.session.teardown();
    assert!(t.report.is_empty(), "{:?}", t.report);
    assert_eq!(t.reclaimed.len(), 2);
    assert_eq!(t.stats.registered, 2);
    assert_eq!(t.stats.live(), 0);

    let stats = backend.stats();
    assert_eq!(stats.live_buffers(), 0);
    assert_eq!(stats.live_components(), 0);
}

#[test]
fn dropping_a_session_tears_it_down() {
    let backend = SimulatedBackend::default();
    {
        let _d = executing_decoder(&backend);
        assert_eq!(backend.stats().live_buffers(), 2);
    }
    assert_eq!(backend.stats().live_buffers(), 0);
    assert_eq!(backend.stats().live_components(), 0);
}
