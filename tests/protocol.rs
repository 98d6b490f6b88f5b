//! Dispatcher behavior on raw request bytes: malformed requests, error
//! record layout, subscription bookkeeping.

mod common;

use std::sync::mpsc;

use common::{init_logging, ChannelSink, FakeIme, ERROR_BASE, MAJOR_OPCODE};
use xime::server::{ClientId, ClientInfo, EventSink};
use xime::wire::{serialize_error, ByteOrder, EventMask, Opcode, Request};
use xime::{ImeServer, ProtocolError};

fn server() -> ImeServer {
    init_logging();
    ImeServer::new(Box::<FakeIme>::default())
}

fn client() -> ClientInfo {
    ClientInfo { id: ClientId::from_raw(1), byte_order: ByteOrder::native(), sequence: 7 }
}

fn no_sink() -> Box<dyn EventSink> {
    panic!("request must not install a sink")
}

#[test]
fn oversized_requests_are_rejected_without_side_effects() {
    let mut server = server();
    let mut buf = Request::CreateContext.serialize(MAJOR_OPCODE, ByteOrder::native());
    // Pad the request and declare the padded length.
    buf.extend_from_slice(&[0; 4]);
    let declared = (buf.len() / 4) as u16;
    buf[2..4].copy_from_slice(&match ByteOrder::native() {
        ByteOrder::LittleEndian => declared.to_le_bytes(),
        ByteOrder::BigEndian => declared.to_be_bytes(),
    });

    assert_eq!(
        server.dispatch(&client(), &buf, no_sink),
        Err(ProtocolError::Length(Opcode::CreateContext))
    );
    assert!(server.contexts().is_empty());
}

#[test]
fn error_records_carry_the_failing_request() {
    let error = serialize_error(
        &ProtocolError::Value(32),
        ERROR_BASE,
        MAJOR_OPCODE,
        Opcode::GetCompositionString.raw(),
        9,
        ByteOrder::native(),
    );
    assert_eq!(error.len(), 32);
    assert_eq!(error[0], 0);
    assert_eq!(error[1], 2); // value errors reuse the core code
    assert_eq!(u16::from_ne_bytes([error[2], error[3]]), 9);
    assert_eq!(
        u32::from_ne_bytes([error[4], error[5], error[6], error[7]]),
        32
    );
    assert_eq!(
        u16::from_ne_bytes([error[8], error[9]]),
        Opcode::GetCompositionString.raw() as u16
    );
    assert_eq!(error[10], MAJOR_OPCODE);
}

#[test]
fn extension_specific_errors_sit_above_the_base() {
    let error = serialize_error(
        &ProtocolError::Disabled,
        ERROR_BASE,
        MAJOR_OPCODE,
        Opcode::CreateContext.raw(),
        1,
        ByteOrder::native(),
    );
    assert_eq!(error[1], ERROR_BASE + 2);
}

#[test]
fn undefined_mask_bits_are_not_stored() {
    let mut server = server();
    let (sender, _receiver) = mpsc::channel();
    let buf = Request::SelectInput { mask: EventMask::from_bits_retain(1) }
        .serialize(MAJOR_OPCODE, ByteOrder::native());
    // The raw request carries extra undefined bits.
    let mut raw = buf.clone();
    raw[4] = 0xff;
    server
        .dispatch(&client(), &raw, move || Box::new(ChannelSink(sender)))
        .unwrap();
    // Parsing masked the input down to the defined bit, so dispatch
    // accepted it; the stored subscription behaves like a plain notify one.
    // Unsubscribing with an empty mask must fully remove it.
    let empty = Request::SelectInput { mask: EventMask::empty() }
        .serialize(MAJOR_OPCODE, ByteOrder::native());
    server.dispatch(&client(), &empty, no_sink).unwrap();
    server.client_gone(ClientId::from_raw(1));
}

#[test]
fn only_subscribed_clients_receive_notify_events() {
    let mut server = server();
    let listener = common::Inbox::default();
    let bystander = common::Inbox::default();

    let subscribe = Request::SelectInput { mask: EventMask::NOTIFY }
        .serialize(MAJOR_OPCODE, ByteOrder::native());
    let sink = listener.clone();
    server
        .dispatch(&client(), &subscribe, move || Box::new(sink))
        .unwrap();

    // The second client's empty mask never installs a subscription.
    let second =
        ClientInfo { id: ClientId::from_raw(2), byte_order: ByteOrder::native(), sequence: 1 };
    let unsubscribe = Request::SelectInput { mask: EventMask::empty() }
        .serialize(MAJOR_OPCODE, ByteOrder::native());
    server.dispatch(&second, &unsubscribe, no_sink).unwrap();

    let create = Request::CreateContext.serialize(MAJOR_OPCODE, ByteOrder::native());
    server.dispatch(&client(), &create, no_sink).unwrap();
    let session = xime::SessionId::from_raw(1);
    server.handle_host_event(session, xime::HostEvent::StartComposition, 4);

    assert_eq!(listener.0.lock().unwrap().len(), 1);
    assert!(bystander.0.lock().unwrap().is_empty());
}

#[test]
fn unknown_minor_opcodes_report_the_opcode() {
    let mut server = server();
    let buf = [MAJOR_OPCODE, 200, 1, 0];
    assert_eq!(
        server.dispatch(&client(), &buf, no_sink),
        Err(ProtocolError::BadRequest(200))
    );
}
