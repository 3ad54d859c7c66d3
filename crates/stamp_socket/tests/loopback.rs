// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! Software timestamps over loopback. These need no privileges: software
//! receive timestamping works on any socket.

use std::{
    net::Ipv4Addr,
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use stamp_socket::{
    bind::{bind, udp_socket},
    interfaces::{InterfaceDescriptor, InterfaceRegistry},
    mode::apply_mode,
    recv::run,
    send::send_datagram,
    TimestampMode,
};

fn loopback() -> InterfaceDescriptor {
    InterfaceDescriptor {
        name: "lo".parse().unwrap(),
        ipv4_address: Some(Ipv4Addr::LOCALHOST),
    }
}

#[test]
fn software_timestamp_on_loopback() {
    let sock = udp_socket().unwrap();
    let registry = InterfaceRegistry::default();
    apply_mode(&sock, TimestampMode::SoftwareOnly, None, &registry).unwrap();

    let port = bind(&sock, 0, None).unwrap().port();

    let before = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
    send_datagram("127.0.0.1", port, b"hello timestamps").unwrap();

    let mut receiver = run(sock);
    let datagram = receiver.next().unwrap();

    assert_eq!(b"hello timestamps", &datagram.payload[..]);
    assert!(!datagram.truncated);
    assert_eq!(Some(Ipv4Addr::LOCALHOST), datagram.peer.map(|p| *p.ip()));

    let sw = datagram.record.software.expect("software timestamp");
    assert!(sw.secs() as u64 >= before.as_secs());
    assert_eq!(None, datagram.record.hardware);
}

#[test]
fn oversized_datagram_is_flagged() {
    let sock = udp_socket().unwrap();
    apply_mode(
        &sock,
        TimestampMode::SoftwareOnly,
        None,
        &InterfaceRegistry::default(),
    )
    .unwrap();
    let port = bind(&sock, 0, None).unwrap().port();

    let big = vec![b'x'; 3000];
    send_datagram("127.0.0.1", port, &big).unwrap();

    let datagram = run(sock).next().unwrap();
    assert!(datagram.truncated);
    assert_eq!(stamp_socket::recv::PAYLOAD_CAPACITY, datagram.payload.len());
}

#[test]
fn without_timestamping_the_record_is_empty() {
    let sock = udp_socket().unwrap();
    let port = bind(&sock, 0, None).unwrap().port();

    send_datagram("127.0.0.1", port, b"plain").unwrap();

    let datagram = run(sock).next().unwrap();
    assert!(datagram.record.is_empty());
}

#[test]
fn closing_the_handle_ends_the_loop() {
    let sock = udp_socket().unwrap();
    bind(&sock, 0, None).unwrap();

    let mut receiver = run(sock);
    let handle = receiver.handle();

    let closer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        handle.close().unwrap();
    });

    assert_eq!(None, receiver.next());
    assert_eq!(None, receiver.next());
    closer.join().unwrap();
}

#[test]
fn loopback_descriptor_binds_its_address() {
    let lo = loopback();
    let sock = udp_socket().unwrap();
    // skip the device pin, which may be refused without CAP_NET_RAW
    let addr = stamp_socket::bind::bind_address(0, Some(&lo));
    assert_eq!(Ipv4Addr::LOCALHOST, *addr.ip());

    sock.bind(&std::net::SocketAddr::V4(addr).into()).unwrap();
    let local = sock.local_addr().unwrap().as_socket_ipv4().unwrap();
    assert_eq!(Ipv4Addr::LOCALHOST, *local.ip());
}
