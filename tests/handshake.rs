//! Full handshake tests over both wire formats.


use std::sync::Arc;
use std::time::Instant;

use timpl::transport::Event;
use timpl::{Config, Credential, Error, Server, WireFormat};
use tls_common::*;

#[test]
fn datagram_full_handshake() {
    let _ = env_logger::try_init();

    let (mut client, mut server, now) = connect_pair(WireFormat::Datagram);

    // FLIGHT 1: ClientHello
    let f1 = collect_packets(&mut client, now);
    assert!(!f1.is_empty(), "client should emit ClientHello");
    let f1_types = collect_handshake_types(&f1);
    assert_eq!(f1_types, vec![CLIENT_HELLO]);

    deliver(&f1, &mut server);

    // FLIGHT 4: ServerHello, Certificate, ServerKeyExchange, ServerHelloDone
    let f4 = collect_packets(&mut server, now);
    assert!(!f4.is_empty(), "server should emit its hello flight");
    let f4_types = collect_handshake_types(&f4);
    assert_eq!(
        f4_types,
        vec![
            SERVER_HELLO,
            CERTIFICATE,
            SERVER_KEY_EXCHANGE,
            SERVER_HELLO_DONE
        ]
    );

    deliver(&f4, &mut client);

    // FLIGHT 5: ClientKeyExchange, CCS, Finished
    let (f5, client_events) = drain(&mut client, now);
    assert!(!f5.is_empty(), "client should answer with its second flight");
    let f5_types = collect_handshake_types(&f5);
    assert_eq!(f5_types, vec![CLIENT_KEY_EXCHANGE]);

    // The server certificate surfaces before the handshake completes.
    assert!(
        client_events
            .iter()
            .any(|e| matches!(e, Event::PeerCert(_))),
        "client should surface the server certificate, got {:?}",
        client_events
    );

    // CCS at epoch 0, then the encrypted Finished at epoch 1.
    let f5_hdrs = collect_headers(&f5);
    assert!(
        f5_hdrs
            .iter()
            .any(|h| h.ctype == CHANGE_CIPHER_SPEC && h.epoch == 0),
        "flight 5 should carry ChangeCipherSpec, got {:?}",
        f5_hdrs
    );
    assert!(
        f5_hdrs.iter().any(|h| h.ctype == HANDSHAKE && h.epoch == 1),
        "flight 5 should carry an encrypted Finished, got {:?}",
        f5_hdrs
    );

    deliver(&f5, &mut server);

    // FLIGHT 6: server CCS + Finished, server is connected.
    let (f6, server_events) = drain(&mut server, now);
    assert!(
        server_events.contains(&Event::Connected),
        "server should reach Connected, got {:?}",
        server_events
    );
    let f6_hdrs = collect_headers(&f6);
    assert!(
        f6_hdrs
            .iter()
            .any(|h| h.ctype == CHANGE_CIPHER_SPEC && h.epoch == 0),
        "flight 6 should carry ChangeCipherSpec, got {:?}",
        f6_hdrs
    );

    deliver(&f6, &mut client);

    // Client verifies the server Finished and completes.
    let (_, client_events) = drain(&mut client, now);
    assert!(
        client_events.contains(&Event::Connected),
        "client should reach Connected, got {:?}",
        client_events
    );
}

#[test]
fn stream_full_handshake() {
    let _ = env_logger::try_init();

    let (mut client, mut server, now) = connect_pair(WireFormat::Stream);
    run_handshake(&mut client, &mut server, now);
}

#[test]
fn peer_cert_precedes_connected() {
    let _ = env_logger::try_init();

    let (mut client, mut server, now) = connect_pair(WireFormat::Datagram);
    let (client_events, _) = pump(&mut client, &mut server, now);

    let cert_pos = client_events
        .iter()
        .position(|e| matches!(e, Event::PeerCert(_)))
        .expect("client should surface the server certificate");
    let connected_pos = client_events
        .iter()
        .position(|e| *e == Event::Connected)
        .expect("client should reach Connected");
    assert!(
        cert_pos < connected_pos,
        "PeerCert must come before Connected, got {:?}",
        client_events
    );
}

#[test]
fn client_certificate_requested_and_verified() {
    let _ = env_logger::try_init();

    let client_credential = Credential::self_signed("client.test").expect("gen client cert");
    let client_config = Arc::new(
        Config::builder()
            .rng_seed(1)
            .credential(client_credential)
            .build()
            .expect("Failed to build config"),
    );

    let server_credential = Credential::self_signed("server.test").expect("gen server cert");
    let server_config = Arc::new(
        Config::builder()
            .rng_seed(2)
            .credential(server_credential)
            .require_client_certificate(true)
            .build()
            .expect("Failed to build config"),
    );

    let (mut client, mut server, now) =
        connect_pair_with(client_config, server_config, WireFormat::Datagram);

    let f1 = collect_packets(&mut client, now);
    deliver(&f1, &mut server);

    let f4 = collect_packets(&mut server, now);
    let f4_types = collect_handshake_types(&f4);
    assert!(
        f4_types.contains(&CERTIFICATE_REQUEST),
        "server should request a client certificate, got {:?}",
        f4_types
    );

    deliver(&f4, &mut client);

    // The client answers with Certificate, ClientKeyExchange and
    // CertificateVerify before its CCS.
    let f5 = collect_packets(&mut client, now);
    let f5_types = collect_handshake_types(&f5);
    assert_eq!(
        f5_types,
        vec![CERTIFICATE, CLIENT_KEY_EXCHANGE, CERTIFICATE_VERIFY]
    );

    deliver(&f5, &mut server);

    let (f6, server_events) = drain(&mut server, now);
    assert!(
        server_events
            .iter()
            .any(|e| matches!(e, Event::PeerCert(_))),
        "server should surface the client certificate, got {:?}",
        server_events
    );
    assert!(
        server_events.contains(&Event::Connected),
        "server should reach Connected, got {:?}",
        server_events
    );

    deliver(&f6, &mut client);
    let (_, client_events) = drain(&mut client, now);
    assert!(client_events.contains(&Event::Connected));
}

#[test]
fn supplemental_data_exchanged_when_negotiated() {
    let _ = env_logger::try_init();

    let client_config = Arc::new(
        Config::builder()
            .rng_seed(1)
            .supplemental_data(1, b"from-client".to_vec())
            .build()
            .expect("Failed to build config"),
    );

    let server_credential = Credential::self_signed("server.test").expect("gen server cert");
    let server_config = Arc::new(
        Config::builder()
            .rng_seed(2)
            .credential(server_credential)
            .supplemental_data(1, b"from-server".to_vec())
            .build()
            .expect("Failed to build config"),
    );

    let (mut client, mut server, now) =
        connect_pair_with(client_config, server_config, WireFormat::Datagram);
    let (client_events, server_events) = pump(&mut client, &mut server, now);

    assert!(
        client_events.contains(&Event::SupplementalData(1, b"from-server".to_vec())),
        "client should receive the server's supplemental data, got {:?}",
        client_events
    );
    assert!(
        server_events.contains(&Event::SupplementalData(1, b"from-client".to_vec())),
        "server should receive the client's supplemental data, got {:?}",
        server_events
    );
    assert!(client_events.contains(&Event::Connected));
    assert!(server_events.contains(&Event::Connected));
}

#[test]
fn no_supplemental_data_without_negotiation() {
    let _ = env_logger::try_init();

    // Only the client carries supplemental data; the server never
    // echoes the offer, so no SupplementalData message may flow.
    let client_config = Arc::new(
        Config::builder()
            .rng_seed(1)
            .supplemental_data(1, b"from-client".to_vec())
            .build()
            .expect("Failed to build config"),
    );

    let (mut client, mut server, now) =
        connect_pair_with(client_config, server_config(), WireFormat::Datagram);
    let (client_events, server_events) = pump(&mut client, &mut server, now);

    assert!(
        !client_events
            .iter()
            .any(|e| matches!(e, Event::SupplementalData(..))),
        "no supplemental data without negotiation, got {:?}",
        client_events
    );
    assert!(
        !server_events
            .iter()
            .any(|e| matches!(e, Event::SupplementalData(..))),
        "no supplemental data without negotiation, got {:?}",
        server_events
    );
    assert!(client_events.contains(&Event::Connected));
    assert!(server_events.contains(&Event::Connected));
}

#[test]
fn client_key_exchange_instead_of_client_hello_is_rejected() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let mut server = Server::new(server_config(), WireFormat::Datagram);
    server.handle_timeout(now).expect("server timeout start");

    // A hand-built epoch 0 record carrying a ClientKeyExchange with
    // message_seq 0, arriving where ClientHello is expected.
    #[rustfmt::skip]
    let packet = [
        // Record header: handshake, DTLS 1.2, epoch 0, seq 0, length 14
        22, 0xfe, 0xfd, 0, 0, 0, 0, 0, 0, 0, 0, 0, 14,
        // Handshake header: ClientKeyExchange, length 2, seq 0, offset 0, frag 2
        16, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 2,
        // Body: empty ECDH public key
        1, 0,
    ];

    let err = server.handle_packet(&packet).expect_err("must reject");
    assert!(
        matches!(err, Error::UnexpectedMessage(_)),
        "expected UnexpectedMessage, got {:?}",
        err
    );

    // The failure produces a fatal alert for the peer.
    let packets = collect_packets(&mut server, now);
    let hdrs = collect_headers(&packets);
    assert!(
        hdrs.iter().any(|h| h.ctype == ALERT),
        "server should queue a fatal alert, got {:?}",
        hdrs
    );
}
