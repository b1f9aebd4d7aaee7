//! Flight retransmission and duplicate handling tests.


use timpl::transport::Event;
use timpl::WireFormat;
use tls_common::*;

#[test]
fn resent_flight_keeps_message_seq_and_advances_record_seq() {
    let _ = env_logger::try_init();

    let (mut client, mut server, mut now) = connect_pair(WireFormat::Datagram);

    // FLIGHT 1 (ClientHello): block the initial send, deliver the resend.
    let init1 = collect_packets(&mut client, now);
    let init1_hdrs = collect_headers(&init1);
    let init1_seqs = collect_handshake_seqs(&init1);

    trigger_timeout(&mut client, &mut now);
    let resend1 = collect_packets(&mut client, now);
    let resend1_hdrs = collect_headers(&resend1);

    // Same epoch, fresh record sequence, verbatim message_seq.
    assert_epochs_and_seq_increased(&init1_hdrs, &resend1_hdrs);
    assert_eq!(
        init1_seqs,
        collect_handshake_seqs(&resend1),
        "message_seq must not change on resend"
    );

    deliver(&resend1, &mut server);

    // FLIGHT 4 (server hello flight): same treatment.
    let init4 = collect_packets(&mut server, now);
    assert!(!init4.is_empty(), "server should answer ClientHello");
    let init4_hdrs = collect_headers(&init4);
    let init4_seqs = collect_handshake_seqs(&init4);

    trigger_timeout(&mut server, &mut now);
    let resend4 = collect_packets(&mut server, now);
    let resend4_hdrs = collect_headers(&resend4);

    assert_epochs_and_seq_increased(&init4_hdrs, &resend4_hdrs);
    assert_eq!(
        init4_seqs,
        collect_handshake_seqs(&resend4),
        "message_seq must not change on resend"
    );

    // The handshake still completes after the losses.
    deliver(&resend4, &mut client);
    run_handshake(&mut client, &mut server, now);
}

#[test]
fn duplicate_client_hello_triggers_flight_resend() {
    let _ = env_logger::try_init();

    let (mut client, mut server, now) = connect_pair(WireFormat::Datagram);

    let f1 = collect_packets(&mut client, now);
    deliver(&f1, &mut server);

    let f4 = collect_packets(&mut server, now);
    assert!(!f4.is_empty());
    let f4_types = collect_handshake_types(&f4);
    let f4_hdrs = collect_headers(&f4);
    let f4_seqs = collect_handshake_seqs(&f4);

    // The client's flight 1 arrives again, as if our answer was lost.
    // The server must resend flight 4 rather than restart or error.
    deliver(&f1, &mut server);

    let f4_again = collect_packets(&mut server, now);
    assert!(
        !f4_again.is_empty(),
        "duplicate ClientHello should trigger a flight resend"
    );
    assert_eq!(f4_types, collect_handshake_types(&f4_again));
    assert_eq!(
        f4_seqs,
        collect_handshake_seqs(&f4_again),
        "resent flight must carry the original message_seq values"
    );
    assert_epochs_and_seq_increased(&f4_hdrs, &collect_headers(&f4_again));

    // And the handshake still completes.
    deliver(&f4_again, &mut client);
    run_handshake(&mut client, &mut server, now);
}

#[test]
fn duplicate_second_flight_is_idempotent() {
    let _ = env_logger::try_init();

    let (mut client, mut server, now) = connect_pair(WireFormat::Datagram);

    let f1 = collect_packets(&mut client, now);
    deliver(&f1, &mut server);
    let f4 = collect_packets(&mut server, now);
    deliver(&f4, &mut client);

    // FLIGHT 5: ClientKeyExchange, CCS, Finished.
    let f5 = collect_packets(&mut client, now);
    deliver(&f5, &mut server);

    let f6 = collect_packets(&mut server, now);
    assert!(!f6.is_empty(), "server should answer with CCS + Finished");

    // The same flight arrives again. The server already switched its
    // read cipher; the duplicate must resend flight 6, not corrupt state.
    deliver(&f5, &mut server);
    let f6_again = collect_packets(&mut server, now);
    assert!(
        !f6_again.is_empty(),
        "duplicate flight 5 should trigger a resend of flight 6"
    );
    assert_epochs_and_seq_increased(&collect_headers(&f6), &collect_headers(&f6_again));

    // The server surfaced Connected when it verified the client's
    // Finished; only the client side is still pending.
    deliver(&f6_again, &mut client);
    let (_, client_events) = drain(&mut client, now);
    assert!(
        client_events.contains(&Event::Connected),
        "client should reach Connected, got {:?}",
        client_events
    );
}
