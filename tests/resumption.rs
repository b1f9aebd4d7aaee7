//! Session resumption (abbreviated handshake) tests.


use std::sync::Arc;

use timpl::transport::Event;
use timpl::{Client, Config, Credential, Server, SessionCache, WireFormat};
use tls_common::*;

fn server_config_with_cache(cache: SessionCache) -> Arc<Config> {
    let credential = Credential::self_signed("server.test").expect("gen server cert");
    Arc::new(
        Config::builder()
            .rng_seed(2)
            .credential(credential)
            .session_cache(cache)
            .build()
            .expect("Failed to build config"),
    )
}

#[test]
fn abbreviated_handshake_skips_key_exchange() {
    let _ = env_logger::try_init();

    let cache = SessionCache::new();

    // First connection: full handshake, session exported on both ends.
    let (mut client, mut server, now) = connect_pair_with(
        client_config(),
        server_config_with_cache(cache.clone()),
        WireFormat::Datagram,
    );
    run_handshake(&mut client, &mut server, now);

    let session = client.session().expect("client should export a session");
    let session_id = session.id;

    // Second connection offers the cached session.
    let mut client2 = Client::resume(client_config(), WireFormat::Datagram, session);
    let mut server2 = Server::new(server_config_with_cache(cache.clone()), WireFormat::Datagram);
    client2.handle_timeout(now).expect("client timeout start");
    server2.handle_timeout(now).expect("server timeout start");

    let f1 = collect_packets(&mut client2, now);
    deliver(&f1, &mut server2);

    // FLIGHT 2: ServerHello straight to CCS + Finished; no Certificate,
    // no ServerKeyExchange.
    let f2 = collect_packets(&mut server2, now);
    let f2_types = collect_handshake_types(&f2);
    assert_eq!(
        f2_types,
        vec![SERVER_HELLO],
        "abbreviated flight must skip Certificate/ServerKeyExchange"
    );
    let f2_hdrs = collect_headers(&f2);
    assert!(
        f2_hdrs
            .iter()
            .any(|h| h.ctype == CHANGE_CIPHER_SPEC && h.epoch == 0),
        "abbreviated flight should carry ChangeCipherSpec, got {:?}",
        f2_hdrs
    );
    assert!(
        f2_hdrs.iter().any(|h| h.ctype == HANDSHAKE && h.epoch == 1),
        "abbreviated flight should carry an encrypted Finished, got {:?}",
        f2_hdrs
    );

    deliver(&f2, &mut client2);

    // FLIGHT 3: the client answers with its own CCS + Finished and
    // completes.
    let (f3, client_events) = drain(&mut client2, now);
    assert!(
        client_events.contains(&Event::Connected),
        "client should reach Connected, got {:?}",
        client_events
    );
    let f3_hdrs = collect_headers(&f3);
    assert!(f3_hdrs
        .iter()
        .any(|h| h.ctype == CHANGE_CIPHER_SPEC && h.epoch == 0));

    deliver(&f3, &mut server2);
    let (_, server_events) = drain(&mut server2, now);
    assert!(
        server_events.contains(&Event::Connected),
        "server should reach Connected, got {:?}",
        server_events
    );

    // The resumed connection kept the session id.
    let resumed = client2.session().expect("resumed session");
    assert_eq!(resumed.id, session_id);
}

#[test]
fn invalidated_session_falls_back_to_full_handshake() {
    let _ = env_logger::try_init();

    let cache = SessionCache::new();

    let (mut client, mut server, now) = connect_pair_with(
        client_config(),
        server_config_with_cache(cache.clone()),
        WireFormat::Datagram,
    );
    run_handshake(&mut client, &mut server, now);

    let session = client.session().expect("client should export a session");
    let old_id = session.id;

    // The server side forgot the session.
    cache.invalidate(&old_id);

    let mut client2 = Client::resume(client_config(), WireFormat::Datagram, session);
    let mut server2 = Server::new(server_config_with_cache(cache.clone()), WireFormat::Datagram);
    client2.handle_timeout(now).expect("client timeout start");
    server2.handle_timeout(now).expect("server timeout start");

    let f1 = collect_packets(&mut client2, now);
    deliver(&f1, &mut server2);

    // Cache miss: the server runs a full handshake with a fresh id.
    let f4 = collect_packets(&mut server2, now);
    let f4_types = collect_handshake_types(&f4);
    assert!(
        f4_types.contains(&CERTIFICATE),
        "fallback must be a full handshake, got {:?}",
        f4_types
    );

    deliver(&f4, &mut client2);
    let (client_events, server_events) = pump(&mut client2, &mut server2, now);
    assert!(client_events.contains(&Event::Connected));
    assert!(server_events.contains(&Event::Connected));

    let new_session = client2.session().expect("new session");
    assert_ne!(new_session.id, old_id, "fallback must assign a fresh id");
}

#[test]
fn unknown_session_offer_runs_full_handshake() {
    let _ = env_logger::try_init();

    // A server without a cache ignores the offered id entirely.
    let cache = SessionCache::new();
    let (mut client, mut server, now) = connect_pair_with(
        client_config(),
        server_config_with_cache(cache),
        WireFormat::Datagram,
    );
    run_handshake(&mut client, &mut server, now);
    let session = client.session().expect("session");

    let mut client2 = Client::resume(client_config(), WireFormat::Datagram, session);
    let mut server2 = Server::new(server_config(), WireFormat::Datagram);
    client2.handle_timeout(now).expect("client timeout start");
    server2.handle_timeout(now).expect("server timeout start");

    let f1 = collect_packets(&mut client2, now);
    deliver(&f1, &mut server2);

    let f4 = collect_packets(&mut server2, now);
    let f4_types = collect_handshake_types(&f4);
    assert!(
        f4_types.contains(&CERTIFICATE),
        "server without a cache must run a full handshake, got {:?}",
        f4_types
    );

    deliver(&f4, &mut client2);
    let (client_events, server_events) = pump(&mut client2, &mut server2, now);
    assert!(client_events.contains(&Event::Connected));
    assert!(server_events.contains(&Event::Connected));

    // No cache on this server: no session id was assigned.
    assert!(client2.session().is_none());
}
