//! Blocking driver tests over in-memory and TCP transports.


use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use timpl::transport::{DatagramDriver, DatagramTransport, Event, StreamDriver};
use timpl::{Client, Server, WireFormat};
use tls_common::{client_config, server_config};

/// An in-memory datagram transport over a pair of mpsc channels.
struct ChannelTransport {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

fn channel_pair() -> (ChannelTransport, ChannelTransport) {
    let (a_tx, a_rx) = channel();
    let (b_tx, b_rx) = channel();
    (
        ChannelTransport { tx: a_tx, rx: b_rx },
        ChannelTransport { tx: b_tx, rx: a_rx },
    )
}

impl DatagramTransport for ChannelTransport {
    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        match self.rx.recv_timeout(timeout) {
            Ok(datagram) => {
                let len = datagram.len();
                buf[..len].copy_from_slice(&datagram);
                Ok(Some(len))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"))
            }
        }
    }

    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.tx
            .send(data.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"))
    }

    fn send_limit(&self) -> usize {
        1500
    }

    fn receive_limit(&self) -> usize {
        1500
    }

    fn close(&mut self) {}
}

#[test]
fn datagram_driver_connects_and_echoes() {
    let _ = env_logger::try_init();

    let (client_side, server_side) = channel_pair();

    let server_thread = thread::spawn(move || {
        let endpoint = Server::new(server_config(), WireFormat::Datagram);
        let mut driver = DatagramDriver::new(server_side, endpoint);
        driver.connect().expect("server connect");

        loop {
            match driver.next_event().expect("server event") {
                Event::ApplicationData(data) => {
                    assert_eq!(data, b"ping");
                    driver.send(b"pong").expect("server send");
                }
                Event::PeerClosed => break,
                _ => {}
            }
        }
    });

    let endpoint = Client::new(client_config(), WireFormat::Datagram);
    let mut driver = DatagramDriver::new(client_side, endpoint);
    driver.connect().expect("client connect");

    driver.send(b"ping").expect("client send");
    loop {
        match driver.next_event().expect("client event") {
            Event::ApplicationData(data) => {
                assert_eq!(data, b"pong");
                break;
            }
            _ => {}
        }
    }
    driver.close().expect("client close");

    server_thread.join().expect("server thread");
}

#[test]
fn stream_driver_connects_over_tcp() {
    let _ = env_logger::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let server_thread = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        let endpoint = Server::new(server_config(), WireFormat::Stream);
        let mut driver = StreamDriver::new(stream, endpoint);
        driver.connect().expect("server connect");

        loop {
            match driver.next_event().expect("server event") {
                Event::ApplicationData(data) => {
                    assert_eq!(data, b"ping");
                    driver.send(b"pong").expect("server send");
                }
                Event::PeerClosed => break,
                _ => {}
            }
        }
    });

    let stream = TcpStream::connect(addr).expect("connect tcp");
    let endpoint = Client::new(client_config(), WireFormat::Stream);
    let mut driver = StreamDriver::new(stream, endpoint);
    driver.connect().expect("client connect");

    driver.send(b"ping").expect("client send");
    loop {
        match driver.next_event().expect("client event") {
            Event::ApplicationData(data) => {
                assert_eq!(data, b"pong");
                break;
            }
            _ => {}
        }
    }
    driver.close().expect("client close");

    server_thread.join().expect("server thread");
}
