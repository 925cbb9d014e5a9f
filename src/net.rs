//! TCP control reactor.
//!
//! One reader and one writer thread per client. Readers tokenise incoming
//! bytes and pump completed lines into the player's event channel; writers
//! drain a per-client response queue onto the socket. The [`Broadcaster`]
//! is the [`ResponseSink`] the player talks to.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{Receiver, Sender};

use crate::player::Event;
use crate::response::{ClientId, Code, Response, ResponseSink, BROADCAST};
use crate::tokeniser::Tokeniser;

/// Greeting sent to every client as its first line.
const GREETING: &str = concat!("audiod ", env!("CARGO_PKG_VERSION"));

/// Fans responses out to connected clients.
pub struct Broadcaster {
    clients: Mutex<HashMap<ClientId, Sender<String>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn register(&self, id: ClientId, tx: Sender<String>) {
        self.clients.lock().unwrap().insert(id, tx);
    }

    fn unregister(&self, id: ClientId) {
        self.clients.lock().unwrap().remove(&id);
    }
}

impl ResponseSink for Broadcaster {
    fn respond(&self, response: &Response, id: ClientId) {
        let line = response.pack();
        let clients = self.clients.lock().unwrap();
        if id == BROADCAST {
            for tx in clients.values() {
                let _ = tx.send(line.clone());
            }
        } else if let Some(tx) = clients.get(&id) {
            let _ = tx.send(line);
        }
    }
}

/// Starts accepting control connections, pumping their lines into `events`.
pub fn spawn(listener: TcpListener, broadcaster: Arc<Broadcaster>, events: Sender<Event>) {
    thread::spawn(move || accept_loop(listener, broadcaster, events));
}

fn accept_loop(listener: TcpListener, broadcaster: Arc<Broadcaster>, events: Sender<Event>) {
    let mut next_id: ClientId = 1;
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("accept error: {e}");
                continue;
            }
        };

        let id = next_id;
        next_id += 1;

        if let Err(e) = serve_client(stream, id, &broadcaster, &events) {
            tracing::warn!(client = id, "client setup error: {e}");
        }
    }
}

fn serve_client(
    stream: TcpStream,
    id: ClientId,
    broadcaster: &Arc<Broadcaster>,
    events: &Sender<Event>,
) -> std::io::Result<()> {
    if let Ok(peer) = stream.peer_addr() {
        tracing::info!(client = id, peer = %peer, "client connected");
    }

    let (tx, rx) = crossbeam_channel::unbounded::<String>();

    // The greeting goes into the queue before the broadcaster knows about
    // this client, so it is always the first line on the wire.
    let _ = tx.send(Response::new(Code::Ohai).arg(GREETING).pack());
    broadcaster.register(id, tx);

    let writer = stream.try_clone()?;
    thread::spawn(move || writer_loop(writer, rx));

    let _ = events.send(Event::Connected(id));

    let broadcaster = broadcaster.clone();
    let events = events.clone();
    thread::spawn(move || {
        reader_loop(stream, id, &events);
        broadcaster.unregister(id);
        let _ = events.send(Event::Disconnected(id));
        tracing::info!(client = id, "client disconnected");
    });

    Ok(())
}

fn writer_loop(mut stream: TcpStream, rx: Receiver<String>) {
    while let Ok(line) = rx.recv() {
        let write = stream
            .write_all(line.as_bytes())
            .and_then(|_| stream.write_all(b"\n"));
        if write.is_err() {
            break;
        }
    }
    let _ = stream.shutdown(Shutdown::Both);
}

fn reader_loop(mut stream: TcpStream, id: ClientId, events: &Sender<Event>) {
    let mut tokeniser = Tokeniser::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for words in tokeniser.feed(&buf[..n]) {
            if events.send(Event::Line(id, words)).is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registered(broadcaster: &Broadcaster, id: ClientId) -> Receiver<String> {
        let (tx, rx) = crossbeam_channel::unbounded();
        broadcaster.register(id, tx);
        rx
    }

    #[test]
    fn broadcast_reaches_every_client() {
        let b = Broadcaster::new();
        let rx1 = registered(&b, 1);
        let rx2 = registered(&b, 2);

        b.respond(&Response::new(Code::End), BROADCAST);

        assert_eq!(rx1.try_recv().unwrap(), "END");
        assert_eq!(rx2.try_recv().unwrap(), "END");
    }

    #[test]
    fn unicast_reaches_only_its_client() {
        let b = Broadcaster::new();
        let rx1 = registered(&b, 1);
        let rx2 = registered(&b, 2);

        b.respond(&Response::new(Code::Time).arg("0"), 2);

        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap(), "TIME 0");
    }

    #[test]
    fn unregistered_clients_stop_receiving() {
        let b = Broadcaster::new();
        let rx = registered(&b, 1);
        b.unregister(1);

        b.respond(&Response::new(Code::End), BROADCAST);

        // The channel is disconnected, not merely empty.
        assert!(rx.try_recv().is_err());
    }
}
