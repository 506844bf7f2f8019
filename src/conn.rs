//! A cheaply-cloneable handle to a writable TCP socket, shared between the
//! connection that owns the read side and anything else that needs to push
//! bytes to it out of band (follower propagation, a replica's ACK write).

use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct SharedStream(Arc<Mutex<TcpStream>>);

impl SharedStream {
    pub fn new(stream: TcpStream) -> Self {
        SharedStream(Arc::new(Mutex::new(stream)))
    }

    pub fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut guard = self.0.lock().unwrap();
        guard.write_all(buf)?;
        guard.flush()
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.0.lock().unwrap().peer_addr()
    }
}
