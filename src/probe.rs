//! Liveness probes injected into the state monitor
//!
//! The monitor never trusts the registry's cached `pid`/`port` fields; it
//! re-probes them on every tick through these traits. Probe failures are
//! treated as "not running" / "not listening", never as errors.

use std::net::{SocketAddr, TcpStream};
use std::sync::Mutex;
use std::time::Duration;
use sysinfo::{Pid, System};

/// Checks whether a process with the given PID is alive.
pub trait ProcessProbe: Send + Sync {
    fn is_running(&self, pid: u32) -> bool;
}

/// Checks whether something is accepting connections on a local port.
pub trait PortProbe: Send + Sync {
    fn is_listening(&self, port: u16) -> bool;
}

/// Process probe backed by the system process table. A successful lookup
/// after a refresh counts as "running".
pub struct SystemProcessProbe {
    system: Mutex<System>,
}

impl SystemProcessProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new_all()),
        }
    }
}

impl Default for SystemProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SystemProcessProbe {
    fn is_running(&self, pid: u32) -> bool {
        if pid == 0 {
            return false;
        }
        let mut system = self.system.lock().unwrap();
        system.refresh_all();
        system.process(Pid::from_u32(pid)).is_some()
    }
}

const PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(250);

/// Port probe that attempts a loopback TCP connection.
pub struct TcpPortProbe;

impl PortProbe for TcpPortProbe {
    fn is_listening(&self, port: u16) -> bool {
        if port == 0 {
            return false;
        }
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        TcpStream::connect_timeout(&addr, PORT_PROBE_TIMEOUT).is_ok()
    }
}
