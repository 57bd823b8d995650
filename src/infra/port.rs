//! Free-port selection for the development server
//!
//! Checks candidates by binding a listener and releasing it straight away.
//! The answer is only a snapshot: another process may take the port before
//! the server binds it.

use serde::{Deserialize, Serialize};
use std::net::TcpListener;

use crate::error::PortError;

/// Direction in which candidate ports are scanned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanDirection {
    /// start, start+1, ...
    Ascending,
    /// start, start-1, ...
    #[default]
    Descending,
}

impl ScanDirection {
    fn step(self, port: u16) -> Option<u16> {
        match self {
            Self::Ascending => port.checked_add(1),
            Self::Descending => port.checked_sub(1).filter(|p| *p > 0),
        }
    }
}

/// Candidate ports, at most `count`, never leaving 1..=65535
pub fn candidates(start: u16, direction: ScanDirection, count: u16) -> Vec<u16> {
    let mut ports = Vec::with_capacity(usize::from(count));
    let mut next = (start > 0).then_some(start);
    while let Some(port) = next {
        if ports.len() >= usize::from(count) {
            break;
        }
        ports.push(port);
        next = direction.step(port);
    }
    ports
}

/// Whether a port can currently be bound on `host`
pub fn is_port_free(host: &str, port: u16) -> bool {
    TcpListener::bind((host, port)).is_ok()
}

/// Return the first free port scanning from `start`.
pub fn select_port(
    host: &str,
    start: u16,
    direction: ScanDirection,
    count: u16,
) -> Result<u16, PortError> {
    for port in candidates(start, direction, count) {
        if is_port_free(host, port) {
            tracing::debug!(port, "selected free port");
            return Ok(port);
        }
        tracing::trace!(port, "port in use");
    }
    Err(PortError::NoPortAvailable { start, count })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "127.0.0.1";

    #[test]
    fn test_candidates_descending() {
        assert_eq!(candidates(9999, ScanDirection::Descending, 3), vec![9999, 9998, 9997]);
    }

    #[test]
    fn test_candidates_clamped_to_valid_range() {
        assert_eq!(candidates(2, ScanDirection::Descending, 5), vec![2, 1]);
        assert_eq!(candidates(65534, ScanDirection::Ascending, 5), vec![65534, 65535]);
        assert!(candidates(0, ScanDirection::Ascending, 5).is_empty());
        assert!(candidates(8080, ScanDirection::Ascending, 0).is_empty());
    }

    #[test]
    fn test_direction_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            direction: ScanDirection,
        }
        let w: Wrapper = toml::from_str("direction = \"ascending\"").unwrap();
        assert_eq!(w.direction, ScanDirection::Ascending);
        assert_eq!(ScanDirection::default(), ScanDirection::Descending);
    }

    #[test]
    fn test_skips_occupied_ports() {
        // Occupy an OS-chosen port and its lower neighbour if possible
        let first = TcpListener::bind((HOST, 0)).unwrap();
        let start = first.local_addr().unwrap().port();
        let second = start
            .checked_sub(1)
            .and_then(|p| TcpListener::bind((HOST, p)).ok());

        let selected = select_port(HOST, start, ScanDirection::Descending, 50).unwrap();
        assert_ne!(selected, start);
        if second.is_some() {
            assert!(selected < start - 1);
        }
        assert!(selected < start);
    }

    #[test]
    fn test_default_port_fallback() {
        // 9999 and 9998 taken: the scan settles on 9997 when it is free
        let (Ok(_a), Ok(_b)) = (
            TcpListener::bind((HOST, 9999)),
            TcpListener::bind((HOST, 9998)),
        ) else {
            return;
        };
        if !is_port_free(HOST, 9997) {
            return;
        }
        assert_eq!(
            select_port(HOST, 9999, ScanDirection::Descending, 100).unwrap(),
            9997
        );
    }

    #[test]
    fn test_exhausted_range() {
        let taken = TcpListener::bind((HOST, 0)).unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = select_port(HOST, port, ScanDirection::Ascending, 1).unwrap_err();
        assert_eq!(err, PortError::NoPortAvailable { start: port, count: 1 });
    }
}
