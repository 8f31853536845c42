//! Preview port allocator: each session's assistant runs with `PORT` set to
//! a small, deterministic, collision-free number derived from the app port
//! the user's dev server would otherwise pick, so the preview proxy always
//! knows where to dial. A process-global `HashSet<u16>` tracks ports
//! currently in use.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::error::SessionError;

/// Leading digit prepended to an app port's decimal representation to derive
/// its preview port: 3000 -> "5" + "3000" -> 53000.
const PREVIEW_PORT_PREFIX: &str = "5";

/// Derive the preview port for `app_port` by decimal concatenation (not
/// multiplication): `5` followed by `app_port`'s digits, e.g. 3000 -> 53000.
pub fn preview_port_for_app_port(app_port: u16) -> Result<u16, SessionError> {
    format!("{PREVIEW_PORT_PREFIX}{app_port}").parse().map_err(|_| SessionError::PortsExhausted)
}

#[derive(Default)]
pub struct PortAllocator {
    in_use: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the deterministic preview port for `app_port` and reserve it.
    /// Fails if that exact port is already claimed by another session:
    /// collisions are a hard error, not resolved by picking another port,
    /// since the scheme must stay deterministic for the proxy to work.
    pub fn allocate(&self, app_port: u16) -> Result<u16, SessionError> {
        let preview_port = preview_port_for_app_port(app_port)?;
        let mut in_use = self.in_use.lock().expect("port allocator lock poisoned");
        if !in_use.insert(preview_port) {
            return Err(SessionError::PortsExhausted);
        }
        Ok(preview_port)
    }

    pub fn release(&self, preview_port: u16) {
        self.in_use.lock().expect("port allocator lock poisoned").remove(&preview_port);
    }
}

/// Base app port new sessions are assigned from, passed to the child as
/// `PORT`. Each
/// session gets the next free port in `[APP_PORT_BASE, APP_PORT_BASE + range)`
/// so that distinct sessions never share the dev server port their assistant
/// binds to, and so `PortAllocator::allocate` never sees a collision under
/// normal operation.
pub const APP_PORT_BASE: u16 = 3000;
const APP_PORT_RANGE: u16 = 1000;

/// Hands out distinct app ports (the `PORT` env value passed to each
/// session's PTY child) so concurrent sessions' dev servers never collide.
/// A thin sibling to [`PortAllocator`]: same `Mutex<HashSet<u16>>` shape,
/// scanning forward from [`APP_PORT_BASE`] instead of deriving a port
/// deterministically from another value.
#[derive(Default)]
pub struct AppPortPool {
    in_use: Mutex<HashSet<u16>>,
}

impl AppPortPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve and return the lowest free app port in range. Errors once the
    /// whole range is exhausted.
    pub fn allocate(&self) -> Result<u16, SessionError> {
        let mut in_use = self.in_use.lock().expect("app port pool lock poisoned");
        for offset in 0..APP_PORT_RANGE {
            let candidate = APP_PORT_BASE + offset;
            if in_use.insert(candidate) {
                return Ok(candidate);
            }
        }
        Err(SessionError::PortsExhausted)
    }

    pub fn release(&self, app_port: u16) {
        self.in_use.lock().expect("app port pool lock poisoned").remove(&app_port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_port_pool_hands_out_distinct_ports() {
        let pool = AppPortPool::new();
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        assert_ne!(a, b);
        assert!(a >= APP_PORT_BASE && b >= APP_PORT_BASE);
    }

    #[test]
    fn app_port_pool_reuses_released_port() {
        let pool = AppPortPool::new();
        let a = pool.allocate().unwrap();
        pool.release(a);
        let b = pool.allocate().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn allocates_deterministic_port() {
        let allocator = PortAllocator::new();
        assert_eq!(allocator.allocate(3000).unwrap(), 53000);
    }

    #[test]
    fn preview_port_is_decimal_concatenation() {
        assert_eq!(preview_port_for_app_port(3000).unwrap(), 53000);
        assert_eq!(preview_port_for_app_port(4321).unwrap(), 54321);
    }

    #[test]
    fn preview_port_overflow_is_ports_exhausted() {
        assert!(preview_port_for_app_port(u16::MAX).is_err());
    }

    #[test]
    fn same_app_port_twice_is_a_collision() {
        let allocator = PortAllocator::new();
        allocator.allocate(4000).unwrap();
        assert!(allocator.allocate(4000).is_err());
    }

    #[test]
    fn release_frees_the_port_for_reuse() {
        let allocator = PortAllocator::new();
        let port = allocator.allocate(5000).unwrap();
        allocator.release(port);
        assert!(allocator.allocate(5000).is_ok());
    }
}
