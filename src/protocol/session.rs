//! Per-connection session state: which group is selected, whether the
//! connection authenticated as a moderator, and the command-rate throttle
//! (§4.5).

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::backend::Backend;
use crate::cache::CooldownCache;
use crate::model::AuthIdentity;

/// `(backend_view, current_group, throttle_deadline)` from §4.5. The
/// "authenticated backend view" is represented here as an `Option<AuthIdentity>`
/// rather than a second `Backend` clone, since the backend itself carries no
/// per-connection state -- only the identity used to check moderator rights
/// needs to travel with the session.
pub struct Session {
    pub backend: Arc<Backend>,
    pub cooldowns: Arc<Mutex<CooldownCache>>,
    pub peer_ip: IpAddr,
    pub server_name: String,
    pub current_group: Option<String>,
    pub auth: Option<AuthIdentity>,
    pub pending_user: Option<String>,
    throttle_deadline: Instant,
}

impl Session {
    pub fn new(
        backend: Arc<Backend>,
        cooldowns: Arc<Mutex<CooldownCache>>,
        peer_ip: IpAddr,
        server_name: String,
    ) -> Self {
        Self {
            backend,
            cooldowns,
            peer_ip,
            server_name,
            current_group: None,
            auth: None,
            pending_user: None,
            throttle_deadline: Instant::now(),
        }
    }

    /// The email of the moderator this session authenticated as, if the
    /// stored credentials actually check out against the live moderator
    /// table.
    pub async fn moderator_email(&self) -> Option<String> {
        let identity = self.auth.as_ref()?;
        if self.backend.is_moderator(&identity.user, &identity.pass).await {
            Some(identity.user.clone())
        } else {
            None
        }
    }

    /// Smooth bursts by delaying, never by rejecting (§4.5). `deadline` is
    /// the earliest time the next command is allowed to proceed without
    /// waiting. If a command arrives early enough that the overshoot still
    /// falls inside `window`, it sleeps out the remainder and the deadline
    /// advances by `interval`; a command that arrives after a long enough
    /// gap resets the deadline to `now + interval` with no wait.
    pub async fn throttle(&mut self, window: Duration, interval: Duration) {
        let now = Instant::now();
        if self.throttle_deadline > now {
            let wait = self.throttle_deadline - now;
            if wait <= window {
                tokio::time::sleep(wait).await;
            }
            self.throttle_deadline += interval;
        } else {
            self.throttle_deadline = now + interval;
        }
    }
}
