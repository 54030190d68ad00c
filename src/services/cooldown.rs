//! Repeat-sighting suppression
//!
//! The same plate is read on many consecutive detection cycles while a car
//! sits in front of the camera. Only the last logged token is remembered:
//! a sighting of that token within the window is dropped before any registry
//! work. State lives in memory and resets on restart.

use crate::domain::plate::PlateToken;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

#[derive(Debug, Clone)]
struct LastLogged {
    token: PlateToken,
    at: DateTime<Utc>,
}

pub struct Cooldown {
    window: Duration,
    last: Option<LastLogged>,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// True if this token was logged less than one window ago
    pub fn is_cooling(&self, token: &PlateToken, now: DateTime<Utc>) -> bool {
        let Some(last) = &self.last else {
            return false;
        };
        if last.token != *token {
            return false;
        }
        let elapsed = now - last.at;
        let cooling = elapsed < self.window;
        if cooling {
            debug!(
                plate = %token,
                elapsed_ms = %elapsed.num_milliseconds(),
                "cooldown_active"
            );
        }
        cooling
    }

    /// Remember a successfully logged token
    pub fn record(&mut self, token: &PlateToken, at: DateTime<Utc>) {
        self.last = Some(LastLogged { token: token.clone(), at });
    }

    #[cfg(test)]
    pub fn last_token(&self) -> Option<&PlateToken> {
        self.last.as_ref().map(|l| &l.token)
    }
}
