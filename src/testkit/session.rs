//! Settable market session.

use parking_lot::Mutex;

use crate::domain::MarketSession;
use crate::port::MarketSessionSource;

pub struct FixedSession {
    session: Mutex<MarketSession>,
}

impl FixedSession {
    pub fn open() -> Self {
        Self {
            session: Mutex::new(MarketSession::Open),
        }
    }

    pub fn closed() -> Self {
        Self {
            session: Mutex::new(MarketSession::Closed),
        }
    }

    pub fn set(&self, session: MarketSession) {
        *self.session.lock() = session;
    }
}

impl MarketSessionSource for FixedSession {
    fn current_session(&self) -> MarketSession {
        *self.session.lock()
    }
}
