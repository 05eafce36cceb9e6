use tokio::sync::watch;

use crate::model::Principal;

/// Boundary to the identity provider: who is signed in right now, and a way
/// to hear about sign-in and sign-out. Token issuance and session lifecycle
/// live behind this trait, not in this layer.
pub trait AuthProvider: Send + Sync {
    fn current_principal(&self) -> Option<Principal>;

    /// Receiver whose value changes on every sign-in and sign-out.
    fn changes(&self) -> watch::Receiver<Option<Principal>>;
}

/// Watch-backed provider for embedding and tests.
pub struct LocalAuth {
    tx: watch::Sender<Option<Principal>>,
}

impl LocalAuth {
    pub fn new() -> LocalAuth {
        LocalAuth {
            tx: watch::channel(None).0,
        }
    }

    pub fn sign_in(&self, principal: Principal) {
        let _ = self.tx.send(Some(principal));
    }

    pub fn sign_out(&self) {
        let _ = self.tx.send(None);
    }
}

impl Default for LocalAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthProvider for LocalAuth {
    fn current_principal(&self) -> Option<Principal> {
        self.tx.borrow().clone()
    }

    fn changes(&self) -> watch::Receiver<Option<Principal>> {
        self.tx.subscribe()
    }
}
