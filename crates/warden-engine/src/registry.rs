//! Shared verifier state and the per-process session table
//!
//! The catalog, configuration and module are loaded once and shared
//! read-only by every session. Each session sits behind its own lock so
//! hosts can drive different sessions from different threads; calls for
//! one session must still arrive in order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::VerifierConfig;
use crate::host::{SessionHost, SessionId};
use crate::module::ModuleProvider;
use crate::session::{Session, SessionError};

type SharedSession<M> = Arc<Mutex<Session<M>>>;

pub struct Verifier<M: ModuleProvider> {
    catalog: Arc<Catalog>,
    config: Arc<VerifierConfig>,
    module: Arc<M>,
    sessions: RwLock<HashMap<SessionId, SharedSession<M>>>,
}

impl<M: ModuleProvider> Verifier<M> {
    pub fn new(catalog: Catalog, config: VerifierConfig, module: M) -> Self {
        info!(
            checks = catalog.len(),
            enabled = catalog.is_enabled(),
            "client verifier ready"
        );
        Self {
            catalog: Arc::new(catalog),
            config: Arc::new(config),
            module: Arc::new(module),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && self.catalog.is_enabled()
    }

    /// Create a session for `id` and issue the module to it. An existing
    /// session with the same id is replaced.
    pub fn open_session<H: SessionHost>(
        &self,
        id: SessionId,
        secret: &[u8],
        host: &mut H,
    ) -> Result<(), SessionError> {
        self.open_session_with_rng(id, secret, StdRng::from_entropy(), host)
    }

    /// Like [`open_session`](Self::open_session) with a caller-supplied
    /// generator, for reproducible check selection.
    pub fn open_session_with_rng<H: SessionHost>(
        &self,
        id: SessionId,
        secret: &[u8],
        rng: StdRng,
        host: &mut H,
    ) -> Result<(), SessionError> {
        let mut session = Session::new(
            id,
            secret,
            Arc::clone(&self.module),
            Arc::clone(&self.catalog),
            Arc::clone(&self.config),
            rng,
        );
        session.start(host)?;

        if self
            .sessions
            .write()
            .insert(id, Arc::new(Mutex::new(session)))
            .is_some()
        {
            warn!(session = id, "replaced existing verification session");
        }
        Ok(())
    }

    /// Feed one inbound frame to its session. A desynchronized session is
    /// dropped from the table.
    pub fn dispatch<H: SessionHost>(
        &self,
        id: SessionId,
        data: &[u8],
        host: &mut H,
    ) -> Result<(), SessionError> {
        let session = self.session(id)?;
        let result = session.lock().on_data(host, data);
        if let Err(SessionError::Desync(_)) = result {
            self.close_session(id);
        }
        result
    }

    pub fn tick<H: SessionHost>(
        &self,
        id: SessionId,
        elapsed: Duration,
        host: &mut H,
    ) -> Result<(), SessionError> {
        let session = self.session(id)?;
        let result = session.lock().tick(host, elapsed);
        result
    }

    /// Tick every open session. Errors are logged and returned per session;
    /// one failing session does not stop the others.
    pub fn tick_all<H: SessionHost>(&self, elapsed: Duration, host: &mut H) -> Vec<(SessionId, SessionError)> {
        let snapshot: Vec<(SessionId, SharedSession<M>)> = self
            .sessions
            .read()
            .iter()
            .map(|(id, session)| (*id, Arc::clone(session)))
            .collect();

        let mut errors = Vec::new();
        for (id, session) in snapshot {
            if let Err(e) = session.lock().tick(host, elapsed) {
                warn!(session = id, error = %e, "verification tick failed");
                errors.push((id, e));
            }
        }
        errors
    }

    /// Run `f` against a session, if open.
    pub fn with_session<R>(&self, id: SessionId, f: impl FnOnce(&mut Session<M>) -> R) -> Option<R> {
        let session = self.sessions.read().get(&id).cloned()?;
        let mut guard = session.lock();
        Some(f(&mut guard))
    }

    /// Forget a session, e.g. on disconnect.
    pub fn close_session(&self, id: SessionId) -> bool {
        let removed = self.sessions.write().remove(&id).is_some();
        if removed {
            debug!(session = id, "verification session closed");
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    fn session(&self, id: SessionId) -> Result<SharedSession<M>, SessionError> {
        self.sessions
            .read()
            .get(&id)
            .cloned()
            .ok_or(SessionError::UnknownSession(id))
    }
}

impl<M: ModuleProvider> std::fmt::Debug for Verifier<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("checks", &self.catalog.len())
            .field("sessions", &self.session_count())
            .finish()
    }
}
