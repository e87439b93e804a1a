//! Per-session verification protocol
//!
//! One [`Session`] per connected client, driven synchronously by the host:
//! inbound buffers through [`Session::on_data`], elapsed time through
//! [`Session::tick`]. Nothing here blocks or spawns.
//!
//! ```text
//! Unbound -> ModuleRequested -> (ModuleTransferring) -> ModuleUseRequested
//!         -> HashRequested -> Idle <-> AwaitingResponse
//! any non-Unbound state -> Kicked | Banned
//! ```

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use thiserror::Error;
use tracing::{debug, info, warn};
use warden_core::crypto::checksum::verify_response_checksum;
use warden_core::error::WireError;
use warden_core::wire::{self, ClientOpcode, FrameReader, ServerOpcode, HASH_LEN};
use warden_core::{Expander, KeystreamCipher, SessionKey};

use crate::catalog::{Catalog, CheckId, CheckKind, PenaltyAction, MPQ_DIGEST_LEN};
use crate::config::VerifierConfig;
use crate::host::{SessionHost, SessionId};
use crate::module::{self, ModuleProvider};
use crate::penalty::PenaltyExecutor;
use crate::scheduler::{self, CategoryScheduler, ScheduleError};

/// Protocol state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unbound,
    /// Module-use frame sent, waiting to hear whether the client has it.
    ModuleRequested,
    ModuleTransferring,
    /// Client has the module; waiting for it to report it loaded.
    ModuleUseRequested,
    HashRequested,
    Idle,
    AwaitingResponse,
    Kicked,
    Banned,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Kicked | Self::Banned)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// Inbound stream no longer parses. The session has been kicked and
    /// must be torn down.
    #[error("protocol desync: {0}")]
    Desync(#[from] WireError),

    #[error("check request could not be built: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("operation not valid in state {0:?}")]
    InvalidState(SessionState),

    #[error("no session with id {0}")]
    UnknownSession(SessionId),
}

/// Checks sent in the last request, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBatch {
    pub ids: Vec<CheckId>,
    pub sent_at_millis: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Timing,
    Check(CheckId),
}

/// Verification state machine for one client session.
pub struct Session<M: ModuleProvider> {
    id: SessionId,
    state: SessionState,

    input_key: SessionKey,
    output_key: SessionKey,
    inbound: KeystreamCipher,
    outbound: KeystreamCipher,

    module: Arc<M>,
    module_id: [u8; wire::MODULE_ID_LEN],
    module_key: SessionKey,

    catalog: Arc<Catalog>,
    config: Arc<VerifierConfig>,
    scheduler: CategoryScheduler,
    penalties: PenaltyExecutor,
    rng: StdRng,

    initialized: bool,
    check_timer: Duration,
    response_timer: Duration,
    cycle_deferred: bool,
    pending: Option<PendingBatch>,
    last_failed_check: Option<CheckId>,
}

impl<M: ModuleProvider> Session<M> {
    /// Build a session from the secret negotiated upstream. Transport keys
    /// and the module id/key are expanded from it, in that order.
    pub fn new(
        id: SessionId,
        secret: &[u8],
        module: Arc<M>,
        catalog: Arc<Catalog>,
        config: Arc<VerifierConfig>,
        rng: StdRng,
    ) -> Self {
        let mut expander = Expander::new(secret);
        let input_key = SessionKey::new(expander.generate_array());
        let output_key = SessionKey::new(expander.generate_array());
        let module_id = expander.generate_array();
        let module_key = SessionKey::new(expander.generate_array());

        let inbound = KeystreamCipher::prepare(input_key.as_array());
        let outbound = KeystreamCipher::prepare(output_key.as_array());

        Self {
            id,
            state: SessionState::Unbound,
            input_key,
            output_key,
            inbound,
            outbound,
            module,
            module_id,
            module_key,
            scheduler: CategoryScheduler::new(&catalog),
            penalties: PenaltyExecutor::new(config.ban_duration),
            catalog,
            config,
            rng,
            initialized: false,
            check_timer: Duration::ZERO,
            response_timer: Duration::ZERO,
            cycle_deferred: false,
            pending: None,
            last_failed_check: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True once the client passed the hash handshake.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_awaiting_response(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_batch(&self) -> Option<&PendingBatch> {
        self.pending.as_ref()
    }

    pub fn last_failed_check(&self) -> Option<CheckId> {
        self.last_failed_check
    }

    pub fn module_id(&self) -> &[u8; wire::MODULE_ID_LEN] {
        &self.module_id
    }

    /// Ask for a check cycle on the next idle tick instead of waiting out
    /// the holdoff.
    pub fn request_cycle(&mut self) {
        self.cycle_deferred = true;
    }

    /// Issue the module to the client.
    pub fn start<H: SessionHost>(&mut self, host: &mut H) -> Result<(), SessionError> {
        if self.state != SessionState::Unbound {
            return Err(SessionError::InvalidState(self.state));
        }

        let bytes = self.module.bytes();
        info!(
            session = self.id,
            module_size = bytes.len(),
            fingerprint = %module::fingerprint(bytes, &self.module_id),
            "issuing verification module"
        );

        let frame = wire::module_use_frame(&self.module_id, self.module_key.as_array(), bytes.len() as u32);
        self.send(host, ServerOpcode::ModuleUse, frame);
        self.state = SessionState::ModuleRequested;
        Ok(())
    }

    /// Decrypt and handle one inbound frame. Frames must be fed in arrival
    /// order.
    pub fn on_data<H: SessionHost>(&mut self, host: &mut H, data: &[u8]) -> Result<(), SessionError> {
        if self.state.is_terminal() {
            debug!(session = self.id, state = ?self.state, "dropping data for closed session");
            return Ok(());
        }
        if data.is_empty() {
            return self.desync(host, WireError::Empty);
        }

        let mut plain = data.to_vec();
        self.inbound.process(&mut plain);

        let opcode = match ClientOpcode::try_from(plain[0]) {
            Ok(opcode) => opcode,
            Err(raw) => {
                warn!(session = self.id, opcode = raw, "unknown verification opcode ignored");
                return Ok(());
            }
        };

        match self.dispatch(host, opcode, &plain[1..]) {
            Ok(()) => Ok(()),
            Err(e) => self.desync(host, e),
        }
    }

    /// Advance timers by `elapsed`.
    pub fn tick<H: SessionHost>(&mut self, host: &mut H, elapsed: Duration) -> Result<(), SessionError> {
        if !self.initialized || !self.catalog.is_enabled() {
            return Ok(());
        }

        match self.state {
            SessionState::Idle => {
                if self.cycle_deferred || elapsed >= self.check_timer {
                    self.cycle_deferred = false;
                    self.request_checks(host)?;
                } else {
                    self.check_timer -= elapsed;
                }
            }
            SessionState::AwaitingResponse => {
                self.response_timer += elapsed;
                if self.exceeds_response_delay(self.response_timer) {
                    self.kick_unresponsive(host, self.response_timer);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn dispatch<H: SessionHost>(
        &mut self,
        host: &mut H,
        opcode: ClientOpcode,
        body: &[u8],
    ) -> Result<(), WireError> {
        use SessionState::*;

        match (opcode, self.state) {
            (ClientOpcode::ModuleMissing, ModuleRequested) => self.transfer_module(host),
            (ClientOpcode::ModuleOk, ModuleRequested | ModuleUseRequested) => self.request_hash(host),
            (ClientOpcode::ModuleFailed, ModuleRequested | ModuleTransferring | ModuleUseRequested) => {
                warn!(session = self.id, "client failed to load verification module");
                self.fail_handshake(host);
            }
            (ClientOpcode::HashResult, HashRequested) => self.handle_hash_result(host, body)?,
            (ClientOpcode::CheatChecksResult, AwaitingResponse) => self.handle_check_result(host, body)?,
            (opcode, state) => {
                warn!(session = self.id, ?opcode, ?state, "unexpected verification message ignored");
            }
        }
        Ok(())
    }

    fn send<H: SessionHost>(&mut self, host: &mut H, opcode: ServerOpcode, frame: Vec<u8>) {
        let frame = self.outbound.process_vec(frame);
        host.send_framed(self.id, opcode, frame);
    }

    fn transfer_module<H: SessionHost>(&mut self, host: &mut H) {
        self.state = SessionState::ModuleTransferring;

        let encrypted = KeystreamCipher::prepare(self.module_key.as_array())
            .process_vec(self.module.bytes().to_vec());
        let frames = wire::module_cache_frames(&encrypted);
        debug!(session = self.id, chunks = frames.len(), "streaming verification module");

        for frame in frames {
            self.send(host, ServerOpcode::ModuleCache, frame);
        }
        self.state = SessionState::ModuleUseRequested;
    }

    fn request_hash<H: SessionHost>(&mut self, host: &mut H) {
        let frame = wire::hash_request_frame(self.module.seed());
        self.send(host, ServerOpcode::HashRequest, frame);
        self.state = SessionState::HashRequested;
    }

    fn handle_hash_result<H: SessionHost>(&mut self, host: &mut H, body: &[u8]) -> Result<(), WireError> {
        if body.len() != HASH_LEN {
            return Err(WireError::BadSize {
                frame: "hash result",
                expected: HASH_LEN,
                actual: body.len(),
            });
        }

        if body != self.module.expected_seed_hash().as_slice() {
            warn!(session = self.id, "hash handshake failed");
            self.fail_handshake(host);
            return Ok(());
        }

        // Both directions switch to the module-bound key pair for good.
        self.input_key.replace(*self.module.client_key_seed());
        self.output_key.replace(*self.module.server_key_seed());
        self.inbound = KeystreamCipher::prepare(self.input_key.as_array());
        self.outbound = KeystreamCipher::prepare(self.output_key.as_array());

        self.initialized = true;
        self.state = SessionState::Idle;
        self.check_timer = self.config.holdoff();
        info!(session = self.id, "client passed verification handshake");
        Ok(())
    }

    fn fail_handshake<H: SessionHost>(&mut self, host: &mut H) {
        self.state = SessionState::Idle;
        self.penalize(host, self.config.default_action, None);
    }

    fn request_checks<H: SessionHost>(&mut self, host: &mut H) -> Result<(), SessionError> {
        let has_player = host.has_active_player(self.id);
        let ids = self
            .scheduler
            .next_batch(&self.catalog, &self.config, has_player, &mut self.rng);

        let frame = match scheduler::encode_request(&self.catalog, &ids, self.input_key.low_byte(), &mut self.rng) {
            Ok(frame) => frame,
            Err(e) => {
                self.check_timer = self.config.holdoff();
                return Err(e.into());
            }
        };

        let sent_at_millis = host.now_millis();
        debug!(
            session = self.id,
            checks = ids.len(),
            bytes = frame.len(),
            "sending check batch"
        );
        self.send(host, ServerOpcode::CheatChecksRequest, frame);

        self.pending = Some(PendingBatch { ids, sent_at_millis });
        self.response_timer = Duration::ZERO;
        self.state = SessionState::AwaitingResponse;
        Ok(())
    }

    fn exceeds_response_delay(&self, waited: Duration) -> bool {
        !self.config.max_response_delay.is_zero() && waited > self.config.max_response_delay
    }

    fn kick_unresponsive<H: SessionHost>(&mut self, host: &mut H, waited: Duration) {
        warn!(
            session = self.id,
            latency_ms = waited.as_millis() as u64,
            max_ms = self.config.max_response_delay.as_millis() as u64,
            "client not answering checks, kicking"
        );
        host.kick(self.id, "Anticheat: client not responding");
        self.pending = None;
        self.state = SessionState::Kicked;
    }

    fn handle_check_result<H: SessionHost>(&mut self, host: &mut H, body: &[u8]) -> Result<(), WireError> {
        let Some(batch) = self.pending.take() else {
            return Ok(());
        };

        // Ticks may lag behind a slow answer, so the host clock decides too.
        let since_sent = Duration::from_millis(u64::from(host.now_millis().wrapping_sub(batch.sent_at_millis)));
        let waited = self.response_timer.max(since_sent);
        if self.exceeds_response_delay(waited) {
            self.kick_unresponsive(host, waited);
            return Ok(());
        }

        let mut reader = FrameReader::new(body);
        let declared = reader.u16()? as usize;
        let checksum = reader.u32()?;
        let payload = reader.rest();
        if payload.len() != declared {
            return Err(WireError::LengthMismatch {
                declared,
                actual: payload.len(),
            });
        }

        if !verify_response_checksum(checksum, payload) {
            warn!(session = self.id, "check response checksum mismatch");
            self.finish_cycle();
            self.penalize(host, self.config.default_action, None);
            return Ok(());
        }

        let failure = self.evaluate(host, &batch, payload)?;
        self.finish_cycle();

        // Only the last failure of the cycle is penalized.
        match failure {
            Some(Failure::Timing) => {
                self.penalize(host, self.config.default_action, None);
            }
            Some(Failure::Check(id)) => {
                let action = self
                    .catalog
                    .get(id)
                    .map_or(self.config.default_action, |c| c.action);
                self.penalize(host, action, Some(id));
            }
            None => debug!(session = self.id, checks = batch.ids.len(), "check batch passed"),
        }
        Ok(())
    }

    fn evaluate<H: SessionHost>(
        &mut self,
        host: &mut H,
        batch: &PendingBatch,
        payload: &[u8],
    ) -> Result<Option<Failure>, WireError> {
        let mut reader = FrameReader::new(payload);
        let mut failure = None;

        let timing = reader.u8()?;
        let client_ticks = reader.u32()?;
        let round_trip_ms = host.now_millis().wrapping_sub(batch.sent_at_millis);
        if timing == 0 {
            warn!(session = self.id, client_ticks, round_trip_ms, "timing check failed");
            failure = Some(Failure::Timing);
        } else {
            debug!(session = self.id, client_ticks, round_trip_ms, "timing check passed");
        }

        let catalog = Arc::clone(&self.catalog);
        for &id in &batch.ids {
            let Some(check) = catalog.get(id) else {
                continue;
            };

            let passed = match check.kind {
                CheckKind::Memory => {
                    if reader.u8()? != 0 {
                        debug!(session = self.id, check_id = id, "client could not read memory");
                        continue;
                    }
                    reader.take(check.length as usize)? == check.expected.as_slice()
                }
                CheckKind::PageScanA | CheckKind::PageScanB | CheckKind::Driver | CheckKind::Module => {
                    reader.take(1)? == check.expected.as_slice()
                }
                CheckKind::Mpq => {
                    if reader.u8()? != 0 {
                        debug!(session = self.id, check_id = id, "client could not open file");
                        continue;
                    }
                    reader.take(MPQ_DIGEST_LEN)? == check.expected.as_slice()
                }
                CheckKind::LuaEval => {
                    let result = reader.u8()?;
                    if result == 0 {
                        let len = reader.u8()?;
                        reader.take(len as usize)?;
                    }
                    // Lua replies are logged only and never enforced.
                    debug!(session = self.id, check_id = id, result, "lua check answered");
                    continue;
                }
                CheckKind::Timing | CheckKind::Proc => continue,
            };

            if !passed {
                warn!(
                    session = self.id,
                    check_id = id,
                    kind = ?check.kind,
                    comment = %check.comment,
                    "check failed"
                );
                failure = Some(Failure::Check(id));
                self.last_failed_check = Some(id);
            }
        }

        if reader.remaining() > 0 {
            debug!(session = self.id, trailing = reader.remaining(), "ignoring trailing response bytes");
        }
        Ok(failure)
    }

    fn finish_cycle(&mut self) {
        self.pending = None;
        self.response_timer = Duration::ZERO;
        self.check_timer = self.config.holdoff();
        if !self.state.is_terminal() {
            self.state = SessionState::Idle;
        }
    }

    fn penalize<H: SessionHost>(&mut self, host: &mut H, action: PenaltyAction, check: Option<CheckId>) {
        let catalog = Arc::clone(&self.catalog);
        let check = check.and_then(|id| catalog.get(id));

        let enforced = self.penalties.apply(host, self.id, action, check);
        debug!(session = self.id, penalty = enforced.describe(), "penalty applied");
        match enforced {
            PenaltyAction::Log => {}
            PenaltyAction::Kick => self.state = SessionState::Kicked,
            PenaltyAction::Ban => self.state = SessionState::Banned,
        }
    }

    fn desync<H: SessionHost>(&mut self, host: &mut H, error: WireError) -> Result<(), SessionError> {
        warn!(session = self.id, error = %error, "verification stream desynchronized, dropping session");
        host.kick(self.id, "Anticheat: protocol error");
        self.pending = None;
        self.state = SessionState::Kicked;
        Err(SessionError::Desync(error))
    }
}

impl<M: ModuleProvider> std::fmt::Debug for Session<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("initialized", &self.initialized)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}
