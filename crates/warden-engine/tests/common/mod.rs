//! Shared fixtures: a recording host and a simulated game client.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use warden_core::crypto::checksum::response_checksum;
use warden_core::wire::{FrameReader, ServerOpcode, FOUND_MARKER};
use warden_core::{Expander, KeystreamCipher};
use warden_engine::catalog::{CatalogRow, CheckKind, SCAN_PATTERN_LEN};
use warden_engine::{AccountStore, Catalog, SessionId, StaticModule, Transport, Verifier, VerifierConfig};

pub const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef0123456789";
pub const MODULE_SEED: [u8; 16] = [0x4D; 16];
pub const SEED_HASH: [u8; 20] = [0x57; 20];
pub const CLIENT_KEY_SEED: [u8; 16] = [0xC1, 0x3E, 0x42, 0x07, 0x9A, 0x11, 0x5C, 0xD0, 0x2B, 0x86, 0x73, 0xEE, 0x10, 0x4F, 0x95, 0x68];
pub const SERVER_KEY_SEED: [u8; 16] = [0x7F, 0x29, 0xB4, 0x0D, 0x63, 0xA8, 0x1E, 0xC5, 0x58, 0x90, 0x3A, 0xF2, 0x6B, 0x04, 0xD7, 0x81];
pub const MODULE_SIZE: usize = 1200;

pub const HOLDOFF: Duration = Duration::from_secs(30);

/// Route engine logs to the test harness; set RUST_LOG to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_module() -> StaticModule {
    let bytes: Vec<u8> = (0..MODULE_SIZE).map(|i| (i * 7 % 251) as u8).collect();
    StaticModule::new(bytes, MODULE_SEED, SEED_HASH, CLIENT_KEY_SEED, SERVER_KEY_SEED)
}

pub fn memory_row(id: u16, address: u32, expected: &str) -> CatalogRow {
    CatalogRow {
        id,
        kind: CheckKind::Memory.type_byte(),
        address,
        length: (expected.len() / 2) as u8,
        result: Some(expected.into()),
        comment: Some(format!("memory check {id}")),
        ..Default::default()
    }
}

pub fn lua_row(id: u16, expr: &str) -> CatalogRow {
    CatalogRow {
        id,
        kind: CheckKind::LuaEval.type_byte(),
        text: Some(expr.into()),
        ..Default::default()
    }
}

pub fn mpq_row(id: u16, file: &str) -> CatalogRow {
    CatalogRow {
        id,
        kind: CheckKind::Mpq.type_byte(),
        text: Some(file.into()),
        result: Some("00".repeat(20)),
        ..Default::default()
    }
}

pub fn page_row(id: u16) -> CatalogRow {
    CatalogRow {
        id,
        kind: CheckKind::PageScanA.type_byte(),
        data: Some("5A".repeat(SCAN_PATTERN_LEN)),
        address: 0x0040_0000,
        length: 16,
        ..Default::default()
    }
}

pub fn verifier(rows: Vec<CatalogRow>, config: VerifierConfig) -> Verifier<StaticModule> {
    let catalog = Catalog::load(rows, &config);
    Verifier::new(catalog, config, test_module())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ban {
    pub account: String,
    pub duration: Duration,
    pub reason: String,
    pub banned_by: String,
}

/// Host that records everything the engine asks of it.
pub struct TestHost {
    pub frames: VecDeque<(SessionId, ServerOpcode, Vec<u8>)>,
    pub kicks: Vec<(SessionId, String)>,
    pub bans: Vec<Ban>,
    pub now: u32,
    pub player: bool,
    pub account: Option<String>,
}

impl TestHost {
    pub fn new() -> Self {
        Self {
            frames: VecDeque::new(),
            kicks: Vec::new(),
            bans: Vec::new(),
            now: 1_000,
            player: true,
            account: Some("PLAYER".into()),
        }
    }
}

impl Transport for TestHost {
    fn send_framed(&mut self, session: SessionId, opcode: ServerOpcode, frame: Vec<u8>) {
        self.frames.push_back((session, opcode, frame));
    }

    fn now_millis(&self) -> u32 {
        self.now
    }

    fn has_active_player(&self, _session: SessionId) -> bool {
        self.player
    }
}

impl AccountStore for TestHost {
    fn account_name(&self, _session: SessionId) -> Option<String> {
        self.account.clone()
    }

    fn kick(&mut self, session: SessionId, reason: &str) {
        self.kicks.push((session, reason.into()));
    }

    fn ban(&mut self, account: &str, duration: Duration, reason: &str, banned_by: &str) {
        self.bans.push(Ban {
            account: account.into(),
            duration,
            reason: reason.into(),
            banned_by: banned_by.into(),
        });
    }
}

/// One record of a decoded check request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Memory { address: u32, length: u8 },
    Page,
    Mpq(String),
    Lua(String),
    Driver(String),
    Module,
}

/// Plaintext check request as the client module sees it.
#[derive(Debug, Clone)]
pub struct Request {
    pub xor: u8,
    pub strings: Vec<String>,
    pub records: Vec<Record>,
}

/// Client side of the channel, mirroring the server's key schedule.
pub struct SimClient {
    pub id: SessionId,
    send: KeystreamCipher,
    recv: KeystreamCipher,
    pub module_id: [u8; 16],
    pub module_key: [u8; 16],
    pub memory: HashMap<u32, Vec<u8>>,
    pub timing_ok: bool,
    pub ticks: u32,
    /// Value returned by Lua checks; `None` reports an evaluation error.
    pub lua_value: Option<String>,
}

impl SimClient {
    pub fn new(id: SessionId, secret: &[u8]) -> Self {
        let mut expander = Expander::new(secret);
        let input_key: [u8; 16] = expander.generate_array();
        let output_key: [u8; 16] = expander.generate_array();
        let module_id = expander.generate_array();
        let module_key = expander.generate_array();

        Self {
            id,
            send: KeystreamCipher::prepare(&input_key),
            recv: KeystreamCipher::prepare(&output_key),
            module_id,
            module_key,
            memory: HashMap::new(),
            timing_ok: true,
            ticks: 123_456,
            lua_value: Some("ok".into()),
        }
    }

    /// Switch to the module-bound keys, as the client does after a
    /// successful hash reply.
    pub fn swap_keys(&mut self) {
        self.send = KeystreamCipher::prepare(&CLIENT_KEY_SEED);
        self.recv = KeystreamCipher::prepare(&SERVER_KEY_SEED);
    }

    /// Drain and decrypt every frame the host holds for this client.
    pub fn receive(&mut self, host: &mut TestHost) -> Vec<(ServerOpcode, Vec<u8>)> {
        let mut out = Vec::new();
        while let Some((session, opcode, frame)) = host.frames.pop_front() {
            assert_eq!(session, self.id, "frame routed to the wrong session");
            let plain = self.recv.process_vec(frame);
            assert_eq!(plain[0], opcode.as_u8(), "plaintext opcode mismatch");
            out.push((opcode, plain));
        }
        out
    }

    pub fn encrypt(&mut self, plain: Vec<u8>) -> Vec<u8> {
        self.send.process_vec(plain)
    }

    pub fn parse_request(frame: &[u8]) -> Request {
        let xor = *frame.last().expect("empty request");
        let mut reader = FrameReader::new(&frame[1..frame.len() - 1]);

        let mut strings = Vec::new();
        loop {
            let len = reader.u8().unwrap();
            if len == 0 {
                break;
            }
            strings.push(String::from_utf8(reader.take(len as usize).unwrap().to_vec()).unwrap());
        }
        assert_eq!(reader.u8().unwrap() ^ xor, CheckKind::Timing.type_byte());

        let string = |index: u8| strings[index as usize - 1].clone();
        let mut records = Vec::new();
        while reader.remaining() > 0 {
            let kind = CheckKind::try_from(reader.u8().unwrap() ^ xor).unwrap();
            let record = match kind {
                CheckKind::Memory => {
                    assert_eq!(reader.u8().unwrap(), 0);
                    let address = reader.u32().unwrap();
                    let length = reader.u8().unwrap();
                    Record::Memory { address, length }
                }
                CheckKind::PageScanA | CheckKind::PageScanB => {
                    reader.take(SCAN_PATTERN_LEN + 4 + 1).unwrap();
                    Record::Page
                }
                CheckKind::Mpq => Record::Mpq(string(reader.u8().unwrap())),
                CheckKind::LuaEval => Record::Lua(string(reader.u8().unwrap())),
                CheckKind::Driver => {
                    reader.take(SCAN_PATTERN_LEN).unwrap();
                    Record::Driver(string(reader.u8().unwrap()))
                }
                CheckKind::Module => {
                    reader.take(4 + 20).unwrap();
                    Record::Module
                }
                other => panic!("unexpected record kind {other:?}"),
            };
            records.push(record);
        }

        Request { xor, strings, records }
    }

    /// Reply payload an honest client with this memory image would send.
    pub fn answer(&self, request: &Request) -> Vec<u8> {
        let mut payload = vec![u8::from(self.timing_ok)];
        payload.extend_from_slice(&self.ticks.to_le_bytes());

        for record in &request.records {
            match record {
                Record::Memory { address, length } => match self.memory.get(address) {
                    Some(bytes) => {
                        payload.push(0);
                        payload.extend_from_slice(&bytes[..*length as usize]);
                    }
                    None => payload.push(1),
                },
                Record::Page | Record::Driver(_) | Record::Module => payload.push(FOUND_MARKER),
                Record::Mpq(_) => {
                    payload.push(0);
                    payload.extend_from_slice(&[0u8; 20]);
                }
                Record::Lua(_) => match &self.lua_value {
                    Some(value) => {
                        payload.push(0);
                        payload.push(value.len() as u8);
                        payload.extend_from_slice(value.as_bytes());
                    }
                    None => payload.push(1),
                },
            }
        }
        payload
    }

    /// Plaintext check-result frame around `payload`.
    pub fn result_frame(payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0x02];
        frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        frame.extend_from_slice(&response_checksum(payload).to_le_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    pub fn send(
        &mut self,
        verifier: &Verifier<StaticModule>,
        host: &mut TestHost,
        plain: Vec<u8>,
    ) -> Result<(), warden_engine::SessionError> {
        let data = self.encrypt(plain);
        verifier.dispatch(self.id, &data, host)
    }

    /// Run the handshake for a client that already has the module cached.
    pub fn connect(verifier: &Verifier<StaticModule>, host: &mut TestHost, id: SessionId) -> Self {
        init_tracing();
        verifier
            .open_session_with_rng(id, SECRET, StdRng::seed_from_u64(id), host)
            .unwrap();
        let mut client = Self::new(id, SECRET);

        let frames = client.receive(host);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, ServerOpcode::ModuleUse);
        assert_eq!(&frames[0].1[1..17], &client.module_id);

        client.send(verifier, host, vec![0x01]).unwrap();
        let frames = client.receive(host);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, ServerOpcode::HashRequest);
        assert_eq!(&frames[0].1[1..], &MODULE_SEED);

        let mut reply = vec![0x04];
        reply.extend_from_slice(&SEED_HASH);
        client.send(verifier, host, reply).unwrap();
        client.swap_keys();
        client
    }

    /// Wait out the holdoff and return the check request it triggers.
    pub fn next_request(&mut self, verifier: &Verifier<StaticModule>, host: &mut TestHost) -> Request {
        verifier.tick(self.id, HOLDOFF, host).unwrap();
        let frames = self.receive(host);
        assert_eq!(frames.len(), 1, "expected exactly one check request");
        assert_eq!(frames[0].0, ServerOpcode::CheatChecksRequest);
        Self::parse_request(&frames[0].1)
    }

    /// Answer `request` honestly.
    pub fn reply(
        &mut self,
        verifier: &Verifier<StaticModule>,
        host: &mut TestHost,
        request: &Request,
    ) -> Result<(), warden_engine::SessionError> {
        let payload = self.answer(request);
        self.send(verifier, host, Self::result_frame(&payload))
    }
}
