#![allow(dead_code)]

use async_trait::async_trait;
use mapwarden_controller::gateway::GatewayResult;
use mapwarden_controller::helpers::ManualClock;
use mapwarden_controller::{
    GatewayError, LiveServer, MapCatalog, MemoryPointerStore, PointerStore, RotationEngine,
    RotationSettings,
};
use mapwarden_db::{Database, PlayerStats};
use std::sync::{Arc, Mutex};

pub const NOW: i64 = 1700000000;

/// Every map the fake server can run.
pub const SERVER_MAPS: [&str; 10] = [
    "stmereeglise_warfare",
    "stmariedumont_warfare",
    "foy_warfare",
    "kursk_warfare",
    "carentan_warfare",
    "driel_warfare",
    "hill400_warfare",
    "remagen_warfare",
    "tobruk_warfare",
    "mortain_warfare",
];

#[derive(Debug, Default)]
struct ServerState {
    queue: Vec<String>,
    next: Option<String>,
    players: usize,
    maps: Vec<String>,
    fail_reads: bool,
    fail_writes: bool,
    writes: usize,
}

/// In-memory game server. The current map is the head of the queue.
#[derive(Debug, Default)]
pub struct FakeServer {
    state: Mutex<ServerState>,
}

impl FakeServer {
    pub fn new(queue: &[&str], players: usize) -> Self {
        Self {
            state: Mutex::new(ServerState {
                queue: queue.iter().map(|m| m.to_string()).collect(),
                players,
                maps: SERVER_MAPS.iter().map(|m| m.to_string()).collect(),
                ..ServerState::default()
            }),
        }
    }

    pub fn with_maps(self, maps: &[&str]) -> Self {
        self.state.lock().unwrap().maps = maps.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn with_next_map(self, next: &str) -> Self {
        self.state.lock().unwrap().next = Some(next.to_string());
        self
    }

    pub fn queue(&self) -> Vec<String> {
        self.state.lock().unwrap().queue.clone()
    }

    pub fn set_queue(&self, queue: &[&str]) {
        self.state.lock().unwrap().queue = queue.iter().map(|m| m.to_string()).collect();
    }

    pub fn set_players(&self, players: usize) {
        self.state.lock().unwrap().players = players;
    }

    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }

    fn read<T>(&self, f: impl FnOnce(&ServerState) -> T) -> GatewayResult<T> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(GatewayError::Unavailable("connection refused".to_string()));
        }
        Ok(f(&state))
    }
}

#[async_trait]
impl LiveServer for FakeServer {
    async fn current_map(&self) -> GatewayResult<String> {
        self.read(|s| s.queue.first().cloned())?
            .ok_or_else(|| GatewayError::Rejected("empty rotation".to_string()))
    }

    async fn rotation_queue(&self) -> GatewayResult<Vec<String>> {
        self.read(|s| s.queue.clone())
    }

    async fn next_map(&self) -> GatewayResult<Option<String>> {
        self.read(|s| s.next.clone())
    }

    async fn player_count(&self) -> GatewayResult<usize> {
        self.read(|s| s.players)
    }

    async fn set_rotation_queue(&self, layer_ids: &[String]) -> GatewayResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(GatewayError::Rejected("rotation is locked".to_string()));
        }
        state.queue = layer_ids.to_vec();
        state.writes += 1;
        Ok(())
    }

    async fn list_maps(&self) -> GatewayResult<Vec<String>> {
        self.read(|s| s.maps.clone())
    }
}

/// Everything an engine test needs to poke at.
pub struct Harness {
    pub server: Arc<FakeServer>,
    pub db: Database,
    pub pointers: Arc<MemoryPointerStore>,
    pub clock: Arc<ManualClock>,
    pub engine: Arc<RotationEngine>,
}

pub async fn setup_test_db() -> Database {
    Database::open_in_memory()
        .await
        .expect("Failed to create in-memory database")
}

pub async fn harness(server: FakeServer) -> Harness {
    let server = Arc::new(server);
    let db = setup_test_db().await;
    let pointers = Arc::new(MemoryPointerStore::new());
    let clock = Arc::new(ManualClock::new(NOW));

    let gateway: Arc<dyn LiveServer> = server.clone();
    let pointer_store: Arc<dyn PointerStore> = pointers.clone();
    let engine = RotationEngine::new(
        gateway,
        Arc::new(db.clone()),
        pointer_store,
        MapCatalog::new(),
        RotationSettings::default(),
    )
    .with_clock(clock.clone());

    Harness {
        server,
        db,
        pointers,
        clock,
        engine: Arc::new(engine),
    }
}

/// Records finished matches, oldest first, each with `players` stats entries.
pub async fn seed_history(db: &Database, matches: &[(&str, usize)]) {
    for (i, (map, players)) in matches.iter().enumerate() {
        let start = NOW - 3600 * (matches.len() - i) as i64;
        let record = db
            .record_match_start(map.to_string(), false, start)
            .await
            .expect("Failed to record match start");
        db.save_player_stats(record.id, &stats_for(*players))
            .await
            .expect("Failed to save player stats");
    }
}

pub fn stats_for(players: usize) -> PlayerStats {
    (0..players)
        .map(|i| (format!("player{i}"), serde_json::json!({ "kills": i })))
        .collect()
}
