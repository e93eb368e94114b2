//! Recording fakes of the collaborators, for unit tests.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use nix::sys::signal::Signal;
use serde_json::Value;

use crate::channel::{Channel, ChannelError, ChannelId, IdentityCard};
use crate::config::{AgentConfig, AgentState};
use crate::console::{ConsoleError, Terminal, TerminalFactory};
use crate::events::Bus;
use crate::graph::ResourceGraph;
use crate::process::{ProcessControl, ProcessError};
use crate::resources::{Binary, Configuration, PortRange, Realm, Yuno};
use crate::store::MemoryStore;
use crate::supervisor::WorkerSupervisor;

/// Process collaborator that hands out fake pids and records every call.
pub struct FakeProcess {
    next_pid: AtomicU32,
    fail_spawn: AtomicBool,
    dead: Mutex<HashSet<u32>>,
    spawns: Mutex<Vec<(PathBuf, Vec<String>)>>,
    signals: Mutex<Vec<(u32, Signal)>>,
}

impl FakeProcess {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            fail_spawn: AtomicBool::new(false),
            dead: Mutex::new(HashSet::new()),
            spawns: Mutex::new(Vec::new()),
            signals: Mutex::new(Vec::new()),
        }
    }

    /// Makes every later spawn fail.
    pub fn fail_spawns(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::SeqCst);
    }

    /// Signals to `pid` report `NoSuchProcess` from now on.
    pub fn mark_dead(&self, pid: u32) {
        self.dead.lock().unwrap().insert(pid);
    }

    pub fn spawned(&self) -> Vec<(PathBuf, Vec<String>)> {
        self.spawns.lock().unwrap().clone()
    }

    pub fn signalled(&self) -> Vec<(u32, Signal)> {
        self.signals.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessControl for FakeProcess {
    async fn spawn(
        &self,
        exe: &Path,
        argv: &[String],
        _env: &BTreeMap<String, String>,
    ) -> Result<u32, ProcessError> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(ProcessError::SpawnFailed(format!("{}: refused", exe.display())));
        }
        self.spawns
            .lock()
            .unwrap()
            .push((exe.to_path_buf(), argv.to_vec()));
        Ok(self.next_pid.fetch_add(1, Ordering::SeqCst))
    }

    async fn signal(&self, pid: u32, signal: Signal) -> Result<(), ProcessError> {
        // let concurrent supervisor actions interleave here
        tokio::task::yield_now().await;
        self.signals.lock().unwrap().push((pid, signal));
        if self.dead.lock().unwrap().contains(&pid) {
            return Err(ProcessError::NoSuchProcess { pid });
        }
        Ok(())
    }
}

/// One message written to a [`FakeChannel`].
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Command(String, Value),
    Event(String, Value),
}

/// Channel that records outbound traffic.
pub struct FakeChannel {
    id: ChannelId,
    closed: AtomicBool,
    sent: Mutex<Vec<Sent>>,
}

impl FakeChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ChannelId::next(),
            closed: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Command(name, _) => Some(name),
                Sent::Event(..) => None,
            })
            .collect()
    }

    fn push(&self, msg: Sent) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed(self.id));
        }
        self.sent.lock().unwrap().push(msg);
        Ok(())
    }
}

#[async_trait]
impl Channel for FakeChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    async fn send_command(&self, name: &str, payload: Value) -> Result<(), ChannelError> {
        self.push(Sent::Command(name.to_string(), payload))
    }

    async fn send_event(&self, name: &str, payload: Value) -> Result<(), ChannelError> {
        self.push(Sent::Event(name.to_string(), payload))
    }
}

/// Terminal that records input and its closing.
#[derive(Default)]
pub struct FakeTerminal {
    input: Mutex<Vec<u8>>,
    closed: AtomicBool,
}

impl FakeTerminal {
    pub fn input(&self) -> Vec<u8> {
        self.input.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Terminal for FakeTerminal {
    async fn write(&self, data: &[u8]) -> Result<(), ConsoleError> {
        if self.is_closed() {
            return Err(ConsoleError::Closed);
        }
        self.input.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Factory handing out [`FakeTerminal`]s and remembering them by name.
#[derive(Default)]
pub struct FakeTerminals {
    opened: Mutex<Vec<(String, Arc<FakeTerminal>)>>,
}

impl FakeTerminals {
    pub fn get(&self, name: &str) -> Option<Arc<FakeTerminal>> {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t.clone())
    }
}

#[async_trait]
impl TerminalFactory for FakeTerminals {
    async fn open(
        &self,
        name: &str,
        _command: &str,
        _cols: u16,
        _rows: u16,
    ) -> Result<Arc<dyn Terminal>, ConsoleError> {
        let term = Arc::new(FakeTerminal::default());
        self.opened
            .lock()
            .unwrap()
            .push((name.to_string(), term.clone()));
        Ok(term)
    }
}

/// Supervisor wired to a memory store and a [`FakeProcess`].
pub struct Rig {
    pub graph: ResourceGraph,
    pub process: Arc<FakeProcess>,
    pub bus: Bus,
    pub state: Arc<AgentState>,
    pub supervisor: Arc<WorkerSupervisor>,
    pub realm: Realm,
    pub run_dir: tempfile::TempDir,
}

impl Rig {
    pub async fn new() -> Self {
        let run_dir = tempfile::tempdir().unwrap();
        let cfg = AgentConfig {
            run_dir: run_dir.path().to_path_buf(),
            ..AgentConfig::default()
        };
        let graph = ResourceGraph::new(Arc::new(MemoryStore::new()));
        let process = Arc::new(FakeProcess::new());
        let bus = Bus::new(256);
        let state = Arc::new(AgentState::new(Signal::SIGQUIT));
        let supervisor = Arc::new(WorkerSupervisor::new(
            graph.clone(),
            process.clone(),
            bus.clone(),
            Arc::new(cfg),
            state.clone(),
        ));
        let realm = graph
            .create(
                &Realm::new("me", "mail", "main", "prod")
                    .with_bind_ip("10.0.0.5")
                    .with_ports(vec![PortRange(9000, 9010)]),
            )
            .await
            .unwrap();
        Self {
            graph,
            process,
            bus,
            state,
            supervisor,
            realm,
            run_dir,
        }
    }

    /// Creates binary, configuration and yuno for `role.name` and links them.
    pub async fn yuno(&self, role: &str, name: &str) -> Yuno {
        let mut bin = Binary::new(role, "1.0");
        bin.binary = PathBuf::from(format!("/opt/{role}"));
        let bin = match self.graph.create(&bin).await {
            Ok(b) => b,
            Err(_) => self.graph.get_by_id(role).await.unwrap().unwrap(),
        };
        let cfg = Configuration::new(Configuration::id_for(role, name), "1", serde_json::json!({}));
        let cfg = self.graph.create(&cfg).await.unwrap();
        let yuno = self
            .graph
            .create(&Yuno::new(&self.realm.id, role, name, "1.0", "1"))
            .await
            .unwrap();
        self.graph.link(&self.realm, &yuno).await.unwrap();
        self.graph.link(&yuno, &bin).await.unwrap();
        self.graph.link(&yuno, &cfg).await.unwrap();
        yuno
    }

    pub async fn fetch(&self, yuno_id: &str) -> Yuno {
        self.graph.get_by_id(yuno_id).await.unwrap().unwrap()
    }

    /// Identity card matching the current record of `yuno_id`.
    pub async fn card(&self, yuno_id: &str) -> IdentityCard {
        let y = self.fetch(yuno_id).await;
        IdentityCard {
            yuno_id: y.id.clone(),
            pid: y.pid,
            watcher_pid: 0,
            yuno_role: y.yuno_role.clone(),
            yuno_name: y.yuno_name.clone(),
            yuno_release: y.yuno_release.clone(),
            realm_id: y.realm_id.clone(),
            playing: false,
        }
    }

    /// Runs `yuno_id` and completes its callback on a fresh channel.
    pub async fn start(&self, yuno_id: &str) -> Arc<FakeChannel> {
        self.supervisor.run(yuno_id).await.unwrap();
        let ch = FakeChannel::new();
        let card = self.card(yuno_id).await;
        self.supervisor.on_open(ch.clone(), card).await.unwrap();
        ch
    }
}
