//! In-memory ZooKeeper for testing.
//!
//! [`MockZooKeeper`] models the slice of ZooKeeper semantics the discovery
//! engine depends on: a shared znode tree, per-session ephemeral
//! ownership, zero-padded sequential names, one-shot data / children /
//! exists watches, and session expiry that drops ephemerals and delivers a
//! terminal connection-loss event.
//!
//! Multiple sessions connected to the same [`MockZooKeeper`] observe each
//! other's changes exactly as real cluster members would, which is what
//! lets the integration tests drive whole multi-node discovery scenarios
//! in-process, including coordinator failover via [`MockZooKeeper::expire_session`].
//!
//! # Usage
//!
//! This module is available when the `test-utilities` feature is enabled,
//! or during unit tests:
//!
//! ```toml
//! [dev-dependencies]
//! menagerie = { path = ".", features = ["test-utilities"] }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::zk::api::{
    CreateMode, SessionEvent, Stat, WatchEvent, WatchKind, ZkError, ZkResult, ZooKeeperApi,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Alive,
    Expired,
    Closed,
}

struct SessionEntry {
    tx: mpsc::UnboundedSender<SessionEvent>,
    state: SessionState,
}

#[derive(Debug)]
struct Znode {
    data: Bytes,
    version: i32,
    /// Counter for sequential children created under this znode.
    next_sequence: u64,
    /// Owning session for ephemerals.
    ephemeral_owner: Option<u64>,
}

impl Znode {
    fn new(data: Bytes, ephemeral_owner: Option<u64>) -> Self {
        Self {
            data,
            version: 0,
            next_sequence: 0,
            ephemeral_owner,
        }
    }
}

/// Watch tables, keyed by absolute path. Watches are one-shot and
/// session-bound, like the real thing.
#[derive(Default)]
struct Watches {
    data: HashMap<String, Vec<u64>>,
    children: HashMap<String, Vec<u64>>,
    exists: HashMap<String, Vec<u64>>,
}

struct Tree {
    nodes: BTreeMap<String, Znode>,
    watches: Watches,
    sessions: HashMap<u64, SessionEntry>,
}

impl Tree {
    fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            watches: Watches::default(),
            sessions: HashMap::new(),
        }
    }

    fn check_session(&self, id: u64) -> ZkResult<()> {
        match self.sessions.get(&id).map(|s| s.state) {
            Some(SessionState::Alive) => Ok(()),
            Some(SessionState::Expired) => Err(ZkError::SessionExpired),
            _ => Err(ZkError::ClientFailed),
        }
    }

    fn register(table: &mut HashMap<String, Vec<u64>>, path: &str, session: u64) {
        let entry = table.entry(path.to_string()).or_default();
        if !entry.contains(&session) {
            entry.push(session);
        }
    }

    /// Fire and clear one watch table entry.
    fn fire(&mut self, table: fn(&mut Watches) -> &mut HashMap<String, Vec<u64>>, path: &str, kind: WatchKind) {
        let Some(watchers) = table(&mut self.watches).remove(path) else {
            return;
        };
        for session in watchers {
            if let Some(entry) = self.sessions.get(&session)
                && entry.state == SessionState::Alive
            {
                let _ = entry.tx.send(SessionEvent::Watch(WatchEvent {
                    kind,
                    path: path.to_string(),
                }));
            }
        }
    }

    fn parent_of(path: &str) -> &str {
        match path.rfind('/') {
            Some(0) | None => "",
            Some(idx) => &path[..idx],
        }
    }

    fn validate_path(path: &str) -> ZkResult<()> {
        if !path.starts_with('/') || (path.len() > 1 && path.ends_with('/')) || path.contains("//") {
            return Err(ZkError::InvalidPath(path.to_string()));
        }
        Ok(())
    }

    fn child_names(&self, path: &str) -> Vec<String> {
        let prefix = format!("{path}/");
        let mut names = Vec::new();
        for child in self.nodes.range(prefix.clone()..).map(|(p, _)| p) {
            let Some(rest) = child.strip_prefix(&prefix) else {
                break;
            };
            if !rest.contains('/') {
                names.push(rest.to_string());
            }
        }
        names
    }

    fn has_children(&self, path: &str) -> bool {
        !self.child_names(path).is_empty()
    }

    fn create(
        &mut self,
        session: u64,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> ZkResult<String> {
        self.check_session(session)?;
        Self::validate_path(path)?;

        let parent = Self::parent_of(path);
        if !parent.is_empty() && !self.nodes.contains_key(parent) {
            return Err(ZkError::NoNode(parent.to_string()));
        }

        let actual = if mode.is_sequential() {
            let seq = {
                let parent_node = self
                    .nodes
                    .get_mut(parent)
                    .ok_or_else(|| ZkError::NoNode(parent.to_string()))?;
                let seq = parent_node.next_sequence;
                parent_node.next_sequence += 1;
                seq
            };
            format!("{path}{seq:010}")
        } else {
            if self.nodes.contains_key(path) {
                return Err(ZkError::NodeExists(path.to_string()));
            }
            path.to_string()
        };

        let owner = mode.is_ephemeral().then_some(session);
        self.nodes
            .insert(actual.clone(), Znode::new(Bytes::copy_from_slice(data), owner));

        self.fire(|w| &mut w.exists, &actual, WatchKind::Created);
        if !parent.is_empty() {
            self.fire(|w| &mut w.children, parent, WatchKind::ChildrenChanged);
        }

        Ok(actual)
    }

    fn get_data(&mut self, session: u64, path: &str, watch: bool) -> ZkResult<Bytes> {
        self.check_session(session)?;
        let node = self
            .nodes
            .get(path)
            .ok_or_else(|| ZkError::NoNode(path.to_string()))?;
        let data = node.data.clone();
        if watch {
            Self::register(&mut self.watches.data, path, session);
        }
        Ok(data)
    }

    fn set_data(&mut self, session: u64, path: &str, data: &[u8], version: i32) -> ZkResult<()> {
        self.check_session(session)?;
        let node = self
            .nodes
            .get_mut(path)
            .ok_or_else(|| ZkError::NoNode(path.to_string()))?;
        if version != -1 && version != node.version {
            return Err(ZkError::BadVersion(path.to_string()));
        }
        node.data = Bytes::copy_from_slice(data);
        node.version += 1;
        self.fire(|w| &mut w.data, path, WatchKind::DataChanged);
        Ok(())
    }

    fn get_children(&mut self, session: u64, path: &str, watch: bool) -> ZkResult<Vec<String>> {
        self.check_session(session)?;
        if !self.nodes.contains_key(path) {
            return Err(ZkError::NoNode(path.to_string()));
        }
        if watch {
            Self::register(&mut self.watches.children, path, session);
        }
        Ok(self.child_names(path))
    }

    fn exists(&mut self, session: u64, path: &str, watch: bool) -> ZkResult<Option<Stat>> {
        self.check_session(session)?;
        if watch {
            Self::register(&mut self.watches.exists, path, session);
        }
        Ok(self.nodes.get(path).map(|n| Stat {
            version: n.version,
            ephemeral: n.ephemeral_owner.is_some(),
        }))
    }

    fn delete(&mut self, session: u64, path: &str, version: i32) -> ZkResult<()> {
        self.check_session(session)?;
        let node = self
            .nodes
            .get(path)
            .ok_or_else(|| ZkError::NoNode(path.to_string()))?;
        if version != -1 && version != node.version {
            return Err(ZkError::BadVersion(path.to_string()));
        }
        if self.has_children(path) {
            return Err(ZkError::NotEmpty(path.to_string()));
        }
        self.remove_node(path);
        Ok(())
    }

    /// Remove an existing znode and fire the affected watches.
    fn remove_node(&mut self, path: &str) {
        self.nodes.remove(path);
        self.fire(|w| &mut w.data, path, WatchKind::Deleted);
        self.fire(|w| &mut w.exists, path, WatchKind::Deleted);
        self.fire(|w| &mut w.children, path, WatchKind::Deleted);
        let parent = Self::parent_of(path);
        if !parent.is_empty() {
            self.fire(|w| &mut w.children, parent, WatchKind::ChildrenChanged);
        }
    }

    /// Kill a session: drop its ephemerals (firing watches) and optionally
    /// deliver the terminal connection-loss event.
    fn end_session(&mut self, session: u64, state: SessionState) {
        let Some(entry) = self.sessions.get_mut(&session) else {
            return;
        };
        if entry.state != SessionState::Alive {
            return;
        }
        entry.state = state;

        let ephemerals: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.ephemeral_owner == Some(session))
            .map(|(p, _)| p.clone())
            .collect();
        for path in ephemerals {
            debug!(path = %path, session, "dropping ephemeral znode");
            self.remove_node(&path);
        }

        if state == SessionState::Expired
            && let Some(entry) = self.sessions.get(&session)
        {
            let _ = entry.tx.send(SessionEvent::ConnectionLost);
        }
    }
}

/// Shared in-memory ZooKeeper ensemble.
///
/// Create one per test and [`connect`](MockZooKeeper::connect) a session
/// per simulated process.
#[derive(Clone)]
pub struct MockZooKeeper {
    tree: Arc<Mutex<Tree>>,
    next_session: Arc<AtomicU64>,
}

impl Default for MockZooKeeper {
    fn default() -> Self {
        Self::new()
    }
}

impl MockZooKeeper {
    /// Create an empty ensemble.
    pub fn new() -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::new())),
            next_session: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Open a new session.
    pub fn connect(&self) -> MockZkSession {
        let id = self.next_session.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.tree
            .lock()
            .expect("zk tree lock")
            .sessions
            .insert(id, SessionEntry {
                tx,
                state: SessionState::Alive,
            });
        MockZkSession {
            tree: Arc::clone(&self.tree),
            id,
            events: Mutex::new(Some(rx)),
        }
    }

    /// Expire one session: its ephemerals vanish, other sessions' watches
    /// fire, and the session receives a terminal connection-loss event.
    pub fn expire_session(&self, session_id: u64) {
        self.tree
            .lock()
            .expect("zk tree lock")
            .end_session(session_id, SessionState::Expired);
    }

    /// Expire every open session.
    pub fn expire_all_sessions(&self) {
        let mut tree = self.tree.lock().expect("zk tree lock");
        let ids: Vec<u64> = tree.sessions.keys().copied().collect();
        for id in ids {
            tree.end_session(id, SessionState::Expired);
        }
    }

    /// Snapshot of all absolute znode paths, for assertions.
    pub fn paths(&self) -> Vec<String> {
        self.tree
            .lock()
            .expect("zk tree lock")
            .nodes
            .keys()
            .cloned()
            .collect()
    }

    /// Whether a znode currently exists, for assertions.
    pub fn has_path(&self, path: &str) -> bool {
        self.tree
            .lock()
            .expect("zk tree lock")
            .nodes
            .contains_key(path)
    }
}

/// One session against a [`MockZooKeeper`].
pub struct MockZkSession {
    tree: Arc<Mutex<Tree>>,
    id: u64,
    events: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
}

impl MockZkSession {
    /// The server-assigned session id, usable with
    /// [`MockZooKeeper::expire_session`].
    pub fn session_id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl ZooKeeperApi for MockZkSession {
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> ZkResult<String> {
        self.tree
            .lock()
            .expect("zk tree lock")
            .create(self.id, path, data, mode)
    }

    async fn get_data(&self, path: &str, watch: bool) -> ZkResult<Bytes> {
        self.tree
            .lock()
            .expect("zk tree lock")
            .get_data(self.id, path, watch)
    }

    async fn set_data(&self, path: &str, data: &[u8], version: i32) -> ZkResult<()> {
        self.tree
            .lock()
            .expect("zk tree lock")
            .set_data(self.id, path, data, version)
    }

    async fn get_children(&self, path: &str, watch: bool) -> ZkResult<Vec<String>> {
        self.tree
            .lock()
            .expect("zk tree lock")
            .get_children(self.id, path, watch)
    }

    async fn exists(&self, path: &str, watch: bool) -> ZkResult<Option<Stat>> {
        self.tree
            .lock()
            .expect("zk tree lock")
            .exists(self.id, path, watch)
    }

    async fn delete(&self, path: &str, version: i32) -> ZkResult<()> {
        self.tree
            .lock()
            .expect("zk tree lock")
            .delete(self.id, path, version)
    }

    fn take_session_events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events.lock().expect("events lock").take()
    }

    async fn close(&self) {
        self.tree
            .lock()
            .expect("zk tree lock")
            .end_session(self.id, SessionState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(zk: &MockZooKeeper) -> MockZkSession {
        zk.connect()
    }

    #[tokio::test]
    async fn test_create_and_read_back() {
        let zk = MockZooKeeper::new();
        let s = session(&zk);

        s.create("/a", b"hello", CreateMode::Persistent).await.unwrap();
        assert_eq!(&s.get_data("/a", false).await.unwrap()[..], b"hello");
    }

    #[tokio::test]
    async fn test_create_requires_parent() {
        let zk = MockZooKeeper::new();
        let s = session(&zk);

        let err = s
            .create("/missing/child", b"", CreateMode::Persistent)
            .await
            .unwrap_err();
        assert_eq!(err, ZkError::NoNode("/missing".into()));
    }

    #[tokio::test]
    async fn test_sequential_names_are_padded_and_monotonic() {
        let zk = MockZooKeeper::new();
        let s = session(&zk);

        s.create("/q", b"", CreateMode::Persistent).await.unwrap();
        let a = s
            .create("/q/n|", b"", CreateMode::PersistentSequential)
            .await
            .unwrap();
        let b = s
            .create("/q/n|", b"", CreateMode::PersistentSequential)
            .await
            .unwrap();

        assert_eq!(a, "/q/n|0000000000");
        assert_eq!(b, "/q/n|0000000001");
    }

    #[tokio::test]
    async fn test_sequence_counter_is_per_parent() {
        let zk = MockZooKeeper::new();
        let s = session(&zk);

        s.create("/p1", b"", CreateMode::Persistent).await.unwrap();
        s.create("/p2", b"", CreateMode::Persistent).await.unwrap();
        let a = s
            .create("/p1/x|", b"", CreateMode::PersistentSequential)
            .await
            .unwrap();
        let b = s
            .create("/p2/x|", b"", CreateMode::PersistentSequential)
            .await
            .unwrap();

        assert_eq!(a, "/p1/x|0000000000");
        assert_eq!(b, "/p2/x|0000000000");
    }

    #[tokio::test]
    async fn test_get_children_returns_names_only() {
        let zk = MockZooKeeper::new();
        let s = session(&zk);

        s.create("/p", b"", CreateMode::Persistent).await.unwrap();
        s.create("/p/b", b"", CreateMode::Persistent).await.unwrap();
        s.create("/p/a", b"", CreateMode::Persistent).await.unwrap();
        s.create("/p/a/nested", b"", CreateMode::Persistent)
            .await
            .unwrap();

        let children = s.get_children("/p", false).await.unwrap();
        assert_eq!(children, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_set_data_checks_version() {
        let zk = MockZooKeeper::new();
        let s = session(&zk);

        s.create("/a", b"v0", CreateMode::Persistent).await.unwrap();
        s.set_data("/a", b"v1", 0).await.unwrap();
        let err = s.set_data("/a", b"v2", 0).await.unwrap_err();
        assert_eq!(err, ZkError::BadVersion("/a".into()));
        s.set_data("/a", b"v2", -1).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_refuses_non_empty() {
        let zk = MockZooKeeper::new();
        let s = session(&zk);

        s.create("/p", b"", CreateMode::Persistent).await.unwrap();
        s.create("/p/c", b"", CreateMode::Persistent).await.unwrap();

        let err = s.delete("/p", -1).await.unwrap_err();
        assert_eq!(err, ZkError::NotEmpty("/p".into()));
    }

    #[tokio::test]
    async fn test_data_watch_fires_once_on_change() {
        let zk = MockZooKeeper::new();
        let s1 = session(&zk);
        let s2 = session(&zk);
        let mut events = s2.take_session_events().unwrap();

        s1.create("/a", b"", CreateMode::Persistent).await.unwrap();
        s2.get_data("/a", true).await.unwrap();

        s1.set_data("/a", b"x", -1).await.unwrap();
        s1.set_data("/a", b"y", -1).await.unwrap();

        let evt = events.recv().await.unwrap();
        assert_eq!(
            evt,
            SessionEvent::Watch(WatchEvent {
                kind: WatchKind::DataChanged,
                path: "/a".into()
            })
        );
        // One-shot: the second set_data produced nothing.
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_children_watch_fires_on_create_and_delete() {
        let zk = MockZooKeeper::new();
        let s1 = session(&zk);
        let s2 = session(&zk);
        let mut events = s2.take_session_events().unwrap();

        s1.create("/p", b"", CreateMode::Persistent).await.unwrap();
        s2.get_children("/p", true).await.unwrap();
        s1.create("/p/c", b"", CreateMode::Persistent).await.unwrap();

        let evt = events.recv().await.unwrap();
        assert_eq!(
            evt,
            SessionEvent::Watch(WatchEvent {
                kind: WatchKind::ChildrenChanged,
                path: "/p".into()
            })
        );

        // Re-arm and observe the delete.
        s2.get_children("/p", true).await.unwrap();
        s1.delete("/p/c", -1).await.unwrap();
        let evt = events.recv().await.unwrap();
        assert_eq!(
            evt,
            SessionEvent::Watch(WatchEvent {
                kind: WatchKind::ChildrenChanged,
                path: "/p".into()
            })
        );
    }

    #[tokio::test]
    async fn test_exists_watch_fires_on_deletion() {
        let zk = MockZooKeeper::new();
        let s1 = session(&zk);
        let s2 = session(&zk);
        let mut events = s2.take_session_events().unwrap();

        s1.create("/a", b"", CreateMode::Persistent).await.unwrap();
        assert!(s2.exists("/a", true).await.unwrap().is_some());
        s1.delete("/a", -1).await.unwrap();

        let evt = events.recv().await.unwrap();
        assert_eq!(
            evt,
            SessionEvent::Watch(WatchEvent {
                kind: WatchKind::Deleted,
                path: "/a".into()
            })
        );
    }

    #[tokio::test]
    async fn test_expiry_drops_ephemerals_and_notifies() {
        let zk = MockZooKeeper::new();
        let s1 = session(&zk);
        let s2 = session(&zk);
        let mut events1 = s1.take_session_events().unwrap();
        let mut events2 = s2.take_session_events().unwrap();

        s1.create("/p", b"", CreateMode::Persistent).await.unwrap();
        let eph = s1
            .create("/p/e|", b"", CreateMode::EphemeralSequential)
            .await
            .unwrap();
        s2.exists(&eph, true).await.unwrap();

        zk.expire_session(s1.session_id());

        // The dead session hears exactly one terminal event.
        assert_eq!(events1.recv().await.unwrap(), SessionEvent::ConnectionLost);
        // The survivor's exists-watch observed the ephemeral vanishing.
        assert_eq!(
            events2.recv().await.unwrap(),
            SessionEvent::Watch(WatchEvent {
                kind: WatchKind::Deleted,
                path: eph.clone()
            })
        );
        assert!(!zk.has_path(&eph));

        // Operations on the dead session now fail.
        let err = s1.get_data("/p", false).await.unwrap_err();
        assert_eq!(err, ZkError::SessionExpired);
    }

    #[tokio::test]
    async fn test_close_is_silent_for_own_session() {
        let zk = MockZooKeeper::new();
        let s1 = session(&zk);
        let mut events1 = s1.take_session_events().unwrap();

        s1.create("/p", b"", CreateMode::Persistent).await.unwrap();
        s1.create("/p/e", b"", CreateMode::Ephemeral).await.unwrap();
        s1.close().await;

        assert!(!zk.has_path("/p/e"));
        assert!(events1.try_recv().is_err());
    }
}
