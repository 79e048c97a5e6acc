//! Per-user transient state: day overrides and unit (merge) sessions.
//!
//! Nothing here is persisted; a restart forgets every override and session.

use std::{
    collections::HashMap,
    path::PathBuf,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::UserId;

/// Number of TXT files a unit session waits for.
pub const UNIT_FILES: usize = 2;

/// Pending two-file merge for one user.
#[derive(Clone, Debug)]
pub struct UnitSession {
    pub day: i64,
    pub files: Vec<PathBuf>,
    pub started_at: Instant,
    /// Slots handed out whose file has not been pushed or released yet.
    in_flight: usize,
    /// Last slot number handed out. Never reused within a session.
    last_slot: usize,
}

/// Result of asking for a place to download the next unit file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitSlot {
    NoSession,
    /// Stored plus in-flight files already fill the session.
    Full,
    /// 1-based slot number, unique within the session.
    Slot(usize),
}

impl UnitSession {
    pub fn new(day: i64, now: Instant) -> Self {
        Self {
            day,
            files: Vec::with_capacity(UNIT_FILES),
            started_at: now,
            in_flight: 0,
            last_slot: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.files.len() >= UNIT_FILES
    }

    fn reserve(&mut self) -> UnitSlot {
        if self.files.len() + self.in_flight >= UNIT_FILES {
            return UnitSlot::Full;
        }
        self.in_flight += 1;
        self.last_slot += 1;
        UnitSlot::Slot(self.last_slot)
    }

    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.started_at) >= ttl
    }
}

/// Storage port for per-user state.
///
/// Every method is atomic with respect to the others.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn day_override(&self, user: UserId) -> Option<i64>;
    async fn set_day_override(&self, user: UserId, day: i64);

    /// Open a fresh unit session. Returns the session it replaced, if any.
    async fn open_unit(&self, user: UserId, day: i64) -> Option<UnitSession>;
    /// Current, non-expired unit session.
    async fn unit(&self, user: UserId) -> Option<UnitSession>;
    /// Reserve a download slot in the user's live session.
    async fn reserve_unit_slot(&self, user: UserId) -> UnitSlot;
    /// Give back a slot whose download never completed.
    async fn release_unit_slot(&self, user: UserId);
    /// Record an uploaded file, consuming a reserved slot. Returns the updated
    /// session, or `None` when no live session is open.
    async fn push_unit_file(&self, user: UserId, file: PathBuf) -> Option<UnitSession>;
    /// Remove and return the user's session.
    async fn close_unit(&self, user: UserId) -> Option<UnitSession>;
    /// Remove and return every expired session so the caller can clean up files.
    async fn sweep_expired(&self) -> Vec<(UserId, UnitSession)>;
}

#[derive(Debug, Default)]
struct StoreState {
    day_overrides: HashMap<UserId, i64>,
    units: HashMap<UserId, UnitSession>,
}

/// Process-local `SessionStore`.
#[derive(Debug)]
pub struct InMemorySessionStore {
    unit_ttl: Duration,
    state: Mutex<StoreState>,
}

impl InMemorySessionStore {
    pub fn new(unit_ttl: Duration) -> Self {
        Self {
            unit_ttl,
            state: Mutex::new(StoreState::default()),
        }
    }

    async fn sweep_expired_at(&self, now: Instant) -> Vec<(UserId, UnitSession)> {
        let mut st = self.state.lock().await;
        let expired: Vec<UserId> = st
            .units
            .iter()
            .filter(|(_, s)| s.is_expired(self.unit_ttl, now))
            .map(|(u, _)| *u)
            .collect();
        expired
            .into_iter()
            .filter_map(|u| st.units.remove(&u).map(|s| (u, s)))
            .collect()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn day_override(&self, user: UserId) -> Option<i64> {
        self.state.lock().await.day_overrides.get(&user).copied()
    }

    async fn set_day_override(&self, user: UserId, day: i64) {
        self.state.lock().await.day_overrides.insert(user, day);
    }

    async fn open_unit(&self, user: UserId, day: i64) -> Option<UnitSession> {
        self.state
            .lock()
            .await
            .units
            .insert(user, UnitSession::new(day, Instant::now()))
    }

    async fn unit(&self, user: UserId) -> Option<UnitSession> {
        let st = self.state.lock().await;
        st.units
            .get(&user)
            .filter(|s| !s.is_expired(self.unit_ttl, Instant::now()))
            .cloned()
    }

    async fn reserve_unit_slot(&self, user: UserId) -> UnitSlot {
        let mut st = self.state.lock().await;
        match st.units.get_mut(&user) {
            Some(s) if !s.is_expired(self.unit_ttl, Instant::now()) => s.reserve(),
            _ => UnitSlot::NoSession,
        }
    }

    async fn release_unit_slot(&self, user: UserId) {
        if let Some(s) = self.state.lock().await.units.get_mut(&user) {
            s.in_flight = s.in_flight.saturating_sub(1);
        }
    }

    async fn push_unit_file(&self, user: UserId, file: PathBuf) -> Option<UnitSession> {
        let mut st = self.state.lock().await;
        let session = st
            .units
            .get_mut(&user)
            .filter(|s| !s.is_expired(self.unit_ttl, Instant::now()))?;
        session.in_flight = session.in_flight.saturating_sub(1);
        session.files.push(file);
        Some(session.clone())
    }

    async fn close_unit(&self, user: UserId) -> Option<UnitSession> {
        self.state.lock().await.units.remove(&user)
    }

    async fn sweep_expired(&self) -> Vec<(UserId, UnitSession)> {
        self.sweep_expired_at(Instant::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn day_overrides_are_per_user() {
        let store = InMemorySessionStore::new(HOUR);
        assert_eq!(store.day_override(UserId(1)).await, None);

        store.set_day_override(UserId(1), 99).await;
        store.set_day_override(UserId(1), 100).await;

        assert_eq!(store.day_override(UserId(1)).await, Some(100));
        assert_eq!(store.day_override(UserId(2)).await, None);
    }

    #[tokio::test]
    async fn unit_lifecycle() {
        let store = InMemorySessionStore::new(HOUR);
        let u = UserId(7);

        assert!(store.push_unit_file(u, "a".into()).await.is_none());
        assert!(store.open_unit(u, 42).await.is_none());

        let s = store.push_unit_file(u, "a".into()).await.unwrap();
        assert_eq!(s.day, 42);
        assert!(!s.is_complete());

        let s = store.push_unit_file(u, "b".into()).await.unwrap();
        assert!(s.is_complete());

        let closed = store.close_unit(u).await.unwrap();
        assert_eq!(closed.files, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert!(store.unit(u).await.is_none());
    }

    #[tokio::test]
    async fn reopening_returns_previous_session() {
        let store = InMemorySessionStore::new(HOUR);
        let u = UserId(1);
        store.open_unit(u, 1).await;
        store.push_unit_file(u, "old.txt".into()).await;

        let prev = store.open_unit(u, 2).await.unwrap();
        assert_eq!(prev.files, vec![PathBuf::from("old.txt")]);
        assert_eq!(store.unit(u).await.unwrap().day, 2);
        assert!(store.unit(u).await.unwrap().files.is_empty());
    }

    #[tokio::test]
    async fn expired_sessions_are_hidden_and_swept() {
        let store = InMemorySessionStore::new(Duration::from_millis(50));
        let u = UserId(3);
        store.open_unit(u, 5).await;
        store.push_unit_file(u, "x.txt".into()).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(store.unit(u).await.is_none());

        let swept = store.sweep_expired().await;
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].0, u);
        assert_eq!(swept[0].1.files, vec![PathBuf::from("x.txt")]);
        assert!(store.close_unit(u).await.is_none());
    }

    #[tokio::test]
    async fn expired_session_rejects_new_files() {
        let store = InMemorySessionStore::new(Duration::ZERO);
        let u = UserId(4);
        store.open_unit(u, 5).await;

        assert_eq!(store.reserve_unit_slot(u).await, UnitSlot::NoSession);
        assert!(store.push_unit_file(u, "late.txt".into()).await.is_none());

        // The late file was not attached, so the sweep has nothing of it to delete.
        let swept = store.sweep_expired().await;
        assert!(swept[0].1.files.is_empty());
    }

    #[tokio::test]
    async fn slots_are_unique_and_bounded() {
        let store = InMemorySessionStore::new(HOUR);
        let u = UserId(9);
        assert_eq!(store.reserve_unit_slot(u).await, UnitSlot::NoSession);

        store.open_unit(u, 1).await;
        assert_eq!(store.reserve_unit_slot(u).await, UnitSlot::Slot(1));
        assert_eq!(store.reserve_unit_slot(u).await, UnitSlot::Slot(2));
        assert_eq!(store.reserve_unit_slot(u).await, UnitSlot::Full);

        // A failed download frees its place but not its number.
        store.release_unit_slot(u).await;
        assert_eq!(store.reserve_unit_slot(u).await, UnitSlot::Slot(3));

        store.push_unit_file(u, "a".into()).await;
        store.push_unit_file(u, "b".into()).await;
        assert_eq!(store.reserve_unit_slot(u).await, UnitSlot::Full);
    }

    #[tokio::test]
    async fn sweep_keeps_fresh_sessions() {
        let store = InMemorySessionStore::new(HOUR);
        store.open_unit(UserId(1), 1).await;
        let now = Instant::now();
        assert!(store.sweep_expired_at(now).await.is_empty());
        assert!(store.sweep_expired_at(now + HOUR).await.len() == 1);
    }
}
