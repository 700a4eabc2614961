//! Per-Session State Store
//!
//! Each session id owns its own [`TutorState`] behind its own async mutex.
//! A [`SessionLease`] holds that mutex for the duration of one turn, so turns
//! of the same session run one after another while different sessions never
//! touch each other's state.
//!
//! Once more than `max_cached` sessions are in memory, sessions that nobody
//! holds or waits on are dropped and reloaded from the repository on their
//! next checkout.

use crate::curriculum::Curriculum;
use crate::state::TutorState;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMappedMutexGuard, OwnedMutexGuard};
use tracing::{debug, info};

/// Durable storage for session states.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateRepository: Send + Sync {
    /// Loads the last saved state for a session, if any.
    async fn load_state(&self, session_id: &str) -> Result<Option<TutorState>>;

    /// Saves the state for a session, replacing any previous version.
    async fn save_state(&self, session_id: &str, state: &TutorState) -> Result<()>;
}

type Slot = Arc<Mutex<Option<TutorState>>>;

pub struct SessionStore {
    repository: Arc<dyn StateRepository>,
    curriculum: Curriculum,
    slots: Mutex<HashMap<String, Slot>>,
    max_cached: usize,
}

impl SessionStore {
    pub fn new(
        repository: Arc<dyn StateRepository>,
        curriculum: Curriculum,
        max_cached: usize,
    ) -> Self {
        Self {
            repository,
            curriculum,
            slots: Mutex::new(HashMap::new()),
            max_cached,
        }
    }

    /// Locks the session and returns its state, loading it from the
    /// repository or starting from the curriculum on first use.
    ///
    /// Waits while another lease for the same session is alive.
    pub async fn checkout(&self, session_id: &str) -> Result<SessionLease> {
        let slot = {
            let mut slots = self.slots.lock().await;
            if !slots.contains_key(session_id) && slots.len() >= self.max_cached {
                evict_idle(&mut slots);
            }
            slots
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .clone()
        };

        let mut guard = slot.lock_owned().await;
        let state = match guard.take() {
            Some(state) => state,
            None => match self.repository.load_state(session_id).await? {
                Some(state) => {
                    debug!(%session_id, "Loaded persisted session state");
                    state
                }
                None => {
                    info!(%session_id, "Starting new tutoring session");
                    TutorState::new(&self.curriculum)
                }
            },
        };

        Ok(SessionLease {
            session_id: session_id.to_string(),
            guard: OwnedMutexGuard::map(guard, move |slot| slot.insert(state)),
            repository: self.repository.clone(),
        })
    }
}

/// Drops every slot whose only owner is the map. Leases and waiters hold a
/// clone of the slot, so a count of one means the session is idle.
fn evict_idle(slots: &mut HashMap<String, Slot>) {
    let before = slots.len();
    slots.retain(|_, slot| Arc::strong_count(slot) > 1);
    debug!(
        evicted = before - slots.len(),
        cached = slots.len(),
        "Evicted idle sessions"
    );
}

/// Exclusive access to one session's state until dropped.
pub struct SessionLease {
    session_id: String,
    guard: OwnedMappedMutexGuard<Option<TutorState>, TutorState>,
    repository: Arc<dyn StateRepository>,
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl SessionLease {
    pub fn state(&self) -> &TutorState {
        &self.guard
    }

    pub fn state_mut(&mut self) -> &mut TutorState {
        &mut self.guard
    }

    /// Replaces the session state and persists it.
    ///
    /// The in-memory copy is updated even if persisting fails, so the next
    /// turn of this process still sees the latest state.
    pub async fn commit(&mut self, state: TutorState) -> Result<()> {
        *self.guard = state;
        self.repository
            .save_state(&self.session_id, &self.guard)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curriculum::TeachingMode;
    use std::time::Duration;

    fn store_with(repository: MockStateRepository) -> SessionStore {
        SessionStore::new(Arc::new(repository), Curriculum::grammar(), 16)
    }

    async fn cached(store: &SessionStore) -> Vec<String> {
        let mut ids: Vec<String> = store.slots.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_checkout_initializes_unknown_session_once() {
        let mut repository = MockStateRepository::new();
        repository
            .expect_load_state()
            .times(1)
            .returning(|_| Ok(None));
        let store = store_with(repository);

        let lease = store.checkout("1_session").await.unwrap();
        assert_eq!(lease.state().current_sub_topic, "sentence patterns");
        drop(lease);

        // Second checkout hits the in-memory slot.
        let lease = store.checkout("1_session").await.unwrap();
        assert_eq!(lease.session_id, "1_session");
        assert_eq!(cached(&store).await, vec!["1_session"]);
    }

    #[tokio::test]
    async fn test_checkout_prefers_persisted_state() {
        let mut persisted = TutorState::new(&Curriculum::grammar());
        persisted.switch_mode(TeachingMode::Examine);
        persisted.add_score(3.0).unwrap();

        let mut repository = MockStateRepository::new();
        let returned = persisted.clone();
        repository
            .expect_load_state()
            .withf(|id| id == "7_session")
            .returning(move |_| Ok(Some(returned.clone())));
        let store = store_with(repository);

        let lease = store.checkout("7_session").await.unwrap();
        assert_eq!(lease.state(), &persisted);
    }

    #[tokio::test]
    async fn test_commit_persists_and_updates_slot() {
        let mut repository = MockStateRepository::new();
        repository.expect_load_state().returning(|_| Ok(None));
        repository
            .expect_save_state()
            .withf(|id, state| id == "2_session" && state.current_performance_score == 1.0)
            .times(1)
            .returning(|_, _| Ok(()));
        let store = store_with(repository);

        let mut lease = store.checkout("2_session").await.unwrap();
        let mut next = lease.state().clone();
        next.add_score(1.0).unwrap();
        lease.commit(next).await.unwrap();
        drop(lease);

        let lease = store.checkout("2_session").await.unwrap();
        assert_eq!(lease.state().current_performance_score, 1.0);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let mut repository = MockStateRepository::new();
        repository.expect_load_state().returning(|_| Ok(None));
        repository.expect_save_state().returning(|_, _| Ok(()));
        let store = store_with(repository);

        let mut first = store.checkout("1_session").await.unwrap();
        let second = store.checkout("2_session").await.unwrap();

        first.state_mut().switch_mode(TeachingMode::Examine);
        assert_eq!(second.state().current_teaching_mode, TeachingMode::Explain);
    }

    #[tokio::test]
    async fn test_same_session_checkouts_are_serialized() {
        let mut repository = MockStateRepository::new();
        repository.expect_load_state().returning(|_| Ok(None));
        let store = Arc::new(store_with(repository));

        let lease = store.checkout("1_session").await.unwrap();

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.checkout("1_session").await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(lease);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("second checkout should proceed once the first lease is dropped")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_idle_sessions_are_evicted_past_the_bound() {
        let mut repository = MockStateRepository::new();
        repository.expect_load_state().returning(|_| Ok(None));
        let store = SessionStore::new(Arc::new(repository), Curriculum::grammar(), 2);

        let held = store.checkout("1_session").await.unwrap();
        drop(store.checkout("2_session").await.unwrap());
        assert_eq!(cached(&store).await, vec!["1_session", "2_session"]);

        // The third session pushes out the idle one but keeps the held one.
        let _third = store.checkout("3_session").await.unwrap();
        assert_eq!(cached(&store).await, vec!["1_session", "3_session"]);
        drop(held);
    }

    #[tokio::test]
    async fn test_evicted_session_is_reloaded_from_repository() {
        let mut saved = TutorState::new(&Curriculum::grammar());
        saved.add_score(2.0).unwrap();

        let mut repository = MockStateRepository::new();
        let returned = saved.clone();
        repository
            .expect_load_state()
            .withf(|id| id == "1_session")
            .times(2)
            .returning(move |_| Ok(Some(returned.clone())));
        repository
            .expect_load_state()
            .withf(|id| id == "2_session")
            .returning(|_| Ok(None));
        let store = SessionStore::new(Arc::new(repository), Curriculum::grammar(), 1);

        drop(store.checkout("1_session").await.unwrap());
        drop(store.checkout("2_session").await.unwrap());
        assert_eq!(cached(&store).await, vec!["2_session"]);

        let lease = store.checkout("1_session").await.unwrap();
        assert_eq!(lease.state().current_performance_score, 2.0);
    }
}
