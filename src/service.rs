// src/service.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::{Mutex, RwLock};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::credential::{CredentialVerifier, validate_passcode};
use crate::error::{LedgerError, LedgerResult, NotFound, StoreError};
use crate::heuristics::{Interpretation, LineItem};
use crate::ledger::{ClaimState, EditOutcome, ItemEdit, Lobby, NewItem};
use crate::lobby_db::{LobbyStore, generate_id};
use crate::settlement::Summary;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinOutcome {
    pub participant_id: String,
    pub is_host: bool,
}

/// Reloads allowed when another writer saved the same lobby first.
const MAX_STALE_RETRIES: usize = 3;

fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

/// Public lobby operations. Each lobby lives behind its own mutex, held
/// across validate, save and apply, so a change is visible only once stored.
pub struct LobbyService {
    store: Arc<dyn LobbyStore>,
    verifier: Arc<dyn CredentialVerifier>,
    lobbies: RwLock<HashMap<String, Arc<Mutex<Lobby>>>>,
    nonce: AtomicU64,
}

impl LobbyService {
    pub fn new(store: Arc<dyn LobbyStore>, verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self {
            store,
            verifier,
            lobbies: RwLock::new(HashMap::new()),
            nonce: AtomicU64::new(0),
        }
    }

    fn next_nonce(&self) -> String {
        self.nonce.fetch_add(1, Ordering::Relaxed).to_string()
    }

    async fn load(&self, lobby_id: &str) -> LedgerResult<Lobby> {
        match self.store.load_lobby(lobby_id).await {
            Ok(lobby) => Ok(lobby),
            Err(StoreError::NotFound(_)) => Err(NotFound::Lobby(lobby_id.to_string()).into()),
            Err(e) => Err(e.into()),
        }
    }

    async fn entry(&self, lobby_id: &str) -> LedgerResult<Arc<Mutex<Lobby>>> {
        if let Some(entry) = self.lobbies.read().await.get(lobby_id) {
            return Ok(entry.clone());
        }
        let lobby = self.load(lobby_id).await?;
        debug!(lobby_id, version = lobby.version, "Lobby loaded from store");
        let mut lobbies = self.lobbies.write().await;
        Ok(lobbies
            .entry(lobby_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(lobby)))
            .clone())
    }

    async fn evict(&self, lobby_id: &str) {
        self.lobbies.write().await.remove(lobby_id);
    }

    async fn snapshot(&self, lobby_id: &str) -> LedgerResult<Lobby> {
        let entry = self.entry(lobby_id).await?;
        let lobby = entry.lock().await;
        Ok(lobby.clone())
    }

    /// Run `op` against a draft of the locked lobby and save the draft before
    /// it replaces the cached copy. When another writer saved first, the
    /// lobby is reloaded and `op` runs again on the fresh state, so every
    /// check sees the latest stored claims.
    async fn mutate<T>(
        &self,
        lobby_id: &str,
        op: impl Fn(&mut Lobby) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let entry = self.entry(lobby_id).await?;
        let mut lobby = entry.lock().await;

        for attempt in 0..=MAX_STALE_RETRIES {
            let mut draft = lobby.clone();
            let out = op(&mut draft).inspect_err(|e| {
                warn!(lobby_id, error = %e, "Ledger operation rejected");
            })?;
            if draft.version == lobby.version {
                return Ok(out);
            }

            match self.store.save_lobby(&draft).await {
                Ok(()) => {
                    *lobby = draft;
                    return Ok(out);
                }
                Err(StoreError::Conflict {
                    stored, attempted, ..
                }) => {
                    debug!(lobby_id, stored, attempted, attempt, "Cached lobby is stale, reloading");
                    match self.load(lobby_id).await {
                        Ok(fresh) => *lobby = fresh,
                        Err(e) => {
                            drop(lobby);
                            self.evict(lobby_id).await;
                            return Err(e);
                        }
                    }
                }
                Err(e) => {
                    warn!(lobby_id, error = %e, "Failed to persist lobby");
                    drop(lobby);
                    self.evict(lobby_id).await;
                    return Err(e.into());
                }
            }
        }

        drop(lobby);
        self.evict(lobby_id).await;
        warn!(lobby_id, "Giving up after repeated store conflicts");
        Err(LedgerError::StaleLobby {
            lobby_id: lobby_id.to_string(),
        })
    }

    /// Create a lobby from an accepted interpretation. A review flag does not
    /// block creation; an empty item set does.
    pub async fn create_lobby(
        &self,
        name: &str,
        interpretation: &Interpretation,
        passcode: &str,
    ) -> LedgerResult<String> {
        let passcode = validate_passcode(passcode)?;
        let created_at = now_rfc3339();
        let lobby_id = generate_id(&[name, &created_at, &self.next_nonce()]);
        let span = info_span!("create_lobby", lobby_id = %lobby_id);

        async {
            let name = match name.trim() {
                "" => "Shared bill",
                trimmed => trimmed,
            };
            let lobby = Lobby::new(
                lobby_id.clone(),
                name,
                self.verifier.hash(&lobby_id, passcode),
                interpretation.items.clone(),
                interpretation.totals.clone(),
                created_at,
            )?;
            self.store.save_lobby(&lobby).await?;
            info!(
                items = lobby.items.len(),
                needs_review = interpretation.needs_review(),
                "Lobby created"
            );
            self.lobbies
                .write()
                .await
                .insert(lobby_id.clone(), Arc::new(Mutex::new(lobby)));
            Ok::<_, LedgerError>(lobby_id.clone())
        }
        .instrument(span)
        .await
    }

    /// Join with the lobby passcode. The first participant becomes the host.
    pub async fn join_lobby(
        &self,
        lobby_id: &str,
        passcode: &str,
        name: &str,
    ) -> LedgerResult<JoinOutcome> {
        let verifier = self.verifier.clone();
        let nonce = self.next_nonce();
        let outcome = self
            .mutate(lobby_id, |lobby| {
                if !verifier.verify(&lobby.id, passcode.trim(), &lobby.passcode_hash) {
                    return Err(LedgerError::InvalidCredential);
                }
                let joined_at = now_rfc3339();
                let participant_id = generate_id(&[&lobby.id, name, &joined_at, &nonce]);
                let is_host = lobby.add_participant(participant_id.clone(), name, joined_at);
                Ok(JoinOutcome {
                    participant_id,
                    is_host,
                })
            })
            .await?;
        info!(lobby_id, participant_id = %outcome.participant_id, is_host = outcome.is_host, "Participant joined");
        Ok(outcome)
    }

    /// Items, newest first.
    pub async fn list_items(&self, lobby_id: &str) -> LedgerResult<Vec<LineItem>> {
        Ok(self.snapshot(lobby_id).await?.items)
    }

    pub async fn get_lobby(&self, lobby_id: &str) -> LedgerResult<Lobby> {
        self.snapshot(lobby_id).await
    }

    /// Settlement over a consistent snapshot, computed outside the lock.
    pub async fn get_summary(&self, lobby_id: &str) -> LedgerResult<Summary> {
        let lobby = self.snapshot(lobby_id).await?;
        Ok(lobby.summary())
    }

    pub async fn set_claim(
        &self,
        lobby_id: &str,
        participant_id: &str,
        item_id: &str,
        quantity: f64,
    ) -> LedgerResult<ClaimState> {
        let state = self
            .mutate(lobby_id, |lobby| lobby.set_claim(participant_id, item_id, quantity))
            .await?;
        info!(lobby_id, participant_id, item_id, quantity, claimed = state.claimed, "Claim set");
        Ok(state)
    }

    /// Host only.
    pub async fn reset_claims(
        &self,
        lobby_id: &str,
        actor_id: &str,
        item_id: &str,
        participant_id: Option<&str>,
    ) -> LedgerResult<ClaimState> {
        let state = self
            .mutate(lobby_id, |lobby| {
                lobby.require_host(actor_id)?;
                lobby.reset_claims(item_id, participant_id)
            })
            .await?;
        info!(lobby_id, item_id, participant = ?participant_id, "Claims reset");
        Ok(state)
    }

    /// Host only.
    pub async fn add_item(
        &self,
        lobby_id: &str,
        actor_id: &str,
        item: NewItem,
    ) -> LedgerResult<LineItem> {
        let item = self
            .mutate(lobby_id, |lobby| {
                lobby.require_host(actor_id)?;
                lobby.add_item(item.clone())
            })
            .await?;
        info!(lobby_id, item_id = %item.id, name = %item.name, cost = item.cost, "Item added");
        Ok(item)
    }

    /// Host only. Claims above a reduced quantity are clamped and reported.
    pub async fn edit_item(
        &self,
        lobby_id: &str,
        actor_id: &str,
        item_id: &str,
        edit: ItemEdit,
    ) -> LedgerResult<EditOutcome> {
        let outcome = self
            .mutate(lobby_id, |lobby| {
                lobby.require_host(actor_id)?;
                lobby.edit_item(item_id, edit.clone())
            })
            .await?;
        info!(
            lobby_id,
            item_id,
            clamped = outcome.adjustments.len(),
            "Item edited"
        );
        Ok(outcome)
    }
}
