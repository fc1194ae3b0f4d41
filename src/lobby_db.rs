// src/lobby_db.rs

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::heuristics::items::sort_newest_first;
use crate::heuristics::{Category, CategorySource, ItemOrigin, LineItem, OtherSubcategory};
use crate::ledger::{ItemClaims, Lobby, Participant};

/// Durable home for lobbies. A save must carry a version newer than the
/// stored one, so a stale snapshot can never overwrite a fresher one.
#[async_trait]
pub trait LobbyStore: Send + Sync {
    async fn load_lobby(&self, lobby_id: &str) -> Result<Lobby, StoreError>;
    async fn save_lobby(&self, lobby: &Lobby) -> Result<(), StoreError>;
}

/// Short hex id from a hash of the given parts.
pub fn generate_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\x1f");
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..12].to_string()
}

// ----------------------------------------------------------------------------
// SQLite
// ----------------------------------------------------------------------------

pub struct SqliteLobbyStore {
    conn: Mutex<Connection>,
}

impl SqliteLobbyStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS lobbies (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                passcode_hash TEXT NOT NULL,
                host_id TEXT,
                totals_json TEXT NOT NULL,
                version INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS lobby_items (
                lobby_id TEXT NOT NULL,
                item_id TEXT NOT NULL,
                name TEXT NOT NULL,
                quantity REAL NOT NULL,
                unit_price REAL NOT NULL,
                cost REAL NOT NULL,
                category TEXT NOT NULL,
                category_source TEXT NOT NULL,
                other_subcategory TEXT,
                origin TEXT NOT NULL,
                PRIMARY KEY (lobby_id, item_id)
            );
            CREATE TABLE IF NOT EXISTS participants (
                lobby_id TEXT NOT NULL,
                participant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                joined_at TEXT NOT NULL,
                PRIMARY KEY (lobby_id, participant_id)
            );
            CREATE TABLE IF NOT EXISTS claims (
                lobby_id TEXT NOT NULL,
                item_id TEXT NOT NULL,
                participant_id TEXT NOT NULL,
                quantity REAL NOT NULL,
                PRIMARY KEY (lobby_id, item_id, participant_id)
            );",
        )?;
        info!("Lobby database initialized");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn read_lobby(conn: &Connection, lobby_id: &str) -> Result<Lobby, StoreError> {
    let head = conn
        .query_row(
            "SELECT name, passcode_hash, host_id, totals_json, version, created_at
             FROM lobbies WHERE id = ?1",
            params![lobby_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;
    let Some((name, passcode_hash, host_id, totals_json, version, created_at)) = head else {
        return Err(StoreError::NotFound(lobby_id.to_string()));
    };

    let mut stmt = conn.prepare(
        "SELECT item_id, name, quantity, unit_price, cost, category, category_source,
                other_subcategory, origin
         FROM lobby_items WHERE lobby_id = ?1",
    )?;
    let mut items = stmt
        .query_map(params![lobby_id], |row| {
            let category: String = row.get(5)?;
            let source: String = row.get(6)?;
            let sub: Option<String> = row.get(7)?;
            let origin: String = row.get(8)?;
            Ok(LineItem {
                id: row.get(0)?,
                name: row.get(1)?,
                quantity: row.get(2)?,
                unit_price: row.get(3)?,
                cost: row.get(4)?,
                category: Category::parse(&category).unwrap_or_default(),
                category_source: CategorySource::parse(&source).unwrap_or_default(),
                other_subcategory: sub.as_deref().and_then(OtherSubcategory::parse),
                origin: ItemOrigin::parse(&origin).unwrap_or_default(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    sort_newest_first(&mut items);

    let mut stmt = conn.prepare(
        "SELECT participant_id, name, joined_at FROM participants WHERE lobby_id = ?1",
    )?;
    let participants = stmt
        .query_map(params![lobby_id], |row| {
            Ok(Participant {
                id: row.get(0)?,
                name: row.get(1)?,
                joined_at: row.get(2)?,
            })
        })?
        .map(|p| p.map(|p| (p.id.clone(), p)))
        .collect::<Result<BTreeMap<_, _>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT item_id, participant_id, quantity FROM claims WHERE lobby_id = ?1",
    )?;
    let rows = stmt.query_map(params![lobby_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, f64>(2)?,
        ))
    })?;
    let mut claims: BTreeMap<String, ItemClaims> = BTreeMap::new();
    for row in rows {
        let (item_id, participant_id, quantity) = row?;
        claims.entry(item_id).or_default().insert(participant_id, quantity);
    }

    Ok(Lobby {
        id: lobby_id.to_string(),
        name,
        passcode_hash,
        host_id,
        items,
        participants,
        claims,
        totals: serde_json::from_str(&totals_json)?,
        version: version as u64,
        created_at,
    })
}

fn write_lobby(conn: &mut Connection, lobby: &Lobby) -> Result<(), StoreError> {
    let tx = conn.transaction()?;

    let stored: Option<i64> = tx
        .query_row(
            "SELECT version FROM lobbies WHERE id = ?1",
            params![lobby.id],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(stored) = stored
        && stored as u64 >= lobby.version
    {
        return Err(StoreError::Conflict {
            lobby_id: lobby.id.clone(),
            stored: stored as u64,
            attempted: lobby.version,
        });
    }

    tx.execute(
        "INSERT INTO lobbies (id, name, passcode_hash, host_id, totals_json, version, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            host_id = excluded.host_id,
            totals_json = excluded.totals_json,
            version = excluded.version",
        params![
            lobby.id,
            lobby.name,
            lobby.passcode_hash,
            lobby.host_id,
            serde_json::to_string(&lobby.totals)?,
            lobby.version as i64,
            lobby.created_at,
        ],
    )?;
    for table in ["lobby_items", "participants", "claims"] {
        tx.execute(
            &format!("DELETE FROM {table} WHERE lobby_id = ?1"),
            params![lobby.id],
        )?;
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO lobby_items
                (lobby_id, item_id, name, quantity, unit_price, cost, category,
                 category_source, other_subcategory, origin)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        for item in &lobby.items {
            stmt.execute(params![
                lobby.id,
                item.id,
                item.name,
                item.quantity,
                item.unit_price,
                item.cost,
                item.category.as_str(),
                item.category_source.as_str(),
                item.other_subcategory.map(|s| s.as_str()),
                item.origin.as_str(),
            ])?;
        }

        let mut stmt = tx.prepare(
            "INSERT INTO participants (lobby_id, participant_id, name, joined_at)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for p in lobby.participants.values() {
            stmt.execute(params![lobby.id, p.id, p.name, p.joined_at])?;
        }

        let mut stmt = tx.prepare(
            "INSERT INTO claims (lobby_id, item_id, participant_id, quantity)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (item_id, claims) in &lobby.claims {
            for (pid, quantity) in claims {
                stmt.execute(params![lobby.id, item_id, pid, quantity])?;
            }
        }
    }

    tx.commit()?;
    Ok(())
}

#[async_trait]
impl LobbyStore for SqliteLobbyStore {
    async fn load_lobby(&self, lobby_id: &str) -> Result<Lobby, StoreError> {
        let conn = self.conn.lock().await;
        read_lobby(&conn, lobby_id)
    }

    async fn save_lobby(&self, lobby: &Lobby) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        write_lobby(&mut conn, lobby)?;
        debug!(lobby_id = %lobby.id, version = lobby.version, "Lobby saved");
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// In-memory
// ----------------------------------------------------------------------------

/// Same contract as the SQLite store, kept in a map. Used by tests and by
/// the CLI when no database path is configured.
#[derive(Default)]
pub struct MemoryLobbyStore {
    lobbies: Mutex<HashMap<String, Lobby>>,
}

impl MemoryLobbyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LobbyStore for MemoryLobbyStore {
    async fn load_lobby(&self, lobby_id: &str) -> Result<Lobby, StoreError> {
        self.lobbies
            .lock()
            .await
            .get(lobby_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(lobby_id.to_string()))
    }

    async fn save_lobby(&self, lobby: &Lobby) -> Result<(), StoreError> {
        let mut lobbies = self.lobbies.lock().await;
        if let Some(stored) = lobbies.get(&lobby.id)
            && stored.version >= lobby.version
        {
            return Err(StoreError::Conflict {
                lobby_id: lobby.id.clone(),
                stored: stored.version,
                attempted: lobby.version,
            });
        }
        lobbies.insert(lobby.id.clone(), lobby.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::{ReceiptTotals, TaxLine};

    fn sample() -> Lobby {
        let items = vec![
            LineItem {
                id: "itm_1".into(),
                name: "Rice".into(),
                quantity: 2.0,
                unit_price: 100.0,
                cost: 200.0,
                category: Category::Veg,
                category_source: CategorySource::Inferred,
                other_subcategory: None,
                origin: ItemOrigin::Receipt,
            },
            LineItem {
                id: "itm_2".into(),
                name: "Kheer".into(),
                quantity: 1.0,
                unit_price: 50.0,
                cost: 50.0,
                category: Category::Other,
                category_source: CategorySource::UserSelected,
                other_subcategory: Some(OtherSubcategory::Dessert),
                origin: ItemOrigin::Manual,
            },
        ];
        let totals = ReceiptTotals {
            detected_grand_total: Some(275.0),
            detected_tax_total: Some(25.0),
            detected_tax_breakdown: vec![TaxLine {
                name: "GST".into(),
                amount: 25.0,
            }],
            ..ReceiptTotals::default()
        };
        let mut lobby = Lobby::new("lob1", "Lunch", "hash", items, totals, "2026-01-01").unwrap();
        lobby.add_participant("p1", "Asha", "2026-01-01");
        lobby.add_participant("p2", "Bo", "2026-01-01");
        lobby.set_claim("p1", "itm_1", 2.0).unwrap();
        lobby
    }

    #[test]
    fn test_generate_id_is_stable() {
        let a = generate_id(&["Lunch", "2026-01-01"]);
        assert_eq!(a.len(), 12);
        assert_eq!(a, generate_id(&["Lunch", "2026-01-01"]));
        assert_ne!(a, generate_id(&["Lunch2", "026-01-01"]));
    }

    #[tokio::test]
    async fn test_sqlite_save_and_load() {
        let store = SqliteLobbyStore::open_in_memory().unwrap();
        let lobby = sample();
        store.save_lobby(&lobby).await.unwrap();
        let loaded = store.load_lobby("lob1").await.unwrap();
        assert_eq!(loaded, lobby);
    }

    #[tokio::test]
    async fn test_sqlite_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lobbies.db");
        let lobby = sample();
        {
            let store = SqliteLobbyStore::open(&path).unwrap();
            store.save_lobby(&lobby).await.unwrap();
        }
        let store = SqliteLobbyStore::open(&path).unwrap();
        assert_eq!(store.load_lobby("lob1").await.unwrap(), lobby);
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        for store in [
            Box::new(SqliteLobbyStore::open_in_memory().unwrap()) as Box<dyn LobbyStore>,
            Box::new(MemoryLobbyStore::new()),
        ] {
            let mut lobby = sample();
            store.save_lobby(&lobby).await.unwrap();
            let stale = lobby.clone();

            lobby.set_claim("p2", "itm_2", 1.0).unwrap();
            store.save_lobby(&lobby).await.unwrap();

            let err = store.save_lobby(&stale).await.unwrap_err();
            assert!(matches!(err, StoreError::Conflict { .. }));
            let loaded = store.load_lobby("lob1").await.unwrap();
            assert_eq!(loaded.claims, lobby.claims);
        }
    }

    #[tokio::test]
    async fn test_missing_lobby() {
        let store = SqliteLobbyStore::open_in_memory().unwrap();
        assert!(matches!(
            store.load_lobby("nope").await,
            Err(StoreError::NotFound(_))
        ));
    }
}
