//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Walkers read a `GraphSnapshot` built here; they never execute SQL.
//!
//! Every graph write records the entities it touched. The engine drains
//! that list to invalidate cached exposure results and stale snapshots.

use crate::{error::GraphResult, snapshot::GraphSnapshot, types::EntityId};
use log::debug;
use rusqlite::Connection;
use std::{
    cell::{Cell, RefCell},
    collections::BTreeSet,
    str::FromStr,
};

mod audit;
mod case;
mod entity;
mod holding;
mod relationship;
mod role_profile;
mod ubo;

pub struct GraphStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
    generation: Cell<u64>,
    touched: RefCell<BTreeSet<EntityId>>,
}

impl GraphStore {
    pub fn open(path: &str) -> GraphResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self::from_connection(conn, Some(path.to_string())))
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> GraphResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self::from_connection(conn, None))
    }

    fn from_connection(conn: Connection, path: Option<String>) -> Self {
        Self {
            conn,
            path,
            generation: Cell::new(0),
            touched: RefCell::new(BTreeSet::new()),
        }
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    pub fn reopen(&self) -> GraphResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> GraphResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_graph.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_roles_holdings.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_ubo.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_cases.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/005_audit.sql"))?;
        Ok(())
    }

    // ── Change tracking ────────────────────────────────────────

    fn note_change(&self, entities: &[&str]) {
        self.generation.set(self.generation.get() + 1);
        let mut touched = self.touched.borrow_mut();
        for entity in entities {
            touched.insert((*entity).to_string());
        }
    }

    /// Bumped by every graph write. A snapshot taken at an older generation
    /// is stale.
    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    /// Entities touched by graph writes since the last call.
    pub fn take_touched(&self) -> Vec<EntityId> {
        std::mem::take(&mut *self.touched.borrow_mut())
            .into_iter()
            .collect()
    }

    // ── Snapshot ───────────────────────────────────────────────

    /// Load every entity, edge version, holding row and role profile version
    /// into an immutable snapshot.
    pub fn load_snapshot(&self) -> GraphResult<GraphSnapshot> {
        let entities = self.all_entities()?;
        let edges = self.all_relationships()?;
        let holdings = self.all_holdings()?;
        let profiles = self.all_role_profiles()?;
        debug!(
            "Snapshot loaded: {} entities, {} edges, {} holdings, {} role profiles",
            entities.len(),
            edges.len(),
            holdings.len(),
            profiles.len()
        );
        Ok(GraphSnapshot::new(entities, edges, holdings, profiles))
    }
}

// ── Column helpers ─────────────────────────────────────────────────

/// Read a text column into one of the crate's string-coded enums.
pub(crate) fn text_col<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

pub(crate) fn opt_text_col<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr<Err = String>,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| {
        r.parse::<T>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
        })
    })
    .transpose()
}

pub(crate) fn opt_bool_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<bool>> {
    Ok(row.get::<_, Option<i32>>(idx)?.map(|v| v != 0))
}
