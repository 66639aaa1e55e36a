//! Entity register.

use super::{text_col, GraphStore};
use crate::{
    error::{GraphError, GraphResult},
    event::AuditEvent,
    model::{Entity, EntityCategory},
};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

const ENTITY_COLUMNS: &str = "entity_id, name, category, jurisdiction";

fn entity_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
    Ok(Entity {
        entity_id: r.get(0)?,
        name: r.get(1)?,
        category: text_col(r, 2)?,
        jurisdiction: r.get(3)?,
    })
}

impl GraphStore {
    pub fn insert_entity(&self, entity: &Entity) -> GraphResult<()> {
        self.conn.execute(
            "INSERT INTO entity (entity_id, name, category, jurisdiction, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entity.entity_id,
                entity.name,
                entity.category.as_str(),
                entity.jurisdiction,
                Utc::now(),
            ],
        )?;
        self.append_audit(&AuditEvent::EntityRegistered {
            entity_id: entity.entity_id.clone(),
            category: entity.category.as_str().to_string(),
        })?;
        self.note_change(&[&entity.entity_id]);
        Ok(())
    }

    pub fn find_entity(&self, entity_id: &str) -> GraphResult<Option<Entity>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {ENTITY_COLUMNS} FROM entity WHERE entity_id = ?1"),
                params![entity_id],
                entity_from_row,
            )
            .optional()?)
    }

    pub fn get_entity(&self, entity_id: &str) -> GraphResult<Entity> {
        self.find_entity(entity_id)?
            .ok_or_else(|| GraphError::EntityNotFound {
                entity_id: entity_id.to_string(),
            })
    }

    pub fn all_entities(&self) -> GraphResult<Vec<Entity>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {ENTITY_COLUMNS} FROM entity ORDER BY entity_id"))?;
        let rows = stmt.query_map([], entity_from_row)?;
        let mut result = Vec::new();
        for r in rows {
            result.push(r?);
        }
        Ok(result)
    }

    pub fn entity_count(&self) -> GraphResult<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entity", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    /// Category is fixed at registration. Re-stating the same category is a
    /// no-op; anything else is rejected.
    pub fn reclassify_entity(&self, entity_id: &str, category: EntityCategory) -> GraphResult<()> {
        let entity = self.get_entity(entity_id)?;
        if entity.category != category {
            return Err(GraphError::CategoryImmutable {
                entity_id: entity_id.to_string(),
            });
        }
        Ok(())
    }

    /// Names and jurisdictions are descriptive and may be corrected.
    pub fn update_entity_details(
        &self,
        entity_id: &str,
        name: &str,
        jurisdiction: Option<&str>,
    ) -> GraphResult<()> {
        let n = self.conn.execute(
            "UPDATE entity SET name = ?2, jurisdiction = ?3 WHERE entity_id = ?1",
            params![entity_id, name, jurisdiction],
        )?;
        if n == 0 {
            return Err(GraphError::EntityNotFound {
                entity_id: entity_id.to_string(),
            });
        }
        Ok(())
    }
}
