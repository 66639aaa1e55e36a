//! Role profile versions.

use super::{opt_bool_col, text_col, GraphStore};
use crate::{
    error::{GraphError, GraphResult},
    event::AuditEvent,
    role_profile::{NewRoleProfile, RoleProfile, RoleProfileIndex},
};
use chrono::{NaiveDate, Utc};
use log::debug;
use rusqlite::{params, OptionalExtension};

const PROFILE_COLUMNS: &str = "profile_id, issuer, holder, share_class, role_type, lookthrough_policy,
     holder_affiliation, bo_data_available, is_ubo_eligible, effective_from, effective_to";

fn profile_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<RoleProfile> {
    Ok(RoleProfile {
        profile_id: r.get(0)?,
        issuer: r.get(1)?,
        holder: r.get(2)?,
        share_class: r.get(3)?,
        role_type: text_col(r, 4)?,
        lookthrough_policy: text_col(r, 5)?,
        holder_affiliation: text_col(r, 6)?,
        beneficial_owner_data_available: r.get::<_, i32>(7)? != 0,
        is_ubo_eligible: opt_bool_col(r, 8)?,
        effective_from: r.get(9)?,
        effective_to: r.get(10)?,
    })
}

impl GraphStore {
    /// Record a new profile version for (issuer, holder, share_class). The
    /// currently open version, if any, is closed at the new version's
    /// `effective_from`.
    pub fn upsert_role_profile(&self, new: &NewRoleProfile) -> GraphResult<RoleProfile> {
        new.validate()?;
        self.get_entity(&new.issuer)?;
        self.get_entity(&new.holder)?;

        let current = self.open_role_profile(&new.issuer, &new.holder, new.share_class.as_deref())?;
        if let Some(open) = &current {
            if new.effective_from < open.effective_from {
                return Err(GraphError::InvalidTemporalWindow {
                    from: open.effective_from,
                    to: new.effective_from,
                });
            }
        }

        let profile = new.clone().into_profile(crate::types::new_id("role"));
        let tx = self.conn.unchecked_transaction()?;
        if let Some(open) = &current {
            tx.execute(
                "UPDATE role_profile SET effective_to = ?2 WHERE profile_id = ?1",
                params![open.profile_id, new.effective_from],
            )?;
        }
        tx.execute(
            "INSERT INTO role_profile
                (profile_id, issuer, holder, share_class, role_type, lookthrough_policy,
                 holder_affiliation, bo_data_available, is_ubo_eligible,
                 effective_from, effective_to, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL, ?11)",
            params![
                profile.profile_id,
                profile.issuer,
                profile.holder,
                profile.share_class,
                profile.role_type.as_str(),
                profile.lookthrough_policy.as_str(),
                profile.holder_affiliation.as_str(),
                profile.beneficial_owner_data_available as i32,
                profile.is_ubo_eligible.map(|b| b as i32),
                profile.effective_from,
                Utc::now(),
            ],
        )?;
        self.append_audit(&AuditEvent::RoleProfileVersioned {
            profile_id: profile.profile_id.clone(),
            issuer: profile.issuer.clone(),
            holder: profile.holder.clone(),
            closed_profile_id: current.as_ref().map(|p| p.profile_id.clone()),
        })?;
        tx.commit()?;

        debug!(
            "Role profile {} for {} in {}: {} / {}",
            profile.profile_id, profile.holder, profile.issuer, profile.role_type, profile.lookthrough_policy
        );
        self.note_change(&[&profile.issuer, &profile.holder]);
        Ok(profile)
    }

    fn open_role_profile(
        &self,
        issuer: &str,
        holder: &str,
        share_class: Option<&str>,
    ) -> GraphResult<Option<RoleProfile>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {PROFILE_COLUMNS} FROM role_profile
                     WHERE issuer = ?1 AND holder = ?2
                       AND COALESCE(share_class, '') = COALESCE(?3, '')
                       AND effective_to IS NULL"
                ),
                params![issuer, holder, share_class],
                profile_from_row,
            )
            .optional()?)
    }

    /// The profile governing `holder` in `issuer` at `as_of`.
    pub fn role_profile_at(
        &self,
        issuer: &str,
        holder: &str,
        share_class: Option<&str>,
        as_of: NaiveDate,
    ) -> GraphResult<Option<RoleProfile>> {
        let index = RoleProfileIndex::new(self.role_profile_history(issuer, holder)?);
        Ok(index.profile_for(issuer, holder, share_class, as_of).cloned())
    }

    /// All versions for one (issuer, holder) pair, oldest first.
    pub fn role_profile_history(&self, issuer: &str, holder: &str) -> GraphResult<Vec<RoleProfile>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PROFILE_COLUMNS} FROM role_profile
             WHERE issuer = ?1 AND holder = ?2
             ORDER BY effective_from, recorded_at"
        ))?;
        let rows = stmt.query_map(params![issuer, holder], profile_from_row)?;
        let mut result = Vec::new();
        for r in rows {
            result.push(r?);
        }
        Ok(result)
    }

    pub fn all_role_profiles(&self) -> GraphResult<Vec<RoleProfile>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PROFILE_COLUMNS} FROM role_profile ORDER BY issuer, holder, effective_from"
        ))?;
        let rows = stmt.query_map([], profile_from_row)?;
        let mut result = Vec::new();
        for r in rows {
            result.push(r?);
        }
        Ok(result)
    }
}
