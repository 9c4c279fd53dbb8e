use diesel::prelude::*;
use groupledger_shared::domain::Status;
use serde::Deserialize;
use tracing::{info, trace};

use super::LedgerError;
use super::tasks::TaskPointRange;
use crate::storage::models::{Group, Membership, NewGroup, NewMembership};
use crate::storage::schema::{groups, memberships};
use crate::storage::{StorageError, Store};

/// A group and its initial members, as listed in the server config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupSeed {
    pub id: String,
    pub name: String,
    /// User id of the group admin.
    pub admin: String,
    /// Accept submissions on arrival, crediting points without an admin review.
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub task_points: TaskPointRange,
    #[serde(default)]
    pub members: Vec<MemberSeed>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemberSeed {
    pub user: String,
    #[serde(default)]
    pub points: i32,
}

/// What a caller may do inside a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberAccess {
    Admin,
    Member,
    None,
}

impl Store {
    /// Upserts configured groups and creates any missing memberships.
    ///
    /// Group settings follow the config. Existing memberships keep their
    /// balance and status.
    pub async fn seed_groups(&self, seeds: &[GroupSeed]) -> Result<(), StorageError> {
        let seeds = seeds.to_owned();
        let now = self.now();
        self.interact(move |conn| -> Result<(), StorageError> {
            conn.immediate_transaction(|conn| -> Result<(), StorageError> {
                for g in &seeds {
                    g.task_points.check().map_err(|msg| {
                        StorageError::InvalidInput(format!("group {}: {msg}", g.id))
                    })?;
                    let new_group = NewGroup {
                        id: &g.id,
                        name: &g.name,
                        admin_id: &g.admin,
                        auto_approve: g.auto_approve,
                        task_points_min: g.task_points.min,
                        task_points_average: g.task_points.average,
                        task_points_max: g.task_points.max,
                        status: Status::Active.as_str(),
                    };
                    diesel::insert_into(groups::table)
                        .values(&new_group)
                        .on_conflict(groups::id)
                        .do_update()
                        .set((
                            groups::name.eq(new_group.name),
                            groups::admin_id.eq(new_group.admin_id),
                            groups::auto_approve.eq(new_group.auto_approve),
                            groups::task_points_min.eq(new_group.task_points_min),
                            groups::task_points_average.eq(new_group.task_points_average),
                            groups::task_points_max.eq(new_group.task_points_max),
                        ))
                        .execute(conn)?;

                    let admin_listed = g.members.iter().any(|m| m.user == g.admin);
                    let admin_seed = MemberSeed {
                        user: g.admin.clone(),
                        points: 0,
                    };
                    let all = g
                        .members
                        .iter()
                        .chain((!admin_listed).then_some(&admin_seed));
                    for m in all {
                        if m.points < 0 {
                            return Err(StorageError::InvalidInput(format!(
                                "negative initial points for {} in {}",
                                m.user, g.id
                            )));
                        }
                        let row = NewMembership {
                            user_id: &m.user,
                            group_id: &g.id,
                            points: m.points,
                            status: Status::Active.as_str(),
                            joined_at: now,
                        };
                        diesel::insert_into(memberships::table)
                            .values(&row)
                            .on_conflict((memberships::user_id, memberships::group_id))
                            .do_nothing()
                            .execute(conn)?;
                    }
                    trace!(group_id = %g.id, members = g.members.len(), "group seeded");
                }
                Ok(())
            })
        })
        .await
    }

    /// Joins `user` to `group`, or reactivates a soft-deleted membership
    /// (keeping its balance).
    pub async fn add_member(
        &self,
        group_id: &str,
        user_id: &str,
        initial_points: i32,
    ) -> Result<Membership, LedgerError> {
        if initial_points < 0 {
            return Err(LedgerError::invalid("initial points cannot be negative"));
        }
        let group_id = group_id.to_string();
        let user_id = user_id.to_string();
        let now = self.now();
        self.interact(move |conn| {
            conn.immediate_transaction(|conn| -> Result<Membership, LedgerError> {
                active_group(conn, &group_id)?.ok_or(LedgerError::NotFound("group"))?;
                let existing = memberships::table
                    .filter(memberships::group_id.eq(&group_id))
                    .filter(memberships::user_id.eq(&user_id))
                    .select(Membership::as_select())
                    .first(conn)
                    .optional()?;
                match existing {
                    Some(m) if m.status == Status::Active.as_str() => {
                        Err(LedgerError::invalid("already an active member"))
                    }
                    Some(m) => {
                        let row = diesel::update(memberships::table.find(m.id))
                            .set(memberships::status.eq(Status::Active.as_str()))
                            .returning(Membership::as_returning())
                            .get_result(conn)?;
                        info!(%group_id, %user_id, "membership reactivated");
                        Ok(row)
                    }
                    None => {
                        let row = diesel::insert_into(memberships::table)
                            .values(&NewMembership {
                                user_id: &user_id,
                                group_id: &group_id,
                                points: initial_points,
                                status: Status::Active.as_str(),
                                joined_at: now,
                            })
                            .returning(Membership::as_returning())
                            .get_result(conn)?;
                        info!(%group_id, %user_id, "member joined");
                        Ok(row)
                    }
                }
            })
        })
        .await
    }

    /// Soft-deletes a membership. The balance is kept for a later rejoin.
    pub async fn deactivate_member(&self, group_id: &str, user_id: &str) -> Result<(), LedgerError> {
        let group_id = group_id.to_string();
        let user_id = user_id.to_string();
        self.interact(move |conn| -> Result<(), LedgerError> {
            let updated = diesel::update(
                memberships::table
                    .filter(memberships::group_id.eq(&group_id))
                    .filter(memberships::user_id.eq(&user_id))
                    .filter(memberships::status.eq(Status::Active.as_str())),
            )
            .set(memberships::status.eq(Status::Inactive.as_str()))
            .execute(conn)?;
            if updated == 0 {
                return Err(LedgerError::NotAMember);
            }
            info!(%group_id, %user_id, "membership deactivated");
            Ok(())
        })
        .await
    }

    /// Spendable points of an active member.
    pub async fn get_balance(&self, user_id: &str, group_id: &str) -> Result<i32, LedgerError> {
        let group_id = group_id.to_string();
        let user_id = user_id.to_string();
        self.interact(move |conn| -> Result<i32, LedgerError> {
            active_membership(conn, &group_id, &user_id)?
                .map(|m| m.points)
                .ok_or(LedgerError::NotAMember)
        })
        .await
    }

    /// Active members of a group with their balances, richest first.
    pub async fn list_members(&self, group_id: &str) -> Result<Vec<Membership>, LedgerError> {
        let group_id = group_id.to_string();
        self.interact(move |conn| -> Result<Vec<Membership>, LedgerError> {
            Ok(memberships::table
                .filter(memberships::group_id.eq(&group_id))
                .filter(memberships::status.eq(Status::Active.as_str()))
                .order((memberships::points.desc(), memberships::user_id.asc()))
                .select(Membership::as_select())
                .load(conn)?)
        })
        .await
    }

    pub async fn member_access(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> Result<MemberAccess, StorageError> {
        let group_id = group_id.to_string();
        let user_id = user_id.to_string();
        self.interact(move |conn| -> Result<MemberAccess, StorageError> {
            let Some(group) = active_group(conn, &group_id)? else {
                return Ok(MemberAccess::None);
            };
            if group.admin_id == user_id {
                return Ok(MemberAccess::Admin);
            }
            Ok(match active_membership(conn, &group_id, &user_id)? {
                Some(_) => MemberAccess::Member,
                None => MemberAccess::None,
            })
        })
        .await
    }
}

pub(crate) fn active_membership(
    conn: &mut SqliteConnection,
    group_id: &str,
    user_id: &str,
) -> QueryResult<Option<Membership>> {
    memberships::table
        .filter(memberships::group_id.eq(group_id))
        .filter(memberships::user_id.eq(user_id))
        .filter(memberships::status.eq(Status::Active.as_str()))
        .select(Membership::as_select())
        .first(conn)
        .optional()
}

pub(crate) fn active_group(
    conn: &mut SqliteConnection,
    group_id: &str,
) -> QueryResult<Option<Group>> {
    groups::table
        .filter(groups::id.eq(group_id))
        .filter(groups::status.eq(Status::Active.as_str()))
        .select(Group::as_select())
        .first(conn)
        .optional()
}
