use std::collections::HashSet;

use diesel::prelude::*;
use groupledger_shared::api::LedgerEvent;
use groupledger_shared::domain::Status;
use tracing::{debug, info, warn};

use super::SweepReport;
use crate::ledger::LedgerError;
use crate::notify::Notifications;
use crate::storage::models::{Claim, Task};
use crate::storage::schema::{claims, memberships, submissions, tasks};
use crate::storage::{StorageError, Store};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Task closed; `released` lists the claimants whose claims were abandoned.
    Closed {
        task_id: i32,
        group_id: String,
        released: Vec<String>,
    },
    Skipped {
        task_id: i32,
    },
}

/// One pass of the task finalization sweeper.
pub async fn run_task_sweep(store: &Store, notifications: &Notifications) -> SweepReport {
    let mut report = SweepReport::default();
    let due = match store.overdue_task_ids().await {
        Ok(ids) => ids,
        Err(err) => {
            warn!(error = %err, "task sweep: failed to list overdue tasks");
            report.failed = 1;
            return report;
        }
    };
    report.examined = due.len();
    for task_id in due {
        match store.finalize_task(task_id).await {
            Ok(TaskOutcome::Closed {
                task_id,
                group_id,
                released,
            }) => {
                info!(task_id, %group_id, released = released.len(), "task closed");
                report.finalized += 1;
                if !released.is_empty() {
                    notifications.dispatch_event(
                        store.clone(),
                        LedgerEvent::TasksOverdue {
                            group_id,
                            task_id,
                            claimants: released,
                        },
                    );
                }
            }
            Ok(TaskOutcome::Skipped { task_id }) => {
                debug!(task_id, "task no longer eligible");
            }
            Err(err) => {
                warn!(task_id, error = %err, "task sweep: finalization failed");
                report.failed += 1;
            }
        }
    }
    report
}

impl Store {
    /// Active tasks whose due date has passed.
    pub async fn overdue_task_ids(&self) -> Result<Vec<i32>, StorageError> {
        let now = self.now();
        self.interact(move |conn| -> Result<Vec<i32>, StorageError> {
            Ok(tasks::table
                .filter(tasks::status.eq(Status::Active.as_str()))
                .filter(tasks::due_date.is_not_null())
                .filter(tasks::due_date.le(now))
                .order(tasks::id.asc())
                .select(tasks::id)
                .load(conn)?)
        })
        .await
    }

    /// Closes one overdue task, releasing claims that were never submitted.
    ///
    /// Released claims do not give quantity back since the task is closing.
    pub async fn finalize_task(&self, task_id: i32) -> Result<TaskOutcome, LedgerError> {
        let clock = self.clock();
        self.interact(move |conn| {
            conn.immediate_transaction(|conn| -> Result<TaskOutcome, LedgerError> {
                let now = clock.now();
                let task = tasks::table
                    .find(task_id)
                    .select(Task::as_select())
                    .first(conn)
                    .optional()?;
                let Some(task) = task else {
                    return Ok(TaskOutcome::Skipped { task_id });
                };
                let overdue = task.due_date.is_some_and(|due| due <= now);
                if task.status != Status::Active.as_str() || !overdue {
                    return Ok(TaskOutcome::Skipped { task_id });
                }

                let open: Vec<Claim> = claims::table
                    .filter(claims::task_id.eq(task_id))
                    .filter(claims::released_at.is_null())
                    .select(Claim::as_select())
                    .load(conn)?;
                let submitted: HashSet<i32> = submissions::table
                    .filter(submissions::task_id.eq(task_id))
                    .select(submissions::claim_id)
                    .load::<i32>(conn)?
                    .into_iter()
                    .collect();
                let active: HashSet<String> = memberships::table
                    .filter(memberships::group_id.eq(&task.group_id))
                    .filter(memberships::status.eq(Status::Active.as_str()))
                    .select(memberships::user_id)
                    .load::<String>(conn)?
                    .into_iter()
                    .collect();

                let (ids, released): (Vec<i32>, Vec<String>) = open
                    .into_iter()
                    .filter(|c| !submitted.contains(&c.id) && active.contains(&c.claimant_id))
                    .map(|c| (c.id, c.claimant_id))
                    .unzip();

                if !ids.is_empty() {
                    diesel::update(claims::table.filter(claims::id.eq_any(&ids)))
                        .set(claims::released_at.eq(Some(now)))
                        .execute(conn)?;
                }
                diesel::update(tasks::table.find(task_id))
                    .set(tasks::status.eq(Status::Inactive.as_str()))
                    .execute(conn)?;

                Ok(TaskOutcome::Closed {
                    task_id,
                    group_id: task.group_id,
                    released,
                })
            })
        })
        .await
    }
}
