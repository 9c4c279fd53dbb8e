use chrono::{Months, NaiveDateTime, TimeDelta};
use diesel::prelude::*;
use groupledger_shared::domain::{Difficulty, Status};
use serde::Deserialize;
use tracing::info;

use super::members::active_group;
use super::{LedgerError, validate_name};
use crate::storage::Store;
use crate::storage::models::{Group, NewTask, Task};
use crate::storage::schema::{claims, submissions, tasks};

/// Largest reward a single task may carry.
const MAX_TASK_POINTS: i32 = 10_000;

/// Parameters for a new task, as supplied by a group admin.
///
/// Either `points` or `difficulty` must be set. Explicit points win.
#[derive(Debug, Clone)]
pub struct NewTaskSpec {
    pub name: String,
    pub points: Option<i32>,
    pub difficulty: Option<Difficulty>,
    pub quantity: i32,
    pub due_date: Option<NaiveDateTime>,
}

impl NewTaskSpec {
    fn validate(&self, now: NaiveDateTime) -> Result<String, LedgerError> {
        let name = validate_name("Task name", &self.name)?;
        if self.quantity < 1 {
            return Err(LedgerError::invalid("quantity must be at least 1"));
        }
        if self.quantity > 1000 {
            return Err(LedgerError::invalid("quantity cannot exceed 1000"));
        }
        match (self.points, self.difficulty) {
            (Some(points), _) if points < 0 => {
                return Err(LedgerError::invalid("points cannot be negative"));
            }
            (Some(points), _) if points > MAX_TASK_POINTS => {
                return Err(LedgerError::invalid(format!(
                    "points cannot exceed {MAX_TASK_POINTS}"
                )));
            }
            (None, None) => {
                return Err(LedgerError::invalid(
                    "either points or difficulty must be specified",
                ));
            }
            _ => {}
        }
        if let Some(due) = self.due_date {
            if due < now - TimeDelta::minutes(1) {
                return Err(LedgerError::invalid("due date cannot be in the past"));
            }
            let horizon = now.checked_add_months(Months::new(12)).unwrap_or(now);
            if due > horizon {
                return Err(LedgerError::invalid(
                    "due date cannot be more than 1 year in the future",
                ));
            }
        }
        Ok(name)
    }
}

/// A group's task point bounds. Any bound may be left unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TaskPointRange {
    #[serde(default)]
    pub min: Option<i32>,
    #[serde(default)]
    pub average: Option<i32>,
    #[serde(default)]
    pub max: Option<i32>,
}

impl TaskPointRange {
    /// Checks that set bounds are non-negative and ordered min <= average <= max.
    pub fn check(&self) -> Result<(), String> {
        for (label, bound) in [
            ("minimum", self.min),
            ("average", self.average),
            ("maximum", self.max),
        ] {
            match bound {
                Some(v) if v < 0 => return Err(format!("{label} points cannot be negative")),
                Some(v) if v > MAX_TASK_POINTS => {
                    return Err(format!("{label} points cannot exceed {MAX_TASK_POINTS}"));
                }
                _ => {}
            }
        }
        if let (Some(min), Some(avg)) = (self.min, self.average)
            && min > avg
        {
            return Err("minimum points cannot be greater than average points".into());
        }
        if let (Some(avg), Some(max)) = (self.average, self.max)
            && avg > max
        {
            return Err("average points cannot be greater than maximum points".into());
        }
        if let (Some(min), Some(max)) = (self.min, self.max)
            && min > max
        {
            return Err("minimum points cannot be greater than maximum points".into());
        }
        Ok(())
    }

    /// Points for a new task. Explicit points must sit inside the set bounds;
    /// otherwise the difficulty picks min, average or max.
    pub(crate) fn resolve(
        &self,
        points: Option<i32>,
        difficulty: Option<Difficulty>,
    ) -> Result<i32, LedgerError> {
        if let Some(points) = points {
            if let Some(max) = self.max
                && points > max
            {
                return Err(LedgerError::invalid(format!(
                    "task points exceed the group maximum of {max}"
                )));
            }
            if let Some(min) = self.min
                && points < min
            {
                return Err(LedgerError::invalid(format!(
                    "task points are below the group minimum of {min}"
                )));
            }
            return Ok(points);
        }
        let Some(difficulty) = difficulty else {
            return Err(LedgerError::invalid(
                "either points or difficulty must be specified",
            ));
        };
        let (Some(min), Some(average), Some(max)) = (self.min, self.average, self.max) else {
            return Err(LedgerError::invalid(
                "the group needs a task point range to price tasks by difficulty",
            ));
        };
        Ok(match difficulty {
            Difficulty::Easy => min,
            Difficulty::Average => average,
            Difficulty::Hard => max,
        })
    }
}

impl From<&Group> for TaskPointRange {
    fn from(g: &Group) -> Self {
        Self {
            min: g.task_points_min,
            average: g.task_points_average,
            max: g.task_points_max,
        }
    }
}

impl Store {
    pub async fn create_task(
        &self,
        group_id: &str,
        creator_id: &str,
        spec: NewTaskSpec,
    ) -> Result<Task, LedgerError> {
        let now = self.now();
        let name = spec.validate(now)?;
        let group_id = group_id.to_string();
        let creator_id = creator_id.to_string();
        self.interact(move |conn| {
            conn.immediate_transaction(|conn| -> Result<Task, LedgerError> {
                let group = active_group(conn, &group_id)?.ok_or(LedgerError::NotFound("group"))?;
                let points = TaskPointRange::from(&group).resolve(spec.points, spec.difficulty)?;
                let task = diesel::insert_into(tasks::table)
                    .values(&NewTask {
                        group_id: &group_id,
                        creator_id: &creator_id,
                        name: &name,
                        points,
                        quantity: spec.quantity,
                        due_date: spec.due_date,
                        status: Status::Active.as_str(),
                        created_at: now,
                    })
                    .returning(Task::as_returning())
                    .get_result(conn)?;
                info!(task_id = task.id, %group_id, points, quantity = task.quantity, "task created");
                Ok(task)
            })
        })
        .await
    }

    /// Retires a task: releases every open claim and retires its submissions.
    pub async fn delete_task(&self, group_id: &str, task_id: i32) -> Result<(), LedgerError> {
        let group_id = group_id.to_string();
        let clock = self.clock();
        self.interact(move |conn| {
            conn.immediate_transaction(|conn| -> Result<(), LedgerError> {
                let now = clock.now();
                let updated = diesel::update(
                    tasks::table
                        .find(task_id)
                        .filter(tasks::group_id.eq(&group_id))
                        .filter(tasks::status.eq(Status::Active.as_str())),
                )
                .set(tasks::status.eq(Status::Inactive.as_str()))
                .execute(conn)?;
                if updated == 0 {
                    return Err(LedgerError::NotFound("task"));
                }
                let released = diesel::update(
                    claims::table
                        .filter(claims::task_id.eq(task_id))
                        .filter(claims::released_at.is_null()),
                )
                .set(claims::released_at.eq(Some(now)))
                .execute(conn)?;
                diesel::update(submissions::table.filter(submissions::task_id.eq(task_id)))
                    .set(submissions::status.eq(Status::Inactive.as_str()))
                    .execute(conn)?;
                info!(task_id, %group_id, released, "task deleted");
                Ok(())
            })
        })
        .await
    }

    pub async fn list_active_tasks(&self, group_id: &str) -> Result<Vec<Task>, LedgerError> {
        let group_id = group_id.to_string();
        self.interact(move |conn| -> Result<Vec<Task>, LedgerError> {
            Ok(tasks::table
                .filter(tasks::group_id.eq(&group_id))
                .filter(tasks::status.eq(Status::Active.as_str()))
                .order(tasks::id.asc())
                .select(Task::as_select())
                .load(conn)?)
        })
        .await
    }

    /// Loads a task of the group in any state.
    pub async fn get_task(&self, group_id: &str, task_id: i32) -> Result<Task, LedgerError> {
        let group_id = group_id.to_string();
        self.interact(move |conn| -> Result<Task, LedgerError> {
            tasks::table
                .find(task_id)
                .filter(tasks::group_id.eq(&group_id))
                .select(Task::as_select())
                .first(conn)
                .optional()?
                .ok_or(LedgerError::NotFound("task"))
        })
        .await
    }
}
