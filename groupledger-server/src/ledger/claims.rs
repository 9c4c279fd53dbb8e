use std::collections::HashMap;

use chrono::NaiveDateTime;
use diesel::prelude::*;
use groupledger_shared::domain::{Decision, Status};
use tracing::info;

use super::members::active_group;
use super::{LedgerError, active_membership};
use crate::storage::models::{
    Claim, NewClaim, NewReview, NewSubmission, Review, Submission, Task,
};
use crate::storage::schema::{claims, memberships, reviews, submissions, tasks};
use crate::storage::{Store, is_unique_violation};

/// Result of grading a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradeOutcome {
    pub submission_id: i32,
    pub group_id: String,
    pub decision: Decision,
    /// Points credited to each recipient.
    pub awarded: i32,
    /// Author, then co-author, with their balances after grading.
    pub recipients: Vec<(String, i32)>,
}

/// Result of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub submission_id: i32,
    /// Set when the group accepts submissions without review.
    pub auto_graded: Option<GradeOutcome>,
}

/// A claim on a task together with its submission and review, if any.
#[derive(Debug, Clone)]
pub struct ClaimDetail {
    pub claim: Claim,
    pub submission: Option<Submission>,
    pub review: Option<Review>,
}

impl Store {
    /// Reserves one unit of a task for `claimant_id` and returns the claim id.
    pub async fn claim(
        &self,
        task_id: i32,
        group_id: &str,
        claimant_id: &str,
    ) -> Result<i32, LedgerError> {
        let group_id = group_id.to_string();
        let claimant_id = claimant_id.to_string();
        let clock = self.clock();
        self.interact(move |conn| {
            conn.immediate_transaction(|conn| -> Result<i32, LedgerError> {
                let now = clock.now();
                active_membership(conn, &group_id, &claimant_id)?.ok_or(LedgerError::NotAMember)?;

                let held = claims::table
                    .filter(claims::task_id.eq(task_id))
                    .filter(claims::claimant_id.eq(&claimant_id))
                    .filter(claims::released_at.is_null())
                    .select(claims::id)
                    .first::<i32>(conn)
                    .optional()?;
                if held.is_some() {
                    return Err(LedgerError::AlreadyClaimed);
                }

                let task = tasks::table
                    .find(task_id)
                    .filter(tasks::group_id.eq(&group_id))
                    .select(Task::as_select())
                    .first(conn)
                    .optional()?
                    .ok_or(LedgerError::NotFound("task"))?;
                if task.status != Status::Active.as_str() || task.quantity <= 0 {
                    return Err(LedgerError::Unavailable);
                }
                if is_past_due(&task, now) {
                    return Err(LedgerError::Expired);
                }

                let claim_id = diesel::insert_into(claims::table)
                    .values(&NewClaim {
                        task_id,
                        claimant_id: &claimant_id,
                        claimed_at: now,
                    })
                    .returning(claims::id)
                    .get_result::<i32>(conn)
                    .map_err(|e| {
                        if is_unique_violation(&e) {
                            LedgerError::AlreadyClaimed
                        } else {
                            e.into()
                        }
                    })?;

                let decremented = diesel::update(
                    tasks::table
                        .find(task_id)
                        .filter(tasks::quantity.gt(0)),
                )
                .set(tasks::quantity.eq(tasks::quantity - 1))
                .execute(conn)?;
                if decremented == 0 {
                    // Rolls back the claim insert.
                    return Err(LedgerError::Unavailable);
                }

                info!(task_id, claim_id, %claimant_id, remaining = task.quantity - 1, "task claimed");
                Ok(claim_id)
            })
        })
        .await
    }

    /// Releases an active claim and gives its unit back to the task.
    ///
    /// Only claims on an active task that have not been submitted can be
    /// released.
    pub async fn unclaim(&self, claim_id: i32, claimant_id: &str) -> Result<(), LedgerError> {
        let claimant_id = claimant_id.to_string();
        let clock = self.clock();
        self.interact(move |conn| {
            conn.immediate_transaction(|conn| -> Result<(), LedgerError> {
                let now = clock.now();
                let (claim, task) = claims::table
                    .inner_join(tasks::table)
                    .filter(claims::id.eq(claim_id))
                    .filter(claims::claimant_id.eq(&claimant_id))
                    .filter(claims::released_at.is_null())
                    .select((Claim::as_select(), Task::as_select()))
                    .first::<(Claim, Task)>(conn)
                    .optional()?
                    .ok_or(LedgerError::NoActiveClaim)?;
                if task.status != Status::Active.as_str() {
                    return Err(LedgerError::Unavailable);
                }
                let submitted = submissions::table
                    .filter(submissions::claim_id.eq(claim.id))
                    .select(submissions::id)
                    .first::<i32>(conn)
                    .optional()?;
                if submitted.is_some() {
                    return Err(LedgerError::AlreadySubmitted);
                }

                diesel::update(claims::table.find(claim.id))
                    .set(claims::released_at.eq(Some(now)))
                    .execute(conn)?;
                diesel::update(tasks::table.find(claim.task_id))
                    .set(tasks::quantity.eq(tasks::quantity + 1))
                    .execute(conn)?;

                info!(task_id = claim.task_id, claim_id, %claimant_id, "claim released");
                Ok(())
            })
        })
        .await
    }

    /// Records completion of a claimed task, optionally shared with a co-author.
    ///
    /// In auto-approving groups the submission is accepted on the spot, on
    /// behalf of the group admin, and points are credited in the same
    /// transaction.
    pub async fn submit(
        &self,
        group_id: &str,
        claim_id: i32,
        author_id: &str,
        co_author_id: Option<&str>,
    ) -> Result<SubmitOutcome, LedgerError> {
        if co_author_id == Some(author_id) {
            return Err(LedgerError::invalid("you cannot add yourself as co-author"));
        }
        let group_id = group_id.to_string();
        let author_id = author_id.to_string();
        let co_author_id = co_author_id.map(str::to_string);
        let clock = self.clock();
        self.interact(move |conn| {
            conn.immediate_transaction(|conn| -> Result<SubmitOutcome, LedgerError> {
                let now = clock.now();
                let claim = claims::table
                    .find(claim_id)
                    .filter(claims::claimant_id.eq(&author_id))
                    .filter(claims::released_at.is_null())
                    .select(Claim::as_select())
                    .first(conn)
                    .optional()?
                    .ok_or(LedgerError::NoActiveClaim)?;

                let task = tasks::table
                    .find(claim.task_id)
                    .select(Task::as_select())
                    .first(conn)?;
                if task.group_id != group_id {
                    return Err(LedgerError::NotFound("claim"));
                }
                if task.status != Status::Active.as_str() {
                    return Err(LedgerError::Unavailable);
                }
                if is_past_due(&task, now) {
                    return Err(LedgerError::Expired);
                }

                active_membership(conn, &group_id, &author_id)?.ok_or(LedgerError::NotAMember)?;
                if let Some(co) = &co_author_id
                    && active_membership(conn, &group_id, co)?.is_none()
                {
                    return Err(LedgerError::invalid(
                        "co-author is not an active member of the group",
                    ));
                }

                let existing = submissions::table
                    .filter(submissions::claim_id.eq(claim_id))
                    .select(submissions::id)
                    .first::<i32>(conn)
                    .optional()?;
                if existing.is_some() {
                    return Err(LedgerError::AlreadySubmitted);
                }

                let submission_id = diesel::insert_into(submissions::table)
                    .values(&NewSubmission {
                        task_id: task.id,
                        claim_id,
                        author_id: &author_id,
                        co_author_id: co_author_id.as_deref(),
                        submitted_at: now,
                        status: Status::Active.as_str(),
                    })
                    .returning(submissions::id)
                    .get_result::<i32>(conn)
                    .map_err(|e| {
                        if is_unique_violation(&e) {
                            LedgerError::AlreadySubmitted
                        } else {
                            e.into()
                        }
                    })?;
                info!(task_id = task.id, claim_id, submission_id, %author_id, "submission recorded");

                let group = active_group(conn, &group_id)?.ok_or(LedgerError::NotFound("group"))?;
                if !group.auto_approve {
                    return Ok(SubmitOutcome {
                        submission_id,
                        auto_graded: None,
                    });
                }
                record_review(
                    conn,
                    claim_id,
                    submission_id,
                    &group.admin_id,
                    Decision::Accept,
                    now,
                )?;
                let (awarded, recipients) = award(
                    conn,
                    &group_id,
                    &author_id,
                    co_author_id.as_deref(),
                    task.points,
                    Decision::Accept,
                )?;
                info!(submission_id, task_id = task.id, awarded, "submission auto-approved");
                Ok(SubmitOutcome {
                    submission_id,
                    auto_graded: Some(GradeOutcome {
                        submission_id,
                        group_id: group_id.clone(),
                        decision: Decision::Accept,
                        awarded,
                        recipients,
                    }),
                })
            })
        })
        .await
    }

    /// Reviews a submission. Accepting credits the task's points to the
    /// author, split evenly with a co-author when there is one.
    pub async fn grade_submission(
        &self,
        group_id: &str,
        submission_id: i32,
        reviewer_id: &str,
        decision: Decision,
    ) -> Result<GradeOutcome, LedgerError> {
        let group_id = group_id.to_string();
        let reviewer_id = reviewer_id.to_string();
        let clock = self.clock();
        self.interact(move |conn| {
            conn.immediate_transaction(|conn| -> Result<GradeOutcome, LedgerError> {
                let now = clock.now();
                let (submission, task) = submissions::table
                    .inner_join(tasks::table.on(tasks::id.eq(submissions::task_id)))
                    .filter(submissions::id.eq(submission_id))
                    .filter(submissions::status.eq(Status::Active.as_str()))
                    .filter(tasks::group_id.eq(&group_id))
                    .select((Submission::as_select(), Task::as_select()))
                    .first::<(Submission, Task)>(conn)
                    .optional()?
                    .ok_or(LedgerError::NotFound("submission"))?;

                let graded = reviews::table
                    .filter(reviews::submission_id.eq(submission_id))
                    .select(reviews::id)
                    .first::<i32>(conn)
                    .optional()?;
                if graded.is_some() {
                    return Err(LedgerError::AlreadyGraded);
                }

                record_review(
                    conn,
                    submission.claim_id,
                    submission_id,
                    &reviewer_id,
                    decision,
                    now,
                )?;
                let (awarded, recipients) = award(
                    conn,
                    &group_id,
                    &submission.author_id,
                    submission.co_author_id.as_deref(),
                    task.points,
                    decision,
                )?;

                info!(
                    submission_id,
                    task_id = task.id,
                    %reviewer_id,
                    decision = %decision,
                    awarded,
                    "submission graded"
                );
                Ok(GradeOutcome {
                    submission_id,
                    group_id: group_id.clone(),
                    decision,
                    awarded,
                    recipients,
                })
            })
        })
        .await
    }

    /// Every claim ever made on a task of the group, oldest first, with the
    /// active submission and its review.
    pub async fn task_claims(
        &self,
        group_id: &str,
        task_id: i32,
    ) -> Result<Vec<ClaimDetail>, LedgerError> {
        let group_id = group_id.to_string();
        self.interact(move |conn| -> Result<Vec<ClaimDetail>, LedgerError> {
            let found = tasks::table
                .find(task_id)
                .filter(tasks::group_id.eq(&group_id))
                .select(tasks::id)
                .first::<i32>(conn)
                .optional()?;
            if found.is_none() {
                return Err(LedgerError::NotFound("task"));
            }

            let rows: Vec<Claim> = claims::table
                .filter(claims::task_id.eq(task_id))
                .order(claims::id.asc())
                .select(Claim::as_select())
                .load(conn)?;
            let mut subs: HashMap<i32, Submission> = submissions::table
                .filter(submissions::task_id.eq(task_id))
                .filter(submissions::status.eq(Status::Active.as_str()))
                .select(Submission::as_select())
                .load(conn)?
                .into_iter()
                .map(|s| (s.claim_id, s))
                .collect();
            let claim_ids: Vec<i32> = rows.iter().map(|c| c.id).collect();
            let mut revs: HashMap<i32, Review> = reviews::table
                .filter(reviews::claim_id.eq_any(&claim_ids))
                .select(Review::as_select())
                .load(conn)?
                .into_iter()
                .map(|r| (r.claim_id, r))
                .collect();

            Ok(rows
                .into_iter()
                .map(|claim| {
                    let submission = subs.remove(&claim.id);
                    let review = submission.as_ref().and_then(|_| revs.remove(&claim.id));
                    ClaimDetail {
                        claim,
                        submission,
                        review,
                    }
                })
                .collect())
        })
        .await
    }
}

/// A task is past due from the instant its due date is reached.
fn is_past_due(task: &Task, now: NaiveDateTime) -> bool {
    task.due_date.is_some_and(|due| due <= now)
}

fn record_review(
    conn: &mut SqliteConnection,
    claim_id: i32,
    submission_id: i32,
    reviewer_id: &str,
    decision: Decision,
    now: NaiveDateTime,
) -> Result<(), LedgerError> {
    diesel::insert_into(reviews::table)
        .values(&NewReview {
            claim_id,
            submission_id,
            reviewer_id,
            decision: decision.as_str(),
            reviewed_at: now,
        })
        .execute(conn)
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerError::AlreadyGraded
            } else {
                e.into()
            }
        })?;
    Ok(())
}

/// Credits an accepted submission and returns the per-person award with each
/// recipient's resulting balance.
fn award(
    conn: &mut SqliteConnection,
    group_id: &str,
    author_id: &str,
    co_author_id: Option<&str>,
    task_points: i32,
    decision: Decision,
) -> QueryResult<(i32, Vec<(String, i32)>)> {
    let mut people = vec![author_id];
    people.extend(co_author_id);
    let awarded = match decision {
        Decision::Accept if people.len() > 1 => task_points / 2,
        Decision::Accept => task_points,
        Decision::Reject => 0,
    };

    let mut recipients = Vec::with_capacity(people.len());
    for user_id in people {
        let target = memberships::table
            .filter(memberships::user_id.eq(user_id))
            .filter(memberships::group_id.eq(group_id));
        let balance = if awarded > 0 {
            diesel::update(target)
                .set(memberships::points.eq(memberships::points + awarded))
                .returning(memberships::points)
                .get_result::<i32>(conn)
                .optional()?
        } else {
            target.select(memberships::points).first::<i32>(conn).optional()?
        };
        if let Some(balance) = balance {
            recipients.push((user_id.to_string(), balance));
        }
    }
    Ok((awarded, recipients))
}
