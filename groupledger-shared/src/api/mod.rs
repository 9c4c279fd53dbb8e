use serde::{Deserialize, Serialize};

use crate::domain::{Decision, Difficulty, Status};

// Membership
#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceDto {
    pub group_id: String,
    pub user_id: String,
    pub points: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MemberDto {
    pub user_id: String,
    pub points: i32,
}

// Tasks
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTaskReq {
    pub name: String,
    /// Explicit reward. When absent, `difficulty` prices the task from the
    /// group's point range.
    pub points: Option<i32>,
    pub difficulty: Option<Difficulty>,
    pub quantity: i32,
    pub due_date: Option<String>, // RFC3339
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskDto {
    pub id: i32,
    pub name: String,
    pub points: i32,
    pub quantity: i32,
    pub due_date: Option<String>, // RFC3339 UTC
    pub status: Status,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimResp {
    pub claim_id: i32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SubmitReq {
    pub co_author_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResp {
    pub submission_id: i32,
    /// True when the group accepted the submission without review.
    pub auto_approved: bool,
    pub awarded: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GradeReq {
    pub decision: Decision,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GradeResp {
    pub decision: Decision,
    pub awarded: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmissionDto {
    pub submission_id: i32,
    pub author_id: String,
    pub co_author_id: Option<String>,
    pub submitted_at: String, // RFC3339 UTC
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReviewDto {
    pub reviewer_id: String,
    pub decision: Decision,
    pub reviewed_at: String, // RFC3339 UTC
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimDto {
    pub claim_id: i32,
    pub claimant_id: String,
    pub claimed_at: String,          // RFC3339 UTC
    pub released_at: Option<String>, // RFC3339 UTC
    pub submission: Option<SubmissionDto>,
    pub review: Option<ReviewDto>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskClaimsDto {
    pub task: TaskDto,
    pub claims: Vec<ClaimDto>,
}

// Auctions
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateAuctionReq {
    pub reward_name: String,
    #[serde(default)]
    pub start_now: bool,
    pub start_time: Option<String>, // RFC3339, required unless start_now
    pub end_time: String,           // RFC3339
    pub minimum_bid: Option<i32>,
    pub bid_increment: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuctionDto {
    pub id: i32,
    pub reward_name: String,
    pub start_time: String,
    pub end_time: String,
    pub minimum_bid: i32,
    pub bid_increment: i32,
    pub status: Status,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BidReq {
    pub amount: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BidResp {
    pub bid_id: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BidDto {
    pub bid_id: i32,
    pub bidder_id: String,
    pub amount: i32,
    pub bid_time: String, // RFC3339 UTC
}

/// An auction with its bids, highest first.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuctionBidsDto {
    pub auction: AuctionDto,
    pub bids: Vec<BidDto>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuctionWinnerDto {
    pub auction_id: i32,
    pub winner_id: String,
    pub winning_bid: i32,
    pub finalized_at: String, // RFC3339 UTC
}

/// Events handed to the notification collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    AuctionWon {
        user_id: String,
        group_id: String,
        auction_id: i32,
        winning_bid: i32,
    },
    TasksOverdue {
        group_id: String,
        task_id: i32,
        claimants: Vec<String>,
    },
    SubmissionGraded {
        user_id: String,
        group_id: String,
        submission_id: i32,
        accepted: bool,
        awarded: i32,
        balance: i32,
    },
}
