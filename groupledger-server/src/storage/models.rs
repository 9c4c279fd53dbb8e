use crate::storage::schema::{
    auction_winners, auctions, bids, claims, groups, memberships, reviews, submissions, tasks,
};
use chrono::NaiveDateTime;
use diesel::prelude::*;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = groups)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub admin_id: String,
    pub auto_approve: bool,
    pub task_points_min: Option<i32>,
    pub task_points_average: Option<i32>,
    pub task_points_max: Option<i32>,
    pub status: String,
}

#[derive(Insertable)]
#[diesel(table_name = groups)]
pub struct NewGroup<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub admin_id: &'a str,
    pub auto_approve: bool,
    pub task_points_min: Option<i32>,
    pub task_points_average: Option<i32>,
    pub task_points_max: Option<i32>,
    pub status: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = memberships)]
pub struct Membership {
    pub id: i32,
    pub user_id: String,
    pub group_id: String,
    pub points: i32,
    pub status: String,
    pub joined_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = memberships)]
pub struct NewMembership<'a> {
    pub user_id: &'a str,
    pub group_id: &'a str,
    pub points: i32,
    pub status: &'a str,
    pub joined_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = tasks)]
pub struct Task {
    pub id: i32,
    pub group_id: String,
    pub creator_id: String,
    pub name: String,
    pub points: i32,
    pub quantity: i32,
    pub due_date: Option<NaiveDateTime>,
    pub status: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTask<'a> {
    pub group_id: &'a str,
    pub creator_id: &'a str,
    pub name: &'a str,
    pub points: i32,
    pub quantity: i32,
    pub due_date: Option<NaiveDateTime>,
    pub status: &'a str,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = claims)]
#[diesel(belongs_to(Task, foreign_key = task_id))]
pub struct Claim {
    pub id: i32,
    pub task_id: i32,
    pub claimant_id: String,
    pub claimed_at: NaiveDateTime,
    pub released_at: Option<NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = claims)]
pub struct NewClaim<'a> {
    pub task_id: i32,
    pub claimant_id: &'a str,
    pub claimed_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = submissions)]
#[diesel(belongs_to(Claim, foreign_key = claim_id))]
pub struct Submission {
    pub id: i32,
    pub task_id: i32,
    pub claim_id: i32,
    pub author_id: String,
    pub co_author_id: Option<String>,
    pub submitted_at: NaiveDateTime,
    pub status: String,
}

#[derive(Insertable)]
#[diesel(table_name = submissions)]
pub struct NewSubmission<'a> {
    pub task_id: i32,
    pub claim_id: i32,
    pub author_id: &'a str,
    pub co_author_id: Option<&'a str>,
    pub submitted_at: NaiveDateTime,
    pub status: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = reviews)]
#[diesel(belongs_to(Submission, foreign_key = submission_id))]
pub struct Review {
    pub id: i32,
    pub claim_id: i32,
    pub submission_id: i32,
    pub reviewer_id: String,
    pub decision: String,
    pub reviewed_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = reviews)]
pub struct NewReview<'a> {
    pub claim_id: i32,
    pub submission_id: i32,
    pub reviewer_id: &'a str,
    pub decision: &'a str,
    pub reviewed_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = auctions)]
pub struct Auction {
    pub id: i32,
    pub group_id: String,
    pub creator_id: String,
    pub reward_name: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub minimum_bid: i32,
    pub bid_increment: i32,
    pub status: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = auctions)]
pub struct NewAuction<'a> {
    pub group_id: &'a str,
    pub creator_id: &'a str,
    pub reward_name: &'a str,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub minimum_bid: i32,
    pub bid_increment: i32,
    pub status: &'a str,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = bids)]
#[diesel(belongs_to(Auction, foreign_key = auction_id))]
pub struct Bid {
    pub id: i32,
    pub auction_id: i32,
    pub bidder_id: String,
    pub amount: i32,
    pub bid_time: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = bids)]
pub struct NewBid<'a> {
    pub auction_id: i32,
    pub bidder_id: &'a str,
    pub amount: i32,
    pub bid_time: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = auction_winners)]
#[diesel(belongs_to(Auction, foreign_key = auction_id))]
pub struct AuctionWinner {
    pub id: i32,
    pub auction_id: i32,
    pub winner_id: String,
    pub winning_bid: i32,
    pub notified: bool,
    pub finalized_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = auction_winners)]
pub struct NewAuctionWinner<'a> {
    pub auction_id: i32,
    pub winner_id: &'a str,
    pub winning_bid: i32,
    pub notified: bool,
    pub finalized_at: NaiveDateTime,
}
