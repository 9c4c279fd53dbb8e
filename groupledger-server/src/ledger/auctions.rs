use chrono::{Months, NaiveDateTime, TimeDelta};
use diesel::prelude::*;
use groupledger_shared::domain::Status;
use tracing::info;

use super::{LedgerError, validate_name};
use crate::storage::Store;
use crate::storage::models::{Auction, AuctionWinner, NewAuction};
use crate::storage::schema::{auction_winners, auctions};

/// Parameters for a new auction, as supplied by a group admin.
#[derive(Debug, Clone)]
pub struct NewAuctionSpec {
    pub reward_name: String,
    /// Open immediately; `start_time` is ignored.
    pub start_now: bool,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: NaiveDateTime,
    pub minimum_bid: Option<i32>,
    pub bid_increment: Option<i32>,
}

struct ValidAuction {
    reward_name: String,
    start_time: NaiveDateTime,
    end_time: NaiveDateTime,
    minimum_bid: i32,
    bid_increment: i32,
}

impl NewAuctionSpec {
    fn validate(&self, now: NaiveDateTime) -> Result<ValidAuction, LedgerError> {
        let reward_name = validate_name("Reward name", &self.reward_name)?;
        let slack = now - TimeDelta::minutes(1);
        let start_time = match (self.start_now, self.start_time) {
            (true, _) => now,
            (false, Some(start)) if start < slack => {
                return Err(LedgerError::invalid("start time cannot be in the past"));
            }
            (false, Some(start)) => start,
            (false, None) => {
                return Err(LedgerError::invalid(
                    "start time is required unless the auction starts now",
                ));
            }
        };
        let end_time = self.end_time;
        if end_time < start_time {
            return Err(LedgerError::invalid("end time must be after start time"));
        }
        if end_time < slack {
            return Err(LedgerError::invalid("end time cannot be in the past"));
        }
        let horizon = now.checked_add_months(Months::new(1)).unwrap_or(now);
        if end_time > horizon {
            return Err(LedgerError::invalid(
                "end time cannot be more than 1 month in the future",
            ));
        }
        if end_time < start_time + TimeDelta::minutes(5) {
            return Err(LedgerError::invalid(
                "auction must run for at least 5 minutes",
            ));
        }

        let minimum_bid = self.minimum_bid.unwrap_or(0);
        if !(0..=100_000).contains(&minimum_bid) {
            return Err(LedgerError::invalid(
                "minimum bid must be between 0 and 100000 points",
            ));
        }
        let bid_increment = self.bid_increment.unwrap_or(1);
        if !(1..=10_000).contains(&bid_increment) {
            return Err(LedgerError::invalid(
                "bid increment must be between 1 and 10000 points",
            ));
        }
        Ok(ValidAuction {
            reward_name,
            start_time,
            end_time,
            minimum_bid,
            bid_increment,
        })
    }
}

impl Store {
    pub async fn create_auction(
        &self,
        group_id: &str,
        creator_id: &str,
        spec: NewAuctionSpec,
    ) -> Result<Auction, LedgerError> {
        let now = self.now();
        let valid = spec.validate(now)?;
        let group_id = group_id.to_string();
        let creator_id = creator_id.to_string();
        self.interact(move |conn| -> Result<Auction, LedgerError> {
            let auction = diesel::insert_into(auctions::table)
                .values(&NewAuction {
                    group_id: &group_id,
                    creator_id: &creator_id,
                    reward_name: &valid.reward_name,
                    start_time: valid.start_time,
                    end_time: valid.end_time,
                    minimum_bid: valid.minimum_bid,
                    bid_increment: valid.bid_increment,
                    status: Status::Active.as_str(),
                    created_at: now,
                })
                .returning(Auction::as_returning())
                .get_result(conn)?;
            info!(
                auction_id = auction.id,
                %group_id,
                end_time = %auction.end_time,
                "auction created"
            );
            Ok(auction)
        })
        .await
    }

    /// Withdraws an open auction. No winner is recorded and no points move.
    pub async fn delete_auction(&self, group_id: &str, auction_id: i32) -> Result<(), LedgerError> {
        let group_id = group_id.to_string();
        self.interact(move |conn| -> Result<(), LedgerError> {
            let updated = diesel::update(
                auctions::table
                    .find(auction_id)
                    .filter(auctions::group_id.eq(&group_id))
                    .filter(auctions::status.eq(Status::Active.as_str())),
            )
            .set(auctions::status.eq(Status::Inactive.as_str()))
            .execute(conn)?;
            if updated == 0 {
                return Err(LedgerError::NotFound("auction"));
            }
            info!(auction_id, %group_id, "auction deleted");
            Ok(())
        })
        .await
    }

    pub async fn list_active_auctions(&self, group_id: &str) -> Result<Vec<Auction>, LedgerError> {
        let group_id = group_id.to_string();
        self.interact(move |conn| -> Result<Vec<Auction>, LedgerError> {
            Ok(auctions::table
                .filter(auctions::group_id.eq(&group_id))
                .filter(auctions::status.eq(Status::Active.as_str()))
                .order(auctions::end_time.asc())
                .select(Auction::as_select())
                .load(conn)?)
        })
        .await
    }

    /// Loads an auction of the group in any state.
    pub async fn get_auction(
        &self,
        group_id: &str,
        auction_id: i32,
    ) -> Result<Auction, LedgerError> {
        let group_id = group_id.to_string();
        self.interact(move |conn| -> Result<Auction, LedgerError> {
            auctions::table
                .find(auction_id)
                .filter(auctions::group_id.eq(&group_id))
                .select(Auction::as_select())
                .first(conn)
                .optional()?
                .ok_or(LedgerError::NotFound("auction"))
        })
        .await
    }

    pub async fn get_auction_winner(
        &self,
        group_id: &str,
        auction_id: i32,
    ) -> Result<AuctionWinner, LedgerError> {
        let group_id = group_id.to_string();
        self.interact(move |conn| -> Result<AuctionWinner, LedgerError> {
            auction_winners::table
                .inner_join(auctions::table)
                .filter(auction_winners::auction_id.eq(auction_id))
                .filter(auctions::group_id.eq(&group_id))
                .select(AuctionWinner::as_select())
                .first(conn)
                .optional()?
                .ok_or(LedgerError::NotFound("winner"))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> NaiveDateTime {
        chrono::DateTime::from_timestamp(1_800_000_000, 0)
            .unwrap()
            .naive_utc()
    }

    fn spec(now: NaiveDateTime) -> NewAuctionSpec {
        NewAuctionSpec {
            reward_name: "Movie night".into(),
            start_now: true,
            start_time: None,
            end_time: now + TimeDelta::hours(1),
            minimum_bid: None,
            bid_increment: None,
        }
    }

    #[test]
    fn defaults_apply_when_bids_are_unset() {
        let t = now();
        let v = spec(t).validate(t).unwrap();
        assert_eq!(v.start_time, t);
        assert_eq!(v.minimum_bid, 0);
        assert_eq!(v.bid_increment, 1);
    }

    #[test]
    fn window_rules_are_enforced() {
        let t = now();
        let short = NewAuctionSpec {
            end_time: t + TimeDelta::minutes(4),
            ..spec(t)
        };
        assert!(short.validate(t).is_err());

        let too_far = NewAuctionSpec {
            end_time: t + TimeDelta::days(40),
            ..spec(t)
        };
        assert!(too_far.validate(t).is_err());

        let missing_start = NewAuctionSpec {
            start_now: false,
            ..spec(t)
        };
        assert!(missing_start.validate(t).is_err());

        let stale_start = NewAuctionSpec {
            start_now: false,
            start_time: Some(t - TimeDelta::minutes(10)),
            ..spec(t)
        };
        assert!(stale_start.validate(t).is_err());

        let scheduled = NewAuctionSpec {
            start_now: false,
            start_time: Some(t + TimeDelta::hours(1)),
            end_time: t + TimeDelta::hours(3),
            ..spec(t)
        };
        assert_eq!(scheduled.validate(t).unwrap().start_time, t + TimeDelta::hours(1));
    }

    #[test]
    fn bid_parameters_are_bounded() {
        let t = now();
        let zero_step = NewAuctionSpec {
            bid_increment: Some(0),
            ..spec(t)
        };
        assert!(zero_step.validate(t).is_err());
        let huge_floor = NewAuctionSpec {
            minimum_bid: Some(100_001),
            ..spec(t)
        };
        assert!(huge_floor.validate(t).is_err());
    }
}
