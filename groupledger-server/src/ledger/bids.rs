use diesel::prelude::*;
use groupledger_shared::domain::Status;
use tracing::{debug, info};

use super::{LedgerError, MAX_BID_AMOUNT, NotOpenReason, active_membership};
use crate::storage::models::{Auction, Bid, NewBid};
use crate::storage::schema::{auctions, bids};
use crate::storage::{Store, is_unique_violation};

impl Store {
    /// Places a bid on an open auction and returns the new bid id.
    ///
    /// No points move here; the bidder's balance only has to cover the bid
    /// at the moment it is placed. Debiting happens when the auction closes.
    pub async fn place_bid(
        &self,
        auction_id: i32,
        group_id: &str,
        bidder_id: &str,
        amount: i32,
    ) -> Result<i32, LedgerError> {
        if !(0..=MAX_BID_AMOUNT).contains(&amount) {
            return Err(LedgerError::invalid(format!(
                "bid amount must be between 0 and {MAX_BID_AMOUNT}"
            )));
        }
        let group_id = group_id.to_string();
        let bidder_id = bidder_id.to_string();
        let clock = self.clock();
        self.interact(move |conn| {
            conn.immediate_transaction(|conn| -> Result<i32, LedgerError> {
                // Read after the write lock is taken, so a wait on the lock
                // cannot let a bid in after the auction ends.
                let now = clock.now();
                let auction = auctions::table
                    .find(auction_id)
                    .filter(auctions::group_id.eq(&group_id))
                    .filter(auctions::status.eq(Status::Active.as_str()))
                    .select(Auction::as_select())
                    .first(conn)
                    .optional()?
                    .ok_or(LedgerError::NotFound("auction"))?;

                if now < auction.start_time {
                    return Err(LedgerError::NotOpen(NotOpenReason::NotStarted));
                }
                if now > auction.end_time {
                    return Err(LedgerError::NotOpen(NotOpenReason::Ended));
                }

                let membership = active_membership(conn, &group_id, &bidder_id)?
                    .ok_or(LedgerError::NotAMember)?;
                if membership.points < amount {
                    return Err(LedgerError::InsufficientFunds {
                        available: membership.points,
                        required: amount,
                    });
                }

                let highest = bids::table
                    .filter(bids::auction_id.eq(auction_id))
                    .order((bids::amount.desc(), bids::bid_time.asc(), bids::id.asc()))
                    .select(Bid::as_select())
                    .first(conn)
                    .optional()?;
                let minimum = match &highest {
                    Some(top) if top.bidder_id == bidder_id => {
                        return Err(LedgerError::AlreadyHighestBidder);
                    }
                    Some(top) => top.amount.saturating_add(auction.bid_increment),
                    None => auction.minimum_bid,
                };
                if amount < minimum {
                    return Err(LedgerError::BidTooLow { minimum });
                }

                let bid_id = diesel::insert_into(bids::table)
                    .values(&NewBid {
                        auction_id,
                        bidder_id: &bidder_id,
                        amount,
                        bid_time: now,
                    })
                    .returning(bids::id)
                    .get_result::<i32>(conn)
                    .map_err(|e| {
                        if is_unique_violation(&e) {
                            debug!(auction_id, amount, "bid amount taken concurrently");
                            LedgerError::ConflictRetryHigher
                        } else {
                            e.into()
                        }
                    })?;
                info!(auction_id, bid_id, %bidder_id, amount, "bid placed");
                Ok(bid_id)
            })
        })
        .await
    }

    /// Bids on an auction of the group, highest first.
    pub async fn list_bids(
        &self,
        group_id: &str,
        auction_id: i32,
    ) -> Result<Vec<Bid>, LedgerError> {
        let group_id = group_id.to_string();
        self.interact(move |conn| -> Result<Vec<Bid>, LedgerError> {
            let found = auctions::table
                .find(auction_id)
                .filter(auctions::group_id.eq(&group_id))
                .select(auctions::id)
                .first::<i32>(conn)
                .optional()?;
            if found.is_none() {
                return Err(LedgerError::NotFound("auction"));
            }
            Ok(bids::table
                .filter(bids::auction_id.eq(auction_id))
                .order((bids::amount.desc(), bids::bid_time.asc(), bids::id.asc()))
                .select(Bid::as_select())
                .load(conn)?)
        })
        .await
    }
}
