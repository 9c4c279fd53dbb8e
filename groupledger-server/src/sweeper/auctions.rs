use diesel::prelude::*;
use groupledger_shared::api::LedgerEvent;
use groupledger_shared::domain::Status;
use tracing::{debug, info, warn};

use super::SweepReport;
use crate::ledger::LedgerError;
use crate::notify::Notifications;
use crate::storage::models::{Auction, Bid, NewAuctionWinner};
use crate::storage::schema::{auction_winners, auctions, bids, memberships};
use crate::storage::{StorageError, Store};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuctionOutcome {
    /// The highest solvent bidder was debited and recorded as winner.
    Won {
        auction_id: i32,
        group_id: String,
        winner_id: String,
        winning_bid: i32,
        balance: i32,
    },
    /// Closed without a winner: no bids, or no bidder could still pay.
    NoWinner { auction_id: i32 },
    /// A winner row already existed; the auction was only closed.
    AlreadyResolved { auction_id: i32 },
    /// No longer active or not yet ended.
    Skipped { auction_id: i32 },
}

/// One pass of the auction finalization sweeper.
pub async fn run_auction_sweep(store: &Store, notifications: &Notifications) -> SweepReport {
    let mut report = SweepReport::default();
    let due = match store.ended_auction_ids().await {
        Ok(ids) => ids,
        Err(err) => {
            warn!(error = %err, "auction sweep: failed to list ended auctions");
            report.failed = 1;
            return report;
        }
    };
    report.examined = due.len();
    for auction_id in due {
        match store.finalize_auction(auction_id).await {
            Ok(AuctionOutcome::Won {
                auction_id,
                group_id,
                winner_id,
                winning_bid,
                balance,
            }) => {
                info!(auction_id, %group_id, %winner_id, winning_bid, balance, "auction won");
                report.finalized += 1;
                notifications.dispatch_event(
                    store.clone(),
                    LedgerEvent::AuctionWon {
                        user_id: winner_id,
                        group_id,
                        auction_id,
                        winning_bid,
                    },
                );
            }
            Ok(AuctionOutcome::NoWinner { auction_id }) => {
                info!(auction_id, "auction closed without a winner");
                report.finalized += 1;
            }
            Ok(AuctionOutcome::AlreadyResolved { auction_id }) => {
                debug!(auction_id, "auction already had a winner; closed");
                report.finalized += 1;
            }
            Ok(AuctionOutcome::Skipped { auction_id }) => {
                debug!(auction_id, "auction no longer eligible");
            }
            Err(err) => {
                warn!(auction_id, error = %err, "auction sweep: finalization failed");
                report.failed += 1;
            }
        }
    }
    report
}

impl Store {
    /// Active auctions whose end time has passed.
    pub async fn ended_auction_ids(&self) -> Result<Vec<i32>, StorageError> {
        let now = self.now();
        self.interact(move |conn| -> Result<Vec<i32>, StorageError> {
            Ok(auctions::table
                .filter(auctions::status.eq(Status::Active.as_str()))
                .filter(auctions::end_time.le(now))
                .order(auctions::end_time.asc())
                .select(auctions::id)
                .load(conn)?)
        })
        .await
    }

    /// Resolves one ended auction in a single transaction.
    ///
    /// Bidders are walked from the highest bid down (earliest first on equal
    /// amounts) and the first whose current balance covers the bid wins.
    pub async fn finalize_auction(&self, auction_id: i32) -> Result<AuctionOutcome, LedgerError> {
        let clock = self.clock();
        self.interact(move |conn| {
            conn.immediate_transaction(|conn| -> Result<AuctionOutcome, LedgerError> {
                let now = clock.now();
                let auction = auctions::table
                    .find(auction_id)
                    .select(Auction::as_select())
                    .first(conn)
                    .optional()?;
                let Some(auction) = auction else {
                    return Ok(AuctionOutcome::Skipped { auction_id });
                };
                if auction.status != Status::Active.as_str() || auction.end_time > now {
                    return Ok(AuctionOutcome::Skipped { auction_id });
                }

                let existing = auction_winners::table
                    .filter(auction_winners::auction_id.eq(auction_id))
                    .select(auction_winners::id)
                    .first::<i32>(conn)
                    .optional()?;
                if existing.is_some() {
                    close_auction(conn, auction_id)?;
                    return Ok(AuctionOutcome::AlreadyResolved { auction_id });
                }

                let candidates: Vec<(Bid, i32)> = bids::table
                    .inner_join(memberships::table.on(memberships::user_id.eq(bids::bidder_id)))
                    .filter(bids::auction_id.eq(auction_id))
                    .filter(memberships::group_id.eq(&auction.group_id))
                    .filter(memberships::status.eq(Status::Active.as_str()))
                    .order((bids::amount.desc(), bids::bid_time.asc(), bids::id.asc()))
                    .select((Bid::as_select(), memberships::points))
                    .load(conn)?;

                let Some((bid, _)) = candidates
                    .into_iter()
                    .find(|(bid, points)| *points >= bid.amount)
                else {
                    close_auction(conn, auction_id)?;
                    return Ok(AuctionOutcome::NoWinner { auction_id });
                };

                let balance = diesel::update(
                    memberships::table
                        .filter(memberships::user_id.eq(&bid.bidder_id))
                        .filter(memberships::group_id.eq(&auction.group_id))
                        .filter(memberships::points.ge(bid.amount)),
                )
                .set(memberships::points.eq(memberships::points - bid.amount))
                .returning(memberships::points)
                .get_result::<i32>(conn)?;

                diesel::insert_into(auction_winners::table)
                    .values(&NewAuctionWinner {
                        auction_id,
                        winner_id: &bid.bidder_id,
                        winning_bid: bid.amount,
                        notified: false,
                        finalized_at: now,
                    })
                    .execute(conn)?;
                close_auction(conn, auction_id)?;

                Ok(AuctionOutcome::Won {
                    auction_id,
                    group_id: auction.group_id,
                    winner_id: bid.bidder_id,
                    winning_bid: bid.amount,
                    balance,
                })
            })
        })
        .await
    }

    pub async fn mark_winner_notified(&self, auction_id: i32) -> Result<(), StorageError> {
        self.interact(move |conn| -> Result<(), StorageError> {
            diesel::update(
                auction_winners::table.filter(auction_winners::auction_id.eq(auction_id)),
            )
            .set(auction_winners::notified.eq(true))
            .execute(conn)?;
            Ok(())
        })
        .await
    }
}

fn close_auction(conn: &mut SqliteConnection, auction_id: i32) -> QueryResult<usize> {
    diesel::update(auctions::table.find(auction_id))
        .set(auctions::status.eq(Status::Inactive.as_str()))
        .execute(conn)
}
