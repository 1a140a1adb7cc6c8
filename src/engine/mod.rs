//! Core engine — round state machine, wager ledger, and the session
//! context that ties them to the market signal.

pub mod ledger;
pub mod round;
pub mod session;
