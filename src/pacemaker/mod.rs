/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! View progression, view timeouts, and leader selection.
//!
//! # Views
//!
//! Within an epoch, consensus proceeds in views `1, 2, 3, ...` (view 0 belongs to the epoch's genesis
//! vertex). In every view, one validator, the view's **leader**, proposes a vertex that extends the
//! highest certified vertex it knows of. Every validator that accepts the proposal sends its vote to
//! the leader of the *next* view, which can then justify its own proposal with the quorum certificate
//! formed out of those votes.
//!
//! A replica leaves a view in one of two ways:
//! 1. **Progress**: it sees a quorum certificate (inside a proposal, a timeout vote, or formed out of
//!    votes it collected) or a timeout certificate for the current view or a higher one. It then
//!    fast-forwards to the view after the one the certificate closes. This keeps replicas as fast as the
//!    network allows.
//! 2. **Timeout**: its view timer fires before it could vote. It then broadcasts a
//!    [`TimeoutVote`](messages::TimeoutVote) for the view, and re-broadcasts it every time the timer
//!    fires again. Once a quorum of timeout votes forms a timeout certificate, everyone who sees it moves
//!    on, and the next leader attaches the certificate to its proposal.
//!
//! A replica that timed out a view never votes for a proposal in that view afterwards.
//!
//! # Timeout back-off
//!
//! View timeouts grow exponentially with the number of views since the last commit, up to a cap. See
//! [`PacemakerConfig`](types::PacemakerConfig). Growing timeouts guarantee that, once the network
//! becomes synchronous, views eventually last long enough for an honest leader to get a vertex
//! certified.
//!
//! # Leader Selection
//!
//! Leaders are selected according to Interleaved Weighted Round Robin algorithm. This ensures that:
//! 1. The frequency with which a validator is selected as a leader is proportional to the validator's
//!    power,
//! 2. Validators are selected as leaders in an interleaved manner: unless a validator has more power
//!    than any other validator, it will never act as a leader for more than one consecutive view.

pub mod messages;

pub mod implementation;

pub mod types;

pub use implementation::{select_leader, Pacemaker};
