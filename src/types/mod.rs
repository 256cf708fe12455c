/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types and traits that are used across multiple components of the consensus core.
//!
//! Types specific to a single component, e.g., the outcomes of inserting into the
//! [vertex store](crate::vertex_store), live next to that component.

pub mod certificates;

pub mod crypto_primitives;

pub mod data_types;

pub mod ledger_header;

pub mod validator_set;

pub mod vertex;
