/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

#![allow(dead_code)]

pub(crate) mod counter_engine;

pub(crate) mod fleet;

pub(crate) mod logging;

pub(crate) mod mem_db;

pub(crate) mod network;
