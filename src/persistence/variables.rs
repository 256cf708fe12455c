/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Keys under which each checkpoint variable is stored in the user-provided key-value store.
//!
//! |Variable|Type|Description|
//! |---|---|---|
//! |Epoch|[`EpochNumber`](crate::types::data_types::EpochNumber)|The epoch the replica is in.|
//! |Validator Set|[`ValidatorSetBytes`](crate::types::validator_set::ValidatorSetBytes)|The validator set of the epoch.|
//! |Root|[`BftHeader`](crate::types::certificates::BftHeader)|The header of the highest committed vertex, or of the epoch's genesis vertex.|
//! |Root QC|[`QuorumCertificate`](crate::types::certificates::QuorumCertificate)|The certificate that committed the root, or the epoch's genesis certificate.|
//! |Highest QC|[`QuorumCertificate`](crate::types::certificates::QuorumCertificate)|The highest quorum certificate the replica has seen.|
//! |Safety Rules|[`SafetyRules`](crate::safety::SafetyRules)|The last voted `EpochView` and the lock.|
//! |Speculative Vertices|`Vec<`[`Vertex`](crate::types::vertex::Vertex)`>`|The uncommitted vertices that descend from the root, in ascending view order.|
//!
//! Every value is Borsh-serialized.

pub(super) const EPOCH: [u8; 1] = [0];
pub(super) const VALIDATOR_SET: [u8; 1] = [1];
pub(super) const ROOT: [u8; 1] = [2];
pub(super) const ROOT_QC: [u8; 1] = [3];
pub(super) const HIGH_QC: [u8; 1] = [4];
pub(super) const SAFETY_RULES: [u8; 1] = [5];
pub(super) const SPECULATIVE_VERTICES: [u8; 1] = [6];
