// Copyright [2026] [Palisade Contributors]
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// Copyright (c) 2026 Palisade Contributors
// SPDX-License-Identifier: Apache-2.0

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
#![forbid(unsafe_code)]

pub mod pb {
    pub mod v1 {
        tonic::include_proto!("palisade.v1");
    }

    pub use v1::*;
}

pub const PROTOCOL_SEMVER: &str = "1.0.0";

/// Port the join service listens on inside the cluster.
pub const JOIN_SERVICE_PORT: u16 = 30090;

/// Port each control-plane node's recovery peer listens on while its
/// state disk is locked.
pub const RECOVERY_PORT: u16 = 9000;
