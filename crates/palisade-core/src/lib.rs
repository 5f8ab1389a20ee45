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

//! Core logic of the Palisade trust bootstrap: every cluster secret is a
//! pure function of the long-lived master secret, the cluster salt, and a
//! fixed context label. Nothing in this crate stores derived material.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
#![forbid(unsafe_code)]

pub mod error;
pub mod kdf;
pub mod kubelet;
pub mod ssh;

pub use error::{CoreError, CoreResult};
