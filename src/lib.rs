// Copyright (C) 2023 Ant Group CO., Ltd. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Enclave control plane.
//!
//! Manages the lifecycle of SGX enclave regions on behalf of an untrusted
//! caller: ECREATE-style creation, measured page population, EINIT, post-init
//! page removal and modification (EDMM), virtual EPC pools for nested hosts and
//! the fault record returned by the entry trampoline. The privileged
//! instructions themselves are reached through [`capability::EnclaveCapability`].

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate alloc;
#[macro_use]
extern crate log;

pub mod logging;
#[macro_use]
pub mod error;
#[macro_use]
pub mod control;

pub mod capability;
pub mod config;
pub mod consts;
pub mod enclave;
pub mod intervaltree;
pub mod memory;
pub mod virt_epc;

#[cfg(test)]
pub(crate) mod mock;

pub use control::error::{CtlError, CtlErrorType, CtlResult};
pub use control::{Control, ControlCode};
pub use enclave::{Enclave, EnclaveManager, EnclaveState};
pub use error::{EnclError, EnclErrorNum, EnclResult};
