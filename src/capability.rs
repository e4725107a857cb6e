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

//! Collaborators injected into the manager.
//!
//! The manager only keeps the bookkeeping. Executing ENCLS/ENCLU, checking the
//! RSA signature of a SIGSTRUCT and resolving attribute files belong to the
//! embedder.

use crate::consts::PAGE_SIZE;
use crate::enclave::exception::SgxEnclaveException;
use crate::enclave::sgx::{SgxAttributeFlags, SgxSecInfo, SgxSecs, SigStruct};
use crate::enclave::structs::Sha256Value;
use crate::error::EnclResult;
use crate::memory::EnclOffset;

/// Privileged enclave instructions.
pub trait EnclaveCapability: Send + Sync {
    /// ECREATE for enclave `id`.
    fn create(&self, id: usize, secs: &SgxSecs) -> EnclResult;

    /// EADD of one page at `offset` inside the ELRANGE.
    fn add_page(
        &self,
        id: usize,
        offset: EnclOffset,
        page: &[u8; PAGE_SIZE],
        sec_info: SgxSecInfo,
    ) -> EnclResult;

    /// Checks the signature of `sigstruct` over the final `mr_enclave`.
    fn verify_signature(&self, sigstruct: &SigStruct, mr_enclave: &Sha256Value) -> bool;

    /// EENTER through the TCS at `tcs_offset`. A trap inside the enclave is
    /// reported as the fault record built by the trampoline.
    fn enter(&self, id: usize, tcs_offset: EnclOffset) -> Result<(), SgxEnclaveException>;

    /// Whether the EPC backing enclave `id` was lost, e.g. across a suspend.
    fn is_backing_lost(&self, id: usize) -> bool;
}

/// Attribute (entitlement) file system.
pub trait AttributeFs {
    /// Attributes granted by the open file `fd`, `None` if `fd` is not an
    /// attribute file.
    fn validate(&self, fd: u64) -> Option<SgxAttributeFlags>;
}

/// A single-use handle to an attribute file.
///
/// Consumed by [`Enclave::set_attribute`](crate::enclave::Enclave::set_attribute)
/// and [`VirtEpc::create`](crate::virt_epc::VirtEpc::create) whether or not
/// the call succeeds.
#[derive(Debug, Eq, PartialEq)]
pub struct AttributeToken {
    fd: u64,
}

impl AttributeToken {
    pub fn new(fd: u64) -> Self {
        Self { fd }
    }

    pub fn fd(&self) -> u64 {
        self.fd
    }

    /// Resolves the token, closing it.
    pub fn redeem(self, fs: &dyn AttributeFs) -> EnclResult<(u64, SgxAttributeFlags)> {
        match fs.validate(self.fd) {
            Some(granted) => Ok((self.fd, granted)),
            None => encl_result_err!(
                InvalidToken,
                format!("fd {} is not an attribute file", self.fd)
            ),
        }
    }
}
