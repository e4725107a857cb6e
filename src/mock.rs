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

//! Test doubles of the injected collaborators.

use alloc::collections::btree_map::BTreeMap;
use alloc::collections::btree_set::BTreeSet;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem::size_of;
use core::slice;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::capability::{AttributeFs, EnclaveCapability};
use crate::config::PlatformConfig;
use crate::consts::PAGE_SIZE;
use crate::control::Control;
use crate::enclave::exception::{EncluLeaf, ExceptionType, SgxEnclaveException};
use crate::enclave::sgx::{
    SgxAttributeFlags, SgxEnclPageFlags, SgxEnclPageType, SgxSecInfo, SgxSecs, SigStruct,
};
use crate::enclave::structs::{Sha256Value, SigKey3072Value};
use crate::enclave::{Enclave, EnclaveManager};
use crate::error::EnclResult;
use crate::memory::{EnclOffset, Plain, SourceMemory};

/// Attribute files granting PROVISIONKEY.
pub const FD_PROVISION: u64 = 3;

#[derive(Default)]
pub struct MockCapability {
    lost: Mutex<BTreeSet<usize>>,
    reject_signatures: AtomicBool,
    fail_add: AtomicBool,
    fail_create: AtomicBool,
    fault_enter: AtomicBool,
}

impl MockCapability {
    pub fn lose_backing(&self, id: usize) {
        self.lost.lock().insert(id);
    }

    pub fn reject_signatures(&self, reject: bool) {
        self.reject_signatures.store(reject, Ordering::SeqCst);
    }

    pub fn fail_next_add(&self) {
        self.fail_add.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn fault_next_enter(&self) {
        self.fault_enter.store(true, Ordering::SeqCst);
    }
}

impl EnclaveCapability for MockCapability {
    fn create(&self, _id: usize, _secs: &SgxSecs) -> EnclResult {
        if self.fail_create.swap(false, Ordering::SeqCst) {
            return encl_result_err!(NoMemory, "ECREATE failed");
        }
        Ok(())
    }

    fn add_page(
        &self,
        _id: usize,
        _offset: EnclOffset,
        _page: &[u8; PAGE_SIZE],
        _sec_info: SgxSecInfo,
    ) -> EnclResult {
        if self.fail_add.swap(false, Ordering::SeqCst) {
            return encl_result_err!(NoMemory, "EADD failed");
        }
        Ok(())
    }

    fn verify_signature(&self, _sigstruct: &SigStruct, _mr_enclave: &Sha256Value) -> bool {
        !self.reject_signatures.load(Ordering::SeqCst)
    }

    fn enter(&self, _id: usize, tcs_offset: EnclOffset) -> Result<(), SgxEnclaveException> {
        if self.fault_enter.swap(false, Ordering::SeqCst) {
            return Err(SgxEnclaveException::new(
                EncluLeaf::EEnter,
                ExceptionType::PageFault,
                0x6,
                tcs_offset as u64 + 0x1008,
            ));
        }
        Ok(())
    }

    fn is_backing_lost(&self, id: usize) -> bool {
        self.lost.lock().contains(&id)
    }
}

pub struct MockAttributeFs;

impl AttributeFs for MockAttributeFs {
    fn validate(&self, fd: u64) -> Option<SgxAttributeFlags> {
        match fd {
            FD_PROVISION | 4 => Some(SgxAttributeFlags::PROVISIONKEY),
            _ => None,
        }
    }
}

/// Caller memory made of disjoint regions.
#[derive(Default)]
pub struct MockMemory {
    regions: BTreeMap<u64, Vec<u8>>,
}

impl MockMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, addr: u64, bytes: &[u8]) {
        self.regions.insert(addr, bytes.to_vec());
    }

    pub fn write_obj<T: Plain>(&mut self, addr: u64, obj: &T) {
        let bytes = unsafe { slice::from_raw_parts(obj as *const T as *const u8, size_of::<T>()) };
        self.write(addr, bytes);
    }
}

impl SourceMemory for MockMemory {
    fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> EnclResult {
        if let Some((start, bytes)) = self.regions.range(..=addr).last() {
            let from = (addr - start) as usize;
            if from + buf.len() <= bytes.len() {
                buf.copy_from_slice(&bytes[from..from + buf.len()]);
                return Ok(());
            }
        }
        encl_result_err!(InvalidDescriptor, format!("Bad address {:#x}", addr))
    }
}

pub fn rw() -> SgxSecInfo {
    SgxSecInfo::new(SgxEnclPageFlags::R | SgxEnclPageFlags::W, SgxEnclPageType::REG)
}

pub fn rwx() -> SgxSecInfo {
    SgxSecInfo::new(SgxEnclPageFlags::PERM_MASK, SgxEnclPageType::REG)
}

pub fn r() -> SgxSecInfo {
    SgxSecInfo::new(SgxEnclPageFlags::R, SgxEnclPageType::REG)
}

pub fn tcs() -> SgxSecInfo {
    SgxSecInfo::new(SgxEnclPageFlags::empty(), SgxEnclPageType::TCS)
}

pub fn secs(base: u64, size: u64) -> SgxSecs {
    SgxSecs::new(base, size, SgxAttributeFlags::MODE64BIT, 0x3)
}

pub fn manager() -> (EnclaveManager, Arc<MockCapability>) {
    let cap = Arc::new(MockCapability::default());
    let config = PlatformConfig {
        epc_pages: 64,
        ..PlatformConfig::default()
    };
    (EnclaveManager::new(config, cap.clone()), cap)
}

pub fn control() -> (Control, Arc<MockCapability>) {
    let (manager, cap) = manager();
    (Control::new(manager), cap)
}

pub fn create(manager: &EnclaveManager, base: u64, size: u64) -> Arc<Enclave> {
    manager.create(&secs(base, size)).unwrap()
}

/// A SIGSTRUCT over the current measurement of `enclave`.
pub fn sigstruct(enclave: &Enclave) -> SigStruct {
    let mut sigstruct = SigStruct::default();
    sigstruct.key.modules = SigKey3072Value::new([0xa5; 384]);
    sigstruct.body.mr_enclave = enclave.mr_enclave();
    sigstruct.body.isv_prod_id = 1;
    sigstruct
}
