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

//! The ioctl-style control surface.

#[macro_use]
pub mod error;

mod enclave;

use core::convert::TryFrom;
use core::mem::size_of;

use bit_field::BitField;
use numeric_enum_macro::numeric_enum;

use crate::capability::AttributeFs;
use crate::enclave::structs::{
    EnclAddPageDesc, EnclCreateDesc, EnclInitDesc, EnclModifyPagesDesc, EnclRemovePagesDesc,
    EnclSetAttributeDesc, VirtEpcCreateDesc,
};
use crate::enclave::EnclaveManager;
use crate::memory::SourceMemory;
use crate::virt_epc::VirtEpcManager;

use self::error::CtlResult;

/// Magic of the SGX ioctls.
pub const SGX_MAGIC: u32 = 0xA4;

const IOC_WRITE: u32 = 1;

numeric_enum! {
    #[repr(u32)]
    #[derive(Debug, Eq, PartialEq, Copy, Clone)]
    pub enum ControlCode {
        EnclaveCreate = 0x00,
        EnclaveAddPage = 0x01,
        EnclaveInit = 0x02,
        EnclaveSetAttribute = 0x03,
        EnclaveRemovePages = 0x04,
        EnclaveModifyPages = 0x05,
        VirtEpcCreate = 0x80,
    }
}

impl ControlCode {
    /// Size of the request record `arg` points to.
    pub fn arg_size(self) -> usize {
        match self {
            ControlCode::EnclaveCreate => size_of::<EnclCreateDesc>(),
            ControlCode::EnclaveAddPage => size_of::<EnclAddPageDesc>(),
            ControlCode::EnclaveInit => size_of::<EnclInitDesc>(),
            ControlCode::EnclaveSetAttribute => size_of::<EnclSetAttributeDesc>(),
            ControlCode::EnclaveRemovePages => size_of::<EnclRemovePagesDesc>(),
            ControlCode::EnclaveModifyPages => size_of::<EnclModifyPagesDesc>(),
            ControlCode::VirtEpcCreate => size_of::<VirtEpcCreateDesc>(),
        }
    }

    /// `_IOW(SGX_MAGIC, nr, arg)`.
    pub fn ioctl_number(self) -> u32 {
        let mut cmd = 0u32;
        cmd.set_bits(0..8, self as u32);
        cmd.set_bits(8..16, SGX_MAGIC);
        cmd.set_bits(16..30, self.arg_size() as u32);
        cmd.set_bits(30..32, IOC_WRITE);
        cmd
    }

    pub fn from_ioctl(cmd: u32) -> Option<Self> {
        let code = Self::try_from(cmd.get_bits(0..8)).ok()?;
        if code.ioctl_number() == cmd {
            Some(code)
        } else {
            None
        }
    }
}

/// Entry point of every control request.
pub struct Control {
    manager: EnclaveManager,
    virt_epcs: VirtEpcManager,
}

impl Control {
    pub fn new(manager: EnclaveManager) -> Self {
        let virt_epcs = VirtEpcManager::new(manager.epc_pool().clone());
        Self { manager, virt_epcs }
    }

    pub fn manager(&self) -> &EnclaveManager {
        &self.manager
    }

    pub fn virt_epcs(&self) -> &VirtEpcManager {
        &self.virt_epcs
    }

    /// Handles `code` with the request record at caller address `arg`.
    ///
    /// Returns the enclave id for `EnclaveCreate`, the pool id for
    /// `VirtEpcCreate` and 0 otherwise.
    pub fn dispatch<M: SourceMemory>(
        &self,
        code: ControlCode,
        arg: u64,
        mem: &M,
        fs: &dyn AttributeFs,
    ) -> CtlResult<usize> {
        match code {
            ControlCode::EnclaveCreate => self.enclave_create(mem.read(arg)?, mem),
            ControlCode::EnclaveAddPage => self.enclave_add_page(mem.read(arg)?, mem),
            ControlCode::EnclaveInit => self.enclave_init(mem.read(arg)?, mem),
            ControlCode::EnclaveSetAttribute => self.enclave_set_attribute(mem.read(arg)?, fs),
            ControlCode::EnclaveRemovePages => self.enclave_remove_pages(mem.read(arg)?),
            ControlCode::EnclaveModifyPages => self.enclave_modify_pages(mem.read(arg)?, mem),
            ControlCode::VirtEpcCreate => self.virt_epc_create(mem.read(arg)?, fs),
        }
    }

    /// Raw ioctl: 0 (or the new id) on success, a negative errno, or
    /// `SGX_POWER_LOST_ENCLAVE`.
    pub fn ioctl<M: SourceMemory>(&self, cmd: u32, arg: u64, mem: &M, fs: &dyn AttributeFs) -> i64 {
        let code = match ControlCode::from_ioctl(cmd) {
            Some(code) => code,
            None => {
                warn!("Control::ioctl(): unsupported command {:#x}", cmd);
                return ctl_err!(InvalidDescriptor).code();
            }
        };
        match self.dispatch(code, arg, mem, fs) {
            Ok(ret) => ret as i64,
            Err(err) => {
                warn!("Control::ioctl(): {:?} failed: {:?}", code, err);
                err.code()
            }
        }
    }
}
