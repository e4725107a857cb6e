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

//! Dynamic memory management (SGX2) of an initialized enclave.

use super::{Enclave, EnclaveState, ModifyPagesOp, SgxSecInfo};
use crate::control::error::CtlResult;
use crate::memory::EnclOffset;

impl Enclave {
    fn check_edmm_state(&self, state: EnclaveState, op: &str) -> CtlResult {
        if !state.is_initialized() {
            return ctl_result_err!(
                WrongState,
                format!(
                    "Enclave::{}(): enclave {:#x} is {:?}, not initialized",
                    op, self.id, state
                )
            );
        }
        Ok(())
    }

    /// Removes every page of `[offset, offset + length)` and frees its EPC.
    pub fn remove_pages(&self, offset: EnclOffset, length: usize) -> CtlResult<usize> {
        let mut inner = self.lock_live("remove_pages")?;
        self.check_edmm_state(inner.state, "remove_pages")?;
        let count = inner.map.release(offset, length)?;
        info!(
            "Enclave::remove_pages(): {:#x} pages removed at {:#x}",
            count, offset
        );
        Ok(count)
    }

    /// EMODPR or EMODT over every page of `[offset, offset + length)`.
    pub fn modify_pages(
        &self,
        offset: EnclOffset,
        length: usize,
        sec_info: SgxSecInfo,
        op: ModifyPagesOp,
    ) -> CtlResult {
        let mut inner = self.lock_live("modify_pages")?;
        self.check_edmm_state(inner.state, "modify_pages")?;
        inner.map.update(offset, length, op, sec_info)?;
        debug!(
            "Enclave::modify_pages(): {:?} {:#x}+{:#x} -> {:?}",
            op, offset, length, sec_info
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{MrMask, SgxEnclPageFlags, SgxEnclPageType, SgxTcs};
    use super::*;
    use crate::consts::PAGE_SIZE;
    use crate::error::EnclErrorNum;
    use crate::mock;

    fn num<T: core::fmt::Debug>(res: CtlResult<T>) -> EnclErrorNum {
        res.unwrap_err().num().unwrap()
    }

    fn built(manager: &crate::EnclaveManager) -> alloc::sync::Arc<Enclave> {
        let enclave = mock::create(manager, 0x10_0000, 0x4000);
        enclave
            .add_page(0, &[1; PAGE_SIZE], mock::rwx(), MrMask::FULL)
            .unwrap();
        enclave
            .add_page(0x1000, &[2; PAGE_SIZE], mock::rw(), MrMask::FULL)
            .unwrap();
        enclave
            .add_page(0x2000, SgxTcs::new(0x3000, 0).as_page(), mock::tcs(), MrMask::FULL)
            .unwrap();
        enclave
    }

    #[test]
    fn test_edmm_requires_initialized() {
        let (manager, _) = mock::manager();
        let enclave = mock::create(&manager, 0x10_0000, 0x4000);
        assert_eq!(num(enclave.remove_pages(0, 0x1000)), EnclErrorNum::WrongState);
        enclave
            .add_page(0, &[1; PAGE_SIZE], mock::rw(), MrMask::FULL)
            .unwrap();
        assert_eq!(num(enclave.remove_pages(0, 0x1000)), EnclErrorNum::WrongState);
        assert_eq!(
            num(enclave.modify_pages(0, 0x1000, mock::r(), ModifyPagesOp::Permissions)),
            EnclErrorNum::WrongState
        );
        assert_eq!(enclave.page_count(), 1);
    }

    #[test]
    fn test_example_scenario() {
        let (manager, _) = mock::manager();
        let enclave = built(&manager);
        enclave.init(&mock::sigstruct(&enclave)).unwrap();
        let free = manager.epc_pool().free_pages();

        enclave
            .modify_pages(0x1000, 0x1000, mock::r(), ModifyPagesOp::Permissions)
            .unwrap();
        assert_eq!(enclave.page(0x1000), Some(mock::r()));

        // Permissions can only be restricted.
        assert_eq!(
            num(enclave.modify_pages(0x1000, 0x1000, mock::rw(), ModifyPagesOp::Permissions)),
            EnclErrorNum::InvalidTransition
        );

        assert_eq!(enclave.remove_pages(0x1000, 0x1000).unwrap(), 1);
        assert_eq!(enclave.page(0x1000), None);
        assert_eq!(manager.epc_pool().free_pages(), free + 1);
        assert_eq!(
            num(enclave.add_page(0x1000, &[2; PAGE_SIZE], mock::rw(), MrMask::FULL)),
            EnclErrorNum::WrongState
        );
    }

    #[test]
    fn test_remove_all_or_nothing() {
        let (manager, _) = mock::manager();
        let enclave = built(&manager);
        enclave.init(&mock::sigstruct(&enclave)).unwrap();

        // 0x3000 is empty.
        assert_eq!(num(enclave.remove_pages(0x2000, 0x2000)), EnclErrorNum::NotFound);
        assert_eq!(num(enclave.remove_pages(0x800, 0x1000)), EnclErrorNum::Misaligned);
        assert_eq!(num(enclave.remove_pages(0, 0x5000)), EnclErrorNum::OutOfRange);
        assert_eq!(enclave.page_count(), 3);
        assert_eq!(enclave.remove_pages(0, 0x3000).unwrap(), 3);
        assert_eq!(enclave.page_count(), 0);
    }

    #[test]
    fn test_type_changes() {
        let (manager, _) = mock::manager();
        let enclave = built(&manager);
        enclave.init(&mock::sigstruct(&enclave)).unwrap();

        let tcs = SgxSecInfo::new(SgxEnclPageFlags::empty(), SgxEnclPageType::TCS);
        let trim = SgxSecInfo::new(SgxEnclPageFlags::empty(), SgxEnclPageType::TRIM);
        let reg = SgxSecInfo::new(SgxEnclPageFlags::R, SgxEnclPageType::REG);

        assert_eq!(
            num(enclave.modify_pages(0, 0x1000, reg, ModifyPagesOp::Types)),
            EnclErrorNum::InvalidTransition
        );
        enclave.modify_pages(0, 0x1000, tcs, ModifyPagesOp::Types).unwrap();
        assert_eq!(enclave.page(0).unwrap().page_type, SgxEnclPageType::TCS);
        enclave.modify_pages(0, 0x1000, trim, ModifyPagesOp::Types).unwrap();
        enclave.modify_pages(0x2000, 0x1000, trim, ModifyPagesOp::Types).unwrap();

        // TRIM is terminal.
        assert_eq!(
            num(enclave.modify_pages(0, 0x1000, tcs, ModifyPagesOp::Types)),
            EnclErrorNum::InvalidTransition
        );
        assert_eq!(
            num(enclave.modify_pages(0x2000, 0x1000, mock::r(), ModifyPagesOp::Permissions)),
            EnclErrorNum::InvalidTransition
        );
        assert_eq!(enclave.remove_pages(0, 0x1000).unwrap(), 1);
    }
}
