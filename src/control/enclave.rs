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

use alloc::sync::Arc;
use core::convert::TryFrom;

use super::error::CtlResult;
use super::Control;
use crate::capability::{AttributeFs, AttributeToken};
use crate::consts::PAGE_SIZE;
use crate::enclave::epcm::ModifyPagesOp;
use crate::enclave::sgx::{SgxSecInfo, SgxSecInfoDesc, SgxSecs, SigStruct};
use crate::enclave::structs::{
    EnclAddPageDesc, EnclCreateDesc, EnclInitDesc, EnclModifyPagesDesc, EnclRemovePagesDesc,
    EnclSetAttributeDesc, VirtEpcCreateDesc,
};
use crate::enclave::{Enclave, MrMask};
use crate::memory::{EnclOffset, SourceMemory};

impl Control {
    /// Finds the enclave owning `addr` and converts `addr` to an offset.
    fn enclave_at(&self, addr: u64) -> CtlResult<(Arc<Enclave>, EnclOffset)> {
        let addr = addr as usize;
        let enclave = self.manager.find_by_addr(addr)?;
        let offset = enclave.offset_of(addr)?;
        Ok((enclave, offset))
    }

    fn read_secinfo<M: SourceMemory>(mem: &M, addr: u64) -> CtlResult<SgxSecInfo> {
        let desc: SgxSecInfoDesc = mem.read(addr)?;
        Ok(SgxSecInfo::try_from(&desc)?)
    }

    pub(super) fn enclave_create<M: SourceMemory>(
        &self,
        desc: EnclCreateDesc,
        mem: &M,
    ) -> CtlResult<usize> {
        let secs: SgxSecs = mem.read(desc.src)?;
        info!("enclave_create({:#x}): {:#x?}", desc.src, secs);
        let enclave = self.manager.create(&secs)?;
        Ok(enclave.id)
    }

    pub(super) fn enclave_add_page<M: SourceMemory>(
        &self,
        desc: EnclAddPageDesc,
        mem: &M,
    ) -> CtlResult<usize> {
        debug!("enclave_add_page(): {:#x?}", desc);
        let (enclave, offset) = self.enclave_at(desc.addr)?;
        let sec_info = Self::read_secinfo(mem, desc.secinfo)?;
        let mut page = [0u8; PAGE_SIZE];
        mem.read_bytes(desc.src, &mut page)?;
        enclave.add_page(offset, &page, sec_info, MrMask::from(desc.mrmask))?;
        Ok(0)
    }

    pub(super) fn enclave_init<M: SourceMemory>(
        &self,
        desc: EnclInitDesc,
        mem: &M,
    ) -> CtlResult<usize> {
        info!("enclave_init(): {:#x?}", desc);
        let (enclave, _) = self.enclave_at(desc.addr)?;
        let sigstruct: SigStruct = mem.read(desc.sigstruct)?;
        enclave.init(&sigstruct)?;
        Ok(0)
    }

    pub(super) fn enclave_set_attribute(
        &self,
        desc: EnclSetAttributeDesc,
        fs: &dyn AttributeFs,
    ) -> CtlResult<usize> {
        info!("enclave_set_attribute(): {:#x?}", desc);
        let token = AttributeToken::new(desc.attribute_fd);
        let (enclave, _) = self.enclave_at(desc.addr)?;
        enclave.set_attribute(token, fs)?;
        Ok(0)
    }

    pub(super) fn enclave_remove_pages(&self, desc: EnclRemovePagesDesc) -> CtlResult<usize> {
        debug!("enclave_remove_pages(): {:#x?}", desc);
        let (enclave, offset) = self.enclave_at(desc.addr)?;
        enclave.remove_pages(offset, desc.length as usize)?;
        Ok(0)
    }

    pub(super) fn enclave_modify_pages<M: SourceMemory>(
        &self,
        desc: EnclModifyPagesDesc,
        mem: &M,
    ) -> CtlResult<usize> {
        debug!("enclave_modify_pages(): {:#x?}", desc);
        let op = match ModifyPagesOp::try_from(desc.op) {
            Ok(op) => op,
            Err(op) => {
                return ctl_result_err!(
                    InvalidDescriptor,
                    format!("enclave_modify_pages(): unknown op {}", op)
                )
            }
        };
        let (enclave, offset) = self.enclave_at(desc.addr)?;
        let sec_info = Self::read_secinfo(mem, desc.secinfo)?;
        enclave.modify_pages(offset, desc.length as usize, sec_info, op)?;
        Ok(0)
    }

    pub(super) fn virt_epc_create(
        &self,
        desc: VirtEpcCreateDesc,
        fs: &dyn AttributeFs,
    ) -> CtlResult<usize> {
        info!("virt_epc_create(): {:#x?}", desc);
        let token = AttributeToken::new(desc.attribute_fd);
        let virt = self.virt_epcs.create(desc.size as usize, token, fs)?;
        Ok(virt.id)
    }
}

#[cfg(test)]
mod tests {
    use super::super::ControlCode;
    use super::*;
    use crate::consts::SGX_POWER_LOST_ENCLAVE;
    use crate::enclave::sgx::SgxTcs;
    use crate::enclave::EnclaveState;
    use crate::error::EnclErrorNum;
    use crate::mock::{self, MockAttributeFs, MockMemory, FD_PROVISION};

    const BASE: u64 = 0x10_0000;
    const ARG: u64 = 0x1000;
    const SECS: u64 = 0x2000;
    const SECINFO: u64 = 0x4000;
    const SRC: u64 = 0x5000;
    const SIGSTRUCT: u64 = 0x8000;

    fn ioctl(control: &Control, mem: &MockMemory, code: ControlCode) -> i64 {
        control.ioctl(code.ioctl_number(), ARG, mem, &MockAttributeFs)
    }

    fn add_page(
        control: &Control,
        mem: &mut MockMemory,
        offset: u64,
        info: SgxSecInfo,
        page: &[u8],
    ) -> i64 {
        mem.write(SRC, page);
        mem.write_obj(SECINFO, &SgxSecInfoDesc::from(info));
        mem.write_obj(
            ARG,
            &EnclAddPageDesc {
                addr: BASE + offset,
                src: SRC,
                secinfo: SECINFO,
                mrmask: 0xffff,
            },
        );
        ioctl(control, mem, ControlCode::EnclaveAddPage)
    }

    fn create(control: &Control, mem: &mut MockMemory) -> Arc<Enclave> {
        mem.write_obj(SECS, &mock::secs(BASE, 0x4000));
        mem.write_obj(ARG, &EnclCreateDesc { src: SECS });
        let id = ioctl(control, mem, ControlCode::EnclaveCreate);
        assert!(id > 0);
        control.manager().find_enclave(id as usize).unwrap()
    }

    fn init(control: &Control, mem: &mut MockMemory, enclave: &Enclave) -> i64 {
        mem.write_obj(SIGSTRUCT, &mock::sigstruct(enclave));
        mem.write_obj(
            ARG,
            &EnclInitDesc {
                addr: BASE,
                sigstruct: SIGSTRUCT,
            },
        );
        ioctl(control, mem, ControlCode::EnclaveInit)
    }

    #[test]
    fn test_example_through_ioctl() {
        let (control, _) = mock::control();
        let mut mem = MockMemory::new();
        let enclave = create(&control, &mut mem);

        assert_eq!(add_page(&control, &mut mem, 0, mock::rwx(), &[1; PAGE_SIZE]), 0);
        assert_eq!(add_page(&control, &mut mem, 0x1000, mock::rw(), &[2; PAGE_SIZE]), 0);
        let tcs = SgxTcs::new(0x3000, 0);
        assert_eq!(add_page(&control, &mut mem, 0x2000, mock::tcs(), tcs.as_page()), 0);
        assert_eq!(
            add_page(&control, &mut mem, 0x2000, mock::rw(), &[3; PAGE_SIZE]),
            EnclErrorNum::AlreadyOccupied.code() as i64
        );
        assert_eq!(init(&control, &mut mem, &enclave), 0);
        assert_eq!(enclave.state(), EnclaveState::Initialized);

        mem.write_obj(SECINFO, &SgxSecInfoDesc::from(mock::r()));
        mem.write_obj(
            ARG,
            &EnclModifyPagesDesc {
                addr: BASE + 0x1000,
                length: 0x1000,
                secinfo: SECINFO,
                op: 0,
            },
        );
        assert_eq!(ioctl(&control, &mem, ControlCode::EnclaveModifyPages), 0);
        assert_eq!(enclave.page(0x1000), Some(mock::r()));

        mem.write_obj(
            ARG,
            &EnclModifyPagesDesc {
                addr: BASE + 0x1000,
                length: 0x1000,
                secinfo: SECINFO,
                op: 2,
            },
        );
        assert_eq!(
            ioctl(&control, &mem, ControlCode::EnclaveModifyPages),
            EnclErrorNum::InvalidDescriptor.code() as i64
        );

        mem.write_obj(
            ARG,
            &EnclRemovePagesDesc {
                addr: BASE + 0x1000,
                length: 0x1000,
            },
        );
        assert_eq!(ioctl(&control, &mem, ControlCode::EnclaveRemovePages), 0);
        assert_eq!(
            add_page(&control, &mut mem, 0x1000, mock::rw(), &[2; PAGE_SIZE]),
            EnclErrorNum::WrongState.code() as i64
        );
    }

    #[test]
    fn test_power_lost_sentinel() {
        let (control, cap) = mock::control();
        let mut mem = MockMemory::new();
        let enclave = create(&control, &mut mem);
        assert_eq!(add_page(&control, &mut mem, 0, mock::rw(), &[1; PAGE_SIZE]), 0);

        cap.lose_backing(enclave.id);
        assert_eq!(init(&control, &mut mem, &enclave), SGX_POWER_LOST_ENCLAVE);
        assert_eq!(enclave.state(), EnclaveState::Dead);
        assert_eq!(
            add_page(&control, &mut mem, 0x1000, mock::rw(), &[1; PAGE_SIZE]),
            SGX_POWER_LOST_ENCLAVE
        );
    }

    #[test]
    fn test_bad_requests() {
        let (control, _) = mock::control();
        let mut mem = MockMemory::new();
        create(&control, &mut mem);

        // Outside any ELRANGE.
        mem.write_obj(ARG, &EnclRemovePagesDesc { addr: 0, length: 0x1000 });
        assert_eq!(
            ioctl(&control, &mem, ControlCode::EnclaveRemovePages),
            EnclErrorNum::NotFound.code() as i64
        );
        // Unmapped request record.
        assert_eq!(
            control.ioctl(
                ControlCode::EnclaveInit.ioctl_number(),
                0xdead_0000,
                &mem,
                &MockAttributeFs
            ),
            EnclErrorNum::InvalidDescriptor.code() as i64
        );
        assert_eq!(
            control.ioctl(0xdead_beef, ARG, &mem, &MockAttributeFs),
            EnclErrorNum::InvalidDescriptor.code() as i64
        );

        // W without R.
        let mut desc = SgxSecInfoDesc::from(mock::rw());
        desc.flags = 0x2;
        mem.write(SRC, &[0; PAGE_SIZE]);
        mem.write_obj(SECINFO, &desc);
        mem.write_obj(
            ARG,
            &EnclAddPageDesc {
                addr: BASE,
                src: SRC,
                secinfo: SECINFO,
                mrmask: 0xffff,
            },
        );
        assert_eq!(
            ioctl(&control, &mem, ControlCode::EnclaveAddPage),
            EnclErrorNum::InvalidSecInfo.code() as i64
        );
    }

    #[test]
    fn test_set_attribute_and_virt_epc() {
        let (control, _) = mock::control();
        let mut mem = MockMemory::new();
        create(&control, &mut mem);

        mem.write_obj(
            ARG,
            &EnclSetAttributeDesc {
                addr: BASE,
                attribute_fd: FD_PROVISION,
            },
        );
        assert_eq!(ioctl(&control, &mem, ControlCode::EnclaveSetAttribute), 0);
        assert_eq!(
            ioctl(&control, &mem, ControlCode::EnclaveSetAttribute),
            EnclErrorNum::AlreadyAttached.code() as i64
        );

        let free = control.manager().epc_pool().free_pages();
        mem.write_obj(
            ARG,
            &VirtEpcCreateDesc {
                size: 4097,
                attribute_fd: FD_PROVISION,
            },
        );
        assert_eq!(
            ioctl(&control, &mem, ControlCode::VirtEpcCreate),
            EnclErrorNum::InvalidSize.code() as i64
        );
        assert_eq!(control.manager().epc_pool().free_pages(), free);

        mem.write_obj(
            ARG,
            &VirtEpcCreateDesc {
                size: 0x2000,
                attribute_fd: FD_PROVISION,
            },
        );
        let id = ioctl(&control, &mem, ControlCode::VirtEpcCreate);
        assert!(id > 0);
        assert_eq!(control.manager().epc_pool().free_pages(), free - 2);
        control.virt_epcs().release(id as usize).unwrap();
        assert_eq!(control.manager().epc_pool().free_pages(), free);
    }
}
