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

mod edmm;
mod manager;

pub mod epcm;
pub mod exception;
pub mod measure;
pub mod sgx;
pub mod structs;

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt::{Debug, Formatter, Result};

use sha2::{Digest, Sha256};
use spin::{Mutex, MutexGuard};

use crate::capability::{AttributeFs, AttributeToken, EnclaveCapability};
use crate::config::PlatformConfig;
use crate::consts::PAGE_SIZE;
use crate::control::error::CtlResult;
use crate::memory::{EnclOffset, EpcFrame, EpcPool};

pub use self::epcm::{EpcMap, ModifyPagesOp};
pub use self::exception::SgxEnclaveException;
pub use self::manager::EnclaveManager;
pub use self::measure::{Measure, MrMask};
pub use self::sgx::{
    ElRange, SgxAttributeFlags, SgxEnclPageFlags, SgxEnclPageType, SgxSecInfo, SgxSecs, SgxTcs,
    SigStruct,
};
pub use self::structs::Sha256Value;

/// Lifecycle of an enclave.
///
/// `Created -> Building -> Initialized -> Running`. Any state may fall into
/// `Dead` once the EPC backing is lost, or into `Destroyed` when the manager
/// tears the enclave down. Both are terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EnclaveState {
    /// SECS created, no page added yet.
    Created,
    /// Pages are being added and measured.
    Building,
    /// EINIT succeeded, the measurement is sealed.
    Initialized,
    /// Entered at least once.
    Running,
    /// EPC backing lost.
    Dead,
    /// Removed from its manager.
    Destroyed,
}

impl EnclaveState {
    pub fn is_initialized(&self) -> bool {
        matches!(self, EnclaveState::Initialized | EnclaveState::Running)
    }
}

struct EnclaveInner {
    state: EnclaveState,
    secs: SgxSecs,
    map: EpcMap,
    measure: Measure,
    /// EPC page holding the SECS, released when the enclave dies.
    secs_frame: Option<EpcFrame>,
    /// Attributes EINIT may grant.
    allowed_attributes: SgxAttributeFlags,
    /// Attributes granted through attribute files.
    attached_attributes: SgxAttributeFlags,
    attribute_fds: Vec<u64>,
}

pub struct Enclave {
    /// Enclave identifier.
    pub id: usize,
    /// ELRANGE, fixed by the SECS.
    elrange: ElRange,
    capability: Arc<dyn EnclaveCapability>,
    epc: Arc<EpcPool>,
    inner: Mutex<EnclaveInner>,
}

impl Enclave {
    pub(crate) fn new(
        id: usize,
        secs: &SgxSecs,
        config: &PlatformConfig,
        capability: Arc<dyn EnclaveCapability>,
        epc: Arc<EpcPool>,
    ) -> CtlResult<Arc<Self>> {
        secs.validate(config)?;
        let secs_frame = epc.alloc(1)?;
        capability.create(id, secs)?;

        let mut measure = Measure::new();
        measure.start(secs.size, secs.ssa_frame_size);

        let enclave = Arc::new(Self {
            id,
            elrange: secs.elrange(),
            capability,
            epc,
            inner: Mutex::new(EnclaveInner {
                state: EnclaveState::Created,
                secs: *secs,
                map: EpcMap::new(secs.size as usize),
                measure,
                secs_frame: Some(secs_frame),
                allowed_attributes: config.allowed_attributes,
                attached_attributes: SgxAttributeFlags::empty(),
                attribute_fds: Vec::new(),
            }),
        });
        info!("Enclave::new(): {:#x?}", enclave);
        Ok(enclave)
    }

    pub fn elrange(&self) -> &ElRange {
        &self.elrange
    }

    pub fn state(&self) -> EnclaveState {
        self.inner.lock().state
    }

    pub fn secs(&self) -> SgxSecs {
        self.inner.lock().secs
    }

    /// EPC pages held by the enclave, SECS included.
    pub fn epc_pages(&self) -> usize {
        let inner = self.inner.lock();
        let secs_pages = inner.secs_frame.as_ref().map_or(0, EpcFrame::count);
        secs_pages
            + inner
                .map
                .iter()
                .map(|(_, entry)| entry.epc_pages())
                .sum::<usize>()
    }

    /// Number of pages currently present in the ELRANGE.
    pub fn page_count(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// SECINFO of the page at `offset`, if present.
    pub fn page(&self, offset: EnclOffset) -> Option<SgxSecInfo> {
        self.inner.lock().map.get(offset).map(|entry| entry.sec_info())
    }

    /// Current MRENCLAVE; final once the enclave is initialized.
    pub fn mr_enclave(&self) -> Sha256Value {
        self.inner.lock().measure.finalize()
    }

    pub fn measured_chunks(&self) -> usize {
        self.inner.lock().measure.chunk_count()
    }

    pub fn allowed_attributes(&self) -> SgxAttributeFlags {
        self.inner.lock().allowed_attributes
    }

    /// Converts a linear address inside ELRANGE to an offset.
    pub fn offset_of(&self, addr: usize) -> CtlResult<EnclOffset> {
        if !self.elrange.contains(&addr) {
            return ctl_result_err!(
                OutOfRange,
                format!(
                    "Enclave::offset_of(): {:#x} is out of ELRANGE {:#x?}",
                    addr, self.elrange
                )
            );
        }
        Ok(addr - self.elrange.start)
    }

    /// Locks the enclave for a mutating operation, failing with the
    /// power-lost sentinel if the EPC backing is gone.
    fn lock_live(&self, op: &str) -> CtlResult<MutexGuard<EnclaveInner>> {
        let mut inner = self.inner.lock();
        if inner.state == EnclaveState::Destroyed {
            return ctl_result_err!(
                WrongState,
                format!("Enclave::{}(): enclave {:#x} is destroyed", op, self.id)
            );
        }
        if inner.state == EnclaveState::Dead {
            return Err(ctl_power_lost_err!(format!(
                "Enclave::{}(): enclave {:#x} is dead",
                op, self.id
            )));
        }
        if self.capability.is_backing_lost(self.id) {
            warn!(
                "Enclave::{}(): EPC backing of enclave {:#x} lost",
                op, self.id
            );
            self.invalidate_locked(&mut inner);
            return Err(ctl_power_lost_err!(format!(
                "Enclave::{}(): enclave {:#x} lost its EPC",
                op, self.id
            )));
        }
        Ok(inner)
    }

    fn release_epc(inner: &mut EnclaveInner) -> usize {
        inner.secs_frame = None;
        inner.map.clear()
    }

    fn invalidate_locked(&self, inner: &mut EnclaveInner) {
        let pages = Self::release_epc(inner);
        inner.state = EnclaveState::Dead;
        info!(
            "Enclave::invalidate(): enclave {:#x} dead, {} EPC pages freed",
            self.id, pages
        );
    }

    /// Marks the enclave dead and frees all of its EPC pages.
    pub fn invalidate(&self) {
        let mut inner = self.inner.lock();
        if !matches!(inner.state, EnclaveState::Dead | EnclaveState::Destroyed) {
            self.invalidate_locked(&mut inner);
        }
    }

    /// Tears the enclave down for good, freeing its EPC pages. Later
    /// operations fail with `WrongState`.
    pub(crate) fn destroy(&self) {
        let mut inner = self.inner.lock();
        let pages = Self::release_epc(&mut inner);
        inner.state = EnclaveState::Destroyed;
        info!(
            "Enclave::destroy(): enclave {:#x} destroyed, {} EPC pages freed",
            self.id, pages
        );
    }

    /// EADD + EEXTEND of one page at `offset`.
    ///
    /// Nothing changes unless every check and the EADD itself succeed.
    pub fn add_page(
        &self,
        offset: EnclOffset,
        page: &[u8; PAGE_SIZE],
        sec_info: SgxSecInfo,
        mrmask: MrMask,
    ) -> CtlResult {
        let mut inner = self.lock_live("add_page")?;
        match inner.state {
            EnclaveState::Created | EnclaveState::Building => {}
            state => {
                return ctl_result_err!(
                    WrongState,
                    format!("Enclave::add_page(): enclave is {:?}", state)
                )
            }
        }

        match sec_info.page_type {
            SgxEnclPageType::REG => {}
            // The hardware clears the permissions of a TCS page.
            SgxEnclPageType::TCS if sec_info.flags.is_empty() => {}
            _ => {
                return ctl_result_err!(
                    InvalidSecInfo,
                    format!("Enclave::add_page(): cannot add {:?}", sec_info)
                )
            }
        }
        inner.map.check_reserve(offset, PAGE_SIZE)?;

        if sec_info.page_type == SgxEnclPageType::TCS {
            let tcs = SgxTcs::from_page(page);
            tcs.validate_at_creation(inner.secs.size)?;
            info!(
                "New enclave thread(tcs_offset={:#x}): {:#x?}",
                offset, tcs
            );
        }

        let mut measure = inner.measure.clone();
        measure.add_page(offset as u64, sec_info)?;
        measure.extend_page(offset as u64, page, mrmask)?;

        let frame = self.epc.alloc(1)?;
        self.capability.add_page(self.id, offset, page, sec_info)?;

        inner
            .map
            .reserve(offset, sec_info, mrmask != MrMask::NONE, Some(frame))?;
        inner.measure = measure;
        inner.state = EnclaveState::Building;
        debug!(
            "Enclave::add_page(): {:#x} {:?} mrmask={:#x}",
            offset,
            sec_info,
            mrmask.bits()
        );
        Ok(())
    }

    /// EINIT. On any failure the enclave stays in `Building`.
    pub fn init(&self, sigstruct: &SigStruct) -> CtlResult {
        let mut inner = self.lock_live("init")?;
        if inner.state != EnclaveState::Building {
            return ctl_result_err!(
                WrongState,
                format!("Enclave::init(): enclave is {:?}", inner.state)
            );
        }

        let requested = inner.secs.attributes.flags - SgxAttributeFlags::INIT;
        let allowed = inner.allowed_attributes | inner.attached_attributes;
        if !allowed.contains(requested) {
            return ctl_result_err!(
                AttributeNotAllowed,
                format!(
                    "Enclave::init(): attributes {:?} not authorized",
                    requested - allowed
                )
            );
        }

        debug!("{:#x?}", sigstruct);
        let mr_enclave = inner.measure.finalize();
        if mr_enclave != sigstruct.body.mr_enclave {
            return ctl_result_err!(
                MeasurementMismatch,
                format!(
                    "Enclave::init(): mr_enclave not match {:#x?} {:#x?}",
                    mr_enclave, sigstruct.body.mr_enclave
                )
            );
        }
        if !sigstruct.body.covers(&inner.secs) {
            return ctl_result_err!(
                InvalidSignature,
                "Enclave::init(): SIGSTRUCT does not cover MISCSELECT/ATTRIBUTES"
            );
        }
        if !self.capability.verify_signature(sigstruct, &mr_enclave) {
            return ctl_result_err!(InvalidSignature, "Enclave::init(): signature rejected");
        }

        let mut hasher = Sha256::new();
        hasher.update(sigstruct.key.modules.as_slice());
        let secs = &mut inner.secs;
        secs.mr_enclave = mr_enclave;
        secs.mr_signer
            .as_mut_slice()
            .clone_from_slice(hasher.finalize().as_slice());
        secs.isv_prod_id = sigstruct.body.isv_prod_id;
        secs.isv_svn = sigstruct.body.isv_svn;
        secs.attributes.flags |= SgxAttributeFlags::INIT;
        inner.measure.seal();
        inner.state = EnclaveState::Initialized;
        info!("Enclave::init(): OK {:#x?}", inner.secs);
        Ok(())
    }

    /// Attaches the attribute granted by `token`, consuming it.
    pub fn set_attribute(&self, token: AttributeToken, fs: &dyn AttributeFs) -> CtlResult {
        let mut inner = self.lock_live("set_attribute")?;
        let fd = token.fd();
        if inner.attribute_fds.contains(&fd) {
            return ctl_result_err!(
                AlreadyAttached,
                format!("Enclave::set_attribute(): fd {} already attached", fd)
            );
        }
        let (fd, granted) = token.redeem(fs)?;
        if granted.is_empty() {
            return ctl_result_err!(
                InvalidToken,
                format!("Enclave::set_attribute(): fd {} grants nothing", fd)
            );
        }
        if inner.attached_attributes.contains(granted) {
            return ctl_result_err!(
                AlreadyAttached,
                format!("Enclave::set_attribute(): {:?} already attached", granted)
            );
        }
        inner.attached_attributes |= granted;
        inner.attribute_fds.push(fd);
        info!(
            "Enclave::set_attribute(): enclave {:#x} granted {:?}",
            self.id, granted
        );
        Ok(())
    }

    /// EENTER through the TCS at `tcs_offset`.
    ///
    /// Returns the fault record if the enclave trapped.
    pub fn enter(&self, tcs_offset: EnclOffset) -> CtlResult<Option<SgxEnclaveException>> {
        {
            let mut inner = self.lock_live("enter")?;
            if !inner.state.is_initialized() {
                return ctl_result_err!(
                    WrongState,
                    format!("Enclave::enter(): enclave is {:?}", inner.state)
                );
            }
            match inner.map.get(tcs_offset) {
                Some(entry) if entry.page_type() == SgxEnclPageType::TCS => {}
                Some(entry) => {
                    return ctl_result_err!(
                        InvalidDescriptor,
                        format!(
                            "Enclave::enter(): page {:#x} is {:?}, not TCS",
                            tcs_offset,
                            entry.page_type()
                        )
                    )
                }
                None => {
                    return ctl_result_err!(
                        NotFound,
                        format!("Enclave::enter(): no TCS at {:#x}", tcs_offset)
                    )
                }
            }
            inner.state = EnclaveState::Running;
        }

        match self.capability.enter(self.id, tcs_offset) {
            Ok(()) => Ok(None),
            Err(exception) => {
                debug!("Enclave::enter(): trapped {:#x?}", exception);
                Ok(Some(exception))
            }
        }
    }
}

impl Debug for Enclave {
    fn fmt(&self, f: &mut Formatter) -> Result {
        f.debug_struct("Enclave")
            .field("id", &self.id)
            .field("elrange", &self.elrange)
            .finish()
    }
}
