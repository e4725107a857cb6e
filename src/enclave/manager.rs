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

use alloc::collections::btree_map::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::{Mutex, RwLock};

use super::{Enclave, SgxSecs};
use crate::capability::EnclaveCapability;
use crate::config::PlatformConfig;
use crate::consts::MAX_ENCLAVE_NUM;
use crate::control::error::CtlResult;
use crate::intervaltree::IntervalTree;
use crate::memory::{EpcPool, LinAddr};

/// Registry of live enclaves and the ELRANGEs they claim.
pub struct EnclaveManager {
    config: PlatformConfig,
    capability: Arc<dyn EnclaveCapability>,
    epc: Arc<EpcPool>,
    enclaves: RwLock<BTreeMap<usize, Arc<Enclave>>>,
    elranges: Mutex<IntervalTree<usize>>,
    next_id: AtomicUsize,
}

impl EnclaveManager {
    pub fn new(config: PlatformConfig, capability: Arc<dyn EnclaveCapability>) -> Self {
        let epc = EpcPool::new(config.epc_pages);
        Self {
            config,
            capability,
            epc,
            enclaves: RwLock::new(BTreeMap::new()),
            elranges: Mutex::new(IntervalTree::new()),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn epc_pool(&self) -> &Arc<EpcPool> {
        &self.epc
    }

    pub fn len(&self) -> usize {
        self.enclaves.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.enclaves.read().is_empty()
    }

    /// ECREATE: registers a new enclave described by `secs`.
    ///
    /// The ELRANGE must not overlap the ELRANGE of any live enclave.
    pub fn create(&self, secs: &SgxSecs) -> CtlResult<Arc<Enclave>> {
        secs.validate(&self.config)?;
        let mut enclaves = self.enclaves.write();
        if enclaves.len() >= MAX_ENCLAVE_NUM {
            return ctl_result_err!(
                NoMemory,
                format!("No enough room for enclave, {} alive", enclaves.len())
            );
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let elrange = secs.elrange();
        self.elranges.lock().insert(elrange.clone(), id)?;

        match Enclave::new(
            id,
            secs,
            &self.config,
            self.capability.clone(),
            self.epc.clone(),
        ) {
            Ok(enclave) => {
                enclaves.insert(id, enclave.clone());
                Ok(enclave)
            }
            Err(err) => {
                warn!("EnclaveManager::create(): {:?}", err);
                let _ = self.elranges.lock().remove(&elrange);
                Err(err)
            }
        }
    }

    pub fn find_enclave(&self, enclave_id: usize) -> CtlResult<Arc<Enclave>> {
        match self.enclaves.read().get(&enclave_id) {
            Some(enclave) => Ok(enclave.clone()),
            None => ctl_result_err!(
                NotFound,
                format!("Enclave with id {:#x} not found", enclave_id)
            ),
        }
    }

    /// Looks up the enclave whose ELRANGE contains `addr`.
    pub fn find_by_addr(&self, addr: LinAddr) -> CtlResult<Arc<Enclave>> {
        let id = match self.elranges.lock().find(addr) {
            Some((_, id)) => *id,
            None => {
                return ctl_result_err!(
                    NotFound,
                    format!("No enclave at address {:#x}", addr)
                )
            }
        };
        self.find_enclave(id)
    }

    /// Tears the enclave down, freeing its EPC and its ELRANGE.
    pub fn remove_enclave(&self, enclave_id: usize) -> CtlResult {
        let enclave = match self.enclaves.write().remove(&enclave_id) {
            Some(enclave) => enclave,
            None => {
                return ctl_result_err!(
                    NotFound,
                    format!("Enclave with id {:#x} not found", enclave_id)
                )
            }
        };
        enclave.destroy();
        self.elranges.lock().remove(enclave.elrange())?;
        info!("EnclaveManager::remove_enclave(): {:#x?} removed", enclave);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{EnclaveState, MrMask};
    use crate::consts::PAGE_SIZE;
    use crate::error::EnclErrorNum;
    use crate::mock;

    #[test]
    fn test_overlapping_elrange() {
        let (manager, _) = mock::manager();
        let first = mock::create(&manager, 0x10_0000, 0x4000);
        let err = manager.create(&mock::secs(0x10_0000, 0x2000)).unwrap_err();
        assert_eq!(err.num(), Some(EnclErrorNum::AlreadyOccupied));
        let second = mock::create(&manager, 0x10_4000, 0x4000);
        assert_ne!(first.id, second.id);
        assert_eq!(manager.len(), 2);

        assert_eq!(manager.find_by_addr(0x10_5fff).unwrap().id, second.id);
        assert!(manager.find_by_addr(0x10_8000).is_err());

        manager.remove_enclave(first.id).unwrap();
        assert_eq!(
            manager.find_enclave(first.id).unwrap_err().num(),
            Some(EnclErrorNum::NotFound)
        );
        mock::create(&manager, 0x10_0000, 0x2000);
    }

    #[test]
    fn test_create_failure_releases_elrange() {
        let (manager, _) = mock::manager();
        let mut secs = mock::secs(0x10_0000, 0x4000);
        secs.ssa_frame_size = 0;
        let err = manager.create(&secs).unwrap_err();
        assert_eq!(err.num(), Some(EnclErrorNum::InvalidDescriptor));

        let (manager, cap) = mock::manager();
        cap.fail_next_create();
        assert!(manager.create(&mock::secs(0x10_0000, 0x4000)).is_err());
        assert!(manager.is_empty());
        assert_eq!(
            manager.epc_pool().free_pages(),
            manager.epc_pool().total_pages()
        );
        mock::create(&manager, 0x10_0000, 0x4000);
    }

    #[test]
    fn test_remove_frees_epc() {
        let (manager, _) = mock::manager();
        let enclave = mock::create(&manager, 0x10_0000, 0x4000);
        enclave
            .add_page(0, &[0; PAGE_SIZE], mock::rw(), MrMask::FULL)
            .unwrap();
        manager.remove_enclave(enclave.id).unwrap();
        assert_eq!(
            manager.epc_pool().free_pages(),
            manager.epc_pool().total_pages()
        );
        assert_eq!(enclave.state(), EnclaveState::Destroyed);
        assert_eq!(enclave.epc_pages(), 0);

        // A stale handle reports a state error, not a lost EPC.
        let err = enclave
            .add_page(0x1000, &[0; PAGE_SIZE], mock::rw(), MrMask::FULL)
            .unwrap_err();
        assert!(!err.is_power_lost());
        assert_eq!(err.num(), Some(EnclErrorNum::WrongState));
        enclave.invalidate();
        assert_eq!(enclave.state(), EnclaveState::Destroyed);
    }
}
