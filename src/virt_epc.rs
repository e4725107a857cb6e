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

//! Virtual EPC sections handed to nested guests.
//!
//! A virtual EPC only reserves capacity in the [`EpcPool`]. It is never
//! measured, never resized and has no page table of its own.

use alloc::collections::btree_map::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::capability::{AttributeFs, AttributeToken};
use crate::consts::PAGE_SIZE;
use crate::enclave::sgx::SgxAttributeFlags;
use crate::error::EnclResult;
use crate::memory::addr::page_count;
use crate::memory::{EpcFrame, EpcPool};

#[derive(Debug)]
pub struct VirtEpc {
    pub id: usize,
    size: usize,
    attributes: SgxAttributeFlags,
    frame: Mutex<Option<EpcFrame>>,
}

impl VirtEpc {
    /// Reserves `size` bytes of EPC, authorized by `token`.
    ///
    /// The token is consumed even if the size is rejected.
    pub fn create(
        id: usize,
        size: usize,
        token: AttributeToken,
        fs: &dyn AttributeFs,
        pool: &Arc<EpcPool>,
    ) -> EnclResult<Self> {
        if size == 0 || size % PAGE_SIZE != 0 {
            return encl_result_err!(
                InvalidSize,
                format!("VirtEpc::create(): invalid size {:#x}", size)
            );
        }
        let (_, attributes) = token.redeem(fs)?;
        let frame = pool.alloc(page_count(size))?;
        info!(
            "VirtEpc::create(): id={:#x} size={:#x} attributes={:?}",
            id, size, attributes
        );
        Ok(Self {
            id,
            size,
            attributes,
            frame: Mutex::new(Some(frame)),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn attributes(&self) -> SgxAttributeFlags {
        self.attributes
    }

    pub fn is_released(&self) -> bool {
        self.frame.lock().is_none()
    }

    /// Returns the reserved pages to the pool. Releasing twice is a no-op.
    pub fn release(&self) {
        if let Some(frame) = self.frame.lock().take() {
            debug!(
                "VirtEpc::release(): id={:#x} {} pages returned",
                self.id,
                frame.count()
            );
        }
    }
}

/// Live virtual EPC sections.
pub struct VirtEpcManager {
    pool: Arc<EpcPool>,
    instances: Mutex<BTreeMap<usize, Arc<VirtEpc>>>,
    next_id: AtomicUsize,
}

impl VirtEpcManager {
    pub fn new(pool: Arc<EpcPool>) -> Self {
        Self {
            pool,
            instances: Mutex::new(BTreeMap::new()),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn create(
        &self,
        size: usize,
        token: AttributeToken,
        fs: &dyn AttributeFs,
    ) -> EnclResult<Arc<VirtEpc>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let virt = Arc::new(VirtEpc::create(id, size, token, fs, &self.pool)?);
        self.instances.lock().insert(id, virt.clone());
        Ok(virt)
    }

    pub fn get(&self, id: usize) -> EnclResult<Arc<VirtEpc>> {
        match self.instances.lock().get(&id) {
            Some(virt) => Ok(virt.clone()),
            None => encl_result_err!(NotFound, format!("Virtual EPC {:#x} not found", id)),
        }
    }

    pub fn release(&self, id: usize) -> EnclResult {
        match self.instances.lock().remove(&id) {
            Some(virt) => {
                virt.release();
                Ok(())
            }
            None => encl_result_err!(NotFound, format!("Virtual EPC {:#x} not found", id)),
        }
    }

    pub fn len(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EnclErrorNum;
    use crate::mock::{MockAttributeFs, FD_PROVISION};

    #[test]
    fn test_invalid_size_leaves_pool_unchanged() {
        let pool = EpcPool::new(16);
        let manager = VirtEpcManager::new(pool.clone());
        for &size in &[0, 4097, PAGE_SIZE + 1, 17 * PAGE_SIZE] {
            let err = manager
                .create(size, AttributeToken::new(FD_PROVISION), &MockAttributeFs)
                .unwrap_err();
            let expected = if size == 17 * PAGE_SIZE {
                EnclErrorNum::NoMemory
            } else {
                EnclErrorNum::InvalidSize
            };
            assert_eq!(err.num(), expected);
            assert_eq!(pool.free_pages(), 16);
        }
        let err = manager
            .create(PAGE_SIZE, AttributeToken::new(99), &MockAttributeFs)
            .unwrap_err();
        assert_eq!(err.num(), EnclErrorNum::InvalidToken);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_create_and_release() {
        let pool = EpcPool::new(16);
        let manager = VirtEpcManager::new(pool.clone());
        let virt = manager
            .create(4 * PAGE_SIZE, AttributeToken::new(FD_PROVISION), &MockAttributeFs)
            .unwrap();
        assert_eq!(pool.free_pages(), 12);
        assert_eq!(virt.size(), 4 * PAGE_SIZE);
        assert!(virt.attributes().contains(SgxAttributeFlags::PROVISIONKEY));
        assert_eq!(manager.get(virt.id).unwrap().id, virt.id);

        manager.release(virt.id).unwrap();
        assert!(virt.is_released());
        assert_eq!(pool.free_pages(), 16);
        assert_eq!(
            manager.release(virt.id).unwrap_err().num(),
            EnclErrorNum::NotFound
        );
    }
}
