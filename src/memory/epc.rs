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

//! EPC capacity accounting.
//!
//! The pool only counts pages: enclaves consume one page for the SECS and one
//! per added page, virtual EPC instances consume their whole size up front.
//! Pages are handed out as [`EpcFrame`]s which give the capacity back on drop.

use alloc::sync::Arc;

use spin::Mutex;

use crate::error::EnclResult;

#[derive(Debug)]
pub struct EpcPool {
    total: usize,
    free: Mutex<usize>,
}

/// A safe wrapper for a batch of EPC pages taken from an [`EpcPool`].
#[derive(Debug)]
pub struct EpcFrame {
    pool: Arc<EpcPool>,
    count: usize,
}

impl EpcPool {
    pub fn new(total: usize) -> Arc<Self> {
        Arc::new(Self {
            total,
            free: Mutex::new(total),
        })
    }

    pub fn total_pages(&self) -> usize {
        self.total
    }

    pub fn free_pages(&self) -> usize {
        *self.free.lock()
    }

    /// Takes `count` pages, or nothing if the pool cannot cover all of them.
    pub fn alloc(self: &Arc<Self>, count: usize) -> EnclResult<EpcFrame> {
        let mut free = self.free.lock();
        if count > *free {
            return encl_result_err!(
                NoMemory,
                format!("EpcPool::alloc(): {} pages requested, {} free", count, *free)
            );
        }
        *free -= count;
        trace!("Allocate {} EPC pages, {} left", count, *free);
        Ok(EpcFrame {
            pool: self.clone(),
            count,
        })
    }

    fn dealloc(&self, count: usize) {
        let mut free = self.free.lock();
        *free += count;
        if *free > self.total {
            error!("EPC pool overflow: {} free of {}", *free, self.total);
            *free = self.total;
        }
        trace!("Deallocate {} EPC pages, {} left", count, *free);
    }
}

impl EpcFrame {
    pub fn count(&self) -> usize {
        self.count
    }
}

impl Drop for EpcFrame {
    fn drop(&mut self) {
        self.pool.dealloc(self.count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_drop() {
        let pool = EpcPool::new(4);
        let frame = pool.alloc(3).unwrap();
        assert_eq!(frame.count(), 3);
        assert_eq!(pool.free_pages(), 1);
        assert_eq!(pool.alloc(2).unwrap_err().num(), crate::EnclErrorNum::NoMemory);
        assert_eq!(pool.free_pages(), 1);
        drop(frame);
        assert_eq!(pool.free_pages(), 4);
    }
}
