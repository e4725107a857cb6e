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

//! Access to caller-supplied memory.
//!
//! Request records carry linear addresses of the SECS, SECINFO, SIGSTRUCT and
//! page contents in the caller's address space. The embedder resolves them
//! through [`SourceMemory`]; the manager only ever copies out of it.

use core::mem::{size_of, MaybeUninit};
use core::slice;

use crate::error::EnclResult;

/// Marker for types that are valid for any bit pattern.
///
/// # Safety
///
/// Implementors must be `repr(C)` (or `repr(C, packed)`) and consist of
/// integers and byte arrays only.
pub unsafe trait Plain: Sized {}

pub trait SourceMemory {
    /// Copies `buf.len()` bytes starting at the caller address `addr`.
    fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> EnclResult;

    fn read<T: Plain>(&self, addr: u64) -> EnclResult<T>
    where
        Self: Sized,
    {
        let mut val = MaybeUninit::<T>::zeroed();
        let buf = unsafe { slice::from_raw_parts_mut(val.as_mut_ptr() as *mut u8, size_of::<T>()) };
        self.read_bytes(addr, buf)?;
        Ok(unsafe { val.assume_init() })
    }
}

unsafe impl Plain for u64 {}
