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

//! Linear addresses and enclave offsets.

use core::ops::Range;

use crate::consts::PAGE_SIZE;
use crate::error::EnclResult;

/// Linear address in the caller's address space.
pub type LinAddr = usize;

/// Byte offset relative to the base of an ELRANGE.
pub type EnclOffset = usize;

pub const fn align_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

pub const fn align_up(addr: usize) -> usize {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

pub const fn is_aligned(addr: usize) -> bool {
    page_offset(addr) == 0
}

pub const fn page_count(size: usize) -> usize {
    align_up(size) / PAGE_SIZE
}

pub const fn page_offset(addr: usize) -> usize {
    addr & (PAGE_SIZE - 1)
}

/// Page-aligned, non-empty range `[start, start + length)`.
///
/// Fails with `Misaligned` on an empty or unaligned range and with
/// `OutOfRange` if the end does not fit in the address space.
pub fn page_range(start: usize, length: usize) -> EnclResult<Range<usize>> {
    if length == 0 || !is_aligned(start) || !is_aligned(length) {
        return encl_result_err!(
            Misaligned,
            format!("start {:#x} length {:#x}", start, length)
        );
    }
    match start.checked_add(length) {
        Some(end) => Ok(start..end),
        None => encl_result_err!(
            OutOfRange,
            format!("start {:#x} length {:#x} overflows", start, length)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EnclErrorNum;

    #[test]
    fn test_align() {
        assert_eq!(align_down(0x1fff), 0x1000);
        assert_eq!(align_up(0x1001), 0x2000);
        assert_eq!(page_count(0x1001), 2);
        assert!(is_aligned(0x3000));
        assert!(!is_aligned(0x3008));
    }

    #[test]
    fn test_page_range() {
        let num = |start, length| page_range(start, length).unwrap_err().num();
        assert_eq!(page_range(0x1000, 0x2000).unwrap(), 0x1000..0x3000);
        assert_eq!(num(0x1000, 0), EnclErrorNum::Misaligned);
        assert_eq!(num(0x1000, 0x1001), EnclErrorNum::Misaligned);
        assert_eq!(num(0x1008, 0x1000), EnclErrorNum::Misaligned);
        assert_eq!(num(usize::MAX & !0xfff, 0x2000), EnclErrorNum::OutOfRange);
    }
}
