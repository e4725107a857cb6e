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

//! Platform description consumed by the enclave manager.
//!
//! On real hardware these values come from CPUID leaf 0x12 (SGX capabilities)
//! and leaf 0xD (XSAVE state sizes). Embedders fill them in once and hand the
//! result to [`EnclaveManager::new`](crate::enclave::EnclaveManager::new).

use crate::enclave::sgx::SgxAttributeFlags;

/// Number of XSAVE state components.
pub const XFEATURE_MAX: usize = 64;

/// SSA GPR area size in bytes.
pub const SGX_SSA_GPRS_SIZE: u32 = 184;
/// SSA MISC.EXINFO area size in bytes.
pub const SGX_SSA_MISC_EXINFO_SIZE: u32 = 16;

/// MISCSELECT bits without a defined meaning.
pub const SGX_MISC_RESERVED_MASK: u32 = !1;
/// ATTRIBUTES bits without a defined meaning (bit 3 and bits 8..64).
pub const SGX_ATTR_RESERVED_MASK: u64 = (1 << 3) | !0xff;

#[derive(Clone, Debug)]
pub struct PlatformConfig {
    /// Maximum enclave size in 32-bit mode.
    pub encl_size_max_32: u64,
    /// Maximum enclave size in 64-bit mode.
    pub encl_size_max_64: u64,
    pub misc_reserved_mask: u32,
    pub attributes_reserved_mask: u64,
    pub xfrm_reserved_mask: u64,
    /// XSAVE size of each state component, indexed by XFRM bit.
    pub xsave_size_tbl: [u32; XFEATURE_MAX],
    /// Attributes an enclave may request without an attribute token.
    pub allowed_attributes: SgxAttributeFlags,
    /// Total EPC capacity in pages, shared by enclaves and virtual EPC.
    pub epc_pages: usize,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        let mut xsave_size_tbl = [0; XFEATURE_MAX];
        // offset + size of AVX, BNDREGS, BNDCSR and the AVX-512 components
        xsave_size_tbl[2] = 576 + 256;
        xsave_size_tbl[3] = 960 + 64;
        xsave_size_tbl[4] = 1024 + 64;
        xsave_size_tbl[5] = 1088 + 64;
        xsave_size_tbl[6] = 1152 + 512;
        xsave_size_tbl[7] = 1664 + 1024;
        Self {
            encl_size_max_32: 1 << 31,
            encl_size_max_64: 1 << 36,
            misc_reserved_mask: SGX_MISC_RESERVED_MASK,
            attributes_reserved_mask: SGX_ATTR_RESERVED_MASK,
            xfrm_reserved_mask: !0xff,
            xsave_size_tbl,
            allowed_attributes: SgxAttributeFlags::ALLOWED_MASK,
            epc_pages: 0x2_0000,
        }
    }
}

impl PlatformConfig {
    /// Minimum SSA frame size in pages for the given MISCSELECT and XFRM.
    pub fn ssa_frame_size(&self, misc_select: u32, xfrm: u64) -> u32 {
        let mut size_max = crate::consts::PAGE_SIZE as u32;
        for i in 2..XFEATURE_MAX {
            if xfrm & (1 << i) == 0 {
                continue;
            }
            let mut size = SGX_SSA_GPRS_SIZE + self.xsave_size_tbl[i];
            if misc_select & 1 != 0 {
                size += SGX_SSA_MISC_EXINFO_SIZE;
            }
            size_max = size_max.max(size);
        }
        crate::memory::addr::page_count(size_max as usize) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssa_frame_size() {
        let config = PlatformConfig::default();
        // x87 and SSE only.
        assert_eq!(config.ssa_frame_size(0, 0x3), 1);
        // AVX-512 state still fits in one page.
        assert_eq!(config.ssa_frame_size(1, 0xe7), 1);
        let mut big = config.clone();
        big.xsave_size_tbl[7] = 8192;
        assert_eq!(big.ssa_frame_size(1, 0xe7), 3);
    }
}
