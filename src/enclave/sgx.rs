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

//! Original SGX structures.

use bitflags::bitflags;
use core::convert::TryFrom;
use core::fmt::{Debug, Formatter, Result};
use core::mem::{size_of, MaybeUninit};
use core::ops::Range;

use super::structs::{Sha256Value, SigKey3072Value};
use crate::config::PlatformConfig;
use crate::consts::PAGE_SIZE;
use crate::error::{EnclError, EnclResult};
use crate::memory::addr::is_aligned;
use crate::memory::{LinAddr, Plain};

/// Enclave Linear Address Range (ELRANGE).
pub type ElRange = Range<LinAddr>;

bitflags! {
    /// The ATTRIBUTES data structure is comprised of bit-granular fields that are used in the SECS.
    pub struct SgxAttributeFlags: u64 {
        /// This bit indicates if the enclave has been initialized by EINIT.
        const INIT              = 1 << 0;
        /// If 1, the enclave permit debugger to read and write enclave data using EDBGRD and EDBGWR.
        const DEBUG             = 1 << 1;
        /// Enclave runs in 64-bit mode.
        const MODE64BIT         = 1 << 2;
        /// Provisioning Key is available from EGETKEY.
        const PROVISIONKEY      = 1 << 4;
        /// EINIT token key is available from EGETKEY.
        const EINITTOKEN_KEY    = 1 << 5;
        /// Enable CET attributes.
        const CET               = 1 << 6;
        /// Key Separation and Sharing Enabled.
        const KSS               = 1 << 7;
    }
}

impl SgxAttributeFlags {
    /// Attributes any enclave may request without presenting an attribute token.
    pub const ALLOWED_MASK: Self = Self {
        bits: Self::DEBUG.bits() | Self::MODE64BIT.bits() | Self::KSS.bits(),
    };
}

/// ATTRIBUTES data structure in the SECS.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SgxAttributes {
    /// First 8 bits of ATTRIBUTES structure.
    pub flags: SgxAttributeFlags,
    /// XSAVE Feature Request Mask.
    pub xfrm: u64,
}

/// XFRM bits that must be set or paired.
const XFEATURE_FP: u64 = 1 << 0;
const XFEATURE_SSE: u64 = 1 << 1;
const XFEATURE_BNDREGS: u32 = 3;
const XFEATURE_BNDCSR: u32 = 4;

bitflags! {
    /// Permissions of an enclave page.
    pub struct SgxEnclPageFlags: u8 {
        /// The page can be read from inside the enclave.
        const R         = 1 << 0;
        /// The page can be written from inside the enclave.
        const W         = 1 << 1;
        /// The page can be executed from inside the enclave.
        const X         = 1 << 2;
    }
}

impl SgxEnclPageFlags {
    pub const PERM_MASK: Self = Self {
        bits: Self::R.bits() | Self::W.bits() | Self::X.bits(),
    };

    /// W without R cannot be expressed in the EPCM.
    pub fn is_valid(&self) -> bool {
        !self.contains(Self::W) || self.contains(Self::R)
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[allow(non_camel_case_types, clippy::upper_case_acronyms)]
pub enum SgxEnclPageType {
    /// Page is an SECS.
    SECS = 0,
    /// Page is a TCS.
    TCS = 1,
    /// Page is a regular page.
    REG = 2,
    /// Page is a Version Array.
    VA = 3,
    /// Page is in trimmed state.
    TRIM = 4,
    /// Page is first page of a shadow stack.
    SS_FIRST = 5,
    /// Page is not first page of a shadow stack.
    SS_REST = 6,
}

impl TryFrom<u8> for SgxEnclPageType {
    type Error = EnclError;

    fn try_from(page_type: u8) -> EnclResult<SgxEnclPageType> {
        match page_type {
            0 => Ok(SgxEnclPageType::SECS),
            1 => Ok(SgxEnclPageType::TCS),
            2 => Ok(SgxEnclPageType::REG),
            3 => Ok(SgxEnclPageType::VA),
            4 => Ok(SgxEnclPageType::TRIM),
            5 => Ok(SgxEnclPageType::SS_FIRST),
            6 => Ok(SgxEnclPageType::SS_REST),
            _ => encl_result_err!(
                InvalidSecInfo,
                format!("Invalid page_type={:#x}", page_type)
            ),
        }
    }
}

/// Raw Security Information (SECINFO) as found in caller memory.
#[repr(C, align(64))]
#[derive(Clone, Copy)]
pub struct SgxSecInfoDesc {
    /// Bits 0..3: R/W/X, bits 8..16: page type, all others must be zero.
    pub flags: u64,
    /// Must be zero.
    pub reserved: [u64; 7],
}
static_assertions::const_assert_eq!(size_of::<SgxSecInfoDesc>(), 64);

unsafe impl Plain for SgxSecInfoDesc {}

impl SgxSecInfoDesc {
    const PERMISSION_MASK: u64 = 0x7;
    const PAGE_TYPE_MASK: u64 = 0xff << 8;
    const RESERVED_MASK: u64 = !(Self::PERMISSION_MASK | Self::PAGE_TYPE_MASK);

    pub fn new(flags: u64) -> Self {
        Self {
            flags,
            reserved: [0; 7],
        }
    }
}

impl Default for SgxSecInfoDesc {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Validated Security Information (SECINFO).
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct SgxSecInfo {
    /// Permissions of the page.
    pub flags: SgxEnclPageFlags,
    /// The type of page that the SECINFO is associated with.
    pub page_type: SgxEnclPageType,
}

impl SgxSecInfo {
    pub fn new(flags: SgxEnclPageFlags, page_type: SgxEnclPageType) -> Self {
        Self { flags, page_type }
    }
}

impl From<SgxSecInfo> for u64 {
    fn from(info: SgxSecInfo) -> u64 {
        ((info.page_type as u64) << 8) | (info.flags.bits() as u64)
    }
}

impl From<SgxSecInfo> for SgxSecInfoDesc {
    fn from(info: SgxSecInfo) -> Self {
        Self::new(info.into())
    }
}

impl TryFrom<&SgxSecInfoDesc> for SgxSecInfo {
    type Error = EnclError;

    /// Rejects reserved bits, an undefined page type and W without R.
    fn try_from(desc: &SgxSecInfoDesc) -> EnclResult<SgxSecInfo> {
        if desc.flags & SgxSecInfoDesc::RESERVED_MASK != 0
            || desc.reserved.iter().any(|&r| r != 0)
        {
            return encl_result_err!(
                InvalidSecInfo,
                format!("Reserved bits set in SECINFO flags={:#x}", desc.flags)
            );
        }
        // All permission bits are defined, so `from_bits_truncate()` loses nothing.
        let flags = SgxEnclPageFlags::from_bits_truncate(desc.flags as u8);
        if !flags.is_valid() {
            return encl_result_err!(
                InvalidSecInfo,
                format!("W without R in SECINFO flags={:#x}", desc.flags)
            );
        }
        let page_type = SgxEnclPageType::try_from((desc.flags >> 8) as u8)?;
        Ok(Self { flags, page_type })
    }
}

/// SGX Enclave Control Structrue (SECS).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SgxSecs {
    /// (  0) Size of the enclave in bytes; must be power of 2.
    pub size: u64,
    /// (  8) Enclave Base Linear Address must be naturally aligned to size.
    pub base_addr: u64,
    /// ( 16) Size of 1 SSA frame in pages.
    pub ssa_frame_size: u32,
    /// ( 20) Bit vector specifying which extended features are saved to the MISC region of the SSA
    /// frame when an AEX occurs.
    pub misc_select: u32,
    /// ( 24) Reserved
    reserved1: [u8; 24],
    /// ( 48) Attributes of the Enclave.
    pub attributes: SgxAttributes,
    /// ( 64) Measurement Register of enclave build process.
    pub mr_enclave: Sha256Value,
    /// ( 96) Reserved
    reserved2: [u8; 32],
    /// (128) Measurement Register extended with the public key that verified the enclave.
    pub mr_signer: Sha256Value,
    /// (160) Reserved
    reserved3: [u8; 32],
    /// (192) Post EINIT configuration identity.
    pub config_id: [u8; 64],
    /// (256) Product ID of enclave.
    pub isv_prod_id: u16,
    /// (258) Security version number (SVN) of the enclave.
    pub isv_svn: u16,
    /// (260) Post EINIT configuration security version number (SVN).
    pub config_svn: u16,
    /// (262) Reserved
    reserved4: [u8; 3834],
}
static_assertions::const_assert_eq!(size_of::<SgxSecs>(), PAGE_SIZE);

unsafe impl Plain for SgxSecs {}

impl SgxSecs {
    pub fn new(base_addr: u64, size: u64, attributes: SgxAttributeFlags, xfrm: u64) -> Self {
        let mut secs = Self::default();
        secs.base_addr = base_addr;
        secs.size = size;
        secs.ssa_frame_size = 1;
        secs.attributes = SgxAttributes {
            flags: attributes,
            xfrm,
        };
        secs
    }

    pub fn elrange(&self) -> ElRange {
        self.base_addr as usize..(self.base_addr + self.size) as usize
    }

    /// Checks the SECS the way ECREATE would, against the platform limits.
    pub fn validate(&self, config: &PlatformConfig) -> EnclResult {
        let size = self.size;
        if size < 2 * PAGE_SIZE as u64 || !size.is_power_of_two() {
            return encl_result_err!(
                InvalidDescriptor,
                format!("SgxSecs::validate(): bad enclave size {:#x}", size)
            );
        }
        if self.base_addr & (size - 1) != 0 {
            return encl_result_err!(
                InvalidDescriptor,
                format!(
                    "SgxSecs::validate(): base {:#x} is not aligned to size {:#x}",
                    self.base_addr, size
                )
            );
        }
        if self.base_addr.checked_add(size).is_none() {
            return encl_result_err!(InvalidDescriptor, "SgxSecs::validate(): ELRANGE overflows");
        }

        let attributes = self.attributes.flags.bits();
        let xfrm = self.attributes.xfrm;
        if self.misc_select & config.misc_reserved_mask != 0
            || attributes & config.attributes_reserved_mask != 0
            || xfrm & config.xfrm_reserved_mask != 0
        {
            return encl_result_err!(
                InvalidDescriptor,
                format!(
                    "SgxSecs::validate(): reserved bits set, miscselect={:#x} attributes={:#x} xfrm={:#x}",
                    self.misc_select, attributes, xfrm
                )
            );
        }

        let size_max = if self.attributes.flags.contains(SgxAttributeFlags::MODE64BIT) {
            config.encl_size_max_64
        } else {
            config.encl_size_max_32
        };
        if size > size_max {
            return encl_result_err!(
                InvalidDescriptor,
                format!(
                    "SgxSecs::validate(): size {:#x} exceeds {:#x}",
                    size, size_max
                )
            );
        }

        if xfrm & XFEATURE_FP == 0
            || xfrm & XFEATURE_SSE == 0
            || (xfrm >> XFEATURE_BNDREGS) & 1 != (xfrm >> XFEATURE_BNDCSR) & 1
        {
            return encl_result_err!(
                InvalidDescriptor,
                format!("SgxSecs::validate(): bad xfrm {:#x}", xfrm)
            );
        }

        let ssa_frame_size = config.ssa_frame_size(self.misc_select, xfrm);
        if self.ssa_frame_size == 0 || ssa_frame_size > self.ssa_frame_size {
            return encl_result_err!(
                InvalidDescriptor,
                format!(
                    "SgxSecs::validate(): ssa_frame_size {} < {}",
                    self.ssa_frame_size, ssa_frame_size
                )
            );
        }

        if self.reserved1.iter().any(|&b| b != 0)
            || self.reserved2.iter().any(|&b| b != 0)
            || self.reserved3.iter().any(|&b| b != 0)
            || self.reserved4.iter().any(|&b| b != 0)
        {
            return encl_result_err!(
                InvalidDescriptor,
                "SgxSecs::validate(): reserved field is not zero"
            );
        }
        Ok(())
    }
}

/// Thread Control Structure (TCS).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SgxTcs {
    /// ( 0) Enclave execution state of the thread controlled by this TCS. Must be 0 at creation.
    stage: u64,
    /// ( 8) The thread’s execution flags.
    pub flags: u64,
    /// (16) Offset of the base of the State Save Area stack, relative to the enclave base. Must be page
    /// aligned.
    pub ossa: u64,
    /// (24) Current slot index of an SSA frame.
    pub cssa: u32,
    /// (28) Number of available slots for SSA frames.
    pub nssa: u32,
    /// (32) Offset in enclave to which control is transferred on EENTER relative to the base of the
    /// enclave.
    pub oentry: u64,
    /// (40) The value of the Asynchronous Exit Pointer that was saved at EENTER time. Must be 0 at creation.
    aep: u64,
    /// (48) Offset to add to the base address of the enclave for producing the base address of FS
    /// segment inside the enclave. Must be page aligned.
    pub ofs_base: u64,
    /// (56) Offset to add to the base address of the enclave for producing the base address of GS
    /// segment inside the enclave. Must be page aligned.
    pub ogs_base: u64,
    /// (64) Size to become the new FS limit in 32-bit mode.
    pub fs_limit: u32,
    /// (68) Size to become the new GS limit in 32-bit mode.
    pub gs_limit: u32,
    /// (72) Rerserved field in TCS, must be 0 at creation.
    reserved: [u8; 4024],
}
static_assertions::const_assert_eq!(size_of::<SgxTcs>(), PAGE_SIZE);

unsafe impl Plain for SgxTcs {}

impl SgxTcs {
    /// Only DBGOPTIN (bit 0) is defined, and it may not be set by the loader.
    const FLAGS_RESERVED_MASK: u64 = !0;

    pub fn new(ossa: u64, oentry: u64) -> Self {
        let mut tcs = Self::default();
        tcs.ossa = ossa;
        tcs.nssa = 1;
        tcs.oentry = oentry;
        tcs.fs_limit = 0xfff;
        tcs.gs_limit = 0xfff;
        tcs
    }

    /// Reinterprets the contents of an added page.
    pub fn from_page(page: &[u8; PAGE_SIZE]) -> Self {
        unsafe { core::ptr::read_unaligned(page.as_ptr() as *const Self) }
    }

    pub fn as_page(&self) -> &[u8; PAGE_SIZE] {
        unsafe { &*(self as *const Self as *const [u8; PAGE_SIZE]) }
    }

    /// Check whether the MBZ(Must Be Zero) bits, reserved bits and offsets
    /// are valid when adding a TCS to an enclave of `encl_size` bytes.
    pub fn validate_at_creation(&self, encl_size: u64) -> EnclResult {
        let valid_offset = |offset: u64| is_aligned(offset as usize) && offset < encl_size;
        if self.stage != 0 || self.aep != 0 || self.flags & Self::FLAGS_RESERVED_MASK != 0 {
            return encl_result_err!(
                InvalidDescriptor,
                format!("SgxTcs::validate_at_creation(): bad flags {:#x?}", self)
            );
        }
        if !valid_offset(self.ossa) || !valid_offset(self.ofs_base) || !valid_offset(self.ogs_base)
        {
            return encl_result_err!(
                InvalidDescriptor,
                format!("SgxTcs::validate_at_creation(): bad offsets {:#x?}", self)
            );
        }
        if self.fs_limit & 0xfff != 0xfff || self.gs_limit & 0xfff != 0xfff {
            return encl_result_err!(
                InvalidDescriptor,
                format!("SgxTcs::validate_at_creation(): bad limits {:#x?}", self)
            );
        }
        if self.reserved.iter().any(|&b| b != 0) {
            return encl_result_err!(
                InvalidDescriptor,
                "SgxTcs::validate_at_creation(): reserved field is not zero"
            );
        }
        Ok(())
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct SigStructHeader {
    /// (0) must be (06000000E100000000000100H)
    pub header1: [u8; 12],
    /// (12) bit 31: 0 = prod, 1 = debug; Bit 30-0: Must be zero
    pub types: u32,
    /// (16) Intel=0x8086, ISV=0x0000
    pub module_vendor: u32,
    /// (20) build date as yyyymmdd
    pub date: u32,
    /// (24) must be (01010000600000006000000001000000H)
    pub header2: [u8; 16],
    /// (40) For Launch Enclaves: HWVERSION != 0. Others, HWVERSION = 0
    pub hw_version: u32,
    /// (44) Must be 0
    reserved: [u8; 84],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct SigStructKey {
    /// (128) Module Public Key (keylength=3072 bits)
    pub modules: SigKey3072Value,
    /// (512) RSA Exponent = 3
    pub exponent: [u8; 4],
    /// (516) Signature over Header and Body
    pub signature: SigKey3072Value,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct SigStructBody {
    /// (900) The MISCSELECT that must be set
    pub misc_select: u32,
    /// (904) Mask of MISCSELECT to enforce
    pub misc_mask: u32,
    /// (908) Reserved. Must be 0.
    reserved: [u8; 4],
    /// (912) ISV assigned Family ID
    pub isv_family_id: [u8; 16],
    /// (928) Enclave Attributes that must be set
    pub attributes: [u8; 16],
    /// (944) Mask of Attributes to Enforce
    pub attributes_mask: [u8; 16],
    /// (960) MRENCLAVE - (32 bytes)
    pub mr_enclave: Sha256Value,
    /// (992) Must be 0
    reserved2: [u8; 16],
    /// (1008) ISV assigned Extended Product ID
    pub isvext_prod_id: [u8; 16],
    /// (1024) ISV assigned Product ID
    pub isv_prod_id: u16,
    /// (1026) ISV assigned SVN
    pub isv_svn: u16,
}

impl SigStructBody {
    /// Whether the enforced MISCSELECT and ATTRIBUTES bits agree with `secs`.
    pub fn covers(&self, secs: &SgxSecs) -> bool {
        let word = |bytes: &[u8; 16], i: usize| {
            let mut buf = [0; 8];
            buf.copy_from_slice(&bytes[i * 8..(i + 1) * 8]);
            u64::from_le_bytes(buf)
        };
        let flags_mask = word(&self.attributes_mask, 0);
        let xfrm_mask = word(&self.attributes_mask, 1);
        secs.misc_select & self.misc_mask == self.misc_select & self.misc_mask
            && secs.attributes.flags.bits() & flags_mask
                == word(&self.attributes, 0) & flags_mask
            && secs.attributes.xfrm & xfrm_mask == word(&self.attributes, 1) & xfrm_mask
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct SigStructBuffer {
    /// (1028) Must be 0
    reserved: [u8; 12],
    /// (1040) Q1 value for RSA Signature Verification
    pub q1: SigKey3072Value,
    /// (1424) Q2 value for RSA Signature Verification
    pub q2: SigKey3072Value,
}

/// ENCLAVE SIGNATURE STRUCTURE
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SigStruct {
    pub header: SigStructHeader,
    pub key: SigStructKey,
    pub body: SigStructBody,
    pub buffer: SigStructBuffer,
}
static_assertions::const_assert_eq!(size_of::<SigStruct>(), 1808);

unsafe impl Plain for SigStruct {}

impl Default for SgxSecs {
    fn default() -> Self {
        unsafe { MaybeUninit::zeroed().assume_init() }
    }
}

impl Default for SgxTcs {
    fn default() -> Self {
        unsafe { MaybeUninit::zeroed().assume_init() }
    }
}

impl Default for SigStruct {
    fn default() -> Self {
        unsafe { MaybeUninit::zeroed().assume_init() }
    }
}

impl Debug for SgxSecInfo {
    fn fmt(&self, f: &mut Formatter) -> Result {
        f.debug_struct("SgxSecInfo")
            .field("flags", &self.flags)
            .field("page_type", &self.page_type)
            .finish()
    }
}

impl Debug for SgxSecs {
    fn fmt(&self, f: &mut Formatter) -> Result {
        f.debug_struct("SgxSecs")
            .field("size", &self.size)
            .field("base_addr", &self.base_addr)
            .field("ssa_frame_size", &self.ssa_frame_size)
            .field("misc_select", &self.misc_select)
            .field("attributes", &self.attributes)
            .field("mr_enclave", &self.mr_enclave)
            .field("mr_signer", &self.mr_signer)
            .field("isv_prod_id", &self.isv_prod_id)
            .field("isv_svn", &self.isv_svn)
            .field("config_svn", &self.config_svn)
            .finish()
    }
}

impl Debug for SgxTcs {
    fn fmt(&self, f: &mut Formatter) -> Result {
        f.debug_struct("SgxTcs")
            .field("stage", &self.stage)
            .field("flags", &self.flags)
            .field("ossa", &self.ossa)
            .field("cssa", &self.cssa)
            .field("nssa", &self.nssa)
            .field("oentry", &self.oentry)
            .field("aep", &self.aep)
            .field("ofs_base", &self.ofs_base)
            .field("ogs_base", &self.ogs_base)
            .field("fs_limit", &self.fs_limit)
            .field("gs_limit", &self.gs_limit)
            .finish()
    }
}

impl Debug for SigStruct {
    fn fmt(&self, f: &mut Formatter) -> Result {
        f.debug_struct("SigStruct")
            .field("types", &self.header.types)
            .field("module_vendor", &self.header.module_vendor)
            .field("modules", &self.key.modules)
            .field("misc_select", &self.body.misc_select)
            .field("attributes", &self.body.attributes)
            .field("mr_enclave", &self.body.mr_enclave)
            .field("isv_prod_id", &self.body.isv_prod_id)
            .field("isv_svn", &self.body.isv_svn)
            .finish()
    }
}
