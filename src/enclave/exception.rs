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

//! Fault record returned by the entry trampoline.

use core::convert::TryFrom;

use numeric_enum_macro::numeric_enum;

use crate::error::{EnclError, EnclResult};

numeric_enum! {
    #[repr(u32)]
    /// ENCLU leaves that can be interrupted by an exception.
    #[derive(Debug, Eq, PartialEq, Copy, Clone)]
    pub enum EncluLeaf {
        EReport = 0,
        EGetKey = 1,
        EEnter = 2,
        EResume = 3,
        EExit = 4,
        EAccept = 5,
        EModpe = 6,
        EAcceptCopy = 7,
    }
}

#[allow(non_snake_case, non_upper_case_globals)]
pub mod ExceptionType {
    pub const DivideError: u16 = 0;
    pub const Debug: u16 = 1;
    pub const Breakpoint: u16 = 3;
    pub const InvalidOpcode: u16 = 6;
    pub const GeneralProtectionFault: u16 = 13;
    pub const PageFault: u16 = 14;
    pub const FloatingPointException: u16 = 16;
    pub const AlignmentCheck: u16 = 17;
    pub const SIMDFloatingPointException: u16 = 19;
}

/// Exception info reported when code inside an enclave traps.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct SgxEnclaveException {
    /// ENCLU leaf active at the time of the trap.
    pub leaf: u32,
    /// Exception vector.
    pub trapnr: u16,
    /// Architectural error code.
    pub error_code: u16,
    /// Faulting linear address (#PF only).
    pub address: u64,
    reserved: [u64; 2],
}
static_assertions::const_assert_eq!(core::mem::size_of::<SgxEnclaveException>(), 32);

impl SgxEnclaveException {
    pub fn new(leaf: EncluLeaf, trapnr: u16, error_code: u16, address: u64) -> Self {
        Self {
            leaf: leaf as u32,
            trapnr,
            error_code,
            address,
            reserved: [0; 2],
        }
    }

    pub fn leaf(&self) -> Option<EncluLeaf> {
        EncluLeaf::try_from(self.leaf).ok()
    }

    pub fn is_page_fault(&self) -> bool {
        self.trapnr == ExceptionType::PageFault
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        let mut bytes = [0; 32];
        bytes[0..4].copy_from_slice(&self.leaf.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.trapnr.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.error_code.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.address.to_le_bytes());
        bytes
    }

    /// Parses a record, rejecting non-zero reserved words.
    pub fn from_bytes(bytes: &[u8; 32]) -> EnclResult<Self> {
        if bytes[16..].iter().any(|&b| b != 0) {
            return encl_result_err!(InvalidDescriptor, "Reserved fault record words not zero");
        }
        let mut leaf = [0; 4];
        let mut trapnr = [0; 2];
        let mut error_code = [0; 2];
        let mut address = [0; 8];
        leaf.copy_from_slice(&bytes[0..4]);
        trapnr.copy_from_slice(&bytes[4..6]);
        error_code.copy_from_slice(&bytes[6..8]);
        address.copy_from_slice(&bytes[8..16]);
        Ok(Self {
            leaf: u32::from_le_bytes(leaf),
            trapnr: u16::from_le_bytes(trapnr),
            error_code: u16::from_le_bytes(error_code),
            address: u64::from_le_bytes(address),
            reserved: [0; 2],
        })
    }
}

impl TryFrom<&[u8; 32]> for SgxEnclaveException {
    type Error = EnclError;

    fn try_from(bytes: &[u8; 32]) -> EnclResult<Self> {
        Self::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use memoffset::offset_of;

    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(offset_of!(SgxEnclaveException, trapnr), 4);
        assert_eq!(offset_of!(SgxEnclaveException, error_code), 6);
        assert_eq!(offset_of!(SgxEnclaveException, address), 8);
        assert_eq!(offset_of!(SgxEnclaveException, reserved), 16);
    }

    #[test]
    fn test_page_fault_record() {
        let record =
            SgxEnclaveException::new(EncluLeaf::EResume, ExceptionType::PageFault, 0x6, 0x10_2000);
        assert!(record.is_page_fault());
        assert_eq!(record.leaf(), Some(EncluLeaf::EResume));
        let bytes = record.to_bytes();
        assert_eq!(&bytes[16..], &[0; 16]);
        assert_eq!(SgxEnclaveException::from_bytes(&bytes).unwrap(), record);
    }

    #[test]
    fn test_reserved_must_be_zero() {
        let mut bytes =
            SgxEnclaveException::new(EncluLeaf::EEnter, ExceptionType::Breakpoint, 0, 0).to_bytes();
        bytes[31] = 1;
        assert!(SgxEnclaveException::try_from(&bytes).is_err());
    }
}
