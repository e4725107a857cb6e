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

//! Request records of the control surface and small value types.
//!
//! Layouts match the `_IOW(0xA4, ..)` ioctl ABI: the records are copied
//! verbatim out of caller memory.

use core::fmt::{Debug, Formatter, Result};

use crate::memory::Plain;

/// Argument of `EnclaveCreate`.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct EnclCreateDesc {
    /// Address of the SECS page.
    pub src: u64,
}

/// Argument of `EnclaveAddPage`.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C, packed)]
pub struct EnclAddPageDesc {
    /// Linear address of the page inside ELRANGE.
    pub addr: u64,
    /// Address of the page contents.
    pub src: u64,
    /// Address of the SECINFO.
    pub secinfo: u64,
    /// One bit per 256-byte chunk to measure.
    pub mrmask: u16,
}

/// Argument of `EnclaveInit`.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct EnclInitDesc {
    /// Any address inside ELRANGE.
    pub addr: u64,
    /// Address of the SIGSTRUCT.
    pub sigstruct: u64,
}

/// Argument of `EnclaveSetAttribute`.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct EnclSetAttributeDesc {
    pub addr: u64,
    pub attribute_fd: u64,
}

/// Argument of `EnclaveRemovePages`.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C, packed)]
pub struct EnclRemovePagesDesc {
    pub addr: u64,
    pub length: u64,
}

/// Argument of `EnclaveModifyPages`.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C, packed)]
pub struct EnclModifyPagesDesc {
    pub addr: u64,
    pub length: u64,
    /// Address of the SECINFO carrying the new permissions or type.
    pub secinfo: u64,
    /// 0: restrict permissions, 1: change type.
    pub op: u8,
}

/// Argument of `VirtEpcCreate`.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct VirtEpcCreateDesc {
    pub size: u64,
    pub attribute_fd: u64,
}

static_assertions::const_assert_eq!(core::mem::size_of::<EnclAddPageDesc>(), 26);
static_assertions::const_assert_eq!(core::mem::size_of::<EnclRemovePagesDesc>(), 16);
static_assertions::const_assert_eq!(core::mem::size_of::<EnclModifyPagesDesc>(), 25);

unsafe impl Plain for EnclCreateDesc {}
unsafe impl Plain for EnclAddPageDesc {}
unsafe impl Plain for EnclInitDesc {}
unsafe impl Plain for EnclSetAttributeDesc {}
unsafe impl Plain for EnclRemovePagesDesc {}
unsafe impl Plain for EnclModifyPagesDesc {}
unsafe impl Plain for VirtEpcCreateDesc {}

pub const SHA256_HASH_SIZE: usize = 32;

#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Sha256Value([u8; SHA256_HASH_SIZE]);

impl Sha256Value {
    pub const fn new(bytes: [u8; SHA256_HASH_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for Sha256Value {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "Sha256Value(")?;
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

#[repr(transparent)]
#[derive(Clone, Copy)]
pub struct SigKey3072Value([u8; 384]);

impl SigKey3072Value {
    pub const fn new(bytes: [u8; 384]) -> Self {
        Self(bytes)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl Default for SigKey3072Value {
    fn default() -> Self {
        Self([0; 384])
    }
}

impl Debug for SigKey3072Value {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "SigKey3072Value(")?;
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "..)")
    }
}

#[cfg(test)]
mod tests {
    use memoffset::{offset_of, span_of};

    use super::*;

    #[test]
    fn test_request_layout() {
        assert_eq!(span_of!(EnclAddPageDesc, mrmask), 24..26);
        assert_eq!(span_of!(EnclModifyPagesDesc, op), 24..25);
        assert_eq!(offset_of!(EnclSetAttributeDesc, attribute_fd), 8);
        assert_eq!(offset_of!(VirtEpcCreateDesc, attribute_fd), 8);
    }

    #[test]
    fn test_sha256_debug() {
        let mut value = Sha256Value::default();
        value.as_mut_slice()[0] = 0xab;
        let text = format!("{:?}", value);
        assert!(text.starts_with("Sha256Value(ab00"));
        assert_eq!(text.len(), "Sha256Value()".len() + 64);
    }
}
