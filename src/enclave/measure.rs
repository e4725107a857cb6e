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

//! MRENCLAVE accumulation.
//!
//! The digest is built the way the hardware builds it: one 64-byte ECREATE
//! block, then for every added page one EADD block followed by an EEXTEND
//! header block plus the 256 data bytes of each measured chunk.

use core::convert::TryFrom;
use core::fmt::{self, Debug, Formatter};
use core::mem::size_of;

use sha2::{Digest, Sha256};

use super::sgx::SgxSecInfo;
use super::structs::Sha256Value;
use crate::consts::{CHUNKS_PER_PAGE, MEASURE_CHUNK_SIZE, PAGE_SIZE};
use crate::error::{EnclError, EnclResult};

/// Set of 256-byte chunks of a page that are folded into the measurement.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MrMask(u16);

static_assertions::const_assert_eq!(CHUNKS_PER_PAGE, 16);

impl MrMask {
    pub const NONE: Self = Self(0);
    pub const FULL: Self = Self(u16::MAX);

    pub fn contains(&self, chunk: usize) -> bool {
        chunk < CHUNKS_PER_PAGE && self.0 & (1 << chunk) != 0
    }

    pub fn chunks(self) -> impl Iterator<Item = usize> {
        (0..CHUNKS_PER_PAGE).filter(move |&i| self.contains(i))
    }

    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn bits(&self) -> u16 {
        self.0
    }
}

impl From<u16> for MrMask {
    fn from(mask: u16) -> Self {
        Self(mask)
    }
}

impl TryFrom<u32> for MrMask {
    type Error = EnclError;

    /// Rejects bits that would address chunks beyond the end of the page.
    fn try_from(mask: u32) -> EnclResult<Self> {
        if mask >> CHUNKS_PER_PAGE != 0 {
            return encl_result_err!(
                InvalidMask,
                format!("mrmask {:#x} exceeds {} chunks", mask, CHUNKS_PER_PAGE)
            );
        }
        Ok(Self(mask as u16))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Ord, PartialOrd)]
enum State {
    None,
    Started,
    Update,
    Sealed,
}

#[derive(Clone)]
pub struct Measure {
    state: State,
    hasher: Sha256,
    chunks: usize,
}

impl Measure {
    const DATA_BLOCK_SIZE: usize = 64;
    const SIZE_NAMED_VALUE: usize = 8;

    pub fn new() -> Self {
        Self {
            state: State::None,
            hasher: Sha256::new(),
            chunks: 0,
        }
    }

    fn named_block(name: &str) -> [u8; Self::DATA_BLOCK_SIZE] {
        let mut data_block = [0; Self::DATA_BLOCK_SIZE];
        data_block[..name.len()].clone_from_slice(name.as_bytes());
        data_block
    }

    fn check_open(&self, op: &str) -> EnclResult {
        match self.state {
            State::Started | State::Update => Ok(()),
            State::None => encl_result_err!(WrongState, format!("Measure::{}(): not started", op)),
            State::Sealed => encl_result_err!(WrongState, format!("Measure::{}(): sealed", op)),
        }
    }

    /// Folds the ECREATE block.
    pub fn start(&mut self, enclave_size: u64, ssa_frame_size: u32) {
        let mut data_block = Self::named_block("ECREATE");
        let mut offset = Self::SIZE_NAMED_VALUE;
        data_block[offset..(offset + size_of::<u32>())]
            .clone_from_slice(&ssa_frame_size.to_le_bytes());
        offset += size_of::<u32>();
        data_block[offset..(offset + size_of::<u64>())]
            .clone_from_slice(&enclave_size.to_le_bytes());

        self.hasher = Sha256::new();
        self.hasher.update(&data_block);
        self.chunks = 0;
        self.state = State::Started;
    }

    /// Folds the EADD block of the page at `page_offset`.
    pub fn add_page(&mut self, page_offset: u64, sec_info: SgxSecInfo) -> EnclResult {
        self.check_open("add_page")?;
        let mut data_block = Self::named_block("EADD");
        let mut offset = Self::SIZE_NAMED_VALUE;
        data_block[offset..(offset + size_of::<u64>())]
            .clone_from_slice(&page_offset.to_le_bytes());
        offset += size_of::<u64>();
        data_block[offset..(offset + size_of::<u64>())]
            .clone_from_slice(&u64::from(sec_info).to_le_bytes());

        self.hasher.update(&data_block);
        self.state = State::Update;
        Ok(())
    }

    /// Folds one 256-byte chunk located at `chunk_offset` in the enclave.
    pub fn fold(&mut self, chunk: &[u8], chunk_offset: u64) -> EnclResult {
        self.check_open("fold")?;
        if chunk.len() != MEASURE_CHUNK_SIZE || chunk_offset as usize % MEASURE_CHUNK_SIZE != 0 {
            return encl_result_err!(
                InvalidMask,
                format!(
                    "Measure::fold(): bad chunk len={:#x} offset={:#x}",
                    chunk.len(),
                    chunk_offset
                )
            );
        }
        let mut data_block = Self::named_block("EEXTEND");
        let offset = Self::SIZE_NAMED_VALUE;
        data_block[offset..(offset + size_of::<u64>())]
            .clone_from_slice(&chunk_offset.to_le_bytes());

        self.hasher.update(&data_block);
        self.hasher.update(chunk);
        self.chunks += 1;
        self.state = State::Update;
        Ok(())
    }

    /// Folds the chunks of `page_data` selected by `mrmask`.
    pub fn extend_page(
        &mut self,
        page_offset: u64,
        page_data: &[u8; PAGE_SIZE],
        mrmask: MrMask,
    ) -> EnclResult {
        for i in mrmask.chunks() {
            let start = i * MEASURE_CHUNK_SIZE;
            self.fold(
                &page_data[start..start + MEASURE_CHUNK_SIZE],
                page_offset + start as u64,
            )?;
        }
        Ok(())
    }

    /// Digest of everything folded so far. Does not disturb the running state.
    pub fn finalize(&self) -> Sha256Value {
        let mut value = Sha256Value::default();
        value
            .as_mut_slice()
            .clone_from_slice(self.hasher.clone().finalize().as_slice());
        value
    }

    /// Freezes the measurement after a successful EINIT.
    pub fn seal(&mut self) {
        self.state = State::Sealed;
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks
    }
}

impl Debug for Measure {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Measure")
            .field("state", &self.state)
            .field("chunks", &self.chunks)
            .finish()
    }
}

impl Default for Measure {
    fn default() -> Self {
        Self::new()
    }
}
