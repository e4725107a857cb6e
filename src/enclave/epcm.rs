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

//! Per-enclave Enclave Page Cache Map (EPCM).
//!
//! Tracks which page-sized slots of an ELRANGE hold an EPC page, with the
//! permissions and type of each. Range operations are all-or-nothing: every
//! page is validated before any entry changes.

use alloc::collections::btree_map::BTreeMap;
use core::ops::Range;

use numeric_enum_macro::numeric_enum;

use super::sgx::{SgxEnclPageFlags, SgxEnclPageType, SgxSecInfo};
use crate::consts::PAGE_SIZE;
use crate::error::EnclResult;
use crate::memory::addr::page_range;
use crate::memory::{EnclOffset, EpcFrame};

numeric_enum! {
    #[repr(u8)]
    /// Selector of [`EpcMap::update`].
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub enum ModifyPagesOp {
        /// Restrict the permissions of REG pages (EMODPR).
        Permissions = 0,
        /// Change the type of pages (EMODT).
        Types = 1,
    }
}

#[derive(Debug)]
pub(crate) enum PageTypeModifyType {
    RegToTcs,
    RegToTrim,
    TcsToTrim,
}

impl PageTypeModifyType {
    fn from_types(from: SgxEnclPageType, to: SgxEnclPageType) -> Option<Self> {
        match (from, to) {
            (SgxEnclPageType::REG, SgxEnclPageType::TCS) => Some(Self::RegToTcs),
            (SgxEnclPageType::REG, SgxEnclPageType::TRIM) => Some(Self::RegToTrim),
            (SgxEnclPageType::TCS, SgxEnclPageType::TRIM) => Some(Self::TcsToTrim),
            _ => None,
        }
    }
}

/// Enclave Page Cache Map Entry
#[derive(Debug)]
pub struct EpcmEntry {
    /// R, W and X.
    flags: SgxEnclPageFlags,
    /// EPCM page type.
    page_type: SgxEnclPageType,
    /// Whether any chunk of the page went into MRENCLAVE.
    measured: bool,
    /// Backing EPC page, `None` only for entries built in tests.
    frame: Option<EpcFrame>,
}

impl EpcmEntry {
    pub fn flags(&self) -> SgxEnclPageFlags {
        self.flags
    }

    pub fn page_type(&self) -> SgxEnclPageType {
        self.page_type
    }

    pub fn sec_info(&self) -> SgxSecInfo {
        SgxSecInfo::new(self.flags, self.page_type)
    }

    /// EPC pages backing this entry.
    pub fn epc_pages(&self) -> usize {
        self.frame.as_ref().map_or(0, EpcFrame::count)
    }

    pub fn is_measured(&self) -> bool {
        self.measured
    }
}

#[derive(Debug)]
pub struct EpcMap {
    size: usize,
    entries: BTreeMap<EnclOffset, EpcmEntry>,
}

impl EpcMap {
    /// Map of an ELRANGE of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, offset: EnclOffset) -> Option<&EpcmEntry> {
        self.entries.get(&offset)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EnclOffset, &EpcmEntry)> {
        self.entries.iter()
    }

    fn checked_range(
        &self,
        op: &str,
        offset: EnclOffset,
        length: usize,
    ) -> EnclResult<Range<usize>> {
        let range = page_range(offset, length).map_err(|err| {
            warn!("EpcMap::{}(): {:?}", op, err);
            err
        })?;
        if range.end > self.size {
            return encl_result_err!(
                OutOfRange,
                format!(
                    "EpcMap::{}(): {:#x?} is out of ELRANGE size {:#x}",
                    op, range, self.size
                )
            );
        }
        Ok(range)
    }

    /// Claims the single page at `offset`, backed by `frame`.
    pub fn reserve(
        &mut self,
        offset: EnclOffset,
        sec_info: SgxSecInfo,
        measured: bool,
        frame: Option<EpcFrame>,
    ) -> EnclResult {
        self.check_reserve(offset, PAGE_SIZE)?;
        self.entries.insert(
            offset,
            EpcmEntry {
                flags: sec_info.flags,
                page_type: sec_info.page_type,
                measured,
                frame,
            },
        );
        Ok(())
    }

    /// Fails unless every page of the range is free and inside ELRANGE.
    pub fn check_reserve(&self, offset: EnclOffset, length: usize) -> EnclResult {
        let range = self.checked_range("reserve", offset, length)?;
        if let Some((occupied, _)) = self.entries.range(range.clone()).next() {
            return encl_result_err!(
                AlreadyOccupied,
                format!(
                    "EpcMap::reserve(): page {:#x} in {:#x?} is occupied",
                    occupied, range
                )
            );
        }
        Ok(())
    }

    fn check_present(&self, op: &str, range: &Range<usize>) -> EnclResult {
        for offset in range.clone().step_by(PAGE_SIZE) {
            if !self.entries.contains_key(&offset) {
                return encl_result_err!(
                    NotFound,
                    format!("EpcMap::{}(): no page at {:#x}", op, offset)
                );
            }
        }
        Ok(())
    }

    /// Removes every page of the range and returns how many were removed.
    pub fn release(&mut self, offset: EnclOffset, length: usize) -> EnclResult<usize> {
        let range = self.checked_range("release", offset, length)?;
        self.check_present("release", &range)?;
        let mut count = 0;
        for offset in range.step_by(PAGE_SIZE) {
            if self.entries.remove(&offset).is_some() {
                count += 1;
            }
        }
        debug!("EpcMap::release(): {:#x} +{:#x}, {} pages", offset, length, count);
        Ok(count)
    }

    /// Drops every entry, returning the EPC frames to their pool.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Applies a permission restriction or a type change to every page of the range.
    pub fn update(
        &mut self,
        offset: EnclOffset,
        length: usize,
        op: ModifyPagesOp,
        sec_info: SgxSecInfo,
    ) -> EnclResult {
        let range = self.checked_range("update", offset, length)?;
        self.check_present("update", &range)?;

        for (offset, entry) in self.entries.range(range.clone()) {
            match op {
                ModifyPagesOp::Permissions => {
                    if entry.page_type != SgxEnclPageType::REG {
                        return encl_result_err!(
                            InvalidTransition,
                            format!(
                                "EpcMap::update(): page {:#x} type {:?} is not REG",
                                offset, entry.page_type
                            )
                        );
                    }
                    if !entry.flags.contains(sec_info.flags & SgxEnclPageFlags::PERM_MASK) {
                        return encl_result_err!(
                            InvalidTransition,
                            format!(
                                "EpcMap::update(): page {:#x} cannot extend {:?} to {:?}",
                                offset, entry.flags, sec_info.flags
                            )
                        );
                    }
                }
                ModifyPagesOp::Types => {
                    if PageTypeModifyType::from_types(entry.page_type, sec_info.page_type)
                        .is_none()
                    {
                        return encl_result_err!(
                            InvalidTransition,
                            format!(
                                "EpcMap::update(): invalid conversion procedure at {:#x}, from: {:?}, to: {:?}",
                                offset, entry.page_type, sec_info.page_type
                            )
                        );
                    }
                }
            }
        }

        for (offset, entry) in self.entries.range_mut(range) {
            match op {
                ModifyPagesOp::Permissions => {
                    let new_perm = SgxEnclPageFlags::PERM_MASK & sec_info.flags & entry.flags;
                    entry.flags -= SgxEnclPageFlags::PERM_MASK;
                    entry.flags |= new_perm;
                }
                ModifyPagesOp::Types => {
                    let modify_type =
                        PageTypeModifyType::from_types(entry.page_type, sec_info.page_type);
                    trace!("EpcMap::update(): {:#x} {:?}", offset, modify_type);
                    // EMODT leaves the page without any permission.
                    entry.page_type = sec_info.page_type;
                    entry.flags = SgxEnclPageFlags::empty();
                }
            }
        }
        Ok(())
    }
}
