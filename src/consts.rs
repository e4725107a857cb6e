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

pub use crate::memory::PAGE_SIZE;

/// Granularity of EEXTEND: every added page is measured in chunks of this size.
pub const MEASURE_CHUNK_SIZE: usize = 256;

/// Number of EEXTEND chunks in one page, i.e. the width of `mrmask`.
pub const CHUNKS_PER_PAGE: usize = PAGE_SIZE / MEASURE_CHUNK_SIZE;

/// Distinguished return value of the control surface when the EPC backing of
/// an enclave has been lost (e.g. across a suspend).
pub const SGX_POWER_LOST_ENCLAVE: i64 = 0x4000_0000;

/// Upper bound of live enclaves tracked by one manager.
pub const MAX_ENCLAVE_NUM: usize = 256;
