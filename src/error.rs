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

use alloc::string::String;
use core::fmt::{Debug, Display, Formatter, Result};

/// Error numbers of the enclave control plane.
///
/// Every number maps onto the POSIX errno the control surface returns.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EnclErrorNum {
    /// Address, offset or length is not page aligned.
    Misaligned,
    /// Range is not fully inside the enclave's ELRANGE.
    OutOfRange,
    /// A page (or an ELRANGE) is already present at that address.
    AlreadyOccupied,
    /// No page at that address.
    NotFound,
    /// SECINFO has reserved bits set or an illegal permission/type combination.
    InvalidSecInfo,
    /// `mrmask` selects chunks beyond the end of the page.
    InvalidMask,
    /// SECS, TCS or a request record is malformed.
    InvalidDescriptor,
    /// Operation is not legal in the enclave's current state.
    WrongState,
    /// Page permission or type change is not allowed.
    InvalidTransition,
    /// MRENCLAVE does not match SIGSTRUCT.
    MeasurementMismatch,
    /// SIGSTRUCT signature is rejected.
    InvalidSignature,
    /// Attribute file handle is rejected.
    InvalidToken,
    /// Attribute is already attached to the enclave.
    AlreadyAttached,
    /// Enclave requests an attribute it is not entitled to.
    AttributeNotAllowed,
    /// Size is zero or not a multiple of the page size.
    InvalidSize,
    /// EPC capacity or enclave slots exhausted.
    NoMemory,
}

/// Recovery class of an [`EnclErrorNum`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    /// Malformed input, detected before any mutation.
    Validation,
    /// Operation illegal in the current lifecycle state.
    State,
    /// Rejected at the `init` boundary; the enclave stays in `Building`.
    Integrity,
    /// Out of EPC or registry capacity.
    Resource,
}

pub struct EnclError {
    num: EnclErrorNum,
    loc_file: &'static str,
    loc_line: u32,
    loc_col: u32,
    msg: Option<String>,
}

pub type EnclResult<T = ()> = core::result::Result<T, EnclError>;

const EPERM: u32 = 1;
const ENOENT: u32 = 2;
const ENOMEM: u32 = 12;
const EFAULT: u32 = 14;
const EBUSY: u32 = 16;
const EEXIST: u32 = 17;
const EINVAL: u32 = 22;
const ERANGE: u32 = 34;
const EKEYREJECTED: u32 = 129;

impl EnclErrorNum {
    pub fn as_str(&self) -> &'static str {
        use EnclErrorNum::*;
        match *self {
            Misaligned => "Address or length is not page aligned",
            OutOfRange => "Range is outside of ELRANGE",
            AlreadyOccupied => "Range is already occupied",
            NotFound => "No such page",
            InvalidSecInfo => "Invalid SECINFO",
            InvalidMask => "Invalid measurement mask",
            InvalidDescriptor => "Invalid descriptor",
            WrongState => "Operation not allowed in current enclave state",
            InvalidTransition => "Invalid page permission or type transition",
            MeasurementMismatch => "MRENCLAVE mismatch",
            InvalidSignature => "Invalid SIGSTRUCT signature",
            InvalidToken => "Invalid attribute token",
            AlreadyAttached => "Attribute already attached",
            AttributeNotAllowed => "Attribute not allowed",
            InvalidSize => "Invalid size",
            NoMemory => "Out of EPC memory",
        }
    }

    pub fn errno(&self) -> u32 {
        use EnclErrorNum::*;
        match *self {
            Misaligned | InvalidSecInfo | InvalidMask | InvalidDescriptor | InvalidTransition
            | MeasurementMismatch | InvalidSize => EINVAL,
            OutOfRange => ERANGE,
            AlreadyOccupied | AlreadyAttached => EEXIST,
            NotFound => ENOENT,
            WrongState => EBUSY,
            InvalidSignature => EKEYREJECTED,
            InvalidToken => EFAULT,
            AttributeNotAllowed => EPERM,
            NoMemory => ENOMEM,
        }
    }

    pub fn code(&self) -> i32 {
        -(self.errno() as i32)
    }

    pub fn class(&self) -> ErrorClass {
        use EnclErrorNum::*;
        match *self {
            Misaligned | OutOfRange | AlreadyOccupied | NotFound | InvalidSecInfo
            | InvalidMask | InvalidDescriptor | InvalidTransition | InvalidSize => {
                ErrorClass::Validation
            }
            WrongState | AlreadyAttached => ErrorClass::State,
            MeasurementMismatch | InvalidSignature | InvalidToken | AttributeNotAllowed => {
                ErrorClass::Integrity
            }
            NoMemory => ErrorClass::Resource,
        }
    }
}

impl EnclError {
    pub fn new(
        num: EnclErrorNum,
        loc_file: &'static str,
        loc_line: u32,
        loc_col: u32,
        msg: Option<String>,
    ) -> Self {
        Self {
            num,
            loc_file,
            loc_line,
            loc_col,
            msg,
        }
    }

    pub fn num(&self) -> EnclErrorNum {
        self.num
    }

    pub fn loc_line(&self) -> u32 {
        self.loc_line
    }

    pub fn loc_col(&self) -> u32 {
        self.loc_col
    }

    pub fn loc_file(&self) -> &'static str {
        self.loc_file
    }

    pub fn msg(&self) -> Option<String> {
        self.msg.clone()
    }

    pub fn code(&self) -> i32 {
        self.num.code()
    }
}

impl Debug for EnclError {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(
            f,
            "[{}:{}:{}] {}",
            self.loc_file,
            self.loc_line,
            self.loc_col,
            self.num.as_str()
        )?;
        if let Some(ref msg) = self.msg {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}

impl Display for EnclError {
    fn fmt(&self, f: &mut Formatter) -> Result {
        Debug::fmt(self, f)
    }
}

#[macro_export]
macro_rules! encl_err {
    ($num: ident) => {{
        use $crate::error::{EnclError, EnclErrorNum::*};
        EnclError::new($num, file!(), line!(), column!(), None)
    }};
    ($num: ident, $msg: expr) => {{
        use $crate::error::{EnclError, EnclErrorNum::*};
        EnclError::new($num, file!(), line!(), column!(), Some($msg.into()))
    }};
}

#[macro_export]
macro_rules! encl_result_err {
    ($num: ident) => {
        Err($crate::encl_err!($num))
    };
    ($num: ident, $msg: expr) => {
        Err($crate::encl_err!($num, $msg))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_location_and_code() {
        let err: EnclResult = encl_result_err!(OutOfRange, "offset 0x5000");
        let err = err.unwrap_err();
        assert_eq!(err.num(), EnclErrorNum::OutOfRange);
        assert_eq!(err.code(), -34);
        assert!(err.loc_file().ends_with("error.rs"));
        let text = format!("{:?}", err);
        assert!(text.contains("Range is outside of ELRANGE: offset 0x5000"));
    }

    #[test]
    fn test_error_class() {
        assert_eq!(EnclErrorNum::Misaligned.class(), ErrorClass::Validation);
        assert_eq!(EnclErrorNum::WrongState.class(), ErrorClass::State);
        assert_eq!(
            EnclErrorNum::MeasurementMismatch.class(),
            ErrorClass::Integrity
        );
        assert_eq!(EnclErrorNum::NoMemory.class(), ErrorClass::Resource);
    }
}
