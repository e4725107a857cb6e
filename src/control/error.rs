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

use alloc::string::{String, ToString};
use core::fmt::{Debug, Formatter, Result};

use crate::consts::SGX_POWER_LOST_ENCLAVE;
use crate::error::{EnclError, EnclErrorNum};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CtlErrorType {
    Encl(EnclErrorNum),
    /// The EPC backing the enclave is gone; the enclave must be abandoned.
    PowerLost,
}

impl CtlErrorType {
    fn as_string(&self) -> String {
        match self {
            CtlErrorType::Encl(num) => num.as_str().to_string(),
            CtlErrorType::PowerLost => "Enclave lost its EPC backing".to_string(),
        }
    }
}

pub struct CtlError {
    error: CtlErrorType,
    loc_file: &'static str,
    loc_line: u32,
    loc_col: u32,
    msg: Option<String>,
}

pub type CtlResult<T = ()> = core::result::Result<T, CtlError>;

impl CtlError {
    pub fn new(
        error: CtlErrorType,
        loc_file: &'static str,
        loc_line: u32,
        loc_col: u32,
        msg: Option<String>,
    ) -> Self {
        Self {
            error,
            loc_file,
            loc_line,
            loc_col,
            msg,
        }
    }

    pub fn error(&self) -> CtlErrorType {
        self.error
    }

    /// Error number, `None` for a lost enclave.
    pub fn num(&self) -> Option<EnclErrorNum> {
        match self.error {
            CtlErrorType::Encl(num) => Some(num),
            CtlErrorType::PowerLost => None,
        }
    }

    pub fn is_power_lost(&self) -> bool {
        self.error == CtlErrorType::PowerLost
    }

    /// Value returned to the caller of the control surface.
    pub fn code(&self) -> i64 {
        match self.error {
            CtlErrorType::Encl(num) => num.code() as i64,
            CtlErrorType::PowerLost => SGX_POWER_LOST_ENCLAVE,
        }
    }
}

impl From<EnclError> for CtlError {
    fn from(err: EnclError) -> Self {
        CtlError {
            error: CtlErrorType::Encl(err.num()),
            loc_file: err.loc_file(),
            loc_line: err.loc_line(),
            loc_col: err.loc_col(),
            msg: err.msg(),
        }
    }
}

impl Debug for CtlError {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(
            f,
            "[{}:{}:{}] {}",
            self.loc_file,
            self.loc_line,
            self.loc_col,
            self.error.as_string()
        )?;
        if let Some(ref msg) = self.msg {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}

#[macro_export]
macro_rules! ctl_err {
    ($num: ident) => {{
        $crate::control::error::CtlError::from($crate::encl_err!($num))
    }};
    ($num: ident, $msg: expr) => {{
        $crate::control::error::CtlError::from($crate::encl_err!($num, $msg))
    }};
}

#[macro_export]
macro_rules! ctl_result_err {
    ($num: ident) => {
        Err($crate::ctl_err!($num))
    };
    ($num: ident, $msg: expr) => {
        Err($crate::ctl_err!($num, $msg))
    };
}

#[macro_export]
macro_rules! ctl_power_lost_err {
    () => {{
        use $crate::control::error::{CtlError, CtlErrorType};
        CtlError::new(CtlErrorType::PowerLost, file!(), line!(), column!(), None)
    }};
    ($msg: expr) => {{
        use $crate::control::error::{CtlError, CtlErrorType};
        CtlError::new(
            CtlErrorType::PowerLost,
            file!(),
            line!(),
            column!(),
            Some($msg.into()),
        )
    }};
}
