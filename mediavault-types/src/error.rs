//! Error types for Mediavault
// Copyright 2025 Francisco F. Pinochet
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


use crate::asset::AssetStatus;
use thiserror::Error;

/// Errors that can occur when working with shared types
#[derive(Error, Debug)]
pub enum TypesError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid event payload: {0}")]
    InvalidPayload(String),

    #[error("Illegal status transition: {from} -> {to}")]
    IllegalTransition { from: AssetStatus, to: AssetStatus },

    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, TypesError>;
