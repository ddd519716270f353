// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Pure ledger computations. Nothing in here touches storage.

pub mod aggregate;
pub mod allocation;
pub mod arith;
pub mod interest;
pub mod lifecycle;
pub mod replay;
pub mod validator;
