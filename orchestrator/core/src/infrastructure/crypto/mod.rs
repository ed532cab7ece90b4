// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Default implementations of the secure channel contracts.
//!
//! | Module | Implements | Primitive |
//! |--------|-----------|-----------|
//! | [`key_agreement`] | `KeyAgreement` | HMAC-SHA256 over a fresh random salt |
//! | [`cipher`] | `PayloadCipher` | AES-256-GCM, random 96-bit nonce |
//! | [`keyring`] | message signing | Ed25519 |

pub mod cipher;
pub mod key_agreement;
pub mod keyring;

pub use cipher::AesGcmCipher;
pub use key_agreement::HmacKeyAgreement;
pub use keyring::KeyRing;
