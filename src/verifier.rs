// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Process-wide proof-verifier table (component C10: Verifier Registry).
//!
//! The registry is a singleton shared across every open database in the
//! process, guarded by its own mutex independent of any database's
//! writer lock.

use crate::error::{EngineError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::collections::HashMap;
use std::os::raw::c_void;
use std::sync::{Arc, Mutex, OnceLock};

/// C-callable verifier signature: `(proof_ptr, proof_len, context) -> status`.
pub type FfiVerifierFn = extern "C" fn(*const u8, usize, *mut c_void) -> i32;

/// Wraps a raw context pointer so it can live inside the registry's
/// `Send + Sync` map. Safe because the registry only ever hands the
/// pointer back to the same callback that was registered with it; it
/// never dereferences it itself.
#[derive(Clone, Copy)]
pub(crate) struct ContextPtr(*mut c_void);

// SAFETY: the registry treats the pointer as opaque and never
// dereferences it; only the caller-supplied callback does, on the
// caller's own thread.
unsafe impl Send for ContextPtr {}
unsafe impl Sync for ContextPtr {}

pub(crate) type NativeVerifierFn = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// A registered proof verifier: either a native Rust closure (used for
/// built-ins) or a foreign callback plus its opaque context.
#[derive(Clone)]
pub(crate) enum Verifier {
    Native(NativeVerifierFn),
    Ffi {
        callback: FfiVerifierFn,
        context: ContextPtr,
    },
}

impl Verifier {
    pub(crate) fn ffi(callback: FfiVerifierFn, context: *mut c_void) -> Self {
        Self::Ffi {
            callback,
            context: ContextPtr(context),
        }
    }

    fn invoke(&self, data: &[u8]) -> bool {
        match self {
            Self::Native(f) => f(data),
            Self::Ffi { callback, context } => callback(data.as_ptr(), data.len(), context.0) == 0,
        }
    }

    fn same_registration(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Native(a), Self::Native(b)) => Arc::ptr_eq(a, b),
            (
                Self::Ffi { callback: ca, context: xa },
                Self::Ffi { callback: cb, context: xb },
            ) => std::ptr::eq(*ca as *const (), *cb as *const ()) && xa.0 == xb.0,
            _ => false,
        }
    }
}

#[derive(Default)]
pub(crate) struct VerifierRegistry {
    entries: HashMap<String, Verifier>,
}

impl VerifierRegistry {
    fn global() -> &'static Mutex<VerifierRegistry> {
        static REGISTRY: OnceLock<Mutex<VerifierRegistry>> = OnceLock::new();
        REGISTRY.get_or_init(|| Mutex::new(VerifierRegistry::default()))
    }

    /// Register `verifier` under `name`. Idempotent if an identical
    /// (name, callback, context) triple is already registered; replaces
    /// the existing entry on name collision with a differing verifier.
    pub(crate) fn register(name: &str, verifier: Verifier) -> Result<()> {
        let mut registry = Self::global().lock().unwrap();
        if let Some(existing) = registry.entries.get(name) {
            if existing.same_registration(&verifier) {
                return Ok(());
            }
        }
        registry.entries.insert(name.to_string(), verifier);
        Ok(())
    }

    /// Remove the verifier registered under `name`. Fails with `NotFound`
    /// if no verifier is registered there.
    pub(crate) fn unregister(name: &str) -> Result<()> {
        let mut registry = Self::global().lock().unwrap();
        registry
            .entries
            .remove(name)
            .map(|_| ())
            .ok_or(EngineError::NotFound)
    }

    /// Parse `{"type": ..., "data": base64}` from `proof_doc`, look up the
    /// verifier for `type`, and invoke it with the decoded data.
    pub(crate) fn verify(proof_doc: &[u8]) -> Result<bool> {
        let parsed: serde_json::Value = serde_json::from_slice(proof_doc)
            .map_err(|_| EngineError::InvalidArgument("proof document is not valid JSON"))?;
        let proof_type = parsed
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(EngineError::InvalidArgument("proof document missing \"type\""))?;
        let data_b64 = parsed
            .get("data")
            .and_then(serde_json::Value::as_str)
            .ok_or(EngineError::InvalidArgument("proof document missing \"data\""))?;
        let data = BASE64
            .decode(data_b64)
            .map_err(|_| EngineError::InvalidArgument("proof data is not valid base64"))?;

        let registry = Self::global().lock().unwrap();
        let verifier = registry.entries.get(proof_type).ok_or(EngineError::NotFound)?;
        Ok(verifier.invoke(&data))
    }

    /// Register the built-in verifiers (`fd-holds`, `normalization`,
    /// `denormalization`), each accepting any non-empty data payload.
    /// Safe to call more than once.
    pub(crate) fn init_builtins() -> Result<()> {
        for name in ["fd-holds", "normalization", "denormalization"] {
            Self::register(name, Verifier::Native(Arc::new(|data: &[u8]| !data.is_empty())))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("test-{tag}-{:p}", &tag)
    }

    #[test]
    fn test_register_unregister_lifecycle() {
        let name = unique_name("lifecycle");
        VerifierRegistry::register(&name, Verifier::Native(Arc::new(|_| true))).unwrap();
        VerifierRegistry::unregister(&name).unwrap();
        assert!(matches!(
            VerifierRegistry::unregister(&name),
            Err(EngineError::NotFound)
        ));
    }

    #[test]
    fn test_verify_builtin_accepts_nonempty() {
        VerifierRegistry::init_builtins().unwrap();
        let proof = serde_json::json!({"type": "fd-holds", "data": "dGVzdA=="}).to_string();
        assert!(VerifierRegistry::verify(proof.as_bytes()).unwrap());
    }

    #[test]
    fn test_verify_unknown_type_not_found() {
        let proof = serde_json::json!({"type": "no-such-verifier", "data": "dGVzdA=="}).to_string();
        assert!(matches!(
            VerifierRegistry::verify(proof.as_bytes()),
            Err(EngineError::NotFound)
        ));
    }

    #[test]
    fn test_register_idempotent_on_identical_triple() {
        let name = unique_name("idempotent");
        let verifier = Arc::new(|_: &[u8]| true);
        VerifierRegistry::register(&name, Verifier::Native(verifier.clone())).unwrap();
        VerifierRegistry::register(&name, Verifier::Native(verifier)).unwrap();
        VerifierRegistry::unregister(&name).unwrap();
    }
}
