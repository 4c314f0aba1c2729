// tests/common/mod.rs
//
// Shared fakes for integration tests: deterministic model backends and an
// env snapshot that restores variables on drop.

#![allow(dead_code)]

use std::env;
use std::sync::Arc;

use dragonfruit_gate::{ImageInput, ModelBackend};

/// Returns the same logits for every image.
pub struct FixedLogits {
    pub name: &'static str,
    pub logits: Vec<f64>,
}

impl ModelBackend for FixedLogits {
    fn name(&self) -> &str {
        self.name
    }
    fn predict(&self, _image: &ImageInput) -> anyhow::Result<Vec<f64>> {
        Ok(self.logits.clone())
    }
}

/// Always fails inference.
pub struct Broken(pub &'static str);

impl ModelBackend for Broken {
    fn name(&self) -> &str {
        self.0
    }
    fn predict(&self, _image: &ImageInput) -> anyhow::Result<Vec<f64>> {
        anyhow::bail!("tensor shape mismatch")
    }
}

pub fn backend(name: &'static str, logits: &[f64]) -> Arc<dyn ModelBackend> {
    Arc::new(FixedLogits {
        name,
        logits: logits.to_vec(),
    })
}

/// softmax ~ [0.007, 0.002, 0.991]: clear Mature.
pub fn confident_mature(name: &'static str) -> Arc<dyn ModelBackend> {
    backend(name, &[1.0, 0.0, 6.0])
}

/// softmax ~ [0.37, 0.33, 0.30]: nothing stands out.
pub fn flat(name: &'static str) -> Arc<dyn ModelBackend> {
    backend(name, &[0.2, 0.1, 0.0])
}

pub fn jpeg() -> ImageInput {
    ImageInput::new(vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3, 4], "image/jpeg")
}

/// Restores touched env vars on drop.
pub struct EnvSnapshot {
    saved: Vec<(String, Option<String>)>,
}

impl EnvSnapshot {
    /// Provide a list of (KEY, Some(VALUE)) to set, or (KEY, None) to remove.
    pub fn set(pairs: &[(&str, Option<&str>)]) -> Self {
        let mut saved = Vec::with_capacity(pairs.len());
        for (k, v) in pairs {
            let key = k.to_string();
            saved.push((key.clone(), env::var(k).ok()));
            match v {
                Some(val) => env::set_var(&key, val),
                None => env::remove_var(&key),
            }
        }
        Self { saved }
    }
}

impl Drop for EnvSnapshot {
    fn drop(&mut self) {
        for (k, maybe_v) in self.saved.drain(..) {
            match maybe_v {
                Some(v) => env::set_var(&k, v),
                None => env::remove_var(&k),
            }
        }
    }
}
