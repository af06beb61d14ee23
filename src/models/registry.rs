//! Process-wide table of denoiser constructors, looked up by name.
//!
//! The table is created and filled with the builtin denoisers on first access,
//! later registrations can only add new names.
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tracing::debug;

use crate::models::{Denoiser, DenoiserConfig, DnCNN};
use crate::{Error, Result};

/// Builds a denoiser from its configuration.
pub type DenoiserCtor =
    Arc<dyn Fn(&DenoiserConfig) -> Result<Box<dyn Denoiser>> + Send + Sync>;

pub const DNCNN: &str = "dncnn";

/// Append-only name to constructor mapping.
pub struct DenoiserRegistry {
    ctors: RwLock<HashMap<String, DenoiserCtor>>,
}

impl DenoiserRegistry {
    /// A registry without any denoiser, not even the builtins.
    pub fn empty() -> Self {
        Self {
            ctors: RwLock::new(HashMap::new()),
        }
    }

    /// A registry holding the denoisers shipped with this crate.
    pub fn with_builtins() -> Self {
        let registry = Self::empty();
        registry
            .ctors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                DNCNN.to_string(),
                Arc::new(|config: &DenoiserConfig| -> Result<Box<dyn Denoiser>> {
                    Ok(Box::new(DnCNN::new(config)?))
                }),
            );
        registry
    }

    /// Adds `ctor` under `name`; a name can only be registered once.
    pub fn register(&self, name: impl Into<String>, ctor: DenoiserCtor) -> Result<()> {
        let name = name.into();
        let mut ctors = self.ctors.write().unwrap_or_else(PoisonError::into_inner);
        if ctors.contains_key(&name) {
            return Err(Error::AlreadyRegistered(name));
        }
        debug!(%name, "registered denoiser");
        ctors.insert(name, ctor);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ctors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .ctors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Instantiates the denoiser registered under `name`.
    pub fn create(&self, name: &str, config: &DenoiserConfig) -> Result<Box<dyn Denoiser>> {
        // release the lock before running the constructor, it may load a checkpoint
        let ctor = self
            .ctors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownDenoiser(name.to_string()))?;
        ctor(config)
    }
}

impl Default for DenoiserRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

static REGISTRY: OnceLock<DenoiserRegistry> = OnceLock::new();

/// The global denoiser registry.
pub fn registry() -> &'static DenoiserRegistry {
    REGISTRY.get_or_init(DenoiserRegistry::with_builtins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn builtin_dncnn_is_registered() {
        assert!(registry().contains(DNCNN));
        let net = registry()
            .create(DNCNN, &DenoiserConfig::default().depth(3).nf(4))
            .unwrap();
        let x = Array4::<f32>::ones((1, 1, 5, 5));
        assert_eq!(net.denoise(&x).unwrap().shape(), x.shape());
    }

    #[test]
    fn unknown_name_is_an_error() {
        assert!(matches!(
            registry().create("drunet", &DenoiserConfig::default()),
            Err(Error::UnknownDenoiser(name)) if name == "drunet"
        ));
    }

    #[test]
    fn registration_is_append_only() {
        let registry = DenoiserRegistry::with_builtins();
        let identity: DenoiserCtor = Arc::new(|_: &DenoiserConfig| -> Result<Box<dyn Denoiser>> {
            Ok(Box::new(|x: &Array4<f32>| -> Result<Array4<f32>> { Ok(x.clone()) }))
        });
        registry.register("identity", identity.clone()).unwrap();
        assert!(matches!(
            registry.register("identity", identity.clone()),
            Err(Error::AlreadyRegistered(_))
        ));
        assert!(matches!(
            registry.register(DNCNN, identity),
            Err(Error::AlreadyRegistered(_))
        ));
        assert_eq!(registry.names(), vec![DNCNN.to_string(), "identity".to_string()]);

        let x = Array4::<f32>::ones((1, 1, 2, 2));
        let denoiser = registry.create("identity", &DenoiserConfig::default()).unwrap();
        assert_eq!(denoiser.denoise(&x).unwrap(), x);
    }

    #[test]
    fn default_holds_builtins_and_empty_does_not() {
        assert_eq!(DenoiserRegistry::default().names(), vec![DNCNN.to_string()]);
        let empty = DenoiserRegistry::empty();
        assert!(empty.names().is_empty());
        assert!(matches!(
            empty.create(DNCNN, &DenoiserConfig::default()),
            Err(Error::UnknownDenoiser(_))
        ));
    }

    #[test]
    fn constructor_errors_propagate() {
        assert!(matches!(
            registry().create(DNCNN, &DenoiserConfig::default().act_mode("BR")),
            Err(Error::UnsupportedActivation(_))
        ));
    }
}
