//! Name-to-function registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::binding::BindingError;
use crate::theory::builtin::Builtin;
use crate::theory::TheoryFunction;

/// Looks up theory functions by name or abbreviation, case-insensitively.
///
/// # Examples
///
/// ```
/// use musrfit_rs::theory::TheoryRegistry;
///
/// let registry = TheoryRegistry::with_builtins();
/// assert_eq!(registry.lookup("STATGSSKT").unwrap().name(), "statGssKt");
/// assert_eq!(registry.lookup("stg").unwrap().name(), "statGssKt");
/// assert!(registry.lookup("nope").is_err());
/// ```
#[derive(Clone, Default)]
pub struct TheoryRegistry {
    functions: Vec<Arc<dyn TheoryFunction>>,
    index: HashMap<String, usize>,
}

impl TheoryRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in function.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for function in Builtin::all() {
            // built-in names are distinct
            let _ = registry.register(function);
        }
        registry
    }

    /// Register a function under its name and abbreviation.
    ///
    /// Fails if either key is already taken; the registry is unchanged then.
    pub fn register(&mut self, function: Arc<dyn TheoryFunction>) -> Result<(), BindingError> {
        let mut keys = vec![function.name().to_lowercase()];
        if let Some(abbr) = function.abbreviation() {
            let abbr = abbr.to_lowercase();
            if abbr != keys[0] {
                keys.push(abbr);
            }
        }
        if let Some(taken) = keys.iter().find(|k| self.index.contains_key(*k)) {
            return Err(BindingError::DuplicateFunction {
                name: taken.clone(),
            });
        }
        let position = self.functions.len();
        self.functions.push(function);
        for key in keys {
            self.index.insert(key, position);
        }
        Ok(())
    }

    /// Find a function by name or abbreviation.
    pub fn lookup(&self, name: &str) -> Result<Arc<dyn TheoryFunction>, BindingError> {
        self.index
            .get(&name.to_lowercase())
            .map(|&i| Arc::clone(&self.functions[i]))
            .ok_or_else(|| BindingError::UnknownFunction {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Canonical names of all registered functions, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.functions.iter().map(|f| f.name()).collect()
    }
}

impl std::fmt::Debug for TheoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TheoryRegistry")
            .field("functions", &self.names())
            .finish()
    }
}
